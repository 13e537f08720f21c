use thiserror::Error;

use crate::status_types::PaymentOrderId;

#[derive(Debug, Clone, Error)]
pub enum OrderLookupError {
    #[error("The order store could not be reached: {0}")]
    Unavailable(String),
    #[error("Order lookup failed: {0}")]
    LookupFailed(String),
}

/// The `OrderLookup` trait lets the stream handler check that a payment order exists before a client is allowed to
/// watch it. The order store itself is owned by the host application, so the engine only asks a yes/no question.
#[allow(async_fn_in_trait)]
pub trait OrderLookup {
    async fn order_exists(&self, order_id: &PaymentOrderId) -> Result<bool, OrderLookupError>;
}

/// Accepts every order id. Used when order checks are switched off.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllOrders;

impl OrderLookup for AllowAllOrders {
    async fn order_exists(&self, _order_id: &PaymentOrderId) -> Result<bool, OrderLookupError> {
        Ok(true)
    }
}
