use mockall::mock;
use payment_stream_engine::{OrderLookup, OrderLookupError, PaymentOrderId};

mock! {
    pub OrderLookup {}
    impl OrderLookup for OrderLookup {
        async fn order_exists(&self, order_id: &PaymentOrderId) -> Result<bool, OrderLookupError>;
    }
}
