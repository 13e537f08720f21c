mod bus;
mod channel;

pub use bus::{EventBus, Handler, SubscriptionHandle, PAYMENT_STATUS_UPDATED};
pub use channel::{notify_status, StatusUpdate, StatusUpdateProducer, StatusUpdateQueue};
