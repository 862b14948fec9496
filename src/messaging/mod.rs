// Messaging module - Inbound classification and subscriber fan-out
pub mod router;
pub mod subscribers;

pub use router::{Inbound, classify};
pub use subscribers::{SubscriberRegistry, Subscription, SubscriptionId};
