pub mod broadcaster;
pub mod types;

pub use broadcaster::{StatusBroadcaster, Subscription, SUBSCRIBER_QUEUE_CAPACITY};
pub use types::StatusSnapshot;
