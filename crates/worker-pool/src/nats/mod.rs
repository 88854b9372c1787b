//! NATS JetStream subscriber.

mod subscriber;

pub use subscriber::{CommandNotification, NatsSubscriber};
