// NATS integration: JetStream event publishing and the shared connection

mod client;
mod publisher;

pub use client::{NatsClient, NatsConfig};
pub use publisher::NatsEventPublisher;
