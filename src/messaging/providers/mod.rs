//! Messaging provider implementations.

pub mod in_memory;
pub mod rabbitmq;

pub use in_memory::{InMemoryMessagingService, InMemoryQueueStats, PeekedMessage};
pub use rabbitmq::{reconnect_delay, BrokerClient, RabbitMqMessagingService};
