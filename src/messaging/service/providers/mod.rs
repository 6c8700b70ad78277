//! # Messaging Service Providers
//!
//! Concrete implementations of the `MessagingService` trait.
//!
//! ## Providers
//!
//! - [`InMemoryMessagingService`] - unbounded same-process queue for local runs and tests
//! - [`RabbitMqMessagingService`] - RabbitMQ via the lapin crate (`rabbitmq` feature)

mod in_memory;
#[cfg(feature = "rabbitmq")]
mod rabbitmq;

pub use in_memory::{InMemoryMessagingService, PublishedMessage};
#[cfg(feature = "rabbitmq")]
pub use rabbitmq::{RabbitMqMessagingService, RabbitMqSettings};
