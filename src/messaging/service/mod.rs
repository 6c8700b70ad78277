//! # Messaging Service Abstraction Layer
//!
//! Backend-agnostic byte transport under the queue transport, with enum
//! dispatch over the available providers.
//!
//! ## Architecture
//!
//! ```text
//! MessagingProvider (enum)      <- Zero-cost dispatch, no vtable
//!   ├── InMemory(InMemoryMessagingService)
//!   └── RabbitMq(RabbitMqMessagingService)   [feature = "rabbitmq"]
//! ```
//!
//! ## Design Decisions
//!
//! - **Enum dispatch** instead of `Arc<dyn MessagingService>`
//! - Providers move opaque bytes; envelopes, routing and retries belong to
//!   [`QueueTransport`](crate::messaging::transport::QueueTransport)

mod provider;
pub mod providers;
mod traits;
mod types;

pub use provider::MessagingProvider;
pub use providers::{InMemoryMessagingService, PublishedMessage};
#[cfg(feature = "rabbitmq")]
pub use providers::{RabbitMqMessagingService, RabbitMqSettings};
pub use traits::MessagingService;
pub use types::{Delivery, DeliveryHandle, DeliveryStream, ProviderCounters};

pub use super::errors::{MessagingError, MessagingResult};
