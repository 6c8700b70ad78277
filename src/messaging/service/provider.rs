//! # Messaging Provider Enum
//!
//! Enum dispatch for messaging providers, avoiding trait object overhead.

use super::providers::InMemoryMessagingService;
#[cfg(feature = "rabbitmq")]
use super::providers::{RabbitMqMessagingService, RabbitMqSettings};
use super::traits::MessagingService;
use super::types::{DeliveryHandle, DeliveryStream};
use crate::config::{BackendKind, TransportConfig};
use crate::messaging::errors::MessagingResult;

/// Provider enum for zero-cost dispatch
///
/// # Variants
///
/// - `InMemory` - same-process queue
/// - `RabbitMq` - RabbitMQ via lapin (AMQP 0.9.1)
///
/// # Example
///
/// ```rust
/// use judge_queue::messaging::service::{InMemoryMessagingService, MessagingProvider};
///
/// let provider = MessagingProvider::InMemory(InMemoryMessagingService::new("judge"));
/// assert_eq!(provider.provider_name(), "in_memory");
/// ```
#[derive(Debug)]
pub enum MessagingProvider {
    InMemory(InMemoryMessagingService),

    #[cfg(feature = "rabbitmq")]
    RabbitMq(RabbitMqMessagingService),
}

impl MessagingProvider {
    /// Build the provider selected by `config.backend`
    pub fn from_config(config: &TransportConfig, prefetch: u16) -> MessagingResult<Self> {
        match config.backend {
            BackendKind::InMemory => Ok(Self::InMemory(InMemoryMessagingService::new(
                &config.queue_name,
            ))),
            #[cfg(feature = "rabbitmq")]
            BackendKind::RabbitMq => Ok(Self::RabbitMq(RabbitMqMessagingService::new(
                RabbitMqSettings::from_transport_config(config, prefetch),
            ))),
            #[cfg(not(feature = "rabbitmq"))]
            BackendKind::RabbitMq => {
                let _ = prefetch;
                Err(crate::messaging::errors::MessagingError::configuration(
                    "transport",
                    "RabbitMQ backend requested but the `rabbitmq` feature is disabled",
                ))
            }
        }
    }

    /// Get the provider name for logging
    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::InMemory(s) => s.provider_name(),
            #[cfg(feature = "rabbitmq")]
            Self::RabbitMq(s) => s.provider_name(),
        }
    }

    /// The in-memory provider, if that is the active backend
    pub fn as_in_memory(&self) -> Option<&InMemoryMessagingService> {
        match self {
            Self::InMemory(s) => Some(s),
            #[cfg(feature = "rabbitmq")]
            Self::RabbitMq(_) => None,
        }
    }

    pub async fn connect(&self) -> MessagingResult<()> {
        match self {
            Self::InMemory(s) => s.connect().await,
            #[cfg(feature = "rabbitmq")]
            Self::RabbitMq(s) => s.connect().await,
        }
    }

    pub async fn publish(&self, routing_key: &str, body: Vec<u8>) -> MessagingResult<()> {
        match self {
            Self::InMemory(s) => s.publish(routing_key, body).await,
            #[cfg(feature = "rabbitmq")]
            Self::RabbitMq(s) => s.publish(routing_key, body).await,
        }
    }

    pub async fn consume(&self) -> MessagingResult<DeliveryStream> {
        match self {
            Self::InMemory(s) => s.consume().await,
            #[cfg(feature = "rabbitmq")]
            Self::RabbitMq(s) => s.consume().await,
        }
    }

    pub async fn ack(&self, handle: &DeliveryHandle) -> MessagingResult<()> {
        match self {
            Self::InMemory(s) => s.ack(handle).await,
            #[cfg(feature = "rabbitmq")]
            Self::RabbitMq(s) => s.ack(handle).await,
        }
    }

    pub async fn release(&self, handle: &DeliveryHandle) -> MessagingResult<()> {
        match self {
            Self::InMemory(s) => s.release(handle).await,
            #[cfg(feature = "rabbitmq")]
            Self::RabbitMq(s) => s.release(handle).await,
        }
    }

    pub fn queued_estimate(&self) -> u64 {
        match self {
            Self::InMemory(s) => s.queued_estimate(),
            #[cfg(feature = "rabbitmq")]
            Self::RabbitMq(s) => s.queued_estimate(),
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            Self::InMemory(s) => s.is_connected(),
            #[cfg(feature = "rabbitmq")]
            Self::RabbitMq(s) => s.is_connected(),
        }
    }

    pub async fn close(&self) {
        match self {
            Self::InMemory(s) => s.close().await,
            #[cfg(feature = "rabbitmq")]
            Self::RabbitMq(s) => s.close().await,
        }
    }
}
