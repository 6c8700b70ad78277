//! # Messaging Service Types
//!
//! Provider-agnostic types for delivered messages and their settlement handles.

use std::fmt;
use std::pin::Pin;

use futures::Stream;

use crate::messaging::errors::MessagingResult;

/// Opaque handle used to acknowledge one delivery
///
/// Each provider settles deliveries differently:
/// - InMemory: sequence number assigned at publish time
/// - RabbitMQ: delivery tag plus the channel acker
#[derive(Clone)]
pub enum DeliveryHandle {
    InMemory {
        sequence: u64,
    },
    #[cfg(feature = "rabbitmq")]
    RabbitMq {
        delivery_tag: u64,
        acker: lapin::acker::Acker,
    },
}

impl DeliveryHandle {
    /// Provider-assigned identifier, for logging
    pub fn tag(&self) -> u64 {
        match self {
            Self::InMemory { sequence } => *sequence,
            #[cfg(feature = "rabbitmq")]
            Self::RabbitMq { delivery_tag, .. } => *delivery_tag,
        }
    }
}

impl fmt::Debug for DeliveryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InMemory { sequence } => f
                .debug_struct("InMemory")
                .field("sequence", sequence)
                .finish(),
            #[cfg(feature = "rabbitmq")]
            Self::RabbitMq { delivery_tag, .. } => f
                .debug_struct("RabbitMq")
                .field("delivery_tag", delivery_tag)
                .finish_non_exhaustive(),
        }
    }
}

/// One raw message handed to the consume loop
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Undecoded message body
    pub data: Vec<u8>,
    /// Handle used to acknowledge this delivery
    pub handle: DeliveryHandle,
    /// Broker reports this delivery as a redelivery
    pub redelivered: bool,
}

impl Delivery {
    pub fn new(data: Vec<u8>, handle: DeliveryHandle) -> Self {
        Self {
            data,
            handle,
            redelivered: false,
        }
    }

    pub fn redelivered(mut self) -> Self {
        self.redelivered = true;
        self
    }
}

/// Stream of deliveries produced by a provider's consumer
pub type DeliveryStream = Pin<Box<dyn Stream<Item = MessagingResult<Delivery>> + Send>>;

/// Cumulative provider counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderCounters {
    pub total_sent: u64,
    pub total_received: u64,
    pub total_acked: u64,
    pub total_released: u64,
}
