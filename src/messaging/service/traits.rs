//! # Messaging Service Trait
//!
//! Core abstraction every queue backend implements.

use async_trait::async_trait;

use super::types::{DeliveryHandle, DeliveryStream};
use crate::messaging::errors::MessagingResult;

/// Backend contract shared by the in-memory and broker-backed providers
///
/// Providers move opaque bytes. Envelope encoding, routing and the retry
/// state machine live in the transport above them.
#[async_trait]
pub trait MessagingService: Send + Sync + 'static {
    /// Establish the connection and declare the queue topology.
    ///
    /// Idempotent. On failure no partially-opened state is retained.
    async fn connect(&self) -> MessagingResult<()>;

    /// Publish a durable message under `routing_key`
    async fn publish(&self, routing_key: &str, body: Vec<u8>) -> MessagingResult<()>;

    /// Begin consuming the queue.
    ///
    /// The stream ends when the connection is closed or lost.
    async fn consume(&self) -> MessagingResult<DeliveryStream>;

    /// Acknowledge a delivery, removing it from the queue
    async fn ack(&self, handle: &DeliveryHandle) -> MessagingResult<()>;

    /// Return an unacknowledged delivery to the queue for redelivery
    async fn release(&self, handle: &DeliveryHandle) -> MessagingResult<()>;

    /// Best-effort count of messages waiting in the queue
    fn queued_estimate(&self) -> u64;

    /// Whether `connect` has completed and the connection is still open
    fn is_connected(&self) -> bool;

    /// Release the channel and connection. Never fails.
    async fn close(&self);

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}
