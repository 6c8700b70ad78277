//! # Messaging Module
//!
//! Envelope model, routing, the backend abstraction and the queue transport
//! that ties them together.
//!
//! ```text
//! enqueue -> EnvelopeCodec::encode -> MessagingProvider::publish
//!                                           |
//! consume loop <- MessagingProvider::consume
//!   -> EnvelopeCodec::decode_envelope -> RoutingTable::resolve
//!   -> handler(envelope, DispatchContext) -> ack / nack
//! ```

pub mod context;
pub mod envelope;
pub mod errors;
pub mod router;
pub mod service;
pub mod transport;

pub use context::{DispatchContext, Settlement};
pub use envelope::{EnqueueRequest, Envelope, EnvelopeCodec, Payload, RawEnvelope, RetryDecision};
pub use errors::{MessagingError, MessagingResult};
pub use router::{handler_fn, HandlerFuture, MessageHandler, RouteEntry, RoutePattern, RoutingTable};
pub use service::{MessagingProvider, MessagingService};
pub use transport::{Publisher, QueueTransport, TransportStats};
