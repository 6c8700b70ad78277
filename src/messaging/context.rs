//! # Dispatch Context
//!
//! One context exists per delivered envelope. It is the only way a handler
//! settles its delivery, and only the first `ack`/`nack` takes effect.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::envelope::Envelope;
use super::errors::MessagingError;
use super::service::DeliveryHandle;
use super::transport::QueueTransport;

/// Final state of one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Handler acknowledged the delivery
    Acked,
    /// Envelope republished with `retries == attempt`, original acknowledged
    Requeued { attempt: u32 },
    /// Retry budget exhausted; acknowledged without republishing
    Dropped { attempts: u32 },
    /// Republish failed; the original delivery was released for redelivery
    RequeueFailed { attempt: u32 },
}

/// Settlement handle passed to message handlers
///
/// Cheap to clone; clones share the settled flag.
#[derive(Clone)]
pub struct DispatchContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    transport: QueueTransport,
    envelope: Envelope,
    handle: DeliveryHandle,
    settled: AtomicBool,
    settlement: Mutex<Option<Settlement>>,
}

impl DispatchContext {
    pub(crate) fn new(
        transport: QueueTransport,
        envelope: Envelope,
        handle: DeliveryHandle,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                transport,
                envelope,
                handle,
                settled: AtomicBool::new(false),
                settlement: Mutex::new(None),
            }),
        }
    }

    /// The envelope as it was delivered
    pub fn envelope(&self) -> &Envelope {
        &self.inner.envelope
    }

    pub fn is_settled(&self) -> bool {
        self.inner.settled.load(Ordering::Acquire)
    }

    /// Outcome of the call that settled this delivery, once it has completed
    pub fn settlement(&self) -> Option<Settlement> {
        *self.inner.settlement.lock()
    }

    /// Acknowledge the delivery.
    ///
    /// Returns `false` without side effects if the delivery was already settled.
    pub async fn ack(&self) -> bool {
        if !self.claim("ack") {
            return false;
        }
        self.inner
            .transport
            .settle_ack(&self.inner.envelope, &self.inner.handle)
            .await;
        *self.inner.settlement.lock() = Some(Settlement::Acked);
        true
    }

    /// Report a failed delivery, requeueing or dropping the envelope.
    ///
    /// Returns `false` without side effects if the delivery was already settled.
    pub async fn nack(&self, error: MessagingError) -> bool {
        if !self.claim("nack") {
            return false;
        }
        let settlement = self
            .inner
            .transport
            .settle_nack(self.inner.envelope.clone(), &self.inner.handle, &error)
            .await;
        *self.inner.settlement.lock() = Some(settlement);
        true
    }

    fn claim(&self, operation: &str) -> bool {
        if self.inner.settled.swap(true, Ordering::AcqRel) {
            debug!(
                envelope_id = %self.inner.envelope.id,
                operation,
                "Delivery already settled; ignoring"
            );
            return false;
        }
        true
    }
}

impl fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchContext")
            .field("envelope_id", &self.inner.envelope.id)
            .field("message_type", &self.inner.envelope.message_type)
            .field("handle", &self.inner.handle)
            .field("settled", &self.is_settled())
            .finish()
    }
}
