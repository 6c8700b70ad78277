//! # Queue Transport
//!
//! Owns the backend connection, publishes envelopes, drives the consume loop
//! and applies the acknowledgment/retry state machine.
//!
//! ## Delivery lifecycle
//!
//! ```text
//! Received --decode fails-------------------> Acked (discarded)
//! Received --no route resolves--------------> Acked (discarded)
//! Received --handler acks-------------------> Acked
//! Received --handler nacks / errs / panics--> RetryCheck
//! RetryCheck --retries+1 <= max_retries-----> Requeued (republished, original acked)
//! Requeued   --republish fails--------------> RequeueFailed (original released)
//! RetryCheck --retries+1 >  max_retries-----> Dropped (acked, not republished)
//! ```
//!
//! ## Backpressure
//!
//! At most `prefetch` deliveries are in flight. The consume loop takes a
//! semaphore permit before pulling the next delivery, and the permit is held
//! until the spawned handler task finishes. No per-handler timeout is
//! enforced: a stalled handler keeps its permit.
//!
//! ## Usage
//!
//! ```rust
//! use judge_queue::config::TransportConfig;
//! use judge_queue::messaging::{handler_fn, QueueTransport, RawEnvelope};
//!
//! # tokio_test::block_on(async {
//! let transport = QueueTransport::in_memory(TransportConfig::default());
//! transport
//!     .register_handler(
//!         "hooks.*",
//!         handler_fn(|_envelope, context| async move {
//!             context.ack().await;
//!             Ok(())
//!         }),
//!     )
//!     .unwrap();
//! transport.start().await.unwrap();
//!
//! let id = transport.enqueue(RawEnvelope::new("hooks.execute")).await.unwrap();
//! println!("enqueued {id}");
//! transport.close().await;
//! # });
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn, Instrument};

use super::context::{DispatchContext, Settlement};
use super::envelope::{EnqueueRequest, Envelope, EnvelopeCodec, RetryDecision};
use super::errors::{MessagingError, MessagingResult};
use super::router::{MessageHandler, RoutePattern, RoutingTable};
use super::service::{
    Delivery, DeliveryHandle, DeliveryStream, InMemoryMessagingService, MessagingProvider,
};
use crate::config::{BackendKind, TransportConfig};

/// Point-in-time transport snapshot for health reporting
///
/// `queued` is best-effort; the RabbitMQ backend reports 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransportStats {
    pub queued: u64,
    pub processing: usize,
    pub concurrency: usize,
    pub acked: u64,
    pub requeued: u64,
    pub dropped: u64,
    pub discarded: u64,
}

impl TransportStats {
    /// Admission slots not currently held by a handler
    pub fn workers_free(&self) -> usize {
        self.concurrency.saturating_sub(self.processing)
    }
}

#[derive(Debug, Default)]
struct TransportCounters {
    acked: AtomicU64,
    requeued: AtomicU64,
    dropped: AtomicU64,
    discarded: AtomicU64,
}

struct TransportInner {
    provider: MessagingProvider,
    codec: EnvelopeCodec,
    config: TransportConfig,
    routes: RwLock<RoutingTable>,
    concurrency: usize,
    permits: Arc<Semaphore>,
    started: AtomicBool,
    processing: AtomicUsize,
    counters: TransportCounters,
    shutdown: watch::Sender<bool>,
    consume_task: Mutex<Option<JoinHandle<()>>>,
}

/// Envelope transport over one messaging provider
///
/// Cheap to clone; clones share the connection, routes and counters.
#[derive(Clone)]
pub struct QueueTransport {
    inner: Arc<TransportInner>,
}

impl QueueTransport {
    /// Wrap an existing provider. `prefetch` is resolved from `config` once.
    pub fn new(provider: MessagingProvider, config: TransportConfig) -> Self {
        let concurrency = usize::from(config.effective_prefetch());
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(TransportInner {
                provider,
                codec: EnvelopeCodec::new(config.default_max_retries),
                config,
                routes: RwLock::new(RoutingTable::new()),
                concurrency,
                permits: Arc::new(Semaphore::new(concurrency)),
                started: AtomicBool::new(false),
                processing: AtomicUsize::new(0),
                counters: TransportCounters::default(),
                shutdown,
                consume_task: Mutex::new(None),
            }),
        }
    }

    /// Build the provider selected by `config.backend`
    pub fn from_config(config: TransportConfig) -> MessagingResult<Self> {
        config
            .validate()
            .map_err(|e| MessagingError::configuration("transport", e.to_string()))?;
        let provider = MessagingProvider::from_config(&config, config.effective_prefetch())?;
        Ok(Self::new(provider, config))
    }

    /// Transport over a fresh in-memory queue, whatever `config.backend` says
    pub fn in_memory(config: TransportConfig) -> Self {
        let config = TransportConfig {
            backend: BackendKind::InMemory,
            ..config
        };
        let provider =
            MessagingProvider::InMemory(InMemoryMessagingService::new(&config.queue_name));
        Self::new(provider, config)
    }

    pub fn provider(&self) -> &MessagingProvider {
        &self.inner.provider
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// Maximum number of concurrently dispatched deliveries
    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// Establish the backend connection. Idempotent.
    pub async fn connect(&self) -> MessagingResult<()> {
        self.inner.provider.connect().await
    }

    /// Normalize and publish a new envelope, returning its id
    #[instrument(
        skip_all,
        fields(message_type = request.message_type.as_deref().unwrap_or(""))
    )]
    pub async fn enqueue(&self, request: EnqueueRequest) -> MessagingResult<String> {
        let envelope = self.inner.codec.normalize(request)?;
        if envelope.message_type.is_empty() {
            return Err(MessagingError::validation(vec!["type is required".to_string()]));
        }

        self.connect().await?;
        self.publish_envelope(&envelope).await?;

        debug!(
            envelope_id = %envelope.id,
            message_type = %envelope.message_type,
            "Enqueued envelope"
        );
        Ok(envelope.id)
    }

    /// Publish an already-normalized envelope under its type
    pub async fn publish_envelope(&self, envelope: &Envelope) -> MessagingResult<()> {
        let body = self.inner.codec.encode(envelope)?;
        self.inner
            .provider
            .publish(&envelope.message_type, body)
            .await
    }

    /// Route a string pattern (exact, prefix or glob) to `handler`
    pub fn register_handler(
        &self,
        pattern: &str,
        handler: MessageHandler,
    ) -> MessagingResult<()> {
        self.register_route(RoutePattern::parse(pattern)?, handler)
    }

    /// Route an already-built pattern to `handler`.
    ///
    /// Rejected once the transport has started.
    pub fn register_route(
        &self,
        pattern: RoutePattern,
        handler: MessageHandler,
    ) -> MessagingResult<()> {
        if self.is_started() {
            return Err(MessagingError::registration_closed(pattern.as_str()));
        }

        info!(pattern = %pattern, "Registered message handler");
        self.inner.routes.write().register(pattern, handler);
        Ok(())
    }

    /// Registered patterns in scan order
    pub fn routes(&self) -> Vec<String> {
        self.inner.routes.read().patterns()
    }

    /// Connect and begin consuming. Idempotent.
    ///
    /// If the delivery stream ends on its own the transport reverts to not
    /// started, and `start` may be called again.
    pub async fn start(&self) -> MessagingResult<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let deliveries = match self.open_delivery_stream().await {
            Ok(deliveries) => deliveries,
            Err(err) => {
                self.inner.started.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };

        self.inner.shutdown.send_replace(false);
        let shutdown = self.inner.shutdown.subscribe();
        let task = tokio::spawn(self.clone().run_consume_loop(deliveries, shutdown));
        *self.inner.consume_task.lock() = Some(task);

        info!(
            provider = self.inner.provider.provider_name(),
            queue = %self.inner.config.queue_name,
            concurrency = self.inner.concurrency,
            routes = self.inner.routes.read().len(),
            "Queue transport started"
        );
        Ok(())
    }

    async fn open_delivery_stream(&self) -> MessagingResult<DeliveryStream> {
        self.connect().await?;
        self.inner.provider.consume().await
    }

    pub fn stats(&self) -> TransportStats {
        let counters = &self.inner.counters;
        TransportStats {
            queued: self.inner.provider.queued_estimate(),
            processing: self.inner.processing.load(Ordering::SeqCst),
            concurrency: self.inner.concurrency,
            acked: counters.acked.load(Ordering::Relaxed),
            requeued: counters.requeued.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
        }
    }

    /// Stop the consume loop and release the connection.
    ///
    /// Never fails. Handlers already dispatched keep running and are not awaited.
    pub async fn close(&self) {
        self.inner.shutdown.send_replace(true);

        let task = self.inner.consume_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Consume loop task ended abnormally");
            }
        }

        self.inner.provider.close().await;
        self.inner.started.store(false, Ordering::SeqCst);
        info!(queue = %self.inner.config.queue_name, "Queue transport closed");
    }

    async fn run_consume_loop(
        self,
        mut deliveries: DeliveryStream,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                permit = Arc::clone(&self.inner.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let next = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => self.dispatch(delivery, permit).await,
                Some(Err(err)) => error!(error = %err, "Failed to receive delivery"),
                None => {
                    error!(
                        queue = %self.inner.config.queue_name,
                        "Delivery stream ended; transport must be restarted"
                    );
                    self.inner.started.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }

        debug!(queue = %self.inner.config.queue_name, "Consume loop stopped");
    }

    /// Decode, route and hand one delivery to its handler task
    #[instrument(skip_all, fields(delivery_tag = delivery.handle.tag()))]
    async fn dispatch(&self, delivery: Delivery, permit: OwnedSemaphorePermit) {
        let envelope = match self.inner.codec.decode_envelope(&delivery.data) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "Discarding undecodable delivery");
                self.discard(&delivery.handle).await;
                return;
            }
        };

        if envelope.is_exhausted() {
            warn!(
                envelope_id = %envelope.id,
                message_type = %envelope.message_type,
                retries = envelope.retries,
                max_retries = envelope.max_retries,
                "Envelope arrived with an exhausted retry budget; dropping"
            );
            self.ack_delivery(&delivery.handle).await;
            self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let handler = self.inner.routes.read().resolve(&envelope.message_type);
        let Some(handler) = handler else {
            debug!(
                envelope_id = %envelope.id,
                message_type = %envelope.message_type,
                "No handler resolves message type; discarding"
            );
            self.discard(&delivery.handle).await;
            return;
        };

        let context = DispatchContext::new(self.clone(), envelope.clone(), delivery.handle);
        let inner = Arc::clone(&self.inner);
        inner.processing.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(
            async move {
                let _permit = permit;
                let handler_context = context.clone();
                let outcome =
                    AssertUnwindSafe(async move { handler(envelope, handler_context).await })
                        .catch_unwind()
                        .await;

                match outcome {
                    Ok(Ok(())) => {
                        if !context.is_settled() {
                            warn!(
                                envelope_id = %context.envelope().id,
                                "Handler returned without settling; acknowledging"
                            );
                            context.ack().await;
                        }
                    }
                    Ok(Err(err)) => {
                        if context.nack(err.clone()).await {
                            debug!(error = %err, "Handler error treated as nack");
                        }
                    }
                    Err(panic) => {
                        let panic_msg = if let Some(s) = panic.downcast_ref::<&str>() {
                            s.to_string()
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "Unknown panic".to_string()
                        };
                        error!(
                            envelope_id = %context.envelope().id,
                            panic_msg = %panic_msg,
                            "Handler panicked"
                        );
                        let err = MessagingError::processing(format!(
                            "handler panicked: {panic_msg}"
                        ));
                        context.nack(err).await;
                    }
                }

                inner.processing.fetch_sub(1, Ordering::SeqCst);
            }
            .in_current_span(),
        );
    }

    async fn discard(&self, handle: &DeliveryHandle) {
        self.ack_delivery(handle).await;
        self.inner.counters.discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Acknowledge at the backend; failures are logged, never raised
    async fn ack_delivery(&self, handle: &DeliveryHandle) {
        if let Err(e) = self.inner.provider.ack(handle).await {
            error!(error = %e, delivery_tag = handle.tag(), "Failed to acknowledge delivery");
        }
    }

    pub(crate) async fn settle_ack(&self, envelope: &Envelope, handle: &DeliveryHandle) {
        self.ack_delivery(handle).await;
        self.inner.counters.acked.fetch_add(1, Ordering::Relaxed);
        debug!(
            envelope_id = %envelope.id,
            message_type = %envelope.message_type,
            "Acknowledged envelope"
        );
    }

    /// Record a failed delivery and requeue or drop the envelope
    pub(crate) async fn settle_nack(
        &self,
        mut envelope: Envelope,
        handle: &DeliveryHandle,
        error: &MessagingError,
    ) -> Settlement {
        match envelope.record_failure() {
            RetryDecision::Requeue { attempt } => {
                // Republish before acking; on failure the original goes back to the queue
                if let Err(publish_err) = self.publish_envelope(&envelope).await {
                    error!(
                        envelope_id = %envelope.id,
                        message_type = %envelope.message_type,
                        retries = attempt,
                        error = %publish_err,
                        "Failed to republish envelope; releasing original delivery"
                    );
                    if let Err(e) = self.inner.provider.release(handle).await {
                        error!(
                            error = %e,
                            delivery_tag = handle.tag(),
                            "Failed to release delivery"
                        );
                    }
                    return Settlement::RequeueFailed { attempt };
                }

                self.ack_delivery(handle).await;
                self.inner.counters.requeued.fetch_add(1, Ordering::Relaxed);
                warn!(
                    envelope_id = %envelope.id,
                    message_type = %envelope.message_type,
                    retries = attempt,
                    max_retries = envelope.max_retries,
                    error = %error,
                    "Requeued envelope after failure"
                );
                Settlement::Requeued { attempt }
            }
            RetryDecision::Drop { attempts } => {
                // Dead-letter routing would publish here instead of dropping
                self.ack_delivery(handle).await;
                self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
                error!(
                    envelope_id = %envelope.id,
                    message_type = %envelope.message_type,
                    retries = attempts,
                    max_retries = envelope.max_retries,
                    error = %error,
                    "Retry budget exhausted; dropping envelope"
                );
                Settlement::Dropped { attempts }
            }
        }
    }
}

impl std::fmt::Debug for QueueTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueTransport")
            .field("provider", &self.inner.provider.provider_name())
            .field("queue", &self.inner.config.queue_name)
            .field("concurrency", &self.inner.concurrency)
            .field("started", &self.is_started())
            .field("routes", &*self.inner.routes.read())
            .finish()
    }
}

/// Publishes new envelopes onto the queue
///
/// Consumers emit result events through this seam rather than holding the
/// transport directly.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, request: EnqueueRequest) -> MessagingResult<String>;
}

#[async_trait]
impl Publisher for QueueTransport {
    async fn publish(&self, request: EnqueueRequest) -> MessagingResult<String> {
        self.enqueue(request).await
    }
}
