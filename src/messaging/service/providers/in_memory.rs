//! # In-Memory Messaging Service
//!
//! Same-process stand-in for the broker, used for local runs and tests.
//!
//! ## Features
//!
//! - **Unbounded queue**: a `tokio::sync::mpsc` channel replaces the broker
//!   queue, so publishing from inside a handler never waits on the consumer
//! - **Shared consumer**: every consume stream reads the same queue, and all
//!   of them end when the service is closed
//! - **Release**: an unacknowledged delivery can be put back on the queue
//! - **Publish log**: every published message is recorded for inspection

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::messaging::envelope::Envelope;
use crate::messaging::errors::{MessagingError, MessagingResult};
use crate::messaging::service::traits::MessagingService;
use crate::messaging::service::types::{
    Delivery, DeliveryHandle, DeliveryStream, ProviderCounters,
};

/// Message waiting in the in-memory queue
#[derive(Debug)]
struct InMemoryQueuedMessage {
    sequence: u64,
    body: Vec<u8>,
    redelivered: bool,
}

/// Delivered or queued, not yet acknowledged
#[derive(Debug)]
struct UnackedMessage {
    routing_key: String,
    body: Vec<u8>,
}

#[derive(Debug, Default)]
struct InMemoryStatistics {
    queued: AtomicU64,
    total_sent: AtomicU64,
    total_received: AtomicU64,
    total_acked: AtomicU64,
    total_released: AtomicU64,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<InMemoryQueuedMessage>>>;

/// A message as it was handed to `publish`
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub routing_key: String,
    pub body: Vec<u8>,
}

/// In-memory messaging service
///
/// # Example
///
/// ```rust
/// use judge_queue::messaging::service::providers::InMemoryMessagingService;
/// use judge_queue::messaging::service::MessagingService;
///
/// # tokio_test::block_on(async {
/// let service = InMemoryMessagingService::new("judge");
/// service.connect().await.unwrap();
/// service.publish("status", br#"{"type":"status"}"#.to_vec()).await.unwrap();
/// assert_eq!(service.queued_estimate(), 1);
/// # });
/// ```
#[derive(Debug)]
pub struct InMemoryMessagingService {
    queue_name: String,
    sender: mpsc::UnboundedSender<InMemoryQueuedMessage>,
    receiver: SharedReceiver,
    connected: AtomicBool,
    /// `true` once closed; open consume streams end when it flips
    closed: watch::Sender<bool>,
    next_sequence: AtomicU64,
    unacked: DashMap<u64, UnackedMessage>,
    published: Mutex<Vec<PublishedMessage>>,
    /// Upcoming publishes to fail (for testing)
    rejected_publishes: AtomicUsize,
    stats: Arc<InMemoryStatistics>,
}

impl InMemoryMessagingService {
    pub fn new(queue_name: impl Into<String>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(true);
        Self {
            queue_name: queue_name.into(),
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            connected: AtomicBool::new(false),
            closed,
            next_sequence: AtomicU64::new(1),
            unacked: DashMap::new(),
            published: Mutex::new(Vec::new()),
            rejected_publishes: AtomicUsize::new(0),
            stats: Arc::new(InMemoryStatistics::default()),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Every message published so far, in publish order (for testing)
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().clone()
    }

    /// Published messages that decode as canonical envelopes (for testing)
    pub fn published_envelopes(&self) -> Vec<Envelope> {
        self.published
            .lock()
            .iter()
            .filter_map(|message| serde_json::from_slice::<Envelope>(&message.body).ok())
            .collect()
    }

    /// Published envelopes of one message type (for testing)
    pub fn published_of_type(&self, message_type: &str) -> Vec<Envelope> {
        self.published_envelopes()
            .into_iter()
            .filter(|envelope| envelope.message_type == message_type)
            .collect()
    }

    /// Messages published but not yet acknowledged, queued or in flight (for testing)
    pub fn unacked_count(&self) -> usize {
        self.unacked.len()
    }

    /// Fail the next `count` publishes as a broker would on a rejected confirm (for testing)
    pub fn reject_publishes(&self, count: usize) {
        self.rejected_publishes.store(count, Ordering::SeqCst);
    }

    pub fn counters(&self) -> ProviderCounters {
        ProviderCounters {
            total_sent: self.stats.total_sent.load(Ordering::Relaxed),
            total_received: self.stats.total_received.load(Ordering::Relaxed),
            total_acked: self.stats.total_acked.load(Ordering::Relaxed),
            total_released: self.stats.total_released.load(Ordering::Relaxed),
        }
    }

    fn take_rejection(&self) -> bool {
        self.rejected_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Track `body` as unacknowledged and put it on the queue
    fn push(&self, routing_key: &str, body: Vec<u8>, redelivered: bool) -> MessagingResult<()> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        self.unacked.insert(
            sequence,
            UnackedMessage {
                routing_key: routing_key.to_string(),
                body: body.clone(),
            },
        );

        let message = InMemoryQueuedMessage {
            sequence,
            body,
            redelivered,
        };
        if self.sender.send(message).is_err() {
            self.unacked.remove(&sequence);
            return Err(MessagingError::publish(
                &self.queue_name,
                "in-memory queue receiver dropped",
            ));
        }

        self.stats.queued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl MessagingService for InMemoryMessagingService {
    async fn connect(&self) -> MessagingResult<()> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.closed.send_replace(false);
            debug!(queue = %self.queue_name, "In-memory queue connected");
        }
        Ok(())
    }

    async fn publish(&self, routing_key: &str, body: Vec<u8>) -> MessagingResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(MessagingError::not_connected("publish"));
        }
        if self.take_rejection() {
            return Err(MessagingError::publish(
                &self.queue_name,
                "broker rejected the message",
            ));
        }

        self.published.lock().push(PublishedMessage {
            routing_key: routing_key.to_string(),
            body: body.clone(),
        });
        self.push(routing_key, body, false)?;

        self.stats.total_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn consume(&self) -> MessagingResult<DeliveryStream> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(MessagingError::not_connected("consume"));
        }

        let state = (
            Arc::clone(&self.receiver),
            self.closed.subscribe(),
            Arc::clone(&self.stats),
        );
        let deliveries = stream::unfold(state, |(receiver, mut closed, stats)| async move {
            if *closed.borrow() {
                return None;
            }

            let message = {
                let mut receiver = receiver.lock().await;
                tokio::select! {
                    biased;
                    _ = closed.wait_for(|closed| *closed) => None,
                    message = receiver.recv() => message,
                }
            }?;

            stats.queued.fetch_sub(1, Ordering::Relaxed);
            stats.total_received.fetch_add(1, Ordering::Relaxed);
            let mut delivery = Delivery::new(
                message.body,
                DeliveryHandle::InMemory {
                    sequence: message.sequence,
                },
            );
            if message.redelivered {
                delivery = delivery.redelivered();
            }
            Some((Ok(delivery), (receiver, closed, stats)))
        });

        Ok(Box::pin(deliveries))
    }

    async fn ack(&self, handle: &DeliveryHandle) -> MessagingResult<()> {
        match handle {
            DeliveryHandle::InMemory { sequence } => {
                if self.unacked.remove(sequence).is_none() {
                    return Err(MessagingError::ack(
                        &self.queue_name,
                        format!("unknown or already acknowledged sequence {sequence}"),
                    ));
                }
                self.stats.total_acked.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            #[cfg(feature = "rabbitmq")]
            DeliveryHandle::RabbitMq { .. } => Err(MessagingError::ack(
                &self.queue_name,
                "RabbitMQ delivery handle passed to in-memory provider",
            )),
        }
    }

    async fn release(&self, handle: &DeliveryHandle) -> MessagingResult<()> {
        match handle {
            DeliveryHandle::InMemory { sequence } => {
                let Some((_, message)) = self.unacked.remove(sequence) else {
                    return Err(MessagingError::ack(
                        &self.queue_name,
                        format!("cannot release unknown sequence {sequence}"),
                    ));
                };
                self.push(&message.routing_key, message.body, true)?;
                self.stats.total_released.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            #[cfg(feature = "rabbitmq")]
            DeliveryHandle::RabbitMq { .. } => Err(MessagingError::ack(
                &self.queue_name,
                "RabbitMQ delivery handle passed to in-memory provider",
            )),
        }
    }

    fn queued_estimate(&self) -> u64 {
        self.stats.queued.load(Ordering::Relaxed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.closed.send_replace(true);
            debug!(queue = %self.queue_name, "In-memory queue closed");
        }
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}
