//! # Consumer Registry
//!
//! Builds the consumer set, indexes it by message type and routes each type
//! to its consumer on a [`QueueTransport`].
//!
//! ## Duplicate policy
//!
//! Registering a second consumer for a message type is rejected with
//! [`RegistryError::DuplicateConsumer`]; nothing is silently overwritten.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use judge_queue::config::{ServiceInfo, TransportConfig};
//! use judge_queue::consumers::{ConsumerRegistry, Processor};
//! use judge_queue::messaging::QueueTransport;
//!
//! # async fn example(processor: Arc<dyn Processor>) -> Result<(), Box<dyn std::error::Error>> {
//! let transport = QueueTransport::from_config(TransportConfig::default())?;
//! let mut registry = ConsumerRegistry::new(processor, transport.clone(), ServiceInfo::default());
//! registry.register_defaults()?;
//! registry.attach_to_queue(&transport)?;
//! transport.start().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use super::{
    BuildRequestConsumer, Consumer, HookExecuteConsumer, PackageConsumer, Processor,
    RegistryError, StatusConsumer, SubmissionConsumer,
};
use crate::config::ServiceInfo;
use crate::messaging::{handler_fn, Publisher, QueueTransport, RoutePattern};

pub struct ConsumerRegistry {
    consumers: HashMap<String, Arc<dyn Consumer>>,
    /// Message types in registration order
    order: Vec<String>,
    processor: Arc<dyn Processor>,
    publisher: Arc<dyn Publisher>,
    transport: QueueTransport,
    service: ServiceInfo,
}

impl ConsumerRegistry {
    /// Registry whose consumers publish results through `transport`
    pub fn new(
        processor: Arc<dyn Processor>,
        transport: QueueTransport,
        service: ServiceInfo,
    ) -> Self {
        let publisher: Arc<dyn Publisher> = Arc::new(transport.clone());
        Self::with_publisher(processor, publisher, transport, service)
    }

    /// Registry with a publisher other than the transport
    pub fn with_publisher(
        processor: Arc<dyn Processor>,
        publisher: Arc<dyn Publisher>,
        transport: QueueTransport,
        service: ServiceInfo,
    ) -> Self {
        Self {
            consumers: HashMap::new(),
            order: Vec::new(),
            processor,
            publisher,
            transport,
            service,
        }
    }

    /// Index a consumer under its declared message type
    pub fn register(&mut self, consumer: Arc<dyn Consumer>) -> Result<(), RegistryError> {
        let message_type = consumer.message_type().to_string();
        if message_type.trim().is_empty() {
            return Err(RegistryError::EmptyMessageType);
        }
        if self.consumers.contains_key(&message_type) {
            return Err(RegistryError::DuplicateConsumer { message_type });
        }

        self.order.push(message_type.clone());
        self.consumers.insert(message_type, consumer);
        Ok(())
    }

    /// Register submission, package, build-request, hook-execute and status consumers
    pub fn register_defaults(&mut self) -> Result<(), RegistryError> {
        let defaults: Vec<Arc<dyn Consumer>> = vec![
            Arc::new(SubmissionConsumer::new(
                Arc::clone(&self.processor),
                Arc::clone(&self.publisher),
            )),
            Arc::new(PackageConsumer::new(
                Arc::clone(&self.processor),
                Arc::clone(&self.publisher),
            )),
            Arc::new(BuildRequestConsumer::new(
                Arc::clone(&self.processor),
                Arc::clone(&self.publisher),
            )),
            Arc::new(HookExecuteConsumer::new(
                Arc::clone(&self.processor),
                Arc::clone(&self.publisher),
            )),
            Arc::new(StatusConsumer::new(
                self.transport.clone(),
                Arc::clone(&self.publisher),
                self.service.clone(),
            )),
        ];

        for consumer in defaults {
            self.register(consumer)?;
        }
        Ok(())
    }

    /// Route every registered message type to its consumer, as exact matches
    pub fn attach_to_queue(&self, transport: &QueueTransport) -> Result<(), RegistryError> {
        for message_type in &self.order {
            let Some(consumer) = self.consumers.get(message_type) else {
                continue;
            };
            let consumer = Arc::clone(consumer);
            transport.register_route(
                RoutePattern::Exact(message_type.clone()),
                handler_fn(move |envelope, context| {
                    let consumer = Arc::clone(&consumer);
                    async move { consumer.consume(envelope, context).await }
                }),
            )?;
        }

        info!(consumers = ?self.order, "Attached consumers to queue transport");
        Ok(())
    }

    pub fn get(&self, message_type: &str) -> Option<Arc<dyn Consumer>> {
        self.consumers.get(message_type).cloned()
    }

    /// All consumers in registration order
    pub fn get_all(&self) -> Vec<Arc<dyn Consumer>> {
        self.order
            .iter()
            .filter_map(|message_type| self.consumers.get(message_type).cloned())
            .collect()
    }

    pub fn message_types(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl fmt::Debug for ConsumerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerRegistry")
            .field("message_types", &self.order)
            .field("service", &self.service.service)
            .finish_non_exhaustive()
    }
}
