#![allow(clippy::doc_markdown)] // Allow technical terms like RabbitMQ, AMQP in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Judge Queue
//!
//! Message-queue consumer layer of a distributed evaluation and build service.
//!
//! ## Overview
//!
//! Typed event envelopes arrive from a broker, are routed to the handler for
//! their type, and pass through a validate, process, publish, acknowledge
//! pipeline. Delivery is at-least-once with bounded retry and a prefetch limit
//! on concurrent handlers.
//!
//! ## Module Organization
//!
//! - [`messaging`] - envelopes, routing table, backends, queue transport
//! - [`consumers`] - consumer contract, default consumers, registry
//! - [`config`] - explicit configuration structs and the file/env loader
//! - [`logging`] - structured logging initialisation
//! - [`constants`] - message type names and defaults
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use judge_queue::config::JudgeQueueConfig;
//! use judge_queue::consumers::{ConsumerRegistry, Processor};
//! use judge_queue::logging::init_structured_logging;
//! use judge_queue::messaging::QueueTransport;
//!
//! # async fn example(processor: Arc<dyn Processor>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = JudgeQueueConfig::load(None)?;
//! init_structured_logging(&config.logging);
//!
//! let transport = QueueTransport::from_config(config.transport.clone())?;
//! let mut registry = ConsumerRegistry::new(processor, transport.clone(), config.service.clone());
//! registry.register_defaults()?;
//! registry.attach_to_queue(&transport)?;
//! transport.start().await?;
//!
//! // ... run until shutdown
//! transport.close().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod consumers;
pub mod logging;
pub mod messaging;

pub use config::{JudgeQueueConfig, ServiceInfo, TransportConfig};
pub use consumers::{Consumer, ConsumerRegistry, Processor};
pub use messaging::{
    DispatchContext, Envelope, MessagingError, MessagingResult, QueueTransport, RawEnvelope,
};
