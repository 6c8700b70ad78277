//! # Consumers
//!
//! Each consumer handles one message type:
//!
//! 1. **validate**: shared envelope shape check, then the consumer's own
//!    required-field check
//! 2. **process**: domain work through the [`Processor`], then a result
//!    envelope carrying `correlationId` is published and the delivery acked
//! 3. on failure a companion event with `status: "failed"` and an `errors`
//!    array is published and the delivery nacked
//!
//! Invalid envelopes are nacked without touching the processor. Consumers
//! share no state; they communicate only through published envelopes.

pub mod build;
pub mod errors;
pub mod hooks;
pub mod package;
pub mod processor;
pub mod registry;
pub mod status;
pub mod submission;

pub use build::BuildRequestConsumer;
pub use errors::{ConsumerError, RegistryError};
pub use hooks::HookExecuteConsumer;
pub use package::PackageConsumer;
pub use processor::{
    BuiltImages, ContainerImages, HookOutcome, HookRequest, Processor, StageImage,
    SubmissionOutcome, SubmissionRequest, SubmittedPackage,
};
pub use registry::ConsumerRegistry;
pub use status::StatusConsumer;
pub use submission::SubmissionConsumer;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::constants::{ResultStatus, CORRELATION_ID_KEY};
use crate::messaging::{
    DispatchContext, EnqueueRequest, Envelope, MessagingError, MessagingResult, Payload, Publisher,
};

/// Outcome of `Consumer::validate`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Shape check shared by every consumer
pub fn validate_envelope_shape(envelope: &Envelope) -> Vec<String> {
    let mut errors = Vec::new();
    if envelope.message_type.trim().is_empty() {
        errors.push("type is required".to_string());
    }
    if envelope.id.is_empty() {
        errors.push("id is required".to_string());
    }
    errors
}

/// `"<field> is required"` for every listed field that is missing or not a non-empty string
pub fn require_string_fields(payload: &Payload, fields: &[&str]) -> Vec<String> {
    fields
        .iter()
        .filter(|field| {
            payload
                .get(**field)
                .and_then(Value::as_str)
                .map_or(true, |value| value.trim().is_empty())
        })
        .map(|field| format!("{field} is required"))
        .collect()
}

/// Read a string field that validation has already required
pub(crate) fn payload_string(payload: &Payload, field: &str) -> String {
    payload
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Convert a `json!` object literal into a payload
pub(crate) fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => {
            let mut payload = Payload::new();
            payload.insert("value".to_string(), other);
            payload
        }
    }
}

/// One message type's validate/process unit
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    /// Message type this consumer is bound to
    fn message_type(&self) -> &str;

    /// Companion type published on success
    fn result_type(&self) -> &str;

    /// Companion type published on failure
    fn failure_type(&self) -> &str {
        self.result_type()
    }

    /// Type-specific payload checks, run after the shared shape check
    fn check_payload(&self, payload: &Payload) -> Vec<String>;

    /// Domain work; returns the result payload without `correlationId`
    async fn execute(&self, envelope: &Envelope) -> Result<Payload, ConsumerError>;

    /// Request fields echoed into failure events
    fn failure_fields(&self, _envelope: &Envelope) -> Payload {
        Payload::new()
    }

    fn publisher(&self) -> &Arc<dyn Publisher>;

    fn validate(&self, envelope: &Envelope) -> ValidationResult {
        let mut errors = validate_envelope_shape(envelope);
        if errors.is_empty() {
            errors = self.check_payload(&envelope.payload);
        }
        ValidationResult::from_errors(errors)
    }

    /// Execute, publish the correlated result, and settle the delivery.
    ///
    /// Always settles `context`; failures become a published failure event
    /// followed by `nack`.
    async fn process(&self, envelope: &Envelope, context: &DispatchContext) -> MessagingResult<()> {
        let outcome = match self.execute(envelope).await {
            Ok(result) => self.publish_result(envelope, result).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(result_id) => {
                debug!(
                    envelope_id = %envelope.id,
                    result_id = %result_id,
                    result_type = self.result_type(),
                    "Published result"
                );
                context.ack().await;
            }
            Err(err) => {
                warn!(
                    envelope_id = %envelope.id,
                    message_type = %envelope.message_type,
                    error = %err,
                    "Consumer failed"
                );
                self.publish_failure(envelope, err.failure_messages()).await;
                context.nack(err.into()).await;
            }
        }
        Ok(())
    }

    /// Validate, then process; invalid envelopes are nacked unprocessed
    async fn consume(&self, envelope: Envelope, context: DispatchContext) -> MessagingResult<()> {
        let validation = self.validate(&envelope);
        if !validation.valid {
            warn!(
                envelope_id = %envelope.id,
                message_type = %envelope.message_type,
                errors = ?validation.errors,
                "Envelope failed validation"
            );
            context
                .nack(MessagingError::validation(validation.errors))
                .await;
            return Ok(());
        }

        self.process(&envelope, &context).await
    }

    async fn publish_result(
        &self,
        envelope: &Envelope,
        mut result: Payload,
    ) -> Result<String, ConsumerError> {
        result.insert(CORRELATION_ID_KEY.to_string(), json!(envelope.id));
        result
            .entry("status")
            .or_insert_with(|| json!(ResultStatus::Completed));

        let id = self
            .publisher()
            .publish(EnqueueRequest::new(self.result_type()).with_payload(Value::Object(result)))
            .await?;
        Ok(id)
    }

    /// Best effort: a failure to publish is logged, never raised
    async fn publish_failure(&self, envelope: &Envelope, errors: Vec<String>) {
        let mut payload = self.failure_fields(envelope);
        payload.insert(CORRELATION_ID_KEY.to_string(), json!(envelope.id));
        payload.insert("status".to_string(), json!(ResultStatus::Failed));
        payload.insert("errors".to_string(), json!(errors));

        if let Err(e) = self
            .publisher()
            .publish(EnqueueRequest::new(self.failure_type()).with_payload(Value::Object(payload)))
            .await
        {
            error!(
                envelope_id = %envelope.id,
                failure_type = self.failure_type(),
                error = %e,
                "Failed to publish failure event"
            );
        }
    }
}
