//! `hooks.execute` -> `hooks.result`

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    into_payload, payload_string, require_string_fields, Consumer, ConsumerError, HookRequest,
    Processor,
};
use crate::constants::{message_types, ResultStatus};
use crate::messaging::{Envelope, Payload, Publisher};

/// Runs a problem hook; a non-zero exit code is reported, not retried
pub struct HookExecuteConsumer {
    processor: Arc<dyn Processor>,
    publisher: Arc<dyn Publisher>,
}

impl HookExecuteConsumer {
    pub fn new(processor: Arc<dyn Processor>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            processor,
            publisher,
        }
    }
}

#[async_trait]
impl Consumer for HookExecuteConsumer {
    fn message_type(&self) -> &str {
        message_types::HOOKS_EXECUTE
    }

    fn result_type(&self) -> &str {
        message_types::HOOKS_RESULT
    }

    fn check_payload(&self, payload: &Payload) -> Vec<String> {
        let mut errors = require_string_fields(payload, &["problem_id", "hook"]);
        if payload.get("args").is_some_and(|args| !args.is_object()) {
            errors.push("args must be an object".to_string());
        }
        errors
    }

    async fn execute(&self, envelope: &Envelope) -> Result<Payload, ConsumerError> {
        let request = HookRequest {
            problem_id: payload_string(&envelope.payload, "problem_id"),
            hook: payload_string(&envelope.payload, "hook"),
            args: envelope
                .payload
                .get("args")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        };

        let outcome = self.processor.execute_hook(&request).await?;

        Ok(into_payload(json!({
            "status": ResultStatus::Completed,
            "problem_id": request.problem_id,
            "hook": request.hook,
            "exit_code": outcome.exit_code,
            "output": outcome.output,
        })))
    }

    fn failure_fields(&self, envelope: &Envelope) -> Payload {
        into_payload(json!({
            "problem_id": payload_string(&envelope.payload, "problem_id"),
            "hook": payload_string(&envelope.payload, "hook"),
        }))
    }

    fn publisher(&self) -> &Arc<dyn Publisher> {
        &self.publisher
    }
}
