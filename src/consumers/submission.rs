//! `submission` -> `submission.result`

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{
    into_payload, payload_string, require_string_fields, Consumer, ConsumerError, Processor,
    SubmissionRequest,
};
use crate::constants::{message_types, ResultStatus};
use crate::messaging::{Envelope, Payload, Publisher};

const REQUIRED_FIELDS: [&str; 4] = ["submission_id", "problem_id", "language", "source"];

pub struct SubmissionConsumer {
    processor: Arc<dyn Processor>,
    publisher: Arc<dyn Publisher>,
}

impl SubmissionConsumer {
    pub fn new(processor: Arc<dyn Processor>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            processor,
            publisher,
        }
    }
}

#[async_trait]
impl Consumer for SubmissionConsumer {
    fn message_type(&self) -> &str {
        message_types::SUBMISSION
    }

    fn result_type(&self) -> &str {
        message_types::SUBMISSION_RESULT
    }

    fn check_payload(&self, payload: &Payload) -> Vec<String> {
        require_string_fields(payload, &REQUIRED_FIELDS)
    }

    async fn execute(&self, envelope: &Envelope) -> Result<Payload, ConsumerError> {
        let payload = &envelope.payload;
        let request = SubmissionRequest {
            submission_id: payload_string(payload, "submission_id"),
            problem_id: payload_string(payload, "problem_id"),
            language: payload_string(payload, "language"),
            source: payload_string(payload, "source"),
        };

        let outcome = self.processor.evaluate_submission(&request).await?;

        Ok(into_payload(json!({
            "status": ResultStatus::Completed,
            "submission_id": request.submission_id,
            "problem_id": request.problem_id,
            "verdict": outcome.verdict,
            "score": outcome.score,
            "details": outcome.details,
        })))
    }

    fn failure_fields(&self, envelope: &Envelope) -> Payload {
        into_payload(json!({
            "submission_id": payload_string(&envelope.payload, "submission_id"),
        }))
    }

    fn publisher(&self) -> &Arc<dyn Publisher> {
        &self.publisher
    }
}
