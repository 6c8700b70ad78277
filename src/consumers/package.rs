//! `package` -> `package.validated`

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{
    into_payload, payload_string, require_string_fields, Consumer, ConsumerError, Processor,
};
use crate::constants::{message_types, ResultStatus};
use crate::messaging::{Envelope, Payload, Publisher};

/// Accepts a problem package and reports `accepted` or `failed`
pub struct PackageConsumer {
    processor: Arc<dyn Processor>,
    publisher: Arc<dyn Publisher>,
}

impl PackageConsumer {
    pub fn new(processor: Arc<dyn Processor>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            processor,
            publisher,
        }
    }
}

#[async_trait]
impl Consumer for PackageConsumer {
    fn message_type(&self) -> &str {
        message_types::PACKAGE
    }

    fn result_type(&self) -> &str {
        message_types::PACKAGE_VALIDATED
    }

    fn check_payload(&self, payload: &Payload) -> Vec<String> {
        require_string_fields(payload, &["package_id"])
    }

    async fn execute(&self, envelope: &Envelope) -> Result<Payload, ConsumerError> {
        let package = self
            .processor
            .submit_problem_package(&envelope.payload)
            .await?;

        Ok(into_payload(json!({
            "status": ResultStatus::Accepted,
            "package_id": payload_string(&envelope.payload, "package_id"),
            "problem_id": package.problem_id,
            "problemDir": package.problem_dir,
        })))
    }

    fn failure_fields(&self, envelope: &Envelope) -> Payload {
        into_payload(json!({
            "package_id": payload_string(&envelope.payload, "package_id"),
        }))
    }

    fn publisher(&self) -> &Arc<dyn Publisher> {
        &self.publisher
    }
}
