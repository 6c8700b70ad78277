//! `build.request` -> `build.completed` / `build.failed`
//!
//! `target_stages` (optional, `["eval"]`, `["build"]` or both) limits which
//! stage images are reported; absent means every stage.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    into_payload, payload_string, require_string_fields, BuiltImages, Consumer, ConsumerError,
    Processor,
};
use crate::constants::{message_types, ResultStatus};
use crate::messaging::{Envelope, Payload, Publisher};

/// Image pipeline stage selectable through `target_stages`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStage {
    Eval,
    Build,
}

impl BuildStage {
    pub fn parse(stage: &str) -> Option<Self> {
        match stage {
            "eval" => Some(Self::Eval),
            "build" => Some(Self::Build),
            _ => None,
        }
    }
}

/// Parse `target_stages`. `Ok(None)` when absent.
fn target_stages(payload: &Payload) -> Result<Option<Vec<BuildStage>>, String> {
    let Some(value) = payload.get("target_stages") else {
        return Ok(None);
    };
    if value.is_null() {
        return Ok(None);
    }

    let Value::Array(items) = value else {
        return Err("target_stages must be an array".to_string());
    };

    items
        .iter()
        .map(|item| {
            item.as_str()
                .and_then(BuildStage::parse)
                .ok_or_else(|| format!("target_stages contains unknown stage {item}"))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// Drop stage images not listed in `stages`
pub fn filter_stages(mut images: BuiltImages, stages: &[BuildStage]) -> BuiltImages {
    for container in images.values_mut() {
        if !stages.contains(&BuildStage::Eval) {
            container.eval_stage = None;
        }
        if !stages.contains(&BuildStage::Build) {
            container.build_stage = None;
        }
    }
    images
}

pub struct BuildRequestConsumer {
    processor: Arc<dyn Processor>,
    publisher: Arc<dyn Publisher>,
}

impl BuildRequestConsumer {
    pub fn new(processor: Arc<dyn Processor>, publisher: Arc<dyn Publisher>) -> Self {
        Self {
            processor,
            publisher,
        }
    }
}

#[async_trait]
impl Consumer for BuildRequestConsumer {
    fn message_type(&self) -> &str {
        message_types::BUILD_REQUEST
    }

    fn result_type(&self) -> &str {
        message_types::BUILD_COMPLETED
    }

    fn failure_type(&self) -> &str {
        message_types::BUILD_FAILED
    }

    fn check_payload(&self, payload: &Payload) -> Vec<String> {
        let mut errors = require_string_fields(payload, &["problem_id"]);
        if let Err(e) = target_stages(payload) {
            errors.push(e);
        }
        errors
    }

    async fn execute(&self, envelope: &Envelope) -> Result<Payload, ConsumerError> {
        let problem_id = payload_string(&envelope.payload, "problem_id");
        let stages = target_stages(&envelope.payload)
            .map_err(|e| ConsumerError::validation(vec![e]))?;

        let images = self.processor.build_problem_images(&problem_id).await?;
        let images = match &stages {
            Some(stages) => filter_stages(images, stages),
            None => images,
        };

        Ok(into_payload(json!({
            "status": ResultStatus::Completed,
            "problem_id": problem_id,
            "images": images,
        })))
    }

    fn failure_fields(&self, envelope: &Envelope) -> Payload {
        into_payload(json!({
            "problem_id": payload_string(&envelope.payload, "problem_id"),
        }))
    }

    fn publisher(&self) -> &Arc<dyn Publisher> {
        &self.publisher
    }
}
