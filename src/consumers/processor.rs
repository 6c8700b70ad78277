//! # Processor Collaborator
//!
//! The domain side of the consumers: building container images, validating
//! problem packages, running hooks and evaluating submissions. The queue
//! layer only orchestrates calls to it; implementations live elsewhere.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::messaging::Payload;

/// Result of accepting a problem package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedPackage {
    pub problem_id: String,
    #[serde(rename = "problemDir")]
    pub problem_dir: PathBuf,
}

/// Image built for one pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageImage {
    pub tag: String,
}

/// Images built for one container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerImages {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_stage: Option<StageImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_stage: Option<StageImage>,
}

/// Container id -> images
pub type BuiltImages = BTreeMap<String, ContainerImages>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub submission_id: String,
    pub problem_id: String,
    pub language: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub verdict: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default)]
    pub details: Payload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookRequest {
    pub problem_id: String,
    pub hook: String,
    #[serde(default)]
    pub args: Payload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookOutcome {
    pub exit_code: i32,
    #[serde(default)]
    pub output: String,
}

/// Domain logic invoked by the default consumers
///
/// Every failure is returned as an ordinary error; consumers turn it into a
/// failure event and a `nack`.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Fetch and unpack a problem package described by `data`
    async fn submit_problem_package(&self, data: &Payload) -> anyhow::Result<SubmittedPackage>;

    /// Build the eval/build images of every container of a problem
    async fn build_problem_images(&self, problem_id: &str) -> anyhow::Result<BuiltImages>;

    async fn evaluate_submission(
        &self,
        submission: &SubmissionRequest,
    ) -> anyhow::Result<SubmissionOutcome>;

    async fn execute_hook(&self, request: &HookRequest) -> anyhow::Result<HookOutcome>;
}
