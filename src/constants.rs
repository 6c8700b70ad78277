//! # System Constants
//!
//! Message type names, reserved envelope keys, and operational defaults
//! shared by the transport and the consumer layer.

use serde::{Deserialize, Serialize};

/// Standard message types produced and consumed by the default consumer set
pub mod message_types {
    pub const SUBMISSION: &str = "submission";
    pub const SUBMISSION_RESULT: &str = "submission.result";

    pub const PACKAGE: &str = "package";
    pub const PACKAGE_VALIDATED: &str = "package.validated";

    pub const BUILD_REQUEST: &str = "build.request";
    pub const BUILD_COMPLETED: &str = "build.completed";
    pub const BUILD_FAILED: &str = "build.failed";

    pub const HOOKS_EXECUTE: &str = "hooks.execute";
    pub const HOOKS_RESULT: &str = "hooks.result";

    pub const STATUS: &str = "status";
    pub const JUDGE_STATUS: &str = "judge.status";
}

/// Top-level envelope keys that are never hoisted into a synthesized payload
pub const RESERVED_ENVELOPE_KEYS: [&str; 5] =
    ["id", "type", "created_at", "retries", "max_retries"];

/// Payload key linking a result envelope to the request that produced it
pub const CORRELATION_ID_KEY: &str = "correlationId";

/// Retry ceiling applied when an envelope does not carry one
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Separator character that turns a route pattern into a prefix match
pub const ROUTE_SEPARATOR: char = '.';

/// Wildcard character that turns a route pattern into a glob match
pub const ROUTE_WILDCARD: char = '*';

/// Binding key that forwards every routing key on a topic exchange
pub const CATCH_ALL_BINDING: &str = "#";

/// Estimated memory held by one in-flight handler (one container build)
pub const DEFAULT_PER_TASK_MEMORY_MB: u64 = 1024;

/// Status values carried in result payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Accepted,
    Completed,
    Failed,
    Online,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Online => "online",
        }
    }
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
