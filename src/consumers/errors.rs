//! Consumer and registry error types

use thiserror::Error;

use crate::messaging::MessagingError;

/// Failure of one consumer invocation
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Validation failed: {}", errors.join(", "))]
    Validation { errors: Vec<String> },

    /// The injected processor failed
    #[error("{0:#}")]
    Processor(#[from] anyhow::Error),

    #[error("Failed to publish result: {0}")]
    Publish(#[from] MessagingError),
}

impl ConsumerError {
    pub fn validation(errors: Vec<String>) -> Self {
        Self::Validation { errors }
    }

    /// Messages carried in the `errors` array of a failure event
    pub fn failure_messages(&self) -> Vec<String> {
        match self {
            Self::Validation { errors } if !errors.is_empty() => errors.clone(),
            other => vec![other.to_string()],
        }
    }
}

impl From<ConsumerError> for MessagingError {
    fn from(err: ConsumerError) -> Self {
        match err {
            ConsumerError::Validation { errors } => MessagingError::validation(errors),
            ConsumerError::Processor(e) => MessagingError::processing(format!("{e:#}")),
            ConsumerError::Publish(e) => e,
        }
    }
}

/// Consumer registry errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Consumer message type cannot be empty")]
    EmptyMessageType,

    #[error("A consumer is already registered for message type '{message_type}'")]
    DuplicateConsumer { message_type: String },

    #[error("Failed to attach consumers to the transport: {0}")]
    Attach(#[from] MessagingError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_failure_messages() {
        let err = ConsumerError::validation(vec!["problem_id is required".to_string()]);
        assert_eq!(err.failure_messages(), vec!["problem_id is required"]);

        let err = ConsumerError::from(anyhow!("docker build failed").context("building images"));
        assert_eq!(
            err.failure_messages(),
            vec!["building images: docker build failed"]
        );
    }

    #[test]
    fn test_conversion_into_messaging_error() {
        let err: MessagingError = ConsumerError::validation(vec!["x is required".into()]).into();
        assert!(matches!(err, MessagingError::Validation { .. }));

        let err: MessagingError = ConsumerError::from(anyhow!("boom")).into();
        assert!(matches!(err, MessagingError::Processing { ref message } if message == "boom"));
    }
}
