//! `status` -> `judge.status`
//!
//! Reports service identity and free capacity taken from the transport's stats.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use super::{into_payload, Consumer, ConsumerError};
use crate::config::ServiceInfo;
use crate::constants::{message_types, ResultStatus};
use crate::messaging::{Envelope, Payload, Publisher, QueueTransport};

pub struct StatusConsumer {
    transport: QueueTransport,
    publisher: Arc<dyn Publisher>,
    service: ServiceInfo,
}

impl StatusConsumer {
    pub fn new(
        transport: QueueTransport,
        publisher: Arc<dyn Publisher>,
        service: ServiceInfo,
    ) -> Self {
        Self {
            transport,
            publisher,
            service,
        }
    }

    /// `{service, status, workers_free, version, features, timestamp}`
    pub fn status_report(&self) -> Payload {
        let stats = self.transport.stats();
        into_payload(json!({
            "service": self.service.service,
            "status": ResultStatus::Online,
            "workers_free": stats.workers_free(),
            "version": self.service.version,
            "features": self.service.features,
            "timestamp": Utc::now(),
        }))
    }
}

#[async_trait]
impl Consumer for StatusConsumer {
    fn message_type(&self) -> &str {
        message_types::STATUS
    }

    fn result_type(&self) -> &str {
        message_types::JUDGE_STATUS
    }

    fn check_payload(&self, _payload: &Payload) -> Vec<String> {
        Vec::new()
    }

    async fn execute(&self, _envelope: &Envelope) -> Result<Payload, ConsumerError> {
        Ok(self.status_report())
    }

    fn publisher(&self) -> &Arc<dyn Publisher> {
        &self.publisher
    }
}
