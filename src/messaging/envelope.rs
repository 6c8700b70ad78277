//! # Envelope and Codec
//!
//! Canonical message unit carried on the queue, the loose wire shape it is
//! decoded from, and the codec that converts between bytes and envelopes.
//!
//! ## Wire format
//!
//! ```json
//! {"id": "...", "type": "build.request", "payload": {...},
//!  "created_at": "2024-01-01T00:00:00Z", "retries": 0, "max_retries": 3}
//! ```
//!
//! Producers may also send a flattened shape such as
//! `{"type": "package", "package_id": "p1"}`. When `payload` is absent, every
//! top-level key outside the reserved set is hoisted into a synthesized
//! payload, so consumers never branch on the wire shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::errors::{MessagingError, MessagingResult};
use crate::constants::{DEFAULT_MAX_RETRIES, RESERVED_ENVELOPE_KEYS};

/// Application-defined payload object
pub type Payload = Map<String, Value>;

/// Canonical envelope delivered to handlers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique per message, stable across retries
    pub id: String,
    /// Routing key / topic
    #[serde(rename = "type")]
    pub message_type: String,
    /// Type-specific payload
    pub payload: Payload,
    /// Set once at enqueue time
    pub created_at: DateTime<Utc>,
    /// Delivery attempts beyond the first
    pub retries: u32,
    /// Ceiling before the message is dropped
    pub max_retries: u32,
}

/// Outcome of recording a failed delivery against an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Republish the envelope; `attempt` is the new `retries` value
    Requeue { attempt: u32 },
    /// Retry budget exhausted; acknowledge and drop
    Drop { attempts: u32 },
}

impl Envelope {
    /// Record one failed delivery and decide whether the envelope goes back on the queue.
    ///
    /// `retries` grows by exactly one per call. Once it exceeds `max_retries`
    /// the decision is always `Drop`.
    pub fn record_failure(&mut self) -> RetryDecision {
        self.retries = self.retries.saturating_add(1);
        if self.retries <= self.max_retries {
            RetryDecision::Requeue {
                attempt: self.retries,
            }
        } else {
            RetryDecision::Drop {
                attempts: self.retries,
            }
        }
    }

    /// Whether the envelope must never be redelivered
    pub fn is_exhausted(&self) -> bool {
        self.retries > self.max_retries
    }

    /// Read a string payload field
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// Loose envelope shape as it appears on the wire or in an enqueue call.
///
/// Every field is optional; unknown top-level keys are kept in `extra` so
/// normalization can hoist them into the payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Argument of `QueueTransport::enqueue`: `{id?, type, payload?, retries?, max_retries?}`
pub type EnqueueRequest = RawEnvelope;

impl RawEnvelope {
    /// Start an enqueue request for a message type
    pub fn new(message_type: impl Into<String>) -> Self {
        Self {
            message_type: Some(message_type.into()),
            ..Default::default()
        }
    }

    /// Build from an arbitrary JSON value (nested or flattened shape)
    pub fn from_value(value: Value) -> MessagingResult<Self> {
        if !value.is_object() {
            return Err(MessagingError::decode(format!(
                "envelope must be a JSON object, got {}",
                json_kind(&value)
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Add a flattened top-level field (hoisted into the payload on normalize)
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

impl From<Envelope> for RawEnvelope {
    fn from(envelope: Envelope) -> Self {
        Self {
            id: Some(envelope.id),
            message_type: Some(envelope.message_type),
            payload: Some(Value::Object(envelope.payload)),
            created_at: Some(envelope.created_at),
            retries: Some(envelope.retries),
            max_retries: Some(envelope.max_retries),
            extra: Map::new(),
        }
    }
}

/// Serializes, deserializes and normalizes envelopes.
///
/// The same `encode` is used for the initial publish and for requeue on retry.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeCodec {
    default_max_retries: u32,
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl EnvelopeCodec {
    pub fn new(default_max_retries: u32) -> Self {
        Self {
            default_max_retries,
        }
    }

    /// Parse transport bytes.
    ///
    /// Any failure is a terminal `MessagingError::Decode`: the caller must
    /// acknowledge and discard the delivery.
    pub fn decode(&self, raw: &[u8]) -> MessagingResult<RawEnvelope> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| MessagingError::decode(format!("invalid JSON: {e}")))?;
        RawEnvelope::from_value(value)
            .map_err(|e| MessagingError::decode(format!("invalid envelope: {e}")))
    }

    /// Produce a canonical envelope.
    ///
    /// Hoists flattened fields into `payload` when `payload` is absent and
    /// assigns `id`, `created_at` and `max_retries` when missing. A missing
    /// `type` normalizes to an empty string, which no route resolves.
    pub fn normalize(&self, raw: RawEnvelope) -> MessagingResult<Envelope> {
        let RawEnvelope {
            id,
            message_type,
            payload,
            created_at,
            retries,
            max_retries,
            extra,
        } = raw;

        let payload = match payload {
            Some(Value::Object(map)) => map,
            Some(Value::Null) | None => hoist_payload(extra),
            Some(other) => {
                return Err(MessagingError::decode(format!(
                    "payload must be an object, got {}",
                    json_kind(&other)
                )))
            }
        };

        Ok(Envelope {
            id: id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            message_type: message_type.unwrap_or_default(),
            payload,
            created_at: created_at.unwrap_or_else(Utc::now),
            retries: retries.unwrap_or(0),
            max_retries: max_retries.unwrap_or(self.default_max_retries),
        })
    }

    /// Decode and normalize in one step
    pub fn decode_envelope(&self, raw: &[u8]) -> MessagingResult<Envelope> {
        self.normalize(self.decode(raw)?)
    }

    /// Canonical serialization
    pub fn encode(&self, envelope: &Envelope) -> MessagingResult<Vec<u8>> {
        serde_json::to_vec(envelope).map_err(|e| MessagingError::serialization(e.to_string()))
    }
}

fn hoist_payload(extra: Map<String, Value>) -> Payload {
    extra
        .into_iter()
        .filter(|(key, _)| !RESERVED_ENVELOPE_KEYS.contains(&key.as_str()))
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
