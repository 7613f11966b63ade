//! Event envelope entity (§3), the unit exchanged between event sources
//! and C7 (Event & Schedule Engine).

use crate::ids::EventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `(id UUID, type, source, occurredAt, payload, correlationId?, ttlMs?,
/// metadata)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
    pub correlation_id: Option<String>,
    pub ttl_ms: Option<u64>,
    #[serde(default)]
    pub metadata: Value,
}

/// A partially-filled envelope as received at the ingest boundary, before
/// normalization fills in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEventEnvelope {
    pub id: Option<EventId>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: Value,
    pub correlation_id: Option<String>,
    pub ttl_ms: Option<u64>,
    #[serde(default)]
    pub metadata: Value,
}

impl EventEnvelope {
    /// Normalize a raw inbound envelope: missing `id` -> generate UUID;
    /// missing `occurredAt` -> now.
    pub fn normalize(raw: RawEventEnvelope, now: DateTime<Utc>) -> Self {
        Self {
            id: raw.id.unwrap_or_default(),
            event_type: raw.event_type,
            source: raw.source,
            occurred_at: raw.occurred_at.unwrap_or(now),
            payload: raw.payload,
            correlation_id: raw.correlation_id,
            ttl_ms: raw.ttl_ms,
            metadata: raw.metadata,
        }
    }

    /// Whether the envelope is still inside its TTL acceptance window at
    /// `now`. Envelopes without a TTL never expire.
    pub fn is_within_ttl(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_ms {
            None => true,
            Some(ttl_ms) => {
                let age = (now - self.occurred_at).num_milliseconds();
                age >= 0 && (age as u64) <= ttl_ms
            }
        }
    }

    /// The JSON view used by predicate evaluation and template rendering:
    /// `{id, type, source, occurredAt, payload, correlationId, metadata}`.
    pub fn as_json(&self) -> Value {
        serde_json::json!({
            "id": self.id.0,
            "type": self.event_type,
            "source": self.source,
            "occurredAt": self.occurred_at,
            "payload": self.payload,
            "correlationId": self.correlation_id,
            "metadata": self.metadata,
        })
    }
}
