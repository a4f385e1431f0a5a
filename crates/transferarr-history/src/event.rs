//! Typed transfer-history events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use transferarr_core::InfoHash;

/// Reportable moments in a transfer's life.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransferEvent {
    /// A copy job started.
    TransferStarted {
        /// Torrent identity.
        hash: InfoHash,
        /// Display name.
        name: String,
        /// Source endpoint name.
        from: String,
        /// Target endpoint name.
        to: String,
        /// Total payload size in bytes.
        size_bytes: u64,
    },
    /// Bytes moved; throttled by the sink.
    TransferProgress {
        /// Torrent identity.
        hash: InfoHash,
        /// Bytes copied so far.
        bytes_done: u64,
        /// Total bytes to copy.
        bytes_total: u64,
        /// Transfer speed in bytes per second.
        speed_bps: u64,
    },
    /// The copy job finished and the torrent was re-added on the target.
    TransferCompleted {
        /// Torrent identity.
        hash: InfoHash,
    },
    /// The copy job failed for good.
    TransferFailed {
        /// Torrent identity.
        hash: InfoHash,
        /// Failure description.
        reason: String,
    },
}

impl TransferEvent {
    /// Machine-friendly discriminator.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TransferStarted { .. } => "transfer_started",
            Self::TransferProgress { .. } => "transfer_progress",
            Self::TransferCompleted { .. } => "transfer_completed",
            Self::TransferFailed { .. } => "transfer_failed",
        }
    }

    /// Torrent the event concerns.
    #[must_use]
    pub const fn hash(&self) -> &InfoHash {
        match self {
            Self::TransferStarted { hash, .. }
            | Self::TransferProgress { hash, .. }
            | Self::TransferCompleted { hash }
            | Self::TransferFailed { hash, .. } => hash,
        }
    }
}

/// Timestamped wrapper persisted for each event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// When the event was recorded.
    pub at: DateTime<Utc>,
    /// The event payload.
    #[serde(flatten)]
    pub event: TransferEvent,
}

impl EventEnvelope {
    /// Wrap an event stamped with the current time.
    #[must_use]
    pub fn now(event: TransferEvent) -> Self {
        Self {
            at: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> InfoHash {
        InfoHash::new("ab0123456789abcdef0123456789abcdef012345").expect("hash")
    }

    #[test]
    fn events_serialise_with_a_type_tag() {
        let envelope = EventEnvelope::now(TransferEvent::TransferCompleted { hash: hash() });
        let value = serde_json::to_value(&envelope).expect("encode");
        assert_eq!(value["type"], "transfer_completed");
        assert!(value["at"].is_string());

        let decoded: EventEnvelope = serde_json::from_value(value).expect("decode");
        assert_eq!(decoded.event.kind(), "transfer_completed");
    }

    #[test]
    fn every_event_exposes_its_hash() {
        let event = TransferEvent::TransferFailed {
            hash: hash(),
            reason: "copy failed".into(),
        };
        assert_eq!(event.hash(), &hash());
        assert_eq!(event.kind(), "transfer_failed");
    }
}
