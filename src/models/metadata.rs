//! Per-object metadata record and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Storage status of an object.
///
/// Transitions only ever move forward: `New` → `InProgress` → `Complete`.
/// `Complete` is terminal; re-ingesting an identifier requires an explicit
/// delete first.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStatus {
    /// No shard has been persisted yet.
    New,
    /// At least one shard write has been issued; the object is not usable.
    InProgress,
    /// All shards and the final size are durably recorded.
    Complete,
}

impl ObjectStatus {
    /// Encoding used by the backend (0=new, 1=in_progress, 2=complete).
    pub fn as_byte(self) -> u8 {
        match self {
            ObjectStatus::New => 0,
            ObjectStatus::InProgress => 1,
            ObjectStatus::Complete => 2,
        }
    }

    /// Decode the backend status byte. Unknown values are rejected rather
    /// than mapped to a default.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ObjectStatus::New),
            1 => Some(ObjectStatus::InProgress),
            2 => Some(ObjectStatus::Complete),
            _ => None,
        }
    }
}

/// The per-identifier record tracking what is stored for an object.
///
/// This record is the single source of truth for "how many shards exist and
/// is the object usable". `shard_count` counts contiguously persisted shards
/// (shard indices are 1-based); a physically present shard with an index
/// beyond `shard_count` is a write-in-progress artifact and must be treated
/// as not yet visible. `size_bytes` is only meaningful once `status` is
/// `Complete`.
///
/// Transition methods consume `self` and return a new snapshot, so a saved
/// metadata value is never mutated in place by another thread.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Content-derived identifier, the backend row key.
    pub identifier: String,

    /// Human-readable description, usually the original file name.
    pub description: String,

    /// Cumulative byte count written so far; final size once complete.
    pub size_bytes: u64,

    /// Number of contiguously persisted shards.
    pub shard_count: u32,

    /// Position in the NEW → IN_PROGRESS → COMPLETE state machine.
    pub status: ObjectStatus,

    /// When this record was first created.
    pub created_at: DateTime<Utc>,
}

impl ObjectMetadata {
    /// A fresh record for an identifier with no existing data.
    pub fn fresh(identifier: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            description: description.into(),
            size_bytes: 0,
            shard_count: 0,
            status: ObjectStatus::New,
            created_at: Utc::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == ObjectStatus::Complete
    }

    /// NEW → IN_PROGRESS, taken before the first shard write is dispatched.
    pub fn begin_write(self) -> Self {
        Self {
            status: ObjectStatus::InProgress,
            ..self
        }
    }

    /// Account for one durably written shard of `shard_len` bytes.
    pub fn record_shard(self, shard_len: usize) -> Self {
        Self {
            size_bytes: self.size_bytes + shard_len as u64,
            shard_count: self.shard_count + 1,
            ..self
        }
    }

    /// IN_PROGRESS → COMPLETE with the final byte count fixed.
    pub fn complete(self, size_bytes: u64) -> Self {
        Self {
            size_bytes,
            status: ObjectStatus::Complete,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_byte_round_trip() {
        for status in [
            ObjectStatus::New,
            ObjectStatus::InProgress,
            ObjectStatus::Complete,
        ] {
            assert_eq!(ObjectStatus::from_byte(status.as_byte()), Some(status));
        }
        assert_eq!(ObjectStatus::from_byte(3), None);
        assert_eq!(ObjectStatus::from_byte(255), None);
    }

    #[test]
    fn fresh_record_is_zeroed_and_new() {
        let meta = ObjectMetadata::fresh("abc123", "report.pdf");
        assert_eq!(meta.size_bytes, 0);
        assert_eq!(meta.shard_count, 0);
        assert_eq!(meta.status, ObjectStatus::New);
        assert!(!meta.is_complete());
    }

    #[test]
    fn transitions_accumulate_and_finalize() {
        let meta = ObjectMetadata::fresh("abc123", "report.pdf").begin_write();
        assert_eq!(meta.status, ObjectStatus::InProgress);

        let meta = meta.record_shard(1024).record_shard(512);
        assert_eq!(meta.shard_count, 2);
        assert_eq!(meta.size_bytes, 1536);

        let meta = meta.complete(1536);
        assert!(meta.is_complete());
        assert_eq!(meta.size_bytes, 1536);
        assert_eq!(meta.shard_count, 2);
    }
}
