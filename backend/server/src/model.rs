//! # Boredom Record
//!
//! The single shared record every replica reads and writes.
//!
//! ## Fields
//! - level: 0 to 100, decays over time
//! - lastUpdateTime: epoch milliseconds of the last write, never moves backwards
//! - boredomSpikes: counts explicit sets only, decay and reset never bump it
//! - revision: drawn from a store-wide counter on every write and creation, orders states for
//!   the caches and never repeats across a recreated record
use serde::{Deserialize, Serialize};

pub const MIN_LEVEL: u8 = 0;
pub const MAX_LEVEL: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoredomState {
    pub level: u8,
    pub last_update_time: i64,
    pub boredom_spikes: u64,
    #[serde(default)]
    pub revision: u64,
}

impl BoredomState {
    /// First-boot record.
    pub fn initial(now_ms: i64) -> Self {
        Self {
            level: MIN_LEVEL,
            last_update_time: now_ms,
            boredom_spikes: 0,
            revision: 0,
        }
    }
}

/// Field-set patch plus increments, applied by the store as one atomic write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatePatch {
    pub level: Option<u8>,
    pub last_update_time: Option<i64>,
    pub boredom_spikes: Option<u64>,
    pub spikes_increment: u64,
    /// Skip the write entirely unless the stored revision still matches.
    pub expected_revision: Option<u64>,
}

impl StatePatch {
    pub fn set_level(level: u8, now_ms: i64) -> Self {
        Self {
            level: Some(level),
            last_update_time: Some(now_ms),
            spikes_increment: 1,
            ..Self::default()
        }
    }

    pub fn reset(now_ms: i64) -> Self {
        Self {
            level: Some(MIN_LEVEL),
            last_update_time: Some(now_ms),
            boredom_spikes: Some(0),
            ..Self::default()
        }
    }

    pub fn decay(level: u8, anchor_ms: i64, expected_revision: u64) -> Self {
        Self {
            level: Some(level),
            last_update_time: Some(anchor_ms),
            expected_revision: Some(expected_revision),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub state: BoredomState,
    /// False when a revision guard rejected the patch; `state` is then the current record.
    pub applied: bool,
}

/// Payload published on the change channel after every write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: String,
    #[serde(flatten)]
    pub state: BoredomState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_event_decodes_published_payload() {
        let payload = r#"{"id":"boredom:state","level":42,"lastUpdateTime":1700000000000,"boredomSpikes":7,"revision":12}"#;
        let event: ChangeEvent = serde_json::from_str(payload).unwrap();

        assert_eq!(event.id, "boredom:state");
        assert_eq!(
            event.state,
            BoredomState {
                level: 42,
                last_update_time: 1_700_000_000_000,
                boredom_spikes: 7,
                revision: 12,
            }
        );
    }

    #[test]
    fn set_patch_bumps_spikes_once() {
        let patch = StatePatch::set_level(30, 10);
        assert_eq!(patch.spikes_increment, 1);
        assert_eq!(patch.boredom_spikes, None);
        assert_eq!(patch.expected_revision, None);
    }

    #[test]
    fn reset_patch_zeroes_spikes_without_increment() {
        let patch = StatePatch::reset(10);
        assert_eq!(patch.level, Some(0));
        assert_eq!(patch.boredom_spikes, Some(0));
        assert_eq!(patch.spikes_increment, 0);
    }
}
