//! # Decay
//!
//! Boredom drops by one level per elapsed decay interval.
//!
//! - Elapsed time is measured from `lastUpdateTime`, negative elapsed (clock skew) counts as zero
//! - Whole intervals only, the remainder carries over through `anchor_ms`
//! - Decay is due whenever at least one interval passed, even at level 0, so the anchor keeps moving
use crate::model::BoredomState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decay {
    pub level: u8,
    pub units: u64,
    /// New `lastUpdateTime` if this decay gets persisted.
    pub anchor_ms: i64,
    pub elapsed_ms: i64,
}

impl Decay {
    pub fn is_due(&self) -> bool {
        self.units > 0
    }
}

pub fn compute_decay(state: &BoredomState, now_ms: i64, interval_ms: i64) -> Decay {
    let elapsed_ms = now_ms.saturating_sub(state.last_update_time).max(0);
    let interval_ms = interval_ms.max(1);
    let units = (elapsed_ms / interval_ms) as u64;

    let level = u64::from(state.level).saturating_sub(units) as u8;
    let anchor_ms = state
        .last_update_time
        .saturating_add((units as i64).saturating_mul(interval_ms));

    Decay {
        level,
        units,
        anchor_ms,
        elapsed_ms,
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const MINUTE: i64 = 60 * 1000;
    const HALF_HOUR: i64 = 30 * MINUTE;

    fn state(level: u8, last_update_time: i64) -> BoredomState {
        BoredomState {
            level,
            last_update_time,
            boredom_spikes: 3,
            revision: 1,
        }
    }

    #[test]
    fn three_units_after_ninety_five_minutes() {
        let t = 1_700_000_000_000;
        let decay = compute_decay(&state(50, t), t + 95 * MINUTE, HALF_HOUR);

        assert_eq!(decay.units, 3);
        assert_eq!(decay.level, 47);
        assert_eq!(decay.anchor_ms, t + 90 * MINUTE);
        assert!(decay.is_due());
    }

    #[test]
    fn not_due_within_first_interval() {
        let decay = compute_decay(&state(50, 0), HALF_HOUR - 1, HALF_HOUR);

        assert_eq!(decay.units, 0);
        assert_eq!(decay.level, 50);
        assert_eq!(decay.anchor_ms, 0);
        assert!(!decay.is_due());
    }

    #[test]
    fn clock_skew_is_a_no_op() {
        let decay = compute_decay(&state(20, 10_000), 0, HALF_HOUR);

        assert_eq!(decay.elapsed_ms, 0);
        assert_eq!(decay.level, 20);
        assert!(!decay.is_due());
    }

    #[test]
    fn due_at_floor_still_advances_anchor() {
        let decay = compute_decay(&state(0, 0), 2 * HALF_HOUR + 5, HALF_HOUR);

        assert_eq!(decay.level, 0);
        assert!(decay.is_due());
        assert_eq!(decay.anchor_ms, 2 * HALF_HOUR);
    }

    #[test]
    fn clamps_at_zero() {
        let decay = compute_decay(&state(2, 0), 10 * HALF_HOUR, HALF_HOUR);
        assert_eq!(decay.level, 0);
        assert_eq!(decay.units, 10);
    }

    proptest! {
        #[test]
        fn decay_never_increases_level(
            level in 0u8..=100,
            last in -1_000_000_000i64..1_000_000_000,
            now in -1_000_000_000i64..1_000_000_000,
            interval in 1i64..10_000_000,
        ) {
            let decay = compute_decay(&state(level, last), now, interval);
            prop_assert!(decay.level <= level);
            prop_assert!(decay.anchor_ms >= last);
            prop_assert!(decay.anchor_ms <= now.max(last));
        }
    }
}
