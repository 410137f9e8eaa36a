//! Invariants that must hold for any sequence of operations.

mod common;

use boredom_server::{clock::ManualClock, store::MemoryStore};
use proptest::prelude::*;
use tokio::runtime::{Builder, Runtime};

use common::{MINUTE, RECORD_KEY, T0, replica};

#[derive(Debug, Clone)]
enum Op {
    Set(u8),
    Read(i64),
    Reset,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..=100).prop_map(Op::Set),
        (0i64..(3 * 60 * MINUTE)).prop_map(Op::Read),
        Just(Op::Reset),
    ]
}

fn runtime() -> Runtime {
    Builder::new_current_thread().enable_all().build().unwrap()
}

proptest! {
    #[test]
    fn set_then_read_returns_same_level(level in 0u8..=100) {
        runtime().block_on(async {
            let store = MemoryStore::new(RECORD_KEY);
            let clock = ManualClock::new(T0);
            let state = replica("ttl", &store, &clock);

            let set = state.service.set_level(f64::from(level)).await.unwrap();
            let report = state.service.get_current_level().await.unwrap();

            prop_assert_eq!(set, level);
            prop_assert_eq!(report.level, level);
            Ok(())
        })?;
    }

    #[test]
    fn spikes_count_sets_and_reset_clears(ops in prop::collection::vec(op(), 1..40)) {
        runtime().block_on(async {
            let store = MemoryStore::new(RECORD_KEY);
            let clock = ManualClock::new(T0);
            let state = replica("ttl", &store, &clock);
            let mut expected_spikes = 0u64;
            let mut last_level = None;

            for op in ops {
                match op {
                    Op::Set(level) => {
                        state.service.set_level(f64::from(level)).await.unwrap();
                        expected_spikes += 1;
                    }
                    Op::Read(advance) => {
                        clock.advance(advance);
                        let report = state.service.get_current_level().await.unwrap();
                        prop_assert!(report.level <= 100);
                        prop_assert_eq!(report.boredom_spikes, expected_spikes);
                        if let Some(previous) = last_level {
                            prop_assert!(report.level <= previous);
                        }
                        last_level = Some(report.level);
                        continue;
                    }
                    Op::Reset => {
                        prop_assert_eq!(state.service.reset().await.unwrap(), 0);
                        expected_spikes = 0;
                    }
                }
                last_level = None;
            }

            let stored = store.snapshot().unwrap();
            prop_assert_eq!(stored.boredom_spikes, expected_spikes);

            state.service.reset().await.unwrap();
            let stored = store.snapshot().unwrap();
            prop_assert_eq!(stored.level, 0);
            prop_assert_eq!(stored.boredom_spikes, 0);
            Ok(())
        })?;
    }
}
