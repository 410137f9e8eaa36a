#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use boredom_server::{clock::ManualClock, config::Config, state::State, store::MemoryStore};

pub const RECORD_KEY: &str = "boredom:state";
pub const MINUTE: i64 = 60 * 1000;
pub const T0: i64 = 1_700_000_000_000;

pub fn config(cache_mode: &str) -> Config {
    let cache_mode = cache_mode.to_string();

    Config::from_lookup(move |key| match key {
        "ADMIN_USERNAME" => Some("admin".to_string()),
        "ADMIN_PASSWORD" => Some("hunter2".to_string()),
        "STORE_BACKEND" => Some("memory".to_string()),
        "CACHE_MODE" => Some(cache_mode.clone()),
        "ALONE_EPOCH_MS" => Some((T0 - 3_600_000).to_string()),
        _ => None,
    })
    .expect("test config")
}

pub fn replica(
    cache_mode: &str,
    store: &MemoryStore,
    clock: &ManualClock,
) -> Arc<State<MemoryStore, ManualClock>> {
    State::new(config(cache_mode), store.clone(), clock.clone())
}

pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    panic!("condition not reached in time");
}
