//! # Change Feed
//!
//! Keeps a push-mode cache current from the store's change channel.
//!
//! - Subscribe, mark the cache live, apply matching events through [`StateCache::apply`]
//! - On stream error or end, mark the cache not live and resubscribe with doubling backoff
//! - Stops when the shutdown flag flips or its sender goes away
use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::{sync::watch, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    cache::StateCache, clock::Clock, error::StoreError, model::ChangeEvent, store::ChangeFeed,
};

const MAX_FEED_BACKOFF: Duration = Duration::from_secs(30);

/// Applies one change event if it belongs to `record_id`.
pub fn apply_change(cache: &StateCache, record_id: &str, event: ChangeEvent, now_ms: i64) -> bool {
    if event.id != record_id {
        debug!(id = %event.id, "Ignoring change for another record");
        return false;
    }

    cache.apply(event.state, now_ms)
}

pub async fn run_change_feed<F, C>(
    feed: F,
    cache: Arc<StateCache>,
    clock: C,
    record_id: String,
    retry: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    F: ChangeFeed,
    C: Clock,
{
    let mut backoff = retry;

    while !*shutdown.borrow() {
        match feed.subscribe().await {
            Ok(mut changes) => {
                cache.set_live(true);
                backoff = retry;
                info!("Change feed live");

                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            cache.set_live(false);
                            info!("Change feed stopped");
                            return;
                        }
                        next = changes.next() => match next {
                            Some(Ok(event)) => {
                                let level = event.state.level;
                                let revision = event.state.revision;

                                if apply_change(&cache, &record_id, event, clock.now_ms()) {
                                    debug!(level, revision, "Applied change event");
                                }
                            }
                            Some(Err(StoreError::Corrupt(reason))) => {
                                warn!(reason = %reason, "Skipping unreadable change event");
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "Change feed failed");
                                break;
                            }
                            None => {
                                warn!("Change feed closed");
                                break;
                            }
                        }
                    }
                }

                cache.set_live(false);
            }
            Err(e) => warn!(error = %e, "Change feed subscribe failed"),
        }

        debug!(backoff_ms = backoff.as_millis() as u64, "Resubscribing to change feed");

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(backoff) => {}
        }

        backoff = (backoff * 2).min(MAX_FEED_BACKOFF);
    }

    info!("Change feed stopped");
}
