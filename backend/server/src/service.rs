//! # Boredom Service
//!
//! The only way handlers touch the record.
//!
//! ## Reads
//! - Cache first, store on miss, default record created if the store has none
//! - Recreating the record clears the cache first, nothing cached describes the new one
//! - A store read is only cached if the cache generation hasn't moved while it was in flight
//! - Decay is computed against whatever was read and returned, persisting is opportunistic
//! - Decay is persisted only when due and at least `decay_persist_min_ms` passed since the last
//!   write, as a revision-guarded update so a stale read never overwrites a newer set or reset
//!
//! ## Writes
//! - One atomic store update each, the result is written through to the cache
//! - Any failed write invalidates the cache, the outcome is unknown until the store is read again
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    cache::StateCache,
    clock::Clock,
    decay::{Decay, compute_decay},
    error::{AppError, StoreError},
    model::{BoredomState, StatePatch, UpdateOutcome},
    store::StateStore,
    utils::{seconds_since, validate_level},
};

#[derive(Debug, Clone, Copy)]
pub struct ServiceSettings {
    pub decay_interval_ms: i64,
    pub decay_persist_min_ms: i64,
    pub alone_epoch_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelReport {
    pub level: u8,
    pub last_update_time: i64,
    pub boredom_spikes: u64,
    pub time_alone: i64,
    pub server_time: i64,
}

pub struct BoredomService<S, C> {
    store: S,
    cache: Arc<StateCache>,
    clock: C,
    settings: ServiceSettings,
}

impl<S, C> BoredomService<S, C>
where
    S: StateStore,
    C: Clock,
{
    pub fn new(store: S, cache: Arc<StateCache>, clock: C, settings: ServiceSettings) -> Self {
        Self {
            store,
            cache,
            clock,
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<StateCache> {
        &self.cache
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates the default record on first boot. Concurrent boots race harmlessly.
    pub async fn ensure_record(&self) -> Result<BoredomState, StoreError> {
        let now = self.clock.now_ms();

        if self.store.create(BoredomState::initial(now)).await? {
            info!("Created default boredom record");
        }

        let generation = self.cache.generation();
        let state = self.store.load().await?;
        self.cache.fill(state, now, generation);

        Ok(state)
    }

    pub async fn get_current_level(&self) -> Result<LevelReport, AppError> {
        let now = self.clock.now_ms();
        let read = self.read_state(now).await?;
        let decay = compute_decay(&read, now, self.settings.decay_interval_ms);

        let state = if decay.is_due() && decay.elapsed_ms >= self.settings.decay_persist_min_ms {
            self.persist_decay(&read, &decay, now).await
        } else {
            read
        };

        let decay = compute_decay(&state, now, self.settings.decay_interval_ms);

        Ok(LevelReport {
            level: decay.level,
            last_update_time: state.last_update_time,
            boredom_spikes: state.boredom_spikes,
            time_alone: seconds_since(self.settings.alone_epoch_ms, now),
            server_time: now,
        })
    }

    pub async fn set_level(&self, requested: f64) -> Result<u8, AppError> {
        let level = validate_level(requested)?;
        let now = self.clock.now_ms();

        let outcome = self.write(StatePatch::set_level(level, now), now).await?;
        info!(
            level = outcome.state.level,
            spikes = outcome.state.boredom_spikes,
            "Boredom level set"
        );

        Ok(outcome.state.level)
    }

    pub async fn reset(&self) -> Result<u8, AppError> {
        let now = self.clock.now_ms();

        let outcome = self.write(StatePatch::reset(now), now).await?;
        info!("Boredom level reset");

        Ok(outcome.state.level)
    }

    async fn read_state(&self, now: i64) -> Result<BoredomState, StoreError> {
        if let Some(state) = self.cache.get(now) {
            return Ok(state);
        }

        let mut generation = self.cache.generation();
        let state = match self.store.load().await {
            Ok(state) => state,
            Err(StoreError::NotFound) => {
                warn!("Boredom record missing, creating default");
                self.recreate(now).await?;
                generation = self.cache.generation();
                self.store.load().await?
            }
            Err(e) => return Err(e),
        };

        self.cache.fill(state, now, generation);
        Ok(state)
    }

    /// Whatever is cached describes a record that no longer exists.
    async fn recreate(&self, now: i64) -> Result<(), StoreError> {
        self.cache.clear();
        self.store.create(BoredomState::initial(now)).await?;
        Ok(())
    }

    /// Returns the state to report from: the persisted one, the newer one that beat us, or the
    /// original read if the write failed.
    async fn persist_decay(&self, read: &BoredomState, decay: &Decay, now: i64) -> BoredomState {
        let patch = StatePatch::decay(decay.level, decay.anchor_ms, read.revision);

        match self.write(patch, now).await {
            Ok(UpdateOutcome {
                state,
                applied: true,
            }) => {
                debug!(
                    from = read.level,
                    to = state.level,
                    units = decay.units,
                    "Persisted decay"
                );
                state
            }
            Ok(UpdateOutcome {
                state,
                applied: false,
            }) => {
                debug!(revision = state.revision, "Decay superseded by newer write");
                state
            }
            Err(e) => {
                warn!(error = %e, "Failed to persist decay");
                *read
            }
        }
    }

    async fn write(&self, patch: StatePatch, now: i64) -> Result<UpdateOutcome, StoreError> {
        let result = match self.store.atomic_update(patch.clone()).await {
            Err(StoreError::NotFound) => {
                warn!("Boredom record missing on write, creating default");
                match self.recreate(now).await {
                    Ok(()) => self.store.atomic_update(patch).await,
                    Err(e) => Err(e),
                }
            }
            other => other,
        };

        match result {
            Ok(outcome) => {
                self.cache.apply(outcome.state, now);
                Ok(outcome)
            }
            Err(e) => {
                warn!(error = %e, "Store write failed, invalidating cache");
                self.cache.invalidate();
                Err(e)
            }
        }
    }
}
