//! # Cache
//!
//! Per-replica shadow copy of the boredom record. Never authoritative, the store always wins.
//!
//! ## Modes
//!
//! - TTL: an entry is served until `now + ttl`, then reads go back to the store. Invalidating
//!   moves the expiry into the past.
//! - Push: entries never expire but are only served while the change feed is live. Losing or
//!   regaining the feed drops the entry so the next read consults the store.
//!
//! Write results and feed events go through [`StateCache::apply`], which keeps the highest
//! revision seen. Applying the same state twice is a no-op.
//!
//! Store reads go through [`StateCache::fill`] instead. A read replaces any entry that is no
//! longer being served, whatever its revision, so a record recreated under a lower revision
//! can't be shadowed by a dead one. Reads are tagged with the cache generation taken before the
//! load; `invalidate`, `clear` and feed transitions bump it, and a fill from an older generation
//! is dropped.
use std::{
    str::FromStr,
    sync::{
        PoisonError, RwLock,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use tracing::debug;

use crate::model::BoredomState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Ttl,
    Push,
}

impl FromStr for CacheMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ttl" => Ok(CacheMode::Ttl),
            "push" => Ok(CacheMode::Push),
            other => Err(format!("unknown cache mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    state: BoredomState,
    expires_at_ms: i64,
}

pub struct StateCache {
    mode: CacheMode,
    ttl_ms: i64,
    entry: RwLock<Option<CacheEntry>>,
    live: AtomicBool,
    generation: AtomicU64,
}

impl StateCache {
    pub fn new(mode: CacheMode, ttl_ms: i64) -> Self {
        Self {
            mode,
            ttl_ms,
            entry: RwLock::new(None),
            live: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn get(&self, now_ms: i64) -> Option<BoredomState> {
        if self.mode == CacheMode::Push && !self.is_live() {
            return None;
        }

        let entry = *self.entry.read().unwrap_or_else(PoisonError::into_inner);

        entry
            .filter(|entry| now_ms < entry.expires_at_ms)
            .map(|entry| entry.state)
    }

    /// Stores `state` unless a newer revision is already cached. Returns whether it was taken.
    pub fn apply(&self, state: BoredomState, now_ms: i64) -> bool {
        let mut entry = self.entry.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(current) = entry.as_ref()
            && current.state.revision > state.revision
        {
            debug!(
                cached = current.state.revision,
                incoming = state.revision,
                "Ignoring stale state"
            );
            return false;
        }

        *entry = Some(self.entry_for(state, now_ms));

        true
    }

    /// Stores a state read from the store at `generation`.
    ///
    /// Dropped if the cache moved to a newer generation while the read was in flight, or if a
    /// newer revision is currently being served. A stale or invalidated entry is replaced
    /// regardless of revision.
    pub fn fill(&self, state: BoredomState, now_ms: i64, generation: u64) -> bool {
        let mut entry = self.entry.write().unwrap_or_else(PoisonError::into_inner);

        let current_generation = self.generation.load(Ordering::SeqCst);
        if current_generation != generation {
            debug!(
                read_at = generation,
                current = current_generation,
                "Discarding read from an older cache generation"
            );
            return false;
        }

        if let Some(current) = entry.as_ref()
            && now_ms < current.expires_at_ms
            && current.state.revision > state.revision
        {
            return false;
        }

        *entry = Some(self.entry_for(state, now_ms));

        true
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn invalidate(&self) {
        let mut entry = self.entry.write().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::SeqCst);

        match self.mode {
            CacheMode::Ttl => {
                if let Some(current) = entry.as_mut() {
                    current.expires_at_ms = i64::MIN;
                }
            }
            CacheMode::Push => *entry = None,
        }
    }

    /// Forgets the entry outright, including its revision.
    pub fn clear(&self) {
        let mut entry = self.entry.write().unwrap_or_else(PoisonError::into_inner);
        self.generation.fetch_add(1, Ordering::SeqCst);
        *entry = None;
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Feed state changes in either direction may have skipped events, so the entry goes.
    pub fn set_live(&self, live: bool) {
        let was_live = self.live.swap(live, Ordering::SeqCst);

        if was_live != live {
            self.clear();
        }
    }

    fn entry_for(&self, state: BoredomState, now_ms: i64) -> CacheEntry {
        let expires_at_ms = match self.mode {
            CacheMode::Ttl => now_ms.saturating_add(self.ttl_ms),
            CacheMode::Push => i64::MAX,
        };

        CacheEntry {
            state,
            expires_at_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(level: u8, revision: u64) -> BoredomState {
        BoredomState {
            level,
            last_update_time: 0,
            boredom_spikes: 0,
            revision,
        }
    }

    #[test]
    fn ttl_entry_served_until_expiry() {
        let cache = StateCache::new(CacheMode::Ttl, 5_000);
        cache.apply(state(10, 1), 0);

        assert_eq!(cache.get(4_000), Some(state(10, 1)));
        assert_eq!(cache.get(4_999), Some(state(10, 1)));
        assert_eq!(cache.get(5_000), None);
        assert_eq!(cache.get(6_000), None);
    }

    #[test]
    fn ttl_invalidate_forces_miss() {
        let cache = StateCache::new(CacheMode::Ttl, 5_000);
        cache.apply(state(10, 1), 0);
        cache.invalidate();

        assert_eq!(cache.get(1), None);
    }

    #[test]
    fn stale_revision_is_ignored() {
        let cache = StateCache::new(CacheMode::Ttl, 5_000);

        assert!(cache.apply(state(60, 4), 0));
        assert!(!cache.apply(state(20, 3), 0));
        assert_eq!(cache.get(0), Some(state(60, 4)));
    }

    #[test]
    fn applying_same_state_twice_is_idempotent() {
        let cache = StateCache::new(CacheMode::Push, 0);
        cache.set_live(true);

        assert!(cache.apply(state(33, 7), 0));
        assert!(cache.apply(state(33, 7), 10));
        assert_eq!(cache.get(i64::MAX - 1), Some(state(33, 7)));
    }

    #[test]
    fn push_cache_only_serves_while_live() {
        let cache = StateCache::new(CacheMode::Push, 0);
        cache.apply(state(5, 1), 0);
        assert_eq!(cache.get(0), None);

        cache.set_live(true);
        assert_eq!(cache.get(0), None);

        cache.apply(state(5, 1), 0);
        assert_eq!(cache.get(1_000_000), Some(state(5, 1)));

        cache.set_live(false);
        assert_eq!(cache.get(0), None);
    }

    #[test]
    fn push_invalidate_drops_entry() {
        let cache = StateCache::new(CacheMode::Push, 0);
        cache.set_live(true);
        cache.apply(state(5, 9), 0);
        cache.invalidate();

        assert_eq!(cache.get(0), None);
        assert!(cache.apply(state(1, 2), 0));
    }

    #[test]
    fn read_replaces_invalidated_entry_with_lower_revision() {
        let cache = StateCache::new(CacheMode::Ttl, 5_000);
        cache.apply(state(50, 9), 0);
        cache.invalidate();

        assert!(cache.fill(state(80, 1), 10, cache.generation()));
        assert_eq!(cache.get(10), Some(state(80, 1)));
    }

    #[test]
    fn read_replaces_expired_entry_with_lower_revision() {
        let cache = StateCache::new(CacheMode::Ttl, 5_000);
        cache.apply(state(50, 9), 0);

        assert!(cache.fill(state(80, 1), 6_000, cache.generation()));
        assert_eq!(cache.get(6_000), Some(state(80, 1)));
    }

    #[test]
    fn read_does_not_replace_newer_served_entry() {
        let cache = StateCache::new(CacheMode::Ttl, 5_000);
        let generation = cache.generation();
        cache.apply(state(70, 4), 0);

        assert!(!cache.fill(state(20, 3), 0, generation));
        assert_eq!(cache.get(0), Some(state(70, 4)));
    }

    #[test]
    fn read_from_before_feed_reconnect_is_discarded() {
        let cache = StateCache::new(CacheMode::Push, 0);
        cache.set_live(false);
        let generation = cache.generation();

        cache.set_live(true);

        assert!(!cache.fill(state(40, 3), 0, generation));
        assert_eq!(cache.get(0), None);
        assert!(cache.fill(state(41, 4), 0, cache.generation()));
        assert_eq!(cache.get(0), Some(state(41, 4)));
    }

    #[test]
    fn read_from_before_invalidate_is_discarded() {
        let cache = StateCache::new(CacheMode::Ttl, 5_000);
        let generation = cache.generation();
        cache.invalidate();

        assert!(!cache.fill(state(40, 3), 0, generation));
        assert_eq!(cache.get(0), None);
    }

    #[test]
    fn clear_forgets_revision() {
        let cache = StateCache::new(CacheMode::Push, 0);
        cache.set_live(true);
        cache.apply(state(50, 9), 0);
        cache.clear();

        assert!(cache.apply(state(80, 1), 0));
        assert_eq!(cache.get(0), Some(state(80, 1)));
    }

    #[test]
    fn mode_parses() {
        assert_eq!("TTL".parse::<CacheMode>(), Ok(CacheMode::Ttl));
        assert_eq!(" push".parse::<CacheMode>(), Ok(CacheMode::Push));
        assert!("lru".parse::<CacheMode>().is_err());
    }
}
