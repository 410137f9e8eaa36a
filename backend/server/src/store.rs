//! # Store Adapter
//!
//! Contract every backing store fulfils for the singleton record.
//!
//! - `load`: read by the fixed key, `NotFound` when absent
//! - `create`: insert-if-absent in one step, returns whether this call created it
//! - `atomic_update`: set fields, add increments, bump the revision and publish the result, all or nothing
//!
//! Revisions come from a counter kept apart from the record, so a recreated record always
//! carries a higher revision than the one it replaces.
//!
//! Implementations: [`crate::database::RedisStore`] and [`MemoryStore`].
use std::{
    future::Future,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use futures::{StreamExt, stream::BoxStream};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{
    error::StoreError,
    model::{BoredomState, ChangeEvent, MAX_LEVEL, StatePatch, UpdateOutcome},
};

pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, StoreError>>;

pub trait StateStore: Send + Sync + 'static {
    /// Identity of the singleton, carried by every change event.
    fn record_id(&self) -> &str;

    fn load(&self) -> impl Future<Output = Result<BoredomState, StoreError>> + Send;

    fn create(
        &self,
        initial: BoredomState,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn atomic_update(
        &self,
        patch: StatePatch,
    ) -> impl Future<Output = Result<UpdateOutcome, StoreError>> + Send;
}

/// Live stream of post-write records. Finite per connection, resubscribe to continue.
pub trait ChangeFeed: Send + Sync + 'static {
    fn subscribe(&self) -> impl Future<Output = Result<ChangeStream, StoreError>> + Send;
}

/// Applies `patch` to `record` in place. Nothing is touched unless the whole patch is valid.
/// The caller assigns the new revision when this returns `Ok(true)`.
pub fn apply_patch(record: &mut BoredomState, patch: &StatePatch) -> Result<bool, StoreError> {
    if let Some(expected) = patch.expected_revision
        && expected != record.revision
    {
        return Ok(false);
    }

    if let Some(level) = patch.level
        && level > MAX_LEVEL
    {
        return Err(StoreError::OutOfRange(i64::from(level)));
    }

    if let Some(level) = patch.level {
        record.level = level;
    }
    if let Some(time) = patch.last_update_time {
        record.last_update_time = record.last_update_time.max(time);
    }
    if let Some(spikes) = patch.boredom_spikes {
        record.boredom_spikes = spikes;
    }
    record.boredom_spikes = record.boredom_spikes.saturating_add(patch.spikes_increment);

    Ok(true)
}

/// Next revision given the counter and the record's current revision.
pub fn next_revision(counter: u64, current: u64) -> u64 {
    counter.max(current) + 1
}

const MEMORY_FEED_CAPACITY: usize = 64;

/// Process-local store for single-replica runs and tests.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    record_id: String,
    record: Mutex<Option<BoredomState>>,
    changes: broadcast::Sender<ChangeEvent>,
    revisions: AtomicU64,
    failure: Mutex<Option<StoreError>>,
    create_failure: Mutex<Option<StoreError>>,
    loads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new(record_id: &str) -> Self {
        let (changes, _) = broadcast::channel(MEMORY_FEED_CAPACITY);

        Self {
            inner: Arc::new(MemoryInner {
                record_id: record_id.to_string(),
                record: Mutex::new(None),
                changes,
                revisions: AtomicU64::new(0),
                failure: Mutex::new(None),
                create_failure: Mutex::new(None),
                loads: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
            }),
        }
    }

    /// Every following call fails with `failure` until cleared with `None`.
    pub fn inject_failure(&self, failure: Option<StoreError>) {
        *self
            .inner
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = failure;
    }

    /// Only `create` fails with `failure` until cleared with `None`.
    pub fn fail_creates(&self, failure: Option<StoreError>) {
        *self
            .inner
            .create_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = failure;
    }

    /// Deletes the record behind every replica's back. The revision counter survives.
    pub fn remove_record(&self) {
        *self
            .inner
            .record
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn snapshot(&self) -> Option<BoredomState> {
        *self
            .inner
            .record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn load_count(&self) -> usize {
        self.inner.loads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Publishes an arbitrary event, as another writer sharing the feed would.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.inner.changes.send(event);
    }

    fn check_failure(&self) -> Result<(), StoreError> {
        check(&self.inner.failure)
    }

    /// Callers hold the record lock.
    fn bump_revision(&self, current: u64) -> u64 {
        let next = next_revision(self.inner.revisions.load(Ordering::SeqCst), current);
        self.inner.revisions.store(next, Ordering::SeqCst);
        next
    }
}

fn check(failure: &Mutex<Option<StoreError>>) -> Result<(), StoreError> {
    match failure.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
        Some(failure) => Err(failure.clone()),
        None => Ok(()),
    }
}

impl StateStore for MemoryStore {
    fn record_id(&self) -> &str {
        &self.inner.record_id
    }

    async fn load(&self) -> Result<BoredomState, StoreError> {
        self.inner.loads.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;

        self.snapshot().ok_or(StoreError::NotFound)
    }

    async fn create(&self, initial: BoredomState) -> Result<bool, StoreError> {
        self.check_failure()?;
        check(&self.inner.create_failure)?;

        let mut record = self
            .inner
            .record
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if record.is_some() {
            return Ok(false);
        }

        *record = Some(BoredomState {
            revision: self.bump_revision(0),
            ..initial
        });
        Ok(true)
    }

    async fn atomic_update(&self, patch: StatePatch) -> Result<UpdateOutcome, StoreError> {
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;

        let outcome = {
            let mut guard = self
                .inner
                .record
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let record = guard.as_mut().ok_or(StoreError::NotFound)?;

            let applied = apply_patch(record, &patch)?;
            if applied {
                record.revision = self.bump_revision(record.revision);
            }
            UpdateOutcome {
                state: *record,
                applied,
            }
        };

        if outcome.applied {
            self.publish(ChangeEvent {
                id: self.inner.record_id.clone(),
                state: outcome.state,
            });
        }

        Ok(outcome)
    }
}

impl ChangeFeed for MemoryStore {
    async fn subscribe(&self) -> Result<ChangeStream, StoreError> {
        self.check_failure()?;

        let receiver = self.inner.changes.subscribe();

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(event) => Some((Ok(event), receiver)),
                Err(RecvError::Lagged(missed)) => Some((
                    Err(StoreError::Unavailable(format!(
                        "change feed lagged by {missed} events"
                    ))),
                    receiver,
                )),
                Err(RecvError::Closed) => None,
            }
        });

        Ok(stream.boxed())
    }
}
