use std::sync::Arc;

use super::{
    cache::StateCache,
    clock::Clock,
    config::Config,
    service::{BoredomService, ServiceSettings},
    store::StateStore,
};

pub struct State<S, C> {
    pub config: Config,
    pub service: BoredomService<S, C>,
}

impl<S, C> State<S, C>
where
    S: StateStore,
    C: Clock,
{
    pub fn new(config: Config, store: S, clock: C) -> Arc<Self> {
        let cache = Arc::new(StateCache::new(config.cache_mode, config.cache_ttl_ms));

        let settings = ServiceSettings {
            decay_interval_ms: config.decay_interval_ms,
            decay_persist_min_ms: config.decay_persist_min_ms,
            alone_epoch_ms: config.alone_epoch_ms,
        };

        Arc::new(Self {
            service: BoredomService::new(store, cache, clock, settings),
            config,
        })
    }
}
