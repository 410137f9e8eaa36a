use std::{env, fmt::Display, fs::read_to_string, str::FromStr};

use tracing::{info, warn};

use crate::{cache::CacheMode, error::AppError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

pub struct Config {
    pub port: u16,
    pub store_backend: StoreBackend,
    pub redis_url: String,
    pub store_timeout_ms: u64,
    pub store_retries: usize,
    pub write_replicas: u32,
    pub write_ack_timeout_ms: u64,
    pub record_key: String,
    pub change_channel: String,
    pub cache_mode: CacheMode,
    pub cache_ttl_ms: i64,
    pub decay_interval_ms: i64,
    pub decay_persist_min_ms: i64,
    pub alone_epoch_ms: i64,
    pub feed_retry_ms: u64,
    pub admin_username: String,
    pub admin_password: String,
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; secrets still prefer `/run/secrets`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            port: try_load(&lookup, "RUST_PORT", "1111")?,
            store_backend: try_load(&lookup, "STORE_BACKEND", "redis")?,
            redis_url: try_load(&lookup, "REDIS_URL", "redis://127.0.0.1:6379")?,
            store_timeout_ms: try_load(&lookup, "STORE_TIMEOUT_MS", "2000")?,
            store_retries: try_load(&lookup, "STORE_RETRIES", "1")?,
            write_replicas: try_load(&lookup, "WRITE_REPLICAS", "0")?,
            write_ack_timeout_ms: try_load(&lookup, "WRITE_ACK_TIMEOUT_MS", "1000")?,
            record_key: try_load(&lookup, "RECORD_KEY", "boredom:state")?,
            change_channel: try_load(&lookup, "CHANGE_CHANNEL", "boredom:changes")?,
            cache_mode: try_load(&lookup, "CACHE_MODE", "ttl")?,
            cache_ttl_ms: try_load(&lookup, "CACHE_TTL_MS", "5000")?,
            decay_interval_ms: try_load(&lookup, "DECAY_INTERVAL_MS", "1800000")?,
            decay_persist_min_ms: try_load(&lookup, "DECAY_PERSIST_MIN_MS", "60000")?,
            alone_epoch_ms: try_load(&lookup, "ALONE_EPOCH_MS", "1704067200000")?,
            feed_retry_ms: try_load(&lookup, "FEED_RETRY_MS", "1000")?,
            admin_username: read_secret(&lookup, "ADMIN_USERNAME")?,
            admin_password: read_secret(&lookup, "ADMIN_PASSWORD")?,
        };

        if config.decay_interval_ms <= 0 {
            return Err(AppError::Config(
                "DECAY_INTERVAL_MS must be positive".to_string(),
            ));
        }

        if config.cache_ttl_ms < 0 {
            return Err(AppError::Config(
                "CACHE_TTL_MS must not be negative".to_string(),
            ));
        }

        Ok(config)
    }
}

fn var<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn try_load<F, T>(lookup: &F, key: &str, default: &str) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    var(lookup, key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
            AppError::Config(format!("invalid {key}: {e}"))
        })
}

fn read_secret<F>(lookup: &F, secret_name: &str) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    let path = format!("/run/secrets/{secret_name}");

    match read_to_string(&path) {
        Ok(s) => Ok(s.trim().to_string()),
        Err(e) => {
            info!("Failed to read {secret_name} from file ({e}), trying environment");

            var(lookup, secret_name).ok_or_else(|| {
                warn!("Secret {secret_name} not found");
                AppError::Config(format!("missing secret {secret_name}"))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_credentials_set() {
        let config = Config::from_lookup(lookup(&[
            ("ADMIN_USERNAME", "admin"),
            ("ADMIN_PASSWORD", "hunter2"),
        ]))
        .unwrap();

        assert_eq!(config.port, 1111);
        assert_eq!(config.store_backend, StoreBackend::Redis);
        assert_eq!(config.cache_mode, CacheMode::Ttl);
        assert_eq!(config.cache_ttl_ms, 5000);
        assert_eq!(config.decay_interval_ms, 30 * 60 * 1000);
        assert_eq!(config.write_replicas, 0);
        assert_eq!(config.record_key, "boredom:state");
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("ADMIN_USERNAME", "admin"),
            ("ADMIN_PASSWORD", "hunter2"),
            ("RUST_PORT", "8080"),
            ("CACHE_MODE", "push"),
            ("STORE_BACKEND", " Memory "),
            ("WRITE_REPLICAS", "2"),
        ]))
        .unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.cache_mode, CacheMode::Push);
        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.write_replicas, 2);
    }

    #[test]
    fn invalid_port_is_rejected() {
        let result = Config::from_lookup(lookup(&[
            ("ADMIN_USERNAME", "admin"),
            ("ADMIN_PASSWORD", "hunter2"),
            ("RUST_PORT", "not-a-port"),
        ]));

        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn zero_decay_interval_is_rejected() {
        let result = Config::from_lookup(lookup(&[
            ("ADMIN_USERNAME", "admin"),
            ("ADMIN_PASSWORD", "hunter2"),
            ("DECAY_INTERVAL_MS", "0"),
        ]));

        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn missing_credentials_fail() {
        let result = Config::from_lookup(lookup(&[("ADMIN_USERNAME", "admin")]));
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
