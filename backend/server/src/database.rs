//! # Redis
//!
//! Durable home of the boredom record, shared by every replica.
//!
//! ## Layout
//!
//! - One hash at `RECORD_KEY`: `level`, `lastUpdateTime`, `boredomSpikes`, `revision`
//! - A counter at `RECORD_KEY:revision` that outlives the hash, so a recreated record never
//!   reuses a revision
//! - Values stored as integer strings
//! - One pub/sub channel at `CHANGE_CHANNEL` carrying the record as JSON after each write
//!
//! ## Atomicity
//!
//! - Creation and updates run as Lua scripts, Redis executes each script as a single step
//! - Updates check existence and range, apply sets and increments, bump `revision`, publish and
//!   return the post-update record in one round trip
//! - `lastUpdateTime` only moves forward
//! - An optional revision guard turns the update into compare-and-set, used for decay
//!
//! ## Durability
//!
//! With `WRITE_REPLICAS > 0` every write is followed by `WAIT`. Fewer acknowledgements than asked
//! for is reported as a write timeout, the write may or may not survive a failover.
use std::time::Duration;

use futures::StreamExt;
use redis::{
    Client, RedisError, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::StoreError,
    model::{BoredomState, ChangeEvent, MAX_LEVEL, StatePatch, UpdateOutcome},
    store::{ChangeFeed, ChangeStream, StateStore},
};

const CREATE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1],
  'level', ARGV[1],
  'lastUpdateTime', ARGV[2],
  'boredomSpikes', ARGV[3],
  'revision', redis.call('INCR', KEYS[2]))
return 1
"#;

// ARGV: id, channel, level, lastUpdateTime, boredomSpikes, spikesIncrement, expectedRevision, maxLevel
const UPDATE_SCRIPT: &str = r#"
local key = KEYS[1]
if redis.call('EXISTS', key) == 0 then
  return redis.error_reply('NOTFOUND ' .. key)
end

local function snapshot(applied)
  local fields = redis.call('HMGET', key, 'level', 'lastUpdateTime', 'boredomSpikes', 'revision')
  return {applied, fields[1], fields[2], fields[3], fields[4]}
end

if ARGV[7] ~= '' and redis.call('HGET', key, 'revision') ~= ARGV[7] then
  return snapshot(0)
end

if ARGV[3] ~= '' then
  local level = tonumber(ARGV[3])
  if level == nil or level < 0 or level > tonumber(ARGV[8]) then
    return redis.error_reply('OUTOFRANGE ' .. ARGV[3])
  end
  redis.call('HSET', key, 'level', ARGV[3])
end

if ARGV[4] ~= '' then
  local current = tonumber(redis.call('HGET', key, 'lastUpdateTime') or '0')
  if tonumber(ARGV[4]) > current then
    redis.call('HSET', key, 'lastUpdateTime', ARGV[4])
  end
end

if ARGV[5] ~= '' then
  redis.call('HSET', key, 'boredomSpikes', ARGV[5])
end

if tonumber(ARGV[6]) > 0 then
  redis.call('HINCRBY', key, 'boredomSpikes', ARGV[6])
end

local current = tonumber(redis.call('HGET', key, 'revision') or '0')
local revision = redis.call('INCR', KEYS[2])
if revision <= current then
  revision = current + 1
  redis.call('SET', KEYS[2], revision)
end
redis.call('HSET', key, 'revision', revision)

local result = snapshot(1)
redis.call('PUBLISH', ARGV[2], '{"id":' .. cjson.encode(ARGV[1]) ..
  ',"level":' .. result[2] ..
  ',"lastUpdateTime":' .. result[3] ..
  ',"boredomSpikes":' .. result[4] ..
  ',"revision":' .. result[5] .. '}')
return result
"#;

type RawRecord = (Option<i64>, Option<i64>, Option<i64>, Option<i64>);

#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    connection: ConnectionManager,
    record_key: String,
    revision_key: String,
    change_channel: String,
    write_replicas: u32,
    write_ack_timeout_ms: u64,
    create_script: Script,
    update_script: Script,
}

pub async fn init_redis(config: &Config) -> Result<RedisStore, StoreError> {
    let timeout = Duration::from_millis(config.store_timeout_ms);

    let redis_config = ConnectionManagerConfig::new()
        .set_number_of_retries(config.store_retries)
        .set_connection_timeout(timeout)
        .set_response_timeout(timeout);

    let client = Client::open(config.redis_url.as_str()).map_err(unavailable)?;
    let connection = client
        .get_connection_manager_with_config(redis_config)
        .await
        .map_err(unavailable)?;

    info!(
        record_key = %config.record_key,
        write_replicas = config.write_replicas,
        "Connected to Redis"
    );

    Ok(RedisStore {
        client,
        connection,
        record_key: config.record_key.clone(),
        revision_key: format!("{}:revision", config.record_key),
        change_channel: config.change_channel.clone(),
        write_replicas: config.write_replicas,
        write_ack_timeout_ms: config.write_ack_timeout_ms,
        create_script: Script::new(CREATE_SCRIPT),
        update_script: Script::new(UPDATE_SCRIPT),
    })
}

impl RedisStore {
    async fn wait_for_replicas(&self) -> Result<(), StoreError> {
        if self.write_replicas == 0 {
            return Ok(());
        }

        let mut connection = self.connection.clone();
        let acknowledged: i64 = redis::cmd("WAIT")
            .arg(self.write_replicas)
            .arg(self.write_ack_timeout_ms)
            .query_async(&mut connection)
            .await
            .map_err(write_error)?;

        if acknowledged < i64::from(self.write_replicas) {
            warn!(
                acknowledged,
                required = self.write_replicas,
                "Write not acknowledged by enough replicas"
            );
            return Err(StoreError::WriteTimeout);
        }

        Ok(())
    }
}

impl StateStore for RedisStore {
    fn record_id(&self) -> &str {
        &self.record_key
    }

    async fn load(&self) -> Result<BoredomState, StoreError> {
        let mut connection = self.connection.clone();

        let raw: RawRecord = redis::cmd("HMGET")
            .arg(&self.record_key)
            .arg("level")
            .arg("lastUpdateTime")
            .arg("boredomSpikes")
            .arg("revision")
            .query_async(&mut connection)
            .await
            .map_err(unavailable)?;

        match raw {
            (None, None, None, None) => Err(StoreError::NotFound),
            (level, time, spikes, revision) => {
                to_state(level, time, spikes, Some(revision.unwrap_or(0)))
            }
        }
    }

    async fn create(&self, initial: BoredomState) -> Result<bool, StoreError> {
        let mut connection = self.connection.clone();

        let created: i64 = self
            .create_script
            .key(&self.record_key)
            .key(&self.revision_key)
            .arg(initial.level)
            .arg(initial.last_update_time)
            .arg(initial.boredom_spikes)
            .invoke_async(&mut connection)
            .await
            .map_err(write_error)?;

        if created == 1 {
            self.wait_for_replicas().await?;
        }

        Ok(created == 1)
    }

    async fn atomic_update(&self, patch: StatePatch) -> Result<UpdateOutcome, StoreError> {
        let mut connection = self.connection.clone();

        let (applied, level, time, spikes, revision): (i64, i64, i64, i64, i64) = self
            .update_script
            .key(&self.record_key)
            .key(&self.revision_key)
            .arg(&self.record_key)
            .arg(&self.change_channel)
            .arg(optional(patch.level))
            .arg(optional(patch.last_update_time))
            .arg(optional(patch.boredom_spikes))
            .arg(patch.spikes_increment)
            .arg(optional(patch.expected_revision))
            .arg(MAX_LEVEL)
            .invoke_async(&mut connection)
            .await
            .map_err(|e| {
                if e.code() == Some("OUTOFRANGE") {
                    StoreError::OutOfRange(patch.level.map_or(-1, i64::from))
                } else {
                    write_error(e)
                }
            })?;

        let state = to_state(Some(level), Some(time), Some(spikes), Some(revision))?;

        if applied == 1 {
            self.wait_for_replicas().await?;
        } else {
            debug!(revision, "Revision guard rejected update");
        }

        Ok(UpdateOutcome {
            state,
            applied: applied == 1,
        })
    }
}

impl ChangeFeed for RedisStore {
    async fn subscribe(&self) -> Result<ChangeStream, StoreError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(unavailable)?;
        pubsub
            .subscribe(&self.change_channel)
            .await
            .map_err(unavailable)?;

        info!(channel = %self.change_channel, "Subscribed to change channel");

        let stream = pubsub.into_on_message().map(|message| {
            let payload: String = message
                .get_payload()
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;

            serde_json::from_str::<ChangeEvent>(&payload)
                .map_err(|e| StoreError::Corrupt(format!("{e}: {payload}")))
        });

        Ok(stream.boxed())
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn to_state(
    level: Option<i64>,
    time: Option<i64>,
    spikes: Option<i64>,
    revision: Option<i64>,
) -> Result<BoredomState, StoreError> {
    let (Some(level), Some(time), Some(spikes), Some(revision)) = (level, time, spikes, revision)
    else {
        return Err(StoreError::Corrupt("missing record field".to_string()));
    };

    let level = u8::try_from(level)
        .ok()
        .filter(|level| *level <= MAX_LEVEL)
        .ok_or_else(|| StoreError::Corrupt(format!("level {level} out of range")))?;
    let boredom_spikes = u64::try_from(spikes)
        .map_err(|_| StoreError::Corrupt(format!("negative spike count {spikes}")))?;
    let revision = u64::try_from(revision)
        .map_err(|_| StoreError::Corrupt(format!("negative revision {revision}")))?;

    Ok(BoredomState {
        level,
        last_update_time: time,
        boredom_spikes,
        revision,
    })
}

fn unavailable(error: RedisError) -> StoreError {
    StoreError::Unavailable(error.to_string())
}

fn write_error(error: RedisError) -> StoreError {
    if error.code() == Some("NOTFOUND") {
        StoreError::NotFound
    } else if error.is_timeout() {
        StoreError::WriteTimeout
    } else {
        unavailable(error)
    }
}
