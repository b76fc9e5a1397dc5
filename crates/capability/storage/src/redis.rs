//! Redis 在线状态存储
//!
//! 每个 key 一个 hash：`fleet:presence:{kind}:{id}`，字段 `online` / `last_seen` /
//! `connected_since`；所有 key 记录在集合 `fleet:presence:keys` 中供扫描。
//! 状态变更通过 Lua 脚本完成，同一 key 的“比较 + 写入”在 Redis 端原子执行。

use crate::error::StorageError;
use crate::traits::{PresenceStore, PresenceTouch};
use domain::{DeviceKey, DevicePresence};
use redis::AsyncCommands;
use std::collections::HashMap;

const KEY_SET: &str = "fleet:presence:keys";

// 返回 {came_online, last_seen, connected_since}
const TOUCH_SCRIPT: &str = r#"
local was = redis.call('HGET', KEYS[1], 'online')
local now = tonumber(ARGV[1])
local last = tonumber(redis.call('HGET', KEYS[1], 'last_seen') or ARGV[1])
if now > last then last = now end
redis.call('HSET', KEYS[1], 'online', '1', 'last_seen', tostring(last))
redis.call('HSETNX', KEYS[1], 'connected_since', ARGV[1])
redis.call('SADD', KEYS[2], ARGV[2])
local came = 0
if was ~= '1' then came = 1 end
return {came, tostring(last), redis.call('HGET', KEYS[1], 'connected_since')}
"#;

// ARGV[1] = now，ARGV[2] = timeout；未超时或已离线返回 nil
const STALE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'online') ~= '1' then return false end
local last = tonumber(redis.call('HGET', KEYS[1], 'last_seen') or '0')
if tonumber(ARGV[1]) - last <= tonumber(ARGV[2]) then return false end
redis.call('HSET', KEYS[1], 'online', '0')
return {tostring(last), redis.call('HGET', KEYS[1], 'connected_since') or ''}
"#;

const OFFLINE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'online') ~= '1' then return false end
redis.call('HSET', KEYS[1], 'online', '0')
return {redis.call('HGET', KEYS[1], 'last_seen') or '0', redis.call('HGET', KEYS[1], 'connected_since') or ''}
"#;

fn presence_key(key: &DeviceKey) -> String {
    format!("fleet:presence:{}", key)
}

fn parse_ms(field: &str, value: &str) -> Result<i64, StorageError> {
    value
        .parse::<i64>()
        .map_err(|_| StorageError::new(format!("invalid presence {}: {}", field, value)))
}

fn parse_optional_ms(field: &str, value: &str) -> Result<Option<i64>, StorageError> {
    if value.is_empty() {
        return Ok(None);
    }
    parse_ms(field, value).map(Some)
}

/// Redis 在线状态存储。
pub struct RedisPresenceStore {
    client: redis::Client,
    touch: redis::Script,
    stale: redis::Script,
    offline: redis::Script,
}

impl RedisPresenceStore {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            touch: redis::Script::new(TOUCH_SCRIPT),
            stale: redis::Script::new(STALE_SCRIPT),
            offline: redis::Script::new(OFFLINE_SCRIPT),
        }
    }

    pub fn connect(redis_url: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self::new(client))
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StorageError> {
        let connection = self.client.get_multiplexed_tokio_connection().await?;
        Ok(connection)
    }

    fn offline_presence(
        key: &DeviceKey,
        last_seen: &str,
        connected_since: &str,
    ) -> Result<DevicePresence, StorageError> {
        Ok(DevicePresence {
            device_key: key.clone(),
            is_online: false,
            last_seen_ms: parse_ms("last_seen", last_seen)?,
            connected_since_ms: parse_optional_ms("connected_since", connected_since)?,
        })
    }
}

#[async_trait::async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn touch(&self, key: &DeviceKey, now_ms: i64) -> Result<PresenceTouch, StorageError> {
        let mut connection = self.connection().await?;
        let (came_online, last_seen, connected_since): (i64, String, String) = self
            .touch
            .key(presence_key(key))
            .key(KEY_SET)
            .arg(now_ms)
            .arg(key.to_string())
            .invoke_async(&mut connection)
            .await?;
        Ok(PresenceTouch {
            presence: DevicePresence {
                device_key: key.clone(),
                is_online: true,
                last_seen_ms: parse_ms("last_seen", &last_seen)?,
                connected_since_ms: parse_optional_ms("connected_since", &connected_since)?,
            },
            came_online: came_online == 1,
        })
    }

    async fn mark_offline_if_stale(
        &self,
        key: &DeviceKey,
        now_ms: i64,
        timeout_ms: i64,
    ) -> Result<Option<DevicePresence>, StorageError> {
        let mut connection = self.connection().await?;
        let result: Option<(String, String)> = self
            .stale
            .key(presence_key(key))
            .arg(now_ms)
            .arg(timeout_ms)
            .invoke_async(&mut connection)
            .await?;
        result
            .map(|(last_seen, since)| Self::offline_presence(key, &last_seen, &since))
            .transpose()
    }

    async fn mark_offline(&self, key: &DeviceKey) -> Result<Option<DevicePresence>, StorageError> {
        let mut connection = self.connection().await?;
        let result: Option<(String, String)> = self
            .offline
            .key(presence_key(key))
            .invoke_async(&mut connection)
            .await?;
        result
            .map(|(last_seen, since)| Self::offline_presence(key, &last_seen, &since))
            .transpose()
    }

    async fn find_presence(&self, key: &DeviceKey) -> Result<Option<DevicePresence>, StorageError> {
        let mut connection = self.connection().await?;
        let fields: HashMap<String, String> = connection.hgetall(presence_key(key)).await?;
        let Some(last_seen) = fields.get("last_seen") else {
            return Ok(None);
        };
        Ok(Some(DevicePresence {
            device_key: key.clone(),
            is_online: fields.get("online").map(String::as_str) == Some("1"),
            last_seen_ms: parse_ms("last_seen", last_seen)?,
            connected_since_ms: match fields.get("connected_since") {
                Some(value) => parse_optional_ms("connected_since", value)?,
                None => None,
            },
        }))
    }

    async fn list_presence(&self) -> Result<Vec<DevicePresence>, StorageError> {
        let members: Vec<String> = {
            let mut connection = self.connection().await?;
            connection.smembers(KEY_SET).await?
        };
        let mut keys: Vec<DeviceKey> = members
            .iter()
            .filter_map(|member| DeviceKey::parse(member))
            .collect();
        keys.sort();
        let mut items = Vec::with_capacity(keys.len());
        for key in keys.iter() {
            if let Some(presence) = self.find_presence(key).await? {
                items.push(presence);
            }
        }
        Ok(items)
    }

    async fn clear_presence(&self, key: &DeviceKey) -> Result<bool, StorageError> {
        let mut connection = self.connection().await?;
        let removed: i64 = connection.del(presence_key(key)).await?;
        connection
            .srem::<_, _, ()>(KEY_SET, key.to_string())
            .await?;
        Ok(removed > 0)
    }
}
