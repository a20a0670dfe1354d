use crate::models::Lease;
use crate::storage::LeaseStore;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::OnceCell;

// 所有时间均取 Redis 服务器时钟（毫秒），避免各实例时钟偏差
const NOW_MS: &str = r#"
local t = redis.call('TIME')
local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
"#;

const CLAIM_BODY: &str = r#"
local holder = redis.call('HGET', KEYS[1], 'holder_id')
if holder then
    local expires = tonumber(redis.call('HGET', KEYS[1], 'expires_at'))
    if expires ~= nil and expires >= now and holder ~= ARGV[1] then
        return 0
    end
else
    redis.call('HSET', KEYS[1], 'created_at', now)
end
redis.call('HSET', KEYS[1],
    'holder_id', ARGV[1],
    'acquired_at', now,
    'expires_at', now + tonumber(ARGV[2]),
    'last_heartbeat', now,
    'updated_at', now)
return 1
"#;

const RENEW_BODY: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[1],
    'expires_at', now + tonumber(ARGV[1]),
    'last_heartbeat', now,
    'updated_at', now)
return 1
"#;

const DELETE_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'holder_id') == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

pub struct RedisLeaseStore {
    client: redis::Client,
    // 首次使用时建立，失败不缓存
    connection: OnceCell<ConnectionManager>,
    prefix: String,
    claim_script: Script,
    renew_script: Script,
    delete_script: Script,
}

impl RedisLeaseStore {
    /// 只解析连接信息，不连接 Redis
    pub fn new(
        redis_url: &str,
        username: Option<String>,
        password: Option<String>,
        db: Option<i64>,
    ) -> Result<Self> {
        // 构建连接信息
        let mut connection_info = redis::ConnectionInfo::from_str(redis_url)?;

        // 设置认证信息
        if let Some(pwd) = password {
            connection_info.redis.password = Some(pwd);
        }
        if let Some(user) = username {
            connection_info.redis.username = Some(user);
        }
        if let Some(database) = db {
            connection_info.redis.db = database;
        }

        let client = redis::Client::open(connection_info)?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            prefix: "lease:".to_string(),
            claim_script: Script::new(&format!("{}{}", NOW_MS, CLAIM_BODY)),
            renew_script: Script::new(&format!("{}{}", NOW_MS, RENEW_BODY)),
            delete_script: Script::new(DELETE_SCRIPT),
        })
    }

    fn get_lease_key(&self, lock_name: &str) -> String {
        format!("{}{}", self.prefix, lock_name)
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let manager = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await?;
        Ok(manager.clone())
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

fn field_time(fields: &HashMap<String, String>, name: &str) -> Result<DateTime<Utc>> {
    let raw = fields
        .get(name)
        .ok_or_else(|| anyhow!("lease hash is missing field '{}'", name))?;
    let ms: i64 = raw
        .parse()
        .with_context(|| format!("invalid timestamp in field '{}': {}", name, raw))?;
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

fn lease_from_fields(lock_name: &str, fields: &HashMap<String, String>) -> Result<Lease> {
    let holder_id = fields
        .get("holder_id")
        .cloned()
        .ok_or_else(|| anyhow!("lease hash is missing field 'holder_id'"))?;

    Ok(Lease {
        lock_name: lock_name.to_string(),
        holder_id,
        acquired_at: field_time(fields, "acquired_at")?,
        expires_at: field_time(fields, "expires_at")?,
        last_heartbeat: field_time(fields, "last_heartbeat")?,
        created_at: field_time(fields, "created_at")?,
        updated_at: field_time(fields, "updated_at")?,
    })
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn claim(&self, lock_name: &str, holder_id: &str, duration: Duration) -> Result<bool> {
        let key = self.get_lease_key(lock_name);
        let mut conn = self.connection().await?;

        let written: i64 = self
            .claim_script
            .key(&key)
            .arg(holder_id)
            .arg(millis(duration))
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn renew(&self, lock_name: &str, duration: Duration) -> Result<bool> {
        let key = self.get_lease_key(lock_name);
        let mut conn = self.connection().await?;

        let written: i64 = self
            .renew_script
            .key(&key)
            .arg(millis(duration))
            .invoke_async(&mut conn)
            .await?;
        Ok(written == 1)
    }

    async fn get(&self, lock_name: &str) -> Result<Option<Lease>> {
        let key = self.get_lease_key(lock_name);
        let mut conn = self.connection().await?;

        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        lease_from_fields(lock_name, &fields).map(Some)
    }

    async fn delete(&self, lock_name: &str, holder_id: &str) -> Result<bool> {
        let key = self.get_lease_key(lock_name);
        let mut conn = self.connection().await?;

        let deleted: i64 = self
            .delete_script
            .key(&key)
            .arg(holder_id)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }
}
