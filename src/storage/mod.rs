pub mod memory;
pub mod postgres;
pub mod redis;

use crate::config::{Config, StorageType};
use crate::models::Lease;
use anyhow::Result;
use async_trait::async_trait;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

pub use self::memory::MemoryLeaseStore;
pub use self::postgres::PostgresLeaseStore;
pub use self::redis::RedisLeaseStore;

/// 租约存储，所有实例共享的唯一事实来源
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// 原子条件写入：记录不存在、已过期或本就属于 holder_id 时写入，否则不动。
    /// 返回值仅表示是否发生了写入，是否持有锁以随后的 `get` 为准
    async fn claim(&self, lock_name: &str, holder_id: &str, duration: Duration) -> Result<bool>;

    /// 无条件续期：更新 expires_at 与 last_heartbeat，不改 holder_id
    async fn renew(&self, lock_name: &str, duration: Duration) -> Result<bool>;

    /// 读取租约
    async fn get(&self, lock_name: &str) -> Result<Option<Lease>>;

    /// 仅当 holder_id 匹配时删除
    async fn delete(&self, lock_name: &str, holder_id: &str) -> Result<bool>;
}

/// 按配置创建存储。不连接数据存储，只有 URL 等配置错误会失败
pub fn from_config(config: &Config) -> Result<Arc<dyn LeaseStore>> {
    let store: Arc<dyn LeaseStore> = match config.storage_type {
        StorageType::Memory => {
            warn!("Using memory lease store: no cross-process exclusion, run a single instance only");
            Arc::new(MemoryLeaseStore::new())
        }
        StorageType::Redis => {
            info!("Using Redis lease store");
            let redis_url = config
                .redis_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("Redis URL not configured"))?;
            Arc::new(RedisLeaseStore::new(
                redis_url,
                config.redis_username.clone(),
                config.redis_password.clone(),
                config.redis_db,
            )?)
        }
        StorageType::Postgres => {
            info!("Using PostgreSQL lease store");
            let database_url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("Database URL not configured"))?;
            Arc::new(PostgresLeaseStore::connect_lazy(
                database_url,
                config.database_max_connections,
            )?)
        }
    };
    Ok(store)
}
