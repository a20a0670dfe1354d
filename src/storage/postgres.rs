use crate::models::Lease;
use crate::storage::LeaseStore;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::OnceCell;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS leader_leases (
    lock_name      TEXT PRIMARY KEY,
    holder_id      TEXT NOT NULL,
    acquired_at    TIMESTAMPTZ NOT NULL,
    expires_at     TIMESTAMPTZ NOT NULL,
    last_heartbeat TIMESTAMPTZ NOT NULL,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at     TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

// 单条语句完成"插入或在过期/自持有时覆盖"，时间统一取数据库时钟
const CLAIM: &str = r#"
INSERT INTO leader_leases
    (lock_name, holder_id, acquired_at, expires_at, last_heartbeat, created_at, updated_at)
VALUES
    ($1, $2, now(), now() + make_interval(secs => $3), now(), now(), now())
ON CONFLICT (lock_name) DO UPDATE SET
    holder_id = EXCLUDED.holder_id,
    acquired_at = EXCLUDED.acquired_at,
    expires_at = EXCLUDED.expires_at,
    last_heartbeat = EXCLUDED.last_heartbeat,
    updated_at = EXCLUDED.updated_at
WHERE leader_leases.expires_at < now()
   OR leader_leases.holder_id = EXCLUDED.holder_id
"#;

const RENEW: &str = r#"
UPDATE leader_leases
SET expires_at = now() + make_interval(secs => $2),
    last_heartbeat = now(),
    updated_at = now()
WHERE lock_name = $1
"#;

const SELECT: &str = r#"
SELECT lock_name, holder_id, acquired_at, expires_at, last_heartbeat, created_at, updated_at
FROM leader_leases
WHERE lock_name = $1
"#;

const DELETE: &str = "DELETE FROM leader_leases WHERE lock_name = $1 AND holder_id = $2";

#[derive(Debug, sqlx::FromRow)]
struct LeaseRow {
    lock_name: String,
    holder_id: String,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_heartbeat: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<LeaseRow> for Lease {
    fn from(row: LeaseRow) -> Self {
        Self {
            lock_name: row.lock_name,
            holder_id: row.holder_id,
            acquired_at: row.acquired_at,
            expires_at: row.expires_at,
            last_heartbeat: row.last_heartbeat,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub struct PostgresLeaseStore {
    pool: PgPool,
    schema_ready: OnceCell<()>,
}

impl PostgresLeaseStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: OnceCell::new(),
        }
    }

    /// 只解析 URL，不建立连接；数据库不可达时由选举的重试逻辑兜底
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(database_url)?;
        Ok(Self::new(pool))
    }

    /// 建表（幂等）。失败不缓存，下次调用重试
    pub async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
                log::info!("[STORE] Lease table ready - table: leader_leases");
                Ok::<(), sqlx::Error>(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for PostgresLeaseStore {
    async fn claim(&self, lock_name: &str, holder_id: &str, duration: Duration) -> Result<bool> {
        self.ensure_schema().await?;
        let result = sqlx::query(CLAIM)
            .bind(lock_name)
            .bind(holder_id)
            .bind(duration.as_secs_f64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn renew(&self, lock_name: &str, duration: Duration) -> Result<bool> {
        self.ensure_schema().await?;
        let result = sqlx::query(RENEW)
            .bind(lock_name)
            .bind(duration.as_secs_f64())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, lock_name: &str) -> Result<Option<Lease>> {
        self.ensure_schema().await?;
        let row: Option<LeaseRow> = sqlx::query_as(SELECT)
            .bind(lock_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Lease::from))
    }

    async fn delete(&self, lock_name: &str, holder_id: &str) -> Result<bool> {
        self.ensure_schema().await?;
        let result = sqlx::query(DELETE)
            .bind(lock_name)
            .bind(holder_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
