use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;

/// 租约记录（每个锁名一行）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Lease {
    #[schema(example = "cron_leader")]
    pub lock_name: String,
    #[schema(example = "web-1-4242-9f1c2ab0")]
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(
        lock_name: &str,
        holder_id: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            lock_name: lock_name.to_string(),
            holder_id: holder_id.to_string(),
            acquired_at: now,
            expires_at,
            last_heartbeat: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_held_by(&self, holder_id: &str) -> bool {
        self.holder_id == holder_id
    }
}

/// `now + duration`，超出 chrono 可表示范围时报错
pub fn lease_expiry(now: DateTime<Utc>, duration: Duration) -> anyhow::Result<DateTime<Utc>> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| anyhow::anyhow!("lease duration out of range: {:?}", duration))
}

/// 当前进程在选举中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Follower,
    Leader,
    ShuttingDown,
}

/// 领导者状态响应
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LeaderStatus {
    #[schema(example = "web-1-4242-9f1c2ab0")]
    pub instance_id: String,
    #[schema(example = "cron_leader")]
    pub lock_name: String,
    pub role: Role,
    pub is_leader: bool,
    pub lease: Option<Lease>,
}

/// 统一响应结构
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    pub data: Option<T>,
    pub success: bool,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
            success: true,
        }
    }

    pub fn error(code: i32, message: String) -> Self {
        Self {
            code,
            message,
            data: None,
            success: false,
        }
    }
}
