use crate::models::{lease_expiry, Lease};
use crate::storage::LeaseStore;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;

/// 进程内租约存储，用于单机部署和测试；多个选举实例共享同一个 Arc 即可模拟多进程
#[derive(Default)]
pub struct MemoryLeaseStore {
    leases: DashMap<String, Lease>, // lock_name -> Lease
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self {
            leases: DashMap::new(),
        }
    }

    /// 直接写入一条租约（覆盖已有记录）
    pub fn insert(&self, lease: Lease) {
        self.leases.insert(lease.lock_name.clone(), lease);
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn claim(&self, lock_name: &str, holder_id: &str, duration: Duration) -> Result<bool> {
        let now = Utc::now();
        let expires_at = lease_expiry(now, duration)?;

        // entry 持有分片写锁，判断与写入在同一临界区内完成
        match self.leases.entry(lock_name.to_string()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                if !existing.is_expired_at(now) && !existing.is_held_by(holder_id) {
                    return Ok(false);
                }

                if !existing.is_held_by(holder_id) {
                    log::info!(
                        "[STORE] Taking over expired lease - lock_name: {}, previous_holder: {}, expired_at: {}",
                        lock_name, existing.holder_id, existing.expires_at
                    );
                }

                existing.holder_id = holder_id.to_string();
                existing.acquired_at = now;
                existing.expires_at = expires_at;
                existing.last_heartbeat = now;
                existing.updated_at = now;
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert(Lease::new(lock_name, holder_id, now, expires_at));
                Ok(true)
            }
        }
    }

    async fn renew(&self, lock_name: &str, duration: Duration) -> Result<bool> {
        let now = Utc::now();
        let expires_at = lease_expiry(now, duration)?;
        match self.leases.get_mut(lock_name) {
            Some(mut lease) => {
                lease.expires_at = expires_at;
                lease.last_heartbeat = now;
                lease.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get(&self, lock_name: &str) -> Result<Option<Lease>> {
        Ok(self.leases.get(lock_name).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, lock_name: &str, holder_id: &str) -> Result<bool> {
        let removed = self
            .leases
            .remove_if(lock_name, |_, lease| lease.is_held_by(holder_id));
        Ok(removed.is_some())
    }
}
