//! Lease based leader election over a shared [`LeaseStore`].
//!
//! Every process runs one [`LeaderElection`] per lock name. Acquisition is a
//! single atomic conditional write followed by a read of the row; the read
//! decides leadership. Two background loops share one tick lock:
//!
//! - the heartbeat loop renews the lease while this process is leader and
//!   steps down when the row names another holder
//! - the retry loop tries to claim the lease while this process is follower
//!
//! Job schedulers only see a [`LeaderGuard`].

pub mod guard;
pub mod state;

use crate::config::ElectionConfig;
use crate::error::ElectionError;
use crate::identity;
use crate::models::{Lease, Role};
use crate::storage::LeaseStore;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub use guard::LeaderGuard;
pub use state::ElectionState;
use state::SharedState;

/// 选举管理器句柄，clone 后共享同一份状态
#[derive(Clone)]
pub struct LeaderElection {
    inner: Arc<Inner>,
}

struct Inner {
    config: ElectionConfig,
    instance_id: String,
    store: Arc<dyn LeaseStore>,
    shared: Arc<SharedState>,
    // 串行化启动获取、两个循环的 tick 以及释放
    tick_lock: tokio::sync::Mutex<()>,
    // 最近一次确认持有时，租约在本地时钟上的最晚有效时间
    confirmed_until: Mutex<Option<Instant>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LeaderElection {
    /// 使用进程级实例标识创建
    pub fn new(config: ElectionConfig, store: Arc<dyn LeaseStore>) -> Result<Self, ElectionError> {
        Self::with_instance_id(config, store, identity::instance_id())
    }

    pub fn with_instance_id(
        config: ElectionConfig,
        store: Arc<dyn LeaseStore>,
        instance_id: impl Into<String>,
    ) -> Result<Self, ElectionError> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                instance_id: instance_id.into(),
                store,
                shared: Arc::new(SharedState::new()),
                tick_lock: tokio::sync::Mutex::new(()),
                confirmed_until: Mutex::new(None),
                shutdown_tx,
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn lock_name(&self) -> &str {
        &self.inner.config.lock_name
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.inner.config
    }

    pub fn guard(&self) -> LeaderGuard {
        LeaderGuard::new(self.inner.shared.clone(), self.lock_name())
    }

    /// `is_leader && !is_shutting_down`，无 I/O
    pub fn is_leader(&self) -> bool {
        self.inner.shared.is_leader()
    }

    pub fn state(&self) -> ElectionState {
        self.inner.shared.snapshot()
    }

    pub fn role(&self) -> Role {
        self.state().role()
    }

    /// 订阅领导权变化
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.shared.subscribe()
    }

    /// 读取存储中的租约
    pub async fn current_lease(&self) -> Result<Option<Lease>, ElectionError> {
        self.store_call("read", self.inner.store.get(self.lock_name()))
            .await
    }

    /// 尝试获取租约，存储错误一律视为未获取
    pub async fn try_acquire(&self) -> bool {
        let _tick = self.inner.tick_lock.lock().await;
        match self.acquire_locked().await {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(
                    "[ACQUIRE] Lease acquisition failed - lock_name: {}, instance_id: {}, error: {}",
                    self.lock_name(),
                    self.instance_id(),
                    e
                );
                false
            }
        }
    }

    /// 续期并自检持有者；返回续期后是否仍是领导者
    pub async fn renew(&self) -> bool {
        let _tick = self.inner.tick_lock.lock().await;

        let state = self.state();
        if state.is_shutting_down || !state.is_leader {
            return false;
        }

        let started = Instant::now();
        let renewed = self
            .store_call(
                "renew",
                self.inner
                    .store
                    .renew(self.lock_name(), self.inner.config.lease_duration),
            )
            .await;
        if let Err(e) = renewed {
            warn!(
                "[HEARTBEAT] Lease renewal failed, retrying next tick - lock_name: {}, instance_id: {}, error: {}",
                self.lock_name(),
                self.instance_id(),
                e
            );
            return self.step_down_if_lapsed();
        }

        match self.current_lease().await {
            Ok(Some(lease)) if lease.is_held_by(self.instance_id()) => {
                *self.inner.confirmed_until.lock() = Some(started + self.inner.config.lease_duration);
                debug!(
                    "[HEARTBEAT] Lease renewed - lock_name: {}, instance_id: {}, expires_at: {}",
                    lease.lock_name, lease.holder_id, lease.expires_at
                );
                true
            }
            Ok(other) => {
                self.inner.shared.set_leader(false);
                *self.inner.confirmed_until.lock() = None;
                warn!(
                    "[HEARTBEAT] Lost leader status - lock_name: {}, instance_id: {}, current_holder: {}",
                    self.lock_name(),
                    self.instance_id(),
                    other
                        .as_ref()
                        .map(|lease| lease.holder_id.as_str())
                        .unwrap_or("<none>")
                );
                false
            }
            Err(e) => {
                warn!(
                    "[HEARTBEAT] Ownership check failed, retrying next tick - lock_name: {}, instance_id: {}, error: {}",
                    self.lock_name(),
                    self.instance_id(),
                    e
                );
                self.step_down_if_lapsed()
            }
        }
    }

    /// 进入关闭状态；仍持有租约时删除，让其他实例立即接管。可重复调用
    pub async fn release(&self) {
        let first = self.inner.shared.begin_shutdown();
        self.inner.shutdown_tx.send_replace(true);

        let _tick = self.inner.tick_lock.lock().await;
        let was_leader = self.inner.shared.set_leader(false);
        *self.inner.confirmed_until.lock() = None;

        if !was_leader {
            if first {
                info!(
                    "[RELEASE] Not leader, nothing to release - lock_name: {}, instance_id: {}",
                    self.lock_name(),
                    self.instance_id()
                );
            }
            return;
        }

        match self.current_lease().await {
            Ok(Some(lease)) if lease.is_held_by(self.instance_id()) => {
                let deleted = self
                    .store_call(
                        "delete",
                        self.inner.store.delete(self.lock_name(), self.instance_id()),
                    )
                    .await;
                match deleted {
                    Ok(true) => info!(
                        "[RELEASE] Lease released - lock_name: {}, instance_id: {}",
                        self.lock_name(),
                        self.instance_id()
                    ),
                    Ok(false) => info!(
                        "[RELEASE] Lease changed hands before delete, skipped - lock_name: {}, instance_id: {}",
                        self.lock_name(),
                        self.instance_id()
                    ),
                    Err(e) => warn!(
                        "[RELEASE] Failed to delete lease, it will expire naturally - lock_name: {}, instance_id: {}, error: {}",
                        self.lock_name(),
                        self.instance_id(),
                        e
                    ),
                }
            }
            Ok(Some(lease)) => info!(
                "[RELEASE] Lease now held by another instance, skipping delete - lock_name: {}, instance_id: {}, current_holder: {}",
                self.lock_name(),
                self.instance_id(),
                lease.holder_id
            ),
            Ok(None) => debug!(
                "[RELEASE] No lease row to release - lock_name: {}",
                self.lock_name()
            ),
            Err(e) => warn!(
                "[RELEASE] Failed to read lease, it will expire naturally - lock_name: {}, instance_id: {}, error: {}",
                self.lock_name(),
                self.instance_id(),
                e
            ),
        }
    }

    /// 后台启动选举（不阻塞调用方）：启动时有限次重试获取，然后运行心跳与重试循环
    pub fn start(&self) {
        let mut tasks = self.inner.tasks.lock();
        if !tasks.is_empty() {
            warn!(
                "[ELECTION] Election already started - lock_name: {}",
                self.lock_name()
            );
            return;
        }
        if self.state().is_shutting_down {
            warn!(
                "[ELECTION] Election is shutting down, not starting - lock_name: {}",
                self.lock_name()
            );
            return;
        }

        let config = self.config();
        info!(
            "[ELECTION] Starting leader election - lock_name: {}, instance_id: {}, lease: {:?}, heartbeat: {:?}, retry: {:?}",
            config.lock_name,
            self.instance_id(),
            config.lease_duration,
            config.heartbeat_interval,
            config.acquisition_retry_interval
        );

        let election = self.clone();
        tasks.push(tokio::spawn(async move {
            election
                .acquire_at_startup(election.inner.shutdown_tx.subscribe())
                .await;
            tokio::join!(
                election.heartbeat_loop(election.inner.shutdown_tx.subscribe()),
                election.retry_loop(election.inner.shutdown_tx.subscribe()),
            );
        }));
    }

    /// 停止循环并在 shutdown_timeout 内尽力释放租约
    pub async fn stop(&self) {
        let shutdown_timeout = self.inner.config.shutdown_timeout;
        if tokio::time::timeout(shutdown_timeout, self.release())
            .await
            .is_err()
        {
            warn!(
                "[RELEASE] Release timed out after {:?}, lease will expire naturally - lock_name: {}",
                shutdown_timeout,
                self.lock_name()
            );
        }

        let handles: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for mut handle in handles {
            if tokio::time::timeout(self.inner.config.operation_timeout, &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }
        info!(
            "[ELECTION] Leader election stopped - lock_name: {}, instance_id: {}",
            self.lock_name(),
            self.instance_id()
        );
    }

    async fn acquire_locked(&self) -> Result<bool, ElectionError> {
        if self.state().is_shutting_down {
            return Ok(false);
        }

        let started = Instant::now();
        let written = self
            .store_call(
                "claim",
                self.inner.store.claim(
                    self.lock_name(),
                    self.instance_id(),
                    self.inner.config.lease_duration,
                ),
            )
            .await?;
        // 条件写入可能静默不生效，以读取结果为准
        let lease = self.current_lease().await?;
        let acquired = lease
            .as_ref()
            .map(|lease| lease.is_held_by(self.instance_id()))
            .unwrap_or(false);

        let was_leader = self.inner.shared.set_leader(acquired);
        if acquired {
            *self.inner.confirmed_until.lock() = Some(started + self.inner.config.lease_duration);
            if !was_leader {
                info!(
                    "[ACQUIRE] Promoted to leader - lock_name: {}, instance_id: {}",
                    self.lock_name(),
                    self.instance_id()
                );
            }
        } else {
            *self.inner.confirmed_until.lock() = None;
            if was_leader {
                warn!(
                    "[ACQUIRE] Lost leader status - lock_name: {}, instance_id: {}",
                    self.lock_name(),
                    self.instance_id()
                );
            }
            debug!(
                "[ACQUIRE] Lease held by another instance - lock_name: {}, instance_id: {}, written: {}, current_holder: {}",
                self.lock_name(),
                self.instance_id(),
                written,
                lease
                    .as_ref()
                    .map(|lease| lease.holder_id.as_str())
                    .unwrap_or("<none>")
            );
        }
        Ok(acquired)
    }

    /// 续期失败时：若上次确认的租约在本地时钟上已过期，放弃领导权
    fn step_down_if_lapsed(&self) -> bool {
        let confirmed_until = *self.inner.confirmed_until.lock();
        let lapsed = confirmed_until
            .map(|until| Instant::now() >= until)
            .unwrap_or(true);
        if lapsed {
            self.inner.shared.set_leader(false);
            warn!(
                "[HEARTBEAT] Lost leader status, lease lapsed without renewal - lock_name: {}, instance_id: {}",
                self.lock_name(),
                self.instance_id()
            );
        }
        self.is_leader()
    }

    async fn acquire_at_startup(&self, mut shutdown: watch::Receiver<bool>) {
        let attempts = self.inner.config.startup_attempts;
        let mut backoff = self.inner.config.startup_backoff;

        for attempt in 1..=attempts {
            let result = {
                let _tick = self.inner.tick_lock.lock().await;
                self.acquire_locked().await
            };

            match result {
                Ok(true) => return,
                Ok(false) => {
                    info!(
                        "[ELECTION] Lease held elsewhere, starting as follower - lock_name: {}, instance_id: {}",
                        self.lock_name(),
                        self.instance_id()
                    );
                    return;
                }
                // 只有存储不可达或超时才值得在启动阶段重试
                Err(e) if e.is_transient() && attempt < attempts => {
                    warn!(
                        "[ELECTION] Startup acquisition attempt {}/{} failed, retrying in {:?} - lock_name: {}, error: {}",
                        attempt,
                        attempts,
                        backoff,
                        self.lock_name(),
                        e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => return,
                    }
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => {
                    error!(
                        "[ELECTION] Startup acquisition failed after {} attempts, continuing as follower - lock_name: {}, error: {}",
                        attempt,
                        self.lock_name(),
                        e
                    );
                    return;
                }
            }
        }
    }

    async fn heartbeat_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.inner.config.heartbeat_interval;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            let state = self.state();
            if state.is_shutting_down {
                break;
            }
            if state.is_leader {
                self.renew().await;
            }
        }
        debug!("[HEARTBEAT] Heartbeat loop stopped - lock_name: {}", self.lock_name());
    }

    async fn retry_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.inner.config.acquisition_retry_interval;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown.changed() => break,
            }
            let state = self.state();
            if state.is_shutting_down {
                break;
            }
            if !state.is_leader {
                self.try_acquire().await;
            }
        }
        debug!("[ELECTION] Retry loop stopped - lock_name: {}", self.lock_name());
    }

    async fn store_call<T, F>(&self, operation: &'static str, call: F) -> Result<T, ElectionError>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let timeout = self.inner.config.operation_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ElectionError::store(operation, e)),
            Err(_) => Err(ElectionError::timeout(operation, timeout)),
        }
    }
}
