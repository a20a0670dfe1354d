use crate::election::LeaderGuard;
use log::{error, info};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// 定时任务调度：每次触发都经过 LeaderGuard，只有领导者执行任务体
pub struct JobScheduler {
    guard: LeaderGuard,
    handles: Vec<(String, JoinHandle<()>)>,
}

/// 单个任务的执行统计
#[derive(Debug, Default)]
pub struct JobStats {
    runs: AtomicU64,
    skips: AtomicU64,
    failures: AtomicU64,
}

impl JobStats {
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn skips(&self) -> u64 {
        self.skips.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl JobScheduler {
    pub fn new(guard: LeaderGuard) -> Self {
        Self {
            guard,
            handles: Vec::new(),
        }
    }

    /// 注册周期任务，首次触发在一个周期之后
    pub fn every<F, Fut>(&mut self, job_name: &str, period: Duration, job: F) -> Arc<JobStats>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let guard = self.guard.clone();
        let stats = Arc::new(JobStats::default());
        let job_stats = stats.clone();
        let name = job_name.to_string();

        info!("[JOB] Scheduling job - job: {}, period: {:?}", name, period);

        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                match guard.run(&name, &job).await {
                    None => {
                        job_stats.skips.fetch_add(1, Ordering::Relaxed);
                    }
                    Some(Ok(())) => {
                        job_stats.runs.fetch_add(1, Ordering::Relaxed);
                    }
                    Some(Err(e)) => {
                        job_stats.runs.fetch_add(1, Ordering::Relaxed);
                        job_stats.failures.fetch_add(1, Ordering::Relaxed);
                        error!("[JOB] Job failed - job: {}, error: {:#}", name, e);
                    }
                }
            }
        });

        self.handles.push((job_name.to_string(), handle));
        stats
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.handles.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// 停止所有任务（正在执行的任务体会被中断）
    pub fn shutdown(&mut self) {
        for (name, handle) in self.handles.drain(..) {
            handle.abort();
            info!("[JOB] Job stopped - job: {}", name);
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        for (_, handle) in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ElectionConfig;
    use crate::election::LeaderElection;
    use crate::storage::memory::MemoryLeaseStore;
    use anyhow::anyhow;

    fn election(store: &Arc<MemoryLeaseStore>, id: &str) -> LeaderElection {
        LeaderElection::with_instance_id(ElectionConfig::default(), store.clone(), id).unwrap()
    }

    #[tokio::test]
    async fn test_jobs_run_only_on_leader() {
        let store = Arc::new(MemoryLeaseStore::new());
        let leader = election(&store, "a");
        let follower = election(&store, "b");
        assert!(leader.try_acquire().await);
        assert!(!follower.try_acquire().await);

        let mut leader_jobs = JobScheduler::new(leader.guard());
        let mut follower_jobs = JobScheduler::new(follower.guard());
        let period = Duration::from_millis(10);
        let leader_stats = leader_jobs.every("session_sweep", period, || async { Ok(()) });
        let follower_stats = follower_jobs.every("session_sweep", period, || async { Ok(()) });

        tokio::time::sleep(Duration::from_millis(75)).await;
        leader_jobs.shutdown();
        follower_jobs.shutdown();

        assert!(leader_stats.runs() >= 3);
        assert_eq!(leader_stats.skips(), 0);
        assert_eq!(follower_stats.runs(), 0);
        assert!(follower_stats.skips() >= 3);
    }

    #[tokio::test]
    async fn test_job_failures_are_counted() {
        let store = Arc::new(MemoryLeaseStore::new());
        let leader = election(&store, "a");
        assert!(leader.try_acquire().await);

        let mut jobs = JobScheduler::new(leader.guard());
        let stats = jobs.every("gl_balance_check", Duration::from_millis(10), || async {
            Err(anyhow!("GL imbalance detected"))
        });
        assert_eq!(jobs.job_names(), vec!["gl_balance_check"]);

        tokio::time::sleep(Duration::from_millis(45)).await;
        jobs.shutdown();

        assert!(stats.failures() >= 2);
        assert_eq!(stats.failures(), stats.runs());
    }
}
