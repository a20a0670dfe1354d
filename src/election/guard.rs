use crate::election::state::SharedState;
use log::debug;
use std::future::Future;
use std::sync::Arc;

/// 交给任务调度方的只读句柄：只能查询领导权、按领导权执行任务
#[derive(Clone)]
pub struct LeaderGuard {
    shared: Arc<SharedState>,
    lock_name: Arc<str>,
}

impl LeaderGuard {
    pub(crate) fn new(shared: Arc<SharedState>, lock_name: &str) -> Self {
        Self {
            shared,
            lock_name: Arc::from(lock_name),
        }
    }

    /// 纯内存读取，无 I/O
    pub fn is_leader(&self) -> bool {
        self.shared.is_leader()
    }

    /// 包装同步任务：非领导者时跳过并返回 None，否则执行一次并原样返回结果
    pub fn with_guard<F, T>(
        &self,
        job_name: &str,
        job: F,
    ) -> impl Fn() -> Option<T> + Send + Sync + 'static
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: 'static,
    {
        let guard = self.clone();
        let job_name = job_name.to_string();
        move || {
            if !guard.is_leader() {
                guard.log_skip(&job_name);
                return None;
            }
            Some(job())
        }
    }

    /// 异步任务版本
    pub async fn run<F, Fut, T>(&self, job_name: &str, job: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.is_leader() {
            self.log_skip(job_name);
            return None;
        }
        Some(job().await)
    }

    fn log_skip(&self, job_name: &str) {
        debug!(
            "[JOB] Skipping job on non-leader - job: {}, lock_name: {}",
            job_name, self.lock_name
        );
    }
}
