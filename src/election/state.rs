use crate::models::Role;
use parking_lot::Mutex;
use tokio::sync::watch;

/// 进程内选举状态，只由获取/续期/释放流程修改
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ElectionState {
    pub is_leader: bool,
    pub is_shutting_down: bool,
}

impl ElectionState {
    pub fn role(&self) -> Role {
        if self.is_shutting_down {
            Role::ShuttingDown
        } else if self.is_leader {
            Role::Leader
        } else {
            Role::Follower
        }
    }

    pub fn effective_leader(&self) -> bool {
        self.is_leader && !self.is_shutting_down
    }
}

/// 选举管理器与 guard 共享的状态；变化通过 watch 广播有效领导权
pub(crate) struct SharedState {
    state: Mutex<ElectionState>,
    leader_tx: watch::Sender<bool>,
}

impl SharedState {
    pub(crate) fn new() -> Self {
        let (leader_tx, _) = watch::channel(false);
        Self {
            state: Mutex::new(ElectionState::default()),
            leader_tx,
        }
    }

    pub(crate) fn snapshot(&self) -> ElectionState {
        *self.state.lock()
    }

    pub(crate) fn is_leader(&self) -> bool {
        self.snapshot().effective_leader()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.leader_tx.subscribe()
    }

    /// 返回修改前的 is_leader
    pub(crate) fn set_leader(&self, is_leader: bool) -> bool {
        let mut state = self.state.lock();
        let previous = state.is_leader;
        state.is_leader = is_leader;
        self.leader_tx.send_replace(state.effective_leader());
        previous
    }

    /// 进入关闭状态（终态），返回是否为首次调用
    pub(crate) fn begin_shutdown(&self) -> bool {
        let mut state = self.state.lock();
        let first = !state.is_shutting_down;
        state.is_shutting_down = true;
        self.leader_tx.send_replace(false);
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles() {
        let mut state = ElectionState::default();
        assert_eq!(state.role(), Role::Follower);

        state.is_leader = true;
        assert_eq!(state.role(), Role::Leader);
        assert!(state.effective_leader());

        state.is_shutting_down = true;
        assert_eq!(state.role(), Role::ShuttingDown);
        assert!(!state.effective_leader());
    }

    #[test]
    fn test_shutdown_is_terminal() {
        let shared = SharedState::new();
        shared.set_leader(true);
        assert!(shared.begin_shutdown());
        assert!(!shared.begin_shutdown());

        shared.set_leader(true);
        assert!(!shared.is_leader());
        assert_eq!(shared.snapshot().role(), Role::ShuttingDown);
    }

    #[test]
    fn test_watch_tracks_effective_leadership() {
        let shared = SharedState::new();
        let rx = shared.subscribe();
        assert!(!*rx.borrow());

        shared.set_leader(true);
        assert!(*rx.borrow());

        shared.begin_shutdown();
        assert!(!*rx.borrow());
    }
}
