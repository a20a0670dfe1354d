//! Multi-instance election scenarios.
//!
//! Every simulated instance is a separate `LeaderElection` with its own
//! instance id; they coordinate only through one shared `MemoryLeaseStore`,
//! the way separate processes coordinate through the shared database.
//! Durations are scaled down to milliseconds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;

use cron_leader::{ElectionConfig, LeaderElection, Lease, LeaseStore, MemoryLeaseStore, Role};

const LOCK: &str = "cron_leader";

/// lease 300ms, heartbeat 100ms, retry 50ms
fn fast_config() -> ElectionConfig {
    ElectionConfig::new(LOCK)
        .with_lease_duration(Duration::from_millis(300))
        .with_heartbeat_interval(Duration::from_millis(100))
        .with_acquisition_retry_interval(Duration::from_millis(50))
        .with_operation_timeout(Duration::from_millis(50))
        .with_startup_retries(3, Duration::from_millis(10))
        .with_shutdown_timeout(Duration::from_millis(200))
}

fn instance(store: &Arc<MemoryLeaseStore>, id: &str) -> LeaderElection {
    LeaderElection::with_instance_id(fast_config(), store.clone(), id).unwrap()
}

async fn wait_for_leader(election: &LeaderElection, within: Duration) -> bool {
    let mut rx = election.subscribe();
    tokio::time::timeout(within, rx.wait_for(|leader| *leader))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_instances_elect_exactly_one_leader() {
    let store = Arc::new(MemoryLeaseStore::new());
    let instances: Vec<LeaderElection> = (0..8)
        .map(|i| instance(&store, &format!("instance-{}", i)))
        .collect();

    let mut set = JoinSet::new();
    for election in instances.iter().cloned() {
        set.spawn(async move { election.try_acquire().await });
    }

    let mut winners = 0;
    while let Some(result) = set.join_next().await {
        if result.unwrap() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    let leaders: Vec<&LeaderElection> = instances.iter().filter(|e| e.is_leader()).collect();
    assert_eq!(leaders.len(), 1);

    let lease = store.get(LOCK).await.unwrap().unwrap();
    assert_eq!(lease.holder_id, leaders[0].instance_id());
}

#[tokio::test]
async fn follower_takes_over_after_leader_crash() {
    let store = Arc::new(MemoryLeaseStore::new());

    // a 获取租约后崩溃：不续期也不释放
    let crashed = instance(&store, "a");
    assert!(crashed.try_acquire().await);
    drop(crashed);

    let b = instance(&store, "b");
    b.start();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!b.is_leader());

    assert!(wait_for_leader(&b, Duration::from_secs(2)).await);
    assert_eq!(store.get(LOCK).await.unwrap().unwrap().holder_id, "b");
    b.stop().await;
}

#[tokio::test]
async fn stale_row_is_reclaimed_immediately() {
    let store = Arc::new(MemoryLeaseStore::new());
    let past = Utc::now() - chrono::Duration::seconds(120);
    store.insert(Lease::new(LOCK, "a", past, past + chrono::Duration::seconds(30)));

    let b = instance(&store, "b");
    assert!(b.try_acquire().await);
    assert_eq!(b.role(), Role::Leader);
}

#[tokio::test]
async fn leader_steps_down_when_row_is_overwritten() {
    let store = Arc::new(MemoryLeaseStore::new());
    let a = instance(&store, "a");
    a.start();
    assert!(wait_for_leader(&a, Duration::from_secs(1)).await);

    // 另一个进程在两次心跳之间改写了持有者
    let now = Utc::now();
    store.insert(Lease::new(LOCK, "b", now, now + chrono::Duration::seconds(30)));

    let mut rx = a.subscribe();
    let stepped_down = tokio::time::timeout(Duration::from_secs(1), rx.wait_for(|leader| !*leader))
        .await
        .is_ok();
    assert!(stepped_down);
    assert_eq!(a.role(), Role::Follower);

    // 新持有者的租约仍有效，重试循环不会抢回
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(!a.is_leader());
    assert_eq!(store.get(LOCK).await.unwrap().unwrap().holder_id, "b");

    a.stop().await;
    assert_eq!(store.get(LOCK).await.unwrap().unwrap().holder_id, "b");
}

#[tokio::test]
async fn release_of_foreign_lease_is_skipped() {
    let store = Arc::new(MemoryLeaseStore::new());
    let a = instance(&store, "a");
    let b = instance(&store, "b");
    assert!(a.try_acquire().await);

    b.stop().await;
    b.stop().await;
    assert_eq!(store.get(LOCK).await.unwrap().unwrap().holder_id, "a");
    assert!(a.is_leader());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn graceful_handover_without_overlap() {
    let store = Arc::new(MemoryLeaseStore::new());
    let a = instance(&store, "a");
    let b = instance(&store, "b");

    a.start();
    assert!(wait_for_leader(&a, Duration::from_secs(1)).await);
    b.start();

    // 采样两个实例，记录是否出现过同时为领导者
    let overlap = Arc::new(AtomicBool::new(false));
    let a_gap = Arc::new(AtomicBool::new(false));
    let stop_sampling = Arc::new(AtomicBool::new(false));
    let sampler = {
        let (a, b) = (a.clone(), b.clone());
        let (overlap, stop_sampling) = (overlap.clone(), stop_sampling.clone());
        tokio::spawn(async move {
            while !stop_sampling.load(Ordering::SeqCst) {
                if a.is_leader() && b.is_leader() {
                    overlap.store(true, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    // a 连续保持领导权超过 3 个心跳周期
    let initial_expiry = store.get(LOCK).await.unwrap().unwrap().expires_at;
    for _ in 0..35 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if !a.is_leader() || b.is_leader() {
            a_gap.store(true, Ordering::SeqCst);
        }
    }
    assert!(!a_gap.load(Ordering::SeqCst));
    let renewed = store.get(LOCK).await.unwrap().unwrap();
    assert_eq!(renewed.holder_id, "a");
    assert!(renewed.expires_at > initial_expiry);

    a.stop().await;
    assert_eq!(a.role(), Role::ShuttingDown);

    // b 在下一个重试周期内接管，无需等待租约过期
    assert!(wait_for_leader(&b, Duration::from_millis(200)).await);
    assert_eq!(store.get(LOCK).await.unwrap().unwrap().holder_id, "b");

    stop_sampling.store(true, Ordering::SeqCst);
    sampler.await.unwrap();
    assert!(!overlap.load(Ordering::SeqCst));

    b.stop().await;
    assert!(store.get(LOCK).await.unwrap().is_none());
}

#[tokio::test]
async fn independent_lock_names_elect_independently() {
    let store = Arc::new(MemoryLeaseStore::new());
    let cron = LeaderElection::with_instance_id(fast_config(), store.clone(), "a").unwrap();
    let reports = LeaderElection::with_instance_id(
        ElectionConfig {
            lock_name: "report_leader".to_string(),
            ..fast_config()
        },
        store.clone(),
        "b",
    )
    .unwrap();

    assert!(cron.try_acquire().await);
    assert!(reports.try_acquire().await);
    assert_eq!(store.len(), 2);

    cron.release().await;
    assert!(reports.is_leader());
    assert!(store.get("report_leader").await.unwrap().is_some());
}
