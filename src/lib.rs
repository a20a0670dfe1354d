//! Database-backed leader election for horizontally scaled job runners.
//!
//! Each process builds one [`LeaderElection`] per lock name on top of a shared
//! [`LeaseStore`], calls [`LeaderElection::start`] at startup and
//! [`LeaderElection::stop`] on shutdown. Job schedulers receive a
//! [`LeaderGuard`] and wrap leader-only work with it.

pub mod config;
pub mod election;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod scheduler;
pub mod storage;

pub use config::{Config, ConfigError, ElectionConfig, StorageType};
pub use election::{ElectionState, LeaderElection, LeaderGuard};
pub use error::ElectionError;
pub use models::{Lease, Role};
pub use scheduler::{JobScheduler, JobStats};
pub use storage::{LeaseStore, MemoryLeaseStore, PostgresLeaseStore, RedisLeaseStore};
