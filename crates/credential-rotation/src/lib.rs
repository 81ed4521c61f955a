//! Credential rotation for live database connection pools
//!
//! Keeps a running pool authenticated with short-lived credentials issued by
//! Vault's database secrets engine. One `RefreshScheduler` owns exactly one
//! credential lineage for exactly one pool.
//!
//! Rotation lifecycle:
//! 1. `RefreshScheduler::attach()` reads the first credential and fails fast
//!    if the backend rejects it; the pool is never started in that case
//! 2. The pool is started from the config carrying that credential
//! 3. A `RotationTask` is armed at the delay the `LeasePolicy` derives from
//!    the lease
//! 4. Each firing reads a new credential, pushes it into the pool, soft-evicts
//!    idle connections, and arms exactly one successor
//! 5. Failed reads are logged and retried after a fixed delay, forever
//! 6. The first firing that finds the pool closed (or dropped) stops rotation
//!
//! `PgPoolFactory` starts sqlx Postgres pools, and `PgPool` implements
//! `LivePool`, so the rotated login reaches real database connections.

pub mod backend;
pub mod error;
#[cfg(test)]
mod managed;
pub mod metrics;
pub mod policy;
pub mod pool;
pub mod postgres;
pub mod scheduler;
pub mod state;

pub use backend::SecretBackend;
pub use error::{Error, PoolError, Result};
pub use policy::{FractionalLeasePolicy, LeasePolicy};
pub use pool::{LivePool, PoolConfig, PoolFactory};
pub use postgres::PgPoolFactory;
pub use scheduler::{
    DEFAULT_RETRY_DELAY, MAX_REFRESH_INTERVAL, MIN_REFRESH_INTERVAL, RefreshScheduler,
    RotationConfig, RotationTask, TaskScheduler, TokioTaskScheduler,
};
pub use state::{RotationAction, RotationEvent, RotationState};
pub use vault_client::{Credential, Lease};
