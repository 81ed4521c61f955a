//! Credential refresh scheduling
//!
//! `RefreshScheduler` drives one pool binding through the rotation state
//! machine. Work is done by single-shot `RotationTask`s handed to a
//! `TaskScheduler`: each task performs one refresh attempt and arms exactly
//! one successor, so refreshes for a binding never overlap and rotation never
//! silently stops while the pool is open.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use vault_client::{Credential, Lease};

use crate::backend::SecretBackend;
use crate::error::{Error, Result};
use crate::policy::LeasePolicy;
use crate::pool::{LivePool, PoolConfig, PoolFactory};
use crate::state::{RotationAction, RotationEvent, RotationState, handle_event};

/// Delay before retrying a failed background refresh.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Floor for lease-derived delays, so a zero or tiny lease cannot spin.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Ceiling for lease-derived delays. Leases are arbitrary seconds counts
/// and must not push a deadline past what the timer can represent.
pub const MAX_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Which credential lineage to rotate.
#[derive(Debug, Clone)]
pub struct RotationConfig {
    /// Database secrets engine mount, e.g. `postgresql/preprod`
    pub mount_path: String,
    pub role: String,
    pub retry_delay: Duration,
}

impl RotationConfig {
    pub fn new(mount_path: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            mount_path: mount_path.into(),
            role: role.into(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Logical path credentials are read from.
    pub fn secret_path(&self) -> String {
        vault_client::credentials_path(&self.mount_path, &self.role)
    }
}

/// Delayed-task facility rotation tasks are armed on.
pub trait TaskScheduler: Send + Sync {
    /// Run `task` once after `delay`.
    fn schedule(&self, delay: Duration, task: RotationTask);
}

/// `TaskScheduler` backed by a tokio runtime: one sleeping task per firing.
#[derive(Debug, Clone)]
pub struct TokioTaskScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioTaskScheduler {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is running on.
    pub fn try_current() -> Result<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|e| Error::Runtime(e.to_string()))
    }
}

impl TaskScheduler for TokioTaskScheduler {
    fn schedule(&self, delay: Duration, task: RotationTask) {
        let now = tokio::time::Instant::now();
        let deadline = now
            .checked_add(delay)
            .unwrap_or_else(|| now + MAX_REFRESH_INTERVAL);
        self.handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            task.run().await;
        });
    }
}

/// Mutable progress of a binding, reported by `health()`.
struct Progress {
    state: RotationState,
    username: Option<String>,
    lease: Option<Lease>,
    succeeded: u64,
    failed: u64,
}

/// Rotates the credentials of exactly one pool.
///
/// Holds only a `Weak` reference to the pool: whoever started it owns it, and
/// dropping the last `Arc` counts as closing it.
pub struct RefreshScheduler {
    backend: Arc<dyn SecretBackend>,
    timer: Arc<dyn TaskScheduler>,
    policy: Arc<dyn LeasePolicy>,
    rotation: RotationConfig,
    pool_config: Mutex<PoolConfig>,
    binding: OnceLock<Weak<dyn LivePool>>,
    attaching: AtomicBool,
    progress: Mutex<Progress>,
    /// Serializes `refresh_once`
    refresh_lock: Mutex<()>,
}

impl RefreshScheduler {
    pub fn new(
        backend: Arc<dyn SecretBackend>,
        timer: Arc<dyn TaskScheduler>,
        policy: Arc<dyn LeasePolicy>,
        rotation: RotationConfig,
        pool_config: PoolConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            timer,
            policy,
            rotation,
            pool_config: Mutex::new(pool_config),
            binding: OnceLock::new(),
            attaching: AtomicBool::new(false),
            progress: Mutex::new(Progress {
                state: RotationState::Unbound,
                username: None,
                lease: None,
                succeeded: 0,
                failed: 0,
            }),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Fetch the first credential, start the pool with it, and begin rotating.
    ///
    /// The first read happens before the pool exists, so a bad token, role or
    /// address fails here with `Error::InitialFetch` and no pool is started.
    /// On success the first rotation task is armed at the policy interval
    /// and the started pool is returned.
    pub async fn attach<F: PoolFactory>(self: &Arc<Self>, factory: &F) -> Result<Arc<F::Pool>> {
        if self.binding.get().is_some() || self.attaching.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyAttached(self.rotation.role.clone()));
        }

        info!(
            role = %self.rotation.role,
            path = %self.rotation.secret_path(),
            "fetching initial database credentials"
        );
        let lease = match self.refresh_once().await {
            Ok(lease) => lease,
            Err(source) => {
                self.attaching.store(false, Ordering::SeqCst);
                return Err(Error::InitialFetch {
                    role: self.rotation.role.clone(),
                    source,
                });
            }
        };

        let config = self.pool_config().await;
        let pool = match factory.start(&config).await {
            Ok(pool) => pool,
            Err(e) => {
                self.attaching.store(false, Ordering::SeqCst);
                return Err(Error::PoolStart(e.to_string()));
            }
        };

        let weak = Arc::downgrade(&pool);
        let weak: Weak<dyn LivePool> = weak;
        // Cannot already be set: `attaching` stays true from here on
        let _ = self.binding.set(weak);

        let interval = self.next_interval(&lease);
        if let RotationAction::Arm { delay } = self.advance(RotationEvent::Bound { interval }).await {
            self.arm(delay);
        }
        Ok(pool)
    }

    /// Read a new credential and apply it to the config and, once bound, the
    /// live pool. Returns the lease of the applied credential.
    ///
    /// On error nothing is applied; config and pool keep the last good
    /// credential.
    pub async fn refresh_once(&self) -> vault_client::Result<Lease> {
        let _serial = self.refresh_lock.lock().await;
        let role = self.rotation.role.as_str();

        info!(role, "renewing database credentials");
        let (credential, lease) = match self
            .backend
            .read_credentials(&self.rotation.mount_path, role)
            .await
        {
            Ok(issued) => issued,
            Err(e) => {
                crate::metrics::record_refresh_failure(role, e.is_access_denied());
                self.progress.lock().await.failed += 1;
                return Err(e);
            }
        };
        info!(
            role,
            username = %credential.username,
            lease_id = %lease.id,
            lease_duration_secs = lease.duration.as_secs(),
            "got new credentials"
        );

        self.apply(&credential).await;

        crate::metrics::record_refresh_success(role, lease.duration.as_secs());
        let mut progress = self.progress.lock().await;
        progress.succeeded += 1;
        progress.username = Some(credential.username);
        progress.lease = Some(lease.clone());
        Ok(lease)
    }

    /// Push a credential into the stored config and the bound pool.
    ///
    /// Eviction is best effort: a failure is logged and the refresh still
    /// counts as applied.
    async fn apply(&self, credential: &Credential) {
        self.pool_config.lock().await.set_credential(credential);

        let Some(pool) = self.binding.get().and_then(|weak| weak.upgrade()) else {
            return;
        };
        pool.set_credentials(&credential.username, &credential.password);
        crate::metrics::record_eviction(&self.rotation.role);
        match pool.evict_idle_connections() {
            Ok(evicted) => debug!(role = %self.rotation.role, evicted, "soft-evicted idle connections"),
            Err(e) => warn!(
                role = %self.rotation.role,
                error = %e,
                "idle connection eviction failed, new credentials still applied"
            ),
        }
    }

    /// True once the bound pool reports closed or has been dropped.
    fn pool_closed(&self) -> bool {
        match self.binding.get() {
            Some(weak) => weak.upgrade().is_none_or(|pool| pool.is_closed()),
            None => false,
        }
    }

    /// Delay before the next refresh: the policy's suggestion, pulled below
    /// a non-zero lease by one retry delay if it would outlive it, then kept
    /// within `MIN_REFRESH_INTERVAL..=MAX_REFRESH_INTERVAL`.
    fn next_interval(&self, lease: &Lease) -> Duration {
        let suggested = self.policy.suggested_interval(lease.duration);
        let mut interval = suggested;
        if !lease.duration.is_zero() && suggested >= lease.duration {
            interval = lease.duration.saturating_sub(self.rotation.retry_delay);
            warn!(
                role = %self.rotation.role,
                lease_ms = lease.duration.as_millis() as u64,
                suggested_ms = suggested.as_millis() as u64,
                clamped_ms = interval.as_millis() as u64,
                "lease policy suggested refreshing after the lease expires, refreshing earlier"
            );
        }
        interval.clamp(MIN_REFRESH_INTERVAL, MAX_REFRESH_INTERVAL)
    }

    async fn advance(&self, event: RotationEvent) -> RotationAction {
        let mut progress = self.progress.lock().await;
        let (state, action) = handle_event(progress.state, event);
        if state != progress.state {
            debug!(
                role = %self.rotation.role,
                from = progress.state.label(),
                to = state.label(),
                "rotation state changed"
            );
        }
        progress.state = state;
        action
    }

    fn arm(self: &Arc<Self>, delay: Duration) {
        debug!(
            role = %self.rotation.role,
            delay_ms = delay.as_millis() as u64,
            "armed next credential refresh"
        );
        self.timer.schedule(
            delay,
            RotationTask {
                scheduler: Arc::clone(self),
            },
        );
    }

    /// Snapshot of the stored pool config.
    pub async fn pool_config(&self) -> PoolConfig {
        self.pool_config.lock().await.clone()
    }

    pub async fn state(&self) -> RotationState {
        self.progress.lock().await.state
    }

    /// Rotation summary for the health endpoint. Never includes the password.
    pub async fn health(&self) -> serde_json::Value {
        let progress = self.progress.lock().await;
        serde_json::json!({
            "state": progress.state.label(),
            "role": self.rotation.role,
            "mount_path": self.rotation.mount_path,
            "username": progress.username,
            "lease_id": progress.lease.as_ref().map(|l| l.id.clone()),
            "lease_duration_secs": progress.lease.as_ref().map(|l| l.duration.as_secs()),
            "lease_renewable": progress.lease.as_ref().map(|l| l.renewable),
            "refreshes_succeeded": progress.succeeded,
            "refreshes_failed": progress.failed,
        })
    }
}

/// One scheduled refresh attempt for a binding.
pub struct RotationTask {
    scheduler: Arc<RefreshScheduler>,
}

impl RotationTask {
    /// Perform the attempt and arm the successor.
    ///
    /// Stops without touching credentials if the pool is closed. Failures,
    /// including a panic inside the refresh, become a retry after the fixed
    /// delay.
    pub async fn run(self) {
        let scheduler = self.scheduler;
        let role = scheduler.rotation.role.as_str();

        let pool_closed = scheduler.pool_closed();
        match scheduler.advance(RotationEvent::TimerFired { pool_closed }).await {
            RotationAction::Refresh => {}
            RotationAction::Stop => {
                info!(role, "pool is closed, stopping credential rotation");
                return;
            }
            other => {
                debug!(role, ?other, "ignoring stray rotation firing");
                return;
            }
        }

        let retry_in = scheduler.rotation.retry_delay;
        let event = match AssertUnwindSafe(scheduler.refresh_once()).catch_unwind().await {
            Ok(Ok(lease)) => RotationEvent::RefreshSucceeded {
                interval: scheduler.next_interval(&lease),
            },
            Ok(Err(e)) => {
                if e.is_access_denied() {
                    error!(role, error = %e, "secret backend denied permission to fetch database credentials");
                } else {
                    error!(role, error = %e, "could not fetch database credentials");
                }
                warn!(
                    role,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "waiting before trying to get new credentials"
                );
                RotationEvent::RefreshFailed { retry_in }
            }
            Err(_) => {
                error!(role, "credential refresh panicked, scheduling retry");
                crate::metrics::record_refresh_failure(role, false);
                scheduler.progress.lock().await.failed += 1;
                RotationEvent::RefreshFailed { retry_in }
            }
        };

        if let RotationAction::Arm { delay } = scheduler.advance(event).await {
            scheduler.arm(delay);
        }
    }
}
