//! Pool-side contracts: construction config, start, and runtime handle

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use vault_client::Credential;

use crate::error::PoolError;

/// Settings a pool is constructed from.
///
/// `username` and `password` start empty and are filled in by rotation
/// before the pool is started, then overwritten on every refresh so a pool
/// rebuilt from this config picks up the current credential.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connection string without credentials
    pub url: String,
    pub username: String,
    pub password: Secret<String>,
    pub max_size: usize,
    pub min_idle: usize,
    /// How long a checkout (and the initial connect) may wait
    pub acquire_timeout: Duration,
    /// Connections older than this are retired when returned, which is how
    /// connections in use during a rotation eventually pick up the new login
    pub max_lifetime: Option<Duration>,
}

impl PoolConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: String::new(),
            password: Secret::new(String::new()),
            max_size: 10,
            min_idle: 0,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    pub fn with_max_lifetime(mut self, max_lifetime: Option<Duration>) -> Self {
        self.max_lifetime = max_lifetime;
        self
    }

    /// Checks a factory runs before starting a pool from this config.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.url.is_empty() {
            return Err(PoolError::Start("url must not be empty".into()));
        }
        if self.max_size == 0 {
            return Err(PoolError::Start("max_size must be greater than 0".into()));
        }
        if self.min_idle > self.max_size {
            return Err(PoolError::Start(format!(
                "min_idle ({}) exceeds max_size ({})",
                self.min_idle, self.max_size
            )));
        }
        if self.username.is_empty() {
            return Err(PoolError::Start("no credentials set on pool config".into()));
        }
        Ok(())
    }

    pub(crate) fn set_credential(&mut self, credential: &Credential) {
        self.username = credential.username.clone();
        self.password = credential.password.clone();
    }
}

/// Runtime handle of a started pool.
///
/// All methods must be safe to call while the pool serves traffic.
pub trait LivePool: Send + Sync {
    /// Credentials used for connections opened from now on.
    fn set_credentials(&self, username: &str, password: &Secret<String>);

    /// Retire idle connections opened under older credentials. Connections
    /// in use are left alone and retired when returned. Returns how many idle
    /// connections were evicted.
    fn evict_idle_connections(&self) -> Result<usize, PoolError>;

    fn is_closed(&self) -> bool;
}

/// Builds and starts a pool from a config carrying credentials.
pub trait PoolFactory {
    type Pool: LivePool + 'static;

    fn start(
        &self,
        config: &PoolConfig,
    ) -> impl Future<Output = Result<Arc<Self::Pool>, PoolError>> + Send;
}
