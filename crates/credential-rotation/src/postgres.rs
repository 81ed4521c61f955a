//! Rotation for sqlx Postgres pools
//!
//! `set_credentials` swaps the pool's connect options, so every connection
//! opened afterwards logs in with the new user. Soft eviction detaches idle
//! connections and lets the pool open replacements; connections in use are
//! never touched and retire through `max_lifetime` once returned.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use common::Secret;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{debug, info};

use crate::error::PoolError;
use crate::pool::{LivePool, PoolConfig, PoolFactory};

impl LivePool for PgPool {
    fn set_credentials(&self, username: &str, password: &Secret<String>) {
        let options = (*self.connect_options())
            .clone()
            .username(username)
            .password(password.expose());
        self.set_connect_options(options);
    }

    fn evict_idle_connections(&self) -> Result<usize, PoolError> {
        let mut evicted = 0;
        for _ in 0..self.num_idle() {
            let Some(conn) = self.try_acquire() else {
                break;
            };
            // Detaching frees the slot; the raw connection is closed on drop
            drop(conn.detach());
            evicted += 1;
        }
        debug!(evicted, size = self.size(), "detached idle connections");
        Ok(evicted)
    }

    fn is_closed(&self) -> bool {
        PgPool::is_closed(self)
    }
}

/// Starts `PgPool`s from a `PoolConfig` carrying credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgPoolFactory {
    lazy: bool,
}

impl PgPoolFactory {
    /// Connect eagerly: `start` fails if the database rejects the login.
    pub fn new() -> Self {
        Self { lazy: false }
    }

    /// Open no connection until the first checkout.
    pub fn lazy() -> Self {
        Self { lazy: true }
    }

    fn prepare(config: &PoolConfig) -> Result<(PgPoolOptions, PgConnectOptions), PoolError> {
        config.validate()?;

        let connect = PgConnectOptions::from_str(&config.url)
            .map_err(|e| PoolError::Start(format!("invalid database url: {e}")))?
            .username(&config.username)
            .password(config.password.expose());

        let max_connections = u32::try_from(config.max_size)
            .map_err(|_| PoolError::Start(format!("max_size {} too large", config.max_size)))?;
        let min_connections = u32::try_from(config.min_idle)
            .map_err(|_| PoolError::Start(format!("min_idle {} too large", config.min_idle)))?;

        let options = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(config.acquire_timeout)
            .max_lifetime(config.max_lifetime);
        Ok((options, connect))
    }
}

impl PoolFactory for PgPoolFactory {
    type Pool = PgPool;

    fn start(
        &self,
        config: &PoolConfig,
    ) -> impl Future<Output = Result<Arc<PgPool>, PoolError>> + Send {
        let prepared = Self::prepare(config);
        let lazy = self.lazy;
        let max_size = config.max_size;

        async move {
            let (options, connect) = prepared?;
            let host = connect.get_host().to_string();
            let username = connect.get_username().to_string();

            let pool = if lazy {
                options.connect_lazy_with(connect)
            } else {
                options
                    .connect_with(connect)
                    .await
                    .map_err(|e| PoolError::Start(e.to_string()))?
            };

            info!(host = %host, username = %username, max_size, lazy, "database pool started");
            Ok(Arc::new(pool))
        }
    }
}
