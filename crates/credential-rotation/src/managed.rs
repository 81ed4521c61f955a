//! In-process pool with generation-tagged connections
//!
//! Test fixture that keeps the bookkeeping a driver pool does around
//! credentials: every connection remembers the credential generation it was
//! opened under. A credential change bumps the generation; soft eviction
//! drops idle connections from older generations, and checked-out ones are
//! retired when they come back. Lets rotation tests observe which login each
//! connection uses without a database.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use common::Secret;
use tracing::{debug, info};

use crate::error::PoolError;
use crate::pool::{LivePool, PoolConfig, PoolFactory};

/// A connection record.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: u64,
    /// User the connection authenticated as
    pub username: String,
    generation: u64,
}

#[derive(Debug)]
struct PoolState {
    username: String,
    password: Secret<String>,
    generation: u64,
    idle: Vec<Connection>,
    checked_out: usize,
    next_id: u64,
}

impl PoolState {
    fn open(&mut self) -> Connection {
        self.next_id += 1;
        Connection {
            id: self.next_id,
            username: self.username.clone(),
            generation: self.generation,
        }
    }
}

/// Connection pool model. See module docs.
#[derive(Debug)]
pub struct ManagedPool {
    url: String,
    max_size: usize,
    state: Mutex<PoolState>,
    closed: AtomicBool,
}

impl ManagedPool {
    /// Start a pool and pre-open `min_idle` connections.
    pub fn new(config: &PoolConfig) -> Arc<Self> {
        let mut state = PoolState {
            username: config.username.clone(),
            password: config.password.clone(),
            generation: 0,
            idle: Vec::with_capacity(config.max_size),
            checked_out: 0,
            next_id: 0,
        };
        for _ in 0..config.min_idle.min(config.max_size) {
            let conn = state.open();
            state.idle.push(conn);
        }
        info!(
            url = %config.url,
            username = %config.username,
            max_size = config.max_size,
            idle = state.idle.len(),
            "pool started"
        );
        Arc::new(Self {
            url: config.url.clone(),
            max_size: config.max_size,
            state: Mutex::new(state),
            closed: AtomicBool::new(false),
        })
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take an idle connection, or open one under the current credentials.
    pub fn checkout(self: &Arc<Self>) -> Result<PooledConnection, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        let mut state = self.state();
        let conn = match state.idle.pop() {
            Some(conn) => conn,
            None if state.checked_out < self.max_size => state.open(),
            None => {
                return Err(PoolError::Exhausted(format!(
                    "all {} connections to {} in use",
                    self.max_size, self.url
                )));
            }
        };
        state.checked_out += 1;
        Ok(PooledConnection {
            pool: Arc::clone(self),
            conn,
        })
    }

    fn release(&self, conn: Connection) {
        let mut state = self.state();
        state.checked_out = state.checked_out.saturating_sub(1);
        if self.is_closed() || conn.generation != state.generation {
            debug!(connection_id = conn.id, "retiring returned connection");
            return;
        }
        state.idle.push(conn);
    }

    /// Username new connections authenticate with.
    pub fn username(&self) -> String {
        self.state().username.clone()
    }

    /// Password new connections authenticate with.
    pub fn password(&self) -> Secret<String> {
        self.state().password.clone()
    }

    pub fn idle_count(&self) -> usize {
        self.state().idle.len()
    }

    pub fn active_count(&self) -> usize {
        self.state().checked_out
    }

    /// Stop handing out connections and drop the idle ones. Connections in
    /// use are retired when returned.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state().idle.clear();
        info!(url = %self.url, "pool closed");
    }
}

impl LivePool for ManagedPool {
    fn set_credentials(&self, username: &str, password: &Secret<String>) {
        let mut state = self.state();
        state.username = username.to_string();
        state.password = password.clone();
        state.generation += 1;
    }

    fn evict_idle_connections(&self) -> Result<usize, PoolError> {
        let mut state = self.state();
        let generation = state.generation;
        let before = state.idle.len();
        state.idle.retain(|conn| conn.generation == generation);
        Ok(before - state.idle.len())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A checked-out connection, returned to the pool on drop.
pub struct PooledConnection {
    pool: Arc<ManagedPool>,
    conn: Connection,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.pool.release(self.conn.clone());
    }
}

/// Starts `ManagedPool`s after validating the config.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManagedPoolFactory;

impl PoolFactory for ManagedPoolFactory {
    type Pool = ManagedPool;

    fn start(
        &self,
        config: &PoolConfig,
    ) -> impl std::future::Future<Output = Result<Arc<ManagedPool>, PoolError>> + Send {
        let result = config.validate().map(|()| ManagedPool::new(config));
        std::future::ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min_idle: usize, max_size: usize) -> PoolConfig {
        let mut config = PoolConfig::new("postgres://db.internal:5432/app")
            .with_max_size(max_size)
            .with_min_idle(min_idle);
        config.username = "v-app-1".into();
        config.password = Secret::new("pw-1".into());
        config
    }

    #[test]
    fn preopens_min_idle_connections() {
        let pool = ManagedPool::new(&config(3, 5));
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(pool.active_count(), 0);
    }

    #[test]
    fn checkout_and_return_reuses_connection() {
        let pool = ManagedPool::new(&config(1, 2));
        let id = {
            let conn = pool.checkout().unwrap();
            assert_eq!(pool.active_count(), 1);
            assert_eq!(conn.username, "v-app-1");
            conn.id
        };
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.checkout().unwrap().id, id);
    }

    #[test]
    fn checkout_fails_when_exhausted() {
        let pool = ManagedPool::new(&config(0, 1));
        let _held = pool.checkout().unwrap();
        assert!(matches!(pool.checkout(), Err(PoolError::Exhausted(_))));
    }

    #[test]
    fn soft_eviction_spares_connections_in_use() {
        let pool = ManagedPool::new(&config(2, 4));
        let held = pool.checkout().unwrap();

        pool.set_credentials("v-app-2", &Secret::new("pw-2".into()));
        let evicted = pool.evict_idle_connections().unwrap();

        assert_eq!(evicted, 1, "only the idle old-generation connection goes");
        assert_eq!(held.username, "v-app-1", "in-use connection keeps working");
        assert_eq!(pool.active_count(), 1);

        drop(held);
        assert_eq!(pool.idle_count(), 0, "stale connection retired on return");

        let fresh = pool.checkout().unwrap();
        assert_eq!(fresh.username, "v-app-2");
    }

    #[test]
    fn eviction_keeps_current_generation() {
        let pool = ManagedPool::new(&config(2, 4));
        assert_eq!(pool.evict_idle_connections().unwrap(), 0);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn closed_pool_rejects_checkout() {
        let pool = ManagedPool::new(&config(2, 4));
        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.idle_count(), 0);
        assert!(matches!(pool.checkout(), Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn factory_rejects_config_without_credentials() {
        let config = PoolConfig::new("postgres://db.internal:5432/app");
        let result = ManagedPoolFactory.start(&config).await;
        assert!(matches!(result, Err(PoolError::Start(_))));
    }

    #[tokio::test]
    async fn factory_rejects_min_idle_above_max_size() {
        let result = ManagedPoolFactory.start(&config(5, 2)).await;
        assert!(matches!(result, Err(PoolError::Start(_))));
    }

    #[tokio::test]
    async fn factory_starts_pool_with_config_credentials() {
        let pool = ManagedPoolFactory.start(&config(1, 2)).await.unwrap();
        assert_eq!(pool.username(), "v-app-1");
        assert_eq!(pool.password().expose(), "pw-1");
    }
}
