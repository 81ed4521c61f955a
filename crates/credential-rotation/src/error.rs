//! Error types for rotation and pool operations

/// Errors surfaced to the caller of rotation setup.
///
/// Background refresh failures never show up here: once the pool is running
/// they are logged and retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("could not fetch initial database credentials for role \"{role}\": {source}")]
    InitialFetch {
        role: String,
        #[source]
        source: vault_client::Error,
    },

    #[error("pool failed to start: {0}")]
    PoolStart(String),

    #[error("rotation already attached for role \"{0}\"")]
    AlreadyAttached(String),

    #[error("invalid lease policy: {0}")]
    InvalidPolicy(String),

    #[error("no tokio runtime available: {0}")]
    Runtime(String),
}

impl Error {
    /// True when setup failed because the backend denied the initial read.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Error::InitialFetch { source, .. } if source.is_access_denied())
    }
}

/// Errors reported by a live pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool is closed")]
    Closed,

    #[error("pool exhausted: {0}")]
    Exhausted(String),

    #[error("pool start failed: {0}")]
    Start(String),

    #[error("eviction failed: {0}")]
    Evict(String),
}

/// Result alias for rotation setup.
pub type Result<T> = std::result::Result<T, Error>;
