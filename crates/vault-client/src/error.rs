//! Error types for secret backend reads

/// Errors from reading the secret backend.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("permission denied: {0}")]
    AccessDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl Error {
    /// True when the backend rejected the token or its policy (401/403).
    ///
    /// Rotation logs these separately: they usually mean a revoked token or a
    /// changed policy rather than a network blip.
    pub fn is_access_denied(&self) -> bool {
        matches!(self, Error::AccessDenied(_))
    }
}

/// Result alias for backend operations.
pub type Result<T> = std::result::Result<T, Error>;
