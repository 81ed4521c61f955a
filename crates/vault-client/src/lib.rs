//! Client for dynamic database credentials issued by Vault
//!
//! Reads short-lived username/password pairs from a database secrets engine
//! mount (`<mount>/creds/<role>`) together with their lease metadata. The
//! client is handed an already-issued token; logging in to Vault is the host
//! application's job.
//!
//! Flow:
//! 1. Host builds a `VaultClient` with the backend address and token
//! 2. Rotation calls `read_database_credentials()` before each lease runs out
//! 3. The returned `Credential` is pushed into the pool, the `Lease` decides
//!    when to read again

pub mod client;
pub mod constants;
pub mod credentials;
pub mod error;

pub use client::{VaultClient, credentials_path};
pub use credentials::{Credential, Lease};
pub use error::{Error, Result};
