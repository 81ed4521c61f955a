//! Secret backend abstraction consumed by the scheduler

use std::future::Future;
use std::pin::Pin;

use vault_client::{Credential, Lease, VaultClient};

/// Source of dynamically issued database credentials.
///
/// Uses `Pin<Box<dyn Future>>` so the scheduler can hold an
/// `Arc<dyn SecretBackend>`. Every call issues a new credential and lease.
pub trait SecretBackend: Send + Sync {
    fn read_credentials<'a>(
        &'a self,
        mount_path: &'a str,
        role: &'a str,
    ) -> Pin<Box<dyn Future<Output = vault_client::Result<(Credential, Lease)>> + Send + 'a>>;
}

impl SecretBackend for VaultClient {
    fn read_credentials<'a>(
        &'a self,
        mount_path: &'a str,
        role: &'a str,
    ) -> Pin<Box<dyn Future<Output = vault_client::Result<(Credential, Lease)>> + Send + 'a>> {
        Box::pin(self.read_database_credentials(mount_path, role))
    }
}
