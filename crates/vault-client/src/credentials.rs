//! Credential and lease types returned by the database secrets engine
//!
//! A `Credential` is an immutable snapshot: each rotation produces a new one
//! rather than mutating the previous. The `Lease` that comes with it is not
//! persisted anywhere, it only feeds the next refresh delay.

use std::time::Duration;

use common::Secret;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Database username/password pair issued by the backend.
#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub password: Secret<String>,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Secret::new(password.into()),
        }
    }
}

/// Lease metadata attached to a credential.
///
/// `duration` is relative to the moment the backend answered. Zero means the
/// backend attached no expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub id: String,
    pub duration: Duration,
    pub renewable: bool,
}

/// Raw logical read response.
///
/// Only the fields rotation needs are deserialized; `warnings`, `auth` and
/// friends are ignored.
#[derive(Debug, Deserialize)]
pub(crate) struct LogicalResponse {
    #[serde(default)]
    pub lease_id: String,
    /// Seconds until the lease expires (delta, not absolute)
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
    pub data: Option<CredentialData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CredentialData {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl LogicalResponse {
    /// Split the response into the credential and its lease.
    ///
    /// Fails when `data` or either of its fields is missing; an empty
    /// username would otherwise be pushed into a live pool.
    pub(crate) fn into_parts(self, path: &str) -> Result<(Credential, Lease)> {
        let data = self
            .data
            .ok_or_else(|| Error::InvalidResponse(format!("no data returned for {path}")))?;
        let username = data
            .username
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::InvalidResponse(format!("no username returned for {path}")))?;
        let password = data
            .password
            .ok_or_else(|| Error::InvalidResponse(format!("no password returned for {path}")))?;

        Ok((
            Credential {
                username,
                password: Secret::new(password),
            },
            Lease {
                id: self.lease_id,
                duration: Duration::from_secs(self.lease_duration),
                renewable: self.renewable,
            },
        ))
    }
}
