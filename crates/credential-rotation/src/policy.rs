//! Lease duration to refresh delay policies
//!
//! A policy answers one question: given a fresh lease of length `L`, how long
//! until the next read? The answer must be strictly less than `L` for any
//! non-zero lease, leaving room for backend latency and at least one retry
//! cycle before the credential expires.

use std::time::Duration;

use crate::error::{Error, Result};

/// Turns a lease duration into the delay before the next refresh.
pub trait LeasePolicy: Send + Sync {
    fn suggested_interval(&self, lease: Duration) -> Duration;
}

impl<F> LeasePolicy for F
where
    F: Fn(Duration) -> Duration + Send + Sync,
{
    fn suggested_interval(&self, lease: Duration) -> Duration {
        self(lease)
    }
}

/// Refresh after a fixed fraction of the lease has elapsed.
///
/// The fraction is always supplied by configuration; there is no default.
#[derive(Debug, Clone, Copy)]
pub struct FractionalLeasePolicy {
    fraction: f64,
}

impl FractionalLeasePolicy {
    /// Fails unless `0 < fraction < 1`.
    pub fn new(fraction: f64) -> Result<Self> {
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(Error::InvalidPolicy(format!(
                "refresh fraction must be strictly between 0 and 1, got {fraction}"
            )));
        }
        Ok(Self { fraction })
    }
}

impl LeasePolicy for FractionalLeasePolicy {
    fn suggested_interval(&self, lease: Duration) -> Duration {
        // Whole milliseconds, rounded down, so the result stays below the lease
        let millis = (lease.as_millis() as f64 * self.fraction).floor();
        Duration::from_millis(millis as u64)
    }
}
