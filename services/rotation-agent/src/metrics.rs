//! Prometheus metrics exposition
//!
//! The rotation core emits through the `metrics` facade; this module installs
//! the exporter the `/metrics` endpoint renders from and describes:
//!
//! - `credential_refresh_total` (counter): labels `role`, `outcome`
//! - `credential_pool_evictions_total` (counter): label `role`
//! - `credential_lease_duration_seconds` (gauge): label `role`

use metrics::Unit;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Fails if a global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe();
    Ok(handle)
}

/// Attach help text to the rotation metrics.
fn describe() {
    metrics::describe_counter!(
        "credential_refresh_total",
        Unit::Count,
        "Credential reads from the secret backend, by outcome"
    );
    metrics::describe_counter!(
        "credential_pool_evictions_total",
        Unit::Count,
        "Soft-eviction requests issued to the live pool after a rotation"
    );
    metrics::describe_gauge!(
        "credential_lease_duration_seconds",
        Unit::Seconds,
        "Lease duration of the most recently applied credential"
    );
}
