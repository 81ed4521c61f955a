//! Rotation metrics
//!
//! Emitted through the `metrics` facade; the host installs the exporter.
//!
//! - `credential_refresh_total` (counter): labels `role`, `outcome`
//!   (`success`, `failure`, `access_denied`)
//! - `credential_pool_evictions_total` (counter): label `role`
//! - `credential_lease_duration_seconds` (gauge): label `role`

/// Record a successful read and the lease it came with.
pub fn record_refresh_success(role: &str, lease_secs: u64) {
    metrics::counter!("credential_refresh_total", "role" => role.to_string(), "outcome" => "success")
        .increment(1);
    metrics::gauge!("credential_lease_duration_seconds", "role" => role.to_string())
        .set(lease_secs as f64);
}

/// Record a failed read.
pub fn record_refresh_failure(role: &str, access_denied: bool) {
    let outcome = if access_denied { "access_denied" } else { "failure" };
    metrics::counter!("credential_refresh_total", "role" => role.to_string(), "outcome" => outcome)
        .increment(1);
}

/// Record one soft-eviction request against the live pool.
pub fn record_eviction(role: &str) {
    metrics::counter!("credential_pool_evictions_total", "role" => role.to_string()).increment(1);
}
