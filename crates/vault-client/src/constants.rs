//! Vault HTTP API constants

/// Header carrying the client token on every request
pub const TOKEN_HEADER: &str = "X-Vault-Token";

/// Prefix for all logical paths on the HTTP API
pub const API_PREFIX: &str = "v1";

/// Path segment between a database mount and the role name
pub const CREDS_SEGMENT: &str = "creds";

/// Environment variable holding the client token
pub const TOKEN_ENV: &str = "VAULT_TOKEN";
