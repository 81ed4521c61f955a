//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The Vault token is loaded from the VAULT_TOKEN env var or token_file,
//! never stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use vault_client::constants::TOKEN_ENV;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub vault: VaultConfig,
    pub rotation: RotationSettings,
    pub pool: PoolSettings,
    #[serde(default)]
    pub agent: AgentConfig,
}

/// Secret backend connection settings
#[derive(Debug, Deserialize)]
pub struct VaultConfig {
    pub address: String,
    #[serde(skip)]
    pub token: Option<Secret<String>>,
    /// Path to a file containing the token (alternative to VAULT_TOKEN env var)
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Which credential to rotate and how often
#[derive(Debug, Deserialize)]
pub struct RotationSettings {
    pub mount_path: String,
    pub role: String,
    /// Share of each lease to wait before refreshing. No default.
    pub refresh_fraction: f64,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

/// Postgres pool settings. Credentials come from Vault, never from `url`.
#[derive(Debug, Deserialize)]
pub struct PoolSettings {
    pub url: String,
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    #[serde(default)]
    pub min_idle: usize,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    /// Connections older than this are closed when returned; 0 disables.
    #[serde(default = "default_max_lifetime")]
    pub max_lifetime_secs: u64,
    /// Start without opening a connection. The initial login is then only
    /// checked on first use.
    #[serde(default)]
    pub connect_lazily: bool,
}

/// Health/metrics listener settings
#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_timeout() -> u64 {
    10
}

fn default_retry_delay() -> u64 {
    5
}

fn default_max_size() -> usize {
    10
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_max_lifetime() -> u64 {
    1800
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9102))
}

fn default_max_connections() -> usize {
    64
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Token resolution order:
    /// 1. VAULT_TOKEN env var
    /// 2. token_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;

        if let Ok(token) = std::env::var(TOKEN_ENV) {
            config.vault.token = Some(Secret::new(token.trim().to_owned()));
        } else if let Some(ref token_file) = config.vault.token_file {
            let token = std::fs::read_to_string(token_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read token_file {}: {e}",
                    token_file.display()
                ))
            })?;
            let token = token.trim().to_owned();
            if !token.is_empty() {
                config.vault.token = Some(Secret::new(token));
            }
        }

        if config
            .vault
            .token
            .as_ref()
            .is_none_or(|t| t.expose().is_empty())
        {
            return Err(common::Error::Config(format!(
                "no Vault token: set {TOKEN_ENV} or vault.token_file"
            )));
        }

        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.vault.address.starts_with("http://") && !self.vault.address.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "vault.address must start with http:// or https://, got: {}",
                self.vault.address
            )));
        }

        if self.vault.timeout_secs == 0 {
            return Err(common::Error::Config(
                "vault.timeout_secs must be greater than 0".into(),
            ));
        }

        if self.rotation.mount_path.trim_matches('/').is_empty() {
            return Err(common::Error::Config(
                "rotation.mount_path must not be empty".into(),
            ));
        }

        if self.rotation.role.is_empty() {
            return Err(common::Error::Config("rotation.role must not be empty".into()));
        }

        let fraction = self.rotation.refresh_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(common::Error::Config(format!(
                "rotation.refresh_fraction must be strictly between 0 and 1, got {fraction}"
            )));
        }

        if self.rotation.retry_delay_secs == 0 {
            return Err(common::Error::Config(
                "rotation.retry_delay_secs must be greater than 0".into(),
            ));
        }

        if self.pool.url.is_empty() {
            return Err(common::Error::Config("pool.url must not be empty".into()));
        }

        if self.pool.max_size == 0 {
            return Err(common::Error::Config(
                "pool.max_size must be greater than 0".into(),
            ));
        }

        if self.pool.min_idle > self.pool.max_size {
            return Err(common::Error::Config(format!(
                "pool.min_idle ({}) exceeds pool.max_size ({})",
                self.pool.min_idle, self.pool.max_size
            )));
        }

        if self.pool.acquire_timeout_secs == 0 {
            return Err(common::Error::Config(
                "pool.acquire_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.agent.max_connections == 0 {
            return Err(common::Error::Config(
                "agent.max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("vault-rotation-agent.toml")
    }
}
