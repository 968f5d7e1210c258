//! Configuration loading and validation for the vault service and ETL CLI.
//!
//! All values are read from environment variables once, at startup, into a
//! single [`Config`] value that is then passed by reference to every
//! component constructor. Nothing reads the environment after that.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::lifecycle::RecoveryPolicy;
use crate::startup::ProbePolicy;

/// Which [`crate::store::KeyStore`] backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// MySQL via `sqlx`.
    Mysql,
    /// Process-local memory; data is lost on exit.
    Memory,
}

/// Validated service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the Vault server.
    #[serde(default = "default_vault_addr")]
    pub vault_addr: String,

    /// Token sent as `X-Vault-Token`. **Required.**
    pub vault_token: String,

    /// Name of the transit key that wraps every DEK.
    #[serde(default = "default_transit_key")]
    pub vault_transit_key: String,

    /// Per-request timeout (seconds) for KMS calls.
    #[serde(default = "default_kms_timeout")]
    pub kms_timeout_secs: u64,

    /// Create the transit mount and key at startup if they are missing.
    #[serde(default = "default_true")]
    pub bootstrap_transit: bool,

    /// Key family tag stored in `encryption_keys.logical_name`.
    #[serde(default = "default_logical_name")]
    pub logical_name: String,

    #[serde(default = "default_store_backend")]
    pub store_backend: StoreBackend,

    #[serde(default = "default_db_host")]
    pub db_host: String,

    #[serde(default = "default_db_port")]
    pub db_port: u16,

    #[serde(default = "default_db_user")]
    pub db_user: String,

    /// Database password. **Required** when `store_backend` is `mysql`.
    #[serde(default)]
    pub db_password: String,

    #[serde(default = "default_db_name")]
    pub db_name: String,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// Port the HTTP server listens on.
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Startup readiness probe budget for the KMS.
    #[serde(default = "default_kms_wait_attempts")]
    pub kms_wait_attempts: u32,

    #[serde(default = "default_wait_delay_ms")]
    pub kms_wait_delay_ms: u64,

    /// Startup readiness probe budget for the store.
    #[serde(default = "default_store_wait_attempts")]
    pub store_wait_attempts: u32,

    #[serde(default = "default_wait_delay_ms")]
    pub store_wait_delay_ms: u64,

    /// Development mode. When set, a KMS report of lost key material wipes
    /// every stored record and key and starts over with a fresh DEK.
    /// **Destroys data; never enable in production.**
    #[serde(default)]
    pub dev_mode: bool,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// OTLP endpoint. Spans are only exported when this is set.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,
}

fn default_vault_addr() -> String {
    "http://localhost:8200".into()
}
fn default_transit_key() -> String {
    "pii-master".into()
}
fn default_kms_timeout() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_logical_name() -> String {
    "contact_pii".into()
}
fn default_store_backend() -> StoreBackend {
    StoreBackend::Mysql
}
fn default_db_host() -> String {
    "localhost".into()
}
fn default_db_port() -> u16 {
    3306
}
fn default_db_user() -> String {
    "root".into()
}
fn default_db_name() -> String {
    "enc_poc".into()
}
fn default_db_max_connections() -> u32 {
    5
}
fn default_http_port() -> u16 {
    8000
}
fn default_kms_wait_attempts() -> u32 {
    15
}
fn default_store_wait_attempts() -> u32 {
    20
}
fn default_wait_delay_ms() -> u64 {
    2000
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Identifier recorded in `encryption_keys.kek_id` for audit.
    pub fn kek_id(&self) -> String {
        format!("vault-transit:{}", self.vault_transit_key)
    }

    pub fn kms_timeout(&self) -> Duration {
        Duration::from_secs(self.kms_timeout_secs)
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        if self.dev_mode {
            RecoveryPolicy::PurgeOnKeyLoss
        } else {
            RecoveryPolicy::Fail
        }
    }

    pub fn kms_probe(&self) -> ProbePolicy {
        ProbePolicy::new(self.kms_wait_attempts, Duration::from_millis(self.kms_wait_delay_ms))
    }

    pub fn store_probe(&self) -> ProbePolicy {
        ProbePolicy::new(
            self.store_wait_attempts,
            Duration::from_millis(self.store_wait_delay_ms),
        )
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.vault_token, "VAULT_TOKEN")?;
        ensure_non_empty(&self.vault_transit_key, "VAULT_TRANSIT_KEY")?;
        ensure_non_empty(&self.logical_name, "LOGICAL_NAME")?;
        reqwest::Url::parse(&self.vault_addr)
            .with_context(|| format!("VAULT_ADDR is not a valid URL: {}", self.vault_addr))?;

        if self.store_backend == StoreBackend::Mysql {
            ensure_non_empty(&self.db_password, "DB_PASSWORD")?;
            ensure_non_empty(&self.db_host, "DB_HOST")?;
            if self.db_max_connections == 0 {
                anyhow::bail!("DB_MAX_CONNECTIONS must be > 0");
            }
        }
        if self.kms_timeout_secs == 0 {
            anyhow::bail!("KMS_TIMEOUT_SECS must be > 0");
        }
        if self.kms_wait_attempts == 0 {
            anyhow::bail!("KMS_WAIT_ATTEMPTS must be > 0");
        }
        if self.store_wait_attempts == 0 {
            anyhow::bail!("STORE_WAIT_ATTEMPTS must be > 0");
        }
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
