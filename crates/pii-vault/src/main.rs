//! `pii-vault`: HTTP service entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline (JSON logs, optional OTLP).
//! 3. Build the Vault transit client and wait for Vault to answer.
//! 4. Provision the transit mount and key if configured to.
//! 5. Open the store, wait for it, and create the schema.
//! 6. Make sure an active DEK exists.
//! 7. Build the Axum router and serve HTTP.
//!
//! Any failure before step 7 aborts the process.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use pii_vault::kms::{bootstrap, KeyWrapper, VaultTransitClient};
use pii_vault::lifecycle::{EnvelopeKeyLifecycle, RecoveryPolicy};
use pii_vault::server::{router, state::AppState};
use pii_vault::{startup, store, telemetry, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        http_port = cfg.http_port,
        store_backend = ?cfg.store_backend,
        "pii-vault starting"
    );
    if cfg.recovery_policy() == RecoveryPolicy::PurgeOnKeyLoss {
        warn!("DEV_MODE is on: lost KMS key material will wipe all stored records");
    }

    let result = run(cfg).await;
    telemetry::shutdown_telemetry();
    result
}

async fn run(cfg: Config) -> Result<()> {
    // -----------------------------------------------------------------------
    // 3. KMS
    // -----------------------------------------------------------------------
    let kms = VaultTransitClient::from_config(&cfg).context("failed to build Vault client")?;
    startup::wait_until_ready("vault", &cfg.kms_probe(), || kms.probe()).await?;

    // -----------------------------------------------------------------------
    // 4. Transit bootstrap
    // -----------------------------------------------------------------------
    if cfg.bootstrap_transit {
        bootstrap::ensure_transit_key(&kms)
            .await
            .context("failed to provision transit key")?;
    }

    // -----------------------------------------------------------------------
    // 5. Store
    // -----------------------------------------------------------------------
    let store = store::open(&cfg);
    startup::wait_until_ready("store", &cfg.store_probe(), || store.ping()).await?;
    store.init_schema().await.context("failed to create schema")?;

    // -----------------------------------------------------------------------
    // 6. Active DEK
    // -----------------------------------------------------------------------
    let lifecycle = Arc::new(EnvelopeKeyLifecycle::new(
        Arc::new(kms),
        store.clone(),
        cfg.logical_name.clone(),
        cfg.kek_id(),
        cfg.recovery_policy(),
    ));
    let key_id = lifecycle
        .ensure_active_key()
        .await
        .context("failed to ensure an active DEK")?;
    info!(key_id, logical_name = %cfg.logical_name, "active DEK ready");

    // -----------------------------------------------------------------------
    // 7. HTTP server
    // -----------------------------------------------------------------------
    let app = router::build(AppState::new(lifecycle, store));

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], cfg.http_port).into();
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
