//! One-time transit engine provisioning run at startup.
//!
//! Mounts the `transit/` secrets engine and creates the wrapping key if
//! either is missing. Both steps are no-ops on an already provisioned server.

use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tracing::info;

use super::{KmsError, VaultTransitClient};

/// Ensure the transit engine is mounted and the client's key exists.
///
/// # Errors
///
/// Returns [`KmsError::Dependency`] if any provisioning call fails.
pub async fn ensure_transit_key(client: &VaultTransitClient) -> Result<(), KmsError> {
    ensure_transit_mount(client).await?;

    let path = format!("/v1/transit/keys/{}", client.key_name());
    let resp = client.request(Method::GET, &path).send().await?;
    match resp.status() {
        s if s.is_success() => Ok(()),
        StatusCode::NOT_FOUND => {
            let created = client.request(Method::POST, &path).json(&json!({})).send().await?;
            expect_success(created.status(), "create transit key")?;
            info!(key = %client.key_name(), "created transit key");
            Ok(())
        }
        s => Err(KmsError::Dependency(format!("read transit key returned HTTP {s}"))),
    }
}

async fn ensure_transit_mount(client: &VaultTransitClient) -> Result<(), KmsError> {
    let resp = client.request(Method::GET, "/v1/sys/mounts").send().await?;
    expect_success(resp.status(), "list mounts")?;
    let mounts: Value = resp.json().await?;

    if has_transit_mount(&mounts) {
        return Ok(());
    }

    let resp = client
        .request(Method::POST, "/v1/sys/mounts/transit")
        .json(&json!({ "type": "transit" }))
        .send()
        .await?;
    expect_success(resp.status(), "mount transit engine")?;
    info!("mounted transit secrets engine");
    Ok(())
}

/// Newer Vault versions nest mounts under `data`; older ones list them at top level.
fn has_transit_mount(mounts: &Value) -> bool {
    mounts
        .get("data")
        .and_then(|d| d.get("transit/"))
        .or_else(|| mounts.get("transit/"))
        .is_some()
}

fn expect_success(status: StatusCode, what: &str) -> Result<(), KmsError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(KmsError::Dependency(format!("{what} returned HTTP {status}")))
    }
}
