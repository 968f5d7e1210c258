//! [`VaultTransitClient`]: HashiCorp Vault transit engine over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::{KeyWrapper, KmsError};
use crate::config::Config;

/// Header carrying the Vault token.
pub const TOKEN_HEADER: &str = "X-Vault-Token";

/// `/v1/sys/health` codes that mean "the server is up": active, standby,
/// DR secondary, performance standby, and sealed-but-reachable variants.
pub const HEALTHY_STATUS_CODES: [u16; 5] = [200, 429, 472, 473, 499];

/// Substrings of a Vault 400 error that mean the ciphertext can no longer be
/// unwrapped, as opposed to a malformed request.
const KEY_LOSS_MARKERS: [&str; 4] = [
    "invalid ciphertext",
    "encryption key not found",
    "unable to decrypt",
    "message authentication failed",
];

#[derive(Serialize)]
struct EncryptBody<'a> {
    plaintext: &'a str,
}

#[derive(Serialize)]
struct DecryptBody<'a> {
    ciphertext: &'a str,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct EncryptData {
    ciphertext: String,
}

#[derive(Deserialize)]
struct DecryptData {
    plaintext: String,
}

#[derive(Deserialize, Default)]
struct VaultErrors {
    #[serde(default)]
    errors: Vec<String>,
}

/// Client for the transit `encrypt`/`decrypt` endpoints of one named key.
#[derive(Clone)]
pub struct VaultTransitClient {
    http: reqwest::Client,
    addr: String,
    token: String,
    key_name: String,
}

impl std::fmt::Debug for VaultTransitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultTransitClient")
            .field("addr", &self.addr)
            .field("key_name", &self.key_name)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl VaultTransitClient {
    /// Build a client for `key_name` on the Vault server at `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`KmsError::Dependency`] if the HTTP client cannot be built.
    pub fn new(
        addr: impl Into<String>,
        token: impl Into<String>,
        key_name: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, KmsError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            addr: addr.into().trim_end_matches('/').to_owned(),
            token: token.into(),
            key_name: key_name.into(),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, KmsError> {
        Self::new(
            &cfg.vault_addr,
            &cfg.vault_token,
            &cfg.vault_transit_key,
            cfg.kms_timeout(),
        )
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    /// Authenticated request to `path` (which must start with `/`).
    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.addr, path))
            .header(TOKEN_HEADER, &self.token)
    }
}

#[async_trait]
impl KeyWrapper for VaultTransitClient {
    async fn wrap(&self, plaintext_key: &[u8]) -> Result<String, KmsError> {
        let encoded = Zeroizing::new(STANDARD.encode(plaintext_key));
        let resp = self
            .request(Method::POST, &format!("/v1/transit/encrypt/{}", self.key_name))
            .json(&EncryptBody {
                plaintext: encoded.as_str(),
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "KMS wrap rejected");
            return Err(KmsError::Dependency(format!(
                "wrap returned HTTP {status}: {}",
                vault_error_text(&body)
            )));
        }

        let envelope: Envelope<EncryptData> = resp.json().await?;
        debug!(key = %self.key_name, "DEK wrapped");
        Ok(envelope.data.ciphertext)
    }

    async fn unwrap(&self, wrapped: &str) -> Result<Zeroizing<Vec<u8>>, KmsError> {
        let resp = self
            .request(Method::POST, &format!("/v1/transit/decrypt/{}", self.key_name))
            .json(&DecryptBody {
                ciphertext: wrapped,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let err = classify_unwrap_failure(status, &body);
            warn!(status = status.as_u16(), error = %err, "KMS unwrap rejected");
            return Err(err);
        }

        let envelope: Envelope<DecryptData> = resp.json().await?;
        let plaintext = Zeroizing::new(envelope.data.plaintext);
        STANDARD
            .decode(plaintext.as_bytes())
            .map(Zeroizing::new)
            .map_err(|_| KmsError::Dependency("unwrap returned non-base64 plaintext".into()))
    }

    async fn probe(&self) -> Result<(), KmsError> {
        let resp = self
            .http
            .get(format!("{}/v1/sys/health", self.addr))
            .send()
            .await?;
        let code = resp.status().as_u16();
        if HEALTHY_STATUS_CODES.contains(&code) {
            Ok(())
        } else {
            Err(KmsError::Dependency(format!("health check returned HTTP {code}")))
        }
    }
}

/// Decide whether a failed decrypt means the key material is gone.
///
/// Only a 400 whose error text names an unusable ciphertext or missing key
/// counts as [`KmsError::KeyMaterialLost`].
fn classify_unwrap_failure(status: StatusCode, body: &str) -> KmsError {
    let text = vault_error_text(body);
    if status == StatusCode::BAD_REQUEST {
        let lower = text.to_lowercase();
        if KEY_LOSS_MARKERS.iter().any(|m| lower.contains(m)) {
            return KmsError::KeyMaterialLost { reason: text };
        }
    }
    KmsError::Dependency(format!("unwrap returned HTTP {status}: {text}"))
}

/// Flatten Vault's `{"errors": [...]}` body; falls back to the raw body.
fn vault_error_text(body: &str) -> String {
    match serde_json::from_str::<VaultErrors>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join("; "),
        _ => body.trim().to_owned(),
    }
}
