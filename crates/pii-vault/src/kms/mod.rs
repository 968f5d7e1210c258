//! DEK wrap/unwrap through an external key-management service.
//!
//! The KMS is the sole holder of the wrapping key (KEK). Callers hand it
//! plaintext DEK bytes and get back an opaque ciphertext string, or the
//! reverse. Neither call touches the caller's persisted state.
//!
//! # Error kinds
//!
//! [`KmsError`] is a plain value returned from every call. The lifecycle layer
//! matches on [`KmsError::KeyMaterialLost`] to decide whether recovery
//! applies; every other failure is [`KmsError::Dependency`].

pub mod bootstrap;
pub mod vault;

pub use vault::VaultTransitClient;

use async_trait::async_trait;
use thiserror::Error;
use zeroize::Zeroizing;

/// Errors produced by the KMS client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KmsError {
    /// The KMS answered, but no longer has the key material needed to unwrap
    /// this ciphertext (e.g. a dev-mode Vault restarted with empty storage).
    #[error("KMS cannot unwrap the DEK, key material lost: {reason}")]
    KeyMaterialLost { reason: String },

    /// Network failure, timeout, unexpected status, or malformed response.
    #[error("KMS request failed: {0}")]
    Dependency(String),
}

impl From<reqwest::Error> for KmsError {
    fn from(e: reqwest::Error) -> Self {
        KmsError::Dependency(e.to_string())
    }
}

/// Wraps and unwraps DEK bytes under a KEK that never leaves the KMS.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyWrapper: Send + Sync {
    /// Wrap plaintext key bytes; returns the KMS's opaque ciphertext.
    async fn wrap(&self, plaintext_key: &[u8]) -> Result<String, KmsError>;

    /// Unwrap a ciphertext previously returned by [`KeyWrapper::wrap`].
    async fn unwrap(&self, wrapped: &str) -> Result<Zeroizing<Vec<u8>>, KmsError>;

    /// Readiness check used by the startup probe.
    async fn probe(&self) -> Result<(), KmsError>;
}
