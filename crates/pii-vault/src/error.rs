//! [`EnvelopeError`]: every failure the encryption core can report.

use common::ServiceError;
use thiserror::Error;

use crate::crypto::CipherError;
use crate::kms::KmsError;
use crate::store::StoreError;

/// Errors surfaced by the key lifecycle and the two pipelines.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error(transparent)]
    Kms(#[from] KmsError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Key bytes returned by the KMS were unusable.
    #[error("unusable DEK: {0}")]
    Cipher(#[from] CipherError),

    /// Sealing or opening one named field failed.
    #[error("field {field}: {source}")]
    Field {
        field: &'static str,
        #[source]
        source: CipherError,
    },

    /// A field decrypted cleanly but is not valid UTF-8.
    #[error("field {field} decrypted to invalid UTF-8")]
    Encoding { field: &'static str },

    /// No active key could be found even after trying to create one.
    #[error("no active encryption key for {0}")]
    NoActiveKey(String),

    /// Key material was still unavailable after the single recovery attempt.
    #[error("key material still unavailable after recovery")]
    RecoveryExhausted,
}

impl EnvelopeError {
    /// `true` if the KMS reported it can no longer unwrap the DEK.
    pub fn is_key_material_lost(&self) -> bool {
        matches!(self, EnvelopeError::Kms(KmsError::KeyMaterialLost { .. }))
    }
}

impl From<EnvelopeError> for ServiceError {
    fn from(err: EnvelopeError) -> Self {
        let msg = err.to_string();
        match err {
            EnvelopeError::Kms(_)
            | EnvelopeError::RecoveryExhausted
            | EnvelopeError::NoActiveKey(_)
            | EnvelopeError::Store(StoreError::Query(_)) => ServiceError::Unavailable(msg),
            EnvelopeError::Field {
                source: CipherError::AuthenticationFailure | CipherError::Truncated(_),
                ..
            }
            | EnvelopeError::Encoding { .. }
            | EnvelopeError::Store(StoreError::Corrupt { .. }) => ServiceError::IntegrityFailure(msg),
            EnvelopeError::Field { .. }
            | EnvelopeError::Cipher(_)
            | EnvelopeError::Store(StoreError::UnknownKey(_)) => ServiceError::Internal(msg),
        }
    }
}
