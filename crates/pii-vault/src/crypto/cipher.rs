//! AES-256-GCM encryption and decryption of individual form fields.
//!
//! Every call to [`encrypt_field`] draws a fresh 96-bit nonce from the OS
//! CSPRNG, so two encryptions of the same value never produce the same blob.
//! The field's logical name is bound as AAD: a blob sealed as `"first_name"`
//! will not open as `"last_name"`, which stops fields being swapped between
//! columns of a row.

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use thiserror::Error;

use super::key::Dek;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of an AES-GCM nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the GCM authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// A sealed field value.
///
/// Persisted as `nonce || ciphertext+tag` (see [`EncryptedField::to_bytes`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedField {
    /// Raw nonce bytes.
    pub nonce: [u8; NONCE_LEN],
    /// Raw ciphertext + authentication tag bytes.
    pub ciphertext: Vec<u8>,
}

impl EncryptedField {
    /// Encode to the stored blob layout: the nonce followed by ciphertext+tag.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Split a stored blob back into nonce and ciphertext.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Truncated`] if the blob is shorter than a nonce.
    pub fn from_bytes(blob: &[u8]) -> Result<Self, CipherError> {
        if blob.len() < NONCE_LEN {
            return Err(CipherError::Truncated(blob.len()));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);
        Ok(Self {
            nonce,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// Errors produced by the cipher layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// Key material is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid DEK length: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    /// The stored blob is too short to contain a nonce.
    #[error("encrypted field truncated: {0} bytes is shorter than the {NONCE_LEN}-byte nonce")]
    Truncated(usize),

    /// Tag, key, or label did not match what was used at encryption time.
    #[error("authentication failed: wrong key, wrong label, or tampered ciphertext")]
    AuthenticationFailure,

    /// AES-GCM refused to encrypt (unreachable with a valid key and bounded input).
    #[error("aead encryption failed")]
    EncryptionFailure,
}

/// Encrypt `plaintext` under `dek`, binding `label` as additional authenticated data.
///
/// # Errors
///
/// Returns [`CipherError::EncryptionFailure`] on an internal AEAD error.
pub fn encrypt_field(dek: &Dek, plaintext: &[u8], label: &str) -> Result<EncryptedField, CipherError> {
    let cipher = build_cipher(dek)?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: label.as_bytes(),
            },
        )
        .map_err(|_| CipherError::EncryptionFailure)?;

    Ok(EncryptedField {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypt an [`EncryptedField`] that was sealed under `dek` with the same `label`.
///
/// # Errors
///
/// Returns [`CipherError::AuthenticationFailure`] if the key, label, or any
/// byte of the ciphertext differs from what [`encrypt_field`] produced.
pub fn decrypt_field(dek: &Dek, field: &EncryptedField, label: &str) -> Result<Vec<u8>, CipherError> {
    let cipher = build_cipher(dek)?;
    let nonce = Nonce::from_slice(&field.nonce);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: &field.ciphertext,
                aad: label.as_bytes(),
            },
        )
        .map_err(|_| CipherError::AuthenticationFailure)
}

/// Decrypt a raw stored blob (`nonce || ciphertext+tag`).
///
/// # Errors
///
/// Returns [`CipherError::Truncated`] for blobs shorter than a nonce, otherwise
/// the same errors as [`decrypt_field`].
pub fn open_blob(dek: &Dek, blob: &[u8], label: &str) -> Result<Vec<u8>, CipherError> {
    let field = EncryptedField::from_bytes(blob)?;
    decrypt_field(dek, &field, label)
}

fn build_cipher(dek: &Dek) -> Result<Aes256Gcm, CipherError> {
    Aes256Gcm::new_from_slice(dek.as_bytes())
        .map_err(|_| CipherError::InvalidKeyLength(dek.as_bytes().len()))
}
