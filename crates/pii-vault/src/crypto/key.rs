//! [`Dek`]: plaintext Data Encryption Key bytes.

use aes_gcm::aead::{rand_core::RngCore, OsRng};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::cipher::{CipherError, KEY_LEN};

/// Fixed-size key buffer that holds exactly [`KEY_LEN`] bytes.
///
/// Lives only for the duration of one encrypt or decrypt operation; it is
/// never cached between requests and never persisted. The bytes are
/// overwritten with zeroes on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Dek([u8; KEY_LEN]);

impl Dek {
    /// Draw a fresh random key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    /// Copy key bytes returned by the KMS.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidKeyLength`] if `bytes` is not [`KEY_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CipherError> {
        if bytes.len() != KEY_LEN {
            return Err(CipherError::InvalidKeyLength(bytes.len()));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for Dek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.write_str("Dek([REDACTED])")
    }
}
