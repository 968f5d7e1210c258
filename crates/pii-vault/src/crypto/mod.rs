//! AES-256-GCM field encryption primitives.
//!
//! This module is intentionally free of KMS, storage, and HTTP dependencies.
//! It provides the low-level encrypt/decrypt operations used by the pipelines.
//!
//! # Stored blob format
//!
//! ```text
//! <12-byte nonce><ciphertext><16-byte tag>
//! ```
//!
//! The field name is the AAD; it is not stored in the blob.

pub mod cipher;
pub mod key;

pub use cipher::{
    decrypt_field, encrypt_field, open_blob, CipherError, EncryptedField, KEY_LEN, NONCE_LEN, TAG_LEN,
};
pub use key::Dek;
