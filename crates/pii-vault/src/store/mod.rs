//! Durable record of wrapped DEKs and the contact-form rows sealed under them.
//!
//! # Invariants
//!
//! - Only **wrapped** DEKs are stored. Plaintext key bytes never reach a backend.
//! - Every blob in a [`ContactRow`] was sealed under the key named by its `key_id`.
//! - At most one key per logical name *should* be `active`. It is not enforced;
//!   [`KeyStore::find_active_key`] picks the newest active row if it is violated.

pub mod memory;
pub mod mysql;

pub use memory::MemoryKeyStore;
pub use mysql::MySqlKeyStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::{Config, StoreBackend};

/// Primary key of an `encryption_keys` row.
pub type KeyId = i64;
/// Primary key of a `contact_form` row.
pub type RecordId = i64;

/// Errors produced by the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database could not be reached or rejected a query.
    #[error("store query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// A stored value does not match the expected schema.
    #[error("corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    /// A record references a key id that does not exist.
    #[error("no encryption key with id {0}")]
    UnknownKey(KeyId),
}

/// `encryption_keys.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    Active,
    Retiring,
    Retired,
}

/// One `encryption_keys` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEncryptionKey {
    pub id: KeyId,
    pub logical_name: String,
    /// Opaque KMS ciphertext; only the KMS can decode it.
    pub wrapped: String,
    pub kek_id: String,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
}

/// The columns [`KeyStore::find_active_key`] returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveKeyRow {
    pub id: KeyId,
    pub wrapped: String,
}

/// A contact-form row ready to be appended: sealed blobs plus plain flags.
///
/// Blobs are `nonce || ciphertext+tag`. An absent optional field is `None`,
/// never an encrypted empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRow {
    pub first_name: Vec<u8>,
    pub middle_name: Option<Vec<u8>>,
    pub last_name: Vec<u8>,
    pub phone: Vec<u8>,
    pub email: Vec<u8>,
    pub phone_dnc: bool,
    pub email_dnc: bool,
    pub key_id: KeyId,
}

/// A stored row joined with the wrapped DEK it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContact {
    pub id: RecordId,
    pub row: ContactRow,
    pub created_at: Option<DateTime<Utc>>,
    pub wrapped_key: String,
}

/// Persistence operations the key lifecycle and pipelines depend on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Readiness check used by the startup probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Create the backing tables if they do not exist. Idempotent.
    async fn init_schema(&self) -> Result<(), StoreError>;

    /// Insert a new `active` key row and return its id.
    async fn insert_key(
        &self,
        logical_name: &str,
        wrapped: &str,
        kek_id: &str,
    ) -> Result<KeyId, StoreError>;

    /// Newest `active` key for `logical_name`, if any.
    async fn find_active_key(&self, logical_name: &str) -> Result<Option<ActiveKeyRow>, StoreError>;

    async fn append_record(&self, row: &ContactRow) -> Result<RecordId, StoreError>;

    /// Every record joined with its wrapped key, ordered by record id ascending.
    /// Records whose key row is missing are not returned.
    async fn list_records_with_keys(&self) -> Result<Vec<StoredContact>, StoreError>;

    /// Delete every record and every key row.
    ///
    /// **Irreversible.** Only the development-mode recovery path calls this.
    async fn purge_all(&self) -> Result<(), StoreError>;
}

/// Build the backend selected by `STORE_BACKEND`. Never blocks: MySQL
/// connects lazily on first use.
pub fn open(cfg: &Config) -> Arc<dyn KeyStore> {
    match cfg.store_backend {
        StoreBackend::Mysql => Arc::new(MySqlKeyStore::from_config(cfg)),
        StoreBackend::Memory => Arc::new(MemoryKeyStore::new()),
    }
}
