//! [`DecryptionPipeline`]: read stored rows back as plaintext records.

use std::sync::Arc;

use common::protocol::ContactRecord;
use tracing::{debug, instrument};

use super::labels;
use crate::crypto::{open_blob, Dek};
use crate::error::EnvelopeError;
use crate::lifecycle::EnvelopeKeyLifecycle;
use crate::store::{KeyStore, StoredContact};

pub struct DecryptionPipeline {
    lifecycle: Arc<EnvelopeKeyLifecycle>,
    store: Arc<dyn KeyStore>,
}

impl DecryptionPipeline {
    pub fn new(lifecycle: Arc<EnvelopeKeyLifecycle>, store: Arc<dyn KeyStore>) -> Self {
        Self { lifecycle, store }
    }

    /// Decrypt every stored record, ordered by id.
    ///
    /// If any row's DEK reports key loss, the lifecycle's recovery runs and the
    /// whole batch is read again once. After a purge that second read is empty.
    ///
    /// # Errors
    ///
    /// - [`EnvelopeError::Field`] / [`EnvelopeError::Encoding`] if a row fails
    ///   authentication or does not decode. The batch is not partially returned.
    /// - [`EnvelopeError::RecoveryExhausted`] if key loss persists.
    /// - [`EnvelopeError::Kms`] / [`EnvelopeError::Store`] for dependency failures.
    #[instrument(skip_all)]
    pub async fn decrypt_all(&self) -> Result<Vec<ContactRecord>, EnvelopeError> {
        self.lifecycle.run_with_recovery(|| self.decrypt_batch()).await
    }

    async fn decrypt_batch(&self) -> Result<Vec<ContactRecord>, EnvelopeError> {
        let stored = self.store.list_records_with_keys().await?;
        let mut records = Vec::with_capacity(stored.len());
        for contact in &stored {
            records.push(self.decrypt_record(contact).await?);
        }
        debug!(count = records.len(), "records decrypted");
        Ok(records)
    }

    /// Unwrap the row's DEK and open each present field under its own label.
    ///
    /// Does not recover from key loss on its own; wrap the call in
    /// [`EnvelopeKeyLifecycle::run_with_recovery`] for that.
    ///
    /// # Errors
    ///
    /// As for [`DecryptionPipeline::decrypt_all`], minus recovery.
    pub async fn decrypt_record(&self, contact: &StoredContact) -> Result<ContactRecord, EnvelopeError> {
        let dek = self.lifecycle.unwrap_dek(&contact.wrapped_key).await?;
        open_contact(&dek, contact)
    }
}

fn open_contact(dek: &Dek, contact: &StoredContact) -> Result<ContactRecord, EnvelopeError> {
    let row = &contact.row;
    Ok(ContactRecord {
        id: contact.id,
        first_name: open_text(dek, labels::FIRST_NAME, &row.first_name)?,
        middle_name: row
            .middle_name
            .as_deref()
            .map(|blob| open_text(dek, labels::MIDDLE_NAME, blob))
            .transpose()?,
        last_name: open_text(dek, labels::LAST_NAME, &row.last_name)?,
        phone: open_text(dek, labels::PHONE, &row.phone)?,
        email: open_text(dek, labels::EMAIL, &row.email)?,
        phone_dnc: row.phone_dnc,
        email_dnc: row.email_dnc,
        created_at: contact.created_at.map(|t| t.to_rfc3339()),
    })
}

fn open_text(dek: &Dek, field: &'static str, blob: &[u8]) -> Result<String, EnvelopeError> {
    let plain = open_blob(dek, blob, field).map_err(|source| EnvelopeError::Field { field, source })?;
    String::from_utf8(plain).map_err(|_| EnvelopeError::Encoding { field })
}
