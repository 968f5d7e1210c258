//! [`SubmissionPipeline`]: seal a contact form and persist it.

use std::sync::Arc;

use common::protocol::ContactForm;
use tracing::{info, instrument};

use super::labels;
use crate::crypto::{encrypt_field, Dek};
use crate::error::EnvelopeError;
use crate::lifecycle::EnvelopeKeyLifecycle;
use crate::store::{ContactRow, KeyId, KeyStore, RecordId};

pub struct SubmissionPipeline {
    lifecycle: Arc<EnvelopeKeyLifecycle>,
    store: Arc<dyn KeyStore>,
}

impl SubmissionPipeline {
    pub fn new(lifecycle: Arc<EnvelopeKeyLifecycle>, store: Arc<dyn KeyStore>) -> Self {
        Self { lifecycle, store }
    }

    /// Encrypt every present field under the active DEK and append the row.
    ///
    /// The form is assumed to be validated already.
    ///
    /// # Errors
    ///
    /// Propagates lifecycle failures (including key loss after recovery) and
    /// [`EnvelopeError::Store`] if the append fails.
    #[instrument(skip_all)]
    pub async fn submit(&self, form: &ContactForm) -> Result<RecordId, EnvelopeError> {
        let active = self.lifecycle.get_active_key().await?;
        let row = seal_form(&active.dek, active.id, form)?;
        let id = self.store.append_record(&row).await?;
        info!(record_id = id, key_id = active.id, "contact form stored");
        Ok(id)
    }
}

fn seal_form(dek: &Dek, key_id: KeyId, form: &ContactForm) -> Result<ContactRow, EnvelopeError> {
    Ok(ContactRow {
        first_name: seal(dek, labels::FIRST_NAME, &form.first_name)?,
        middle_name: form
            .middle_name
            .as_deref()
            .map(|m| seal(dek, labels::MIDDLE_NAME, m))
            .transpose()?,
        last_name: seal(dek, labels::LAST_NAME, &form.last_name)?,
        phone: seal(dek, labels::PHONE, &form.phone)?,
        email: seal(dek, labels::EMAIL, &form.email)?,
        phone_dnc: form.phone_dnc,
        email_dnc: form.email_dnc,
        key_id,
    })
}

fn seal(dek: &Dek, field: &'static str, value: &str) -> Result<Vec<u8>, EnvelopeError> {
    encrypt_field(dek, value.as_bytes(), field)
        .map(|sealed| sealed.to_bytes())
        .map_err(|source| EnvelopeError::Field { field, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{open_blob, CipherError, NONCE_LEN, TAG_LEN};
    use crate::kms::{KmsError, MockKeyWrapper};
    use crate::lifecycle::RecoveryPolicy;
    use crate::store::MemoryKeyStore;
    use crate::test_support::FakeVault;

    fn form() -> ContactForm {
        ContactForm {
            first_name: "Ann".into(),
            middle_name: None,
            last_name: "Lee".into(),
            phone: "+15551234567".into(),
            email: "a@example.com".into(),
            phone_dnc: false,
            email_dnc: true,
        }
    }

    fn pipeline(
        kms: impl crate::kms::KeyWrapper + 'static,
        store: &MemoryKeyStore,
    ) -> (Arc<EnvelopeKeyLifecycle>, SubmissionPipeline) {
        let store: Arc<dyn KeyStore> = Arc::new(store.clone());
        let lifecycle = Arc::new(EnvelopeKeyLifecycle::new(
            Arc::new(kms),
            store.clone(),
            "contact_pii",
            "vault-transit:pii-master",
            RecoveryPolicy::Fail,
        ));
        (lifecycle.clone(), SubmissionPipeline::new(lifecycle, store))
    }

    #[tokio::test]
    async fn fields_are_sealed_under_their_own_names() {
        let vault = FakeVault::start().await;
        let store = MemoryKeyStore::new();
        let (lifecycle, pipeline) = pipeline(vault.client(), &store);

        let id = pipeline.submit(&form()).await.unwrap();

        let stored = store.list_records_with_keys().await.unwrap();
        assert_eq!(stored.len(), 1);
        let contact = &stored[0];
        assert_eq!(contact.id, id);
        assert!(contact.row.middle_name.is_none());
        assert!(!contact.row.phone_dnc);
        assert!(contact.row.email_dnc);

        let dek = lifecycle.unwrap_dek(&contact.wrapped_key).await.unwrap();
        assert_eq!(open_blob(&dek, &contact.row.first_name, "first_name").unwrap(), b"Ann");
        assert_eq!(open_blob(&dek, &contact.row.email, "email").unwrap(), b"a@example.com");
        assert_eq!(
            open_blob(&dek, &contact.row.last_name, "first_name"),
            Err(CipherError::AuthenticationFailure)
        );
        assert_eq!(contact.row.phone.len(), NONCE_LEN + "+15551234567".len() + TAG_LEN);
    }

    #[tokio::test]
    async fn present_middle_name_is_sealed() {
        let vault = FakeVault::start().await;
        let store = MemoryKeyStore::new();
        let (lifecycle, pipeline) = pipeline(vault.client(), &store);

        let mut with_middle = form();
        with_middle.middle_name = Some("Marie".into());
        pipeline.submit(&with_middle).await.unwrap();

        let contact = store.list_records_with_keys().await.unwrap().remove(0);
        let dek = lifecycle.unwrap_dek(&contact.wrapped_key).await.unwrap();
        let blob = contact.row.middle_name.unwrap();
        assert_eq!(open_blob(&dek, &blob, "middle_name").unwrap(), b"Marie");
    }

    #[tokio::test]
    async fn records_reference_the_active_key() {
        let vault = FakeVault::start().await;
        let store = MemoryKeyStore::new();
        let (lifecycle, pipeline) = pipeline(vault.client(), &store);
        let key_id = lifecycle.ensure_active_key().await.unwrap();

        pipeline.submit(&form()).await.unwrap();
        pipeline.submit(&form()).await.unwrap();

        let stored = store.list_records_with_keys().await.unwrap();
        assert!(stored.iter().all(|c| c.row.key_id == key_id));
        assert_ne!(stored[0].row.first_name, stored[1].row.first_name);
        assert_eq!(store.keys().await.len(), 1);
    }

    #[tokio::test]
    async fn kms_outage_stores_nothing() {
        let store = MemoryKeyStore::new();
        store
            .insert_key("contact_pii", "vault:v1:k", "vault-transit:pii-master")
            .await
            .unwrap();
        let mut kms = MockKeyWrapper::new();
        kms.expect_unwrap()
            .returning(|_| Err(KmsError::Dependency("connection refused".into())));
        let (_, pipeline) = pipeline(kms, &store);

        assert!(matches!(
            pipeline.submit(&form()).await,
            Err(EnvelopeError::Kms(KmsError::Dependency(_)))
        ));
        assert_eq!(store.record_count().await, 0);
    }
}
