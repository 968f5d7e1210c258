//! `pii-etl`: decrypt every stored contact-form row and print a report.
//!
//! Startup sequence:
//! 1. Load and validate the shared [`Config`] from environment variables.
//! 2. Initialise structured JSON logging (stderr).
//! 3. Connect to Vault and the store, waiting for both.
//! 4. Decrypt all rows and print the report to stdout.
//!
//! The report is read-only: lost KMS key material is reported as an error
//! and never triggers a purge, whatever `DEV_MODE` says.

mod report;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use pii_vault::kms::{KeyWrapper, VaultTransitClient};
use pii_vault::lifecycle::{EnvelopeKeyLifecycle, RecoveryPolicy};
use pii_vault::pipeline::DecryptionPipeline;
use pii_vault::store::KeyStore;
use pii_vault::{startup, store, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        eprintln!("ERROR: pii-etl configuration invalid: {e}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init(&cfg.log_level)?;

    // -----------------------------------------------------------------------
    // 3. Dependencies
    // -----------------------------------------------------------------------
    let kms = VaultTransitClient::from_config(&cfg).context("failed to build Vault client")?;
    startup::wait_until_ready("vault", &cfg.kms_probe(), || kms.probe()).await?;

    let store = store::open(&cfg);
    startup::wait_until_ready("store", &cfg.store_probe(), || store.ping()).await?;

    let pipeline = report_pipeline(Arc::new(kms), store, &cfg);

    // -----------------------------------------------------------------------
    // 4. Report
    // -----------------------------------------------------------------------
    let records = pipeline
        .decrypt_all()
        .await
        .context("failed to decrypt stored records")?;
    info!(count = records.len(), "records decrypted");
    print!("{}", report::render(&records));

    Ok(())
}

/// Decryption pipeline for the report. Key loss always fails the run.
fn report_pipeline(
    kms: Arc<dyn KeyWrapper>,
    store: Arc<dyn KeyStore>,
    cfg: &Config,
) -> DecryptionPipeline {
    let lifecycle = Arc::new(EnvelopeKeyLifecycle::new(
        kms,
        store.clone(),
        cfg.logical_name.clone(),
        cfg.kek_id(),
        RecoveryPolicy::Fail,
    ));
    DecryptionPipeline::new(lifecycle, store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pii_vault::kms::KmsError;
    use pii_vault::store::{ContactRow, MemoryKeyStore};
    use zeroize::Zeroizing;

    /// A KMS that has lost its key material since the rows were written.
    struct ForgetfulVault;

    #[async_trait]
    impl KeyWrapper for ForgetfulVault {
        async fn wrap(&self, _plaintext_key: &[u8]) -> Result<String, KmsError> {
            Ok("vault:v1:fresh".into())
        }

        async fn unwrap(&self, _wrapped: &str) -> Result<Zeroizing<Vec<u8>>, KmsError> {
            Err(KmsError::KeyMaterialLost {
                reason: "encryption key not found".into(),
            })
        }

        async fn probe(&self) -> Result<(), KmsError> {
            Ok(())
        }
    }

    fn dev_config() -> Config {
        serde_json::from_value(serde_json::json!({
            "vault_token": "test-token",
            "store_backend": "memory",
            "dev_mode": true,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn key_loss_fails_the_report_and_keeps_data_in_dev_mode() {
        let cfg = dev_config();
        assert_eq!(cfg.recovery_policy(), RecoveryPolicy::PurgeOnKeyLoss);

        let store = MemoryKeyStore::new();
        let key_id = store
            .insert_key(&cfg.logical_name, "vault:v1:old", &cfg.kek_id())
            .await
            .unwrap();
        store
            .append_record(&ContactRow {
                first_name: vec![0; 28],
                middle_name: None,
                last_name: vec![0; 28],
                phone: vec![0; 28],
                email: vec![0; 28],
                phone_dnc: false,
                email_dnc: false,
                key_id,
            })
            .await
            .unwrap();

        let pipeline = report_pipeline(Arc::new(ForgetfulVault), Arc::new(store.clone()), &cfg);
        let err = pipeline.decrypt_all().await.unwrap_err();

        assert!(err.is_key_material_lost());
        assert_eq!(store.record_count().await, 1);
        assert_eq!(store.keys().await.len(), 1);
    }
}
