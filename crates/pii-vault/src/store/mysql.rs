//! [`MySqlKeyStore`]: the production backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::Row;
use tracing::{info, warn};

use super::{ActiveKeyRow, ContactRow, KeyId, KeyStore, RecordId, StoreError, StoredContact};
use crate::config::Config;

pub(crate) const CREATE_ENCRYPTION_KEYS: &str = r#"
CREATE TABLE IF NOT EXISTS encryption_keys (
  id BIGINT AUTO_INCREMENT PRIMARY KEY,
  logical_name VARCHAR(64) NOT NULL,
  dek_wrapped VARBINARY(512) NOT NULL,
  kek_id VARCHAR(128) NOT NULL,
  created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
  status ENUM('active','retiring','retired') DEFAULT 'active'
) ENGINE=InnoDB
"#;

pub(crate) const CREATE_CONTACT_FORM: &str = r#"
CREATE TABLE IF NOT EXISTS contact_form (
  id BIGINT AUTO_INCREMENT PRIMARY KEY,
  first_name_enc VARBINARY(512) NOT NULL,
  middle_name_enc VARBINARY(512),
  last_name_enc VARBINARY(512) NOT NULL,
  phone_enc VARBINARY(512) NOT NULL,
  email_enc VARBINARY(512) NOT NULL,
  phone_dnc TINYINT(1) NOT NULL,
  email_dnc TINYINT(1) NOT NULL,
  key_id BIGINT NOT NULL,
  created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
  FOREIGN KEY (key_id) REFERENCES encryption_keys(id)
) ENGINE=InnoDB
"#;

/// MySQL-backed [`KeyStore`].
///
/// The pool connects lazily, so constructing the store never blocks; the
/// startup probe ([`KeyStore::ping`]) is what waits for the server.
#[derive(Clone, Debug)]
pub struct MySqlKeyStore {
    pool: MySqlPool,
}

impl MySqlKeyStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn from_config(cfg: &Config) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&cfg.db_host)
            .port(cfg.db_port)
            .username(&cfg.db_user)
            .password(&cfg.db_password)
            .database(&cfg.db_name);
        let pool = MySqlPoolOptions::new()
            .max_connections(cfg.db_max_connections)
            .connect_lazy_with(options);
        Self::new(pool)
    }
}

#[async_trait]
impl KeyStore for MySqlKeyStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_ENCRYPTION_KEYS).execute(&self.pool).await?;
        sqlx::query(CREATE_CONTACT_FORM).execute(&self.pool).await?;
        info!("database schema ready");
        Ok(())
    }

    async fn insert_key(
        &self,
        logical_name: &str,
        wrapped: &str,
        kek_id: &str,
    ) -> Result<KeyId, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO encryption_keys (logical_name, dek_wrapped, kek_id, status)
            VALUES (?, ?, ?, 'active')
            "#,
        )
        .bind(logical_name)
        .bind(wrapped.as_bytes())
        .bind(kek_id)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_id() as KeyId)
    }

    async fn find_active_key(&self, logical_name: &str) -> Result<Option<ActiveKeyRow>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, dek_wrapped FROM encryption_keys
            WHERE logical_name = ? AND status = 'active'
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(logical_name)
        .fetch_optional(&self.pool)
        .await?;

        let Some(r) = row else {
            return Ok(None);
        };
        Ok(Some(ActiveKeyRow {
            id: r.try_get("id")?,
            wrapped: wrapped_key_text(r.try_get("dek_wrapped")?)?,
        }))
    }

    async fn append_record(&self, row: &ContactRow) -> Result<RecordId, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO contact_form (
                first_name_enc,
                middle_name_enc,
                last_name_enc,
                phone_enc,
                email_enc,
                phone_dnc,
                email_dnc,
                key_id
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.first_name)
        .bind(&row.middle_name)
        .bind(&row.last_name)
        .bind(&row.phone)
        .bind(&row.email)
        .bind(row.phone_dnc)
        .bind(row.email_dnc)
        .bind(row.key_id)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_id() as RecordId)
    }

    async fn list_records_with_keys(&self) -> Result<Vec<StoredContact>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                cf.id,
                cf.first_name_enc,
                cf.middle_name_enc,
                cf.last_name_enc,
                cf.phone_enc,
                cf.email_enc,
                cf.phone_dnc,
                cf.email_dnc,
                cf.key_id,
                cf.created_at,
                ek.dek_wrapped
            FROM contact_form cf
            JOIN encryption_keys ek ON cf.key_id = ek.id
            ORDER BY cf.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(stored_contact).collect()
    }

    async fn purge_all(&self) -> Result<(), StoreError> {
        warn!("purging every contact_form and encryption_keys row");
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM contact_form").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM encryption_keys").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

fn stored_contact(r: &MySqlRow) -> Result<StoredContact, StoreError> {
    Ok(StoredContact {
        id: r.try_get("id")?,
        row: ContactRow {
            first_name: r.try_get("first_name_enc")?,
            middle_name: r.try_get("middle_name_enc")?,
            last_name: r.try_get("last_name_enc")?,
            phone: r.try_get("phone_enc")?,
            email: r.try_get("email_enc")?,
            phone_dnc: r.try_get("phone_dnc")?,
            email_dnc: r.try_get("email_dnc")?,
            key_id: r.try_get("key_id")?,
        },
        created_at: r.try_get::<Option<DateTime<Utc>>, _>("created_at")?,
        wrapped_key: wrapped_key_text(r.try_get("dek_wrapped")?)?,
    })
}

/// `dek_wrapped` is VARBINARY but always holds the KMS's ASCII ciphertext.
fn wrapped_key_text(raw: Vec<u8>) -> Result<String, StoreError> {
    String::from_utf8(raw).map_err(|_| StoreError::Corrupt {
        table: "encryption_keys",
        reason: "dek_wrapped is not valid UTF-8".into(),
    })
}
