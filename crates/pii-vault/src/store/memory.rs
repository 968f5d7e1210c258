//! [`MemoryKeyStore`]: process-local backend for development and tests.
//!
//! Mirrors the MySQL backend's observable behaviour: auto-increment ids,
//! newest-active selection, inner-join listing ordered by record id.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{
    ActiveKeyRow, ContactRow, DataEncryptionKey, KeyId, KeyStatus, KeyStore, RecordId,
    StoreError, StoredContact,
};

#[derive(Debug, Default)]
struct Tables {
    keys: Vec<DataEncryptionKey>,
    records: Vec<(RecordId, ContactRow, chrono::DateTime<Utc>)>,
    next_key_id: KeyId,
    next_record_id: RecordId,
}

/// In-memory [`KeyStore`]. Cloning shares the same tables.
#[derive(Clone, Debug, Default)]
pub struct MemoryKeyStore {
    inner: Arc<Mutex<Tables>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every key row, in insertion order.
    pub async fn keys(&self) -> Vec<DataEncryptionKey> {
        self.inner.lock().await.keys.clone()
    }

    pub async fn record_count(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    /// Change a key's status, as an external rotation process would.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownKey`] if no row has this id.
    pub async fn set_status(&self, id: KeyId, status: KeyStatus) -> Result<(), StoreError> {
        let mut tables = self.inner.lock().await;
        let key = tables
            .keys
            .iter_mut()
            .find(|k| k.id == id)
            .ok_or(StoreError::UnknownKey(id))?;
        key.status = status;
        Ok(())
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_key(
        &self,
        logical_name: &str,
        wrapped: &str,
        kek_id: &str,
    ) -> Result<KeyId, StoreError> {
        let mut tables = self.inner.lock().await;
        tables.next_key_id += 1;
        let id = tables.next_key_id;
        tables.keys.push(DataEncryptionKey {
            id,
            logical_name: logical_name.to_owned(),
            wrapped: wrapped.to_owned(),
            kek_id: kek_id.to_owned(),
            status: KeyStatus::Active,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn find_active_key(&self, logical_name: &str) -> Result<Option<ActiveKeyRow>, StoreError> {
        let tables = self.inner.lock().await;
        Ok(tables
            .keys
            .iter()
            .filter(|k| k.logical_name == logical_name && k.status == KeyStatus::Active)
            .max_by_key(|k| (k.created_at, k.id))
            .map(|k| ActiveKeyRow {
                id: k.id,
                wrapped: k.wrapped.clone(),
            }))
    }

    async fn append_record(&self, row: &ContactRow) -> Result<RecordId, StoreError> {
        let mut tables = self.inner.lock().await;
        // Mirrors the foreign key on contact_form.key_id.
        if !tables.keys.iter().any(|k| k.id == row.key_id) {
            return Err(StoreError::UnknownKey(row.key_id));
        }
        tables.next_record_id += 1;
        let id = tables.next_record_id;
        tables.records.push((id, row.clone(), Utc::now()));
        Ok(id)
    }

    async fn list_records_with_keys(&self) -> Result<Vec<StoredContact>, StoreError> {
        let tables = self.inner.lock().await;
        let mut out: Vec<StoredContact> = tables
            .records
            .iter()
            .filter_map(|(id, row, created_at)| {
                let key = tables.keys.iter().find(|k| k.id == row.key_id)?;
                Some(StoredContact {
                    id: *id,
                    row: row.clone(),
                    created_at: Some(*created_at),
                    wrapped_key: key.wrapped.clone(),
                })
            })
            .collect();
        out.sort_by_key(|c| c.id);
        Ok(out)
    }

    async fn purge_all(&self) -> Result<(), StoreError> {
        let mut tables = self.inner.lock().await;
        tables.records.clear();
        tables.keys.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(key_id: KeyId) -> ContactRow {
        ContactRow {
            first_name: vec![1; 20],
            middle_name: None,
            last_name: vec![2; 20],
            phone: vec![3; 20],
            email: vec![4; 20],
            phone_dnc: true,
            email_dnc: false,
            key_id,
        }
    }

    #[tokio::test]
    async fn inserted_key_is_active() {
        let store = MemoryKeyStore::new();
        let id = store.insert_key("contact_pii", "vault:v1:a", "kek").await.unwrap();
        let active = store.find_active_key("contact_pii").await.unwrap().unwrap();
        assert_eq!(active, ActiveKeyRow { id, wrapped: "vault:v1:a".into() });
        assert_eq!(store.keys().await[0].status, KeyStatus::Active);
    }

    #[tokio::test]
    async fn find_active_is_scoped_by_logical_name() {
        let store = MemoryKeyStore::new();
        store.insert_key("other", "vault:v1:a", "kek").await.unwrap();
        assert!(store.find_active_key("contact_pii").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn newest_active_key_wins() {
        let store = MemoryKeyStore::new();
        store.insert_key("contact_pii", "vault:v1:old", "kek").await.unwrap();
        let newer = store.insert_key("contact_pii", "vault:v1:new", "kek").await.unwrap();
        let active = store.find_active_key("contact_pii").await.unwrap().unwrap();
        assert_eq!(active.id, newer);
    }

    #[tokio::test]
    async fn retired_keys_are_not_selected() {
        let store = MemoryKeyStore::new();
        let old = store.insert_key("contact_pii", "vault:v1:old", "kek").await.unwrap();
        let newer = store.insert_key("contact_pii", "vault:v1:new", "kek").await.unwrap();
        store.set_status(newer, KeyStatus::Retiring).await.unwrap();
        let active = store.find_active_key("contact_pii").await.unwrap().unwrap();
        assert_eq!(active.id, old);
        store.set_status(old, KeyStatus::Retired).await.unwrap();
        assert!(store.find_active_key("contact_pii").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn records_join_their_key_in_id_order() {
        let store = MemoryKeyStore::new();
        let k1 = store.insert_key("contact_pii", "vault:v1:one", "kek").await.unwrap();
        let k2 = store.insert_key("contact_pii", "vault:v1:two", "kek").await.unwrap();
        let r1 = store.append_record(&row(k1)).await.unwrap();
        let r2 = store.append_record(&row(k2)).await.unwrap();

        let listed = store.list_records_with_keys().await.unwrap();
        assert_eq!(listed.iter().map(|c| c.id).collect::<Vec<_>>(), vec![r1, r2]);
        assert_eq!(listed[0].wrapped_key, "vault:v1:one");
        assert_eq!(listed[1].wrapped_key, "vault:v1:two");
        assert!(listed[0].row.phone_dnc);
        assert!(listed[0].created_at.is_some());
    }

    #[tokio::test]
    async fn record_with_unknown_key_rejected() {
        let store = MemoryKeyStore::new();
        assert!(matches!(
            store.append_record(&row(42)).await,
            Err(StoreError::UnknownKey(42))
        ));
    }

    #[tokio::test]
    async fn purge_removes_everything() {
        let store = MemoryKeyStore::new();
        let k = store.insert_key("contact_pii", "vault:v1:one", "kek").await.unwrap();
        store.append_record(&row(k)).await.unwrap();
        store.purge_all().await.unwrap();
        assert!(store.keys().await.is_empty());
        assert_eq!(store.record_count().await, 0);
        assert!(store.list_records_with_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ids_keep_increasing_after_purge() {
        let store = MemoryKeyStore::new();
        let first = store.insert_key("contact_pii", "a", "kek").await.unwrap();
        store.purge_all().await.unwrap();
        let second = store.insert_key("contact_pii", "b", "kek").await.unwrap();
        assert!(second > first);
    }
}
