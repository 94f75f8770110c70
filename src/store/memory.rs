use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::Store;
use crate::error::StoreError;
use crate::models::{AnalyticsRecord, Permission, User};

/// Process-local store. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<String, User>,
    permissions: DashMap<String, Permission>,
    records: DashMap<String, AnalyticsRecord>,
    user_writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put_user` calls served so far.
    pub fn user_writes(&self) -> usize {
        self.user_writes.load(Ordering::Relaxed)
    }

    pub fn record(&self, id: &str) -> Option<AnalyticsRecord> {
        self.records.get(id).map(|r| r.clone())
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(username).map(|u| u.clone()))
    }

    async fn put_user(&self, user: &User) -> Result<(), StoreError> {
        self.user_writes.fetch_add(1, Ordering::Relaxed);
        self.users.insert(user.username.clone(), user.clone());
        Ok(())
    }

    async fn delete_user(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self.users.remove(username).is_some())
    }

    async fn get_permission(&self, username: &str) -> Result<Option<Permission>, StoreError> {
        Ok(self.permissions.get(username).map(|p| p.clone()))
    }

    async fn put_permission(&self, permission: &Permission) -> Result<(), StoreError> {
        self.permissions
            .insert(permission.username.clone(), permission.clone());
        Ok(())
    }

    async fn delete_permission(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self.permissions.remove(username).is_some())
    }

    async fn index_record(&self, id: &str, record: &AnalyticsRecord) -> Result<(), StoreError> {
        self.records
            .entry(id.to_string())
            .and_modify(|existing| existing.merge(record.clone()))
            .or_insert_with(|| record.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::StoredCredential;

    #[tokio::test]
    async fn test_get_credential_prefers_permission() {
        let store = MemoryStore::new();
        store.put_user(&User::new("alice", "pw", false)).await.unwrap();
        store
            .put_permission(&Permission::new("p1", "secret", "alice"))
            .await
            .unwrap();

        assert!(matches!(
            store.get_credential("p1").await.unwrap(),
            Some(StoredCredential::Permission(_))
        ));
        assert!(matches!(
            store.get_credential("alice").await.unwrap(),
            Some(StoredCredential::User(_))
        ));
        assert!(store.get_credential("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_index_record_merges_follow_up_fields() {
        let store = MemoryStore::new();
        let search = AnalyticsRecord {
            search_query: Some("shoes".into()),
            total_hits: Some(3),
            ..AnalyticsRecord::default()
        };
        store.index_record("s1", &search).await.unwrap();

        let click = AnalyticsRecord {
            click: Some(true),
            click_position: Some(2),
            ..AnalyticsRecord::default()
        };
        store.index_record("s1", &click).await.unwrap();

        let merged = store.record("s1").unwrap();
        assert_eq!(merged.search_query.as_deref(), Some("shoes"));
        assert_eq!(merged.click, Some(true));
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let store = MemoryStore::new();
        store.put_user(&User::new("bob", "pw", false)).await.unwrap();
        assert!(store.delete_user("bob").await.unwrap());
        assert!(!store.delete_user("bob").await.unwrap());
        assert_eq!(store.user_writes(), 1);
    }
}
