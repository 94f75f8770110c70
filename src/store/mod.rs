//! Persistence for users, permissions and analytics records.
//!
//! The gateway only needs point reads and writes by identity name, plus an
//! upsert for analytics documents. [`ElasticsearchStore`] keeps everything in
//! indices on the fronted cluster; [`MemoryStore`] keeps it in process.

mod elasticsearch;
mod memory;

use async_trait::async_trait;

pub use elasticsearch::ElasticsearchStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::models::{AnalyticsRecord, Permission, StoredCredential, User};

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_user(&self, username: &str) -> Result<Option<User>, StoreError>;

    /// Create or overwrite a user.
    async fn put_user(&self, user: &User) -> Result<(), StoreError>;

    /// Returns `false` when the user did not exist.
    async fn delete_user(&self, username: &str) -> Result<bool, StoreError>;

    async fn get_permission(&self, username: &str) -> Result<Option<Permission>, StoreError>;

    async fn put_permission(&self, permission: &Permission) -> Result<(), StoreError>;

    async fn delete_permission(&self, username: &str) -> Result<bool, StoreError>;

    /// Look an identity name up as a permission first, then as a user.
    async fn get_credential(&self, name: &str) -> Result<Option<StoredCredential>, StoreError> {
        if let Some(permission) = self.get_permission(name).await? {
            return Ok(Some(StoredCredential::Permission(permission)));
        }
        Ok(self.get_user(name).await?.map(StoredCredential::User))
    }

    /// Upsert an analytics document; fields already stored under `id` and
    /// absent from `record` are kept.
    async fn index_record(&self, id: &str, record: &AnalyticsRecord) -> Result<(), StoreError>;
}
