//! Process-wide credential cache.
//!
//! Entries are created lazily on first resolution and dropped only by explicit
//! invalidation; there is no TTL and no size bound.
//!
//! # Refill ordering
//!
//! Every key carries a generation counter that [`CredentialCache::invalidate`]
//! and [`CredentialCache::put`] bump. A refill captures the generation before
//! it fetches from the store and installs its result only if the generation is
//! still the same, so a read that raced a mutation cannot put the
//! pre-mutation record back after the mutation's invalidation.

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::error::StoreError;
use crate::metrics;
use crate::models::{Permission, StoredCredential, User};
use crate::store::Store;

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    record: Option<StoredCredential>,
}

#[derive(Debug, Default)]
pub struct CredentialCache {
    entries: DashMap<String, Slot>,
}

impl CredentialCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<StoredCredential> {
        let record = self.entries.get(name).and_then(|slot| slot.record.clone());
        metrics::record_cache_event(if record.is_some() { "hit" } else { "miss" });
        record
    }

    /// Install `record` unconditionally.
    pub fn put(&self, record: StoredCredential) {
        let mut slot = self.entries.entry(record.name().to_string()).or_default();
        slot.generation += 1;
        slot.record = Some(record);
    }

    /// Drop the record for `name`; any refill that started earlier is discarded.
    pub fn invalidate(&self, name: &str) {
        let mut slot = self.entries.entry(name.to_string()).or_default();
        slot.generation += 1;
        slot.record = None;
        metrics::record_cache_event("invalidate");
        debug!(identity = name, generation = slot.generation, "Credential cache entry invalidated");
    }

    pub fn generation(&self, name: &str) -> u64 {
        self.entries.get(name).map_or(0, |slot| slot.generation)
    }

    /// Install `record` only if no put or invalidation happened since
    /// `generation` was read. Returns whether it was installed.
    pub fn put_if_current(&self, record: StoredCredential, generation: u64) -> bool {
        let mut slot = self.entries.entry(record.name().to_string()).or_default();
        if slot.generation != generation {
            trace!(
                identity = record.name(),
                expected = generation,
                actual = slot.generation,
                "Discarding stale credential refill"
            );
            return false;
        }
        slot.record = Some(record);
        true
    }

    /// Number of keys holding a record.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.record.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached user, else fetch from `store` and refill.
    pub async fn user_or_fetch(
        &self,
        name: &str,
        store: &dyn Store,
    ) -> Result<Option<User>, StoreError> {
        if let Some(StoredCredential::User(user)) = self.get(name) {
            return Ok(Some(user));
        }

        let generation = self.generation(name);
        let user = store.get_user(name).await?;
        if let Some(user) = &user {
            self.put_if_current(StoredCredential::User(user.clone()), generation);
        }
        Ok(user)
    }

    /// Cached permission, else fetch from `store` and refill.
    pub async fn permission_or_fetch(
        &self,
        name: &str,
        store: &dyn Store,
    ) -> Result<Option<Permission>, StoreError> {
        if let Some(StoredCredential::Permission(permission)) = self.get(name) {
            return Ok(Some(permission));
        }

        let generation = self.generation(name);
        let permission = store.get_permission(name).await?;
        if let Some(permission) = &permission {
            self.put_if_current(StoredCredential::Permission(permission.clone()), generation);
        }
        Ok(permission)
    }
}
