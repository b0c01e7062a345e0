//! Pending grant store
//!
//! Durable set of grants still owed a reversal, keyed by grant ID. Every
//! mutation is followed by a snapshot write so that a restart sees the same
//! set the process had.

use super::PendingGrant;
use crate::error::ModerationResult;
use crate::persistence::YamlFile;
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Store for pending grants
#[derive(Clone, Debug)]
pub struct GrantStore {
    records: Arc<DashMap<String, PendingGrant>>,
    /// Grants currently being reversed
    claimed: Arc<DashSet<String>>,
    file: YamlFile<Vec<PendingGrant>>,
}

impl Default for GrantStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl GrantStore {
    /// A store that never touches disk
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            claimed: Arc::new(DashSet::new()),
            file: YamlFile::in_memory(),
        }
    }

    /// Open the grant snapshot at `path`.
    ///
    /// # Errors
    /// Returns a storage error if the snapshot exists but cannot be read.
    pub async fn open(path: &Path) -> ModerationResult<Self> {
        let store = Self {
            records: Arc::new(DashMap::new()),
            claimed: Arc::new(DashSet::new()),
            file: YamlFile::new(path),
        };

        if let Some(grants) = store.file.load().await? {
            for grant in grants {
                store.records.insert(grant.id.clone(), grant);
            }
        }

        info!(path = %path.display(), grants = store.len(), "Pending grants loaded");
        Ok(store)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<PendingGrant> {
        self.records.get(id).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    #[must_use]
    pub fn all(&self) -> Vec<PendingGrant> {
        self.records.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Grants held by a member in any guild
    #[must_use]
    pub fn for_subject(&self, subject_id: u64) -> Vec<PendingGrant> {
        self.filter(|grant| grant.subject_id == subject_id)
    }

    /// Grants held by a member in one guild
    #[must_use]
    pub fn for_member(&self, guild_id: u64, subject_id: u64) -> Vec<PendingGrant> {
        self.filter(|grant| grant.guild_id == guild_id && grant.subject_id == subject_id)
    }

    /// IDs of grants whose deadline has passed
    #[must_use]
    pub fn due(&self, now: DateTime<Utc>) -> Vec<String> {
        self.records
            .iter()
            .filter(|entry| entry.value().is_due(now))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Insert a grant and write the snapshot. The grant stays in memory even
    /// if the write fails.
    ///
    /// # Errors
    /// Returns a storage error if the snapshot cannot be written.
    pub async fn insert(&self, grant: PendingGrant) -> ModerationResult<()> {
        self.records.insert(grant.id.clone(), grant);
        self.persist().await
    }

    /// Take exclusive ownership of a grant for reversal.
    ///
    /// Returns `None` if the grant is gone or another caller already owns it.
    #[must_use]
    pub fn claim(&self, id: &str) -> Option<PendingGrant> {
        let grant = self.get(id)?;
        self.claimed.insert(id.to_string()).then_some(grant)
    }

    /// Delete a grant, releasing any claim on it.
    ///
    /// # Errors
    /// Returns a storage error if the snapshot cannot be written.
    pub async fn remove(&self, id: &str) -> ModerationResult<Option<PendingGrant>> {
        let removed = self.records.remove(id).map(|(_, grant)| grant);
        self.claimed.remove(id);
        if removed.is_some() {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Delete every grant matching `predicate` and return them. A claim on a
    /// removed grant stays until its owner calls [`GrantStore::remove`].
    ///
    /// # Errors
    /// Returns a storage error if the snapshot cannot be written.
    pub async fn remove_matching(
        &self,
        predicate: impl Fn(&PendingGrant) -> bool,
    ) -> ModerationResult<Vec<PendingGrant>> {
        let ids: Vec<String> = self
            .records
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let removed: Vec<PendingGrant> = ids
            .iter()
            .filter_map(|id| self.records.remove(id).map(|(_, grant)| grant))
            .collect();

        if !removed.is_empty() {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Write the snapshot.
    ///
    /// # Errors
    /// Returns a storage error if the snapshot cannot be written.
    pub async fn persist(&self) -> ModerationResult<()> {
        self.file.save_with(|| self.all()).await
    }

    fn filter(&self, predicate: impl Fn(&PendingGrant) -> bool) -> Vec<PendingGrant> {
        self.records
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::{GrantKind, GrantRequest};
    use chrono::Duration;

    fn grant(subject_id: u64, kind: GrantKind, secs: u64) -> PendingGrant {
        let mut request = GrantRequest::new(1, subject_id, kind, secs, "test");
        if kind.needs_role() {
            request = request.with_role(77);
        }
        PendingGrant::from_request(&request, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_insert_get_remove() {
        let store = GrantStore::in_memory();
        let grant = grant(5, GrantKind::Timeout, 60);
        store.insert(grant.clone()).await.unwrap();

        assert_eq!(store.get(&grant.id), Some(grant.clone()));
        assert_eq!(store.for_subject(5).len(), 1);
        assert_eq!(store.for_member(1, 5).len(), 1);
        assert!(store.for_member(2, 5).is_empty());

        assert_eq!(store.remove(&grant.id).await.unwrap(), Some(grant.clone()));
        assert_eq!(store.remove(&grant.id).await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = GrantStore::in_memory();
        let grant = grant(5, GrantKind::Ban, 60);
        store.insert(grant.clone()).await.unwrap();

        assert!(store.claim(&grant.id).is_some());
        assert!(store.claim(&grant.id).is_none());

        // Bulk removal takes claimed grants too; the owner still has to let go
        let removed = store.remove_matching(|_| true).await.unwrap();
        assert_eq!(removed, vec![grant.clone()]);
        assert!(!store.contains(&grant.id));

        store.insert(grant.clone()).await.unwrap();
        assert!(store.claim(&grant.id).is_none());
        assert_eq!(store.remove(&grant.id).await.unwrap(), Some(grant.clone()));
        assert!(store.claim(&grant.id).is_none());
    }

    #[tokio::test]
    async fn test_due_lists_only_expired() {
        let store = GrantStore::in_memory();
        let mut expired = grant(5, GrantKind::Timeout, 60);
        expired.expires_at = Utc::now() - Duration::seconds(1);
        let future = grant(6, GrantKind::Timeout, 3600);
        store.insert(expired.clone()).await.unwrap();
        store.insert(future).await.unwrap();

        assert_eq!(store.due(Utc::now()), vec![expired.id]);
    }

    #[tokio::test]
    async fn test_remove_matching() {
        let store = GrantStore::in_memory();
        store.insert(grant(5, GrantKind::Timeout, 60)).await.unwrap();
        store.insert(grant(5, GrantKind::TempRole, 60)).await.unwrap();
        store.insert(grant(6, GrantKind::Timeout, 60)).await.unwrap();

        let removed = store
            .remove_matching(|g| g.subject_id == 5 && g.kind == GrantKind::Timeout)
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grants.yaml");

        let store = GrantStore::open(&path).await.unwrap();
        let kept = grant(5, GrantKind::TempRole, 600);
        let dropped = grant(6, GrantKind::Timeout, 600);
        store.insert(kept.clone()).await.unwrap();
        store.insert(dropped.clone()).await.unwrap();
        store.remove(&dropped.id).await.unwrap();

        let reopened = GrantStore::open(&path).await.unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get(&kept.id), Some(kept));
    }
}
