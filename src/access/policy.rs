//! Access policy store
//!
//! The allowlist and blacklist of role IDs that gate moderation commands.

use crate::error::ModerationResult;
use crate::persistence::YamlFile;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::info;

/// Which of the two role lists an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum PolicyList {
    #[display("allowlist")]
    Allowlist,
    #[display("blacklist")]
    Blacklist,
}

impl PolicyList {
    /// The list a role must not also be on
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Allowlist => Self::Blacklist,
            Self::Blacklist => Self::Allowlist,
        }
    }
}

/// Role lists consulted by the access guard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    #[serde(default)]
    pub allowlist: BTreeSet<u64>,
    #[serde(default)]
    pub blacklist: BTreeSet<u64>,
}

/// Enforcement mode derived from an [`AccessPolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode<'a> {
    /// Only holders of these roles may moderate
    Allowlist(&'a BTreeSet<u64>),
    /// Holders of these roles are warned and eventually timed out
    Blacklist(&'a BTreeSet<u64>),
    /// Nothing configured
    Open,
}

impl AccessPolicy {
    /// A non-empty allowlist wins outright; the blacklist only applies without one.
    #[must_use]
    pub fn mode(&self) -> PolicyMode<'_> {
        if !self.allowlist.is_empty() {
            PolicyMode::Allowlist(&self.allowlist)
        } else if !self.blacklist.is_empty() {
            PolicyMode::Blacklist(&self.blacklist)
        } else {
            PolicyMode::Open
        }
    }

    #[must_use]
    pub fn list(&self, list: PolicyList) -> &BTreeSet<u64> {
        match list {
            PolicyList::Allowlist => &self.allowlist,
            PolicyList::Blacklist => &self.blacklist,
        }
    }

    fn list_mut(&mut self, list: PolicyList) -> &mut BTreeSet<u64> {
        match list {
            PolicyList::Allowlist => &mut self.allowlist,
            PolicyList::Blacklist => &mut self.blacklist,
        }
    }
}

/// Shared, persisted access policy singleton
#[derive(Clone, Debug)]
pub struct AccessPolicyStore {
    policy: Arc<RwLock<AccessPolicy>>,
    file: YamlFile<AccessPolicy>,
}

impl Default for AccessPolicyStore {
    fn default() -> Self {
        Self::in_memory(AccessPolicy::default())
    }
}

impl AccessPolicyStore {
    #[must_use]
    pub fn in_memory(policy: AccessPolicy) -> Self {
        Self {
            policy: Arc::new(RwLock::new(policy)),
            file: YamlFile::in_memory(),
        }
    }

    /// Open the policy snapshot at `path`; an absent file means an empty policy.
    ///
    /// # Errors
    /// Returns a storage error if the snapshot exists but cannot be read.
    pub async fn open(path: &Path) -> ModerationResult<Self> {
        let file: YamlFile<AccessPolicy> = YamlFile::new(path);
        let policy = file.load().await?.unwrap_or_default();
        info!(
            path = %path.display(),
            allowlist = policy.allowlist.len(),
            blacklist = policy.blacklist.len(),
            "Access policy loaded"
        );
        Ok(Self {
            policy: Arc::new(RwLock::new(policy)),
            file,
        })
    }

    /// Current policy
    #[must_use]
    pub fn get(&self) -> AccessPolicy {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, AccessPolicy> {
        self.policy.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AccessPolicy> {
        self.policy.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a role to a list. Returns `false` if it was already there.
    ///
    /// # Errors
    /// Returns a storage error if the snapshot cannot be written.
    pub async fn add_role(&self, list: PolicyList, role_id: u64) -> ModerationResult<bool> {
        let changed = self.write().list_mut(list).insert(role_id);
        if changed {
            info!(list = %list, role_id, "Role added to access policy");
            self.persist().await?;
        }
        Ok(changed)
    }

    /// Remove a role from a list. Returns `false` if it was not there.
    ///
    /// # Errors
    /// Returns a storage error if the snapshot cannot be written.
    pub async fn remove_role(&self, list: PolicyList, role_id: u64) -> ModerationResult<bool> {
        let changed = self.write().list_mut(list).remove(&role_id);
        if changed {
            info!(list = %list, role_id, "Role removed from access policy");
            self.persist().await?;
        }
        Ok(changed)
    }

    /// Write the snapshot.
    ///
    /// # Errors
    /// Returns a storage error if the snapshot cannot be written.
    pub async fn persist(&self) -> ModerationResult<()> {
        self.file.save_with(|| self.get()).await
    }
}
