//! Penalty ledger
//!
//! Durable per-member moderation record: current flags, the warning counter
//! and timestamped history. Every mutation is an upsert keyed by member ID and
//! runs under that key's map lock, so two operations on the same member never
//! interleave destructively.

use crate::error::ModerationResult;
use crate::persistence::YamlFile;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// One timestamped entry in a member's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub date: DateTime<Utc>,
    pub reason: String,
}

/// Moderation record of one member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRecord {
    pub id: u64,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub mute_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub banned: bool,
    #[serde(default)]
    pub ban_reason: Option<String>,
    #[serde(default)]
    pub warnings: u32,
    #[serde(default)]
    pub timeout_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub ban_history: Vec<HistoryEntry>,
    pub first_seen: DateTime<Utc>,
}

impl SubjectRecord {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self {
            id,
            muted: false,
            mute_end: None,
            banned: false,
            ban_reason: None,
            warnings: 0,
            timeout_history: Vec::new(),
            ban_history: Vec::new(),
            first_seen: Utc::now(),
        }
    }

    /// Timeouts recorded within `window` before `now`
    #[must_use]
    pub fn timeouts_within(&self, window: Duration, now: DateTime<Utc>) -> usize {
        let since = now - window;
        self.timeout_history
            .iter()
            .filter(|entry| entry.date >= since && entry.date <= now)
            .count()
    }
}

/// Read-only view used by `/userinfo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PenaltySummary {
    pub recent_timeouts: usize,
    pub banned: bool,
    pub muted: bool,
    pub mute_end: Option<DateTime<Utc>>,
    pub warnings: u32,
}

impl PenaltySummary {
    /// Penalties that are in force right now
    #[must_use]
    pub fn active_penalties(&self, now: DateTime<Utc>) -> Vec<&'static str> {
        let mut active = Vec::new();
        if self.muted && self.mute_end.is_none_or(|end| end > now) {
            active.push("Active Timeout");
        }
        if self.banned {
            active.push("Active Ban");
        }
        active
    }
}

/// Result of counting a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strike {
    /// Counter incremented to this value
    Warned(u32),
    /// Threshold reached; counter reset to zero
    Escalated,
}

/// Store for member moderation records
#[derive(Clone, Debug)]
pub struct PenaltyLedger {
    records: Arc<DashMap<u64, SubjectRecord>>,
    file: YamlFile<Vec<SubjectRecord>>,
}

impl Default for PenaltyLedger {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl PenaltyLedger {
    /// A ledger that never touches disk
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            file: YamlFile::in_memory(),
        }
    }

    /// Open the ledger snapshot at `path`, starting empty if it does not exist yet.
    ///
    /// # Errors
    /// Returns a storage error if the snapshot exists but cannot be read.
    pub async fn open(path: &Path) -> ModerationResult<Self> {
        let ledger = Self {
            records: Arc::new(DashMap::new()),
            file: YamlFile::new(path),
        };

        if let Some(records) = ledger.file.load().await? {
            for record in records {
                ledger.records.insert(record.id, record);
            }
        }

        info!(path = %path.display(), subjects = ledger.len(), "Penalty ledger loaded");
        Ok(ledger)
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
    pub fn get(&self, id: u64) -> Option<SubjectRecord> {
        self.records.get(&id).map(|entry| entry.value().clone())
    }

    /// Every record, in no particular order
    #[must_use]
    pub fn all(&self) -> Vec<SubjectRecord> {
        self.records.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Register a member on first observation. Returns `true` if the record is new.
    ///
    /// # Errors
    /// Returns a storage error if the snapshot cannot be written.
    pub async fn register(&self, id: u64) -> ModerationResult<bool> {
        let mut created = false;
        self.records.entry(id).or_insert_with(|| {
            created = true;
            SubjectRecord::new(id)
        });

        if created {
            info!(subject_id = id, "Member registered in penalty ledger");
            self.persist().await?;
        }
        Ok(created)
    }

    /// Mark a member as muted until `until` and append to the timeout history.
    ///
    /// # Errors
    /// Returns a storage error if the snapshot cannot be written.
    pub async fn record_mute(
        &self,
        id: u64,
        until: DateTime<Utc>,
        reason: &str,
    ) -> ModerationResult<SubjectRecord> {
        self.update(id, |record| {
            record.muted = true;
            record.mute_end = Some(until);
            record.timeout_history.push(HistoryEntry {
                date: Utc::now(),
                reason: reason.to_string(),
            });
        })
        .await
    }

    /// Move the denormalized mute deadline without touching history.
    ///
    /// # Errors
    /// Returns a storage error if the snapshot cannot be written.
    pub async fn set_mute_end(&self, id: u64, until: DateTime<Utc>) -> ModerationResult<SubjectRecord> {
        self.update(id, |record| {
            record.muted = true;
            record.mute_end = Some(until);
        })
        .await
    }

    /// Clear the mute flags. Idempotent.
    ///
    /// # Errors
    /// Returns a storage error if the snapshot cannot be written.
    pub async fn clear_mute(&self, id: u64) -> ModerationResult<SubjectRecord> {
        self.update(id, |record| {
            record.muted = false;
            record.mute_end = None;
        })
        .await
    }

    /// Mark a member as banned and append to the ban history.
    ///
    /// # Errors
    /// Returns a storage error if the snapshot cannot be written.
    pub async fn record_ban(&self, id: u64, reason: &str) -> ModerationResult<SubjectRecord> {
        self.update(id, |record| {
            record.banned = true;
            record.ban_reason = Some(reason.to_string());
            record.ban_history.push(HistoryEntry {
                date: Utc::now(),
                reason: reason.to_string(),
            });
        })
        .await
    }

    /// Clear the ban flag. Idempotent.
    ///
    /// # Errors
    /// Returns a storage error if the snapshot cannot be written.
    pub async fn clear_ban(&self, id: u64) -> ModerationResult<SubjectRecord> {
        self.update(id, |record| {
            record.banned = false;
        })
        .await
    }

    /// Count a violation against `threshold`.
    ///
    /// Below the threshold the counter is incremented. Reaching it resets the
    /// counter to zero in the same update, so concurrent violations escalate
    /// at most once per threshold crossing.
    ///
    /// # Errors
    /// Returns a storage error if the snapshot cannot be written.
    pub async fn strike(&self, id: u64, threshold: u32) -> ModerationResult<Strike> {
        let mut strike = Strike::Escalated;
        self.update(id, |record| {
            let warnings = record.warnings.saturating_add(1);
            if warnings >= threshold {
                record.warnings = 0;
            } else {
                record.warnings = warnings;
                strike = Strike::Warned(warnings);
            }
        })
        .await?;
        Ok(strike)
    }

    /// Summarize a member's penalties over the last `window`.
    #[must_use]
    pub fn summary(&self, id: u64, window: Duration, now: DateTime<Utc>) -> PenaltySummary {
        let record = self.get(id).unwrap_or_else(|| SubjectRecord::new(id));
        PenaltySummary {
            recent_timeouts: record.timeouts_within(window, now),
            banned: record.banned,
            muted: record.muted,
            mute_end: record.mute_end,
            warnings: record.warnings,
        }
    }

    /// Write the snapshot.
    ///
    /// # Errors
    /// Returns a storage error if the snapshot cannot be written.
    pub async fn persist(&self) -> ModerationResult<()> {
        self.file.save_with(|| self.all()).await
    }

    async fn update(
        &self,
        id: u64,
        apply: impl FnOnce(&mut SubjectRecord),
    ) -> ModerationResult<SubjectRecord> {
        let updated = {
            let mut entry = self.records.entry(id).or_insert_with(|| SubjectRecord::new(id));
            apply(entry.value_mut());
            entry.value().clone()
        };
        self.persist().await?;
        Ok(updated)
    }
}
