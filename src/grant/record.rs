//! Pending grant records
//!
//! A pending grant is the durable promise that a temporary change will be
//! undone. Its deadline is absolute, so a restart can tell exactly how much of
//! the grant is left.

use super::GrantKind;
use crate::error::{ModerationError, ModerationResult};
use chrono::{DateTime, Duration, Utc};
use poise::serenity_prelude::{GuildId, RoleId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a moderator asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRequest {
    pub guild_id: u64,
    pub subject_id: u64,
    pub kind: GrantKind,
    pub resource_id: Option<u64>,
    pub duration_secs: u64,
    pub reason: String,
}

impl GrantRequest {
    pub fn new(
        guild_id: u64,
        subject_id: u64,
        kind: GrantKind,
        duration_secs: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            guild_id,
            subject_id,
            kind,
            resource_id: None,
            duration_secs,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn with_role(mut self, role_id: u64) -> Self {
        self.resource_id = Some(role_id);
        self
    }
}

/// A temporary change still owed a reversal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingGrant {
    pub id: String,
    pub subject_id: u64,
    pub guild_id: u64,
    pub kind: GrantKind,
    pub resource_id: Option<u64>,
    pub expires_at: DateTime<Utc>,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl PendingGrant {
    /// Validate a request and turn its duration into an absolute deadline.
    ///
    /// # Errors
    /// Returns `InvalidInput` for zero IDs, a zero or out-of-range duration, or a
    /// role grant without a role.
    pub fn from_request(request: &GrantRequest, now: DateTime<Utc>) -> ModerationResult<Self> {
        if request.guild_id == 0 || request.subject_id == 0 {
            return Err(ModerationError::InvalidInput(
                "guild and member IDs must be non-zero".to_string(),
            ));
        }
        if request.duration_secs == 0 {
            return Err(ModerationError::InvalidInput(
                "duration must be longer than zero".to_string(),
            ));
        }
        if let Some(max) = request.kind.max_duration_secs() {
            if request.duration_secs > max {
                return Err(ModerationError::InvalidInput(format!(
                    "a {} can last at most {} days",
                    request.kind,
                    max / 86_400
                )));
            }
        }
        match (request.kind.needs_role(), request.resource_id) {
            (true, None | Some(0)) => {
                return Err(ModerationError::InvalidInput(format!(
                    "a {} needs a role",
                    request.kind
                )));
            }
            (false, Some(_)) => {
                return Err(ModerationError::InvalidInput(format!(
                    "a {} does not take a role",
                    request.kind
                )));
            }
            _ => {}
        }

        let duration = i64::try_from(request.duration_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| ModerationError::InvalidInput("duration is too long".to_string()))?;
        let expires_at = now
            .checked_add_signed(duration)
            .ok_or_else(|| ModerationError::InvalidInput("duration is too long".to_string()))?;

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            subject_id: request.subject_id,
            guild_id: request.guild_id,
            kind: request.kind,
            resource_id: request.resource_id,
            expires_at,
            reason: request.reason.clone(),
            created_at: now,
        })
    }

    /// A record describing an existing state, used when an operator lifts it by hand.
    #[must_use]
    pub fn target(
        guild_id: u64,
        subject_id: u64,
        kind: GrantKind,
        resource_id: Option<u64>,
        reason: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("manual-{}", Uuid::new_v4()),
            subject_id,
            guild_id,
            kind,
            resource_id,
            expires_at: now,
            reason: reason.into(),
            created_at: now,
        }
    }

    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time left before expiry, zero once due
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.expires_at - now).to_std().unwrap_or_default()
    }

    /// Same member, guild, kind and role
    #[must_use]
    pub fn same_target(&self, other: &Self) -> bool {
        self.guild_id == other.guild_id
            && self.subject_id == other.subject_id
            && self.kind == other.kind
            && self.resource_id == other.resource_id
    }

    #[must_use]
    pub fn guild(&self) -> GuildId {
        GuildId::new(self.guild_id)
    }

    #[must_use]
    pub fn subject(&self) -> UserId {
        UserId::new(self.subject_id)
    }

    /// The role this grant hands out.
    ///
    /// # Errors
    /// Returns `InvalidInput` if the record carries no role.
    pub fn role(&self) -> ModerationResult<RoleId> {
        self.resource_id
            .filter(|id| *id != 0)
            .map(RoleId::new)
            .ok_or_else(|| ModerationError::InvalidInput(format!("{} without a role", self.kind)))
    }
}
