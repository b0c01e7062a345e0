//! Platform operations
//!
//! Everything the bot asks Discord to do goes through [`Platform`], so the
//! grant engine and access guard can run against a fake in tests.

mod discord;
#[cfg(test)]
pub(crate) mod fake;

pub use discord::SerenityPlatform;

use crate::error::ModerationResult;
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{GuildId, RoleId, UserId};

/// What the platform currently knows about a guild member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSnapshot {
    pub user_id: u64,
    pub role_ids: Vec<u64>,
    pub timed_out_until: Option<DateTime<Utc>>,
}

impl MemberSnapshot {
    #[must_use]
    pub fn holds_role(&self, role_id: u64) -> bool {
        self.role_ids.contains(&role_id)
    }

    #[must_use]
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        self.timed_out_until.is_some_and(|until| until > now)
    }
}

/// An entry in a guild's ban list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanEntry {
    pub user_id: u64,
    pub reason: Option<String>,
}

/// Imperative operations against the chat platform.
///
/// Any failure is reported as [`crate::ModerationError::PlatformActionFailed`],
/// except a lookup of a member who is not in the guild, which is `Ok(None)`.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Platform: Send + Sync {
    async fn member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<Option<MemberSnapshot>>;

    async fn apply_timeout(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        until: DateTime<Utc>,
        reason: &str,
    ) -> ModerationResult<()>;

    async fn clear_timeout(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
    ) -> ModerationResult<()>;

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> ModerationResult<()>;

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> ModerationResult<()>;

    async fn ban(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> ModerationResult<()>;

    /// Lift a ban. Returns `false` when the user was not banned.
    async fn unban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
    ) -> ModerationResult<bool>;

    /// The user's ban in this guild, if there is one
    async fn fetch_ban_entry(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<Option<BanEntry>>;

    /// Mirror a notice to the configured moderation log channel, if any
    async fn mirror_log(&self, message: &str) -> ModerationResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_member_snapshot_helpers() {
        let now = Utc::now();
        let member = MemberSnapshot {
            user_id: 1,
            role_ids: vec![10, 20],
            timed_out_until: Some(now + Duration::minutes(5)),
        };
        assert!(member.holds_role(20));
        assert!(!member.holds_role(30));
        assert!(member.is_timed_out(now));
        assert!(!member.is_timed_out(now + Duration::minutes(6)));
    }
}
