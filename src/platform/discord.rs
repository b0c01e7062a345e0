//! Discord implementation of [`Platform`] over serenity's HTTP client.

use super::{BanEntry, MemberSnapshot, Platform};
use crate::error::{ModerationError, ModerationResult};
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{
    self as serenity, ChannelId, EditMember, GuildId, Http, RoleId, Timestamp, UserId,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Platform backed by the bot's HTTP client
#[derive(Clone)]
pub struct SerenityPlatform {
    http: Arc<Http>,
    log_channel_id: Option<ChannelId>,
}

impl std::fmt::Debug for SerenityPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerenityPlatform")
            .field("log_channel_id", &self.log_channel_id)
            .finish_non_exhaustive()
    }
}

impl SerenityPlatform {
    #[must_use]
    pub fn new(http: Arc<Http>, log_channel_id: Option<u64>) -> Self {
        Self {
            http,
            log_channel_id: log_channel_id.map(ChannelId::new),
        }
    }
}

fn is_not_found(error: &serenity::Error) -> bool {
    matches!(
        error,
        serenity::Error::Http(http_error)
            if http_error.status_code().is_some_and(|status| status.as_u16() == 404)
    )
}

fn failed(action: &str, user_id: UserId, error: &serenity::Error) -> ModerationError {
    ModerationError::PlatformActionFailed(format!("{action} for user {user_id}: {error}"))
}

fn to_datetime(timestamp: Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.unix_timestamp(), 0)
}

#[async_trait::async_trait]
impl Platform for SerenityPlatform {
    async fn member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<Option<MemberSnapshot>> {
        match guild_id.member(self.http.as_ref(), user_id).await {
            Ok(member) => Ok(Some(MemberSnapshot {
                user_id: member.user.id.get(),
                role_ids: member.roles.iter().map(|role| role.get()).collect(),
                timed_out_until: member.communication_disabled_until.and_then(to_datetime),
            })),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(failed("fetch member", user_id, &e)),
        }
    }

    async fn apply_timeout(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        until: DateTime<Utc>,
        reason: &str,
    ) -> ModerationResult<()> {
        let builder = EditMember::new()
            .disable_communication_until_datetime(Timestamp::from(until))
            .audit_log_reason(reason);
        guild_id
            .edit_member(self.http.as_ref(), user_id, builder)
            .await
            .map_err(|e| failed("timeout", user_id, &e))?;

        info!("Timed out user {user_id} in guild {guild_id} until {until}");
        Ok(())
    }

    async fn clear_timeout(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
    ) -> ModerationResult<()> {
        let builder = EditMember::new().enable_communication().audit_log_reason(reason);
        guild_id
            .edit_member(self.http.as_ref(), user_id, builder)
            .await
            .map_err(|e| failed("clear timeout", user_id, &e))?;

        info!("Cleared timeout for user {user_id} in guild {guild_id}");
        Ok(())
    }

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> ModerationResult<()> {
        self.http
            .add_member_role(guild_id, user_id, role_id, Some(reason))
            .await
            .map_err(|e| failed("add role", user_id, &e))?;

        info!("Added role {role_id} to user {user_id} in guild {guild_id}");
        Ok(())
    }

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> ModerationResult<()> {
        self.http
            .remove_member_role(guild_id, user_id, role_id, Some(reason))
            .await
            .map_err(|e| failed("remove role", user_id, &e))?;

        info!("Removed role {role_id} from user {user_id} in guild {guild_id}");
        Ok(())
    }

    async fn ban(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> ModerationResult<()> {
        guild_id
            .ban_with_reason(self.http.as_ref(), user_id, 0, reason)
            .await
            .map_err(|e| failed("ban", user_id, &e))?;

        info!("Banned user {user_id} from guild {guild_id}");
        Ok(())
    }

    async fn unban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        reason: &str,
    ) -> ModerationResult<bool> {
        // Unknown Ban comes back as a 404
        match self.http.remove_ban(guild_id, user_id, Some(reason)).await {
            Ok(()) => {
                info!("Unbanned user {user_id} in guild {guild_id}");
                Ok(true)
            }
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(failed("unban", user_id, &e)),
        }
    }

    async fn fetch_ban_entry(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<Option<BanEntry>> {
        let ban = self
            .http
            .get_ban(guild_id, user_id)
            .await
            .map_err(|e| failed("fetch ban", user_id, &e))?;

        Ok(ban.map(|ban| BanEntry {
            user_id: ban.user.id.get(),
            reason: ban.reason,
        }))
    }

    async fn mirror_log(&self, message: &str) -> ModerationResult<()> {
        let Some(channel_id) = self.log_channel_id else {
            return Ok(());
        };

        if let Err(e) = channel_id.say(self.http.as_ref(), message).await {
            warn!("Failed to mirror log message to channel {channel_id}: {e}");
            return Err(ModerationError::PlatformActionFailed(e.to_string()));
        }
        Ok(())
    }
}
