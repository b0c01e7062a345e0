use crate::error::ModerationResult;
use crate::{Data, EVENT_TARGET, Error};
use poise::serenity_prelude::{self as serenity, Context, EventHandler, FullEvent, GuildId, Ready};
use tracing::{info, warn};

pub struct Handler;

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!(target: EVENT_TARGET, "Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                target: EVENT_TARGET,
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!(target: EVENT_TARGET, "Cache ready! The bot is in {guild_count} guild(s)");
    }
}

/// Framework-level events that need the shared data
pub async fn on_event(
    _ctx: &Context,
    event: &FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    if let FullEvent::GuildMemberAddition { new_member } = event {
        let guild_id = new_member.guild_id.get();
        let user_id = new_member.user.id.get();
        if let Err(e) = member_joined(data, guild_id, user_id).await {
            warn!(target: EVENT_TARGET, guild_id, user_id, "Failed to track joining member: {e}");
        }
    }
    Ok(())
}

/// Track a member who joined and put back any temporary roles they left with.
/// Returns the number of roles re-applied.
///
/// # Errors
/// Returns a storage error if the ledger cannot be written.
pub async fn member_joined(data: &Data, guild_id: u64, user_id: u64) -> ModerationResult<usize> {
    if data.ledger.register(user_id).await? {
        info!(target: EVENT_TARGET, guild_id, user_id, "New member tracked");
    }
    Ok(data.scheduler.reapply_on_rejoin(guild_id, user_id).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotConfig;
    use crate::grant::{GrantKind, GrantRequest};
    use crate::platform::fake::FakePlatform;
    use std::sync::Arc;

    #[test]
    fn test_handler_implements_event_handler() {
        fn assert_impl<T: EventHandler>() {}
        assert_impl::<Handler>();
    }

    #[tokio::test]
    async fn test_member_joined_registers_subject() {
        let platform = Arc::new(FakePlatform::with_member(1, 2, vec![]));
        let data = Data::in_memory(BotConfig::default(), platform);

        assert_eq!(member_joined(&data, 1, 2).await.unwrap(), 0);
        assert!(data.ledger.get(2).is_some());
        // Rejoining does not reset the record
        assert_eq!(member_joined(&data, 1, 2).await.unwrap(), 0);
        assert_eq!(data.ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_rejoin_restores_temporary_role() {
        let platform = Arc::new(FakePlatform::with_member(1, 2, vec![]));
        let data = Data::in_memory(BotConfig::default(), platform.clone());
        data.scheduler
            .grant(GrantRequest::new(1, 2, GrantKind::TempRole, 3600, "event").with_role(77))
            .await
            .unwrap();

        platform.remove_member(1, 2);
        platform.add_member(1, 2, vec![]);
        assert_eq!(member_joined(&data, 1, 2).await.unwrap(), 1);
        assert!(platform.snapshot(1, 2).unwrap().holds_role(77));
        data.scheduler.disarm_all();
    }
}
