use super::reply;
use crate::{BOT_NAME, COMMAND_TARGET, Context, Error};
use poise::serenity_prelude::{self as serenity, CreateEmbed, CreateEmbedFooter, UserId};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// How often the live panel is redrawn
const LIVE_REFRESH: Duration = Duration::from_secs(5);
/// Redraws before the panel goes static, well inside the 15 minute interaction token
const LIVE_REFRESHES: u32 = 120;

/// Snapshot shown on the live panel
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LiveStats {
    pub ping: Duration,
    pub uptime: Duration,
    pub guilds: usize,
    pub owner: String,
}

pub(crate) fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn owner_label(owners: &HashSet<UserId>) -> String {
    let mut owners: Vec<u64> = owners.iter().map(|id| id.get()).collect();
    if owners.is_empty() {
        return "Unknown".to_string();
    }
    owners.sort_unstable();
    owners
        .iter()
        .map(|id| format!("<@{id}>"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn live_fields(stats: &LiveStats) -> [(&'static str, String); 5] {
    let ping_ms = stats.ping.as_secs_f64() * 1000.0;
    [
        ("📡 Ping", format!("⚡ `{ping_ms:.2} ms`")),
        ("⏳ Uptime", format!("🔄 `{}`", format_uptime(stats.uptime))),
        ("🌍 Servers", format!("🏠 `{}`", stats.guilds)),
        ("🔌 Status", "🟢 **Online**".to_string()),
        ("👑 Owner", stats.owner.clone()),
    ]
}

async fn live_embed(ctx: Context<'_>, owner: &str) -> CreateEmbed {
    let stats = LiveStats {
        ping: ctx.ping().await,
        uptime: ctx.data().started_at.elapsed(),
        guilds: ctx.cache().guild_count(),
        owner: owner.to_string(),
    };

    let mut embed = CreateEmbed::new()
        .title(format!("🤖 {BOT_NAME} - Live Status"))
        .description("📊 Real-time bot statistics")
        .colour(serenity::Colour::DARK_GREEN)
        .footer(CreateEmbedFooter::new(format!(
            "🔄 Updates every {} seconds",
            LIVE_REFRESH.as_secs()
        )));
    for (name, value) in live_fields(&stats) {
        embed = embed.field(name, value, true);
    }
    embed
}

/// Post a status panel that keeps itself up to date
#[poise::command(slash_command, guild_only, owners_only)]
pub async fn liveinfo(ctx: Context<'_>) -> Result<(), Error> {
    let owner = owner_label(&ctx.framework().options().owners);
    let handle = ctx
        .send(poise::CreateReply::default().embed(live_embed(ctx, &owner).await))
        .await?;

    let mut ticker = tokio::time::interval(LIVE_REFRESH);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    for _ in 0..LIVE_REFRESHES {
        ticker.tick().await;
        let embed = live_embed(ctx, &owner).await;
        if let Err(e) = handle
            .edit(ctx, poise::CreateReply::default().embed(embed))
            .await
        {
            warn!(target: COMMAND_TARGET, "Stopped refreshing live status: {e}");
            break;
        }
    }
    Ok(())
}

/// Reverse overdue temporary grants right away
#[poise::command(slash_command, guild_only, owners_only)]
pub async fn sweep(ctx: Context<'_>) -> Result<(), Error> {
    if ctx.data().request_sweep().await {
        info!(target: COMMAND_TARGET, user_id = %ctx.author().id, "Manual grant sweep requested");
        reply(ctx, "🧹 Sweeping overdue grants now.", true).await
    } else {
        reply(ctx, "⚠️ The grant sweeper is not running.", true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::ZERO), "0h 0m 0s");
        assert_eq!(format_uptime(Duration::from_secs(3_725)), "1h 2m 5s");
        assert_eq!(format_uptime(Duration::from_secs(90_061)), "25h 1m 1s");
    }

    #[test]
    fn test_owner_label() {
        assert_eq!(owner_label(&HashSet::new()), "Unknown");
        let owners = HashSet::from([UserId::new(9), UserId::new(4)]);
        assert_eq!(owner_label(&owners), "<@4>, <@9>");
    }

    #[test]
    fn test_live_fields() {
        let stats = LiveStats {
            ping: Duration::from_micros(42_500),
            uptime: Duration::from_secs(61),
            guilds: 3,
            owner: "<@4>".to_string(),
        };
        let fields = live_fields(&stats);
        assert_eq!(fields[0], ("📡 Ping", "⚡ `42.50 ms`".to_string()));
        assert_eq!(fields[1].1, "🔄 `0h 1m 1s`");
        assert_eq!(fields[2].1, "🏠 `3`");
        assert_eq!(fields[4].1, "<@4>");
    }

    #[test]
    fn test_owner_commands_are_owner_only() {
        for cmd in [liveinfo(), sweep()] {
            assert!(cmd.owners_only, "{} should be owner only", cmd.name);
        }
    }
}
