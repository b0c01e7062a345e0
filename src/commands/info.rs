use super::guild_id;
use crate::grant::PendingGrant;
use crate::ledger::PenaltySummary;
use crate::{Context, Error};
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{self as serenity, CreateEmbed};

/// Basic ping command
/// This command is used to check if the bot is responsive.
#[poise::command(slash_command, guild_only)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say("Pong!").await?;
    Ok(())
}

fn ban_status(banned: bool) -> &'static str {
    if banned { "🚫 Banned" } else { "✅ Not banned" }
}

/// Ledger-backed fields of the `/userinfo` embed
pub(crate) fn penalty_fields(
    summary: &PenaltySummary,
    pending: &[PendingGrant],
    window_days: i64,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let active = summary.active_penalties(now);
    let active = if active.is_empty() {
        "None".to_string()
    } else {
        active.join(", ")
    };

    let expiries = if pending.is_empty() {
        "None".to_string()
    } else {
        pending
            .iter()
            .map(|grant| format!("{} <t:{}:R>", grant.kind, grant.expires_at.timestamp()))
            .collect::<Vec<_>>()
            .join("\n")
    };

    vec![
        (
            format!("⏳ Timeouts (Last {window_days} days)"),
            summary.recent_timeouts.to_string(),
        ),
        ("🚫 Ban Status".to_string(), ban_status(summary.banned).to_string()),
        ("⚠️ Active Penalties".to_string(), active),
        ("📝 Access Warnings".to_string(), summary.warnings.to_string()),
        ("⌛ Pending Expiries".to_string(), expiries),
    ]
}

fn role_list(roles: &[serenity::RoleId]) -> String {
    if roles.is_empty() {
        return "None".to_string();
    }
    roles
        .iter()
        .map(|role| format!("<@&{role}>"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Show a member's account details and moderation record
#[poise::command(slash_command, guild_only)]
pub async fn userinfo(
    ctx: Context<'_>,
    #[description = "Member to look up (defaults to you)"] user: Option<serenity::User>,
) -> Result<(), Error> {
    let user = user.unwrap_or_else(|| ctx.author().clone());
    let guild_id = guild_id(ctx)?;
    let data = ctx.data();
    let now = Utc::now();

    let member = serenity::GuildId::new(guild_id)
        .member(ctx, user.id)
        .await
        .ok();
    let joined = member
        .as_ref()
        .and_then(|member| member.joined_at)
        .map_or_else(
            || "Not in this server".to_string(),
            |joined| format!("<t:{}:f>", joined.unix_timestamp()),
        );
    let roles = member
        .as_ref()
        .map_or_else(|| "None".to_string(), |member| role_list(&member.roles));

    let summary = data
        .ledger
        .summary(user.id.get(), data.config.history_window(), now);
    let pending = data.scheduler.pending_for(guild_id, user.id.get());

    let mut embed = CreateEmbed::new()
        .title(format!("👤 User Info: {}", user.name))
        .thumbnail(user.face())
        .colour(serenity::Colour::BLUE)
        .field("👤 Username", user.tag(), true)
        .field("🔢 User ID", user.id.to_string(), true)
        .field(
            "📆 Account Created",
            format!("<t:{}:f>", user.created_at().unix_timestamp()),
            false,
        )
        .field("🤝 Joined Server", joined, false)
        .field("🎭 Roles", roles, false);
    for (name, value) in penalty_fields(&summary, &pending, data.config.history_window_days, now) {
        embed = embed.field(name, value, false);
    }

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::{GrantKind, GrantRequest};

    fn summary() -> PenaltySummary {
        PenaltySummary {
            recent_timeouts: 0,
            banned: false,
            muted: false,
            mute_end: None,
            warnings: 0,
        }
    }

    #[test]
    fn test_clean_record_fields() {
        let fields = penalty_fields(&summary(), &[], 30, Utc::now());
        let names: Vec<&str> = fields.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "⏳ Timeouts (Last 30 days)",
                "🚫 Ban Status",
                "⚠️ Active Penalties",
                "📝 Access Warnings",
                "⌛ Pending Expiries"
            ]
        );
        assert_eq!(fields[0].1, "0");
        assert_eq!(fields[1].1, "✅ Not banned");
        assert_eq!(fields[2].1, "None");
        assert_eq!(fields[4].1, "None");
    }

    #[test]
    fn test_penalised_record_fields() {
        let now = Utc::now();
        let summary = PenaltySummary {
            recent_timeouts: 2,
            banned: true,
            muted: true,
            mute_end: Some(now + chrono::Duration::hours(1)),
            warnings: 1,
        };
        let grant = PendingGrant::from_request(
            &GrantRequest::new(1, 2, GrantKind::Timeout, 3600, "spam"),
            now,
        )
        .unwrap();

        let fields = penalty_fields(&summary, &[grant.clone()], 7, now);
        assert_eq!(fields[0].0, "⏳ Timeouts (Last 7 days)");
        assert_eq!(fields[0].1, "2");
        assert_eq!(fields[1].1, "🚫 Banned");
        assert_eq!(fields[2].1, "Active Timeout, Active Ban");
        assert_eq!(fields[3].1, "1");
        assert_eq!(
            fields[4].1,
            format!("Timeout <t:{}:R>", grant.expires_at.timestamp())
        );
    }

    #[test]
    fn test_role_list() {
        assert_eq!(role_list(&[]), "None");
        assert_eq!(
            role_list(&[serenity::RoleId::new(5), serenity::RoleId::new(6)]),
            "<@&5> <@&6>"
        );
    }
}
