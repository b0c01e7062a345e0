//! Slash commands
//!
//! Every moderation command asks the access guard before doing anything.
//! Domain errors become an ephemeral reply; only Discord failures while
//! replying bubble up to the framework.

mod access;
mod info;
mod moderation;
mod owner;

pub use access::access;
pub use info::{ping, userinfo};
pub use owner::{liveinfo, sweep};
pub use moderation::{ban, mute, removetimeout, tempban, temprole, timeout, unban, unmute};

use crate::access::{AccessDecision, Requester};
use crate::error::ModerationError;
use crate::{Context, Data, ERROR_TARGET, Error};
use poise::serenity_prelude::Permissions;
use tracing::warn;

/// Reason recorded when a moderator gives none
pub const DEFAULT_REASON: &str = "No reason provided";

/// Every command the bot registers
#[must_use]
pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![
        ping(),
        timeout(),
        removetimeout(),
        mute(),
        unmute(),
        temprole(),
        ban(),
        tempban(),
        unban(),
        userinfo(),
        access(),
        liveinfo(),
        sweep(),
    ]
}

pub(crate) fn reason_or_default(reason: Option<String>) -> String {
    reason
        .map(|reason| reason.trim().to_string())
        .filter(|reason| !reason.is_empty())
        .unwrap_or_else(|| DEFAULT_REASON.to_string())
}

pub(crate) fn guild_id(ctx: Context<'_>) -> Result<u64, Error> {
    Ok(ctx
        .guild_id()
        .ok_or("this command only works in a server")?
        .get())
}

/// Permissions of the invoking member, as resolved by Discord for this interaction
async fn author_permissions(ctx: Context<'_>) -> Permissions {
    ctx.author_member()
        .await
        .and_then(|member| member.permissions)
        .unwrap_or_else(Permissions::empty)
}

async fn requester(ctx: Context<'_>) -> Result<Requester, Error> {
    let guild_id = guild_id(ctx)?;
    let member = ctx
        .author_member()
        .await
        .ok_or("could not resolve the invoking member")?;

    Ok(Requester {
        guild_id,
        user_id: ctx.author().id.get(),
        role_ids: member.roles.iter().map(|role| role.get()).collect(),
        is_admin: member
            .permissions
            .is_some_and(|permissions| permissions.administrator()),
    })
}

/// Run the access guard. Replies to the requester and returns `false` on denial.
pub(crate) async fn ensure_allowed(ctx: Context<'_>) -> Result<bool, Error> {
    let requester = requester(ctx).await?;
    match ctx.data().guard.authorize(&requester).await {
        Ok(AccessDecision::Allowed) => Ok(true),
        Ok(AccessDecision::Denied(denial)) => {
            reply(ctx, denial.message(), true).await?;
            Ok(false)
        }
        Err(e) => {
            reply_error(ctx, &e).await?;
            Ok(false)
        }
    }
}

/// Like [`ensure_allowed`], then also require a platform permission.
pub(crate) async fn ensure_allowed_with(
    ctx: Context<'_>,
    permission: Permissions,
    action: &str,
) -> Result<bool, Error> {
    if !ensure_allowed(ctx).await? {
        return Ok(false);
    }
    if let Err(e) = require_permission(author_permissions(ctx).await, permission, action) {
        reply_error(ctx, &e).await?;
        return Ok(false);
    }
    Ok(true)
}

/// Administrators pass every permission check
pub(crate) fn require_permission(
    granted: Permissions,
    required: Permissions,
    action: &str,
) -> Result<(), ModerationError> {
    if granted.administrator() || granted.contains(required) {
        return Ok(());
    }
    Err(ModerationError::PermissionDenied(format!(
        "You don't have permission to {action}!"
    )))
}

pub(crate) async fn reply(
    ctx: Context<'_>,
    content: impl Into<String>,
    ephemeral: bool,
) -> Result<(), Error> {
    ctx.send(
        poise::CreateReply::default()
            .content(content)
            .ephemeral(ephemeral),
    )
    .await?;
    Ok(())
}

/// Confirm an action to the moderator and mirror it to the log channel
pub(crate) async fn announce(ctx: Context<'_>, content: String) -> Result<(), Error> {
    reply(ctx, content.as_str(), true).await?;
    if let Err(e) = ctx.data().platform.mirror_log(&content).await {
        warn!(target: ERROR_TARGET, error = %e, "Failed to mirror moderation notice");
    }
    Ok(())
}

/// Log a domain error and show its user-facing message
pub(crate) async fn reply_error(ctx: Context<'_>, error: &ModerationError) -> Result<(), Error> {
    warn!(
        target: ERROR_TARGET,
        command = %ctx.command().qualified_name,
        user_id = %ctx.author().id,
        error = %error,
        "Moderation command failed"
    );
    reply(ctx, error.user_message(), true).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_defaults() {
        assert_eq!(reason_or_default(None), DEFAULT_REASON);
        assert_eq!(reason_or_default(Some("   ".to_string())), DEFAULT_REASON);
        assert_eq!(reason_or_default(Some(" spam ".to_string())), "spam");
    }

    #[test]
    fn test_require_permission() {
        assert!(require_permission(Permissions::BAN_MEMBERS, Permissions::BAN_MEMBERS, "ban users").is_ok());
        assert!(
            require_permission(Permissions::ADMINISTRATOR, Permissions::BAN_MEMBERS, "ban users")
                .is_ok()
        );

        let denied =
            require_permission(Permissions::KICK_MEMBERS, Permissions::BAN_MEMBERS, "ban users")
                .unwrap_err();
        assert!(matches!(denied, ModerationError::PermissionDenied(_)));
        assert_eq!(denied.user_message(), "⛔ You don't have permission to ban users!");
    }

    #[test]
    fn test_all_commands_are_guild_only_slash_commands() {
        let commands = all();
        let names: Vec<&str> = commands.iter().map(|cmd| cmd.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "ping",
                "timeout",
                "removetimeout",
                "mute",
                "unmute",
                "temprole",
                "ban",
                "tempban",
                "unban",
                "userinfo",
                "access",
                "liveinfo",
                "sweep"
            ]
        );
        for cmd in &commands {
            assert!(cmd.guild_only, "{} should be guild only", cmd.name);
            assert!(cmd.create_as_slash_command().is_some());
        }
    }
}
