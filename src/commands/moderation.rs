use super::{
    announce, ensure_allowed, ensure_allowed_with, guild_id, reason_or_default, reply,
    reply_error,
};
use crate::duration::{describe_duration, parse_duration};
use crate::error::ModerationError;
use crate::grant::{GrantKind, GrantRequest};
use crate::logging::log_moderation_action;
use crate::{Context, Error};
use poise::serenity_prelude::{self as serenity, Permissions};

/// Parse a raw user ID typed by a moderator
fn parse_user_id(text: &str) -> Option<u64> {
    text.trim()
        .trim_start_matches("<@")
        .trim_end_matches('>')
        .trim_start_matches('!')
        .parse()
        .ok()
        .filter(|id| *id != 0)
}

/// Parse the duration argument, replying with the error on failure
async fn parse_or_reply(ctx: Context<'_>, duration: &str) -> Result<Option<u64>, Error> {
    match parse_duration(duration) {
        Ok(secs) => Ok(Some(secs)),
        Err(e) => {
            reply_error(ctx, &ModerationError::from(e)).await?;
            Ok(None)
        }
    }
}

/// Hand a temporary grant to the scheduler and report the result
async fn issue(
    ctx: Context<'_>,
    action: &str,
    request: GrantRequest,
    notice: String,
) -> Result<(), Error> {
    let subject_id = request.subject_id;
    let reason = request.reason.clone();
    match ctx.data().scheduler.grant(request).await {
        Ok(_) => {
            log_moderation_action(ctx, action, subject_id, &reason);
            announce(ctx, notice).await
        }
        Err(e) => reply_error(ctx, &e).await,
    }
}

/// Time out a member for a duration such as `10m` or `2h`
#[poise::command(slash_command, guild_only)]
pub async fn timeout(
    ctx: Context<'_>,
    #[description = "Member to time out"] user: serenity::User,
    #[description = "Duration, e.g. 10m, 2h, 1d"] duration: String,
    #[description = "Reason for the timeout"] reason: Option<String>,
) -> Result<(), Error> {
    if !ensure_allowed(ctx).await? {
        return Ok(());
    }
    let Some(secs) = parse_or_reply(ctx, &duration).await? else {
        return Ok(());
    };
    ctx.defer_ephemeral().await?;

    let reason = reason_or_default(reason);
    let notice = format!(
        "🔇 <@{}> has been timed out for `{}`. Reason: `{reason}`",
        user.id,
        describe_duration(secs)
    );
    let request = GrantRequest::new(
        guild_id(ctx)?,
        user.id.get(),
        GrantKind::Timeout,
        secs,
        reason,
    );
    issue(ctx, "timeout", request, notice).await
}

/// Lift a member's timeout early
#[poise::command(slash_command, guild_only)]
pub async fn removetimeout(
    ctx: Context<'_>,
    #[description = "Member to release"] user: serenity::User,
    #[description = "Reason for lifting the timeout"] reason: Option<String>,
) -> Result<(), Error> {
    if !ensure_allowed(ctx).await? {
        return Ok(());
    }
    ctx.defer_ephemeral().await?;

    let reason = reason_or_default(reason);
    let result = ctx
        .data()
        .scheduler
        .revoke(
            guild_id(ctx)?,
            user.id.get(),
            GrantKind::Timeout,
            None,
            &reason,
        )
        .await;
    match result {
        Ok(_) => {
            log_moderation_action(ctx, "removetimeout", user.id.get(), &reason);
            announce(ctx, format!("🔊 <@{}> has been removed from timeout.", user.id)).await
        }
        Err(ModerationError::NotFound(_)) => {
            reply(ctx, format!("⚠️ <@{}> is not currently timed out!", user.id), true).await
        }
        Err(e) => reply_error(ctx, &e).await,
    }
}

/// Give a member the mute role for a duration
#[poise::command(slash_command, guild_only)]
pub async fn mute(
    ctx: Context<'_>,
    #[description = "Member to mute"] user: serenity::User,
    #[description = "Duration, e.g. 10m, 2h, 1d"] duration: String,
    #[description = "Reason for the mute"] reason: Option<String>,
) -> Result<(), Error> {
    if !ensure_allowed(ctx).await? {
        return Ok(());
    }
    let Some(mute_role_id) = ctx.data().config.mute_role_id else {
        return reply_error(
            ctx,
            &ModerationError::InvalidInput("No mute role is configured.".to_string()),
        )
        .await;
    };
    let Some(secs) = parse_or_reply(ctx, &duration).await? else {
        return Ok(());
    };
    ctx.defer_ephemeral().await?;

    let reason = reason_or_default(reason);
    let notice = format!(
        "🔇 <@{}> has been muted for `{}`. Reason: `{reason}`",
        user.id,
        describe_duration(secs)
    );
    let request = GrantRequest::new(guild_id(ctx)?, user.id.get(), GrantKind::Mute, secs, reason)
        .with_role(mute_role_id);
    issue(ctx, "mute", request, notice).await
}

/// Take the mute role away early
#[poise::command(slash_command, guild_only)]
pub async fn unmute(
    ctx: Context<'_>,
    #[description = "Member to unmute"] user: serenity::User,
    #[description = "Reason for lifting the mute"] reason: Option<String>,
) -> Result<(), Error> {
    if !ensure_allowed(ctx).await? {
        return Ok(());
    }
    let Some(mute_role_id) = ctx.data().config.mute_role_id else {
        return reply_error(
            ctx,
            &ModerationError::InvalidInput("No mute role is configured.".to_string()),
        )
        .await;
    };
    ctx.defer_ephemeral().await?;

    let reason = reason_or_default(reason);
    let result = ctx
        .data()
        .scheduler
        .revoke(
            guild_id(ctx)?,
            user.id.get(),
            GrantKind::Mute,
            Some(mute_role_id),
            &reason,
        )
        .await;
    match result {
        Ok(_) => {
            log_moderation_action(ctx, "unmute", user.id.get(), &reason);
            announce(ctx, format!("🔊 <@{}> has been unmuted.", user.id)).await
        }
        Err(ModerationError::NotFound(_)) => {
            reply(ctx, format!("⚠️ <@{}> is not currently muted!", user.id), true).await
        }
        Err(e) => reply_error(ctx, &e).await,
    }
}

/// Give a member a role that is taken away again after a duration
#[poise::command(slash_command, guild_only)]
pub async fn temprole(
    ctx: Context<'_>,
    #[description = "Member to receive the role"] user: serenity::User,
    #[description = "Role to assign"] role: serenity::Role,
    #[description = "Duration, e.g. 10m, 2h, 1d"] duration: String,
    #[description = "Reason for the role"] reason: Option<String>,
) -> Result<(), Error> {
    if !ensure_allowed(ctx).await? {
        return Ok(());
    }
    let guild_id = guild_id(ctx)?;
    if role.id.get() == guild_id {
        return reply_error(
            ctx,
            &ModerationError::InvalidInput("The everyone role cannot be assigned.".to_string()),
        )
        .await;
    }
    let Some(secs) = parse_or_reply(ctx, &duration).await? else {
        return Ok(());
    };
    ctx.defer_ephemeral().await?;

    let reason = reason_or_default(reason);
    let notice = format!(
        "✅ <@&{}> role has been assigned to <@{}> for `{}`.",
        role.id,
        user.id,
        describe_duration(secs)
    );
    let request = GrantRequest::new(guild_id, user.id.get(), GrantKind::TempRole, secs, reason)
        .with_role(role.id.get());
    issue(ctx, "temprole", request, notice).await
}

/// Ban a member permanently
#[poise::command(slash_command, guild_only)]
pub async fn ban(
    ctx: Context<'_>,
    #[description = "Member to ban"] user: serenity::User,
    #[description = "Reason for the ban"] reason: Option<String>,
) -> Result<(), Error> {
    if !ensure_allowed_with(ctx, Permissions::BAN_MEMBERS, "ban users").await? {
        return Ok(());
    }
    ctx.defer_ephemeral().await?;

    let guild_id = guild_id(ctx)?;
    let reason = reason_or_default(reason);
    if let Err(e) = ctx
        .data()
        .scheduler
        .ban_permanently(guild_id, user.id.get(), &reason)
        .await
    {
        return reply_error(ctx, &e).await;
    }

    log_moderation_action(ctx, "ban", user.id.get(), &reason);
    announce(ctx, format!("✅ <@{}> was banned! Reason: {reason}", user.id)).await
}

/// Ban a member for a duration
#[poise::command(slash_command, guild_only)]
pub async fn tempban(
    ctx: Context<'_>,
    #[description = "Member to ban"] user: serenity::User,
    #[description = "Duration, e.g. 1d, 7d"] duration: String,
    #[description = "Reason for the ban"] reason: Option<String>,
) -> Result<(), Error> {
    if !ensure_allowed_with(ctx, Permissions::BAN_MEMBERS, "ban users").await? {
        return Ok(());
    }
    let Some(secs) = parse_or_reply(ctx, &duration).await? else {
        return Ok(());
    };
    ctx.defer_ephemeral().await?;

    let reason = reason_or_default(reason);
    let notice = format!(
        "✅ <@{}> was banned for `{}`! Reason: {reason}",
        user.id,
        describe_duration(secs)
    );
    let request = GrantRequest::new(guild_id(ctx)?, user.id.get(), GrantKind::Ban, secs, reason);
    issue(ctx, "tempban", request, notice).await
}

/// Lift a ban by user ID
#[poise::command(slash_command, guild_only)]
pub async fn unban(
    ctx: Context<'_>,
    #[description = "ID of the banned user"] user_id: String,
    #[description = "Reason for the unban"] reason: Option<String>,
) -> Result<(), Error> {
    if !ensure_allowed_with(ctx, Permissions::BAN_MEMBERS, "unban users").await? {
        return Ok(());
    }
    let Some(subject_id) = parse_user_id(&user_id) else {
        return reply(
            ctx,
            "❌ Invalid user ID format. Please provide a valid numeric ID.",
            true,
        )
        .await;
    };
    ctx.defer_ephemeral().await?;

    let reason = reason_or_default(reason);
    let result = ctx
        .data()
        .scheduler
        .revoke(guild_id(ctx)?, subject_id, GrantKind::Ban, None, &reason)
        .await;
    match result {
        Ok(_) => {
            log_moderation_action(ctx, "unban", subject_id, &reason);
            announce(ctx, format!("✅ Successfully unbanned <@{subject_id}>.")).await
        }
        Err(ModerationError::NotFound(_)) => {
            reply(ctx, "❌ That user is not currently banned.", true).await
        }
        Err(e) => reply_error(ctx, &e).await,
    }
}
