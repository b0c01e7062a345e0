use super::{guild_id, reply};
use crate::access::{AccessPolicy, PolicyList};
use crate::{Context, Error};
use poise::serenity_prelude::{self as serenity, CreateEmbed};

/// Role list picked in a slash command
#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum ListChoice {
    #[name = "allowlist"]
    Allowlist,
    #[name = "blacklist"]
    Blacklist,
}

impl From<ListChoice> for PolicyList {
    fn from(choice: ListChoice) -> Self {
        match choice {
            ListChoice::Allowlist => Self::Allowlist,
            ListChoice::Blacklist => Self::Blacklist,
        }
    }
}

fn role_lines(roles: &std::collections::BTreeSet<u64>) -> String {
    if roles.is_empty() {
        return "None".to_string();
    }
    roles
        .iter()
        .map(|role| format!("<@&{role}>"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Embed fields for the current policy
pub(crate) fn policy_fields(policy: &AccessPolicy) -> [(&'static str, String); 2] {
    [
        ("✅ Allowed Roles", role_lines(&policy.allowlist)),
        ("🚫 Blacklisted Roles", role_lines(&policy.blacklist)),
    ]
}

/// How many of the highest roles may change settings
const SETTINGS_ROLE_COUNT: usize = 2;

/// IDs of the `count` highest roles, given `(id, position)` pairs
pub(crate) fn top_roles(roles: &[(u64, u16)], count: usize) -> Vec<u64> {
    let mut ranked = roles.to_vec();
    ranked.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(count).map(|(id, _)| id).collect()
}

async fn role_positions(ctx: Context<'_>) -> Result<Vec<(u64, u16)>, Error> {
    if let Some(guild) = ctx.guild() {
        return Ok(guild
            .roles
            .values()
            .map(|role| (role.id.get(), role.position))
            .collect());
    }
    let guild_id = serenity::GuildId::new(guild_id(ctx)?);
    Ok(guild_id
        .roles(ctx.http())
        .await?
        .values()
        .map(|role| (role.id.get(), role.position))
        .collect())
}

/// Settings are reserved for holders of the guild's two highest roles
async fn holds_top_role(ctx: Context<'_>) -> Result<bool, Error> {
    let member_roles: Vec<u64> = ctx
        .author_member()
        .await
        .map(|member| member.roles.iter().map(|role| role.get()).collect())
        .unwrap_or_default();
    let top = top_roles(&role_positions(ctx).await?, SETTINGS_ROLE_COUNT);
    if top.iter().any(|role| member_roles.contains(role)) {
        return Ok(true);
    }
    reply(ctx, "❌ Only the top two highest roles can access settings!", true).await?;
    Ok(false)
}

/// Manage which roles may use moderation commands
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR",
    check = "holds_top_role",
    subcommands("show", "add", "remove"),
    subcommand_required
)]
pub async fn access(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show the allowlist and blacklist
#[poise::command(slash_command, guild_only)]
pub async fn show(ctx: Context<'_>) -> Result<(), Error> {
    let policy = ctx.data().policy.get();
    let mut embed = CreateEmbed::new()
        .title("🔧 Command Access Settings")
        .colour(serenity::Colour::BLUE);
    for (name, value) in policy_fields(&policy) {
        embed = embed.field(name, value, false);
    }

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Put a role on a list
#[poise::command(slash_command, guild_only)]
pub async fn add(
    ctx: Context<'_>,
    #[description = "List to change"] list: ListChoice,
    #[description = "Role to add"] role: serenity::Role,
) -> Result<(), Error> {
    let list = PolicyList::from(list);
    if role.id.get() == guild_id(ctx)? {
        return reply(ctx, "❌ The everyone role cannot be used here.", true).await;
    }

    let store = &ctx.data().policy;
    if store.get().list(list.other()).contains(&role.id.get()) {
        return reply(
            ctx,
            format!(
                "❌ <@&{}> is already on the {}. Remove it there first.",
                role.id,
                list.other()
            ),
            true,
        )
        .await;
    }

    match store.add_role(list, role.id.get()).await {
        Ok(true) => reply(ctx, format!("✅ Added <@&{}> to the {list}.", role.id), true).await,
        Ok(false) => {
            reply(ctx, format!("ℹ️ <@&{}> is already on the {list}.", role.id), true).await
        }
        Err(e) => super::reply_error(ctx, &e).await,
    }
}

/// Take a role off a list
#[poise::command(slash_command, guild_only)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "List to change"] list: ListChoice,
    #[description = "Role to remove"] role: serenity::Role,
) -> Result<(), Error> {
    let list = PolicyList::from(list);
    match ctx.data().policy.remove_role(list, role.id.get()).await {
        Ok(true) => {
            reply(ctx, format!("✅ Removed <@&{}> from the {list}.", role.id), true).await
        }
        Ok(false) => reply(ctx, format!("ℹ️ <@&{}> is not on the {list}.", role.id), true).await,
        Err(e) => super::reply_error(ctx, &e).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_policy_fields() {
        let fields = policy_fields(&AccessPolicy::default());
        assert_eq!(fields[0], ("✅ Allowed Roles", "None".to_string()));
        assert_eq!(fields[1], ("🚫 Blacklisted Roles", "None".to_string()));

        let policy = AccessPolicy {
            allowlist: BTreeSet::from([2, 1]),
            blacklist: BTreeSet::from([3]),
        };
        let fields = policy_fields(&policy);
        assert_eq!(fields[0].1, "<@&1>\n<@&2>");
        assert_eq!(fields[1].1, "<@&3>");
    }

    #[test]
    fn test_choice_maps_to_list() {
        assert_eq!(PolicyList::from(ListChoice::Allowlist), PolicyList::Allowlist);
        assert_eq!(PolicyList::from(ListChoice::Blacklist), PolicyList::Blacklist);
    }

    #[test]
    fn test_access_command_tree() {
        let cmd = access();
        let names: Vec<&str> = cmd.subcommands.iter().map(|sub| sub.name.as_str()).collect();
        assert_eq!(names, vec!["show", "add", "remove"]);
        assert!(cmd.subcommand_required);
        assert!(cmd.default_member_permissions.administrator());
        assert_eq!(cmd.checks.len(), 1);
    }

    #[test]
    fn test_top_roles_by_position() {
        // (id, position); the everyone role sits at position 0
        let roles = [(1, 0), (10, 5), (11, 9), (12, 7), (13, 7)];
        assert_eq!(top_roles(&roles, 2), vec![11, 12]);
        assert_eq!(top_roles(&roles, 3), vec![11, 12, 13]);
        assert_eq!(top_roles(&[(1, 0)], 2), vec![1]);
        assert!(top_roles(&[], 2).is_empty());
    }
}
