//! Grant handlers
//!
//! One handler per [`GrantKind`] knows how to apply a grant on the platform and
//! how to undo it. Reversal checks the live platform state first so that an
//! operator's manual change is never fought.

use super::{GrantKind, PendingGrant};
use crate::error::{ModerationError, ModerationResult};
use crate::platform::Platform;
use chrono::Utc;
use std::collections::HashMap;
use tracing::debug;

/// What a reversal found on the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reverted {
    /// The state was still in place and has been removed
    Applied,
    /// The state had already been removed by someone else
    NotHeld,
    /// The member has left the guild
    SubjectGone,
}

/// Trait for applying and reversing a kind of grant
#[async_trait::async_trait]
pub trait GrantHandler: Send + Sync {
    async fn apply(&self, platform: &dyn Platform, grant: &PendingGrant) -> ModerationResult<()>;

    /// Undo the grant if the platform still shows it, recording `reason` in the audit log
    async fn reverse(
        &self,
        platform: &dyn Platform,
        grant: &PendingGrant,
        reason: &str,
    ) -> ModerationResult<Reverted>;
}

/// Registry of grant handlers
pub struct GrantHandlerRegistry {
    handlers: HashMap<GrantKind, Box<dyn GrantHandler>>,
}

impl Default for GrantHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GrantHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantHandlerRegistry")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl GrantHandlerRegistry {
    /// Create a registry with every kind registered
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };

        registry.register(GrantKind::Timeout, Box::new(TimeoutHandler));
        registry.register(GrantKind::Mute, Box::new(RoleHandler));
        registry.register(GrantKind::TempRole, Box::new(RoleHandler));
        registry.register(GrantKind::Ban, Box::new(BanHandler));

        registry
    }

    pub fn register(&mut self, kind: GrantKind, handler: Box<dyn GrantHandler>) {
        self.handlers.insert(kind, handler);
    }

    #[must_use]
    pub fn get(&self, kind: GrantKind) -> Option<&dyn GrantHandler> {
        self.handlers.get(&kind).map(AsRef::as_ref)
    }

    /// Apply a grant.
    ///
    /// # Errors
    /// Returns the platform's error, or `InvalidInput` if no handler is registered.
    pub async fn apply(
        &self,
        platform: &dyn Platform,
        grant: &PendingGrant,
    ) -> ModerationResult<()> {
        self.handler_for(grant.kind)?.apply(platform, grant).await
    }

    /// Reverse a grant.
    ///
    /// # Errors
    /// Returns the platform's error, or `InvalidInput` if no handler is registered.
    pub async fn reverse(
        &self,
        platform: &dyn Platform,
        grant: &PendingGrant,
        reason: &str,
    ) -> ModerationResult<Reverted> {
        self.handler_for(grant.kind)?
            .reverse(platform, grant, reason)
            .await
    }

    fn handler_for(&self, kind: GrantKind) -> ModerationResult<&dyn GrantHandler> {
        self.get(kind).ok_or_else(|| {
            ModerationError::InvalidInput(format!("No handler registered for grant kind: {kind}"))
        })
    }
}

/// Platform communication timeout
pub struct TimeoutHandler;

#[async_trait::async_trait]
impl GrantHandler for TimeoutHandler {
    async fn apply(&self, platform: &dyn Platform, grant: &PendingGrant) -> ModerationResult<()> {
        platform
            .apply_timeout(grant.guild(), grant.subject(), grant.expires_at, &grant.reason)
            .await
    }

    async fn reverse(
        &self,
        platform: &dyn Platform,
        grant: &PendingGrant,
        reason: &str,
    ) -> ModerationResult<Reverted> {
        let Some(member) = platform.member(grant.guild(), grant.subject()).await? else {
            return Ok(Reverted::SubjectGone);
        };
        if !member.is_timed_out(Utc::now()) {
            debug!(grant_id = %grant.id, "Timeout already lifted");
            return Ok(Reverted::NotHeld);
        }

        platform
            .clear_timeout(grant.guild(), grant.subject(), reason)
            .await?;
        Ok(Reverted::Applied)
    }
}

/// Mute role and other temporary roles
pub struct RoleHandler;

#[async_trait::async_trait]
impl GrantHandler for RoleHandler {
    async fn apply(&self, platform: &dyn Platform, grant: &PendingGrant) -> ModerationResult<()> {
        platform
            .add_role(grant.guild(), grant.subject(), grant.role()?, &grant.reason)
            .await
    }

    async fn reverse(
        &self,
        platform: &dyn Platform,
        grant: &PendingGrant,
        reason: &str,
    ) -> ModerationResult<Reverted> {
        let role_id = grant.role()?;
        let Some(member) = platform.member(grant.guild(), grant.subject()).await? else {
            return Ok(Reverted::SubjectGone);
        };
        if !member.holds_role(role_id.get()) {
            debug!(grant_id = %grant.id, "Role {role_id} already removed");
            return Ok(Reverted::NotHeld);
        }

        platform
            .remove_role(grant.guild(), grant.subject(), role_id, reason)
            .await?;
        Ok(Reverted::Applied)
    }
}

/// Guild ban
pub struct BanHandler;

#[async_trait::async_trait]
impl GrantHandler for BanHandler {
    async fn apply(&self, platform: &dyn Platform, grant: &PendingGrant) -> ModerationResult<()> {
        platform.ban(grant.guild(), grant.subject(), &grant.reason).await
    }

    async fn reverse(
        &self,
        platform: &dyn Platform,
        grant: &PendingGrant,
        reason: &str,
    ) -> ModerationResult<Reverted> {
        let banned = platform
            .fetch_ban_entry(grant.guild(), grant.subject())
            .await?
            .is_some();
        // The ban can still be lifted between the lookup and the unban
        if banned && platform.unban(grant.guild(), grant.subject(), reason).await? {
            return Ok(Reverted::Applied);
        }
        debug!(grant_id = %grant.id, "Ban already lifted");
        Ok(Reverted::NotHeld)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::GrantRequest;
    use crate::platform::{BanEntry, MemberSnapshot, MockPlatform};
    use poise::serenity_prelude::{GuildId, RoleId, UserId};

    fn grant(kind: GrantKind) -> PendingGrant {
        let mut request = GrantRequest::new(1, 2, kind, 60, "spam");
        if kind.needs_role() {
            request = request.with_role(3);
        }
        PendingGrant::from_request(&request, Utc::now()).unwrap()
    }

    fn member(role_ids: Vec<u64>, timed_out: bool) -> MemberSnapshot {
        MemberSnapshot {
            user_id: 2,
            role_ids,
            timed_out_until: timed_out.then(|| Utc::now() + chrono::Duration::minutes(5)),
        }
    }

    #[tokio::test]
    async fn test_timeout_apply_uses_deadline() {
        let grant = grant(GrantKind::Timeout);
        let expires_at = grant.expires_at;
        let mut platform = MockPlatform::new();
        platform
            .expect_apply_timeout()
            .withf(move |guild, user, until, reason| {
                *guild == GuildId::new(1)
                    && *user == UserId::new(2)
                    && *until == expires_at
                    && reason == "spam"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        GrantHandlerRegistry::new().apply(&platform, &grant).await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_reverse_skips_lifted_timeout() {
        let mut platform = MockPlatform::new();
        platform
            .expect_member()
            .returning(|_, _| Ok(Some(member(vec![], false))));
        platform.expect_clear_timeout().never();

        let outcome = GrantHandlerRegistry::new()
            .reverse(&platform, &grant(GrantKind::Timeout), "Timeout expired")
            .await
            .unwrap();
        assert_eq!(outcome, Reverted::NotHeld);
    }

    #[tokio::test]
    async fn test_timeout_reverse_clears_active_timeout() {
        let mut platform = MockPlatform::new();
        platform
            .expect_member()
            .returning(|_, _| Ok(Some(member(vec![], true))));
        platform
            .expect_clear_timeout()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let outcome = GrantHandlerRegistry::new()
            .reverse(&platform, &grant(GrantKind::Timeout), "Timeout expired")
            .await
            .unwrap();
        assert_eq!(outcome, Reverted::Applied);
    }

    #[tokio::test]
    async fn test_role_reverse_when_member_left() {
        let mut platform = MockPlatform::new();
        platform.expect_member().returning(|_, _| Ok(None));
        platform.expect_remove_role().never();

        let outcome = GrantHandlerRegistry::new()
            .reverse(&platform, &grant(GrantKind::TempRole), "Temporary role expired")
            .await
            .unwrap();
        assert_eq!(outcome, Reverted::SubjectGone);
    }

    #[tokio::test]
    async fn test_role_reverse_removes_held_role() {
        let mut platform = MockPlatform::new();
        platform
            .expect_member()
            .returning(|_, _| Ok(Some(member(vec![3], false))));
        platform
            .expect_remove_role()
            .withf(|guild, user, role, reason| {
                *guild == GuildId::new(1)
                    && *user == UserId::new(2)
                    && *role == RoleId::new(3)
                    && reason == "Mute expired"
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let outcome = GrantHandlerRegistry::new()
            .reverse(&platform, &grant(GrantKind::Mute), "Mute expired")
            .await
            .unwrap();
        assert_eq!(outcome, Reverted::Applied);
    }

    #[tokio::test]
    async fn test_ban_reverse_checks_ban_list() {
        let mut platform = MockPlatform::new();
        platform
            .expect_fetch_ban_entry()
            .withf(|_, user| user.get() == 2)
            .times(1)
            .returning(|_, user| {
                Ok(Some(BanEntry {
                    user_id: user.get(),
                    reason: Some("spam".to_string()),
                }))
            });
        platform
            .expect_unban()
            .withf(|_, user, reason| user.get() == 2 && reason == "Temporary ban expired")
            .times(1)
            .returning(|_, _, _| Ok(true));

        let outcome = GrantHandlerRegistry::new()
            .reverse(&platform, &grant(GrantKind::Ban), "Temporary ban expired")
            .await
            .unwrap();
        assert_eq!(outcome, Reverted::Applied);

        let mut platform = MockPlatform::new();
        platform.expect_fetch_ban_entry().returning(|_, _| Ok(None));
        platform.expect_unban().never();
        let outcome = GrantHandlerRegistry::new()
            .reverse(&platform, &grant(GrantKind::Ban), "Temporary ban expired")
            .await
            .unwrap();
        assert_eq!(outcome, Reverted::NotHeld);
    }

    #[tokio::test]
    async fn test_ban_lifted_after_lookup_is_not_held() {
        let mut platform = MockPlatform::new();
        platform.expect_fetch_ban_entry().returning(|_, user| {
            Ok(Some(BanEntry {
                user_id: user.get(),
                reason: None,
            }))
        });
        // Unknown Ban from the unban call
        platform.expect_unban().times(1).returning(|_, _, _| Ok(false));

        let outcome = GrantHandlerRegistry::new()
            .reverse(&platform, &grant(GrantKind::Ban), "Temporary ban expired")
            .await
            .unwrap();
        assert_eq!(outcome, Reverted::NotHeld);
    }

    #[tokio::test]
    async fn test_platform_errors_propagate() {
        let mut platform = MockPlatform::new();
        platform.expect_ban().returning(|_, _, _| {
            Err(ModerationError::PlatformActionFailed("Missing Permissions".to_string()))
        });

        let result = GrantHandlerRegistry::new()
            .apply(&platform, &grant(GrantKind::Ban))
            .await;
        assert!(matches!(result, Err(ModerationError::PlatformActionFailed(_))));
    }
}
