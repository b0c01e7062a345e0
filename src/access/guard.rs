//! Access guard for moderation commands
//!
//! Every moderation command asks the guard first. Administrators always pass.
//! Otherwise a non-empty allowlist decides alone; without one, holders of a
//! blacklisted role collect warnings and are timed out once they reach the
//! configured threshold.

use super::{AccessPolicyStore, PolicyMode};
use crate::ACCESS_TARGET;
use crate::duration::describe_duration;
use crate::error::ModerationResult;
use crate::grant::{GrantKind, GrantRequest, GrantScheduler};
use crate::ledger::{PenaltyLedger, Strike};
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Reason recorded on automatic timeouts
pub const AUTO_TIMEOUT_REASON: &str = "auto-timeout: repeated violations";

/// The member invoking a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub guild_id: u64,
    pub user_id: u64,
    pub role_ids: Vec<u64>,
    pub is_admin: bool,
}

impl Requester {
    /// Whether the member holds any of `roles`. The implicit everyone role,
    /// whose ID is the guild ID, never counts.
    fn holds_any(&self, roles: &BTreeSet<u64>) -> bool {
        self.role_ids
            .iter()
            .any(|role| *role != self.guild_id && roles.contains(role))
    }
}

/// Why a requester was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// An allowlist is configured and the requester holds none of its roles
    NotAllowlisted,
    /// Blacklisted; the warning counter now stands at `warnings`
    Warned { warnings: u32, threshold: u32 },
    /// Blacklisted and out of warnings. `applied` is false if the timeout
    /// could not be put in place.
    AutoTimedOut { applied: bool, duration_secs: u64 },
}

impl Denial {
    /// Whether the denial changed anything on the platform
    #[must_use]
    pub const fn side_effect_applied(&self) -> bool {
        matches!(self, Self::AutoTimedOut { applied: true, .. })
    }

    /// Reply shown to the requester
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::NotAllowlisted => {
                "❌ You do not have permission to use this moderation command.".to_string()
            }
            Self::Warned {
                warnings,
                threshold,
            } => format!(
                "⚠️ Warning {warnings}/{threshold}: You are blacklisted from using moderation commands."
            ),
            Self::AutoTimedOut {
                applied: true,
                duration_secs,
            } => format!(
                "🚫 You have been automatically timed out for {} due to repeated violations.",
                describe_duration(*duration_secs)
            ),
            Self::AutoTimedOut { applied: false, .. } => {
                "🚫 You are blacklisted from using moderation commands and have run out of warnings."
                    .to_string()
            }
        }
    }
}

/// Outcome of an access check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Denied(Denial),
}

impl AccessDecision {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Decides who may run moderation commands
#[derive(Clone, Debug)]
pub struct AccessGuard {
    policy: AccessPolicyStore,
    ledger: PenaltyLedger,
    scheduler: GrantScheduler,
    warning_threshold: u32,
    auto_timeout_secs: u64,
}

impl AccessGuard {
    #[must_use]
    pub fn new(
        policy: AccessPolicyStore,
        ledger: PenaltyLedger,
        scheduler: GrantScheduler,
        warning_threshold: u32,
        auto_timeout_secs: u64,
    ) -> Self {
        Self {
            policy,
            ledger,
            scheduler,
            warning_threshold: warning_threshold.max(1),
            auto_timeout_secs,
        }
    }

    /// Check whether `requester` may run a moderation command.
    ///
    /// # Errors
    /// Returns a storage error if the warning counter cannot be persisted.
    pub async fn authorize(&self, requester: &Requester) -> ModerationResult<AccessDecision> {
        if requester.is_admin {
            return Ok(AccessDecision::Allowed);
        }

        let policy = self.policy.get();
        let decision = match policy.mode() {
            PolicyMode::Open => AccessDecision::Allowed,
            PolicyMode::Allowlist(roles) => {
                if requester.holds_any(roles) {
                    AccessDecision::Allowed
                } else {
                    AccessDecision::Denied(Denial::NotAllowlisted)
                }
            }
            PolicyMode::Blacklist(roles) => {
                if requester.holds_any(roles) {
                    AccessDecision::Denied(self.strike(requester).await?)
                } else {
                    AccessDecision::Allowed
                }
            }
        };

        if let AccessDecision::Denied(denial) = decision {
            info!(
                target: ACCESS_TARGET,
                guild_id = requester.guild_id,
                user_id = requester.user_id,
                denial = ?denial,
                "Moderation command denied"
            );
        }
        Ok(decision)
    }

    async fn strike(&self, requester: &Requester) -> ModerationResult<Denial> {
        match self
            .ledger
            .strike(requester.user_id, self.warning_threshold)
            .await?
        {
            Strike::Warned(warnings) => Ok(Denial::Warned {
                warnings,
                threshold: self.warning_threshold,
            }),
            Strike::Escalated => {
                let request = GrantRequest::new(
                    requester.guild_id,
                    requester.user_id,
                    GrantKind::Timeout,
                    self.auto_timeout_secs,
                    AUTO_TIMEOUT_REASON,
                );
                let applied = match self.scheduler.grant(request).await {
                    Ok(grant) => {
                        info!(
                            target: ACCESS_TARGET,
                            user_id = requester.user_id,
                            grant_id = %grant.id,
                            "Blacklisted member automatically timed out"
                        );
                        true
                    }
                    Err(e) => {
                        warn!(
                            target: ACCESS_TARGET,
                            user_id = requester.user_id,
                            "Automatic timeout failed: {e}"
                        );
                        false
                    }
                };
                Ok(Denial::AutoTimedOut {
                    applied,
                    duration_secs: self.auto_timeout_secs,
                })
            }
        }
    }
}
