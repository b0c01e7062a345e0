//! Kinds of temporary grants

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Discord refuses communication timeouts longer than 28 days.
pub const MAX_TIMEOUT_SECS: u64 = 28 * 86_400;

/// Type of temporary state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    /// Platform communication timeout
    #[display("Timeout")]
    Timeout,
    /// Configured mute role
    #[display("Mute")]
    Mute,
    /// Arbitrary role handed out for a limited time
    #[display("Temporary Role")]
    TempRole,
    /// Guild ban lifted at expiry
    #[display("Temporary Ban")]
    Ban,
}

/// Grants in the same family share the ledger's denormalized flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantFamily {
    /// Timeout and mute: `muted` / `mute_end`
    Silence,
    /// `banned`
    Ban,
    /// No ledger flag
    Role,
}

impl GrantKind {
    #[must_use]
    pub const fn family(self) -> GrantFamily {
        match self {
            Self::Timeout | Self::Mute => GrantFamily::Silence,
            Self::Ban => GrantFamily::Ban,
            Self::TempRole => GrantFamily::Role,
        }
    }

    /// Whether the grant targets a role and needs a resource ID
    #[must_use]
    pub const fn needs_role(self) -> bool {
        matches!(self, Self::Mute | Self::TempRole)
    }

    /// Longest duration the platform accepts, if limited
    #[must_use]
    pub const fn max_duration_secs(self) -> Option<u64> {
        match self {
            Self::Timeout => Some(MAX_TIMEOUT_SECS),
            Self::Mute | Self::TempRole | Self::Ban => None,
        }
    }

    /// Audit log reason used when the grant expires
    #[must_use]
    pub const fn expiry_reason(self) -> &'static str {
        match self {
            Self::Timeout => "Timeout expired",
            Self::Mute => "Mute expired",
            Self::TempRole => "Temporary role expired",
            Self::Ban => "Temporary ban expired",
        }
    }
}
