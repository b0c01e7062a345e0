//! Temporary grants
//!
//! A grant is a platform change with a deadline: a timeout, a mute, a
//! temporary role or a temporary ban. This module applies grants, persists
//! them and undoes each one when its time is up, including after a restart.

mod handler;
mod kind;
mod record;
mod scheduler;
mod store;

pub use handler::{
    BanHandler, GrantHandler, GrantHandlerRegistry, Reverted, RoleHandler, TimeoutHandler,
};
pub use kind::{GrantFamily, GrantKind, MAX_TIMEOUT_SECS};
pub use record::{GrantRequest, PendingGrant};
pub use scheduler::{GrantScheduler, RecoveryReport, ReversalOutcome, Revocation, SweepRequest};
pub use store::GrantStore;
