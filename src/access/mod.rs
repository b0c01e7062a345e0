//! Access control for moderation commands

mod guard;
mod policy;

pub use guard::{AUTO_TIMEOUT_REASON, AccessDecision, AccessGuard, Denial, Requester};
pub use policy::{AccessPolicy, AccessPolicyStore, PolicyList, PolicyMode};
