//! In-memory platform for lifecycle tests.

use super::{BanEntry, MemberSnapshot, Platform};
use crate::error::{ModerationError, ModerationResult};
use chrono::{DateTime, Utc};
use poise::serenity_prelude::{GuildId, RoleId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

#[derive(Default)]
struct FakeState {
    members: HashMap<(u64, u64), MemberSnapshot>,
    bans: HashSet<(u64, u64)>,
    calls: Vec<String>,
    logs: Vec<String>,
    fail_apply: bool,
    fail_reverse: bool,
    /// While set, member lookups wait until the gate is closed
    member_gate: Option<Arc<Semaphore>>,
    held_lookups: usize,
}

/// Records every call and tracks member state the way Discord would
#[derive(Default)]
pub(crate) struct FakePlatform {
    state: Mutex<FakeState>,
}

impl FakePlatform {
    pub(crate) fn with_member(guild_id: u64, user_id: u64, role_ids: Vec<u64>) -> Self {
        let platform = Self::default();
        platform.add_member(guild_id, user_id, role_ids);
        platform
    }

    pub(crate) fn add_member(&self, guild_id: u64, user_id: u64, role_ids: Vec<u64>) {
        self.state.lock().unwrap().members.insert(
            (guild_id, user_id),
            MemberSnapshot {
                user_id,
                role_ids,
                timed_out_until: None,
            },
        );
    }

    pub(crate) fn remove_member(&self, guild_id: u64, user_id: u64) {
        self.state.lock().unwrap().members.remove(&(guild_id, user_id));
    }

    pub(crate) fn snapshot(&self, guild_id: u64, user_id: u64) -> Option<MemberSnapshot> {
        self.state.lock().unwrap().members.get(&(guild_id, user_id)).cloned()
    }

    pub(crate) fn is_banned(&self, guild_id: u64, user_id: u64) -> bool {
        self.state.lock().unwrap().bans.contains(&(guild_id, user_id))
    }

    pub(crate) fn fail_apply(&self, fail: bool) {
        self.state.lock().unwrap().fail_apply = fail;
    }

    pub(crate) fn fail_reverse(&self, fail: bool) {
        self.state.lock().unwrap().fail_reverse = fail;
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|call| call.starts_with(prefix)).count()
    }

    /// Make member lookups wait. Closing the returned gate lets them through.
    pub(crate) fn hold_member_lookups(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.state.lock().unwrap().member_gate = Some(gate.clone());
        gate
    }

    /// Number of lookups that reached the gate
    pub(crate) fn held_lookups(&self) -> usize {
        self.state.lock().unwrap().held_lookups
    }

    pub(crate) fn logs(&self) -> Vec<String> {
        self.state.lock().unwrap().logs.clone()
    }

    fn record(&self, call: String, reversing: bool) -> ModerationResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.clone());
        let fail = if reversing { state.fail_reverse } else { state.fail_apply };
        if fail {
            return Err(ModerationError::PlatformActionFailed(format!("{call} refused")));
        }
        Ok(())
    }

    fn with_member_mut(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        apply: impl FnOnce(&mut MemberSnapshot),
    ) -> ModerationResult<()> {
        let mut state = self.state.lock().unwrap();
        let member = state
            .members
            .get_mut(&(guild_id.get(), user_id.get()))
            .ok_or_else(|| ModerationError::PlatformActionFailed("Unknown Member".to_string()))?;
        apply(member);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Platform for FakePlatform {
    async fn member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<Option<MemberSnapshot>> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            if state.member_gate.is_some() {
                state.held_lookups += 1;
            }
            state.member_gate.clone()
        };
        if let Some(gate) = gate {
            // Only ever released by close()
            let _ = gate.acquire().await;
        }
        Ok(self.snapshot(guild_id.get(), user_id.get()))
    }

    async fn apply_timeout(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        until: DateTime<Utc>,
        _reason: &str,
    ) -> ModerationResult<()> {
        self.record(format!("apply_timeout {user_id}"), false)?;
        self.with_member_mut(guild_id, user_id, |member| member.timed_out_until = Some(until))
    }

    async fn clear_timeout(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        _reason: &str,
    ) -> ModerationResult<()> {
        self.record(format!("clear_timeout {user_id}"), true)?;
        self.with_member_mut(guild_id, user_id, |member| member.timed_out_until = None)
    }

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        _reason: &str,
    ) -> ModerationResult<()> {
        self.record(format!("add_role {user_id} {role_id}"), false)?;
        self.with_member_mut(guild_id, user_id, |member| {
            if !member.role_ids.contains(&role_id.get()) {
                member.role_ids.push(role_id.get());
            }
        })
    }

    async fn remove_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        _reason: &str,
    ) -> ModerationResult<()> {
        self.record(format!("remove_role {user_id} {role_id}"), true)?;
        self.with_member_mut(guild_id, user_id, |member| {
            member.role_ids.retain(|role| *role != role_id.get());
        })
    }

    async fn ban(&self, guild_id: GuildId, user_id: UserId, _reason: &str) -> ModerationResult<()> {
        self.record(format!("ban {user_id}"), false)?;
        let mut state = self.state.lock().unwrap();
        state.bans.insert((guild_id.get(), user_id.get()));
        state.members.remove(&(guild_id.get(), user_id.get()));
        Ok(())
    }

    async fn unban(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        _reason: &str,
    ) -> ModerationResult<bool> {
        self.record(format!("unban {user_id}"), true)?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .bans
            .remove(&(guild_id.get(), user_id.get())))
    }

    async fn fetch_ban_entry(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> ModerationResult<Option<BanEntry>> {
        Ok(self.is_banned(guild_id.get(), user_id.get()).then(|| BanEntry {
            user_id: user_id.get(),
            reason: None,
        }))
    }

    async fn mirror_log(&self, message: &str) -> ModerationResult<()> {
        self.state.lock().unwrap().logs.push(message.to_string());
        Ok(())
    }
}
