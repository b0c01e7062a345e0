//! Temporary grant scheduler
//!
//! Applies grants, keeps one timer per pending grant and reverses each grant
//! exactly once when its deadline passes. Pending grants are durable: after a
//! restart [`GrantScheduler::recover`] reverses what expired while the process
//! was down and re-arms the rest.

use super::{
    GrantFamily, GrantHandlerRegistry, GrantKind, GrantRequest, GrantStore, PendingGrant, Reverted,
};
use crate::GRANT_TARGET;
use crate::error::{ModerationError, ModerationResult};
use crate::ledger::PenaltyLedger;
use crate::platform::Platform;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Longest single sleep a timer takes before re-checking its remaining time
const MAX_TIMER_SLICE: Duration = Duration::from_secs(7 * 86_400);

/// Guild, member, kind and role of a grant
type TargetKey = (u64, u64, GrantKind, Option<u64>);

/// Requests accepted by the sweeper task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepRequest {
    /// Reverse everything that is due right away
    SweepNow,
    /// Stop the sweeper and disarm all timers
    Shutdown,
}

/// Result of a reversal attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReversalOutcome {
    /// The grant was already gone or another caller is reversing it
    AlreadyCleared,
    /// The grant was deleted. `reverted` is `None` if the platform call failed.
    Completed { reverted: Option<Reverted> },
}

/// Result of lifting a state by hand
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revocation {
    pub reverted: Reverted,
    /// Pending grants that were cancelled along the way
    pub cancelled: Vec<PendingGrant>,
}

/// What startup recovery did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub reversed: usize,
    pub armed: usize,
    pub failed: usize,
    /// Ledger records whose mute flag had no backing grant
    pub reconciled: usize,
}

/// Scheduler for temporary grants
#[derive(Clone)]
pub struct GrantScheduler {
    store: GrantStore,
    ledger: PenaltyLedger,
    platform: Arc<dyn Platform>,
    handlers: Arc<GrantHandlerRegistry>,
    timers: Arc<DashMap<String, JoinHandle<()>>>,
    /// Serializes apply, reverse and revoke on one target
    target_locks: Arc<DashMap<TargetKey, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for GrantScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantScheduler")
            .field("pending", &self.store.len())
            .field("armed", &self.timers.len())
            .finish_non_exhaustive()
    }
}

impl GrantScheduler {
    #[must_use]
    pub fn new(store: GrantStore, ledger: PenaltyLedger, platform: Arc<dyn Platform>) -> Self {
        Self {
            store,
            ledger,
            platform,
            handlers: Arc::new(GrantHandlerRegistry::new()),
            timers: Arc::new(DashMap::new()),
            target_locks: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub fn store(&self) -> &GrantStore {
        &self.store
    }

    /// Number of timers currently held
    #[must_use]
    pub fn armed(&self) -> usize {
        self.timers.len()
    }

    /// Pending grants for a member in a guild
    #[must_use]
    pub fn pending_for(&self, guild_id: u64, subject_id: u64) -> Vec<PendingGrant> {
        self.store.for_member(guild_id, subject_id)
    }

    /// Apply a temporary change and schedule its reversal.
    ///
    /// An older pending grant for the same member, kind and role is replaced.
    ///
    /// # Errors
    /// Returns `InvalidInput` for a bad request, `PlatformActionFailed` if the
    /// platform refuses (nothing is recorded then), or `Storage` if a snapshot
    /// write fails after the change was applied. In the last case the grant is
    /// still tracked in memory and its timer is armed.
    pub async fn grant(&self, request: GrantRequest) -> ModerationResult<PendingGrant> {
        let grant = PendingGrant::from_request(&request, Utc::now())?;
        let _target = self.lock_target(&grant).await;

        self.handlers.apply(self.platform.as_ref(), &grant).await?;

        let superseded = self.cancel_matching(|existing| existing.same_target(&grant)).await;
        let recorded = self.record_in_ledger(&grant).await;
        let stored = self.store.insert(grant.clone()).await;
        self.arm(&grant);

        info!(
            target: GRANT_TARGET,
            grant_id = %grant.id,
            guild_id = grant.guild_id,
            subject_id = grant.subject_id,
            kind = %grant.kind,
            expires_at = %grant.expires_at,
            superseded = superseded.as_ref().map_or(0, Vec::len),
            "Temporary grant issued"
        );

        superseded?;
        recorded?;
        stored?;
        Ok(grant)
    }

    /// Undo an expired grant and forget it.
    ///
    /// Only one caller can reverse a given grant; everyone else gets
    /// [`ReversalOutcome::AlreadyCleared`], as does a grant cancelled while
    /// this call waited for its target. A platform failure is logged and the
    /// grant is deleted anyway.
    ///
    /// # Errors
    /// Returns a storage error if the grant snapshot cannot be written.
    pub async fn reverse(&self, grant_id: &str) -> ModerationResult<ReversalOutcome> {
        let Some(grant) = self.store.claim(grant_id) else {
            debug!(target: GRANT_TARGET, grant_id, "Grant already cleared");
            return Ok(ReversalOutcome::AlreadyCleared);
        };
        let _target = self.lock_target(&grant).await;

        if !self.store.contains(grant_id) {
            // Replaced or revoked while waiting; the canceller owns the state now
            self.store.remove(grant_id).await?;
            debug!(target: GRANT_TARGET, grant_id, "Grant cancelled before reversal");
            return Ok(ReversalOutcome::AlreadyCleared);
        }

        let reverted = if self.has_successor(&grant) {
            debug!(target: GRANT_TARGET, grant_id, "Grant superseded, leaving platform state");
            Some(Reverted::NotHeld)
        } else {
            match self
                .handlers
                .reverse(self.platform.as_ref(), &grant, grant.kind.expiry_reason())
                .await
            {
                Ok(reverted) => Some(reverted),
                Err(e) => {
                    warn!(
                        target: GRANT_TARGET,
                        grant_id,
                        subject_id = grant.subject_id,
                        "Failed to reverse {} on the platform: {e}",
                        grant.kind
                    );
                    None
                }
            }
        };

        if let Err(e) = self.release_ledger(&grant).await {
            error!(target: GRANT_TARGET, grant_id, "Failed to update ledger after reversal: {e}");
        }
        self.store.remove(grant_id).await?;

        info!(
            target: GRANT_TARGET,
            grant_id,
            guild_id = grant.guild_id,
            subject_id = grant.subject_id,
            kind = %grant.kind,
            outcome = ?reverted,
            "Temporary grant expired"
        );
        self.announce(&format!(
            "⌛ {} for <@{}> has expired{}.",
            grant.kind,
            grant.subject_id,
            if reverted.is_none() {
                " but could not be removed automatically"
            } else {
                ""
            }
        ))
        .await;

        Ok(ReversalOutcome::Completed { reverted })
    }

    /// Lift a state by hand and cancel any pending grant for it.
    ///
    /// # Errors
    /// Returns `PlatformActionFailed` if the platform refuses, or `NotFound` if
    /// the state was not in place and nothing was pending.
    pub async fn revoke(
        &self,
        guild_id: u64,
        subject_id: u64,
        kind: GrantKind,
        resource_id: Option<u64>,
        reason: &str,
    ) -> ModerationResult<Revocation> {
        if guild_id == 0 || subject_id == 0 {
            return Err(ModerationError::InvalidInput(
                "guild and member IDs must be non-zero".to_string(),
            ));
        }
        let target = PendingGrant::target(guild_id, subject_id, kind, resource_id, reason);
        let _target = self.lock_target(&target).await;
        let reverted = self
            .handlers
            .reverse(self.platform.as_ref(), &target, reason)
            .await?;

        let cancelled = self
            .cancel_matching(|existing| existing.same_target(&target))
            .await?;
        self.release_ledger(&target).await?;

        if reverted != Reverted::Applied && cancelled.is_empty() {
            return Err(ModerationError::NotFound(format!(
                "User {subject_id} has no active {kind}"
            )));
        }

        info!(
            target: GRANT_TARGET,
            guild_id,
            subject_id,
            kind = %kind,
            outcome = ?reverted,
            cancelled = cancelled.len(),
            "Grant revoked"
        );
        Ok(Revocation {
            reverted,
            cancelled,
        })
    }

    /// Ban a member with no end date. A pending temporary ban is cancelled so
    /// its expiry cannot lift this one.
    ///
    /// # Errors
    /// Returns `PlatformActionFailed` if the platform refuses (nothing changes
    /// then), or `Storage` if the grant snapshot or ledger cannot be written.
    pub async fn ban_permanently(
        &self,
        guild_id: u64,
        subject_id: u64,
        reason: &str,
    ) -> ModerationResult<Vec<PendingGrant>> {
        if guild_id == 0 || subject_id == 0 {
            return Err(ModerationError::InvalidInput(
                "guild and member IDs must be non-zero".to_string(),
            ));
        }
        let target = PendingGrant::target(guild_id, subject_id, GrantKind::Ban, None, reason);
        let _target = self.lock_target(&target).await;

        self.platform
            .ban(target.guild(), target.subject(), reason)
            .await?;
        let cancelled = self
            .cancel_matching(|existing| existing.same_target(&target))
            .await;
        let recorded = self.ledger.record_ban(subject_id, reason).await;

        info!(
            target: GRANT_TARGET,
            guild_id,
            subject_id,
            cancelled = cancelled.as_ref().map_or(0, Vec::len),
            "Permanent ban issued"
        );
        recorded?;
        cancelled
    }

    /// Reconcile pending grants with the clock after a restart.
    ///
    /// # Errors
    /// Returns a storage error if ledger reconciliation cannot be written.
    pub async fn recover(&self) -> ModerationResult<RecoveryReport> {
        let now = Utc::now();
        let mut report = RecoveryReport::default();

        for grant in self.store.all() {
            if !grant.is_due(now) {
                self.arm(&grant);
                report.armed += 1;
                continue;
            }

            match self.reverse(&grant.id).await {
                Ok(ReversalOutcome::Completed { .. }) => report.reversed += 1,
                Ok(ReversalOutcome::AlreadyCleared) => {}
                Err(e) => {
                    error!(target: GRANT_TARGET, grant_id = %grant.id, "Recovery reversal failed: {e}");
                    report.failed += 1;
                }
            }
        }

        report.reconciled = self.reconcile_ledger().await?;

        info!(
            target: GRANT_TARGET,
            reversed = report.reversed,
            armed = report.armed,
            failed = report.failed,
            reconciled = report.reconciled,
            "Grant recovery complete"
        );
        Ok(report)
    }

    /// Reverse every grant whose wall-clock deadline has passed and drop
    /// finished timer handles. Returns the number of grants reversed.
    pub async fn sweep(&self) -> usize {
        self.timers.retain(|_, handle| !handle.is_finished());
        self.target_locks.retain(|_, lock| Arc::strong_count(lock) > 1);

        let mut reversed = 0;
        for grant_id in self.store.due(Utc::now()) {
            if let Some((_, handle)) = self.timers.remove(&grant_id) {
                handle.abort();
            }
            match self.reverse(&grant_id).await {
                Ok(ReversalOutcome::Completed { .. }) => reversed += 1,
                Ok(ReversalOutcome::AlreadyCleared) => {}
                Err(e) => error!(target: GRANT_TARGET, grant_id = %grant_id, "Sweep reversal failed: {e}"),
            }
        }
        reversed
    }

    /// Spawn the periodic sweeper and return its request channel
    pub fn start_sweeper(&self, interval_secs: u64) -> Sender<SweepRequest> {
        let (tx, rx) = mpsc::channel::<SweepRequest>(16);
        let scheduler = self.clone();
        tokio::spawn(async move {
            scheduler.sweeper_task(rx, interval_secs).await;
        });
        tx
    }

    /// Put back role grants a member shed by leaving and rejoining. Returns
    /// the number of grants re-applied.
    pub async fn reapply_on_rejoin(&self, guild_id: u64, subject_id: u64) -> usize {
        let now = Utc::now();
        let mut reapplied = 0;

        for grant in self.store.for_member(guild_id, subject_id) {
            if !grant.kind.needs_role() || grant.is_due(now) {
                continue;
            }
            let _target = self.lock_target(&grant).await;
            if !self.store.contains(&grant.id) {
                continue;
            }
            match self.handlers.apply(self.platform.as_ref(), &grant).await {
                Ok(()) => {
                    info!(target: GRANT_TARGET, grant_id = %grant.id, subject_id, "Re-applied {} after rejoin", grant.kind);
                    reapplied += 1;
                }
                Err(e) => {
                    warn!(target: GRANT_TARGET, grant_id = %grant.id, subject_id, "Failed to re-apply {}: {e}", grant.kind);
                }
            }
        }
        reapplied
    }

    /// Abort every timer. Pending grants stay on disk for the next start.
    pub fn disarm_all(&self) {
        self.timers.retain(|_, handle| {
            handle.abort();
            false
        });
    }

    /// Wait for exclusive use of `grant`'s target
    async fn lock_target(&self, grant: &PendingGrant) -> OwnedMutexGuard<()> {
        let key: TargetKey = (grant.guild_id, grant.subject_id, grant.kind, grant.resource_id);
        let lock = self.target_locks.entry(key).or_default().value().clone();
        lock.lock_owned().await
    }

    fn arm(&self, grant: &PendingGrant) {
        let scheduler = self.clone();
        let grant_id = grant.id.clone();
        let mut remaining = grant.remaining(Utc::now());

        let handle = tokio::spawn(async move {
            while remaining > MAX_TIMER_SLICE {
                tokio::time::sleep(MAX_TIMER_SLICE).await;
                remaining -= MAX_TIMER_SLICE;
            }
            tokio::time::sleep(remaining).await;

            scheduler.timers.remove(&grant_id);
            if let Err(e) = scheduler.reverse(&grant_id).await {
                error!(target: GRANT_TARGET, grant_id = %grant_id, "Timed reversal failed: {e}");
            }
        });

        if let Some(previous) = self.timers.insert(grant.id.clone(), handle) {
            previous.abort();
        }
    }

    /// Callers hold the target lock, so a matching grant that is claimed is
    /// waiting for it and will see the removal.
    async fn cancel_matching(
        &self,
        predicate: impl Fn(&PendingGrant) -> bool,
    ) -> ModerationResult<Vec<PendingGrant>> {
        let removed = self.store.remove_matching(predicate).await?;
        for grant in &removed {
            if let Some((_, handle)) = self.timers.remove(&grant.id) {
                handle.abort();
            }
            debug!(target: GRANT_TARGET, grant_id = %grant.id, "Pending grant cancelled");
        }
        Ok(removed)
    }

    fn has_successor(&self, grant: &PendingGrant) -> bool {
        self.store
            .for_member(grant.guild_id, grant.subject_id)
            .iter()
            .any(|other| other.id != grant.id && other.same_target(grant))
    }

    /// Other pending grants sharing `grant`'s ledger flag
    fn family_siblings(&self, grant: &PendingGrant) -> Vec<PendingGrant> {
        self.store
            .for_subject(grant.subject_id)
            .into_iter()
            .filter(|other| other.id != grant.id && other.kind.family() == grant.kind.family())
            .collect()
    }

    async fn record_in_ledger(&self, grant: &PendingGrant) -> ModerationResult<()> {
        match grant.kind.family() {
            GrantFamily::Silence => {
                let until = self
                    .family_siblings(grant)
                    .iter()
                    .map(|other| other.expires_at)
                    .chain(std::iter::once(grant.expires_at))
                    .max()
                    .unwrap_or(grant.expires_at);
                self.ledger
                    .record_mute(grant.subject_id, until, &grant.reason)
                    .await?;
            }
            GrantFamily::Ban => {
                self.ledger.record_ban(grant.subject_id, &grant.reason).await?;
            }
            GrantFamily::Role => {
                self.ledger.register(grant.subject_id).await?;
            }
        }
        Ok(())
    }

    async fn release_ledger(&self, released: &PendingGrant) -> ModerationResult<()> {
        let siblings = self.family_siblings(released);
        match released.kind.family() {
            GrantFamily::Silence => {
                match siblings.iter().map(|other| other.expires_at).max() {
                    Some(latest) => {
                        self.ledger.set_mute_end(released.subject_id, latest).await?;
                    }
                    None => {
                        self.ledger.clear_mute(released.subject_id).await?;
                    }
                }
            }
            GrantFamily::Ban => {
                if siblings.is_empty() {
                    self.ledger.clear_ban(released.subject_id).await?;
                }
            }
            GrantFamily::Role => {}
        }
        Ok(())
    }

    /// Clear mute flags that no pending grant backs
    async fn reconcile_ledger(&self) -> ModerationResult<usize> {
        let mut reconciled = 0;
        for record in self.ledger.all() {
            if !record.muted {
                continue;
            }
            let backed = self
                .store
                .for_subject(record.id)
                .iter()
                .any(|grant| grant.kind.family() == GrantFamily::Silence);
            if !backed {
                self.ledger.clear_mute(record.id).await?;
                reconciled += 1;
            }
        }
        Ok(reconciled)
    }

    async fn announce(&self, message: &str) {
        if let Err(e) = self.platform.mirror_log(message).await {
            debug!(target: GRANT_TARGET, "Could not mirror grant notice: {e}");
        }
    }

    async fn sweeper_task(&self, mut rx: Receiver<SweepRequest>, interval_secs: u64) {
        info!(target: GRANT_TARGET, "Starting grant sweeper with {interval_secs}s interval");

        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                request = rx.recv() => {
                    match request {
                        Some(SweepRequest::SweepNow) => {
                            info!(target: GRANT_TARGET, "Received request to sweep grants");
                            self.sweep().await;
                        }
                        Some(SweepRequest::Shutdown) | None => {
                            info!(target: GRANT_TARGET, "Received shutdown request for grant sweeper");
                            break;
                        }
                    }
                },

                _ = interval.tick() => {
                    let reversed = self.sweep().await;
                    if reversed > 0 {
                        info!(target: GRANT_TARGET, reversed, "Periodic sweep reversed overdue grants");
                    } else {
                        debug!(target: GRANT_TARGET, "Periodic sweep found nothing due");
                    }
                }
            }
        }

        self.disarm_all();
        info!(target: GRANT_TARGET, "Grant sweeper shut down");
    }
}
