use std::{ops::Deref, sync::Arc, sync::OnceLock, time::Instant};

use crate::access::{AccessGuard, AccessPolicyStore};
use crate::config::BotConfig;
use crate::error::ModerationResult;
use crate::grant::{GrantScheduler, GrantStore, RecoveryReport, SweepRequest};
use crate::ledger::PenaltyLedger;
use crate::platform::Platform;
use dashmap::DashMap;
use tokio::sync::mpsc::Sender;
use tracing::{error, info};

/// Centralized data structure for the bot
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("config", &self.config)
            .field("ledger", &self.ledger)
            .field("policy", &self.policy)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Everything commands and events share
pub struct DataInner {
    pub config: BotConfig,
    pub ledger: PenaltyLedger,
    pub policy: AccessPolicyStore,
    pub scheduler: GrantScheduler,
    pub guard: AccessGuard,
    pub platform: Arc<dyn Platform>,
    /// Start instants of running commands, keyed by invocation ID
    pub command_timings: DashMap<u64, Instant>,
    pub started_at: Instant,
    sweeper: OnceLock<Sender<SweepRequest>>,
}

impl Data {
    /// Open the snapshots under the configured data directory.
    ///
    /// # Errors
    /// Returns a storage error if an existing snapshot cannot be read.
    pub async fn load(config: BotConfig, platform: Arc<dyn Platform>) -> ModerationResult<Self> {
        let ledger = PenaltyLedger::open(&config.subjects_path()).await?;
        let store = GrantStore::open(&config.grants_path()).await?;
        let policy = AccessPolicyStore::open(&config.policy_path()).await?;
        Ok(Self::assemble(config, ledger, store, policy, platform))
    }

    /// Context backed by nothing but memory
    #[must_use]
    pub fn in_memory(config: BotConfig, platform: Arc<dyn Platform>) -> Self {
        Self::assemble(
            config,
            PenaltyLedger::in_memory(),
            GrantStore::in_memory(),
            AccessPolicyStore::default(),
            platform,
        )
    }

    fn assemble(
        config: BotConfig,
        ledger: PenaltyLedger,
        store: GrantStore,
        policy: AccessPolicyStore,
        platform: Arc<dyn Platform>,
    ) -> Self {
        let scheduler = GrantScheduler::new(store, ledger.clone(), Arc::clone(&platform));
        let guard = AccessGuard::new(
            policy.clone(),
            ledger.clone(),
            scheduler.clone(),
            config.warning_threshold,
            config.auto_timeout_secs,
        );

        Self(Arc::new(DataInner {
            config,
            ledger,
            policy,
            scheduler,
            guard,
            platform,
            command_timings: DashMap::new(),
            started_at: Instant::now(),
            sweeper: OnceLock::new(),
        }))
    }

    /// Recover pending grants and start the sweeper. Must finish before any
    /// command is served.
    ///
    /// # Errors
    /// Returns a storage error if recovery cannot update the ledger.
    pub async fn start(&self) -> ModerationResult<RecoveryReport> {
        let report = self.scheduler.recover().await?;
        if self.sweeper.get().is_none() {
            let tx = self.scheduler.start_sweeper(self.config.sweep_interval_secs);
            if self.sweeper.set(tx).is_err() {
                error!("Grant sweeper was started twice");
            }
        }
        Ok(report)
    }

    /// Stop the sweeper and flush every store.
    ///
    /// # Errors
    /// Returns a storage error if a snapshot cannot be written.
    pub async fn shutdown(&self) -> ModerationResult<()> {
        if let Some(tx) = self.sweeper.get() {
            if let Err(e) = tx.send(SweepRequest::Shutdown).await {
                error!("Failed to stop grant sweeper: {e}");
            }
        }
        self.scheduler.disarm_all();
        self.save().await?;
        info!("Moderation data flushed");
        Ok(())
    }

    /// Write every snapshot.
    ///
    /// # Errors
    /// Returns a storage error if a snapshot cannot be written.
    pub async fn save(&self) -> ModerationResult<()> {
        self.ledger.persist().await?;
        self.scheduler.store().persist().await?;
        self.policy.persist().await?;
        Ok(())
    }

    /// Ask the sweeper for an immediate pass. Returns `false` if no sweeper
    /// is running.
    pub async fn request_sweep(&self) -> bool {
        let Some(tx) = self.sweeper.get() else {
            return false;
        };
        if let Err(e) = tx.send(SweepRequest::SweepNow).await {
            error!("Failed to request grant sweep: {e}");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::{GrantKind, GrantRequest};
    use crate::platform::fake::FakePlatform;

    #[tokio::test]
    async fn test_in_memory_data_wires_shared_stores() {
        let platform = Arc::new(FakePlatform::with_member(1, 2, vec![]));
        let data = Data::in_memory(BotConfig::default(), platform);

        data.scheduler
            .grant(GrantRequest::new(1, 2, GrantKind::Timeout, 60, "spam"))
            .await
            .unwrap();
        // The scheduler writes into the same ledger the commands read
        assert!(data.ledger.get(2).unwrap().muted);
        data.scheduler.disarm_all();
    }

    #[tokio::test]
    async fn test_load_start_and_shutdown_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = BotConfig {
            data_dir: dir.path().to_path_buf(),
            ..BotConfig::default()
        };
        let platform = Arc::new(FakePlatform::with_member(1, 2, vec![]));

        let data = Data::load(config.clone(), platform.clone()).await.unwrap();
        data.start().await.unwrap();
        data.scheduler
            .grant(GrantRequest::new(1, 2, GrantKind::Ban, 3600, "raid"))
            .await
            .unwrap();
        data.shutdown().await.unwrap();

        assert!(config.grants_path().exists());
        assert!(config.subjects_path().exists());
        assert!(config.policy_path().exists());

        let restarted = Data::load(config, platform).await.unwrap();
        let report = restarted.start().await.unwrap();
        assert_eq!(report.armed, 1);
        assert!(restarted.ledger.get(2).unwrap().banned);
        restarted.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_requested_sweep_reverses_overdue_grant() {
        let platform = Arc::new(FakePlatform::with_member(1, 2, vec![]));
        let data = Data::in_memory(BotConfig::default(), platform.clone());
        assert!(!data.request_sweep().await);

        data.start().await.unwrap();
        let grant = data
            .scheduler
            .grant(GrantRequest::new(1, 2, GrantKind::Timeout, 60, "spam"))
            .await
            .unwrap();
        // Overdue on the wall clock while its timer still sleeps
        data.scheduler.disarm_all();
        let mut overdue = grant.clone();
        overdue.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        data.scheduler.store().insert(overdue).await.unwrap();

        assert!(data.request_sweep().await);
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert!(!data.scheduler.store().contains(&grant.id));
        assert_eq!(platform.count_calls("clear_timeout"), 1);
        data.shutdown().await.unwrap();
    }
}
