use std::sync::Arc;
use std::time::Duration;

use etcd_coordination::util::{validate_identifier, Backoff};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::memberlist_store::MemberlistStore;
use crate::metrics_consts::{MEMBERLIST_CONFLICTS, RECONCILE_TICKS};
use crate::node_watcher::NodeWatcher;
use crate::types::{same_member_set, VersionToken};

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub memberlist_name: String,
    pub reconcile_interval: Duration,
    /// Conditional-write retries per tick after the first attempt.
    pub max_conflict_retries: u32,
    pub conflict_backoff: Backoff,
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.reconcile_interval.is_zero() {
            return Err(Error::config("reconcile interval must be non-zero"));
        }
        validate_identifier(&self.memberlist_name)
            .map_err(|e| Error::config(format!("invalid memberlist name: {e}")))?;
        Ok(())
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            memberlist_name: "worker-memberlist".to_string(),
            reconcile_interval: Duration::from_secs(1),
            max_conflict_retries: 3,
            conflict_backoff: Backoff::new(Duration::from_millis(50), Duration::from_secs(1)),
        }
    }
}

/// What one reconciliation tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Store already matched the live set.
    Unchanged(VersionToken),
    /// Store was rewritten to the live set.
    Updated(VersionToken),
    /// Every conditional write lost to a concurrent writer; the next tick
    /// will try again.
    Deferred,
}

impl ReconcileOutcome {
    fn label(&self) -> &'static str {
        match self {
            ReconcileOutcome::Unchanged(_) => "unchanged",
            ReconcileOutcome::Updated(_) => "updated",
            ReconcileOutcome::Deferred => "deferred",
        }
    }
}

/// Converges a stored memberlist onto the live member set observed by a
/// `NodeWatcher`.
///
/// Writes are optimistic: each one carries the version token read just
/// before it, and losing a race means re-reading and trying again, a bounded
/// number of times per tick.
pub struct MemberlistManager {
    watcher: Arc<NodeWatcher>,
    store: Arc<dyn MemberlistStore>,
    config: ManagerConfig,
}

impl MemberlistManager {
    pub fn new(
        watcher: Arc<NodeWatcher>,
        store: Arc<dyn MemberlistStore>,
        config: ManagerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            watcher,
            store,
            config,
        })
    }

    /// Spawn the watcher poll loop and the reconciliation loop and return
    /// immediately. Both stop when `cancel` fires or the handle is stopped.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> ManagerHandle {
        let token = cancel.child_token();
        let mut tasks = JoinSet::new();

        {
            let watcher = Arc::clone(&self.watcher);
            let token = token.clone();
            tasks.spawn(async move { watcher.run(token).await });
        }

        {
            let manager = Arc::clone(self);
            let token = token.clone();
            tasks.spawn(async move { manager.run(token).await });
        }

        info!(
            memberlist = %self.config.memberlist_name,
            interval = ?self.config.reconcile_interval,
            "started memberlist manager"
        );

        ManagerHandle {
            cancel: token,
            tasks,
        }
    }

    /// Reconcile on every interval until cancelled. A failed tick is logged
    /// and never ends the loop. Cancellation also abandons a tick that is
    /// waiting on the store or backing off.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.reconcile_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let result = tokio::select! {
                        _ = cancel.cancelled() => return,
                        result = self.reconcile() => result,
                    };
                    self.record_tick(result);
                }
            }
        }
    }

    fn record_tick(&self, result: Result<ReconcileOutcome>) {
        match result {
            Ok(outcome) => {
                metrics::counter!(RECONCILE_TICKS, "outcome" => outcome.label()).increment(1);
            }
            Err(e) => {
                metrics::counter!(RECONCILE_TICKS, "outcome" => "failed").increment(1);
                warn!(
                    memberlist = %self.config.memberlist_name,
                    error = %e,
                    transient = e.is_transient(),
                    "reconciliation tick failed"
                );
            }
        }
    }

    /// Run one reconciliation tick.
    pub async fn reconcile(&self) -> Result<ReconcileOutcome> {
        let name = self.config.memberlist_name.as_str();
        let live = self.watcher.current_members().await?;
        if let Some(warning) = &live.warning {
            warn!(
                memberlist = %name,
                warning = %warning,
                "reconciling against last known members after a failed refresh"
            );
        }

        let mut stored = self.store.get(name).await?;
        let mut attempt = 0;
        loop {
            // An absent record is written even when the live set is empty, so
            // the first successful tick always creates it.
            if !stored.version.is_absent() && same_member_set(&stored.members, &live.members) {
                debug!(memberlist = %name, version = %stored.version, "memberlist up to date");
                return Ok(ReconcileOutcome::Unchanged(stored.version));
            }

            match self
                .store
                .compare_and_swap(name, &live.members, stored.version)
                .await
            {
                Ok(version) => {
                    info!(
                        memberlist = %name,
                        previous = %stored.version,
                        version = %version,
                        members = live.members.len(),
                        "updated memberlist"
                    );
                    return Ok(ReconcileOutcome::Updated(version));
                }
                Err(Error::VersionConflict {
                    expected, actual, ..
                }) => {
                    metrics::counter!(MEMBERLIST_CONFLICTS).increment(1);
                    if attempt >= self.config.max_conflict_retries {
                        warn!(
                            memberlist = %name,
                            attempts = attempt + 1,
                            "memberlist write kept conflicting, deferring to next tick"
                        );
                        return Ok(ReconcileOutcome::Deferred);
                    }
                    debug!(
                        memberlist = %name,
                        expected = %expected,
                        actual = %actual,
                        attempt,
                        "memberlist write conflicted, retrying"
                    );
                    tokio::time::sleep(self.config.conflict_backoff.delay(attempt)).await;
                    attempt += 1;
                    stored = self.store.get(name).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Running reconciliation loops started by `MemberlistManager::start`.
pub struct ManagerHandle {
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl ManagerHandle {
    /// Cancel both loops and wait until they have exited.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "memberlist manager task panicked");
            }
        }
        info!("stopped memberlist manager");
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tasks.is_empty()
    }
}
