//! Continuous reconciliation loop.
//!
//! Each cycle runs Enumerate, Sweep and Dispatch: the desired set is rebuilt,
//! actors of repositories that left it are dropped, and one convergence task
//! per desired repository is queued on the worker pool. Cancellation is only
//! looked at between cycles; once seen, the loop drains the pool and returns.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};
use watcher_core::WatcherConfig;

use crate::error::Result;
use crate::pool::WorkerPool;
use crate::reconciler::Reconciler;
use crate::registry::Registry;
use crate::types::DesiredState;

/// Configuration for the reconciliation loop.
#[derive(Debug, Clone, Default)]
pub struct LoopConfig {
    /// Spacing between cycle starts. `None` runs cycles back to back.
    pub interval: Option<Duration>,
}

impl LoopConfig {
    pub fn from_watcher(config: &WatcherConfig) -> Self {
        Self {
            interval: config.cycle_interval(),
        }
    }
}

/// State provider trait for getting desired state.
#[async_trait::async_trait]
pub trait DesiredStateProvider: Send + Sync {
    /// Get the current desired state.
    async fn get_desired_state(&self) -> Result<DesiredState>;
}

/// Simple in-memory desired state provider.
pub struct InMemoryDesiredStateProvider {
    state: tokio::sync::RwLock<DesiredState>,
}

impl InMemoryDesiredStateProvider {
    /// Create a new provider with initial state.
    pub fn new(state: DesiredState) -> Self {
        Self {
            state: tokio::sync::RwLock::new(state),
        }
    }

    /// Update the desired state.
    pub async fn update(&self, state: DesiredState) {
        *self.state.write().await = state;
    }

    /// Get a mutable reference to update.
    pub async fn modify<F>(&self, f: F)
    where
        F: FnOnce(&mut DesiredState),
    {
        let mut state = self.state.write().await;
        f(&mut state);
    }
}

#[async_trait::async_trait]
impl DesiredStateProvider for InMemoryDesiredStateProvider {
    async fn get_desired_state(&self) -> Result<DesiredState> {
        Ok(self.state.read().await.clone())
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// 1-based cycle number.
    pub cycle: u64,
    /// Repositories in the desired set.
    pub repos: usize,
    /// Tasks accepted by the pool.
    pub dispatched: usize,
    /// Tasks refused by the pool.
    pub rejected: usize,
    /// Actors dropped by the sweep.
    pub swept: usize,
}

/// Drives convergence cycles over the governed fleet.
pub struct ReconciliationLoop {
    reconciler: Arc<Reconciler>,
    desired_provider: Arc<dyn DesiredStateProvider>,
    registry: Arc<Registry>,
    pool: WorkerPool,
    config: LoopConfig,
    cycle: u64,
    stop_rx: watch::Receiver<bool>,
    stop_tx: watch::Sender<bool>,
}

impl ReconciliationLoop {
    /// Create a new reconciliation loop.
    pub fn new(
        reconciler: Arc<Reconciler>,
        desired_provider: Arc<dyn DesiredStateProvider>,
        registry: Arc<Registry>,
        pool: WorkerPool,
        config: LoopConfig,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            reconciler,
            desired_provider,
            registry,
            pool,
            config,
            cycle: 0,
            stop_rx,
            stop_tx,
        }
    }

    /// Run cycles until stopped.
    ///
    /// Returns once every dispatched task has finished.
    ///
    /// # Errors
    ///
    /// Returns the builder's error when the desired set cannot be
    /// enumerated. Outstanding tasks are drained first.
    pub async fn run(mut self) -> Result<()> {
        info!(
            interval_secs = self.config.interval.map(|i| i.as_secs()),
            "Starting reconciliation loop"
        );

        while !*self.stop_rx.borrow() {
            let started = Instant::now();

            match self.run_cycle().await {
                Ok(stats) => {
                    info!(
                        cycle = stats.cycle,
                        repos = stats.repos,
                        dispatched = stats.dispatched,
                        rejected = stats.rejected,
                        swept = stats.swept,
                        outstanding = self.pool.outstanding(),
                        "Cycle dispatched"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Failed to enumerate desired state");
                    self.pool.shutdown().await;
                    return Err(e);
                }
            }

            match self.config.interval {
                Some(interval) => {
                    let remaining = interval.saturating_sub(started.elapsed());
                    if !remaining.is_zero() {
                        debug!(sleep_ms = remaining.as_millis(), "Waiting for next cycle");
                        tokio::select! {
                            () = tokio::time::sleep(remaining) => {}
                            _ = self.stop_rx.changed() => {}
                        }
                    }
                }
                None => tokio::task::yield_now().await,
            }
        }

        info!(
            outstanding = self.pool.outstanding(),
            "Stop requested, draining tasks"
        );
        self.pool.shutdown().await;
        info!("Reconciliation loop stopped");
        Ok(())
    }

    /// Run one Enumerate, Sweep, Dispatch pass without waiting for the
    /// dispatched tasks.
    ///
    /// # Errors
    ///
    /// Returns the builder's error; nothing is swept or dispatched then.
    pub async fn run_cycle(&mut self) -> Result<CycleStats> {
        self.cycle = self.cycle.saturating_add(1);

        let desired = self.desired_provider.get_desired_state().await?;
        let mut stats = CycleStats {
            cycle: self.cycle,
            repos: desired.len(),
            ..CycleStats::default()
        };

        stats.swept = self.registry.sweep(&desired.names()).await.len();

        for repo in desired.repos.into_values() {
            let name = repo.name.clone();
            let actor = self.registry.get_or_create(&name).await;
            let reconciler = self.reconciler.clone();
            let span = info_span!("converge", org = %repo.org, repo = %repo.name);

            let job = async move {
                if let Err(e) = actor
                    .update(|observed| reconciler.reconcile(&repo, observed))
                    .await
                {
                    error!(error = %e, "Convergence task failed");
                }
            }
            .instrument(span)
            .boxed();

            match self.pool.submit(&name, job) {
                Ok(()) => stats.dispatched = stats.dispatched.saturating_add(1),
                Err(e) => {
                    warn!(repo = %name, error = %e, "Skipping repository this cycle");
                    stats.rejected = stats.rejected.saturating_add(1);
                }
            }
        }

        Ok(stats)
    }

    /// Wait for every task dispatched so far.
    pub async fn wait_idle(&self) {
        self.pool.wait_idle().await;
    }

    /// Tasks dispatched and not yet finished.
    pub fn outstanding(&self) -> usize {
        self.pool.outstanding()
    }

    /// The registry the loop dispatches against.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Get a stopper handle.
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: self.stop_tx.clone(),
        }
    }
}

/// Handle to stop a reconciliation loop.
#[derive(Clone)]
pub struct LoopStopper {
    stop_tx: watch::Sender<bool>,
}

impl LoopStopper {
    /// Stop the loop.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}
