//! Reconciliation control loop
//!
//! One tokio task drives discover → probe → select → reconcile → report
//! cycles at a fixed interval. Cycles run strictly sequentially (at most one
//! in flight), so the cross-cycle diff state needs no locking. Cancellation
//! is cooperative: `stop()` prevents the next cycle from starting but never
//! interrupts one in progress.

use crate::candidates::CandidateIndex;
use crate::config::{ConfigError, ReconcilerConfig};
use crate::probe::{ProbeError, Prober};
use crate::reconcile::{ReconcileSummary, Reconciler, RoutingTable};
use crate::select::{select_routes, DecisionSet};
use crate::telemetry::{TelemetryReporter, TelemetrySnapshot};
use crate::topology::{PresenceGuard, TopologyError, TopologySource};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors raised by service lifecycle operations
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Service in invalid state: {0}")]
    InvalidState(ServiceState),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

/// Errors that skip a whole cycle (logged, retried next interval)
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Topology discovery failed: {0}")]
    Topology(#[from] TopologyError),

    #[error("Latency probing failed: {0}")]
    Probe(#[from] ProbeError),
}

// ============================================================================
// STATE & STATS
// ============================================================================

/// Lifecycle state of the reconciliation loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Created, not yet running.
    Idle,
    /// Cycling.
    Running,
    /// Stop requested; finishing the in-flight cycle.
    Stopping,
    /// Loop exited.
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Cumulative counters maintained by the loop.
#[derive(Debug, Clone, Default)]
pub struct ServiceStats {
    /// Cycles that ran the full pipeline.
    pub cycles: u64,
    /// Cycles skipped because the mesh feature is unavailable.
    pub noop_cycles: u64,
    /// Cycles skipped on topology/probe errors.
    pub skipped_cycles: u64,
    /// Total routes installed across all cycles.
    pub routes_installed: u64,
    /// Total install failures across all cycles.
    pub install_failures: u64,
    /// Completion time of the most recent full cycle.
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// Result of a single full cycle.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    /// The decision set computed this cycle.
    pub decisions: DecisionSet,
    /// What the reconciler did about it.
    pub summary: ReconcileSummary,
}

// ============================================================================
// ROUTE SERVICE
// ============================================================================

/// The reconciliation loop and its collaborators.
///
/// Collaborators are trait objects so the whole pipeline runs against mocks
/// in tests and against WireGuard/`ip` in production.
pub struct RouteService {
    config: ReconcilerConfig,
    topology: Arc<dyn TopologySource>,
    prober: Arc<dyn Prober>,
    table: Arc<dyn RoutingTable>,
    telemetry: Arc<dyn TelemetryReporter>,
    guard: Arc<dyn PresenceGuard>,
    state: RwLock<ServiceState>,
    stats: RwLock<ServiceStats>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl RouteService {
    pub fn new(
        config: ReconcilerConfig,
        topology: Arc<dyn TopologySource>,
        prober: Arc<dyn Prober>,
        table: Arc<dyn RoutingTable>,
        telemetry: Arc<dyn TelemetryReporter>,
        guard: Arc<dyn PresenceGuard>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;

        let (stop_tx, stop_rx) = watch::channel(false);

        Ok(Self {
            config,
            topology,
            prober,
            table,
            telemetry,
            guard,
            state: RwLock::new(ServiceState::Idle),
            stats: RwLock::new(ServiceStats::default()),
            stop_tx,
            stop_rx,
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    /// Snapshot of the cumulative counters
    pub fn stats(&self) -> ServiceStats {
        self.stats.read().clone()
    }

    /// Request a cooperative stop.
    ///
    /// The loop exits before starting its next cycle; an in-flight cycle
    /// always completes. Worst-case stop latency is one cycle's duration.
    pub fn stop(&self) {
        {
            let mut state = self.state.write();
            if *state == ServiceState::Running {
                *state = ServiceState::Stopping;
            }
        }
        let _ = self.stop_tx.send(true);
    }

    /// Run the reconciliation loop until `stop()` is called.
    ///
    /// Transitions: Idle -> Running -> (stop) -> Stopped. Not re-entrant:
    /// a second call while running (or after stopping) fails.
    pub async fn run(&self) -> Result<(), ServiceError> {
        {
            let mut state = self.state.write();
            if *state != ServiceState::Idle {
                return Err(ServiceError::InvalidState(*state));
            }
            *state = ServiceState::Running;
        }

        tracing::info!(
            interval_secs = self.config.interval_secs,
            probe_count = self.config.probe_count,
            "route reconciliation loop started"
        );

        let mut reconciler = Reconciler::new();
        let mut stop_rx = self.stop_rx.clone();

        loop {
            if *stop_rx.borrow() {
                break;
            }

            self.cycle(&mut reconciler).await;

            if *stop_rx.borrow() {
                // Stop requested during the cycle: skip the sleep.
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval()) => {}
                _ = stop_rx.changed() => {}
            }
        }

        *self.state.write() = ServiceState::Stopped;
        tracing::info!("route reconciliation loop stopped");
        Ok(())
    }

    /// Execute exactly one discover→probe→select→reconcile pass with no
    /// prior diff state and return its outcome. Debugging/CLI aid; the
    /// presence guard is not consulted.
    pub async fn run_once(&self) -> Result<CycleOutcome, CycleError> {
        let mut reconciler = Reconciler::new();
        self.run_cycle(&mut reconciler).await
    }

    /// One guarded cycle: a no-op when the mesh feature is unavailable, a
    /// logged skip on cycle errors.
    async fn cycle(&self, reconciler: &mut Reconciler) {
        if !self.guard.is_available().await {
            tracing::debug!("mesh support unavailable on this host; skipping cycle");
            self.stats.write().noop_cycles += 1;
            return;
        }

        match self.run_cycle(reconciler).await {
            Ok(outcome) => {
                let mut stats = self.stats.write();
                stats.cycles += 1;
                stats.routes_installed += outcome.summary.installed as u64;
                stats.install_failures += outcome.summary.failed as u64;
                stats.last_cycle_at = Some(Utc::now());
            }
            Err(err) => {
                tracing::warn!(error = %err, "cycle skipped; retrying next interval");
                self.stats.write().skipped_cycles += 1;
            }
        }
    }

    async fn run_cycle(&self, reconciler: &mut Reconciler) -> Result<CycleOutcome, CycleError> {
        let interfaces = self.topology.list_interfaces().await?;
        let index = CandidateIndex::build(&interfaces);

        let samples = self.prober.probe(index.probe_targets()).await?;

        let decisions = select_routes(&index, &samples);
        let summary = reconciler.reconcile(&decisions, self.table.as_ref()).await;

        let snapshot = TelemetrySnapshot::from_samples(Utc::now(), &samples);
        if let Err(err) = self.telemetry.report(&snapshot).await {
            // Fire-and-forget: a broken reporter never fails the cycle.
            tracing::warn!(error = %err, "telemetry delivery failed");
        }

        tracing::debug!(
            destinations = decisions.len(),
            installed = summary.installed,
            unchanged = summary.unchanged,
            failed = summary.failed,
            "cycle complete"
        );

        Ok(CycleOutcome { decisions, summary })
    }
}
