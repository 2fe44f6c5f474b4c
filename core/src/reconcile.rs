//! Route reconciler
//!
//! Diffs the cycle's desired decision set against what was successfully
//! installed before and issues only the replace operations needed to
//! converge. Install failures are logged and retried on every subsequent
//! cycle; destinations that vanish from the topology keep their kernel route
//! (removal is deliberately out of scope, see DESIGN.md).

use crate::select::{DecisionSet, RouteDecision};
use async_trait::async_trait;
use ipnet::IpNet;
use std::net::IpAddr;
use thiserror::Error;

// ============================================================================
// ROUTING TABLE SEAM
// ============================================================================

/// Errors raised by routing table operations
#[derive(Debug, Error)]
pub enum RouteTableError {
    #[error("Failed to install route to {destination}: {reason}")]
    Install { destination: IpNet, reason: String },
}

/// Kernel (or simulated) routing table.
///
/// `replace_route` must atomically supersede any prior gateway for the same
/// destination: replace semantics, never an additive insert.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoutingTable: Send + Sync {
    async fn replace_route(
        &self,
        destination: IpNet,
        gateway: IpAddr,
        interface: &str,
    ) -> Result<(), RouteTableError>;
}

// ============================================================================
// RECONCILER
// ============================================================================

/// Counters for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Replace operations issued and acknowledged.
    pub installed: usize,
    /// Destinations whose winner matched the previous cycle; no operation.
    pub unchanged: usize,
    /// Replace operations that failed; retried next cycle.
    pub failed: usize,
}

/// Holds the previously installed decision set and converges the routing
/// table toward each new cycle's desired state.
#[derive(Debug, Default)]
pub struct Reconciler {
    installed: DecisionSet,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The decision set that was successfully installed, as of the last
    /// `reconcile` call.
    pub fn installed(&self) -> &DecisionSet {
        &self.installed
    }

    /// Converge the routing table toward `desired`.
    ///
    /// After the call, `installed()` reflects exactly the desired entries
    /// whose install succeeded (now or unchanged from before); a failing
    /// destination stays out, so the next diff retries it.
    pub async fn reconcile(
        &mut self,
        desired: &DecisionSet,
        table: &dyn RoutingTable,
    ) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        for (destination, decision) in desired {
            if self.installed.get(destination) == Some(decision) {
                summary.unchanged += 1;
                continue;
            }

            match table
                .replace_route(*destination, decision.gateway, &decision.interface)
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        destination = %destination,
                        gateway = %decision.gateway,
                        interface = %decision.interface,
                        "route installed"
                    );
                    self.installed.insert(*destination, decision.clone());
                    summary.installed += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        destination = %destination,
                        error = %err,
                        "route install failed; retrying next cycle"
                    );
                    self.installed.remove(destination);
                    summary.failed += 1;
                }
            }
        }

        // Vanished destinations keep their kernel route but leave the diff
        // state, so a destination that reappears is installed again.
        self.installed
            .retain(|destination, _| desired.contains_key(destination));

        summary
    }
}
