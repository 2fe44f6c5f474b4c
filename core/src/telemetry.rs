//! Telemetry snapshot reporting
//!
//! Each cycle's latency/loss samples are handed to a reporter for upstream
//! observability. Delivery is fire-and-forget: a failing reporter is logged
//! and never aborts the cycle that produced the snapshot.

use crate::probe::LatencySample;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::IpAddr;
use thiserror::Error;

/// Errors raised by telemetry delivery
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to deliver telemetry: {0}")]
    Delivery(String),
}

/// One peer's observation in wire-friendly units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeerSample {
    /// Average round trip in milliseconds; absent for unreachable peers.
    pub latency_ms: Option<f64>,
    /// Fraction of probes lost, in [0, 1].
    pub loss: f64,
}

/// The full latency picture of one reconciliation cycle.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    /// When the cycle that produced these samples ran.
    pub cycle_at: DateTime<Utc>,
    /// Per peer tunnel address samples.
    pub peers: BTreeMap<IpAddr, PeerSample>,
}

impl TelemetrySnapshot {
    pub fn from_samples(
        cycle_at: DateTime<Utc>,
        samples: &BTreeMap<IpAddr, LatencySample>,
    ) -> Self {
        let peers = samples
            .iter()
            .map(|(addr, sample)| {
                (
                    *addr,
                    PeerSample {
                        latency_ms: sample.latency_ms(),
                        loss: sample.loss(),
                    },
                )
            })
            .collect();

        Self { cycle_at, peers }
    }
}

/// Upstream observability sink for cycle snapshots.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetryReporter: Send + Sync {
    async fn report(&self, snapshot: &TelemetrySnapshot) -> Result<(), TelemetryError>;
}

/// Reporter that emits each snapshot as one structured log event.
///
/// The default sink for deployments without an upstream collector.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

#[async_trait]
impl TelemetryReporter for LogReporter {
    async fn report(&self, snapshot: &TelemetrySnapshot) -> Result<(), TelemetryError> {
        let peers = serde_json::to_string(&snapshot.peers)
            .map_err(|err| TelemetryError::Delivery(err.to_string()))?;
        tracing::info!(cycle_at = %snapshot.cycle_at, %peers, "latency snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_snapshot_converts_samples() {
        let mut samples = BTreeMap::new();
        samples.insert(
            "10.0.0.2".parse().unwrap(),
            LatencySample::reachable(Duration::from_millis(12), 0.25),
        );
        samples.insert(
            "10.0.1.2".parse().unwrap(),
            LatencySample::unreachable(),
        );

        let snapshot = TelemetrySnapshot::from_samples(Utc::now(), &samples);

        let reachable = &snapshot.peers[&"10.0.0.2".parse::<IpAddr>().unwrap()];
        assert_eq!(reachable.latency_ms, Some(12.0));
        assert_eq!(reachable.loss, 0.25);

        let dark = &snapshot.peers[&"10.0.1.2".parse::<IpAddr>().unwrap()];
        assert_eq!(dark.latency_ms, None);
        assert_eq!(dark.loss, 1.0);
    }

    #[tokio::test]
    async fn test_log_reporter_accepts_snapshot() {
        let snapshot = TelemetrySnapshot::from_samples(Utc::now(), &BTreeMap::new());
        assert!(LogReporter.report(&snapshot).await.is_ok());
    }
}
