//! Latency prober
//!
//! Measures round-trip latency and loss to every peer tunnel address as one
//! bounded batch per cycle. Per-address unreachability is data, not an error:
//! only losing the ability to probe at all (no ICMP socket) fails a cycle.

use crate::config::ReconcilerConfig;
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::time::Duration;
use surge_ping::{Client, Config as PingConfig, PingIdentifier, PingSequence, ICMP};
use thiserror::Error;

/// Errors raised by the probing subsystem itself
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Failed to open probe socket: {0}")]
    Socket(#[from] std::io::Error),
}

/// One cycle's latency/loss observation for a single peer tunnel address.
///
/// An unreachable address has no round-trip measurement at all; the absent
/// value is the sentinel and sorts after every real measurement in the
/// selector. It must never be treated as a latency of zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySample {
    rtt: Option<Duration>,
    loss: f64,
}

impl LatencySample {
    /// Sample for an address that answered at least one probe.
    pub fn reachable(rtt: Duration, loss: f64) -> Self {
        Self {
            rtt: Some(rtt),
            loss: loss.clamp(0.0, 1.0),
        }
    }

    /// Sample for an address that answered no probes.
    pub fn unreachable() -> Self {
        Self {
            rtt: None,
            loss: 1.0,
        }
    }

    /// Average round trip of answered probes, if any were answered.
    pub fn rtt(&self) -> Option<Duration> {
        self.rtt
    }

    /// Round trip in milliseconds, for reporting.
    pub fn latency_ms(&self) -> Option<f64> {
        self.rtt.map(|rtt| rtt.as_secs_f64() * 1000.0)
    }

    /// Fraction of probes lost, in [0, 1].
    pub fn loss(&self) -> f64 {
        self.loss
    }

    pub fn is_unreachable(&self) -> bool {
        self.rtt.is_none()
    }
}

/// Batch latency measurement seam.
///
/// The control loop treats a probe batch as a single awaited call with a
/// bounded duration of roughly `probe_count × (probe_interval + probe
/// timeout)`. Implementations fan out internally but must not block
/// indefinitely on any single unresponsive address.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(
        &self,
        targets: &BTreeSet<IpAddr>,
    ) -> Result<BTreeMap<IpAddr, LatencySample>, ProbeError>;
}

/// ICMP echo prober over tokio raw sockets.
///
/// One pinger per target address, probes spaced by the configured interval,
/// all targets probed concurrently. Requires CAP_NET_RAW or the unprivileged
/// ICMP sysctl. Creation fails otherwise, which the service treats as a
/// catastrophic probe error rather than silent data.
pub struct IcmpProber {
    client_v4: Client,
    client_v6: Option<Client>,
    probe_count: u32,
    probe_interval: Duration,
    probe_timeout: Duration,
}

impl IcmpProber {
    pub fn new(config: &ReconcilerConfig) -> Result<Self, ProbeError> {
        let client_v4 = Client::new(&PingConfig::default())?;
        // v6 is best-effort: a host without an ICMPv6 socket can still probe
        // v4 peers. v6 targets then read as unreachable.
        let client_v6 = Client::new(&PingConfig::builder().kind(ICMP::V6).build()).ok();

        Ok(Self {
            client_v4,
            client_v6,
            probe_count: config.probe_count,
            probe_interval: config.probe_interval(),
            probe_timeout: config.probe_timeout(),
        })
    }

    async fn probe_one(&self, target: IpAddr) -> LatencySample {
        let client = match target {
            IpAddr::V4(_) => &self.client_v4,
            IpAddr::V6(_) => match &self.client_v6 {
                Some(client) => client,
                None => {
                    tracing::debug!(%target, "no ICMPv6 socket; reporting unreachable");
                    return LatencySample::unreachable();
                }
            },
        };

        let mut pinger = client.pinger(target, PingIdentifier(rand::random())).await;
        pinger.timeout(self.probe_timeout);

        let payload = [0u8; 56];
        let mut answered: u32 = 0;
        let mut total = Duration::ZERO;

        for seq in 0..self.probe_count {
            if seq > 0 {
                tokio::time::sleep(self.probe_interval).await;
            }
            match pinger.ping(PingSequence(seq as u16), &payload).await {
                Ok((_reply, rtt)) => {
                    answered += 1;
                    total += rtt;
                }
                // Lost or timed-out probes are part of the measurement.
                Err(_) => {}
            }
        }

        if answered == 0 {
            return LatencySample::unreachable();
        }

        let loss = f64::from(self.probe_count - answered) / f64::from(self.probe_count);
        LatencySample::reachable(total / answered, loss)
    }
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(
        &self,
        targets: &BTreeSet<IpAddr>,
    ) -> Result<BTreeMap<IpAddr, LatencySample>, ProbeError> {
        let probes = targets
            .iter()
            .copied()
            .map(|target| async move { (target, self.probe_one(target).await) });

        let samples: BTreeMap<IpAddr, LatencySample> = join_all(probes).await.into_iter().collect();

        let unreachable = samples.values().filter(|s| s.is_unreachable()).count();
        tracing::debug!(
            targets = samples.len(),
            unreachable,
            "probe batch complete"
        );

        Ok(samples)
    }
}
