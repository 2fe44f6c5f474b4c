//! Route selector
//!
//! Greedy, stateless winner-per-destination policy: lowest measured latency
//! wins, unreachable candidates sort last, and exact ties break on the
//! lexicographically smallest interface identifier (then gateway) so
//! identical input always yields identical output. Determinism here is what
//! keeps the reconciler idempotent and the kernel table free of flapping.

use crate::candidates::{Candidate, CandidateIndex};
use crate::probe::LatencySample;
use ipnet::IpNet;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

/// The winning gateway choice for one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    /// Interface to route through.
    pub interface: String,
    /// Peer tunnel address used as next-hop.
    pub gateway: IpAddr,
}

/// Desired routing state for one cycle: destination → winning decision.
pub type DecisionSet = BTreeMap<IpNet, RouteDecision>;

/// Pick one winner per destination.
///
/// A destination with a single candidate keeps that candidate regardless of
/// its sample; one degraded path still beats no path.
pub fn select_routes(
    index: &CandidateIndex,
    samples: &BTreeMap<IpAddr, LatencySample>,
) -> DecisionSet {
    let mut decisions = DecisionSet::new();

    for (destination, candidates) in index.destinations() {
        let winner = match candidates.iter().min_by(|a, b| {
            rank(a, samples).cmp(&rank(b, samples))
        }) {
            Some(candidate) => candidate,
            None => continue,
        };

        decisions.insert(
            *destination,
            RouteDecision {
                interface: winner.interface.clone(),
                gateway: winner.gateway,
            },
        );
    }

    decisions
}

/// Ordering key for candidate preference.
///
/// Reachable before unreachable, then lowest round trip, then interface
/// identifier and gateway as the deterministic tie-break. A candidate whose
/// gateway has no sample at all counts as unreachable.
fn rank<'a>(
    candidate: &'a Candidate,
    samples: &BTreeMap<IpAddr, LatencySample>,
) -> (bool, Duration, &'a str, IpAddr) {
    let rtt = samples
        .get(&candidate.gateway)
        .and_then(LatencySample::rtt);
    (
        rtt.is_none(),
        rtt.unwrap_or(Duration::MAX),
        candidate.interface.as_str(),
        candidate.gateway,
    )
}
