//! Candidate index — destination ranges and the gateways that can reach them
//!
//! Built fresh from each topology snapshot. For every peer the index resolves
//! the gateway (the peer's tunnel address: the advertised range lying inside
//! the owning interface's subnet) and files the peer's remaining advertised
//! ranges under that gateway. Ranges inside the node's own tunnel space are
//! gateway material, never routable destinations.

use crate::topology::{MeshInterface, MeshPeer};
use ipnet::IpNet;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

/// One way of reaching a destination: an interface and the peer tunnel
/// address to use as gateway.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Candidate {
    /// Interface identifier, e.g. `wg0`.
    pub interface: String,
    /// The peer's tunnel address, used as next-hop.
    pub gateway: IpAddr,
}

/// Destination → candidates mapping plus the deduplicated probe target set.
///
/// Ordered maps keep iteration (and therefore logging and route install
/// order) deterministic across cycles.
#[derive(Debug, Clone, Default)]
pub struct CandidateIndex {
    destinations: BTreeMap<IpNet, Vec<Candidate>>,
    probe_targets: BTreeSet<IpAddr>,
}

impl CandidateIndex {
    /// Build the index from a topology snapshot.
    ///
    /// Peers with no advertised range inside their interface's subnet have no
    /// resolvable gateway and contribute nothing this cycle.
    pub fn build(interfaces: &[MeshInterface]) -> Self {
        let mut index = CandidateIndex::default();

        for iface in interfaces {
            let subnet = iface.subnet();
            for peer in &iface.peers {
                let Some(gateway) = peer_gateway(peer, &subnet) else {
                    tracing::debug!(
                        peer = %peer.identity,
                        interface = %iface.name,
                        "no advertised range inside the interface subnet; skipping peer"
                    );
                    continue;
                };

                index.probe_targets.insert(gateway);

                for range in &peer.allowed_ranges {
                    if subnet.contains(range) {
                        // Own-subnet space: the gateway address itself, or
                        // other tunnel-internal ranges. Not destinations.
                        continue;
                    }
                    index
                        .destinations
                        .entry(*range)
                        .or_default()
                        .push(Candidate {
                            interface: iface.name.clone(),
                            gateway,
                        });
                }
            }
        }

        index
    }

    /// Destinations with the candidates able to reach them. Every entry has
    /// at least one candidate.
    pub fn destinations(&self) -> &BTreeMap<IpNet, Vec<Candidate>> {
        &self.destinations
    }

    /// Union of all resolved peer tunnel addresses.
    pub fn probe_targets(&self) -> &BTreeSet<IpAddr> {
        &self.probe_targets
    }

    /// Number of indexed destinations.
    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }
}

/// The peer's tunnel address: the first advertised range whose address falls
/// inside the interface's own subnet. Host-width ranges (/32, /128) are
/// preferred, so a peer that also advertises a covering prefix of the tunnel
/// subnet does not end up with the network address as its gateway.
fn peer_gateway(peer: &MeshPeer, subnet: &IpNet) -> Option<IpAddr> {
    let mut fallback = None;

    for range in &peer.allowed_ranges {
        let addr = range.addr();
        if !subnet.contains(&addr) {
            continue;
        }
        if range.prefix_len() == range.max_prefix_len() {
            return Some(addr);
        }
        if fallback.is_none() {
            fallback = Some(addr);
        }
    }

    fallback
}
