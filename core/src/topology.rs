//! Mesh topology model and discovery seam
//!
//! The topology source enumerates the node's tunnel interfaces and the peers
//! behind each of them. It is deliberately an abstract trait: the production
//! implementation talks to the OS (see the CLI crate), while tests construct
//! snapshots directly. A snapshot is rebuilt fresh every cycle; interfaces
//! carry no identity across cycles beyond their name.

use async_trait::async_trait;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Errors raised while querying the mesh topology
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Failed to enumerate mesh interfaces: {0}")]
    Enumeration(String),

    #[error("I/O error while querying topology: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// DATA TYPES
// ============================================================================

/// A remote tunnel endpoint reachable through one interface.
///
/// The peer's own tunnel address is not carried here; the candidate index
/// derives it as the advertised range that falls inside the owning
/// interface's subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshPeer {
    /// Stable identity of the peer within the mesh (e.g. its public key).
    pub identity: String,
    /// Destination ranges this peer advertises it can forward traffic to.
    pub allowed_ranges: Vec<IpNet>,
}

/// A local mesh tunnel interface and the peers connected through it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshInterface {
    /// Interface name, e.g. `wg0`.
    pub name: String,
    /// The interface's own address inside the tunnel subnet, with prefix.
    pub address: IpNet,
    /// Peers reachable through this interface.
    pub peers: Vec<MeshPeer>,
}

impl MeshInterface {
    /// The tunnel subnet this interface belongs to.
    pub fn subnet(&self) -> IpNet {
        self.address.trunc()
    }
}

impl fmt::Display for MeshInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {} peer(s))",
            self.name,
            self.address,
            self.peers.len()
        )
    }
}

// ============================================================================
// COLLABORATOR TRAITS
// ============================================================================

/// Enumerates the node's mesh interfaces and their peers.
///
/// Invoked once per reconciliation cycle; implementations must be cheap to
/// call repeatedly.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TopologySource: Send + Sync {
    async fn list_interfaces(&self) -> Result<Vec<MeshInterface>, TopologyError>;
}

/// Reports whether the mesh feature is usable on this host at all.
///
/// Consulted at the top of every cycle. A `false` answer turns the cycle
/// into a no-op rather than an error, since hosts without the mesh feature
/// are an expected deployment state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PresenceGuard: Send + Sync {
    async fn is_available(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_truncates_host_bits() {
        let iface = MeshInterface {
            name: "wg0".to_string(),
            address: "10.0.0.1/24".parse().unwrap(),
            peers: vec![],
        };
        assert_eq!(iface.subnet(), "10.0.0.0/24".parse::<IpNet>().unwrap());
    }

    #[test]
    fn test_subnet_of_host_prefix_is_itself() {
        let iface = MeshInterface {
            name: "wg0".to_string(),
            address: "10.0.0.1/32".parse().unwrap(),
            peers: vec![],
        };
        assert_eq!(iface.subnet(), "10.0.0.1/32".parse::<IpNet>().unwrap());
    }
}
