// Meshlane Core — Route Reconciliation Spine
//
// "Does this cycle leave the kernel routing table one step closer to the
//  lowest-latency mesh, without churning what already converged?"
//
// If the answer is no, it doesn't belong in a cycle.

pub mod candidates;
pub mod config;
pub mod probe;
pub mod reconcile;
pub mod select;
pub mod service;
pub mod telemetry;
pub mod topology;

pub use candidates::{Candidate, CandidateIndex};
pub use config::{ConfigError, ReconcilerConfig};
pub use probe::{IcmpProber, LatencySample, ProbeError, Prober};
pub use reconcile::{ReconcileSummary, Reconciler, RouteTableError, RoutingTable};
pub use select::{select_routes, DecisionSet, RouteDecision};
pub use service::{
    CycleError, CycleOutcome, RouteService, ServiceError, ServiceState, ServiceStats,
};
pub use telemetry::{
    LogReporter, PeerSample, TelemetryError, TelemetryReporter, TelemetrySnapshot,
};
pub use topology::{MeshInterface, MeshPeer, PresenceGuard, TopologyError, TopologySource};
