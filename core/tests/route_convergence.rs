// Integration tests for route convergence
//
// Drives the discover → probe → select → reconcile pipeline end to end with
// scripted collaborators: the multi-homed failover scenarios, reconciler
// idempotence across cycles, and the full control loop under a shifting
// latency landscape.

use async_trait::async_trait;
use ipnet::IpNet;
use meshlane_core::{
    select_routes, CandidateIndex, LatencySample, MeshInterface, MeshPeer, Prober, ProbeError,
    ReconcilerConfig, Reconciler, RouteService, RouteTableError, RoutingTable, TelemetryError,
    TelemetryReporter, TelemetrySnapshot, TopologyError, TopologySource, PresenceGuard,
};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// SCRIPTED COLLABORATORS
// ============================================================================

struct StaticTopology(Vec<MeshInterface>);

#[async_trait]
impl TopologySource for StaticTopology {
    async fn list_interfaces(&self) -> Result<Vec<MeshInterface>, TopologyError> {
        Ok(self.0.clone())
    }
}

/// Prober that replays one scripted sample map per probe call, repeating the
/// last map once the script runs out.
struct ScriptedProber {
    script: Vec<BTreeMap<IpAddr, LatencySample>>,
    call: AtomicUsize,
}

impl ScriptedProber {
    fn new(script: Vec<BTreeMap<IpAddr, LatencySample>>) -> Self {
        Self {
            script,
            call: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(
        &self,
        _targets: &BTreeSet<IpAddr>,
    ) -> Result<BTreeMap<IpAddr, LatencySample>, ProbeError> {
        let call = self.call.fetch_add(1, Ordering::SeqCst);
        let index = call.min(self.script.len() - 1);
        Ok(self.script[index].clone())
    }
}

/// Routing table that records every replace operation.
#[derive(Default)]
struct RecordingTable {
    calls: Mutex<Vec<(IpNet, IpAddr, String)>>,
}

impl RecordingTable {
    fn calls(&self) -> Vec<(IpNet, IpAddr, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RoutingTable for RecordingTable {
    async fn replace_route(
        &self,
        destination: IpNet,
        gateway: IpAddr,
        interface: &str,
    ) -> Result<(), RouteTableError> {
        self.calls
            .lock()
            .unwrap()
            .push((destination, gateway, interface.to_string()));
        Ok(())
    }
}

struct NullReporter;

#[async_trait]
impl TelemetryReporter for NullReporter {
    async fn report(&self, _snapshot: &TelemetrySnapshot) -> Result<(), TelemetryError> {
        Ok(())
    }
}

struct AlwaysPresent;

#[async_trait]
impl PresenceGuard for AlwaysPresent {
    async fn is_available(&self) -> bool {
        true
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

fn multi_homed_topology() -> Vec<MeshInterface> {
    // if0 and if1 both advertise 10.20.0.0/24 through their own peer.
    vec![
        mesh_interface("if0", "10.0.0.1/24", "10.0.0.2"),
        mesh_interface("if1", "10.0.1.1/24", "10.0.1.2"),
    ]
}

fn mesh_interface(name: &str, address: &str, peer_addr: &str) -> MeshInterface {
    MeshInterface {
        name: name.to_string(),
        address: address.parse().unwrap(),
        peers: vec![MeshPeer {
            identity: format!("{name}-peer"),
            allowed_ranges: vec![
                format!("{peer_addr}/32").parse().unwrap(),
                "10.20.0.0/24".parse().unwrap(),
            ],
        }],
    }
}

fn samples(entries: &[(&str, Option<u64>)]) -> BTreeMap<IpAddr, LatencySample> {
    entries
        .iter()
        .map(|(addr, rtt_ms)| {
            let sample = match rtt_ms {
                Some(ms) => LatencySample::reachable(Duration::from_millis(*ms), 0.0),
                None => LatencySample::unreachable(),
            };
            (addr.parse().unwrap(), sample)
        })
        .collect()
}

fn dest() -> IpNet {
    "10.20.0.0/24".parse().unwrap()
}

fn gw(addr: &str) -> IpAddr {
    addr.parse().unwrap()
}

fn service(
    topology: Vec<MeshInterface>,
    script: Vec<BTreeMap<IpAddr, LatencySample>>,
    table: Arc<RecordingTable>,
    config: ReconcilerConfig,
) -> RouteService {
    RouteService::new(
        config,
        Arc::new(StaticTopology(topology)),
        Arc::new(ScriptedProber::new(script)),
        table,
        Arc::new(NullReporter),
        Arc::new(AlwaysPresent),
    )
    .unwrap()
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn scenario_a_lowest_latency_interface_wins() {
    let table = Arc::new(RecordingTable::default());
    let service = service(
        multi_homed_topology(),
        vec![samples(&[("10.0.0.2", Some(10)), ("10.0.1.2", Some(50))])],
        Arc::clone(&table),
        ReconcilerConfig::default(),
    );

    let outcome = service.run_once().await.unwrap();

    assert_eq!(outcome.decisions.len(), 1);
    let decision = &outcome.decisions[&dest()];
    assert_eq!(decision.interface, "if0");
    assert_eq!(decision.gateway, gw("10.0.0.2"));

    assert_eq!(table.calls(), vec![(dest(), gw("10.0.0.2"), "if0".to_string())]);
}

#[tokio::test]
async fn scenario_b_degradation_flips_route_with_one_install() {
    let index = CandidateIndex::build(&multi_homed_topology());
    let table = RecordingTable::default();
    let mut reconciler = Reconciler::new();

    // Cycle 1: if0 at 10ms wins and is installed.
    let first = select_routes(
        &index,
        &samples(&[("10.0.0.2", Some(10)), ("10.0.1.2", Some(50))]),
    );
    reconciler.reconcile(&first, &table).await;
    assert_eq!(table.calls().len(), 1);

    // Cycle 2: if0 degrades to 80ms; the winner flips to if1 and exactly one
    // replace operation is emitted for that cycle.
    let second = select_routes(
        &index,
        &samples(&[("10.0.0.2", Some(80)), ("10.0.1.2", Some(50))]),
    );
    let summary = reconciler.reconcile(&second, &table).await;

    assert_eq!(summary.installed, 1);
    assert_eq!(summary.unchanged, 0);
    let calls = table.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], (dest(), gw("10.0.1.2"), "if1".to_string()));
}

#[tokio::test]
async fn scenario_c_unreachable_peer_loses_to_any_latency() {
    let index = CandidateIndex::build(&multi_homed_topology());

    // if0 reachable at a terrible 900ms, if1 completely dark.
    let decisions = select_routes(
        &index,
        &samples(&[("10.0.0.2", Some(900)), ("10.0.1.2", None)]),
    );

    let decision = &decisions[&dest()];
    assert_eq!(decision.interface, "if0");
    assert_eq!(decision.gateway, gw("10.0.0.2"));
}

#[tokio::test]
async fn reconciler_is_idempotent_across_identical_cycles() {
    let index = CandidateIndex::build(&multi_homed_topology());
    let table = RecordingTable::default();
    let mut reconciler = Reconciler::new();

    let decisions = select_routes(
        &index,
        &samples(&[("10.0.0.2", Some(10)), ("10.0.1.2", Some(50))]),
    );

    let first = reconciler.reconcile(&decisions, &table).await;
    let second = reconciler.reconcile(&decisions, &table).await;

    assert_eq!(first.installed, 1);
    assert_eq!(second.installed, 0);
    assert_eq!(second.unchanged, 1);
    assert_eq!(table.calls().len(), 1, "second pass must issue no operations");
}

#[tokio::test(start_paused = true)]
async fn control_loop_converges_and_flips_under_shifting_latency() {
    let table = Arc::new(RecordingTable::default());
    let service = Arc::new(service(
        multi_homed_topology(),
        vec![
            // First cycle: if0 wins.
            samples(&[("10.0.0.2", Some(10)), ("10.0.1.2", Some(50))]),
            // Every later cycle: if0 degraded, if1 wins.
            samples(&[("10.0.0.2", Some(80)), ("10.0.1.2", Some(50))]),
        ],
        Arc::clone(&table),
        ReconcilerConfig::default(),
    ));

    let runner = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.run().await })
    };

    // Enough paused-clock time for several 1s cycles.
    tokio::time::sleep(Duration::from_millis(4500)).await;
    service.stop();
    runner.await.unwrap().unwrap();

    let calls = table.calls();
    // One install for the initial winner, one for the flip, and nothing
    // more: repeated identical cycles stay quiet.
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], (dest(), gw("10.0.0.2"), "if0".to_string()));
    assert_eq!(calls[1], (dest(), gw("10.0.1.2"), "if1".to_string()));

    let stats = service.stats();
    assert!(stats.cycles >= 3);
    assert_eq!(stats.routes_installed, 2);
    assert_eq!(stats.install_failures, 0);
}

#[tokio::test]
async fn single_candidate_destination_survives_total_loss() {
    let table = Arc::new(RecordingTable::default());
    let service = service(
        vec![mesh_interface("if0", "10.0.0.1/24", "10.0.0.2")],
        vec![samples(&[("10.0.0.2", None)])],
        Arc::clone(&table),
        ReconcilerConfig::default(),
    );

    let outcome = service.run_once().await.unwrap();

    // A single path is better than no path, even fully dark.
    assert_eq!(outcome.decisions[&dest()].interface, "if0");
    assert_eq!(table.calls().len(), 1);
}
