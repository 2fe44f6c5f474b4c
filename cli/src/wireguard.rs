// WireGuard-backed topology discovery
//
// Production TopologySource/PresenceGuard over the wireguard-tools CLI:
// `wg show all dump` for interfaces and peers, `ip -json addr show` for each
// interface's own tunnel address. Every subprocess call is bounded by a
// timeout so a wedged tool cannot stall the reconciliation loop.

use async_trait::async_trait;
use ipnet::IpNet;
use meshlane_core::{MeshInterface, MeshPeer, PresenceGuard, TopologyError, TopologySource};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::process::Command;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

async fn run_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String, TopologyError> {
    let output = tokio::time::timeout(timeout, Command::new(program).args(args).output())
        .await
        .map_err(|_| {
            TopologyError::Enumeration(format!("{program} timed out after {timeout:?}"))
        })??;

    if !output.status.success() {
        return Err(TopologyError::Enumeration(format!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ============================================================================
// TOPOLOGY SOURCE
// ============================================================================

/// Enumerates WireGuard interfaces and peers via wireguard-tools.
pub struct WgTopologySource {
    timeout: Duration,
}

impl WgTopologySource {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for WgTopologySource {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl WgTopologySource {
    async fn interface_address(&self, name: &str) -> Result<Option<IpNet>, TopologyError> {
        let json = run_command(
            "ip",
            &["-json", "addr", "show", "dev", name],
            self.timeout,
        )
        .await?;
        Ok(parse_first_address(&json))
    }
}

#[async_trait]
impl TopologySource for WgTopologySource {
    async fn list_interfaces(&self) -> Result<Vec<MeshInterface>, TopologyError> {
        let dump = run_command("wg", &["show", "all", "dump"], self.timeout).await?;

        let mut interfaces = Vec::new();
        for (name, peers) in parse_wg_dump(&dump) {
            match self.interface_address(&name).await? {
                Some(address) => interfaces.push(MeshInterface {
                    name,
                    address,
                    peers,
                }),
                None => {
                    // An interface with no tunnel address has no subnet to
                    // resolve gateways against; skip it this cycle.
                    tracing::warn!(interface = %name, "no address assigned; skipping");
                }
            }
        }

        Ok(interfaces)
    }
}

/// Parse `wg show all dump` output.
///
/// Interface lines carry 5 tab-separated fields (name, private key, public
/// key, listen port, fwmark); peer lines carry 9 (name, public key,
/// preshared key, endpoint, allowed-ips, latest handshake, rx, tx,
/// keepalive).
fn parse_wg_dump(dump: &str) -> BTreeMap<String, Vec<MeshPeer>> {
    let mut interfaces: BTreeMap<String, Vec<MeshPeer>> = BTreeMap::new();

    for line in dump.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        match fields.len() {
            5 => {
                interfaces.entry(fields[0].to_string()).or_default();
            }
            9 => {
                interfaces
                    .entry(fields[0].to_string())
                    .or_default()
                    .push(MeshPeer {
                        identity: fields[1].to_string(),
                        allowed_ranges: parse_allowed_ips(fields[4]),
                    });
            }
            n => {
                tracing::debug!(fields = n, "unrecognized wg dump line");
            }
        }
    }

    interfaces
}

fn parse_allowed_ips(field: &str) -> Vec<IpNet> {
    if field == "(none)" {
        return Vec::new();
    }
    field
        .split(',')
        .filter_map(|range| match range.trim().parse::<IpNet>() {
            Ok(net) => Some(net),
            Err(err) => {
                tracing::warn!(range = range.trim(), error = %err, "skipping unparseable allowed-ip");
                None
            }
        })
        .collect()
}

#[derive(Deserialize)]
struct IpLink {
    #[serde(default)]
    addr_info: Vec<IpAddrInfo>,
}

#[derive(Deserialize)]
struct IpAddrInfo {
    family: Option<String>,
    local: Option<String>,
    prefixlen: Option<u8>,
}

/// First inet/inet6 address of an `ip -json addr show dev <if>` reply.
fn parse_first_address(json: &str) -> Option<IpNet> {
    let links: Vec<IpLink> = serde_json::from_str(json).ok()?;
    links
        .iter()
        .flat_map(|link| &link.addr_info)
        .find_map(|info| {
            let family = info.family.as_deref()?;
            if family != "inet" && family != "inet6" {
                return None;
            }
            let local = info.local.as_deref()?;
            let prefixlen = info.prefixlen?;
            format!("{local}/{prefixlen}").parse().ok()
        })
}

// ============================================================================
// PRESENCE GUARD
// ============================================================================

/// Mesh availability check: can wireguard-tools talk to the kernel at all?
pub struct WgPresence {
    timeout: Duration,
}

impl WgPresence {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for WgPresence {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

#[async_trait]
impl PresenceGuard for WgPresence {
    async fn is_available(&self) -> bool {
        match tokio::time::timeout(self.timeout, Command::new("wg").arg("show").output()).await {
            Ok(Ok(output)) => output.status.success(),
            _ => false,
        }
    }
}
