// Kernel routing table over iproute2
//
// `ip route replace` has exactly the semantics the reconciler needs: install
// if absent, atomically supersede if present. One subprocess per operation,
// bounded by a timeout; failures carry the tool's stderr back to the caller.

use async_trait::async_trait;
use ipnet::IpNet;
use meshlane_core::{RouteTableError, RoutingTable};
use std::net::IpAddr;
use std::time::Duration;
use tokio::process::Command;

pub struct IpRouteTable {
    timeout: Duration,
}

impl IpRouteTable {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for IpRouteTable {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl RoutingTable for IpRouteTable {
    async fn replace_route(
        &self,
        destination: IpNet,
        gateway: IpAddr,
        interface: &str,
    ) -> Result<(), RouteTableError> {
        let dest = destination.to_string();
        let gw = gateway.to_string();

        let result = tokio::time::timeout(
            self.timeout,
            Command::new("ip")
                .args(["route", "replace", &dest, "via", &gw, "dev", interface])
                .output(),
        )
        .await;

        let output = match result {
            Err(_) => {
                return Err(RouteTableError::Install {
                    destination,
                    reason: format!("ip route replace timed out after {:?}", self.timeout),
                })
            }
            Ok(Err(err)) => {
                return Err(RouteTableError::Install {
                    destination,
                    reason: err.to_string(),
                })
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(RouteTableError::Install {
                destination,
                reason: format!(
                    "ip exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(())
    }
}
