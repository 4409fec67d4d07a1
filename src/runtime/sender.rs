use anyhow::{Context, Result};
use tracing::warn;

use crate::model::packet::ResponsePacket;
use crate::model::table::{RouterId, RoutingTable, INFINITY};
use crate::runtime::config::NeighborConfig;
use crate::runtime::transport::OutputSocket;

/// Send side of the daemon: the output socket and the per-neighbor
/// advertisement assembly.
pub struct Sender {
    output: OutputSocket,
    neighbors: Vec<NeighborConfig>,
    local_id: RouterId,
}

impl Sender {
    pub fn bind(port: u16, local_id: RouterId, neighbors: Vec<NeighborConfig>) -> Result<Self> {
        let output = OutputSocket::bind(port)
            .with_context(|| format!("failed to bind output socket on port {port}"))?;
        Ok(Self {
            output,
            neighbors,
            local_id,
        })
    }

    /// Sends one freshly built advertisement to every configured neighbor,
    /// in configuration order. Per-packet failures are logged and skipped.
    pub fn send_updates(&self, table: &RoutingTable) {
        for neighbor in &self.neighbors {
            let packet = build_response(self.local_id, neighbor.router_id, table);
            let payload = match packet.encode() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!("skip advertisement to router {}: {err}", neighbor.router_id);
                    continue;
                }
            };
            if let Err(err) = self.output.send_to_port(&payload, neighbor.input_port) {
                warn!(
                    "failed to send advertisement to router {} on port {}: {err}",
                    neighbor.router_id, neighbor.input_port
                );
            }
        }
    }
}

/// Builds the advertisement for one neighbor with split horizon and poison
/// reverse: every route whose next hop is that neighbor is advertised back
/// to it as unreachable.
pub fn build_response(
    local_id: RouterId,
    neighbor_id: RouterId,
    table: &RoutingTable,
) -> ResponsePacket {
    let mut packet = ResponsePacket::new(local_id);
    for route in table.routes() {
        let metric = if route.next_hop == neighbor_id {
            INFINITY
        } else {
            route.metric
        };
        packet.push(route.dest_id, metric);
    }
    packet
}
