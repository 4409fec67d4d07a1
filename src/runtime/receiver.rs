use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::model::packet::{ResponsePacket, MAX_PACKET_SIZE};
use crate::model::table::{Metric, RouterId, RoutingTable, INFINITY, MAX_ROUTER_ID};
use crate::runtime::transport::InputBank;

/// Receive side of the daemon: the bound input sockets, the shared receive
/// buffer, and the ingestion of neighbor advertisements into the table.
pub struct Receiver {
    inputs: InputBank,
    buf: [u8; MAX_PACKET_SIZE],
}

impl Receiver {
    pub fn bind(ports: &[u16]) -> Result<Self> {
        let inputs = InputBank::bind(ports).context("failed to bind input sockets")?;
        Ok(Self {
            inputs,
            buf: [0; MAX_PACKET_SIZE],
        })
    }

    /// Waits up to `timeout` for inbound datagrams and folds every
    /// well-formed advertisement into the routing table. All receive-side
    /// failures are logged and survived.
    pub fn wait_for_messages(&mut self, timeout: Duration, table: &mut RoutingTable) {
        let ready = match self.inputs.wait_ready(timeout) {
            Ok(ready) => ready,
            Err(err) => {
                warn!("readiness wait failed: {err}");
                return;
            }
        };
        for index in ready {
            self.drain_socket(index, table);
        }
    }

    // Readiness is edge-triggered, so each ready socket is read until empty.
    fn drain_socket(&mut self, index: usize, table: &mut RoutingTable) {
        loop {
            match self.inputs.recv_on(index, &mut self.buf) {
                Ok(Some(len)) => {
                    process_packet(table, &self.buf[..len], Instant::now());
                }
                Ok(None) => return,
                Err(err) => {
                    warn!("receive failed on input socket {index}: {err}");
                    return;
                }
            }
        }
    }
}

fn process_packet(table: &mut RoutingTable, data: &[u8], now: Instant) {
    let packet = match ResponsePacket::decode(data) {
        Ok(packet) => packet,
        Err(err) => {
            warn!("drop malformed packet: {err}");
            return;
        }
    };
    if !table.is_neighbor(packet.sender_id) {
        warn!("drop packet from non-neighbor router {}", packet.sender_id);
        return;
    }

    // The datagram itself proves the direct link to the sender is alive.
    apply_update(table, packet.sender_id, packet.sender_id, 0, now);

    for entry in &packet.entries {
        if entry.dest_id < 1 || entry.dest_id > u32::from(MAX_ROUTER_ID) {
            debug!(
                "skip advertisement from {} with out-of-range destination {}",
                packet.sender_id, entry.dest_id
            );
            continue;
        }
        if entry.metric < 1 || entry.metric > INFINITY {
            debug!(
                "skip advertisement from {} for {} with out-of-range metric {}",
                packet.sender_id, entry.dest_id, entry.metric
            );
            continue;
        }
        apply_update(table, packet.sender_id, entry.dest_id as RouterId, entry.metric, now);
    }
}

/// The distance-vector update rule.
///
/// A strictly better metric replaces the current route; an equal metric from
/// a different neighbor does not. An update from the current next hop is
/// authoritative and may raise, lower, or poison the route.
fn apply_update(
    table: &mut RoutingTable,
    sender: RouterId,
    dest: RouterId,
    metric_sent: Metric,
    now: Instant,
) {
    if dest == table.local_id() {
        return;
    }
    let metric = metric_sent
        .saturating_add(table.link_metric(sender))
        .min(INFINITY);

    if table.has_route(dest) {
        let current_metric = table.metric(dest);
        let current_next_hop = table.next_hop(dest);

        if sender == current_next_hop {
            table.reset_timeout(dest, now);
        }
        if (sender == current_next_hop && metric != current_metric) || metric < current_metric {
            table.set_next_hop(dest, sender);
            table.set_metric(dest, metric);
            if metric == INFINITY {
                table.start_deletion(dest, now);
            } else {
                table.reset_timeout(dest, now);
            }
        }
    } else if metric != INFINITY {
        table.add_entry(dest, metric, sender, now);
        debug!("learned route to {dest} via {sender} at metric {metric}");
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::model::table::{RouteView, TriggerFlag, UpdateSignal};

    // router 1 with two neighbors: outputs 5002-1-2 5003-5-3
    fn demo_table(now: Instant) -> (RoutingTable, Rc<TriggerFlag>) {
        let flag = Rc::new(TriggerFlag::default());
        let table = RoutingTable::new(
            1,
            [(2, 1), (3, 5)].into_iter().collect(),
            Duration::from_secs(1),
            Rc::clone(&flag) as Rc<dyn UpdateSignal>,
            now,
        );
        (table, flag)
    }

    fn response(sender: RouterId, entries: &[(u32, u32)]) -> Vec<u8> {
        let mut packet = ResponsePacket::new(sender);
        for &(dest, metric) in entries {
            packet.entries.push(crate::model::packet::RouteEntry {
                dest_id: dest,
                metric,
            });
        }
        packet.encode().expect("test packet should encode")
    }

    fn snapshot(table: &RoutingTable) -> Vec<RouteView> {
        table.routes().collect()
    }

    #[test]
    fn learns_a_new_destination_through_a_neighbor() {
        let now = Instant::now();
        let (mut table, _) = demo_table(now);

        process_packet(&mut table, &response(2, &[(7, 3)]), now);
        assert_eq!(table.metric(7), 4);
        assert_eq!(table.next_hop(7), 2);
    }

    #[test]
    fn worse_route_from_another_neighbor_is_ignored() {
        let now = Instant::now();
        let (mut table, _) = demo_table(now);

        process_packet(&mut table, &response(2, &[(7, 3)]), now);
        process_packet(&mut table, &response(3, &[(7, 6)]), now);
        assert_eq!(table.metric(7), 4);
        assert_eq!(table.next_hop(7), 2);
    }

    #[test]
    fn equal_metric_from_another_neighbor_does_not_replace() {
        let now = Instant::now();
        let flag = Rc::new(TriggerFlag::default());
        let mut table = RoutingTable::new(
            1,
            [(2, 1), (3, 2)].into_iter().collect(),
            Duration::from_secs(1),
            flag as Rc<dyn UpdateSignal>,
            now,
        );

        process_packet(&mut table, &response(2, &[(7, 3)]), now);
        // metric 4 via router 3 ties the current route and must not win
        process_packet(&mut table, &response(3, &[(7, 2)]), now);
        assert_eq!(table.metric(7), 4);
        assert_eq!(table.next_hop(7), 2);
    }

    #[test]
    fn strictly_better_route_replaces() {
        let now = Instant::now();
        let (mut table, _) = demo_table(now);

        process_packet(&mut table, &response(3, &[(7, 6)]), now);
        assert_eq!(table.metric(7), 11);
        assert_eq!(table.next_hop(7), 3);

        process_packet(&mut table, &response(2, &[(7, 3)]), now);
        assert_eq!(table.metric(7), 4);
        assert_eq!(table.next_hop(7), 2);
    }

    #[test]
    fn current_next_hop_may_raise_the_metric() {
        let now = Instant::now();
        let (mut table, _) = demo_table(now);

        process_packet(&mut table, &response(2, &[(7, 2)]), now);
        assert_eq!(table.metric(7), 3);

        process_packet(&mut table, &response(2, &[(7, 9)]), now);
        assert_eq!(table.metric(7), 10);
        assert_eq!(table.next_hop(7), 2);
    }

    #[test]
    fn poison_from_current_next_hop_starts_deletion() {
        let now = Instant::now();
        let (mut table, flag) = demo_table(now);

        process_packet(&mut table, &response(2, &[(7, 3)]), now);
        flag.take();

        process_packet(&mut table, &response(2, &[(7, 16)]), now);
        assert_eq!(table.metric(7), INFINITY);
        assert!(flag.take());
        let route = snapshot(&table)
            .into_iter()
            .find(|route| route.dest_id == 7)
            .expect("route to 7 should still exist");
        assert!(route.gc_started);
    }

    #[test]
    fn poison_from_another_neighbor_is_ignored() {
        let now = Instant::now();
        let (mut table, flag) = demo_table(now);

        process_packet(&mut table, &response(2, &[(7, 3)]), now);
        flag.take();

        process_packet(&mut table, &response(3, &[(7, 16)]), now);
        assert_eq!(table.metric(7), 4);
        assert_eq!(table.next_hop(7), 2);
        assert!(!flag.take());
    }

    #[test]
    fn next_hop_reinstates_a_poisoned_route() {
        let now = Instant::now();
        let (mut table, flag) = demo_table(now);

        process_packet(&mut table, &response(2, &[(7, 16)]), now);
        // unknown destination advertised at infinity is never inserted
        assert!(!table.has_route(7));

        process_packet(&mut table, &response(2, &[(7, 3)]), now);
        process_packet(&mut table, &response(2, &[(7, 16)]), now);
        assert_eq!(table.metric(7), INFINITY);
        flag.take();

        process_packet(&mut table, &response(2, &[(7, 2)]), now);
        assert_eq!(table.metric(7), 3);
        let route = snapshot(&table)
            .into_iter()
            .find(|route| route.dest_id == 7)
            .expect("route to 7 should exist");
        assert!(!route.gc_started);
    }

    #[test]
    fn header_reinstates_the_direct_route_to_the_sender() {
        let now = Instant::now();
        let (mut table, flag) = demo_table(now);

        table.start_deletion(2, now);
        flag.take();
        assert_eq!(table.metric(2), INFINITY);

        process_packet(&mut table, &response(2, &[]), now);
        assert_eq!(table.metric(2), 1);
        assert_eq!(table.next_hop(2), 2);
        let route = snapshot(&table)
            .into_iter()
            .find(|route| route.dest_id == 2)
            .expect("route to 2 should exist");
        assert!(!route.gc_started);
    }

    #[test]
    fn own_id_in_an_advertisement_is_ignored() {
        let now = Instant::now();
        let (mut table, _) = demo_table(now);

        process_packet(&mut table, &response(2, &[(1, 3)]), now);
        assert!(!table.has_route(1));
    }

    #[test]
    fn out_of_range_entries_are_skipped_not_fatal() {
        let now = Instant::now();
        let (mut table, _) = demo_table(now);

        let data = response(2, &[(0, 3), (70_000, 3), (7, 0), (7, 17), (8, 2)]);
        process_packet(&mut table, &data, now);
        assert!(!table.has_route(7));
        assert_eq!(table.metric(8), 3);
    }

    #[test]
    fn packets_from_non_neighbors_are_dropped() {
        let now = Instant::now();
        let (mut table, _) = demo_table(now);

        process_packet(&mut table, &response(9, &[(7, 3)]), now);
        assert!(!table.has_route(7));
        assert!(!table.has_route(9));
    }

    #[test]
    fn malformed_packets_are_dropped() {
        let now = Instant::now();
        let (mut table, _) = demo_table(now);
        let before = snapshot(&table);

        process_packet(&mut table, &[2, 2, 0], now);
        process_packet(&mut table, &[1, 2, 0, 2], now);
        let mut ragged = response(2, &[(7, 3)]);
        ragged.truncate(ragged.len() - 1);
        process_packet(&mut table, &ragged, now);

        assert_eq!(snapshot(&table), before);
    }

    #[test]
    fn redelivery_of_the_same_packet_is_idempotent() {
        let now = Instant::now();
        let (mut table, _) = demo_table(now);
        let data = response(2, &[(7, 3), (8, 15)]);

        process_packet(&mut table, &data, now);
        let first = snapshot(&table);
        process_packet(&mut table, &data, now);
        assert_eq!(snapshot(&table), first);
    }

    #[test]
    fn advertised_metric_saturates_at_infinity() {
        let now = Instant::now();
        let (mut table, flag) = demo_table(now);

        // 15 over the cost-5 link saturates to 16 and is not inserted
        process_packet(&mut table, &response(3, &[(7, 15)]), now);
        assert!(!table.has_route(7));
        assert!(!flag.take());
    }
}
