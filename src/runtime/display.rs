use std::fmt::Write;
use std::time::Instant;

use crate::model::table::RoutingTable;

/// Renders the routing table as an aligned text block for the log: one line
/// per route with its metric, next hop, and remaining timer countdowns.
pub fn render_table(table: &RoutingTable, now: Instant) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "routing table of router {} ({} routes)",
        table.local_id(),
        table.len()
    );
    let _ = writeln!(
        out,
        "{:>6} {:>7} {:>9} {:>9} {:>9}",
        "dest", "metric", "next-hop", "timeout", "gc"
    );
    for route in table.routes() {
        let timeout = if route.gc_started {
            "-".to_string()
        } else {
            countdown(route.timeout_deadline, now)
        };
        let gc = match route.gc_deadline {
            Some(deadline) => countdown(deadline, now),
            None => "-".to_string(),
        };
        let _ = writeln!(
            out,
            "{:>6} {:>7} {:>9} {:>9} {:>9}",
            route.dest_id, route.metric, route.next_hop, timeout, gc
        );
    }
    out
}

fn countdown(deadline: Instant, now: Instant) -> String {
    match deadline.checked_duration_since(now) {
        Some(left) => format!("{:.1}s", left.as_secs_f64()),
        None => "due".to_string(),
    }
}
