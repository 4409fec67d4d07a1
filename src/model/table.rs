use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::debug;

pub type RouterId = u16;
pub type Metric = u32;

/// Metric sentinel marking an unreachable destination.
pub const INFINITY: Metric = 16;
pub const MAX_ROUTER_ID: RouterId = 64_000;

const TIMEOUT_FACTOR: u32 = 6;
const GC_FACTOR: u32 = 4;

/// Capability handed to the table so it can ask the daemon for a triggered
/// update without owning it.
pub trait UpdateSignal {
    fn schedule_triggered(&self);
}

/// Pending-update flag shared between the daemon and the table. Interior
/// mutability is safe here: everything runs on the one event-loop thread.
#[derive(Debug, Default)]
pub struct TriggerFlag {
    pending: Cell<bool>,
}

impl TriggerFlag {
    pub fn take(&self) -> bool {
        self.pending.replace(false)
    }
}

impl UpdateSignal for TriggerFlag {
    fn schedule_triggered(&self) {
        self.pending.set(true);
    }
}

#[derive(Debug, Clone)]
struct Entry {
    metric: Metric,
    next_hop: RouterId,
    timeout_deadline: Instant,
    gc_deadline: Option<Instant>,
}

impl Entry {
    fn gc_started(&self) -> bool {
        self.gc_deadline.is_some()
    }
}

/// Read-only snapshot of one route, for advertisement building and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteView {
    pub dest_id: RouterId,
    pub metric: Metric,
    pub next_hop: RouterId,
    pub gc_started: bool,
    pub timeout_deadline: Instant,
    pub gc_deadline: Option<Instant>,
}

/// The distance-vector routing table.
///
/// Holds one entry per known destination, keyed by destination router id,
/// plus the immutable link costs to the configured neighbors. Entries age
/// through a timeout timer into garbage collection and removal; a route
/// entering garbage collection pins its metric at [`INFINITY`] and raises
/// the daemon's triggered-update signal.
pub struct RoutingTable {
    local_id: RouterId,
    neighbors: BTreeMap<RouterId, Metric>,
    entries: BTreeMap<RouterId, Entry>,
    timeout_period: Duration,
    gc_period: Duration,
    signal: Rc<dyn UpdateSignal>,
}

impl RoutingTable {
    /// Builds the table and seeds one direct route per neighbor with its
    /// timeout armed.
    pub fn new(
        local_id: RouterId,
        neighbors: BTreeMap<RouterId, Metric>,
        update_period: Duration,
        signal: Rc<dyn UpdateSignal>,
        now: Instant,
    ) -> Self {
        let mut table = Self {
            local_id,
            neighbors,
            entries: BTreeMap::new(),
            timeout_period: update_period * TIMEOUT_FACTOR,
            gc_period: update_period * GC_FACTOR,
            signal,
        };
        let seeds: Vec<(RouterId, Metric)> = table
            .neighbors
            .iter()
            .map(|(&id, &cost)| (id, cost.min(INFINITY)))
            .collect();
        for (id, cost) in seeds {
            table.add_entry(id, cost, id, now);
        }
        table
    }

    pub fn local_id(&self) -> RouterId {
        self.local_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_route(&self, dest: RouterId) -> bool {
        self.entries.contains_key(&dest)
    }

    /// Current metric for `dest`. The route must exist.
    pub fn metric(&self, dest: RouterId) -> Metric {
        self.entries[&dest].metric
    }

    /// Current next hop for `dest`. The route must exist.
    pub fn next_hop(&self, dest: RouterId) -> RouterId {
        self.entries[&dest].next_hop
    }

    pub fn set_metric(&mut self, dest: RouterId, metric: Metric) {
        let Some(entry) = self.entries.get_mut(&dest) else {
            return;
        };
        entry.metric = metric.min(INFINITY);
    }

    pub fn set_next_hop(&mut self, dest: RouterId, next_hop: RouterId) {
        let Some(entry) = self.entries.get_mut(&dest) else {
            return;
        };
        entry.next_hop = next_hop;
    }

    pub fn is_neighbor(&self, id: RouterId) -> bool {
        self.neighbors.contains_key(&id)
    }

    /// Cost of the direct link to a configured neighbor. Defined for every
    /// neighbor even after its route has been garbage-collected.
    pub fn link_metric(&self, id: RouterId) -> Metric {
        self.neighbors[&id]
    }

    /// Inserts a fresh route and arms its timeout. There must not be an
    /// entry for `dest` yet.
    pub fn add_entry(&mut self, dest: RouterId, metric: Metric, next_hop: RouterId, now: Instant) {
        debug_assert!(dest != self.local_id);
        debug_assert!(!self.entries.contains_key(&dest));
        self.entries.insert(
            dest,
            Entry {
                metric: metric.min(INFINITY),
                next_hop,
                timeout_deadline: now + self.timeout_period,
                gc_deadline: None,
            },
        );
    }

    /// Re-arms the timeout and cancels a running garbage collection. Calling
    /// this on a poisoned entry resurrects it with whatever metric it
    /// currently carries.
    pub fn reset_timeout(&mut self, dest: RouterId, now: Instant) {
        let Some(entry) = self.entries.get_mut(&dest) else {
            return;
        };
        entry.timeout_deadline = now + self.timeout_period;
        entry.gc_deadline = None;
    }

    /// Poisons the route and starts its garbage-collection timer, raising
    /// the triggered-update signal. Idempotent: a second call while GC is
    /// already running neither restarts the timer nor signals again.
    pub fn start_deletion(&mut self, dest: RouterId, now: Instant) {
        let Some(entry) = self.entries.get_mut(&dest) else {
            return;
        };
        if entry.gc_started() {
            return;
        }
        entry.metric = INFINITY;
        entry.gc_deadline = Some(now + self.gc_period);
        debug!("route to {dest} poisoned, garbage collection started");
        self.signal.schedule_triggered();
    }

    /// Sweeps every entry once: expired timeouts start garbage collection,
    /// expired garbage collections remove the entry.
    pub fn check_timers(&mut self, now: Instant) {
        let timed_out: Vec<RouterId> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.gc_started() && now > entry.timeout_deadline)
            .map(|(&dest, _)| dest)
            .collect();
        for dest in timed_out {
            debug!("route to {dest} timed out");
            self.start_deletion(dest, now);
        }

        let removable: Vec<RouterId> = self
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry.gc_deadline, Some(at) if now > at))
            .map(|(&dest, _)| dest)
            .collect();
        for dest in removable {
            debug!("garbage collection expired, removing route to {dest}");
            self.entries.remove(&dest);
        }
    }

    pub fn routes(&self) -> impl Iterator<Item = RouteView> + '_ {
        self.entries.iter().map(|(&dest_id, entry)| RouteView {
            dest_id,
            metric: entry.metric,
            next_hop: entry.next_hop,
            gc_started: entry.gc_started(),
            timeout_deadline: entry.timeout_deadline,
            gc_deadline: entry.gc_deadline,
        })
    }
}
