use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use rand::rngs::ThreadRng;
use rand::Rng;
use tracing::{debug, info};

use crate::model::table::{RoutingTable, TriggerFlag, UpdateSignal};
use crate::runtime::config::RouterConfig;
use crate::runtime::display::render_table;
use crate::runtime::receiver::Receiver;
use crate::runtime::sender::Sender;

/// Upper bound on one readiness wait; the loop never blocks longer.
const POLL_TIMEOUT: Duration = Duration::from_millis(1000);

const PERIODIC_JITTER: std::ops::Range<f64> = 0.8..1.2;
const TRIGGERED_BACKOFF_SECS: std::ops::Range<f64> = 1.0..5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateKind {
    Periodic,
    Triggered,
}

/// Periodic/triggered advertisement timing.
///
/// A pending trigger is only honored outside the backoff window, and a
/// periodic send clears both the pending flag and the window.
#[derive(Debug)]
struct UpdateSchedule {
    next_periodic_at: Instant,
    backoff_until: Option<Instant>,
    pending: bool,
}

impl UpdateSchedule {
    fn new(next_periodic_at: Instant) -> Self {
        Self {
            next_periodic_at,
            backoff_until: None,
            pending: false,
        }
    }

    fn note_trigger(&mut self) {
        self.pending = true;
    }

    fn due(&self, now: Instant) -> Option<UpdateKind> {
        // A due periodic send is never held back by the triggered backoff;
        // only further triggered sends wait the window out.
        if now > self.next_periodic_at {
            return Some(UpdateKind::Periodic);
        }
        if let Some(until) = self.backoff_until {
            if now <= until {
                return None;
            }
        }
        if self.pending {
            Some(UpdateKind::Triggered)
        } else {
            None
        }
    }

    fn record_periodic(&mut self, next_periodic_at: Instant) {
        self.next_periodic_at = next_periodic_at;
        self.pending = false;
        self.backoff_until = None;
    }

    fn record_triggered(&mut self, backoff_until: Instant) {
        self.pending = false;
        self.backoff_until = Some(backoff_until);
    }
}

/// The router daemon: owns the table, the sockets, and the event loop.
pub struct RouterDaemon {
    cfg: RouterConfig,
    table: RoutingTable,
    receiver: Receiver,
    sender: Sender,
    trigger: Rc<TriggerFlag>,
    schedule: UpdateSchedule,
    rng: ThreadRng,
    running: Arc<AtomicBool>,
}

impl RouterDaemon {
    pub fn new(cfg: RouterConfig) -> Result<Self> {
        let now = Instant::now();
        let trigger = Rc::new(TriggerFlag::default());
        let table = RoutingTable::new(
            cfg.router_id,
            cfg.neighbors
                .iter()
                .map(|neighbor| (neighbor.router_id, neighbor.link_metric))
                .collect(),
            cfg.update_period,
            Rc::clone(&trigger) as Rc<dyn UpdateSignal>,
            now,
        );
        let receiver = Receiver::bind(&cfg.input_ports)?;
        let sender = Sender::bind(cfg.output_port, cfg.router_id, cfg.neighbors.clone())?;

        Ok(Self {
            cfg,
            table,
            receiver,
            sender,
            trigger,
            schedule: UpdateSchedule::new(now),
            rng: rand::thread_rng(),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn run(&mut self) -> Result<()> {
        self.install_signal_handler()?;

        info!(
            "ripd start: router_id={} input_ports={:?} output_port={} update_period={}s",
            self.cfg.router_id,
            self.cfg.input_ports,
            self.cfg.output_port,
            self.cfg.update_period.as_secs()
        );

        // Announce the seeded table right away; the first scheduled update
        // follows one jittered period later.
        self.sender.send_updates(&self.table);
        let now = Instant::now();
        let next_periodic = now + self.jittered_period();
        self.schedule.record_periodic(next_periodic);

        while self.running.load(Ordering::Relaxed) {
            self.receiver.wait_for_messages(POLL_TIMEOUT, &mut self.table);

            let now = Instant::now();
            if self.trigger.take() {
                self.schedule.note_trigger();
            }
            match self.schedule.due(now) {
                Some(UpdateKind::Periodic) => {
                    self.sender.send_updates(&self.table);
                    let next_periodic = now + self.jittered_period();
                    self.schedule.record_periodic(next_periodic);
                    info!("periodic update sent\n{}", render_table(&self.table, now));
                }
                Some(UpdateKind::Triggered) => {
                    self.sender.send_updates(&self.table);
                    let backoff =
                        Duration::from_secs_f64(self.rng.gen_range(TRIGGERED_BACKOFF_SECS));
                    self.schedule.record_triggered(now + backoff);
                    debug!(
                        "triggered update sent, backing off {:.1}s",
                        backoff.as_secs_f64()
                    );
                }
                None => {}
            }

            self.table.check_timers(now);
        }

        info!("ripd stopped");
        Ok(())
    }

    fn install_signal_handler(&self) -> Result<()> {
        let running = Arc::clone(&self.running);
        ctrlc::set_handler(move || {
            running.store(false, Ordering::Relaxed);
        })?;
        Ok(())
    }

    fn jittered_period(&mut self) -> Duration {
        self.cfg.update_period.mul_f64(self.rng.gen_range(PERIODIC_JITTER))
    }
}
