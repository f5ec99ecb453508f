//! Dispatcher: matches idle mechanics and loaders to rigs that need them.
//!
//! Two periodic loops run side by side until the stop signal is raised:
//!
//! 1. Repair pass: every rig that is burning or damaged and not already
//!    claimed gets the first idle mechanic in registry order. The repair
//!    runs as its own task.
//! 2. Shipment pass: every rig ready for shipment gets the first idle
//!    loader with room in registry order. The pass waits for the loading
//!    phase before moving on to the next rig; transport continues in the
//!    background. Each round starts with a transport pass that sends any
//!    idle loader still holding cargo on its way.
//!
//! Resources are reserved with a compare-and-swap inside the pass, before
//! any task is spawned, so overlapping passes can never hand the same
//! mechanic or loader out twice. The passes run in separate loops so a long
//! load never delays a repair.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::context::{ActorContext, ActorTasks};
use crate::error::SimError;
use crate::loader::LoaderLease;
use crate::mechanic::{Mechanic, RepairJob};
use crate::registry::FleetRegistry;
use crate::rig::Rig;

/// The dispatcher's control loop state.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<FleetRegistry>,
    tasks: Arc<ActorTasks>,
    ctx: ActorContext,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<FleetRegistry>, tasks: Arc<ActorTasks>, ctx: ActorContext) -> Self {
        Self {
            registry,
            tasks,
            ctx,
        }
    }

    /// Run both passes every `dispatch_interval` until stopped.
    pub async fn run(self) {
        info!(interval = ?self.ctx.config.dispatch_interval, "dispatcher started");
        tokio::join!(self.repair_loop(), self.shipment_loop());
        info!("dispatcher stopped");
    }

    fn interval(&self) -> Interval {
        let mut interval = tokio::time::interval(self.ctx.config.dispatch_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    }

    async fn repair_loop(&self) {
        let mut interval = self.interval();
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = self.ctx.stopped() => break,
            }
            self.repair_pass();
        }
    }

    async fn shipment_loop(&self) {
        let mut interval = self.interval();
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = self.ctx.stopped() => break,
            }
            self.transport_pass();
            self.shipment_pass().await;
        }
    }

    /// Start a repair on every rig that needs one, while idle mechanics
    /// last. Returns the number of repairs started.
    pub fn repair_pass(&self) -> usize {
        let mechanics = self.registry.mechanics().list();
        let mut started = 0;
        for rig in self.registry.rigs().list() {
            if !rig.needs_repair() {
                continue;
            }
            let Some(job) = self.claim_mechanic(&rig, &mechanics) else {
                debug!(rig = %rig.name(), "no idle mechanic");
                continue;
            };
            info!(
                mechanic = %job.mechanic().name(),
                rig = %rig.name(),
                "mechanic dispatched"
            );
            let ctx = self.ctx.clone();
            self.tasks.spawn(async move {
                job.run(&ctx).await;
            });
            started += 1;
        }
        started
    }

    /// First mechanic in registry order that can take `rig`.
    fn claim_mechanic(&self, rig: &Arc<Rig>, mechanics: &[Arc<Mechanic>]) -> Option<RepairJob> {
        for mechanic in mechanics.iter().filter(|m| !m.is_busy()) {
            match mechanic.assign(rig) {
                Ok(job) => return Some(job),
                // Lost the race for this mechanic; try the next one.
                Err(SimError::MechanicBusy(_)) => continue,
                Err(err) => {
                    // The rig changed under us (repaired or claimed). Skip it.
                    self.ctx
                        .events
                        .warn(format!("dispatch to {} skipped: {err}", rig.name()));
                    return None;
                }
            }
        }
        None
    }

    /// Send a loader to every rig ready for shipment, while loaders with
    /// room last. Returns the number of shipments started.
    pub async fn shipment_pass(&self) -> usize {
        let mut started = 0;
        for rig in self.registry.rigs().list() {
            if self.ctx.is_stopped() {
                break;
            }
            if !rig.is_ready_for_shipment() {
                continue;
            }
            let Some(lease) = self.claim_loader() else {
                debug!(rig = %rig.name(), "no idle loader");
                continue;
            };
            info!(loader = %lease.loader().name(), rig = %rig.name(), "loader dispatched");
            self.ship(rig, lease).await;
            started += 1;
        }
        started
    }

    /// Send every idle loader still holding cargo on a trip. Returns the
    /// number of trips started.
    pub fn transport_pass(&self) -> usize {
        let mut started = 0;
        for loader in self.registry.loaders().list() {
            if loader.is_busy() || loader.current_load() <= 0.0 {
                continue;
            }
            let Ok(lease) = loader.reserve() else {
                continue;
            };
            info!(loader = %loader.name(), load = loader.current_load(), "loader sent to deliver");
            let ctx = self.ctx.clone();
            self.tasks.spawn(async move {
                lease.transport(&ctx).await;
            });
            started += 1;
        }
        started
    }

    /// First idle loader in registry order with room for a shipment.
    fn claim_loader(&self) -> Option<LoaderLease> {
        self.registry
            .loaders()
            .list()
            .iter()
            .filter(|l| !l.is_busy() && l.has_room_for_shipment())
            .find_map(|l| l.reserve().ok())
    }

    /// Run one shipment in the background and wait until its load phase is
    /// over.
    async fn ship(&self, rig: Arc<Rig>, lease: LoaderLease) {
        let (loaded_tx, loaded_rx) = oneshot::channel();
        let ctx = self.ctx.clone();
        self.tasks.spawn(async move {
            let moved = lease.load_from(&rig, rig.storage(), &ctx).await;
            let _ = loaded_tx.send(moved);
            if lease.loader().current_load() > 0.0 {
                lease.transport(&ctx).await;
            }
        });

        match loaded_rx.await {
            Ok(moved) => debug!(moved, "load phase finished"),
            Err(_) => self
                .ctx
                .events
                .warn("shipment task ended before its load phase completed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::config::SimConfig;
    use crate::context::StopSignal;
    use crate::event::EventSink;
    use crate::loader::Loader;
    use crate::rig::tests::TICK;
    use crate::rig::{RigSpec, RigStatus};

    struct Fixture {
        registry: Arc<FleetRegistry>,
        tasks: Arc<ActorTasks>,
        signal: StopSignal,
        dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(FleetRegistry::new());
        let events = EventSink::new(256);
        let tasks = Arc::new(ActorTasks::new(events.clone()));
        let signal = StopSignal::new();
        let ctx = ActorContext::new(
            Arc::new(SimConfig::scaled(TICK)),
            events,
            signal.subscribe(),
        );
        let dispatcher = Dispatcher::new(Arc::clone(&registry), Arc::clone(&tasks), ctx);
        Fixture {
            registry,
            tasks,
            signal,
            dispatcher,
        }
    }

    impl Fixture {
        fn rig(&self, name: &str, capacity: f64) -> Arc<Rig> {
            let rig = Rig::new(
                self.registry.allocate_id(),
                RigSpec::new(name, 10.0, capacity, 0.0),
                TICK,
                EventSink::new(16),
                StdRng::seed_from_u64(1),
            )
            .unwrap();
            self.registry.insert_rig(rig).unwrap()
        }

        fn mechanic(&self, name: &str, skill: u8) -> Arc<Mechanic> {
            let mechanic = Mechanic::new(self.registry.allocate_id(), name, skill).unwrap();
            self.registry.insert_mechanic(mechanic).unwrap()
        }

        fn loader(&self, name: &str, capacity: f64) -> Arc<Loader> {
            let loader = Loader::new(self.registry.allocate_id(), name, capacity).unwrap();
            self.registry.insert_loader(loader).unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_repair_pass_first_match_in_registry_order() {
        let f = fixture();
        let r1 = f.rig("r1", 100.0);
        let healthy = f.rig("healthy", 100.0);
        let r2 = f.rig("r2", 100.0);
        let r3 = f.rig("r3", 100.0);
        let ann = f.mechanic("Ann", 5);
        let bob = f.mechanic("Bob", 5);
        r1.ignite();
        r2.ignite();
        r3.ignite();

        assert_eq!(f.dispatcher.repair_pass(), 2);
        assert!(ann.is_busy());
        assert!(bob.is_busy());
        assert!(r1.is_under_repair());
        assert!(r2.is_under_repair());
        assert!(!r3.is_under_repair(), "only two mechanics");
        assert!(!healthy.is_under_repair());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_scans_never_double_dispatch() {
        let f = fixture();
        let r1 = f.rig("r1", 100.0);
        let r2 = f.rig("r2", 100.0);
        let ann = f.mechanic("Ann", 1);
        r1.ignite();
        r2.ignite();

        assert_eq!(f.dispatcher.repair_pass(), 1);
        for _ in 0..5 {
            assert_eq!(f.dispatcher.repair_pass(), 0);
            tokio::time::sleep(TICK).await;
        }
        assert_eq!(f.tasks.len(), 1);
        assert!(ann.is_busy());
        assert!(!r2.is_under_repair());

        // Once Ann is done with r1 she moves on to r2.
        tokio::time::sleep(SimConfig::scaled(TICK).repair_duration(1)).await;
        assert_eq!(r1.status(), RigStatus::Operational);
        assert!(!ann.is_busy());
        assert_eq!(f.dispatcher.repair_pass(), 1);
        assert!(r2.is_under_repair());
        r1.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shipment_pass_waits_for_load_phase() {
        let f = fixture();
        let rig = f.rig("r1", 100.0);
        let truck = f.loader("Truck", 200.0);
        rig.force_operational();
        rig.fill(95.0);

        assert_eq!(f.dispatcher.shipment_pass().await, 1);
        assert_eq!(rig.storage(), 0.0);
        assert_eq!(truck.current_load(), 95.0);
        assert!(truck.is_busy(), "still transporting");

        tokio::time::sleep(SimConfig::scaled(TICK).transport_time + TICK).await;
        assert!(!truck.is_busy());
        assert_eq!(truck.current_load(), 0.0);
        assert_eq!(truck.delivered(), 95.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shipment_pass_skips_busy_and_full_loaders() {
        let f = fixture();
        let rig = f.rig("r1", 100.0);
        let busy = f.loader("Busy", 200.0);
        let tiny = f.loader("Tiny", 10.0);
        let free = f.loader("Free", 200.0);
        rig.force_operational();
        rig.fill(90.0);

        let _held = busy.reserve().unwrap();
        let by_hand = ActorContext::detached(Arc::new(SimConfig::scaled(TICK)), EventSink::new(4));
        tiny.load_from(&rig, 9.5, &by_hand).await.unwrap();
        assert!(!tiny.has_room_for_shipment());
        rig.fill(10.0);

        assert_eq!(f.dispatcher.shipment_pass().await, 1);
        assert_eq!(free.current_load(), 90.5);
        assert_eq!(tiny.current_load(), 9.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_pass_drains_idle_loaded_loaders() {
        let f = fixture();
        let rig = f.rig("r1", 100.0);
        let full = f.loader("Full", 10.0);
        let empty = f.loader("Empty", 10.0);
        rig.force_operational();
        rig.fill(50.0);
        let by_hand = ActorContext::detached(Arc::new(SimConfig::scaled(TICK)), EventSink::new(4));
        full.load_from(&rig, 10.0, &by_hand).await.unwrap();
        assert!(!full.has_room_for_shipment());

        assert_eq!(f.dispatcher.transport_pass(), 1);
        assert!(full.is_busy());
        assert!(!empty.is_busy());
        assert_eq!(f.dispatcher.transport_pass(), 0, "already on its way");

        tokio::time::sleep(SimConfig::scaled(TICK).transport_time + TICK).await;
        assert!(!full.is_busy());
        assert_eq!(full.current_load(), 0.0);
        assert_eq!(full.delivered(), 10.0);
        assert!(full.has_room_for_shipment());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rigs_below_threshold_are_left_alone() {
        let f = fixture();
        let rig = f.rig("r1", 100.0);
        let truck = f.loader("Truck", 200.0);
        rig.force_operational();
        rig.fill(89.0);
        assert_eq!(f.dispatcher.shipment_pass().await, 0);
        assert!(!truck.is_busy());
        assert_eq!(rig.storage(), 89.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_repairs_and_exits_on_stop() {
        let f = fixture();
        let rig = f.rig("r1", 100.0);
        let ann = f.mechanic("Ann", 10);
        rig.ignite();

        let Fixture {
            registry: _registry,
            tasks,
            signal,
            dispatcher,
        } = f;
        let handle = tokio::spawn(dispatcher.run());

        tokio::time::sleep(TICK * 15).await;
        assert_eq!(rig.status(), RigStatus::Operational);
        assert_eq!(ann.repairs_completed(), 1);

        signal.raise();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("dispatcher should exit promptly")
            .unwrap();
        assert_eq!(tasks.shutdown(Duration::from_secs(1)).await, 0);
        rig.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_rig_is_not_scanned() {
        let f = fixture();
        let rig = f.rig("r1", 100.0);
        let ann = f.mechanic("Ann", 5);
        rig.ignite();
        f.registry.remove_rig(rig.id()).unwrap();
        assert_eq!(f.dispatcher.repair_pass(), 0);
        assert!(!ann.is_busy());
    }
}
