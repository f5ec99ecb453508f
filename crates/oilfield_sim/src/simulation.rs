//! The simulation engine's command surface.
//!
//! [`Simulation`] owns the registry, the event stream and the dispatcher.
//! Everything a presentation layer needs goes through it: start and stop,
//! adding and removing entities, read-only listings and statistics.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::SimConfig;
use crate::context::{ActorContext, ActorTasks, StopSignal};
use crate::dispatcher::Dispatcher;
use crate::entity::EntityId;
use crate::error::{SimError, SimResult};
use crate::event::{EventSink, EventStream, SimEvent};
use crate::loader::Loader;
use crate::mechanic::Mechanic;
use crate::registry::FleetRegistry;
use crate::rig::{Rig, RigSpec};
use crate::spawn::Spawner;
use crate::stats::FleetSnapshot;

/// Handles that exist only while the simulation runs. Each run gets its
/// own task set, so winding one run down never touches the next.
#[derive(Debug)]
struct Running {
    stop: StopSignal,
    dispatcher: JoinHandle<()>,
    tasks: Arc<ActorTasks>,
}

/// An oil field simulation.
///
/// Entities can be added and removed whether or not the simulation is
/// running. Starting and adding rigs spawn tokio tasks, so both must be
/// called from within a runtime.
#[derive(Debug)]
pub struct Simulation {
    config: Arc<SimConfig>,
    registry: Arc<FleetRegistry>,
    events: EventSink,
    spawner: Mutex<Spawner>,
    running: Mutex<Option<Running>>,
}

impl Simulation {
    #[must_use]
    pub fn new(config: SimConfig) -> Self {
        let events = EventSink::new(config.event_capacity);
        Self {
            spawner: Mutex::new(Spawner::from_seed(config.seed)),
            config: Arc::new(config),
            registry: Arc::new(FleetRegistry::new()),
            events,
            running: Mutex::new(None),
        }
    }

    fn running(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawner(&self) -> MutexGuard<'_, Spawner> {
        self.spawner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &FleetRegistry {
        &self.registry
    }

    /// Open a reader on the event stream. Drop it to stop observing.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running().is_some()
    }

    /// Start every rig and the dispatcher.
    ///
    /// Returns `false` if the simulation was already running.
    pub fn start(&self) -> bool {
        let mut running = self.running();
        if running.is_some() {
            return false;
        }

        let stop = StopSignal::new();
        let tasks = Arc::new(ActorTasks::new(self.events.clone()));
        let ctx = ActorContext::new(Arc::clone(&self.config), self.events.clone(), stop.subscribe());
        for rig in self.registry.rigs().list() {
            rig.start();
        }
        let dispatcher = Dispatcher::new(Arc::clone(&self.registry), Arc::clone(&tasks), ctx);
        *running = Some(Running {
            stop,
            dispatcher: tokio::spawn(dispatcher.run()),
            tasks,
        });

        info!(entities = self.registry.entity_count(), "simulation started");
        self.events.emit(SimEvent::SimulationStarted);
        true
    }

    /// Stop the dispatcher and every rig, and wait for in-flight repairs
    /// and shipments to wind down.
    ///
    /// Tasks observe the stop signal at their next suspension point; any
    /// still running after `shutdown_grace` are aborted. Returns `false` if
    /// the simulation was not running.
    ///
    /// A `start` issued while this is winding down begins a new run, which
    /// this call leaves alone.
    pub async fn stop(&self) -> bool {
        let Some(Running {
            stop: _signal,
            dispatcher,
            tasks,
        }) = self.take_running()
        else {
            return false;
        };

        let grace = self.config.shutdown_grace;
        let dispatcher_abort = dispatcher.abort_handle();
        match tokio::time::timeout(grace, dispatcher).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.is_panic() => {
                self.events.warn(format!("dispatcher failed: {err}"));
            }
            Ok(Err(_)) => {}
            Err(_) => {
                warn!(?grace, "dispatcher did not stop in time, aborting");
                dispatcher_abort.abort();
            }
        }

        let aborted = tasks.shutdown(grace).await;
        if aborted > 0 {
            self.events
                .warn(format!("{aborted} actor tasks aborted after {grace:?}"));
        }
        // A repair that finished just before the signal may have restarted
        // its rig after the first pass.
        let running = self.running();
        if running.is_none() {
            self.stop_rigs();
        }
        drop(running);

        info!("simulation stopped");
        self.events.emit(SimEvent::SimulationStopped);
        true
    }

    /// Empty the running slot and stop every rig while still holding its
    /// lock, so no `start` or `add_rig` can slip in between.
    fn take_running(&self) -> Option<Running> {
        let mut slot = self.running();
        let running = slot.take()?;
        running.stop.raise();
        self.stop_rigs();
        Some(running)
    }

    fn stop_rigs(&self) {
        for rig in self.registry.rigs().list() {
            rig.stop();
        }
    }

    /// Add an inactive rig, started at once if the simulation is running.
    ///
    /// # Errors
    ///
    /// [`SimError`] for invalid parameters or a name already in use.
    pub fn add_rig(
        &self,
        name: impl Into<String>,
        extraction_rate: f64,
        capacity: f64,
        fire_probability: f64,
    ) -> SimResult<EntityId> {
        let spec = RigSpec::new(name, extraction_rate, capacity, fire_probability);
        self.add_rig_spec(spec)
    }

    /// Add a rig from a prepared [`RigSpec`].
    ///
    /// # Errors
    ///
    /// Same as [`Simulation::add_rig`].
    pub fn add_rig_spec(&self, spec: RigSpec) -> SimResult<EntityId> {
        let rng = self.spawner().fork_rng();
        let rig = Rig::new(
            self.registry.allocate_id(),
            spec,
            self.config.tick,
            self.events.clone(),
            rng,
        )?;
        let rig = self.registry.insert_rig(rig)?;
        self.events.info(format!(
            "rig {} added (rate {:.1}, capacity {:.1}, fire p={:.4})",
            rig.name(),
            rig.extraction_rate(),
            rig.capacity(),
            rig.fire_probability()
        ));
        // Checked under the lock so a concurrent stop cannot miss this rig.
        if self.running().is_some() {
            rig.start();
        }
        Ok(rig.id())
    }

    /// Add an idle mechanic.
    ///
    /// # Errors
    ///
    /// [`SimError`] for a skill outside 1..=10 or a name already in use.
    pub fn add_mechanic(&self, name: impl Into<String>, skill: u8) -> SimResult<EntityId> {
        let mechanic = Mechanic::new(self.registry.allocate_id(), name, skill)?;
        let mechanic = self.registry.insert_mechanic(mechanic)?;
        self.events.info(format!(
            "mechanic {} added (skill {})",
            mechanic.name(),
            mechanic.skill()
        ));
        Ok(mechanic.id())
    }

    /// Add an idle, empty loader.
    ///
    /// # Errors
    ///
    /// [`SimError`] for a non-positive capacity or a name already in use.
    pub fn add_loader(&self, name: impl Into<String>, capacity: f64) -> SimResult<EntityId> {
        let loader = Loader::new(self.registry.allocate_id(), name, capacity)?;
        let loader = self.registry.insert_loader(loader)?;
        self.events.info(format!(
            "loader {} added (capacity {:.1})",
            loader.name(),
            loader.capacity()
        ));
        Ok(loader.id())
    }

    /// Add a rig with a generated name and random parameters.
    ///
    /// # Errors
    ///
    /// Never in practice; generated parameters are always valid.
    pub fn add_random_rig(&self) -> SimResult<EntityId> {
        loop {
            let spec = self.spawner().rig_spec();
            match self.add_rig_spec(spec) {
                // A user took the generated name; draw the next one.
                Err(SimError::DuplicateName { .. }) => continue,
                result => return result,
            }
        }
    }

    /// Add a mechanic with a generated name and random skill.
    ///
    /// # Errors
    ///
    /// Never in practice; generated parameters are always valid.
    pub fn add_random_mechanic(&self) -> SimResult<EntityId> {
        loop {
            let (name, skill) = self.spawner().mechanic();
            match self.add_mechanic(name, skill) {
                Err(SimError::DuplicateName { .. }) => continue,
                result => return result,
            }
        }
    }

    /// Add a loader with a generated name and random capacity.
    ///
    /// # Errors
    ///
    /// Never in practice; generated parameters are always valid.
    pub fn add_random_loader(&self) -> SimResult<EntityId> {
        loop {
            let (name, capacity) = self.spawner().loader();
            match self.add_loader(name, capacity) {
                Err(SimError::DuplicateName { .. }) => continue,
                result => return result,
            }
        }
    }

    /// Remove a rig and cancel its production loop. An in-flight repair or
    /// shipment on it finishes against the removed rig.
    ///
    /// # Errors
    ///
    /// [`SimError::UnknownEntity`] if no rig has this ID.
    pub fn remove_rig(&self, id: EntityId) -> SimResult<()> {
        let rig = self.registry.remove_rig(id)?;
        self.events.info(format!("rig {} removed", rig.name()));
        Ok(())
    }

    /// Remove a mechanic. A repair in progress runs to its end.
    ///
    /// # Errors
    ///
    /// [`SimError::UnknownEntity`] if no mechanic has this ID.
    pub fn remove_mechanic(&self, id: EntityId) -> SimResult<()> {
        let mechanic = self.registry.remove_mechanic(id)?;
        self.events
            .info(format!("mechanic {} removed", mechanic.name()));
        Ok(())
    }

    /// Remove a loader. A shipment in progress runs to its end.
    ///
    /// # Errors
    ///
    /// [`SimError::UnknownEntity`] if no loader has this ID.
    pub fn remove_loader(&self, id: EntityId) -> SimResult<()> {
        let loader = self.registry.remove_loader(id)?;
        self.events.info(format!("loader {} removed", loader.name()));
        Ok(())
    }

    #[must_use]
    pub fn rig(&self, id: EntityId) -> Option<Arc<Rig>> {
        self.registry.rigs().get(id)
    }

    #[must_use]
    pub fn mechanic(&self, id: EntityId) -> Option<Arc<Mechanic>> {
        self.registry.mechanics().get(id)
    }

    #[must_use]
    pub fn loader(&self, id: EntityId) -> Option<Arc<Loader>> {
        self.registry.loaders().get(id)
    }

    /// Every rig, in registry order.
    #[must_use]
    pub fn rigs(&self) -> Vec<Arc<Rig>> {
        self.registry.rigs().list()
    }

    #[must_use]
    pub fn mechanics(&self) -> Vec<Arc<Mechanic>> {
        self.registry.mechanics().list()
    }

    #[must_use]
    pub fn loaders(&self) -> Vec<Arc<Loader>> {
        self.registry.loaders().list()
    }

    /// Point-in-time statistics for the whole fleet.
    #[must_use]
    pub fn statistics(&self) -> FleetSnapshot {
        self.registry.snapshot(self.is_running())
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        if let Some(running) = self.take_running() {
            running.dispatcher.abort();
        }
    }
}
