//! Oil rig: extraction, storage, fire and repair state.
//!
//! A rig's mutable state lives behind a single lock. The production loop,
//! shipments and repairs each take that lock for one short, non-suspending
//! critical section, so storage updates from different actors never
//! interleave.
//!
//! ```text
//!            start()              fire / ignite()
//! Inactive ──────────► Operational ───────────────► Damaged
//!    ▲                   │    ▲                        │
//!    └──── stop() ───────┘    └──── repair completes ──┘
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SHIPMENT_THRESHOLD;
use crate::entity::{EntityId, EntityKind, EntityRef};
use crate::error::{self, SimError, SimResult};
use crate::event::{EventSink, SimEvent};
use crate::stats::RigSnapshot;

/// Fire severities are drawn uniformly from this range.
const SEVERITY_RANGE: std::ops::RangeInclusive<u8> = 1..=5;

/// Operational state of a rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RigStatus {
    Inactive,
    Operational,
    Damaged,
}

impl std::fmt::Display for RigStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Inactive => "inactive",
            Self::Operational => "operational",
            Self::Damaged => "damaged",
        };
        f.write_str(label)
    }
}

/// Parameters for creating a rig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigSpec {
    pub name: String,
    /// Units of oil extracted per tick.
    pub extraction_rate: f64,
    /// Maximum units of oil the rig can store.
    pub capacity: f64,
    /// Probability of catching fire on any one tick.
    pub fire_probability: f64,
}

impl RigSpec {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        extraction_rate: f64,
        capacity: f64,
        fire_probability: f64,
    ) -> Self {
        Self {
            name: name.into(),
            extraction_rate,
            capacity,
            fire_probability,
        }
    }

    fn validate(self) -> SimResult<Self> {
        let name = error::entity_name(EntityKind::Rig, self.name)?;
        let extraction_rate = error::positive("extraction rate", self.extraction_rate)?;
        let capacity = error::positive("storage capacity", self.capacity)?;
        if !(0.0..=1.0).contains(&self.fire_probability) {
            return Err(SimError::InvalidProbability(self.fire_probability));
        }
        Ok(Self {
            name,
            extraction_rate,
            capacity,
            fire_probability: self.fire_probability,
        })
    }
}

/// What the production loop should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Continue,
    Halted,
}

#[derive(Debug)]
struct RigState {
    status: RigStatus,
    on_fire: bool,
    storage: f64,
    /// Set once storage crosses the shipment threshold, cleared when it
    /// drops back below. Gates the ready-for-shipment event.
    above_threshold: bool,
    under_repair: bool,
    /// Removed from the registry; never produces again.
    retired: bool,
    production: Option<JoinHandle<()>>,
    /// Bumped whenever a production loop is started or cancelled. A loop
    /// whose epoch no longer matches exits on its next tick.
    epoch: u64,
    rng: StdRng,
    fires: u64,
    extracted: f64,
}

impl RigState {
    fn is_producing(&self) -> bool {
        self.production.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn cancel_production(&mut self) -> bool {
        self.epoch += 1;
        match self.production.take() {
            Some(handle) => {
                let was_running = !handle.is_finished();
                handle.abort();
                was_running
            }
            None => false,
        }
    }
}

/// An oil rig.
///
/// Always handled through `Arc<Rig>`: the registry owns one reference,
/// and the production loop and any in-flight repair or shipment hold
/// their own.
#[derive(Debug)]
pub struct Rig {
    id: EntityId,
    name: String,
    extraction_rate: f64,
    capacity: f64,
    fire_probability: f64,
    tick: Duration,
    events: EventSink,
    state: Mutex<RigState>,
}

impl Rig {
    /// Create an inactive, empty rig.
    ///
    /// # Errors
    ///
    /// Returns [`SimError`] if the name is empty, the rate or capacity is
    /// not positive, or the fire probability is outside `[0, 1]`.
    pub fn new(
        id: EntityId,
        spec: RigSpec,
        tick: Duration,
        events: EventSink,
        rng: StdRng,
    ) -> SimResult<Self> {
        let spec = spec.validate()?;
        Ok(Self {
            id,
            name: spec.name,
            extraction_rate: spec.extraction_rate,
            capacity: spec.capacity,
            fire_probability: spec.fire_probability,
            tick,
            events,
            state: Mutex::new(RigState {
                status: RigStatus::Inactive,
                on_fire: false,
                storage: 0.0,
                above_threshold: false,
                under_repair: false,
                retired: false,
                production: None,
                epoch: 0,
                rng,
                fires: 0,
                extracted: 0.0,
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, RigState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn id(&self) -> EntityId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.id, self.name.clone())
    }

    #[must_use]
    pub fn extraction_rate(&self) -> f64 {
        self.extraction_rate
    }

    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    #[must_use]
    pub fn fire_probability(&self) -> f64 {
        self.fire_probability
    }

    /// Storage level at which the rig is ready for shipment.
    #[must_use]
    pub fn shipment_threshold(&self) -> f64 {
        self.capacity * SHIPMENT_THRESHOLD
    }

    #[must_use]
    pub fn status(&self) -> RigStatus {
        self.state().status
    }

    #[must_use]
    pub fn is_on_fire(&self) -> bool {
        self.state().on_fire
    }

    #[must_use]
    pub fn storage(&self) -> f64 {
        self.state().storage
    }

    /// Whether a production loop is currently running.
    #[must_use]
    pub fn is_producing(&self) -> bool {
        self.state().is_producing()
    }

    #[must_use]
    pub fn is_under_repair(&self) -> bool {
        self.state().under_repair
    }

    /// On fire or damaged, and no mechanic is on it yet.
    #[must_use]
    pub fn needs_repair(&self) -> bool {
        let state = self.state();
        (state.on_fire || state.status == RigStatus::Damaged) && !state.under_repair
    }

    /// Operational with storage at or above the shipment threshold.
    #[must_use]
    pub fn is_ready_for_shipment(&self) -> bool {
        let state = self.state();
        state.status == RigStatus::Operational
            && !state.on_fire
            && state.storage >= self.shipment_threshold()
    }

    /// Start producing.
    ///
    /// No-op (returns `false`) if the rig is already producing, is damaged,
    /// or has been removed from the registry.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut state = self.state();
        if state.retired || state.status == RigStatus::Damaged {
            debug!(rig = %self.name, status = %state.status, "start ignored");
            return false;
        }
        if state.status == RigStatus::Operational && state.is_producing() {
            return false;
        }
        let from = state.status;
        state.status = RigStatus::Operational;
        self.spawn_production(&mut state);
        if from != RigStatus::Operational {
            self.emit_status(from, RigStatus::Operational);
        }
        info!(rig = %self.name, "production started");
        true
    }

    /// Cancel the production loop. Idempotent.
    ///
    /// An operational rig becomes inactive; a damaged rig stays damaged.
    /// Returns `true` if a running loop was cancelled.
    pub fn stop(&self) -> bool {
        let mut state = self.state();
        self.stop_locked(&mut state)
    }

    fn stop_locked(&self, state: &mut RigState) -> bool {
        let cancelled = state.cancel_production();
        if state.status == RigStatus::Operational {
            state.status = RigStatus::Inactive;
            self.emit_status(RigStatus::Operational, RigStatus::Inactive);
        }
        if cancelled {
            info!(rig = %self.name, "production stopped");
        }
        cancelled
    }

    /// Stop the rig for good. Called when it is removed from the registry;
    /// a repair finishing afterwards will not restart production.
    pub(crate) fn retire(&self) {
        let mut state = self.state();
        state.retired = true;
        self.stop_locked(&mut state);
    }

    /// Set the rig on fire now, whatever its state.
    ///
    /// Returns `false` if it was already burning.
    pub fn ignite(&self) -> bool {
        let mut state = self.state();
        if state.on_fire {
            return false;
        }
        let severity = state.rng.gen_range(SEVERITY_RANGE);
        self.ignite_locked(&mut state, severity);
        true
    }

    fn ignite_locked(&self, state: &mut RigState, severity: u8) {
        state.cancel_production();
        let from = state.status;
        state.on_fire = true;
        state.status = RigStatus::Damaged;
        state.fires += 1;
        warn!(rig = %self.name, severity, "fire started");
        self.events.emit(SimEvent::FireStarted {
            rig: self.entity_ref(),
            severity,
        });
        if from != RigStatus::Damaged {
            self.emit_status(from, RigStatus::Damaged);
        }
    }

    /// Put out the fire without resuming production.
    ///
    /// Returns `false` if the rig was not on fire.
    pub fn extinguish(&self) -> bool {
        let mut state = self.state();
        if !state.on_fire {
            return false;
        }
        state.on_fire = false;
        info!(rig = %self.name, "fire extinguished");
        true
    }

    /// Remove up to `amount` units of oil and return how much was removed.
    ///
    /// Returns 0 without touching storage if the rig is on fire, not
    /// operational, empty, or `amount` is not positive. This is the only
    /// way oil leaves a rig.
    pub fn request_shipment(&self, amount: f64) -> f64 {
        let mut state = self.state();
        if state.on_fire
            || state.status != RigStatus::Operational
            || !(amount > 0.0)
            || state.storage <= 0.0
        {
            return 0.0;
        }
        let shipped = amount.min(state.storage);
        state.storage = (state.storage - shipped).max(0.0);
        if state.storage < self.shipment_threshold() {
            state.above_threshold = false;
        }
        debug!(rig = %self.name, shipped, storage = state.storage, "oil shipped");
        self.events.emit(SimEvent::StorageChanged {
            rig: self.entity_ref(),
            storage: state.storage,
            capacity: self.capacity,
        });
        shipped
    }

    /// Reserve the rig for one repair.
    ///
    /// # Errors
    ///
    /// [`SimError::RigNotDamaged`] if the rig is neither on fire nor
    /// damaged; [`SimError::RigUnderRepair`] if a mechanic already holds it.
    pub(crate) fn claim_repair(self: &Arc<Self>) -> SimResult<RepairClaim> {
        let mut state = self.state();
        if !state.on_fire && state.status != RigStatus::Damaged {
            return Err(SimError::RigNotDamaged(self.name.clone()));
        }
        if state.under_repair {
            return Err(SimError::RigUnderRepair(self.name.clone()));
        }
        state.under_repair = true;
        Ok(RepairClaim {
            rig: Arc::clone(self),
        })
    }

    /// Extinguish and bring back to operational in one step, then resume
    /// production unless the rig has been removed.
    fn finish_repair(self: &Arc<Self>) {
        let mut state = self.state();
        state.on_fire = false;
        let from = state.status;
        state.status = RigStatus::Operational;
        if !state.retired {
            self.spawn_production(&mut state);
        }
        if from != RigStatus::Operational {
            self.emit_status(from, RigStatus::Operational);
        }
        info!(rig = %self.name, "repaired, production resumed");
    }

    fn spawn_production(self: &Arc<Self>, state: &mut RigState) {
        state.cancel_production();
        let epoch = state.epoch;
        let rig = Arc::clone(self);
        state.production = Some(tokio::spawn(rig.run_production(epoch)));
    }

    async fn run_production(self: Arc<Self>, epoch: u64) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; production starts one tick in.
        interval.tick().await;
        loop {
            interval.tick().await;
            if self.production_tick(epoch) == TickOutcome::Halted {
                break;
            }
        }
        debug!(rig = %self.name, epoch, "production loop ended");
    }

    /// One production step: fire check first, then extraction.
    pub(crate) fn production_tick(&self, epoch: u64) -> TickOutcome {
        let mut state = self.state();
        if state.epoch != epoch || state.status != RigStatus::Operational || state.on_fire {
            return TickOutcome::Halted;
        }

        if state.rng.gen_bool(self.fire_probability) {
            let severity = state.rng.gen_range(SEVERITY_RANGE);
            self.ignite_locked(&mut state, severity);
            return TickOutcome::Halted;
        }

        if state.storage < self.capacity {
            let before = state.storage;
            state.storage = (state.storage + self.extraction_rate).min(self.capacity);
            state.extracted += state.storage - before;
            self.events.emit(SimEvent::StorageChanged {
                rig: self.entity_ref(),
                storage: state.storage,
                capacity: self.capacity,
            });
            if !state.above_threshold && state.storage >= self.shipment_threshold() {
                state.above_threshold = true;
                info!(rig = %self.name, storage = state.storage, "ready for shipment");
                self.events.emit(SimEvent::ReadyForShipment {
                    rig: self.entity_ref(),
                    storage: state.storage,
                });
            }
        }
        TickOutcome::Continue
    }

    fn emit_status(&self, from: RigStatus, to: RigStatus) {
        self.events.emit(SimEvent::StatusChanged {
            rig: self.entity_ref(),
            from,
            to,
        });
    }

    /// Point-in-time copy of the rig's attributes.
    #[must_use]
    pub fn snapshot(&self) -> RigSnapshot {
        let state = self.state();
        RigSnapshot {
            id: self.id,
            name: self.name.clone(),
            status: state.status,
            on_fire: state.on_fire,
            storage: state.storage,
            capacity: self.capacity,
            extraction_rate: self.extraction_rate,
            fire_probability: self.fire_probability,
            producing: state.is_producing(),
            under_repair: state.under_repair,
            fires: state.fires,
            extracted: state.extracted,
        }
    }

    /// Mark the rig operational without starting a production loop, so
    /// storage only changes when a test says so.
    #[cfg(test)]
    pub(crate) fn force_operational(&self) {
        self.state().status = RigStatus::Operational;
    }

    /// Put oil straight into storage, bypassing production.
    #[cfg(test)]
    pub(crate) fn fill(&self, amount: f64) {
        let mut state = self.state();
        state.storage = (state.storage + amount).clamp(0.0, self.capacity);
        state.above_threshold = state.storage >= self.shipment_threshold();
    }
}

/// A rig's repair slot, held by the mechanic working on it.
///
/// Dropping the claim without calling [`RepairClaim::complete`] frees the
/// slot and leaves the rig damaged.
#[derive(Debug)]
pub(crate) struct RepairClaim {
    rig: Arc<Rig>,
}

impl RepairClaim {
    pub(crate) fn rig(&self) -> &Arc<Rig> {
        &self.rig
    }

    /// Restore the rig and release the slot.
    pub(crate) fn complete(self) {
        self.rig.finish_repair();
    }
}

impl Drop for RepairClaim {
    fn drop(&mut self) {
        self.rig.state().under_repair = false;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::event::EventStream;

    pub(crate) const TICK: Duration = Duration::from_millis(100);

    pub(crate) fn make_rig(
        name: &str,
        rate: f64,
        capacity: f64,
        fire_probability: f64,
    ) -> (Arc<Rig>, EventStream) {
        let sink = EventSink::new(256);
        let stream = sink.subscribe();
        let rig = Rig::new(
            EntityId(1),
            RigSpec::new(name, rate, capacity, fire_probability),
            TICK,
            sink,
            StdRng::seed_from_u64(42),
        )
        .unwrap();
        (Arc::new(rig), stream)
    }

    /// Sleep past `n` production ticks, landing half a tick after the last
    /// one. Later phases of a test sleep whole ticks to stay off the edges.
    pub(crate) async fn advance_ticks(n: u32) {
        tokio::time::sleep(TICK * n + TICK / 2).await;
    }

    #[test]
    fn test_invalid_construction_rejected() {
        let sink = EventSink::new(4);
        let rng = || StdRng::seed_from_u64(0);
        let bad = [
            RigSpec::new("", 1.0, 10.0, 0.1),
            RigSpec::new("a", 0.0, 10.0, 0.1),
            RigSpec::new("a", 1.0, -5.0, 0.1),
            RigSpec::new("a", 1.0, 10.0, -0.1),
            RigSpec::new("a", 1.0, 10.0, 1.5),
            RigSpec::new("a", 1.0, 10.0, f64::NAN),
        ];
        for rig_spec in bad {
            assert!(
                Rig::new(EntityId(1), rig_spec.clone(), TICK, sink.clone(), rng()).is_err(),
                "{rig_spec:?}"
            );
        }
    }

    #[test]
    fn test_new_rig_is_inactive_and_empty() {
        let (rig, _) = make_rig("Rig-1", 10.0, 100.0, 0.0);
        assert_eq!(rig.status(), RigStatus::Inactive);
        assert!(!rig.is_on_fire());
        assert_eq!(rig.storage(), 0.0);
        assert!(!rig.is_producing());
        assert!((rig.shipment_threshold() - 90.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let (rig, mut events) = make_rig("Rig-1", 10.0, 100.0, 0.0);
        assert!(rig.start());
        assert!(!rig.start());
        assert_eq!(rig.status(), RigStatus::Operational);
        assert!(rig.is_producing());
        let status_changes = events
            .drain()
            .into_iter()
            .filter(|e| matches!(e, SimEvent::StatusChanged { .. }))
            .count();
        assert_eq!(status_changes, 1);
        rig.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fills_to_capacity_with_single_ready_event() {
        let (rig, mut events) = make_rig("Rig-1", 10.0, 100.0, 0.0);
        rig.start();
        advance_ticks(10).await;
        assert_eq!(rig.storage(), 100.0);

        // Full storage: further ticks neither overflow nor re-announce.
        tokio::time::sleep(TICK * 5).await;
        assert_eq!(rig.storage(), 100.0);

        let events = events.drain();
        let ready: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                SimEvent::ReadyForShipment { storage, .. } => Some(*storage),
                _ => None,
            })
            .collect();
        assert_eq!(ready, vec![90.0]);
        let storage_changes = events
            .iter()
            .filter(|e| matches!(e, SimEvent::StorageChanged { .. }))
            .count();
        assert_eq!(storage_changes, 10);
        rig.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_extraction_clamps_to_capacity() {
        let (rig, _) = make_rig("Rig-1", 30.0, 100.0, 0.0);
        rig.start();
        advance_ticks(4).await;
        assert_eq!(rig.storage(), 100.0);
        assert_eq!(rig.snapshot().extracted, 100.0);
        rig.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_certain_fire_halts_production() {
        let (rig, mut events) = make_rig("Rig-1", 10.0, 100.0, 1.0);
        rig.start();
        advance_ticks(3).await;
        assert!(rig.is_on_fire());
        assert_eq!(rig.status(), RigStatus::Damaged);
        assert!(!rig.is_producing());
        assert_eq!(rig.storage(), 0.0, "fire check precedes extraction");

        let events = events.drain();
        let fires: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                SimEvent::FireStarted { severity, .. } => Some(*severity),
                _ => None,
            })
            .collect();
        assert_eq!(fires.len(), 1);
        assert!(SEVERITY_RANGE.contains(&fires[0]));
        assert_eq!(rig.snapshot().fires, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_on_damaged_rig_is_ignored() {
        let (rig, _) = make_rig("Rig-1", 10.0, 100.0, 0.0);
        assert!(rig.ignite());
        assert!(!rig.ignite());
        assert!(!rig.start());
        assert_eq!(rig.status(), RigStatus::Damaged);
        assert!(!rig.is_producing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_keeps_damaged_rig_damaged() {
        let (rig, _) = make_rig("Rig-1", 10.0, 100.0, 0.0);
        rig.start();
        assert!(rig.stop());
        assert!(!rig.stop());
        assert_eq!(rig.status(), RigStatus::Inactive);

        rig.start();
        rig.ignite();
        rig.stop();
        assert_eq!(rig.status(), RigStatus::Damaged);
        assert!(rig.is_on_fire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_rig_does_not_produce() {
        let (rig, _) = make_rig("Rig-1", 10.0, 100.0, 0.0);
        rig.start();
        advance_ticks(2).await;
        rig.stop();
        let level = rig.storage();
        advance_ticks(5).await;
        assert_eq!(rig.storage(), level);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_shipment_bounds() {
        let (rig, _) = make_rig("Rig-1", 10.0, 100.0, 0.0);
        rig.fill(30.0);

        // Inactive rigs do not ship.
        assert_eq!(rig.request_shipment(10.0), 0.0);

        rig.start();
        assert_eq!(rig.request_shipment(0.0), 0.0);
        assert_eq!(rig.request_shipment(-5.0), 0.0);
        assert_eq!(rig.request_shipment(f64::NAN), 0.0);
        assert_eq!(rig.storage(), 30.0);

        assert_eq!(rig.request_shipment(10.0), 10.0);
        assert_eq!(rig.request_shipment(80.0), 20.0);
        assert_eq!(rig.storage(), 0.0);
        assert_eq!(rig.request_shipment(5.0), 0.0);
        rig.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_shipment_while_on_fire() {
        let (rig, _) = make_rig("Rig-1", 10.0, 100.0, 0.0);
        rig.start();
        rig.fill(50.0);
        rig.ignite();
        assert_eq!(rig.request_shipment(10.0), 0.0);
        assert_eq!(rig.storage(), 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_event_rearms_after_shipment() {
        let (rig, mut events) = make_rig("Rig-1", 10.0, 100.0, 0.0);
        rig.start();
        advance_ticks(9).await;
        assert_eq!(rig.storage(), 90.0);
        rig.request_shipment(50.0);
        tokio::time::sleep(TICK * 5).await;
        assert_eq!(rig.storage(), 90.0);

        let ready = events
            .drain()
            .into_iter()
            .filter(|e| matches!(e, SimEvent::ReadyForShipment { .. }))
            .count();
        assert_eq!(ready, 2);
        rig.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_extinguish_only_clears_fire() {
        let (rig, _) = make_rig("Rig-1", 10.0, 100.0, 0.0);
        assert!(!rig.extinguish());
        rig.ignite();
        assert!(rig.extinguish());
        assert!(!rig.is_on_fire());
        assert_eq!(rig.status(), RigStatus::Damaged);
        assert!(!rig.is_producing());
        assert!(rig.needs_repair());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repair_claim_is_exclusive() {
        let (rig, _) = make_rig("Rig-1", 10.0, 100.0, 0.0);
        assert_eq!(
            rig.claim_repair().unwrap_err(),
            SimError::RigNotDamaged("Rig-1".into())
        );

        rig.ignite();
        let claim = rig.claim_repair().unwrap();
        assert!(!rig.needs_repair());
        assert_eq!(
            rig.claim_repair().unwrap_err(),
            SimError::RigUnderRepair("Rig-1".into())
        );
        drop(claim);
        assert!(rig.needs_repair());
        assert_eq!(rig.status(), RigStatus::Damaged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_repair_restores_and_resumes() {
        let (rig, _) = make_rig("Rig-1", 10.0, 100.0, 0.0);
        rig.ignite();
        rig.claim_repair().unwrap().complete();
        assert!(!rig.is_on_fire());
        assert_eq!(rig.status(), RigStatus::Operational);
        assert!(!rig.is_under_repair());
        assert!(rig.is_producing());
        advance_ticks(2).await;
        assert_eq!(rig.storage(), 20.0);
        rig.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retired_rig_does_not_restart() {
        let (rig, _) = make_rig("Rig-1", 10.0, 100.0, 0.0);
        rig.start();
        rig.ignite();
        let claim = rig.claim_repair().unwrap();
        rig.retire();
        claim.complete();
        assert_eq!(rig.status(), RigStatus::Operational);
        assert!(!rig.is_producing());
        assert!(!rig.start());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_retire_racing_repair_never_leaves_a_loop() {
        for _ in 0..200 {
            let (rig, _) = make_rig("Rig-1", 10.0, 100.0, 0.0);
            rig.start();
            rig.ignite();
            let claim = rig.claim_repair().unwrap();
            let barrier = Arc::new(std::sync::Barrier::new(2));
            let repair = std::thread::spawn({
                let barrier = Arc::clone(&barrier);
                let handle = tokio::runtime::Handle::current();
                move || {
                    let _guard = handle.enter();
                    barrier.wait();
                    claim.complete();
                }
            });
            barrier.wait();
            rig.retire();
            repair.join().unwrap();
            assert!(!rig.is_producing());
            assert!(!rig.start());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_shipments_conserve_oil() {
        let rig = Arc::new(
            Rig::new(
                EntityId(1),
                RigSpec::new("Rig-1", 7.0, 100.0, 0.0),
                Duration::from_millis(1),
                EventSink::new(16),
                StdRng::seed_from_u64(5),
            )
            .unwrap(),
        );
        rig.start();

        let haulers: Vec<_> = (0..4)
            .map(|i| {
                let rig = Arc::clone(&rig);
                tokio::spawn(async move {
                    let started = std::time::Instant::now();
                    let mut shipped = 0.0;
                    while started.elapsed() < Duration::from_millis(150) {
                        shipped += rig.request_shipment(2.0 + f64::from(i));
                        let level = rig.storage();
                        assert!((0.0..=rig.capacity()).contains(&level), "storage {level}");
                        tokio::task::yield_now().await;
                    }
                    shipped
                })
            })
            .collect();

        let mut shipped = 0.0;
        for hauler in haulers {
            shipped += hauler.await.unwrap();
        }
        rig.stop();

        let snapshot = rig.snapshot();
        assert!(snapshot.extracted > 0.0);
        assert!(
            (snapshot.extracted - (snapshot.storage + shipped)).abs() < 1e-6,
            "extracted {} != storage {} + shipped {shipped}",
            snapshot.extracted,
            snapshot.storage
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_loop_exits_on_epoch_change() {
        let (rig, _) = make_rig("Rig-1", 10.0, 100.0, 0.0);
        rig.start();
        let stale = rig.state().epoch;
        rig.stop();
        rig.start();
        assert_eq!(rig.production_tick(stale), TickOutcome::Halted);
        rig.stop();
    }
}
