//! Loaders haul oil away from rigs in two phases: load, then transport.
//!
//! Oil only ever leaves a rig through [`Rig::request_shipment`], which is
//! where loaders and the rig's own production synchronise. Loaders never
//! talk to mechanics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::config::SHIPMENT_THRESHOLD;
use crate::context::ActorContext;
use crate::entity::{EntityId, EntityKind, EntityRef};
use crate::error::{self, SimError, SimResult};
use crate::event::SimEvent;
use crate::rig::Rig;
use crate::stats::LoaderSnapshot;

#[derive(Debug, Default)]
struct Cargo {
    load: f64,
    delivered: f64,
    trips: u64,
}

/// A loader.
#[derive(Debug)]
pub struct Loader {
    id: EntityId,
    name: String,
    capacity: f64,
    busy: AtomicBool,
    cargo: Mutex<Cargo>,
}

impl Loader {
    /// Create an idle, empty loader.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidQuantity`] if `capacity` is not positive,
    /// [`SimError::EmptyName`] for a blank name.
    pub fn new(id: EntityId, name: impl Into<String>, capacity: f64) -> SimResult<Self> {
        Ok(Self {
            id,
            name: error::entity_name(EntityKind::Loader, name)?,
            capacity: error::positive("loader capacity", capacity)?,
            busy: AtomicBool::new(false),
            cargo: Mutex::new(Cargo::default()),
        })
    }

    fn cargo(&self) -> MutexGuard<'_, Cargo> {
        self.cargo.lock().unwrap_or_else(PoisonError::into_inner)
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
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    #[must_use]
    pub fn current_load(&self) -> f64 {
        self.cargo().load
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Total oil delivered over the loader's lifetime.
    #[must_use]
    pub fn delivered(&self) -> f64 {
        self.cargo().delivered
    }

    /// Whether the dispatcher may send this loader to a rig: its load is
    /// below the shipment threshold of its own capacity.
    #[must_use]
    pub fn has_room_for_shipment(&self) -> bool {
        self.current_load() < self.capacity * SHIPMENT_THRESHOLD
    }

    /// Atomically flip idle to busy.
    pub(crate) fn reserve(self: &Arc<Self>) -> SimResult<LoaderLease> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SimError::LoaderBusy(self.name.clone()))?;
        Ok(LoaderLease {
            loader: Arc::clone(self),
        })
    }

    /// Take up to `amount` units from `rig` and return how much was loaded.
    ///
    /// A non-positive `amount` or a full loader is a no-op returning 0.
    ///
    /// # Errors
    ///
    /// [`SimError::LoaderBusy`] if the loader is mid-load or mid-transport.
    pub async fn load_from(self: &Arc<Self>, rig: &Rig, amount: f64, ctx: &ActorContext) -> SimResult<f64> {
        if !(amount > 0.0) || self.current_load() >= self.capacity {
            return Ok(0.0);
        }
        let lease = self.reserve()?;
        Ok(lease.load_from(rig, amount, ctx).await)
    }

    /// Drive the current load away and return how much was delivered.
    ///
    /// An empty loader is a no-op returning 0. A stop signal shortens the
    /// trip but the load is still delivered, so an idle loader coming back
    /// from transport is always empty.
    ///
    /// # Errors
    ///
    /// [`SimError::LoaderBusy`] if the loader is mid-load or mid-transport.
    pub async fn transport(self: &Arc<Self>, ctx: &ActorContext) -> SimResult<f64> {
        if self.current_load() <= 0.0 {
            return Ok(0.0);
        }
        let lease = self.reserve()?;
        Ok(lease.transport(ctx).await)
    }

    #[must_use]
    pub fn snapshot(&self) -> LoaderSnapshot {
        let cargo = self.cargo();
        LoaderSnapshot {
            id: self.id,
            name: self.name.clone(),
            capacity: self.capacity,
            load: cargo.load,
            busy: self.is_busy(),
            delivered: cargo.delivered,
            trips: cargo.trips,
        }
    }
}

/// Proof that a loader is busy. Dropping it makes the loader idle.
///
/// The dispatcher holds one lease across both phases of a shipment so no
/// other scan can grab the loader between loading and transport.
#[derive(Debug)]
pub(crate) struct LoaderLease {
    loader: Arc<Loader>,
}

impl LoaderLease {
    pub(crate) fn loader(&self) -> &Arc<Loader> {
        &self.loader
    }

    pub(crate) async fn load_from(&self, rig: &Rig, amount: f64, ctx: &ActorContext) -> f64 {
        let loader = &self.loader;
        let headroom = loader.capacity - loader.current_load();
        if !(amount > 0.0) || headroom <= 0.0 {
            return 0.0;
        }

        let moved = rig.request_shipment(amount.min(headroom));
        debug!(loader = %loader.name, rig = %rig.name(), requested = amount, moved, "loading");
        let completed = ctx.sleep(ctx.config.loading_duration(moved)).await;

        // Oil already left the rig; credit it even if we were interrupted.
        loader.cargo().load += moved;

        if completed {
            info!(loader = %loader.name, rig = %rig.name(), amount = moved, "loading completed");
            ctx.events.emit(SimEvent::LoadingCompleted {
                loader: loader.entity_ref(),
                rig: rig.entity_ref(),
                amount: moved,
            });
        } else {
            ctx.events.warn(format!(
                "loader {} interrupted while loading {moved:.1} units from {}",
                loader.name,
                rig.name()
            ));
        }
        moved
    }

    pub(crate) async fn transport(&self, ctx: &ActorContext) -> f64 {
        let loader = &self.loader;
        let cargo = loader.current_load();
        if cargo <= 0.0 {
            return 0.0;
        }
        if !ctx.sleep(ctx.config.transport_time).await {
            // The trip is never abandoned halfway; the cargo arrives early.
            ctx.events.warn(format!(
                "loader {} cut its trip short, delivering {cargo:.1} units",
                loader.name
            ));
        }
        {
            let mut state = loader.cargo();
            state.load = 0.0;
            state.delivered += cargo;
            state.trips += 1;
        }
        info!(loader = %loader.name, amount = cargo, "transport completed");
        ctx.events.emit(SimEvent::TransportCompleted {
            loader: loader.entity_ref(),
            amount: cargo,
        });
        cargo
    }
}

impl Drop for LoaderLease {
    fn drop(&mut self) {
        self.loader.busy.store(false, Ordering::Release);
    }
}
