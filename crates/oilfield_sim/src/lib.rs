//! # oilfield_sim
//!
//! A concurrent oil field simulation. Rigs extract oil on their own
//! production loops and catch fire now and then; mechanics repair them and
//! loaders haul their oil away, matched to rigs by a periodic dispatcher.
//!
//! This crate provides:
//!
//! - [`Simulation`] — the command surface: start, stop, add and remove
//!   entities, statistics.
//! - [`Rig`], [`Mechanic`], [`Loader`] — the entities and their actors.
//! - [`FleetRegistry`] — who exists, in insertion order.
//! - [`Dispatcher`] — the control loop pairing idle resources with rigs.
//! - [`EventSink`] / [`EventStream`] — the typed event stream observers
//!   read from.
//! - [`FleetSnapshot`] — serialisable read-only statistics.

pub mod config;
pub mod context;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod event;
pub mod loader;
pub mod mechanic;
pub mod registry;
pub mod rig;
pub mod simulation;
pub mod spawn;
pub mod stats;

pub use config::SimConfig;
pub use context::{ActorContext, ActorTasks, StopSignal};
pub use dispatcher::Dispatcher;
pub use entity::{EntityAllocator, EntityId, EntityKind, EntityRef};
pub use error::{SimError, SimResult};
pub use event::{EventSink, EventStream, LogLevel, SimEvent};
pub use loader::Loader;
pub use mechanic::{Mechanic, RepairJob, RepairOutcome};
pub use registry::FleetRegistry;
pub use rig::{Rig, RigSpec, RigStatus};
pub use simulation::Simulation;
pub use stats::{FleetSnapshot, FleetTotals, LoaderSnapshot, MechanicSnapshot, RigSnapshot};
