//! Read-only snapshots of the fleet for observers.
//!
//! Snapshots are copied out of the live entities, so holding one never
//! blocks the simulation. [`FleetSnapshot`] renders the textual statistics
//! report through `Display`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::rig::RigStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigSnapshot {
    pub id: EntityId,
    pub name: String,
    pub status: RigStatus,
    pub on_fire: bool,
    pub storage: f64,
    pub capacity: f64,
    pub extraction_rate: f64,
    pub fire_probability: f64,
    pub producing: bool,
    pub under_repair: bool,
    /// Fires since creation.
    pub fires: u64,
    /// Oil extracted since creation.
    pub extracted: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanicSnapshot {
    pub id: EntityId,
    pub name: String,
    pub skill: u8,
    pub busy: bool,
    pub repairs_completed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderSnapshot {
    pub id: EntityId,
    pub name: String,
    pub capacity: f64,
    pub load: f64,
    pub busy: bool,
    /// Oil delivered since creation.
    pub delivered: f64,
    pub trips: u64,
}

/// Aggregate counters derived from a [`FleetSnapshot`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetTotals {
    pub operational_rigs: usize,
    pub burning_rigs: usize,
    pub stored: f64,
    pub extracted: f64,
    pub delivered: f64,
    pub in_transit: f64,
    pub fires: u64,
    pub repairs: u64,
    pub busy_mechanics: usize,
    pub busy_loaders: usize,
}

/// Every entity in the registry, in registry order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub running: bool,
    pub rigs: Vec<RigSnapshot>,
    pub mechanics: Vec<MechanicSnapshot>,
    pub loaders: Vec<LoaderSnapshot>,
}

impl FleetSnapshot {
    #[must_use]
    pub fn totals(&self) -> FleetTotals {
        FleetTotals {
            operational_rigs: self
                .rigs
                .iter()
                .filter(|r| r.status == RigStatus::Operational)
                .count(),
            burning_rigs: self.rigs.iter().filter(|r| r.on_fire).count(),
            stored: self.rigs.iter().map(|r| r.storage).sum(),
            extracted: self.rigs.iter().map(|r| r.extracted).sum(),
            delivered: self.loaders.iter().map(|l| l.delivered).sum(),
            in_transit: self.loaders.iter().map(|l| l.load).sum(),
            fires: self.rigs.iter().map(|r| r.fires).sum(),
            repairs: self.mechanics.iter().map(|m| m.repairs_completed).sum(),
            busy_mechanics: self.mechanics.iter().filter(|m| m.busy).count(),
            busy_loaders: self.loaders.iter().filter(|l| l.busy).count(),
        }
    }
}

fn busy_label(busy: bool) -> &'static str {
    if busy { "busy" } else { "idle" }
}

impl fmt::Display for FleetSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let totals = self.totals();
        writeln!(
            f,
            "Simulation statistics ({})",
            if self.running { "running" } else { "stopped" }
        )?;

        writeln!(f, "Rigs ({}):", self.rigs.len())?;
        for rig in &self.rigs {
            writeln!(
                f,
                "  - {} {}: {}{}, storage {:.1}/{:.1}, rate {:.1}/tick, fire p={:.4}, fires {}, extracted {:.1}",
                rig.name,
                rig.id,
                rig.status,
                if rig.on_fire { " (on fire)" } else { "" },
                rig.storage,
                rig.capacity,
                rig.extraction_rate,
                rig.fire_probability,
                rig.fires,
                rig.extracted,
            )?;
        }

        writeln!(f, "Mechanics ({}):", self.mechanics.len())?;
        for m in &self.mechanics {
            writeln!(
                f,
                "  - {} {}: skill {}, {}, repairs {}",
                m.name,
                m.id,
                m.skill,
                busy_label(m.busy),
                m.repairs_completed,
            )?;
        }

        writeln!(f, "Loaders ({}):", self.loaders.len())?;
        for l in &self.loaders {
            writeln!(
                f,
                "  - {} {}: load {:.1}/{:.1}, {}, delivered {:.1} in {} trips",
                l.name,
                l.id,
                l.load,
                l.capacity,
                busy_label(l.busy),
                l.delivered,
                l.trips,
            )?;
        }

        writeln!(
            f,
            "Totals: {} operational, {} burning, stored {:.1}, extracted {:.1}, in transit {:.1}, delivered {:.1}, fires {}, repairs {}",
            totals.operational_rigs,
            totals.burning_rigs,
            totals.stored,
            totals.extracted,
            totals.in_transit,
            totals.delivered,
            totals.fires,
            totals.repairs,
        )
    }
}
