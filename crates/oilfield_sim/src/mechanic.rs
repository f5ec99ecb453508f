//! Mechanics repair damaged rigs.
//!
//! A mechanic's busy flag is claimed with a compare-and-swap and released by
//! dropping a [`MechanicLease`], so it is cleared on every exit path of a
//! repair: completion, cancellation, or the task being torn down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{MAX_SKILL, MIN_SKILL};
use crate::context::ActorContext;
use crate::entity::{EntityId, EntityKind, EntityRef};
use crate::error::{self, SimError, SimResult};
use crate::event::SimEvent;
use crate::rig::{RepairClaim, Rig};
use crate::stats::MechanicSnapshot;

/// How a repair task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcome {
    /// The fire is out and the rig is operational again.
    Completed,
    /// The simulation stopped first; the rig is still damaged.
    Cancelled,
}

/// A mechanic.
#[derive(Debug)]
pub struct Mechanic {
    id: EntityId,
    name: String,
    skill: u8,
    busy: AtomicBool,
    repairs_completed: AtomicU64,
}

impl Mechanic {
    /// Create an idle mechanic.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidSkill`] if `skill` is outside
    /// [`MIN_SKILL`]..=[`MAX_SKILL`], [`SimError::EmptyName`] for a blank name.
    pub fn new(id: EntityId, name: impl Into<String>, skill: u8) -> SimResult<Self> {
        let name = error::entity_name(EntityKind::Mechanic, name)?;
        if !(MIN_SKILL..=MAX_SKILL).contains(&skill) {
            return Err(SimError::InvalidSkill {
                skill,
                min: MIN_SKILL,
                max: MAX_SKILL,
            });
        }
        Ok(Self {
            id,
            name,
            skill,
            busy: AtomicBool::new(false),
            repairs_completed: AtomicU64::new(0),
        })
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
    pub fn skill(&self) -> u8 {
        self.skill
    }

    #[must_use]
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.id, self.name.clone())
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn repairs_completed(&self) -> u64 {
        self.repairs_completed.load(Ordering::Relaxed)
    }

    /// Atomically flip idle to busy.
    fn reserve(self: &Arc<Self>) -> SimResult<MechanicLease> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SimError::MechanicBusy(self.name.clone()))?;
        Ok(MechanicLease {
            mechanic: Arc::clone(self),
        })
    }

    /// Reserve this mechanic and the rig's repair slot together.
    ///
    /// Both are held until the returned job finishes or is dropped. Nothing
    /// is reserved if either check fails.
    ///
    /// # Errors
    ///
    /// [`SimError::MechanicBusy`], [`SimError::RigNotDamaged`] or
    /// [`SimError::RigUnderRepair`].
    pub fn assign(self: &Arc<Self>, rig: &Arc<Rig>) -> SimResult<RepairJob> {
        let lease = self.reserve()?;
        let claim = rig.claim_repair()?;
        Ok(RepairJob { lease, claim })
    }

    /// Repair `rig` and wait for the outcome.
    ///
    /// # Errors
    ///
    /// Same as [`Mechanic::assign`]; the repair itself cannot fail.
    pub async fn repair(self: &Arc<Self>, rig: &Arc<Rig>, ctx: &ActorContext) -> SimResult<RepairOutcome> {
        Ok(self.assign(rig)?.run(ctx).await)
    }

    #[must_use]
    pub fn snapshot(&self) -> MechanicSnapshot {
        MechanicSnapshot {
            id: self.id,
            name: self.name.clone(),
            skill: self.skill,
            busy: self.is_busy(),
            repairs_completed: self.repairs_completed(),
        }
    }
}

/// Proof that a mechanic is busy. Dropping it makes the mechanic idle.
#[derive(Debug)]
struct MechanicLease {
    mechanic: Arc<Mechanic>,
}

impl Drop for MechanicLease {
    fn drop(&mut self) {
        self.mechanic.busy.store(false, Ordering::Release);
    }
}

/// A reserved repair: one busy mechanic and one claimed rig.
#[derive(Debug)]
pub struct RepairJob {
    lease: MechanicLease,
    claim: RepairClaim,
}

impl RepairJob {
    #[must_use]
    pub fn mechanic(&self) -> &Arc<Mechanic> {
        &self.lease.mechanic
    }

    #[must_use]
    pub fn rig(&self) -> &Arc<Rig> {
        self.claim.rig()
    }

    /// Work on the rig for the mechanic's repair time, then restore it.
    ///
    /// If the stop signal arrives first the rig is left damaged. Either way
    /// the mechanic is idle again by the time the ended event is emitted.
    pub async fn run(self, ctx: &ActorContext) -> RepairOutcome {
        let Self { lease, claim } = self;
        let mechanic = lease.mechanic.entity_ref();
        let rig = claim.rig().entity_ref();
        let duration = ctx.config.repair_duration(lease.mechanic.skill);

        info!(mechanic = %mechanic.name, rig = %rig.name, ?duration, "repair started");
        ctx.events.emit(SimEvent::RepairStarted {
            mechanic: mechanic.clone(),
            rig: rig.clone(),
        });

        let outcome = if ctx.sleep(duration).await {
            claim.complete();
            lease.mechanic.repairs_completed.fetch_add(1, Ordering::Relaxed);
            RepairOutcome::Completed
        } else {
            drop(claim);
            RepairOutcome::Cancelled
        };
        drop(lease);

        info!(mechanic = %mechanic.name, rig = %rig.name, ?outcome, "repair ended");
        ctx.events.emit(SimEvent::RepairCompleted {
            mechanic,
            rig,
            outcome,
        });
        outcome
    }
}
