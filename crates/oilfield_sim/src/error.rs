//! Simulation error types.

use crate::entity::{EntityId, EntityKind};

/// Errors returned by engine commands and by direct calls into actors.
///
/// The dispatcher checks every precondition before it calls an actor, so the
/// fault variants only surface when an outside caller drives a mechanic or
/// loader by hand.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    /// Mechanic skill outside the accepted range.
    #[error("skill level {skill} is outside {min}..={max}")]
    InvalidSkill { skill: u8, min: u8, max: u8 },

    /// Fire probability that is not a finite value in `[0, 1]`.
    #[error("fire probability {0} must be within [0, 1]")]
    InvalidProbability(f64),

    /// Non-positive or non-finite extraction rate or capacity.
    #[error("{field} must be a positive finite number, got {value}")]
    InvalidQuantity { field: &'static str, value: f64 },

    /// Entities must carry a non-empty name.
    #[error("{0} name must not be empty")]
    EmptyName(EntityKind),

    /// Another entity of the same kind already uses this name.
    #[error("a {kind} named {name:?} already exists")]
    DuplicateName { kind: EntityKind, name: String },

    /// No entity of the given kind has this ID.
    #[error("no {kind} with id {id}")]
    UnknownEntity { kind: EntityKind, id: EntityId },

    /// The mechanic is already assigned to a repair.
    #[error("mechanic {0:?} is already busy")]
    MechanicBusy(String),

    /// The loader is already loading or transporting.
    #[error("loader {0:?} is already busy")]
    LoaderBusy(String),

    /// The rig is neither on fire nor damaged.
    #[error("rig {0:?} does not need repairs")]
    RigNotDamaged(String),

    /// Another mechanic is already repairing the rig.
    #[error("rig {0:?} is already under repair")]
    RigUnderRepair(String),
}

/// Convenience alias used across the crate.
pub type SimResult<T> = Result<T, SimError>;

/// Validates a finite, strictly positive quantity.
pub(crate) fn positive(field: &'static str, value: f64) -> SimResult<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(SimError::InvalidQuantity { field, value })
    }
}

/// Validates a trimmed, non-empty entity name.
pub(crate) fn entity_name(kind: EntityKind, name: impl Into<String>) -> SimResult<String> {
    let name = name.into();
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SimError::EmptyName(kind));
    }
    Ok(trimmed.to_string())
}
