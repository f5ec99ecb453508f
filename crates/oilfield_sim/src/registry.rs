//! Fleet registry: tracks every rig, mechanic and loader that exists.
//!
//! Each kind lives in its own insertion-ordered roster. Rosters hand out
//! clones of their `Arc`s, so a scan works on a stable list while commands
//! keep adding and removing entities. An in-flight task keeps the entity it
//! was handed alive after removal; it simply stops showing up in scans.
//!
//! Names are unique per kind. Uniqueness is enforced by a concurrent name
//! index rather than by scanning the rosters under their locks.

use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::entity::{EntityAllocator, EntityId, EntityKind};
use crate::error::{SimError, SimResult};
use crate::loader::Loader;
use crate::mechanic::Mechanic;
use crate::rig::Rig;
use crate::stats::FleetSnapshot;

/// Implemented by everything a [`Roster`] can hold.
pub trait Member {
    const KIND: EntityKind;

    fn id(&self) -> EntityId;

    fn name(&self) -> &str;
}

impl Member for Rig {
    const KIND: EntityKind = EntityKind::Rig;

    fn id(&self) -> EntityId {
        Rig::id(self)
    }

    fn name(&self) -> &str {
        Rig::name(self)
    }
}

impl Member for Mechanic {
    const KIND: EntityKind = EntityKind::Mechanic;

    fn id(&self) -> EntityId {
        Mechanic::id(self)
    }

    fn name(&self) -> &str {
        Mechanic::name(self)
    }
}

impl Member for Loader {
    const KIND: EntityKind = EntityKind::Loader;

    fn id(&self) -> EntityId {
        Loader::id(self)
    }

    fn name(&self) -> &str {
        Loader::name(self)
    }
}

/// Insertion-ordered collection of one entity kind.
#[derive(Debug)]
pub struct Roster<T> {
    members: RwLock<Vec<Arc<T>>>,
}

impl<T: Member> Roster<T> {
    fn new() -> Self {
        Self {
            members: RwLock::new(Vec::new()),
        }
    }

    fn push(&self, member: Arc<T>) {
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(member);
    }

    fn remove(&self, id: EntityId) -> Option<Arc<T>> {
        let mut members = self.members.write().unwrap_or_else(PoisonError::into_inner);
        let pos = members.iter().position(|m| m.id() == id)?;
        Some(members.remove(pos))
    }

    /// Clones of every member, in insertion order.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<T>> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn get(&self, id: EntityId) -> Option<Arc<T>> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|m| m.id() == id)
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registry of all entities in one simulation.
#[derive(Debug)]
pub struct FleetRegistry {
    ids: EntityAllocator,
    rigs: Roster<Rig>,
    mechanics: Roster<Mechanic>,
    loaders: Roster<Loader>,
    /// (kind, name) to ID, for every live entity.
    names: DashMap<(EntityKind, String), EntityId>,
}

impl FleetRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ids: EntityAllocator::new(),
            rigs: Roster::new(),
            mechanics: Roster::new(),
            loaders: Roster::new(),
            names: DashMap::new(),
        }
    }

    /// Allocate the ID for an entity about to be built.
    pub fn allocate_id(&self) -> EntityId {
        self.ids.allocate()
    }

    #[must_use]
    pub fn rigs(&self) -> &Roster<Rig> {
        &self.rigs
    }

    #[must_use]
    pub fn mechanics(&self) -> &Roster<Mechanic> {
        &self.mechanics
    }

    #[must_use]
    pub fn loaders(&self) -> &Roster<Loader> {
        &self.loaders
    }

    /// Register a rig.
    ///
    /// # Errors
    ///
    /// [`SimError::DuplicateName`] if another rig already uses its name.
    pub fn insert_rig(&self, rig: Rig) -> SimResult<Arc<Rig>> {
        self.insert(&self.rigs, rig)
    }

    /// Register a mechanic.
    ///
    /// # Errors
    ///
    /// [`SimError::DuplicateName`] if another mechanic already uses its name.
    pub fn insert_mechanic(&self, mechanic: Mechanic) -> SimResult<Arc<Mechanic>> {
        self.insert(&self.mechanics, mechanic)
    }

    /// Register a loader.
    ///
    /// # Errors
    ///
    /// [`SimError::DuplicateName`] if another loader already uses its name.
    pub fn insert_loader(&self, loader: Loader) -> SimResult<Arc<Loader>> {
        self.insert(&self.loaders, loader)
    }

    fn insert<T: Member>(&self, roster: &Roster<T>, member: T) -> SimResult<Arc<T>> {
        match self.names.entry((T::KIND, member.name().to_owned())) {
            Entry::Occupied(_) => {
                return Err(SimError::DuplicateName {
                    kind: T::KIND,
                    name: member.name().to_owned(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(member.id());
            }
        }
        debug!(kind = %T::KIND, id = %member.id(), name = member.name(), "registered");
        let member = Arc::new(member);
        roster.push(Arc::clone(&member));
        Ok(member)
    }

    /// Unregister a rig and stop it for good.
    ///
    /// # Errors
    ///
    /// [`SimError::UnknownEntity`] if no rig has this ID.
    pub fn remove_rig(&self, id: EntityId) -> SimResult<Arc<Rig>> {
        let rig = self.remove(&self.rigs, id)?;
        rig.retire();
        Ok(rig)
    }

    /// Unregister a mechanic. A repair it is working on runs to its end.
    ///
    /// # Errors
    ///
    /// [`SimError::UnknownEntity`] if no mechanic has this ID.
    pub fn remove_mechanic(&self, id: EntityId) -> SimResult<Arc<Mechanic>> {
        self.remove(&self.mechanics, id)
    }

    /// Unregister a loader. A shipment it is running runs to its end.
    ///
    /// # Errors
    ///
    /// [`SimError::UnknownEntity`] if no loader has this ID.
    pub fn remove_loader(&self, id: EntityId) -> SimResult<Arc<Loader>> {
        self.remove(&self.loaders, id)
    }

    fn remove<T: Member>(&self, roster: &Roster<T>, id: EntityId) -> SimResult<Arc<T>> {
        let member = roster
            .remove(id)
            .ok_or(SimError::UnknownEntity { kind: T::KIND, id })?;
        self.names.remove(&(T::KIND, member.name().to_owned()));
        debug!(kind = %T::KIND, %id, name = member.name(), "unregistered");
        Ok(member)
    }

    /// Look up a live entity's ID by kind and name.
    #[cfg(test)]
    pub(crate) fn find(&self, kind: EntityKind, name: &str) -> Option<EntityId> {
        self.names
            .get(&(kind, name.to_owned()))
            .map(|entry| *entry.value())
    }

    /// Total number of live entities of every kind.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.rigs.len() + self.mechanics.len() + self.loaders.len()
    }

    /// Snapshot every entity in registry order.
    #[must_use]
    pub fn snapshot(&self, running: bool) -> FleetSnapshot {
        FleetSnapshot {
            running,
            rigs: self.rigs.list().iter().map(|r| r.snapshot()).collect(),
            mechanics: self.mechanics.list().iter().map(|m| m.snapshot()).collect(),
            loaders: self.loaders.list().iter().map(|l| l.snapshot()).collect(),
        }
    }
}

impl Default for FleetRegistry {
    fn default() -> Self {
        Self::new()
    }
}
