//! # Entity Location Table
//!
//! Entities are dense 32-bit identifiers. The table maps each live id to the
//! archetype and row currently holding its data.
//!
//! Deleted ids are threaded onto an intrusive free list stored in the slots
//! themselves, so a free slot never exposes the location it used to hold.
//! Reuse is LIFO: the most recently deleted id is the next one handed out.

use std::fmt;

use crate::archetype::ArchetypeId;
use crate::error::{StoreError, StoreResult};

/// Smallest number of slots reserved once the table first grows.
pub const MIN_CAPACITY: usize = 16;

/// Opaque entity identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Entity(u32);

impl Entity {
    /// Creates an entity handle from a raw index.
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index of this entity.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a live entity's row lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EntityLocation {
    /// Archetype holding the entity.
    pub archetype: ArchetypeId,
    /// Row within that archetype.
    pub row: u32,
}

impl EntityLocation {
    /// Creates a location.
    #[inline]
    #[must_use]
    pub const fn new(archetype: ArchetypeId, row: u32) -> Self {
        Self { archetype, row }
    }
}

#[derive(Clone, Copy, Debug)]
enum Slot {
    Live(EntityLocation),
    Free { next: Option<u32> },
}

/// Dense id → location table with LIFO id recycling.
#[derive(Debug, Default)]
pub struct EntityLocationTable {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    live: usize,
}

impl EntityLocationTable {
    /// Creates an empty table.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            live: 0,
        }
    }

    /// Allocates an id for a new entity at `location`.
    ///
    /// Pops the free list first. Otherwise appends a slot, doubling the
    /// reserved capacity (starting at [`MIN_CAPACITY`]) when full.
    pub fn create(&mut self, location: EntityLocation) -> Entity {
        self.live += 1;

        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            if let Slot::Free { next } = *slot {
                self.free_head = next;
            }
            *slot = Slot::Live(location);
            return Entity(index);
        }

        if self.slots.len() == self.slots.capacity() {
            let target = (self.slots.capacity() * 2).max(MIN_CAPACITY);
            self.slots.reserve_exact(target - self.slots.len());
        }

        // Ids are u32 by contract; the table cannot outgrow that range.
        #[allow(clippy::cast_possible_truncation)]
        let index = self.slots.len() as u32;
        self.slots.push(Slot::Live(location));
        Entity(index)
    }

    /// Returns the location of a live entity.
    ///
    /// Never-allocated, out-of-range and deleted ids all return `None`.
    #[inline]
    #[must_use]
    pub fn locate(&self, entity: Entity) -> Option<EntityLocation> {
        match self.slots.get(entity.0 as usize) {
            Some(Slot::Live(location)) => Some(*location),
            _ => None,
        }
    }

    /// Moves a live entity to a new location.
    ///
    /// # Errors
    ///
    /// [`StoreError::EntityNotFound`] if `entity` is not live.
    pub fn update(&mut self, entity: Entity, location: EntityLocation) -> StoreResult<()> {
        match self.slots.get_mut(entity.0 as usize) {
            Some(slot @ Slot::Live(_)) => {
                *slot = Slot::Live(location);
                Ok(())
            }
            _ => Err(StoreError::EntityNotFound(entity)),
        }
    }

    /// Frees `entity`, making its id the next one [`create`](Self::create) returns.
    ///
    /// # Errors
    ///
    /// [`StoreError::EntityNotFound`] if `entity` is not live.
    pub fn delete(&mut self, entity: Entity) -> StoreResult<EntityLocation> {
        let next = self.free_head;
        match self.slots.get_mut(entity.0 as usize) {
            Some(slot) => match *slot {
                Slot::Live(location) => {
                    *slot = Slot::Free { next };
                    self.free_head = Some(entity.0);
                    self.live -= 1;
                    Ok(location)
                }
                Slot::Free { .. } => Err(StoreError::EntityNotFound(entity)),
            },
            None => Err(StoreError::EntityNotFound(entity)),
        }
    }

    /// Returns `true` if `entity` currently has a location.
    #[inline]
    #[must_use]
    pub fn is_live(&self, entity: Entity) -> bool {
        self.locate(entity).is_some()
    }

    /// Number of live entities.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.live
    }

    /// Returns `true` if no entity is live.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots reserved.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Iterates live entities in id order.
    pub fn iter_live(&self) -> impl Iterator<Item = (Entity, EntityLocation)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| match slot {
            #[allow(clippy::cast_possible_truncation)]
            Slot::Live(location) => Some((Entity(index as u32), *location)),
            Slot::Free { .. } => None,
        })
    }
}
