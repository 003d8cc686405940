//! # Identity registry
//!
//! Entities are lightweight, versioned handles that reference rows in
//! archetype storage. This module owns their lifecycle:
//!
//! - issuing stable identifiers from a dense slot vector,
//! - tracking liveness through per-slot generations,
//! - mapping live entities to their `(archetype, row)` coordinates,
//! - recycling despawned indices through a free list.
//!
//! ## Provisional identifiers
//!
//! While a world lock is held, spawns cannot touch archetype storage, but
//! subsequent deferred operations must already be able to name the new
//! entity. [`EntityRegistry::reserve`] issues a *pending* identifier: alive
//! for staleness checks, but with no materialized row. The deferral drain
//! materializes it into the empty archetype before any later operation on
//! it is applied.
//!
//! ## Invariants
//! - `generations.len() == alive.len() == pending.len() == locations.len()`.
//! - If `alive[i]` and not `pending[i]`, `locations[i]` is valid.
//! - Free-list indices always refer to dead slots.
//! - Despawning bumps the slot generation, invalidating every previously
//!   issued handle for that index.

use crate::engine::types::{
    make_entity, split_entity, Entity, EntityIndex, EntityLocation, Generation, WorldId,
    GENERATION_MASK,
};

/// Dense pool of entity slots for one world.
///
/// Not thread-safe; the world wraps it in a mutex.
pub struct EntityRegistry {
    world: WorldId,
    generations: Vec<Generation>,
    alive: Vec<bool>,
    pending: Vec<bool>,
    locations: Vec<EntityLocation>,
    free: Vec<EntityIndex>,
}

impl EntityRegistry {
    /// Creates an empty registry issuing identifiers for `world`.
    pub fn new(world: WorldId) -> Self {
        Self {
            world,
            generations: Vec::new(),
            alive: Vec::new(),
            pending: Vec::new(),
            locations: Vec::new(),
            free: Vec::new(),
        }
    }

    fn alloc_index(&mut self) -> EntityIndex {
        if let Some(index) = self.free.pop() {
            return index;
        }
        let index = self.generations.len() as EntityIndex;
        self.generations.push(0);
        self.alive.push(false);
        self.pending.push(false);
        self.locations.push(EntityLocation::default());
        index
    }

    /// Allocates a live entity at a known location.
    ///
    /// The generation is whatever the slot carries; recycled slots were
    /// bumped at despawn time.
    pub fn spawn(&mut self, location: EntityLocation) -> Entity {
        let index = self.alloc_index();
        let i = index as usize;
        self.alive[i] = true;
        self.pending[i] = false;
        self.locations[i] = location;
        make_entity(self.world, index, self.generations[i])
    }

    /// Allocates a live but *pending* entity with no materialized row.
    pub fn reserve(&mut self) -> Entity {
        let index = self.alloc_index();
        let i = index as usize;
        self.alive[i] = true;
        self.pending[i] = true;
        self.locations[i] = EntityLocation::default();
        make_entity(self.world, index, self.generations[i])
    }

    /// Assigns a row to a pending entity, making it locatable.
    ///
    /// Returns `false` if the entity is stale or was never pending.
    pub fn materialize(&mut self, entity: Entity, location: EntityLocation) -> bool {
        if !self.slot_matches(entity) {
            return false;
        }
        let i = entity.index() as usize;
        if !self.pending[i] {
            return false;
        }
        self.pending[i] = false;
        self.locations[i] = location;
        true
    }

    /// Destroys an entity and invalidates its handle.
    ///
    /// ## Behavior
    /// - Verifies the generation matches the current slot generation.
    /// - Marks the slot dead and bumps its generation.
    /// - Returns the index to the free list.
    ///
    /// ## Returns
    /// `true` if the entity was alive and is now despawned; `false` if the
    /// handle was stale, foreign, or already dead.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.slot_matches(entity) {
            return false;
        }
        let index = entity.index();
        let i = index as usize;
        self.generations[i] = (self.generations[i] + 1) & GENERATION_MASK as Generation;
        self.alive[i] = false;
        self.pending[i] = false;
        self.locations[i] = EntityLocation::default();
        self.free.push(index);
        true
    }

    #[inline]
    fn slot_matches(&self, entity: Entity) -> bool {
        let (world, index, generation) = split_entity(entity);
        world == self.world
            && (index as usize) < self.generations.len()
            && self.generations[index as usize] == generation
            && self.alive[index as usize]
    }

    /// Returns `true` if the entity is alive (including pending) and not
    /// stale or foreign.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.slot_matches(entity)
    }

    /// Returns `true` if the entity is a reserved identifier awaiting
    /// materialization.
    pub fn is_pending(&self, entity: Entity) -> bool {
        self.slot_matches(entity) && self.pending[entity.index() as usize]
    }

    /// Returns the location of an entity, if alive and materialized.
    pub fn locate(&self, entity: Entity) -> Option<EntityLocation> {
        if self.slot_matches(entity) && !self.pending[entity.index() as usize] {
            Some(self.locations[entity.index() as usize])
        } else {
            None
        }
    }

    /// Updates the stored location for an entity.
    ///
    /// Caller must ensure the entity is alive; row moves and despawn
    /// patching call this with locations taken from archetype storage.
    pub fn set_location(&mut self, entity: Entity, location: EntityLocation) {
        debug_assert!(
            self.slot_matches(entity),
            "set_location called on a dead or stale entity: {entity:?} -> {location:?}"
        );
        let i = entity.index() as usize;
        if i < self.locations.len() {
            self.locations[i] = location;
            self.pending[i] = false;
        }
    }

    /// Number of live entities, pending included.
    pub fn live_count(&self) -> usize {
        self.alive.iter().filter(|alive| **alive).count()
    }
}
