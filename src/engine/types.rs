//! Core identifiers and bit-level layouts.
//!
//! This module defines the fundamental types shared across all subsystems of
//! the store: entity identifiers, archetype and row indices, interned
//! component-key identifiers, and the access modes declared by queries.
//!
//! ## Entity representation
//!
//! Entities are encoded as a packed 64-bit integer with the following layout:
//!
//! ```text
//! | generation | world | index |
//! ```
//!
//! - **Index** identifies the slot within the world's identity registry.
//!   Indices are dense and recycled through a free list.
//! - **World** identifies the world that issued the identifier. Using an
//!   entity against a different world is detected as a stale reference.
//! - **Generation** increments each time an index is recycled, invalidating
//!   every previously issued handle for that slot.
//!
//! The exact bit widths are controlled by compile-time constants and
//! validated with static assertions.
//!
//! ## Keys and archetypes
//!
//! Component keys are interned to compact [`KeyId`] values by the per-world
//! key catalog; archetypes are identified by [`ArchetypeId`] values assigned
//! in creation order. Both are plain indices into dense vectors, chosen so
//! hot paths never hash more than once per structural change.

/// Bit-width type used for compile-time layout calculations.
pub type Bits = u8;

/// Packed 64-bit entity identifier value.
pub type EntityBits = u64;
/// Index of an entity slot within the identity registry.
pub type EntityIndex = u32;
/// Generation counter used to detect stale entity handles.
pub type Generation = u32;
/// Identifier of the world that issued an entity.
pub type WorldId = u16;

/// Unique identifier for an archetype within a world.
pub type ArchetypeId = u32;
/// Row index within an archetype's column storage.
pub type Row = u32;
/// Interned identifier for a component key within a world's catalog.
pub type KeyId = u32;

/// Total number of bits in an entity identifier.
pub const ENTITY_BITS: Bits = 64;
/// Number of bits reserved for the slot index.
pub const INDEX_BITS: Bits = 32;
/// Number of bits reserved for the world identifier.
pub const WORLD_BITS: Bits = 8;
/// Number of bits reserved for the generation counter.
pub const GENERATION_BITS: Bits = ENTITY_BITS - INDEX_BITS - WORLD_BITS;

const _: [(); 1] = [(); (INDEX_BITS + WORLD_BITS < ENTITY_BITS) as usize];
const _: [(); 1] = [(); (GENERATION_BITS > 0) as usize];
const _: [(); 1] = [(); (WORLD_BITS > 0) as usize];

const fn mask(bits: Bits) -> EntityBits {
    if bits == 0 { 0 } else { ((1 as EntityBits) << bits) - 1 }
}

/// Mask selecting the index portion of an entity identifier.
pub const INDEX_MASK: EntityBits = mask(INDEX_BITS);
/// Mask selecting the world portion of an entity identifier.
pub const WORLD_MASK: EntityBits = mask(WORLD_BITS);
/// Mask selecting the generation portion of an entity identifier.
pub const GENERATION_MASK: EntityBits = mask(GENERATION_BITS);

/// Identifier of the empty archetype (the signature with no keys).
///
/// The empty archetype always exists; newly spawned entities start there.
pub const EMPTY_ARCHETYPE: ArchetypeId = 0;

/// Opaque, versioned identifier for an entity.
///
/// ## Purpose
/// `Entity` is a compact handle that uniquely identifies an entity instance
/// at a point in time. It encodes enough information to:
///
/// - detect stale or recycled entity references,
/// - reject identifiers issued by a different world,
/// - index directly into the identity registry.
///
/// ## Invariants
/// - Two entities with the same `(world, index)` but different generations
///   are distinct; at most one of them is alive.
/// - An entity is alive iff its generation matches the registry slot and the
///   slot is marked alive.
///
/// `Entity` values are cheap to copy and compare and safe to pass across
/// threads.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Entity(pub EntityBits);

#[inline]
const fn make_bits(world: WorldId, index: EntityIndex, generation: Generation) -> EntityBits {
    ((generation as EntityBits) << (WORLD_BITS + INDEX_BITS))
        | ((world as EntityBits) << INDEX_BITS)
        | (index as EntityBits)
}

#[inline]
pub(crate) fn make_entity(world: WorldId, index: EntityIndex, generation: Generation) -> Entity {
    debug_assert!((index as EntityBits) <= INDEX_MASK);
    debug_assert!((world as EntityBits) <= WORLD_MASK);
    debug_assert!((generation as EntityBits) <= GENERATION_MASK);
    Entity(make_bits(world, index, generation))
}

#[inline]
pub(crate) const fn split_entity(entity: Entity) -> (WorldId, EntityIndex, Generation) {
    let bits = entity.0;
    let world = ((bits >> INDEX_BITS) & WORLD_MASK) as WorldId;
    let index = (bits & INDEX_MASK) as EntityIndex;
    let generation = ((bits >> (INDEX_BITS + WORLD_BITS)) & GENERATION_MASK) as Generation;
    (world, index, generation)
}

impl Entity {
    /// Returns the `(world, index, generation)` components of this entity.
    #[inline]
    pub fn components(self) -> (WorldId, EntityIndex, Generation) {
        split_entity(self)
    }

    /// Returns the world identifier encoded in this entity.
    #[inline]
    pub fn world(self) -> WorldId {
        ((self.0 >> INDEX_BITS) & WORLD_MASK) as WorldId
    }

    /// Returns the slot index component of this entity.
    #[inline]
    pub fn index(self) -> EntityIndex {
        (self.0 & INDEX_MASK) as EntityIndex
    }

    /// Returns the generation component of this entity.
    #[inline]
    pub fn generation(self) -> Generation {
        ((self.0 >> (INDEX_BITS + WORLD_BITS)) & GENERATION_MASK) as Generation
    }
}

/// Physical storage location of an entity.
///
/// Maps an entity handle to its component data by naming the archetype and
/// row that hold it.
///
/// ## Invariants
/// - Must always reflect the true location of the entity's component row.
/// - Updated atomically with archetype row moves.
/// - Invalidated immediately on despawn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityLocation {
    /// Archetype containing the entity.
    pub archetype: ArchetypeId,
    /// Row index within the archetype.
    pub row: Row,
}

/// Access mode declared for a selected component key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// Read-only access.
    Read,
    /// Exclusive write access.
    Write,
}

impl Access {
    /// Returns `true` if this access mode is [`Access::Write`].
    #[inline]
    pub fn is_write(self) -> bool {
        matches!(self, Access::Write)
    }
}
