//! # lattice-ecs
//!
//! Archetype-based entity-component store with relational component keys,
//! compiled queries, and deferred structural mutation.
//!
//! ## Design goals
//! - Archetype (column-oriented) storage for cache-coherent iteration
//! - Relations and shared-object links as first-class component keys
//! - Wildcard query patterns over the open-ended key space
//! - Structural changes deferred while runners iterate, replayed in order
//! - Parallel per-entity dispatch on a work-stealing pool

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::world::{EntityHandle, World};

pub use engine::key::{KeyCatalog, KeyInfo, KeyPattern, KeyRole, KeyTarget, ObjectHandle};

pub use engine::archetype::{Archetype, Signature};

pub use engine::query::{QueryBuilder, QueryFilter, Stream};

pub use engine::systems::{FnSystem, System};

pub use engine::schedule::{Schedule, Stage};

pub use engine::commands::Command;

pub use engine::error::{
    AliasingError, ColumnError, EcsError, EcsResult, MissingComponentError, MoveError,
    SelectMismatchError, StaleEntityError,
};

pub use engine::types::{
    Access, ArchetypeId, Entity, EntityLocation, KeyId, Row, WorldId, EMPTY_ARCHETYPE,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used types.
///
/// Import with:
/// ```rust
/// use lattice_ecs::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Access, EcsResult, Entity, EntityHandle, FnSystem, KeyPattern, ObjectHandle, QueryBuilder,
        Schedule, Stream, System, World,
    };
}
