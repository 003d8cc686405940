//! Deferred structural operations.

use std::any::Any;
use std::fmt;

use crate::engine::types::{Entity, KeyId};

/// Structural operation recorded by the deferral log while a world lock is
/// held, replayed in FIFO order on the outermost release.
pub enum Command {
    /// Materialize a provisionally reserved entity in the empty archetype.
    Spawn { entity: Entity },
    /// Destroy an entity; later commands against it in the same drain are
    /// dropped.
    Despawn { entity: Entity },
    /// Add or overwrite a keyed component. `value` is `None` for object
    /// links, which carry no per-row value.
    Add { entity: Entity, key: KeyId, value: Option<Box<dyn Any + Send>> },
    /// Remove a keyed component. A no-op if the entity no longer bears it.
    Remove { entity: Entity, key: KeyId },
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Spawn { entity } => f.debug_struct("Spawn").field("entity", entity).finish(),
            Command::Despawn { entity } => {
                f.debug_struct("Despawn").field("entity", entity).finish()
            }
            Command::Add { entity, key, .. } => f
                .debug_struct("Add")
                .field("entity", entity)
                .field("key", key)
                .finish_non_exhaustive(),
            Command::Remove { entity, key } => {
                f.debug_struct("Remove").field("entity", entity).field("key", key).finish()
            }
        }
    }
}
