//! # Archetype storage
//!
//! An archetype is the unique holder of every entity sharing one exact
//! component signature, stored column-wise: one contiguous buffer per
//! value-bearing key, plus a parallel entity list mapping rows back to
//! identifiers.
//!
//! ## Design
//! - Component data is stored structure-of-arrays, one [`Column`] per key.
//! - Entities are densely packed; removal is always swap-with-last, and the
//!   relocated entity's registry record is patched immediately.
//! - Object-link keys store their shared handle once per archetype instead
//!   of once per row; iteration surfaces it per-row for uniformity.
//! - An edge cache memoizes `(add key | remove key) → neighbour archetype`
//!   so repeated structural changes skip signature hashing.
//!
//! ## Concurrency model
//! Each column is protected by its own `RwLock`, as is the entity list.
//! Runners take column locks for the duration of one archetype's iteration;
//! structural mutation happens only while no runner is active (enforced by
//! the world lock counter and deferral log). Violating that discipline can
//! deadlock.
//!
//! ## Invariants
//! - All value columns have length `|rows|` and align row-for-row.
//! - The signature is immutable for the archetype's lifetime; moving an
//!   entity relocates values, never mutates column identity.
//! - Archetypes are created on demand and never destroyed, only emptied, so
//!   edge caches and query match sets remain stable.
//!
//! [`Column`]: crate::engine::storage::Column

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use crate::engine::entity::EntityRegistry;
use crate::engine::error::{EcsError, EcsResult, MoveError};
use crate::engine::key::{KeyCatalog, KeyRole, KeyTarget, ObjectHandle};
use crate::engine::storage::ColumnStorage;
use crate::engine::types::{ArchetypeId, Entity, EntityLocation, KeyId, Row};

/// Canonically ordered set of component keys identifying an archetype.
///
/// Keys are kept sorted and deduplicated so equality and hashing are well
/// defined regardless of insertion order.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Signature(Box<[KeyId]>);

impl Signature {
    /// The empty signature.
    pub fn empty() -> Self {
        Signature(Box::new([]))
    }

    /// Builds a signature from an arbitrary key list.
    pub fn from_keys(mut keys: Vec<KeyId>) -> Self {
        keys.sort_unstable();
        keys.dedup();
        Signature(keys.into_boxed_slice())
    }

    /// Returns this signature with `key` added.
    pub fn with(&self, key: KeyId) -> Self {
        if self.contains(key) {
            return self.clone();
        }
        let mut keys: Vec<KeyId> = self.0.to_vec();
        keys.push(key);
        Self::from_keys(keys)
    }

    /// Returns this signature with `key` removed.
    pub fn without(&self, key: KeyId) -> Self {
        Signature(self.0.iter().copied().filter(|k| *k != key).collect())
    }

    /// Returns `true` if `key` is part of this signature.
    #[inline]
    pub fn contains(&self, key: KeyId) -> bool {
        self.0.binary_search(&key).is_ok()
    }

    /// The keys in canonical order.
    #[inline]
    pub fn keys(&self) -> &[KeyId] {
        &self.0
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` for the empty signature.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Structural-change edge out of an archetype.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) enum ArchetypeEdge {
    /// Adding this key.
    Add(KeyId),
    /// Removing this key.
    Remove(KeyId),
}

/// Storage slot backing one key of a signature.
pub(crate) enum ColumnSlot {
    /// Per-row values behind a column lock.
    Values(RwLock<Box<dyn ColumnStorage>>),
    /// Shared object, logically replicated across rows.
    Shared(ObjectHandle),
}

/// Stores all entities sharing one exact component signature.
pub struct Archetype {
    id: ArchetypeId,
    signature: Signature,
    /// Parallel to `signature.keys()`.
    columns: Vec<ColumnSlot>,
    rows: RwLock<Vec<Entity>>,
    edges: Mutex<HashMap<ArchetypeEdge, ArchetypeId>>,
}

impl Archetype {
    /// Creates an empty archetype for `signature`, allocating one column per
    /// value-bearing key from the catalog's factories.
    pub(crate) fn new(id: ArchetypeId, signature: Signature, catalog: &KeyCatalog) -> EcsResult<Self> {
        let mut columns = Vec::with_capacity(signature.len());
        for &key in signature.keys() {
            let info = catalog
                .info(key)
                .ok_or_else(|| EcsError::Internal(format!("archetype references unknown key {key}")))?;
            let slot = match info.role {
                KeyRole::ObjectLink => match &info.target {
                    KeyTarget::Object(handle) => ColumnSlot::Shared(handle.clone()),
                    _ => {
                        return Err(EcsError::Internal(format!(
                            "object-link key {key} has no object target"
                        )))
                    }
                },
                KeyRole::Plain | KeyRole::Relation => {
                    let factory = info.factory.ok_or(MoveError::InconsistentStorage)?;
                    ColumnSlot::Values(RwLock::new(factory()))
                }
            };
            columns.push(slot);
        }
        Ok(Self {
            id,
            signature,
            columns,
            rows: RwLock::new(Vec::new()),
            edges: Mutex::new(HashMap::new()),
        })
    }

    /// Identifier of this archetype. Stable for its lifetime.
    #[inline]
    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Signature of this archetype.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Number of entities currently stored.
    pub fn len(&self) -> EcsResult<usize> {
        Ok(self.rows.read().map_err(|_| EcsError::poisoned("archetype rows"))?.len())
    }

    /// Returns `true` if no entities are stored.
    pub fn is_empty(&self) -> EcsResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Entity stored at `row`, if in bounds.
    pub fn entity_at(&self, row: Row) -> EcsResult<Option<Entity>> {
        Ok(self
            .rows
            .read()
            .map_err(|_| EcsError::poisoned("archetype rows"))?
            .get(row as usize)
            .copied())
    }

    /// Row-to-entity map.
    #[inline]
    pub(crate) fn rows(&self) -> &RwLock<Vec<Entity>> {
        &self.rows
    }

    #[inline]
    fn column_index(&self, key: KeyId) -> Option<usize> {
        self.signature.keys().binary_search(&key).ok()
    }

    /// Column lock for a value-bearing key, if present.
    pub(crate) fn value_column(&self, key: KeyId) -> Option<&RwLock<Box<dyn ColumnStorage>>> {
        match self.columns.get(self.column_index(key)?) {
            Some(ColumnSlot::Values(lock)) => Some(lock),
            _ => None,
        }
    }

    /// Shared handle for an object-link key, if present.
    pub(crate) fn shared_object(&self, key: KeyId) -> Option<&ObjectHandle> {
        match self.columns.get(self.column_index(key)?) {
            Some(ColumnSlot::Shared(handle)) => Some(handle),
            _ => None,
        }
    }

    /// Memoized neighbour for a structural edge.
    pub(crate) fn edge(&self, edge: ArchetypeEdge) -> Option<ArchetypeId> {
        self.edges.lock().ok()?.get(&edge).copied()
    }

    /// Records a structural edge for later `edge` lookups.
    pub(crate) fn remember_edge(&self, edge: ArchetypeEdge, neighbour: ArchetypeId) {
        if let Ok(mut edges) = self.edges.lock() {
            edges.insert(edge, neighbour);
        }
    }

    /// Writes a full row of component values and records the entity.
    ///
    /// ## Behavior
    /// - Every value-bearing key in the signature must be supplied in
    ///   `values`; object-link keys need no value.
    /// - All columns must land the value at the same row, which is returned.
    ///
    /// ## Errors
    /// - `MissingAddedValue` when a required value is absent.
    /// - `RowMisalignment` when columns disagree on placement.
    pub(crate) fn push_row(
        &self,
        entity: Entity,
        mut values: Vec<(KeyId, Box<dyn Any + Send>)>,
    ) -> EcsResult<Row> {
        let expected =
            self.rows.read().map_err(|_| EcsError::poisoned("archetype rows"))?.len() as Row;

        for (index, &key) in self.signature.keys().iter().enumerate() {
            let ColumnSlot::Values(lock) = &self.columns[index] else { continue };

            let position = values
                .iter()
                .position(|(k, _)| *k == key)
                .ok_or(MoveError::MissingAddedValue { key })?;
            let (_, value) = values.swap_remove(position);

            let got = lock
                .write()
                .map_err(|_| EcsError::poisoned("column"))?
                .push_dyn(value)
                .map_err(|source_error| MoveError::Column { key, source_error })?;
            if got != expected {
                return Err(MoveError::RowMisalignment { expected, got, key }.into());
            }
        }

        self.rows.write().map_err(|_| EcsError::poisoned("archetype rows"))?.push(entity);
        Ok(expected)
    }

    /// Moves an entity's row from this archetype to `destination`.
    ///
    /// ## Behavior
    /// The move runs in three ordered phases over the two signatures:
    ///
    /// 1. **Shared keys** — the value at `row` is transferred column-by-column
    ///    with `transfer_from`, which swap-removes the source slot. Every
    ///    column must agree on the destination row and on which source row
    ///    was relocated by the swap.
    /// 2. **Destination-only keys** — values supplied in `added` are pushed;
    ///    object-link keys need none.
    /// 3. **Source-only keys** — remaining values at `row` are dropped with
    ///    `swap_remove`, preserving dense storage.
    ///
    /// Afterwards the entity lists of both archetypes are updated, the moved
    /// entity's registry record points at the destination, and any entity
    /// relocated by the swap is patched back to `row`.
    ///
    /// ## Errors
    /// - `InconsistentStorage` if a signature key has no column.
    /// - `MissingAddedValue` if a destination-only value is absent.
    /// - `RowMisalignment` / `InconsistentSwapInfo` when columns disagree on
    ///   placement; these indicate violated internal invariants.
    pub(crate) fn transfer_row(
        &self,
        destination: &Archetype,
        row: Row,
        mut added: Vec<(KeyId, Box<dyn Any + Send>)>,
        registry: &mut EntityRegistry,
    ) -> EcsResult<Row> {
        debug_assert!(self.id != destination.id, "transfer within one archetype");

        let (entity, expected_moved) = {
            let rows = self.rows.read().map_err(|_| EcsError::poisoned("archetype rows"))?;
            let entity = *rows.get(row as usize).ok_or(MoveError::MetadataFailure)?;
            let last = rows.len() - 1;
            let moved = if (row as usize) != last { Some(last as Row) } else { None };
            (entity, moved)
        };
        let expected_destination = destination
            .rows
            .read()
            .map_err(|_| EcsError::poisoned("archetype rows"))?
            .len() as Row;

        // Phases 1 and 3: walk the source signature once, transferring keys
        // shared with the destination and dropping the rest.
        for (index, &key) in self.signature.keys().iter().enumerate() {
            let ColumnSlot::Values(source_lock) = &self.columns[index] else { continue };
            let mut source =
                source_lock.write().map_err(|_| EcsError::poisoned("column"))?;

            if destination.signature.contains(key) {
                let destination_lock =
                    destination.value_column(key).ok_or(MoveError::InconsistentStorage)?;
                let mut dest =
                    destination_lock.write().map_err(|_| EcsError::poisoned("column"))?;

                let (got, moved_from) = dest
                    .transfer_from(source.as_mut(), row)
                    .map_err(|source_error| MoveError::Column { key, source_error })?;
                if got != expected_destination {
                    return Err(MoveError::RowMisalignment {
                        expected: expected_destination,
                        got,
                        key,
                    }
                    .into());
                }
                if moved_from != expected_moved {
                    return Err(MoveError::InconsistentSwapInfo.into());
                }
            } else {
                let moved_from = source
                    .swap_remove(row)
                    .map_err(|source_error| MoveError::Column { key, source_error })?;
                if moved_from != expected_moved {
                    return Err(MoveError::InconsistentSwapInfo.into());
                }
            }
        }

        // Phase 2: destination-only values.
        for (index, &key) in destination.signature.keys().iter().enumerate() {
            if self.signature.contains(key) {
                continue;
            }
            let ColumnSlot::Values(lock) = &destination.columns[index] else { continue };

            let position = added
                .iter()
                .position(|(k, _)| *k == key)
                .ok_or(MoveError::MissingAddedValue { key })?;
            let (_, value) = added.swap_remove(position);

            let got = lock
                .write()
                .map_err(|_| EcsError::poisoned("column"))?
                .push_dyn(value)
                .map_err(|source_error| MoveError::Column { key, source_error })?;
            if got != expected_destination {
                return Err(MoveError::RowMisalignment {
                    expected: expected_destination,
                    got,
                    key,
                }
                .into());
            }
        }

        destination
            .rows
            .write()
            .map_err(|_| EcsError::poisoned("archetype rows"))?
            .push(entity);

        let swapped = {
            let mut rows = self.rows.write().map_err(|_| EcsError::poisoned("archetype rows"))?;
            if (row as usize) >= rows.len() {
                return Err(MoveError::MetadataFailure.into());
            }
            let last = rows.len() - 1;
            let swapped = if (row as usize) != last { Some(rows[last]) } else { None };
            rows.swap_remove(row as usize);
            swapped
        };

        registry.set_location(
            entity,
            EntityLocation { archetype: destination.id, row: expected_destination },
        );
        if let Some(swapped) = swapped {
            registry.set_location(swapped, EntityLocation { archetype: self.id, row });
        }

        Ok(expected_destination)
    }

    /// Removes the row of a despawning entity and keeps columns dense.
    ///
    /// All value columns are swap-removed at `row`; any entity relocated by
    /// the swap has its registry record patched to `row`.
    pub(crate) fn swap_remove_row(
        &self,
        row: Row,
        registry: &mut EntityRegistry,
    ) -> EcsResult<()> {
        let expected_moved = {
            let rows = self.rows.read().map_err(|_| EcsError::poisoned("archetype rows"))?;
            if (row as usize) >= rows.len() {
                return Err(MoveError::MetadataFailure.into());
            }
            let last = rows.len() - 1;
            if (row as usize) != last { Some(last as Row) } else { None }
        };

        for (index, &key) in self.signature.keys().iter().enumerate() {
            let ColumnSlot::Values(lock) = &self.columns[index] else { continue };
            let moved_from = lock
                .write()
                .map_err(|_| EcsError::poisoned("column"))?
                .swap_remove(row)
                .map_err(|source_error| MoveError::Column { key, source_error })?;
            if moved_from != expected_moved {
                return Err(MoveError::InconsistentSwapInfo.into());
            }
        }

        let swapped = {
            let mut rows = self.rows.write().map_err(|_| EcsError::poisoned("archetype rows"))?;
            let last = rows.len() - 1;
            let swapped = if (row as usize) != last { Some(rows[last]) } else { None };
            rows.swap_remove(row as usize);
            swapped
        };

        if let Some(swapped) = swapped {
            registry.set_location(swapped, EntityLocation { archetype: self.id, row });
        }
        Ok(())
    }
}
