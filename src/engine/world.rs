//! # World management
//!
//! The central orchestration layer of the store, responsible for:
//!
//! * owning archetypes, the key catalog, and the identity registry,
//! * coordinating entity movement between archetypes on structural change,
//! * deferring structural mutations while any runner holds the world lock,
//! * replaying the deferral log on the outermost lock release.
//!
//! ## Structural discipline
//!
//! A *structural change* is any operation that alters an entity's archetype:
//! spawn, despawn, add, remove. While the world lock counter is zero such
//! operations apply immediately, serialized by an internal structural mutex.
//! While the counter is nonzero (a runner is executing) they are appended to
//! the deferral log in submission order and applied when the outermost
//! runner returns. Re-entrant locking is supported; only the outermost
//! release drains.
//!
//! ## Teardown
//!
//! Dropping a [`World`] runs destructors for every stored component value
//! and releases all column buffers; no explicit teardown call exists.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, trace, warn};

use crate::engine::archetype::{Archetype, ArchetypeEdge, Signature};
use crate::engine::commands::Command;
use crate::engine::entity::EntityRegistry;
use crate::engine::error::{EcsError, EcsResult, MissingComponentError, StaleEntityError};
use crate::engine::key::{KeyCatalog, ObjectHandle};
use crate::engine::query::QueryBuilder;
use crate::engine::types::{
    ArchetypeId, Entity, EntityLocation, KeyId, Row, WorldId, EMPTY_ARCHETYPE, WORLD_MASK,
};

static NEXT_WORLD_ID: AtomicU16 = AtomicU16::new(0);

/// An isolated entity-component store.
///
/// Worlds are independent: entities carry their issuing world's identifier,
/// and using one against another world fails as a stale reference. All
/// methods take `&self`; interior synchronization follows the structural
/// discipline described in the module docs.
pub struct World {
    id: WorldId,
    archetypes: RwLock<Vec<Arc<Archetype>>>,
    signature_index: Mutex<HashMap<Signature, ArchetypeId>>,
    catalog: RwLock<KeyCatalog>,
    registry: Mutex<EntityRegistry>,
    /// Serializes structural mutation.
    structural: Mutex<()>,
    /// World lock counter; structural operations defer while nonzero.
    lock_depth: AtomicU32,
    /// Deferral log, drained FIFO on the outermost lock release.
    log: Mutex<Vec<Command>>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Creates a world containing only the empty archetype.
    pub fn new() -> Self {
        // World identifiers recycle after the 8-bit space wraps; stale
        // detection then rests on generations alone.
        let id = (NEXT_WORLD_ID.fetch_add(1, Ordering::Relaxed) as u64 & WORLD_MASK) as WorldId;
        let catalog = KeyCatalog::new();
        let empty = Archetype::new(EMPTY_ARCHETYPE, Signature::empty(), &catalog)
            .expect("empty archetype construction cannot fail");
        let mut signature_index = HashMap::new();
        signature_index.insert(Signature::empty(), EMPTY_ARCHETYPE);
        Self {
            id,
            archetypes: RwLock::new(vec![Arc::new(empty)]),
            signature_index: Mutex::new(signature_index),
            catalog: RwLock::new(catalog),
            registry: Mutex::new(EntityRegistry::new(id)),
            structural: Mutex::new(()),
            lock_depth: AtomicU32::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Identifier of this world.
    pub fn id(&self) -> WorldId {
        self.id
    }

    // ── lock plumbing ───────────────────────────────────────────────────

    fn registry(&self) -> EcsResult<MutexGuard<'_, EntityRegistry>> {
        self.registry.lock().map_err(|_| EcsError::poisoned("entity registry"))
    }

    pub(crate) fn catalog(&self) -> EcsResult<RwLockReadGuard<'_, KeyCatalog>> {
        self.catalog.read().map_err(|_| EcsError::poisoned("key catalog"))
    }

    fn catalog_mut(&self) -> EcsResult<RwLockWriteGuard<'_, KeyCatalog>> {
        self.catalog.write().map_err(|_| EcsError::poisoned("key catalog"))
    }

    pub(crate) fn archetype_list(&self) -> EcsResult<RwLockReadGuard<'_, Vec<Arc<Archetype>>>> {
        self.archetypes.read().map_err(|_| EcsError::poisoned("archetype list"))
    }

    /// Resolves an archetype id to its shared handle.
    pub(crate) fn archetype(&self, id: ArchetypeId) -> EcsResult<Arc<Archetype>> {
        self.archetype_list()?
            .get(id as usize)
            .cloned()
            .ok_or_else(|| EcsError::Internal(format!("unknown archetype {id}")))
    }

    /// Returns `true` while any runner holds the world lock.
    pub fn is_locked(&self) -> bool {
        self.lock_depth.load(Ordering::Acquire) > 0
    }

    /// Increments the world lock counter. Paired with [`World::release_lock`].
    pub(crate) fn acquire_lock(&self) {
        self.lock_depth.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements the world lock counter; the outermost release drains the
    /// deferral log.
    pub(crate) fn release_lock(&self) -> EcsResult<()> {
        let previous = self.lock_depth.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "world lock release without acquire");
        if previous == 1 {
            self.drain_deferred()
        } else {
            Ok(())
        }
    }

    // ── key interning ───────────────────────────────────────────────────

    /// Interns the plain key for component type `T`.
    pub fn plain_key<T: Send + Sync + 'static>(&self) -> EcsResult<KeyId> {
        Ok(self.catalog_mut()?.intern_plain::<T>())
    }

    /// Interns the relation key for component type `T` toward `target`.
    pub fn relation_key<T: Send + Sync + 'static>(&self, target: Entity) -> EcsResult<KeyId> {
        Ok(self.catalog_mut()?.intern_relation::<T>(target))
    }

    /// Interns the object-link key for object type `T` behind `handle`.
    pub fn object_key<T: Send + Sync + 'static>(&self, handle: &ObjectHandle) -> EcsResult<KeyId> {
        Ok(self.catalog_mut()?.intern_object::<T>(handle)?)
    }

    // ── entity lifecycle ────────────────────────────────────────────────

    /// Creates a new entity in the empty archetype.
    ///
    /// While a runner is active the identifier is reserved immediately and
    /// materialized when the deferral log drains, so later deferred
    /// operations may already name it.
    pub fn spawn(&self) -> EcsResult<Entity> {
        if self.is_locked() {
            let entity = self.registry()?.reserve();
            self.push_command(Command::Spawn { entity })?;
            return Ok(entity);
        }
        let _structural = self.structural.lock().map_err(|_| EcsError::poisoned("structural"))?;
        self.spawn_now()
    }

    fn spawn_now(&self) -> EcsResult<Entity> {
        let mut registry = self.registry()?;
        let empty = self.archetype(EMPTY_ARCHETYPE)?;
        let row = empty.len()? as Row;
        let entity = registry.spawn(EntityLocation { archetype: EMPTY_ARCHETYPE, row });
        empty.push_row(entity, Vec::new())?;
        Ok(entity)
    }

    /// Destroys an entity.
    ///
    /// ## Errors
    /// Fails with a stale-entity error if the handle was already despawned
    /// or belongs to another world.
    pub fn despawn(&self, entity: Entity) -> EcsResult<()> {
        if self.is_locked() {
            if !self.registry()?.is_alive(entity) {
                return Err(StaleEntityError.into());
            }
            return self.push_command(Command::Despawn { entity });
        }
        self.apply_despawn(entity)
    }

    fn apply_despawn(&self, entity: Entity) -> EcsResult<()> {
        let _structural = self.structural.lock().map_err(|_| EcsError::poisoned("structural"))?;
        let mut registry = self.registry()?;
        let location = registry.locate(entity).ok_or(StaleEntityError)?;
        let archetype = self.archetype(location.archetype)?;
        archetype.swap_remove_row(location.row, &mut registry)?;
        if !registry.despawn(entity) {
            return Err(EcsError::Internal("located entity failed to despawn".into()));
        }
        Ok(())
    }

    /// Returns `true` if the entity is alive in this world.
    pub fn is_alive(&self, entity: Entity) -> bool {
        self.registry().map(|registry| registry.is_alive(entity)).unwrap_or(false)
    }

    /// Returns the `(archetype, row)` coordinates of a live entity.
    pub fn locate(&self, entity: Entity) -> EcsResult<EntityLocation> {
        self.registry()?.locate(entity).ok_or_else(|| StaleEntityError.into())
    }

    // ── structural component operations ────────────────────────────────

    /// Adds (or overwrites) the plain component `T` on an entity.
    pub fn add<T: Send + Sync + 'static>(&self, entity: Entity, value: T) -> EcsResult<()> {
        let key = self.plain_key::<T>()?;
        self.add_key(entity, key, Some(Box::new(value)))
    }

    /// Removes the plain component `T` from an entity.
    ///
    /// Removing an absent component is a logged no-op.
    pub fn remove<T: Send + Sync + 'static>(&self, entity: Entity) -> EcsResult<()> {
        let key = self.plain_key::<T>()?;
        self.remove_key(entity, key)
    }

    /// Adds (or overwrites) a relation component `T` from `entity` toward
    /// `target`. Relations toward distinct targets are distinct keys and
    /// coexist on one entity.
    pub fn add_relation<T: Send + Sync + 'static>(
        &self,
        entity: Entity,
        target: Entity,
        value: T,
    ) -> EcsResult<()> {
        let key = self.relation_key::<T>(target)?;
        self.add_key(entity, key, Some(Box::new(value)))
    }

    /// Removes the relation component `T` toward `target`.
    pub fn remove_relation<T: Send + Sync + 'static>(
        &self,
        entity: Entity,
        target: Entity,
    ) -> EcsResult<()> {
        let key = self.relation_key::<T>(target)?;
        self.remove_key(entity, key)
    }

    /// Links an entity to a shared object of type `T`.
    pub fn add_object<T: Send + Sync + 'static>(
        &self,
        entity: Entity,
        handle: &ObjectHandle,
    ) -> EcsResult<()> {
        let key = self.object_key::<T>(handle)?;
        self.add_key(entity, key, None)
    }

    /// Unlinks an entity from a shared object of type `T`.
    pub fn remove_object<T: Send + Sync + 'static>(
        &self,
        entity: Entity,
        handle: &ObjectHandle,
    ) -> EcsResult<()> {
        let key = self.object_key::<T>(handle)?;
        self.remove_key(entity, key)
    }

    /// Adds a component by interned key.
    pub fn add_key(
        &self,
        entity: Entity,
        key: KeyId,
        value: Option<Box<dyn Any + Send>>,
    ) -> EcsResult<()> {
        if self.is_locked() {
            if !self.registry()?.is_alive(entity) {
                return Err(StaleEntityError.into());
            }
            return self.push_command(Command::Add { entity, key, value });
        }
        self.apply_add(entity, key, value)
    }

    /// Removes a component by interned key.
    pub fn remove_key(&self, entity: Entity, key: KeyId) -> EcsResult<()> {
        if self.is_locked() {
            if !self.registry()?.is_alive(entity) {
                return Err(StaleEntityError.into());
            }
            return self.push_command(Command::Remove { entity, key });
        }
        self.apply_remove(entity, key)
    }

    fn apply_add(
        &self,
        entity: Entity,
        key: KeyId,
        value: Option<Box<dyn Any + Send>>,
    ) -> EcsResult<()> {
        let _structural = self.structural.lock().map_err(|_| EcsError::poisoned("structural"))?;
        let mut registry = self.registry()?;
        let location = registry.locate(entity).ok_or(StaleEntityError)?;
        let source = self.archetype(location.archetype)?;

        if source.signature().contains(key) {
            // Structural no-op: overwrite the value in place.
            if let Some(value) = value {
                let column = source
                    .value_column(key)
                    .ok_or_else(|| EcsError::Internal("signature key without column".into()))?;
                column
                    .write()
                    .map_err(|_| EcsError::poisoned("column"))?
                    .set_dyn(location.row, value)?;
            }
            return Ok(());
        }

        let destination_id = self.neighbour(&source, ArchetypeEdge::Add(key))?;
        let destination = self.archetype(destination_id)?;
        let added = match value {
            Some(value) => vec![(key, value)],
            None => Vec::new(),
        };
        source.transfer_row(&destination, location.row, added, &mut registry)?;
        Ok(())
    }

    fn apply_remove(&self, entity: Entity, key: KeyId) -> EcsResult<()> {
        let _structural = self.structural.lock().map_err(|_| EcsError::poisoned("structural"))?;
        let mut registry = self.registry()?;
        let location = registry.locate(entity).ok_or(StaleEntityError)?;
        let source = self.archetype(location.archetype)?;

        if !source.signature().contains(key) {
            warn!(entity = entity.0, key, "remove of absent key ignored");
            return Ok(());
        }

        let destination_id = self.neighbour(&source, ArchetypeEdge::Remove(key))?;
        let destination = self.archetype(destination_id)?;
        source.transfer_row(&destination, location.row, Vec::new(), &mut registry)?;
        Ok(())
    }

    /// Resolves a structural edge through the archetype's edge cache,
    /// creating and memoizing the neighbour on first use.
    fn neighbour(&self, source: &Archetype, edge: ArchetypeEdge) -> EcsResult<ArchetypeId> {
        if let Some(id) = source.edge(edge) {
            return Ok(id);
        }
        let signature = match edge {
            ArchetypeEdge::Add(key) => source.signature().with(key),
            ArchetypeEdge::Remove(key) => source.signature().without(key),
        };
        let id = self.get_or_create_archetype(signature)?;
        source.remember_edge(edge, id);
        let inverse = match edge {
            ArchetypeEdge::Add(key) => ArchetypeEdge::Remove(key),
            ArchetypeEdge::Remove(key) => ArchetypeEdge::Add(key),
        };
        self.archetype(id)?.remember_edge(inverse, source.id());
        Ok(id)
    }

    fn get_or_create_archetype(&self, signature: Signature) -> EcsResult<ArchetypeId> {
        let mut index = self
            .signature_index
            .lock()
            .map_err(|_| EcsError::poisoned("signature index"))?;
        if let Some(&id) = index.get(&signature) {
            return Ok(id);
        }
        let catalog = self.catalog()?;
        let mut archetypes =
            self.archetypes.write().map_err(|_| EcsError::poisoned("archetype list"))?;
        let id = archetypes.len() as ArchetypeId;
        let archetype = Archetype::new(id, signature.clone(), &catalog)?;
        archetypes.push(Arc::new(archetype));
        index.insert(signature, id);
        trace!(archetype = id, "created archetype");
        Ok(id)
    }

    // ── component reads ─────────────────────────────────────────────────

    /// Returns `true` if the entity currently bears a key matching the
    /// plain component `T`.
    pub fn has_component<T: Send + Sync + 'static>(&self, entity: Entity) -> EcsResult<bool> {
        let key = self.plain_key::<T>()?;
        self.has_key(entity, key)
    }

    /// Returns `true` if the entity currently bears `key`.
    pub fn has_key(&self, entity: Entity, key: KeyId) -> EcsResult<bool> {
        let location = self.locate(entity)?;
        Ok(self.archetype(location.archetype)?.signature().contains(key))
    }

    /// Reads a clone of the plain component `T` on an entity.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, entity: Entity) -> EcsResult<T> {
        let key = self.plain_key::<T>()?;
        self.get_key(entity, key)
    }

    /// Reads a clone of the relation component `T` toward `target`.
    pub fn get_relation<T: Clone + Send + Sync + 'static>(
        &self,
        entity: Entity,
        target: Entity,
    ) -> EcsResult<T> {
        let key = self.relation_key::<T>(target)?;
        self.get_key(entity, key)
    }

    /// Reads a clone of the component stored under `key`.
    pub fn get_key<T: Clone + Send + Sync + 'static>(
        &self,
        entity: Entity,
        key: KeyId,
    ) -> EcsResult<T> {
        let location = self.locate(entity)?;
        let archetype = self.archetype(location.archetype)?;
        let column = archetype
            .value_column(key)
            .ok_or(MissingComponentError { type_name: std::any::type_name::<T>() })?;
        let guard = column.read().map_err(|_| EcsError::poisoned("column"))?;
        let slice = crate::engine::storage::column_slice::<T>(&**guard)
            .ok_or_else(|| EcsError::Internal("column element type mismatch".into()))?;
        slice
            .get(location.row as usize)
            .cloned()
            .ok_or_else(|| EcsError::Internal("entity row out of column bounds".into()))
    }

    // ── deferral log ────────────────────────────────────────────────────

    fn push_command(&self, command: Command) -> EcsResult<()> {
        self.log.lock().map_err(|_| EcsError::poisoned("deferral log"))?.push(command);
        Ok(())
    }

    /// Applies the deferral log in FIFO order.
    ///
    /// Operations whose entity was despawned earlier in the same drain are
    /// dropped silently (logged); everything else applies exactly as it
    /// would have without a lock.
    fn drain_deferred(&self) -> EcsResult<()> {
        let commands = {
            let mut log = self.log.lock().map_err(|_| EcsError::poisoned("deferral log"))?;
            std::mem::take(&mut *log)
        };
        if commands.is_empty() {
            return Ok(());
        }

        let total = commands.len();
        let mut dropped = 0usize;
        for command in commands {
            match command {
                Command::Spawn { entity } => {
                    let _structural =
                        self.structural.lock().map_err(|_| EcsError::poisoned("structural"))?;
                    let mut registry = self.registry()?;
                    if !registry.is_pending(entity) {
                        dropped += 1;
                        continue;
                    }
                    let empty = self.archetype(EMPTY_ARCHETYPE)?;
                    let row = empty.len()? as Row;
                    empty.push_row(entity, Vec::new())?;
                    registry.materialize(entity, EntityLocation { archetype: EMPTY_ARCHETYPE, row });
                }
                Command::Despawn { entity } => {
                    if !self.is_alive(entity) {
                        dropped += 1;
                        continue;
                    }
                    self.apply_despawn(entity)?;
                }
                Command::Add { entity, key, value } => {
                    if !self.is_alive(entity) {
                        warn!(entity = entity.0, key, "deferred add collapsed by despawn");
                        dropped += 1;
                        continue;
                    }
                    self.apply_add(entity, key, value)?;
                }
                Command::Remove { entity, key } => {
                    if !self.is_alive(entity) {
                        warn!(entity = entity.0, key, "deferred remove collapsed by despawn");
                        dropped += 1;
                        continue;
                    }
                    self.apply_remove(entity, key)?;
                }
            }
        }
        debug!(total, dropped, "drained deferred structural operations");
        Ok(())
    }

    // ── queries and handles ─────────────────────────────────────────────

    /// Starts building a query over this world.
    pub fn query(&self) -> QueryBuilder<'_> {
        QueryBuilder::new(self)
    }

    /// Returns a handle bundling this world with one entity.
    pub fn entity(&self, entity: Entity) -> EntityHandle<'_> {
        EntityHandle { world: self, entity }
    }
}

/// Thin handle pairing a world with one entity identifier.
///
/// All methods delegate to the corresponding [`World`] operations and share
/// their deferral and staleness semantics.
#[derive(Clone, Copy)]
pub struct EntityHandle<'w> {
    world: &'w World,
    entity: Entity,
}

impl<'w> EntityHandle<'w> {
    /// The wrapped entity identifier.
    pub fn id(&self) -> Entity {
        self.entity
    }

    /// Adds (or overwrites) the plain component `T`.
    pub fn add<T: Send + Sync + 'static>(&self, value: T) -> EcsResult<()> {
        self.world.add(self.entity, value)
    }

    /// Removes the plain component `T`.
    pub fn remove<T: Send + Sync + 'static>(&self) -> EcsResult<()> {
        self.world.remove::<T>(self.entity)
    }

    /// Adds (or overwrites) a relation component toward `target`.
    pub fn add_relation<T: Send + Sync + 'static>(&self, target: Entity, value: T) -> EcsResult<()> {
        self.world.add_relation(self.entity, target, value)
    }

    /// Removes the relation component toward `target`.
    pub fn remove_relation<T: Send + Sync + 'static>(&self, target: Entity) -> EcsResult<()> {
        self.world.remove_relation::<T>(self.entity, target)
    }

    /// Links this entity to a shared object.
    pub fn add_object<T: Send + Sync + 'static>(&self, handle: &ObjectHandle) -> EcsResult<()> {
        self.world.add_object::<T>(self.entity, handle)
    }

    /// Unlinks this entity from a shared object.
    pub fn remove_object<T: Send + Sync + 'static>(&self, handle: &ObjectHandle) -> EcsResult<()> {
        self.world.remove_object::<T>(self.entity, handle)
    }

    /// Destroys the entity.
    pub fn despawn(&self) -> EcsResult<()> {
        self.world.despawn(self.entity)
    }

    /// Returns `true` if the entity is alive.
    pub fn is_alive(&self) -> bool {
        self.world.is_alive(self.entity)
    }

    /// Returns the entity's current storage coordinates.
    pub fn location(&self) -> EcsResult<EntityLocation> {
        self.world.locate(self.entity)
    }
}
