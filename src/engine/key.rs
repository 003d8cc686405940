//! # Component key catalog
//!
//! Components are keyed not by type alone but by a composite identity: a
//! `(type, role, target)` triple. This module interns those triples to
//! compact [`KeyId`] values so signature operations hash and compare small
//! integers, and provides the pattern algebra queries use to match keys.
//!
//! ## Roles
//!
//! - [`KeyRole::Plain`] — an ordinary component; the target is absent.
//! - [`KeyRole::Relation`] — a component whose identity includes a target
//!   *entity*. `Follows(a)` and `Follows(b)` are distinct keys and occupy
//!   distinct columns.
//! - [`KeyRole::ObjectLink`] — a component whose identity includes a shared
//!   heap object. All entities bearing the key see the same object; the
//!   column physically stores one reference per archetype.
//!
//! ## Why wildcards
//!
//! Relations proliferate keys: a query such as "every entity, with all of
//! its `Follows(*)` relations" must enumerate every matching column in every
//! matching archetype without the caller naming targets. [`KeyPattern`]
//! expresses exact keys, per-role wildcards, and specific targets under one
//! matching operation.
//!
//! ## Registration
//!
//! The catalog also carries the per-type metadata and storage factory the
//! archetype store needs to allocate columns from a `KeyId` alone. Types
//! register implicitly on first typed use; relation keys are minted at
//! runtime as targets appear, so the key space is open-ended by design.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::engine::error::TypeMismatchError;
use crate::engine::types::{Entity, KeyId};

/// Semantic role of a component key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyRole {
    /// Ordinary component, no target.
    Plain,
    /// Entity-targeted relation component.
    Relation,
    /// Shared-object link component.
    ObjectLink,
}

/// Opaque handle to a heap object shared across entities.
///
/// Identity is the allocation, not the value: two handles are equal iff they
/// reference the same object. Cloning a handle is cheap and never clones the
/// object.
#[derive(Clone)]
pub struct ObjectHandle {
    object: Arc<dyn Any + Send + Sync>,
}

impl ObjectHandle {
    /// Wraps a value in a new shared handle.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self { object: Arc::new(value) }
    }

    /// Borrows the underlying object as `T`, if it is one.
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }

    /// Returns a typed shared reference to the underlying object.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.object).downcast::<T>().ok()
    }

    /// `TypeId` of the wrapped object.
    pub fn object_type_id(&self) -> TypeId {
        self.object.as_ref().type_id()
    }

    #[inline]
    fn identity(&self) -> usize {
        Arc::as_ptr(&self.object) as *const () as usize
    }
}

impl PartialEq for ObjectHandle {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for ObjectHandle {}

impl Hash for ObjectHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle({:#x})", self.identity())
    }
}

/// Target component of a key triple.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyTarget {
    /// No target (plain components).
    None,
    /// Another entity (relations).
    Entity(Entity),
    /// A shared object (object links).
    Object(ObjectHandle),
}

/// Metadata recorded for an interned key.
pub struct KeyInfo {
    /// `TypeId` of the component value type.
    pub type_id: TypeId,
    /// Rust name of the component value type.
    pub type_name: &'static str,
    /// Semantic role.
    pub role: KeyRole,
    /// Relation or object-link target.
    pub target: KeyTarget,
    /// Factory for empty column storage. `None` for object links, which
    /// store no per-row values.
    pub(crate) factory: Option<fn() -> Box<dyn crate::engine::storage::ColumnStorage>>,
}

/// Per-world intern table mapping key triples to compact [`KeyId`]s.
///
/// ## Invariants
/// - `KeyId` values are dense, stable, and unique for the catalog lifetime.
/// - Every value-bearing key has a storage factory.
/// - Interning the same triple twice yields the same id.
#[derive(Default)]
pub struct KeyCatalog {
    keys: Vec<KeyInfo>,
    index: HashMap<(TypeId, KeyRole, KeyTarget), KeyId>,
}

impl KeyCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of interned keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if no keys have been interned.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn intern_with(
        &mut self,
        type_id: TypeId,
        type_name: &'static str,
        role: KeyRole,
        target: KeyTarget,
        factory: Option<fn() -> Box<dyn crate::engine::storage::ColumnStorage>>,
    ) -> KeyId {
        if let Some(&existing) = self.index.get(&(type_id, role, target.clone())) {
            return existing;
        }
        let id = self.keys.len() as KeyId;
        self.index.insert((type_id, role, target.clone()), id);
        self.keys.push(KeyInfo { type_id, type_name, role, target, factory });
        id
    }

    /// Interns the plain key for component type `T`.
    pub fn intern_plain<T: Send + Sync + 'static>(&mut self) -> KeyId {
        self.intern_with(
            TypeId::of::<T>(),
            type_name::<T>(),
            KeyRole::Plain,
            KeyTarget::None,
            Some(crate::engine::storage::new_column::<T>),
        )
    }

    /// Interns the relation key for component type `T` toward `target`.
    pub fn intern_relation<T: Send + Sync + 'static>(&mut self, target: Entity) -> KeyId {
        self.intern_with(
            TypeId::of::<T>(),
            type_name::<T>(),
            KeyRole::Relation,
            KeyTarget::Entity(target),
            Some(crate::engine::storage::new_column::<T>),
        )
    }

    /// Interns the object-link key for object type `T` behind `handle`.
    ///
    /// ## Errors
    /// Fails if the handle does not actually wrap a `T`.
    pub fn intern_object<T: Send + Sync + 'static>(
        &mut self,
        handle: &ObjectHandle,
    ) -> Result<KeyId, TypeMismatchError> {
        if handle.get::<T>().is_none() {
            return Err(TypeMismatchError {
                expected: TypeId::of::<T>(),
                actual: handle.object_type_id(),
            });
        }
        Ok(self.intern_with(
            TypeId::of::<T>(),
            type_name::<T>(),
            KeyRole::ObjectLink,
            KeyTarget::Object(handle.clone()),
            None,
        ))
    }

    /// Returns the metadata for an interned key.
    pub fn info(&self, key: KeyId) -> Option<&KeyInfo> {
        self.keys.get(key as usize)
    }

    /// Returns the role of an interned key.
    pub fn role(&self, key: KeyId) -> Option<KeyRole> {
        self.info(key).map(|info| info.role)
    }

    /// Returns the target of an interned key, if it has one.
    pub fn target(&self, key: KeyId) -> Option<&KeyTarget> {
        self.info(key).map(|info| &info.target).filter(|t| !matches!(t, KeyTarget::None))
    }

    /// Returns the relation target entity of `key`, if it is a relation.
    pub fn relation_target(&self, key: KeyId) -> Option<Entity> {
        match self.target(key) {
            Some(KeyTarget::Entity(entity)) => Some(*entity),
            _ => None,
        }
    }

    /// Tests whether an interned key matches a pattern.
    pub fn matches(&self, key: KeyId, pattern: &KeyPattern) -> bool {
        let Some(info) = self.info(key) else { return false };
        match pattern {
            KeyPattern::Exact(id) => key == *id,
            KeyPattern::Plain(t) => info.role == KeyRole::Plain && info.type_id == *t,
            KeyPattern::Any(t) => info.type_id == *t,
            KeyPattern::AnyEntity(t) => info.role == KeyRole::Relation && info.type_id == *t,
            KeyPattern::AnyObject(t) => info.role == KeyRole::ObjectLink && info.type_id == *t,
            KeyPattern::Target(t, entity) => {
                info.type_id == *t && info.target == KeyTarget::Entity(*entity)
            }
            KeyPattern::Object(t, handle) => {
                info.type_id == *t && info.target == KeyTarget::Object(handle.clone())
            }
        }
    }

    /// Element type id a pattern constrains keys to.
    pub(crate) fn pattern_type_id(&self, pattern: &KeyPattern) -> Option<TypeId> {
        match pattern {
            KeyPattern::Exact(id) => self.info(*id).map(|info| info.type_id),
            KeyPattern::Plain(t)
            | KeyPattern::Any(t)
            | KeyPattern::AnyEntity(t)
            | KeyPattern::AnyObject(t)
            | KeyPattern::Target(t, _)
            | KeyPattern::Object(t, _) => Some(*t),
        }
    }

    /// Conservative test for whether two patterns can match a common key.
    ///
    /// Used to reject aliased selections: a query must not select the same
    /// column twice when one selection writes.
    pub fn overlaps(&self, a: &KeyPattern, b: &KeyPattern) -> bool {
        match (self.pattern_type_id(a), self.pattern_type_id(b)) {
            (Some(ta), Some(tb)) if ta != tb => return false,
            // Unresolvable exact keys are assumed to overlap.
            (None, _) | (_, None) => return true,
            _ => {}
        }

        let roles = |p: &KeyPattern| -> (bool, bool, bool) {
            // (plain, relation, object)
            match p {
                KeyPattern::Plain(_) => (true, false, false),
                KeyPattern::Any(_) => (true, true, true),
                KeyPattern::AnyEntity(_) | KeyPattern::Target(_, _) => (false, true, false),
                KeyPattern::AnyObject(_) | KeyPattern::Object(_, _) => (false, false, true),
                KeyPattern::Exact(id) => match self.role(*id) {
                    Some(KeyRole::Plain) => (true, false, false),
                    Some(KeyRole::Relation) => (false, true, false),
                    Some(KeyRole::ObjectLink) => (false, false, true),
                    None => (true, true, true),
                },
            }
        };

        let (ap, ar, ao) = roles(a);
        let (bp, br, bo) = roles(b);
        if !(ap && bp || ar && br || ao && bo) {
            return false;
        }

        // Same type and compatible role: distinct concrete targets are the
        // only remaining way to prove disjointness.
        match (self.pattern_target(a), self.pattern_target(b)) {
            (Some(ta), Some(tb)) => ta == tb,
            _ => true,
        }
    }

    fn pattern_target(&self, pattern: &KeyPattern) -> Option<KeyTarget> {
        match pattern {
            KeyPattern::Target(_, entity) => Some(KeyTarget::Entity(*entity)),
            KeyPattern::Object(_, handle) => Some(KeyTarget::Object(handle.clone())),
            KeyPattern::Exact(id) => self.info(*id).map(|info| info.target.clone()),
            _ => None,
        }
    }
}

/// Pattern matched against interned component keys.
///
/// Wildcard variants (`Any*`) match many concrete keys in one query; during
/// dispatch a runner visits every matching column of every matching
/// archetype.
#[derive(Clone, Debug)]
pub enum KeyPattern {
    /// The plain (untargeted) key of a type.
    Plain(TypeId),
    /// One specific interned key.
    Exact(KeyId),
    /// Any key of the type, regardless of role or target.
    Any(TypeId),
    /// Any relation key of the type.
    AnyEntity(TypeId),
    /// Any object-link key of the type.
    AnyObject(TypeId),
    /// The relation key of the type toward one specific entity.
    Target(TypeId, Entity),
    /// The object-link key of the type behind one specific handle.
    Object(TypeId, ObjectHandle),
}

impl KeyPattern {
    /// Plain component pattern for `T`.
    pub fn plain<T: 'static>() -> Self {
        KeyPattern::Plain(TypeId::of::<T>())
    }

    /// Any-role wildcard for `T`.
    pub fn any<T: 'static>() -> Self {
        KeyPattern::Any(TypeId::of::<T>())
    }

    /// Any-entity relation wildcard for `T`.
    pub fn any_entity<T: 'static>() -> Self {
        KeyPattern::AnyEntity(TypeId::of::<T>())
    }

    /// Any-object link wildcard for `T`.
    pub fn any_object<T: 'static>() -> Self {
        KeyPattern::AnyObject(TypeId::of::<T>())
    }

    /// Relation pattern for `T` toward a specific entity.
    pub fn target<T: 'static>(target: Entity) -> Self {
        KeyPattern::Target(TypeId::of::<T>(), target)
    }

    /// Object-link pattern for `T` behind a specific handle.
    pub fn object<T: 'static>(handle: &ObjectHandle) -> Self {
        KeyPattern::Object(TypeId::of::<T>(), handle.clone())
    }

    /// Returns `true` if this pattern can match more than one key.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, KeyPattern::Any(_) | KeyPattern::AnyEntity(_) | KeyPattern::AnyObject(_))
    }
}
