//! Query construction and archetype matching.
//!
//! A query is assembled from an ordered list of *selects* (key patterns whose
//! columns are streamed to the action, each with a declared access mode) and
//! a set of *filters* constraining archetype signatures. Compiling a query
//! yields a [`Stream`], which caches the matched archetype set and exposes
//! the dispatch runners.
//!
//! ## Matching
//!
//! An archetype matches when every select pattern matches at least one key in
//! its signature and every filter is satisfied. Wildcard selects may match
//! several keys in one archetype; dispatch then visits every combination.
//!
//! ## Cache invalidation
//!
//! Archetypes are created on demand and never destroyed, so a compiled
//! stream only ever needs to examine archetypes created since it last
//! looked. Each stream keeps a cursor into the world's archetype list and
//! tests the suffix lazily before dispatch; admitted archetypes stay matched
//! for the stream's lifetime.
//!
//! ## Aliasing
//!
//! Compilation rejects queries whose selects could resolve to the same
//! column with conflicting access. The check is conservative: two patterns
//! conflict when they can match a common key and at least one of them
//! writes.

use std::any::type_name;
use std::sync::{Arc, Mutex};

use crate::engine::archetype::Archetype;
use crate::engine::error::{AliasingError, EcsError, EcsResult};
use crate::engine::key::{KeyCatalog, KeyPattern};
use crate::engine::types::{Access, ArchetypeId, KeyId};
use crate::engine::world::World;

/// One selected column pattern with its declared access mode.
#[derive(Clone, Debug)]
pub(crate) struct Select {
    pub(crate) pattern: KeyPattern,
    pub(crate) access: Access,
    /// Element type name for diagnostics.
    pub(crate) label: &'static str,
}

/// Signature filter applied during archetype matching.
#[derive(Clone, Debug)]
pub enum QueryFilter {
    /// At least one key matching the pattern must be present.
    Has(KeyPattern),
    /// No key matching the pattern may be present.
    Not(KeyPattern),
    /// At least one of the patterns must match some key.
    AnyOf(Vec<KeyPattern>),
    /// Every pattern must match some key.
    AllOf(Vec<KeyPattern>),
}

/// Builder for queries over one world.
///
/// The builder is consumed by [`QueryBuilder::compile`], ensuring a query
/// definition cannot be mutated after compilation.
pub struct QueryBuilder<'w> {
    world: &'w World,
    selects: Vec<Select>,
    filters: Vec<QueryFilter>,
}

impl<'w> QueryBuilder<'w> {
    pub(crate) fn new(world: &'w World) -> Self {
        Self { world, selects: Vec::new(), filters: Vec::new() }
    }

    /// Selects the plain component `T` for reading.
    pub fn read<T: Send + Sync + 'static>(mut self) -> Self {
        self.selects.push(Select {
            pattern: KeyPattern::plain::<T>(),
            access: Access::Read,
            label: type_name::<T>(),
        });
        self
    }

    /// Selects the plain component `T` for writing.
    pub fn write<T: Send + Sync + 'static>(mut self) -> Self {
        self.selects.push(Select {
            pattern: KeyPattern::plain::<T>(),
            access: Access::Write,
            label: type_name::<T>(),
        });
        self
    }

    /// Selects columns matching an arbitrary pattern for reading.
    pub fn read_pattern(mut self, pattern: KeyPattern) -> Self {
        self.selects.push(Select { pattern, access: Access::Read, label: "<pattern>" });
        self
    }

    /// Selects columns matching an arbitrary pattern for writing.
    pub fn write_pattern(mut self, pattern: KeyPattern) -> Self {
        self.selects.push(Select { pattern, access: Access::Write, label: "<pattern>" });
        self
    }

    /// Requires the plain component `T` to be present, without selecting it.
    pub fn has<T: Send + Sync + 'static>(self) -> Self {
        self.has_pattern(KeyPattern::plain::<T>())
    }

    /// Requires a key matching `pattern` to be present.
    pub fn has_pattern(mut self, pattern: KeyPattern) -> Self {
        self.filters.push(QueryFilter::Has(pattern));
        self
    }

    /// Excludes archetypes bearing the plain component `T`.
    pub fn without<T: Send + Sync + 'static>(self) -> Self {
        self.without_pattern(KeyPattern::plain::<T>())
    }

    /// Excludes archetypes with any key matching `pattern`.
    pub fn without_pattern(mut self, pattern: KeyPattern) -> Self {
        self.filters.push(QueryFilter::Not(pattern));
        self
    }

    /// Requires at least one of the patterns to match some key.
    pub fn any_of(mut self, patterns: Vec<KeyPattern>) -> Self {
        self.filters.push(QueryFilter::AnyOf(patterns));
        self
    }

    /// Requires every pattern to match some key.
    pub fn all_of(mut self, patterns: Vec<KeyPattern>) -> Self {
        self.filters.push(QueryFilter::AllOf(patterns));
        self
    }

    /// Compiles the query into a dispatchable [`Stream`].
    ///
    /// ## Errors
    /// Fails with an aliasing error if two selects could resolve to the same
    /// column and at least one of them writes.
    pub fn compile(self) -> EcsResult<Stream<'w>> {
        {
            let catalog = self.world.catalog()?;
            for (i, a) in self.selects.iter().enumerate() {
                for b in self.selects.iter().skip(i + 1) {
                    if (a.access.is_write() || b.access.is_write())
                        && catalog.overlaps(&a.pattern, &b.pattern)
                    {
                        return Err(AliasingError { type_name: a.label }.into());
                    }
                }
            }
        }
        Ok(Stream {
            world: self.world,
            selects: self.selects.into_boxed_slice(),
            filters: self.filters.into_boxed_slice(),
            cache: Mutex::new(MatchCache::default()),
        })
    }
}

#[derive(Default)]
struct MatchCache {
    matched: Vec<ArchetypeId>,
    /// Number of archetypes already tested; the world's list is append-only.
    examined: usize,
}

/// A compiled query bound to its world.
///
/// Holds the cached matched-archetype set and exposes the dispatch runners
/// (`for_each*`, `job*`, `raw*`, `blit`, `count`) defined in the stream
/// module.
pub struct Stream<'w> {
    pub(crate) world: &'w World,
    pub(crate) selects: Box<[Select]>,
    pub(crate) filters: Box<[QueryFilter]>,
    cache: Mutex<MatchCache>,
}

impl<'w> Stream<'w> {
    /// World this stream was compiled against.
    pub fn world(&self) -> &'w World {
        self.world
    }

    fn pattern_present(catalog: &KeyCatalog, archetype: &Archetype, pattern: &KeyPattern) -> bool {
        archetype.signature().keys().iter().any(|&key| catalog.matches(key, pattern))
    }

    fn matches_archetype(
        catalog: &KeyCatalog,
        selects: &[Select],
        filters: &[QueryFilter],
        archetype: &Archetype,
    ) -> bool {
        if !selects
            .iter()
            .all(|select| Self::pattern_present(catalog, archetype, &select.pattern))
        {
            return false;
        }
        filters.iter().all(|filter| match filter {
            QueryFilter::Has(pattern) => Self::pattern_present(catalog, archetype, pattern),
            QueryFilter::Not(pattern) => !Self::pattern_present(catalog, archetype, pattern),
            QueryFilter::AnyOf(patterns) => {
                patterns.iter().any(|pattern| Self::pattern_present(catalog, archetype, pattern))
            }
            QueryFilter::AllOf(patterns) => {
                patterns.iter().all(|pattern| Self::pattern_present(catalog, archetype, pattern))
            }
        })
    }

    /// Tests archetypes created since the last refresh and admits matches.
    fn refresh(&self) -> EcsResult<()> {
        let archetypes = self.world.archetype_list()?;
        let catalog = self.world.catalog()?;
        let mut cache = self.cache.lock().map_err(|_| EcsError::poisoned("query cache"))?;
        while cache.examined < archetypes.len() {
            let archetype = &archetypes[cache.examined];
            if Self::matches_archetype(&catalog, &self.selects, &self.filters, archetype) {
                cache.matched.push(archetype.id());
            }
            cache.examined += 1;
        }
        Ok(())
    }

    /// Snapshot of the matched archetype set, refreshed lazily.
    pub(crate) fn matched_archetypes(&self) -> EcsResult<Vec<Arc<Archetype>>> {
        self.refresh()?;
        let cache = self.cache.lock().map_err(|_| EcsError::poisoned("query cache"))?;
        cache.matched.iter().map(|&id| self.world.archetype(id)).collect()
    }

    /// Keys of `archetype` matching the select at `index`, in signature order.
    pub(crate) fn matching_keys(
        &self,
        catalog: &KeyCatalog,
        archetype: &Archetype,
        index: usize,
    ) -> Vec<KeyId> {
        let pattern = &self.selects[index].pattern;
        archetype
            .signature()
            .keys()
            .iter()
            .copied()
            .filter(|&key| catalog.matches(key, pattern))
            .collect()
    }

    /// Number of entities currently matched by this query.
    ///
    /// Counts rows, not row × wildcard-column combinations.
    pub fn count(&self) -> EcsResult<usize> {
        let mut total = 0;
        for archetype in self.matched_archetypes()? {
            total += archetype.len()?;
        }
        Ok(total)
    }
}
