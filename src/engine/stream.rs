//! # Stream runners
//!
//! A [`Stream`] binds a compiled query to user actions through four families
//! of runners:
//!
//! | family      | granularity    | parallelism        | delivery                         |
//! |-------------|----------------|--------------------|----------------------------------|
//! | `for_each*` | per entity     | single thread      | typed refs, ascending row order  |
//! | `job*`      | per entity     | rayon worker pool  | typed refs, no ordering          |
//! | `raw*`      | per archetype  | single thread      | one contiguous slice per column  |
//! | `blit`      | per archetype  | single thread      | bulk overwrite with a constant   |
//!
//! The base dispatch is not directly callable; a typed adapter matching the
//! query's declared select list must be used, and each adapter validates
//! that agreement before touching storage.
//!
//! ## Wildcards
//!
//! When a select pattern is a wildcard, dispatch visits every column in the
//! archetype that matches it: the action runs once per (row, matching-column
//! combination). Relation adapters additionally surface each matched
//! column's target entity.
//!
//! ## Uniforms
//!
//! `*_with` variants thread a caller-supplied *uniform* — an opaque constant
//! passed unchanged to every action invocation. This is the canonical way to
//! feed per-frame constants (delta time, gravity) into the hot loop without
//! capture. Job uniforms are shared by reference across workers.
//!
//! ## Locking
//!
//! Every runner increments the world lock counter on entry and decrements it
//! on exit; the outermost exit drains the structural deferral log. Actions
//! may therefore freely call spawn/despawn/add/remove on the stream's world:
//! the operations land in the log and apply after the runner returns.
//!
//! Column access uses try-locks: a conflicting writer in a nested runner
//! surfaces as an aliasing error instead of deadlocking. Actions in `job*`
//! runners must be pure with respect to rows other than the one passed to
//! them; the adapters hand out only the row's own references to make
//! violation awkward.

use std::any::TypeId;
use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard, TryLockError};

use rayon::prelude::*;

use crate::engine::archetype::Archetype;
use crate::engine::error::{AliasingError, EcsError, EcsResult, SelectMismatchError};
use crate::engine::query::Stream;
use crate::engine::storage::{column_slice, column_slice_mut, ColumnStorage};
use crate::engine::types::{Access, Entity, KeyId};

/// Row-range granularity for parallel partitioning inside one archetype.
const JOB_CHUNK: usize = 1024;

struct ResolvedArchetype {
    archetype: Arc<Archetype>,
    /// Matched keys per select, in signature order.
    keys: Vec<Vec<KeyId>>,
}

fn read_guard<'a>(
    archetype: &'a Archetype,
    key: KeyId,
    label: &'static str,
) -> EcsResult<RwLockReadGuard<'a, Box<dyn ColumnStorage>>> {
    let lock = archetype.value_column(key).ok_or_else(|| {
        EcsError::Internal(format!("select `{label}` resolved to a non-value column"))
    })?;
    match lock.try_read() {
        Ok(guard) => Ok(guard),
        Err(TryLockError::WouldBlock) => Err(AliasingError { type_name: label }.into()),
        Err(TryLockError::Poisoned(_)) => Err(EcsError::poisoned("column")),
    }
}

fn write_guard<'a>(
    archetype: &'a Archetype,
    key: KeyId,
    label: &'static str,
) -> EcsResult<RwLockWriteGuard<'a, Box<dyn ColumnStorage>>> {
    let lock = archetype.value_column(key).ok_or_else(|| {
        EcsError::Internal(format!("select `{label}` resolved to a non-value column"))
    })?;
    match lock.try_write() {
        Ok(guard) => Ok(guard),
        Err(TryLockError::WouldBlock) => Err(AliasingError { type_name: label }.into()),
        Err(TryLockError::Poisoned(_)) => Err(EcsError::poisoned("column")),
    }
}

fn rows_guard(archetype: &Archetype) -> EcsResult<RwLockReadGuard<'_, Vec<Entity>>> {
    archetype.rows().read().map_err(|_| EcsError::poisoned("archetype rows"))
}

fn typed_slice<'a, T: 'static>(
    guard: &'a RwLockReadGuard<'_, Box<dyn ColumnStorage>>,
    label: &'static str,
) -> EcsResult<&'a [T]> {
    column_slice::<T>(&***guard)
        .ok_or_else(|| EcsError::Internal(format!("column for `{label}` has unexpected type")))
}

fn typed_slice_mut<'a, T: 'static>(
    guard: &'a mut RwLockWriteGuard<'_, Box<dyn ColumnStorage>>,
    label: &'static str,
) -> EcsResult<&'a mut [T]> {
    column_slice_mut::<T>(&mut ***guard)
        .ok_or_else(|| EcsError::Internal(format!("column for `{label}` has unexpected type")))
}

impl<'w> Stream<'w> {
    fn label(&self, index: usize) -> &'static str {
        self.selects[index].label
    }

    /// Validates that the select at `index` agrees with a typed adapter.
    fn expect_select<T: 'static>(&self, index: usize, access: Access) -> EcsResult<()> {
        let Some(select) = self.selects.get(index) else {
            return Err(SelectMismatchError { index, expected: "a select at this position" }.into());
        };
        if select.access != access {
            let expected =
                if access.is_write() { "write access" } else { "read access" };
            return Err(SelectMismatchError { index, expected }.into());
        }
        let catalog = self.world.catalog()?;
        match catalog.pattern_type_id(&select.pattern) {
            Some(type_id) if type_id == TypeId::of::<T>() => Ok(()),
            Some(_) => Err(SelectMismatchError { index, expected: "matching element type" }.into()),
            // Unresolvable exact keys are caught at downcast time.
            None => Ok(()),
        }
    }

    /// Resolves the matched set to concrete per-select key lists.
    fn resolve(&self) -> EcsResult<Vec<ResolvedArchetype>> {
        let matched = self.matched_archetypes()?;
        let catalog = self.world.catalog()?;
        let mut resolved = Vec::with_capacity(matched.len());
        for archetype in matched {
            let keys = (0..self.selects.len())
                .map(|index| self.matching_keys(&catalog, &archetype, index))
                .collect();
            resolved.push(ResolvedArchetype { archetype, keys });
        }
        Ok(resolved)
    }

    /// Runs `body` with the world lock held, draining deferred structural
    /// operations on the outermost release.
    fn run_locked<R>(&self, body: impl FnOnce() -> EcsResult<R>) -> EcsResult<R> {
        self.world.acquire_lock();
        let outcome = body();
        let drained = self.world.release_lock();
        match (outcome, drained) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(error), _) => Err(error),
            (Ok(_), Err(error)) => Err(error),
        }
    }

    /// Visits every (archetype, matching-column combination) pair.
    fn each_combination(
        resolved: &[ResolvedArchetype],
        mut visit: impl FnMut(&Arc<Archetype>, &[KeyId]) -> EcsResult<()>,
    ) -> EcsResult<()> {
        for entry in resolved {
            if entry.keys.iter().any(|list| list.is_empty()) {
                continue;
            }
            let mut combination: Vec<KeyId> =
                entry.keys.iter().map(|list| list[0]).collect();
            let mut odometer = vec![0usize; entry.keys.len()];
            loop {
                visit(&entry.archetype, &combination)?;

                let mut position = entry.keys.len();
                while position > 0 {
                    let slot = position - 1;
                    odometer[slot] += 1;
                    if odometer[slot] < entry.keys[slot].len() {
                        combination[slot] = entry.keys[slot][odometer[slot]];
                        break;
                    }
                    odometer[slot] = 0;
                    combination[slot] = entry.keys[slot][0];
                    position -= 1;
                }
                if position == 0 {
                    break;
                }
            }
        }
        Ok(())
    }

    fn relation_target_of(&self, key: KeyId) -> EcsResult<Entity> {
        self.world
            .catalog()?
            .relation_target(key)
            .ok_or_else(|| EcsError::Internal("relation select matched a non-relation key".into()))
    }

    // ── For: per entity, single thread, ascending row order ────────────

    /// Visits every matched row with a shared reference to the selected
    /// component. Select: `[read A]`.
    pub fn for_each<A: 'static>(&self, mut action: impl FnMut(&A)) -> EcsResult<()> {
        self.expect_select::<A>(0, Access::Read)?;
        self.run_locked(|| {
            let resolved = self.resolve()?;
            Self::each_combination(&resolved, |archetype, keys| {
                let guard = read_guard(archetype, keys[0], self.label(0))?;
                for value in typed_slice::<A>(&guard, self.label(0))? {
                    action(value);
                }
                Ok(())
            })
        })
    }

    /// Visits every matched row with a mutable reference to the selected
    /// component. Select: `[write A]`.
    pub fn for_each_mut<A: 'static>(&self, mut action: impl FnMut(&mut A)) -> EcsResult<()> {
        self.expect_select::<A>(0, Access::Write)?;
        self.run_locked(|| {
            let resolved = self.resolve()?;
            Self::each_combination(&resolved, |archetype, keys| {
                let mut guard = write_guard(archetype, keys[0], self.label(0))?;
                for value in typed_slice_mut::<A>(&mut guard, self.label(0))?.iter_mut() {
                    action(value);
                }
                Ok(())
            })
        })
    }

    /// [`Stream::for_each_mut`] with a uniform threaded to every invocation.
    pub fn for_each_mut_with<A: 'static, U>(
        &self,
        uniform: &U,
        mut action: impl FnMut(&mut A, &U),
    ) -> EcsResult<()> {
        self.for_each_mut(|value: &mut A| action(value, uniform))
    }

    /// Visits every matched row together with its entity identifier.
    /// Select: `[read A]`.
    pub fn for_each_entity<A: 'static>(
        &self,
        mut action: impl FnMut(Entity, &A),
    ) -> EcsResult<()> {
        self.expect_select::<A>(0, Access::Read)?;
        self.run_locked(|| {
            let resolved = self.resolve()?;
            Self::each_combination(&resolved, |archetype, keys| {
                let rows = rows_guard(archetype)?;
                let guard = read_guard(archetype, keys[0], self.label(0))?;
                for (row, value) in typed_slice::<A>(&guard, self.label(0))?.iter().enumerate() {
                    action(rows[row], value);
                }
                Ok(())
            })
        })
    }

    /// Mutable variant of [`Stream::for_each_entity`]. Select: `[write A]`.
    pub fn for_each_entity_mut<A: 'static>(
        &self,
        mut action: impl FnMut(Entity, &mut A),
    ) -> EcsResult<()> {
        self.expect_select::<A>(0, Access::Write)?;
        self.run_locked(|| {
            let resolved = self.resolve()?;
            Self::each_combination(&resolved, |archetype, keys| {
                let rows = rows_guard(archetype)?;
                let mut guard = write_guard(archetype, keys[0], self.label(0))?;
                for (row, value) in
                    typed_slice_mut::<A>(&mut guard, self.label(0))?.iter_mut().enumerate()
                {
                    action(rows[row], value);
                }
                Ok(())
            })
        })
    }

    /// Visits every matched row reading `A` and writing `B`.
    /// Selects: `[read A, write B]`.
    pub fn for_each2<A: 'static, B: 'static>(
        &self,
        mut action: impl FnMut(&A, &mut B),
    ) -> EcsResult<()> {
        self.expect_select::<A>(0, Access::Read)?;
        self.expect_select::<B>(1, Access::Write)?;
        self.run_locked(|| {
            let resolved = self.resolve()?;
            Self::each_combination(&resolved, |archetype, keys| {
                let a_guard = read_guard(archetype, keys[0], self.label(0))?;
                let mut b_guard = write_guard(archetype, keys[1], self.label(1))?;
                let a = typed_slice::<A>(&a_guard, self.label(0))?;
                let b = typed_slice_mut::<B>(&mut b_guard, self.label(1))?;
                debug_assert_eq!(a.len(), b.len(), "column length mismatch within archetype");
                for (a_value, b_value) in a.iter().zip(b.iter_mut()) {
                    action(a_value, b_value);
                }
                Ok(())
            })
        })
    }

    /// [`Stream::for_each2`] with a uniform.
    pub fn for_each2_with<A: 'static, B: 'static, U>(
        &self,
        uniform: &U,
        mut action: impl FnMut(&A, &mut B, &U),
    ) -> EcsResult<()> {
        self.for_each2(|a: &A, b: &mut B| action(a, b, uniform))
    }

    /// Visits every matched row reading two components.
    /// Selects: `[read A, read B]`.
    pub fn for_each_read2<A: 'static, B: 'static>(
        &self,
        mut action: impl FnMut(&A, &B),
    ) -> EcsResult<()> {
        self.expect_select::<A>(0, Access::Read)?;
        self.expect_select::<B>(1, Access::Read)?;
        self.run_locked(|| {
            let resolved = self.resolve()?;
            Self::each_combination(&resolved, |archetype, keys| {
                let a_guard = read_guard(archetype, keys[0], self.label(0))?;
                let b_guard = read_guard(archetype, keys[1], self.label(1))?;
                let a = typed_slice::<A>(&a_guard, self.label(0))?;
                let b = typed_slice::<B>(&b_guard, self.label(1))?;
                for (a_value, b_value) in a.iter().zip(b.iter()) {
                    action(a_value, b_value);
                }
                Ok(())
            })
        })
    }

    // ── For over relations ─────────────────────────────────────────────

    /// Visits every (row, matching relation column) combination, surfacing
    /// the source entity, the relation target, and the relation value.
    /// Select: `[read R]` where the pattern is a relation or wildcard.
    pub fn for_each_relation<R: 'static>(
        &self,
        mut action: impl FnMut(Entity, Entity, &R),
    ) -> EcsResult<()> {
        self.expect_select::<R>(0, Access::Read)?;
        self.run_locked(|| {
            let resolved = self.resolve()?;
            Self::each_combination(&resolved, |archetype, keys| {
                let target = self.relation_target_of(keys[0])?;
                let rows = rows_guard(archetype)?;
                let guard = read_guard(archetype, keys[0], self.label(0))?;
                for (row, value) in typed_slice::<R>(&guard, self.label(0))?.iter().enumerate() {
                    action(rows[row], target, value);
                }
                Ok(())
            })
        })
    }

    /// Visits every (row, matching relation column) combination writing `A`
    /// and reading the relation `R`, with a uniform.
    /// Selects: `[write A, read R]`.
    pub fn for_each_relation_mut_with<A: 'static, R: 'static, U>(
        &self,
        uniform: &U,
        mut action: impl FnMut(&mut A, &R, Entity, &U),
    ) -> EcsResult<()> {
        self.expect_select::<A>(0, Access::Write)?;
        self.expect_select::<R>(1, Access::Read)?;
        self.run_locked(|| {
            let resolved = self.resolve()?;
            Self::each_combination(&resolved, |archetype, keys| {
                let target = self.relation_target_of(keys[1])?;
                let mut a_guard = write_guard(archetype, keys[0], self.label(0))?;
                let r_guard = read_guard(archetype, keys[1], self.label(1))?;
                let a = typed_slice_mut::<A>(&mut a_guard, self.label(0))?;
                let r = typed_slice::<R>(&r_guard, self.label(1))?;
                for (a_value, r_value) in a.iter_mut().zip(r.iter()) {
                    action(a_value, r_value, target, uniform);
                }
                Ok(())
            })
        })
    }

    /// Visits every (row, matching relation column) combination writing `A`
    /// and reading `B` alongside the relation `R`, with a uniform.
    /// Selects: `[write A, read B, read R]`.
    pub fn for_each2_relation_with<A: 'static, B: 'static, R: 'static, U>(
        &self,
        uniform: &U,
        mut action: impl FnMut(&mut A, &B, &R, Entity, &U),
    ) -> EcsResult<()> {
        self.expect_select::<A>(0, Access::Write)?;
        self.expect_select::<B>(1, Access::Read)?;
        self.expect_select::<R>(2, Access::Read)?;
        self.run_locked(|| {
            let resolved = self.resolve()?;
            Self::each_combination(&resolved, |archetype, keys| {
                let target = self.relation_target_of(keys[2])?;
                let mut a_guard = write_guard(archetype, keys[0], self.label(0))?;
                let b_guard = read_guard(archetype, keys[1], self.label(1))?;
                let r_guard = read_guard(archetype, keys[2], self.label(2))?;
                let a = typed_slice_mut::<A>(&mut a_guard, self.label(0))?;
                let b = typed_slice::<B>(&b_guard, self.label(1))?;
                let r = typed_slice::<R>(&r_guard, self.label(2))?;
                for ((a_value, b_value), r_value) in a.iter_mut().zip(b.iter()).zip(r.iter()) {
                    action(a_value, b_value, r_value, target, uniform);
                }
                Ok(())
            })
        })
    }

    // ── For over object links ──────────────────────────────────────────

    /// Visits every matched row writing `A` and reading the shared object
    /// `O` linked by the select. The same object reference is surfaced for
    /// every row, as if stored per-row.
    /// Selects: `[write A, read object-link of O]`.
    pub fn for_each_object_mut<A: 'static, O: 'static>(
        &self,
        mut action: impl FnMut(&mut A, &O),
    ) -> EcsResult<()> {
        self.expect_select::<A>(0, Access::Write)?;
        self.expect_select::<O>(1, Access::Read)?;
        self.run_locked(|| {
            let resolved = self.resolve()?;
            Self::each_combination(&resolved, |archetype, keys| {
                let handle = archetype.shared_object(keys[1]).ok_or_else(|| {
                    EcsError::Internal("object-link select matched a value column".into())
                })?;
                let object = handle.get::<O>().ok_or(SelectMismatchError {
                    index: 1,
                    expected: "object of the adapter type",
                })?;
                let mut guard = write_guard(archetype, keys[0], self.label(0))?;
                for value in typed_slice_mut::<A>(&mut guard, self.label(0))?.iter_mut() {
                    action(value, object);
                }
                Ok(())
            })
        })
    }

    // ── Job: per entity, work-stealing pool ────────────────────────────

    /// Parallel per-entity dispatch writing the selected component.
    ///
    /// Work is partitioned by archetype and, within an archetype, by
    /// contiguous row ranges. No ordering across rows is guaranteed; the
    /// action must be commutative and must not touch rows other than the
    /// one passed to it. Select: `[write A]`.
    pub fn job_mut<A: Send + 'static>(
        &self,
        action: impl Fn(&mut A) + Send + Sync,
    ) -> EcsResult<()> {
        self.expect_select::<A>(0, Access::Write)?;
        self.run_locked(|| {
            let resolved = self.resolve()?;
            Self::each_combination(&resolved, |archetype, keys| {
                let mut guard = write_guard(archetype, keys[0], self.label(0))?;
                typed_slice_mut::<A>(&mut guard, self.label(0))?
                    .par_chunks_mut(JOB_CHUNK)
                    .for_each(|chunk| {
                        for value in chunk {
                            action(value);
                        }
                    });
                Ok(())
            })
        })
    }

    /// [`Stream::job_mut`] with a uniform shared across workers.
    pub fn job_mut_with<A: Send + 'static, U: Sync>(
        &self,
        uniform: &U,
        action: impl Fn(&mut A, &U) + Send + Sync,
    ) -> EcsResult<()> {
        self.job_mut(|value: &mut A| action(value, uniform))
    }

    /// Parallel per-entity dispatch reading `A` and writing `B`, with a
    /// uniform. Selects: `[read A, write B]`.
    pub fn job2_with<A: Sync + 'static, B: Send + 'static, U: Sync>(
        &self,
        uniform: &U,
        action: impl Fn(&A, &mut B, &U) + Send + Sync,
    ) -> EcsResult<()> {
        self.expect_select::<A>(0, Access::Read)?;
        self.expect_select::<B>(1, Access::Write)?;
        self.run_locked(|| {
            let resolved = self.resolve()?;
            Self::each_combination(&resolved, |archetype, keys| {
                let a_guard = read_guard(archetype, keys[0], self.label(0))?;
                let mut b_guard = write_guard(archetype, keys[1], self.label(1))?;
                let a = typed_slice::<A>(&a_guard, self.label(0))?;
                let b = typed_slice_mut::<B>(&mut b_guard, self.label(1))?;
                debug_assert_eq!(a.len(), b.len(), "column length mismatch within archetype");
                b.par_chunks_mut(JOB_CHUNK).enumerate().for_each(|(chunk_index, chunk)| {
                    let base = chunk_index * JOB_CHUNK;
                    for (offset, b_value) in chunk.iter_mut().enumerate() {
                        action(&a[base + offset], b_value, uniform);
                    }
                });
                Ok(())
            })
        })
    }

    // ── Raw: per archetype, contiguous buffer views ────────────────────

    /// Delivers one contiguous read-only slice per matching archetype (and
    /// per matching column under a wildcard). Select: `[read A]`.
    pub fn raw<A: 'static>(&self, mut action: impl FnMut(&[A])) -> EcsResult<()> {
        self.expect_select::<A>(0, Access::Read)?;
        self.run_locked(|| {
            let resolved = self.resolve()?;
            Self::each_combination(&resolved, |archetype, keys| {
                let guard = read_guard(archetype, keys[0], self.label(0))?;
                action(typed_slice::<A>(&guard, self.label(0))?);
                Ok(())
            })
        })
    }

    /// Mutable variant of [`Stream::raw`]. Select: `[write A]`.
    pub fn raw_mut<A: 'static>(&self, mut action: impl FnMut(&mut [A])) -> EcsResult<()> {
        self.expect_select::<A>(0, Access::Write)?;
        self.run_locked(|| {
            let resolved = self.resolve()?;
            Self::each_combination(&resolved, |archetype, keys| {
                let mut guard = write_guard(archetype, keys[0], self.label(0))?;
                action(typed_slice_mut::<A>(&mut guard, self.label(0))?);
                Ok(())
            })
        })
    }

    // ── Blit: bulk overwrite ───────────────────────────────────────────

    /// Overwrites every matched row of the selected column with clones of a
    /// constant. Select: `[write A]`.
    pub fn blit<A: Clone + 'static>(&self, value: A) -> EcsResult<()> {
        self.raw_mut(|slice: &mut [A]| {
            for slot in slice {
                *slot = value.clone();
            }
        })
    }
}
