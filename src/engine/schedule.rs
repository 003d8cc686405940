//! System scheduling and staged execution.
//!
//! The schedule groups registered systems into **stages** such that systems
//! within one stage do not conflict on declared key access; all systems of a
//! stage may run in parallel, and stages execute sequentially.
//!
//! The world lock is held across each stage, so structural changes issued by
//! any system land in the deferral log and drain exactly at the stage
//! boundary — every stage observes a structurally stable world.

use rayon::prelude::*;

use crate::engine::error::EcsResult;
use crate::engine::key::{KeyCatalog, KeyPattern};
use crate::engine::systems::System;
use crate::engine::types::Access;
use crate::engine::world::World;

fn conflicts(
    a: &[(KeyPattern, Access)],
    b: &[(KeyPattern, Access)],
    catalog: &KeyCatalog,
) -> bool {
    a.iter().any(|(pattern_a, access_a)| {
        b.iter().any(|(pattern_b, access_b)| {
            (access_a.is_write() || access_b.is_write())
                && catalog.overlaps(pattern_a, pattern_b)
        })
    })
}

/// One conflict-free group of systems.
#[derive(Default)]
pub struct Stage {
    /// Indices into the schedule's system list.
    pub system_indices: Vec<usize>,
    /// Union of the stage's declared accesses.
    aggregate: Vec<(KeyPattern, Access)>,
}

impl Stage {
    /// Returns `true` if `access` does not conflict with this stage.
    fn can_accept(&self, access: &[(KeyPattern, Access)], catalog: &KeyCatalog) -> bool {
        !conflicts(access, &self.aggregate, catalog)
    }

    fn push(&mut self, index: usize, access: Vec<(KeyPattern, Access)>) {
        self.system_indices.push(index);
        self.aggregate.extend(access);
    }
}

/// Stores systems and executes them in conflict-free parallel stages.
pub struct Schedule {
    systems: Vec<Box<dyn System>>,
    plan: Vec<Stage>,
    dirty: bool,
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new()
    }
}

impl Schedule {
    /// Creates an empty schedule.
    pub fn new() -> Self {
        Self { systems: Vec::new(), plan: Vec::new(), dirty: true }
    }

    /// Number of registered systems.
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    /// Returns `true` if no systems are registered.
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    /// Removes all systems and stages.
    pub fn clear(&mut self) {
        self.systems.clear();
        self.plan.clear();
        self.dirty = true;
    }

    /// Registers a boxed system.
    pub fn add_boxed(&mut self, system: Box<dyn System>) {
        self.systems.push(system);
        self.dirty = true;
    }

    /// Registers a concrete system.
    pub fn add_system<S: System + 'static>(&mut self, system: S) {
        self.add_boxed(Box::new(system));
    }

    /// Rebuilds stages if systems changed since the last run.
    ///
    /// Placement is greedy in registration order: each system joins the
    /// first stage it does not conflict with, keeping execution order
    /// deterministic for a fixed registration sequence.
    fn rebuild(&mut self, catalog: &KeyCatalog) {
        if !self.dirty {
            return;
        }
        self.plan.clear();
        for (index, system) in self.systems.iter().enumerate() {
            let access = system.access();
            let placed = self
                .plan
                .iter_mut()
                .find(|stage| stage.can_accept(&access, catalog));
            match placed {
                Some(stage) => stage.push(index, access),
                None => {
                    let mut stage = Stage::default();
                    stage.push(index, access);
                    self.plan.push(stage);
                }
            }
        }
        self.dirty = false;
    }

    /// Runs the schedule once.
    ///
    /// Each stage executes its systems on the rayon pool. The world lock is
    /// held for the duration of a stage; deferred structural operations
    /// drain at the stage boundary.
    pub fn run(&mut self, world: &World) -> EcsResult<()> {
        {
            let catalog = world.catalog()?;
            self.rebuild(&catalog);
        }

        for stage in &self.plan {
            world.acquire_lock();
            let outcome = stage
                .system_indices
                .par_iter()
                .try_for_each(|&index| self.systems[index].run(world));
            let drained = world.release_lock();
            outcome?;
            drained?;
        }
        Ok(())
    }
}
