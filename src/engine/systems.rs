//! System abstractions.
//!
//! A **system** is a unit of logic that operates over one world. Systems:
//! - declare the key patterns they read and write,
//! - are grouped into stages by access conflicts,
//! - may execute in parallel with other systems of their stage,
//! - perform structural changes only through the deferral log (their
//!   runners hold the world lock while iterating).
//!
//! [`FnSystem`] defines a system from a closure without a dedicated type;
//! this is the preferred mechanism for most simulation logic.

use crate::engine::error::EcsResult;
use crate::engine::key::KeyPattern;
use crate::engine::types::Access;
use crate::engine::world::World;

/// A unit of executable logic operating on a world.
///
/// Systems must be `Send + Sync` so a schedule can run non-conflicting
/// systems on worker threads.
pub trait System: Send + Sync {
    /// Human-readable name, used in logs.
    fn name(&self) -> &str;

    /// Key patterns this system accesses, with their access modes.
    ///
    /// The schedule serializes systems whose declared accesses overlap with
    /// at least one write; everything else may run concurrently.
    fn access(&self) -> Vec<(KeyPattern, Access)>;

    /// Executes the system logic against the world.
    fn run(&self, world: &World) -> EcsResult<()>;
}

/// A [`System`] backed by a function or closure.
pub struct FnSystem<F>
where
    F: Fn(&World) -> EcsResult<()> + Send + Sync,
{
    name: &'static str,
    access: Vec<(KeyPattern, Access)>,
    action: F,
}

impl<F> FnSystem<F>
where
    F: Fn(&World) -> EcsResult<()> + Send + Sync,
{
    /// Creates a new function-backed system.
    ///
    /// `access` must cover every pattern the closure's queries select;
    /// undeclared access defeats conflict detection.
    pub fn new(name: &'static str, access: Vec<(KeyPattern, Access)>, action: F) -> Self {
        Self { name, access, action }
    }
}

impl<F> System for FnSystem<F>
where
    F: Fn(&World) -> EcsResult<()> + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    fn access(&self) -> Vec<(KeyPattern, Access)> {
        self.access.clone()
    }

    fn run(&self, world: &World) -> EcsResult<()> {
        (self.action)(world)
    }
}
