//! Error types for identity, storage, and query operations.
//!
//! This module declares focused, composable error types used across the
//! store. Each error carries enough context to make failures actionable
//! while remaining small and cheap to pass around or convert into the
//! aggregate [`EcsError`].
//!
//! ## Goals
//! * **Specificity:** each type models a single failure mode (stale entity
//!   handles, aliased column selection, out-of-bounds rows, type mismatches).
//! * **Ergonomics:** all errors implement [`std::error::Error`] and
//!   [`fmt::Display`], and provide `From<T>` conversions into [`EcsError`]
//!   so call sites can use `?` throughout.
//! * **Policy:** recoverable, caller-visible conditions (stale identifiers,
//!   aliasing conflicts) are explicit variants. Structural no-ops are *not*
//!   errors; they are silent and logged. Internal invariants that cannot be
//!   violated by well-typed use surface as [`EcsError::Internal`] and should
//!   be treated as fatal.

use std::any::TypeId;
use std::fmt;

use crate::engine::types::{KeyId, Row};

/// Convenience result alias used across the crate.
pub type EcsResult<T> = Result<T, EcsError>;

/// Returned when an `Entity` handle is no longer valid.
///
/// This covers despawned entities whose generation no longer matches live
/// storage, and identifiers issued by a different world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleEntityError;

impl fmt::Display for StaleEntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("stale or foreign entity reference")
    }
}

impl std::error::Error for StaleEntityError {}

/// Returned when a query selects overlapping keys with conflicting access,
/// or when a dispatched runner finds a selected column already borrowed for
/// writing by another active runner.
///
/// ### Fields
/// * `type_name` — element type of the conflicting selection, for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AliasingError {
    /// Element type name of the conflicting selection.
    pub type_name: &'static str,
}

impl fmt::Display for AliasingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "aliasing conflict on component `{}`", self.type_name)
    }
}

impl std::error::Error for AliasingError {}

/// Returned when a row index addresses component storage outside its
/// valid bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowOutOfBoundsError {
    /// Row index that was addressed.
    pub row: Row,
    /// Number of valid rows in the column.
    pub length: usize,
}

impl fmt::Display for RowOutOfBoundsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {} out of bounds (column length {})", self.row, self.length)
    }
}

impl std::error::Error for RowOutOfBoundsError {}

/// Returned when a value's dynamic type does not match the element type of
/// the column it is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMismatchError {
    /// Element type declared by the destination column.
    pub expected: TypeId,
    /// Dynamic type of the provided value.
    pub actual: TypeId,
}

impl fmt::Display for TypeMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type mismatch: expected {:?}, actual {:?}", self.expected, self.actual)
    }
}

impl std::error::Error for TypeMismatchError {}

/// Aggregate error for column (component storage) operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnError {
    /// A row index addressed storage outside valid bounds.
    Row(RowOutOfBoundsError),
    /// The dynamic type of a value did not match the column element type.
    TypeMismatch(TypeMismatchError),
    /// Index arithmetic overflowed while constructing a row index.
    ///
    /// The string identifies which index overflowed.
    IndexOverflow(&'static str),
}

impl fmt::Display for ColumnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnError::Row(e) => write!(f, "{e}"),
            ColumnError::TypeMismatch(e) => write!(f, "{e}"),
            ColumnError::IndexOverflow(which) => write!(f, "index overflow constructing {which}"),
        }
    }
}

impl std::error::Error for ColumnError {}

impl From<RowOutOfBoundsError> for ColumnError {
    fn from(e: RowOutOfBoundsError) -> Self {
        ColumnError::Row(e)
    }
}

impl From<TypeMismatchError> for ColumnError {
    fn from(e: TypeMismatchError) -> Self {
        ColumnError::TypeMismatch(e)
    }
}

/// Errors that can occur while relocating an entity row between archetypes.
///
/// These generally indicate internal inconsistencies or violated invariants
/// rather than recoverable user-facing failures.
#[derive(Debug)]
pub enum MoveError {
    /// A column named by an archetype signature was missing from storage.
    InconsistentStorage,
    /// No value was supplied for a key present only in the destination.
    MissingAddedValue {
        /// Key whose value was required but absent.
        key: KeyId,
    },
    /// A column-level operation failed during the move.
    Column {
        /// Key whose column failed.
        key: KeyId,
        /// Underlying column error.
        source_error: ColumnError,
    },
    /// Column storages disagreed on the row placement of an entity.
    RowMisalignment {
        /// Expected row.
        expected: Row,
        /// Row actually produced.
        got: Row,
        /// Key whose column was misaligned.
        key: KeyId,
    },
    /// Swap-remove operations yielded inconsistent relocation metadata.
    InconsistentSwapInfo,
    /// Entity metadata could not be updated consistently after the move.
    MetadataFailure,
}

impl fmt::Display for MoveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveError::InconsistentStorage => {
                f.write_str("column storage is inconsistent with the archetype signature")
            }
            MoveError::MissingAddedValue { key } => {
                write!(f, "no value supplied for added key {key}")
            }
            MoveError::Column { key, source_error } => {
                write!(f, "column operation failed for key {key}: {source_error}")
            }
            MoveError::RowMisalignment { expected, got, key } => {
                write!(f, "key {key} storage misaligned: expected row {expected}, got {got}")
            }
            MoveError::InconsistentSwapInfo => {
                f.write_str("swap-remove produced inconsistent relocation metadata")
            }
            MoveError::MetadataFailure => {
                f.write_str("failed to update entity metadata after a row move")
            }
        }
    }
}

impl std::error::Error for MoveError {}

/// Returned when a component read names a key the entity does not bear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingComponentError {
    /// Element type name of the missing component.
    pub type_name: &'static str,
}

impl fmt::Display for MissingComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing component: {}", self.type_name)
    }
}

impl std::error::Error for MissingComponentError {}

/// Returned when a typed runner adapter does not agree with the selects
/// declared by the query it is dispatched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectMismatchError {
    /// Position of the offending select.
    pub index: usize,
    /// What the adapter expected at that position.
    pub expected: &'static str,
}

impl fmt::Display for SelectMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "select {} does not match runner adapter (expected {})", self.index, self.expected)
    }
}

impl std::error::Error for SelectMismatchError {}

/// Top-level error type for world, query, and runner operations.
#[derive(Debug)]
pub enum EcsError {
    /// An entity handle was stale, despawned, or from another world.
    Stale(StaleEntityError),
    /// A selected column was aliased with conflicting access.
    Aliasing(AliasingError),
    /// A column storage operation failed.
    Column(ColumnError),
    /// An archetype row move failed.
    Move(MoveError),
    /// A component read named a key the entity does not bear.
    Missing(MissingComponentError),
    /// A typed runner adapter disagreed with the query's select list.
    SelectMismatch(SelectMismatchError),
    /// An internal invariant was violated. Treated as fatal.
    Internal(String),
}

impl EcsError {
    /// Builds the internal-error variant used when a lock is poisoned.
    pub(crate) fn poisoned(what: &'static str) -> Self {
        EcsError::Internal(format!("{what} lock poisoned"))
    }
}

impl fmt::Display for EcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcsError::Stale(e) => write!(f, "{e}"),
            EcsError::Aliasing(e) => write!(f, "{e}"),
            EcsError::Column(e) => write!(f, "{e}"),
            EcsError::Move(e) => write!(f, "{e}"),
            EcsError::Missing(e) => write!(f, "{e}"),
            EcsError::SelectMismatch(e) => write!(f, "{e}"),
            EcsError::Internal(message) => write!(f, "internal invariant violated: {message}"),
        }
    }
}

impl std::error::Error for EcsError {}

impl From<StaleEntityError> for EcsError {
    fn from(e: StaleEntityError) -> Self {
        EcsError::Stale(e)
    }
}

impl From<AliasingError> for EcsError {
    fn from(e: AliasingError) -> Self {
        EcsError::Aliasing(e)
    }
}

impl From<ColumnError> for EcsError {
    fn from(e: ColumnError) -> Self {
        EcsError::Column(e)
    }
}

impl From<TypeMismatchError> for EcsError {
    fn from(e: TypeMismatchError) -> Self {
        EcsError::Column(ColumnError::TypeMismatch(e))
    }
}

impl From<MoveError> for EcsError {
    fn from(e: MoveError) -> Self {
        EcsError::Move(e)
    }
}

impl From<MissingComponentError> for EcsError {
    fn from(e: MissingComponentError) -> Self {
        EcsError::Missing(e)
    }
}

impl From<SelectMismatchError> for EcsError {
    fn from(e: SelectMismatchError) -> Self {
        EcsError::SelectMismatch(e)
    }
}
