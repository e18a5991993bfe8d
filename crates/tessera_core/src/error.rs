//! # Store Error Types
//!
//! The store distinguishes three kinds of failure:
//!
//! - [`SchemaViolation`] - the caller referenced something the schema never
//!   declared, or passed a value of the wrong shape. Programmer error, fail fast.
//! - [`StoreError::EntityNotFound`] - a normal runtime outcome (racing deletes,
//!   stale handles). Callers decide whether it matters.
//! - [`StoreError::Corrupted`] - an internal invariant is broken. Never swallowed.

use thiserror::Error;

use crate::entity::Entity;

/// A reference to something the schema does not declare, or a value that
/// does not fit the declared shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaViolation {
    /// Component name was never declared.
    #[error("unknown component: {0}")]
    UnknownComponent(String),

    /// Named archetype was never declared.
    #[error("unknown archetype: {0}")]
    UnknownArchetype(String),

    /// Resource name was never declared.
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// Transaction name was never registered.
    #[error("unknown transaction: {0}")]
    UnknownTransaction(String),

    /// Value shape does not match the column or field.
    #[error("type mismatch for {component}: expected {expected}")]
    TypeMismatch {
        /// Component (or struct field path) being written.
        component: String,
        /// Human readable description of the expected shape.
        expected: String,
    },

    /// Component is not a column of the target archetype.
    #[error("component {component} is not part of archetype {archetype}")]
    NotInArchetype {
        /// Component name.
        component: String,
        /// Archetype index.
        archetype: u32,
    },

    /// Row index past the end of an archetype column.
    #[error("row {row} is out of range for column {component}")]
    RowOutOfRange {
        /// Component name.
        component: String,
        /// Requested row.
        row: usize,
    },

    /// The core `id` column cannot be written by callers.
    #[error("the id component is managed by the store")]
    IdIsReadOnly,

    /// Two schema fragments declare the same name differently.
    #[error("conflicting declarations for {0}")]
    Conflict(String),

    /// Declaration itself is malformed.
    #[error("invalid declaration: {0}")]
    InvalidDeclaration(String),
}

/// Errors returned by store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The entity is not live: never created, out of range, or deleted.
    #[error("entity not found: {0}")]
    EntityNotFound(Entity),

    /// Schema violation (see [`SchemaViolation`]).
    #[error(transparent)]
    Schema(#[from] SchemaViolation),

    /// Internal consistency failure. Indicates a bug in the store.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// A transaction body aborted with its own reason.
    #[error("transaction aborted: {0}")]
    Aborted(String),

    /// Schema configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StoreError {
    /// Returns `true` for the recoverable "entity not found" outcome.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::EntityNotFound(_))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
