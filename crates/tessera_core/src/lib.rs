//! # Tessera Core
//!
//! In-memory, schema-driven entity/component store with columnar storage.
//!
//! - Components are declared once as [`SchemaFragment`]s and frozen into a [`Store`]
//! - Entities with the same component set share an [`Archetype`]; each
//!   component is a [`TypedBuffer`] column split into scalar leaves
//! - Adding or removing a component migrates the entity between archetypes
//! - Entity ids are dense `u32`s recycled LIFO by the [`EntityLocationTable`]
//! - Mutations run as [`Transaction`]s, optionally recording undo/redo logs
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera_core::{ComponentSchema, ScalarKind, SchemaFragment, Shape, Store, Value};
//!
//! let schema = SchemaFragment::new()
//!     .with_component("mass", ComponentSchema::new(Shape::F32))
//!     .with_component("velocity", ComponentSchema::new(Shape::array(ScalarKind::F32, 3)));
//! let mut store = Store::new(schema)?;
//!
//! let body = store.spawn(&[("mass".to_owned(), Value::F32(1.0))].into())?;
//! store.update(body, &[("velocity".to_owned(), Value::f32s(&[0.0, 1.0, 0.0]))].into())?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]
#![allow(clippy::module_name_repetitions)]

pub mod archetype;
pub mod buffer;
pub mod database;
pub mod entity;
pub mod error;
pub mod query;
pub mod resource;
pub mod schema;
pub mod store;
pub mod transaction;

pub use archetype::{Archetype, ArchetypeId, ColumnMut};
pub use buffer::{ScalarColumn, TypedBuffer};
pub use database::{Database, TransactionFn};
pub use entity::{Entity, EntityLocation, EntityLocationTable};
pub use error::{SchemaViolation, StoreError, StoreResult};
pub use query::{ArchetypeQuery, ComponentFilter};
pub use resource::Resources;
pub use schema::{
    ComponentSchema, ComponentValues, Field, LeafSlot, ScalarKind, SchemaFragment, Shape,
    StructLayout, Value, ID_COMPONENT,
};
pub use store::Store;
pub use transaction::{Transaction, TransactionResult, TxValue, WriteOperation};
