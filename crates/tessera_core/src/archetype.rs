//! # Archetype Tables
//!
//! An archetype holds every entity that has exactly one particular set of
//! components, one [`TypedBuffer`] per component:
//!
//! ```text
//! archetype {id, mass, velocity}
//!
//!        id   mass   velocity
//! row 0  #4   1.0    [0, 1, 0]
//! row 1  #9   2.5    [1, 0, 0]
//! row 2  #2   1.0    [0, 0, 0]
//! ```
//!
//! Rows are dense. Deleting a row moves the last row into the hole, so row
//! indices are not stable; the store fixes up the moved entity's location.

use std::fmt;

use crate::buffer::TypedBuffer;
use crate::entity::Entity;
use crate::error::{SchemaViolation, StoreError, StoreResult};
use crate::schema::{ComponentValues, Value, ID_COMPONENT};

/// Index of an archetype within its store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ArchetypeId(u32);

impl ArchetypeId {
    /// Creates an id from a raw index.
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Raw index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ArchetypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "archetype {}", self.0)
    }
}

/// Table of entities sharing one component set.
#[derive(Debug)]
pub struct Archetype {
    id: ArchetypeId,
    /// Sorted component names, parallel to `columns`.
    names: Vec<String>,
    columns: Vec<TypedBuffer>,
    id_column: usize,
    rows: usize,
}

impl Archetype {
    /// Creates an empty archetype from its columns.
    ///
    /// Columns are sorted by name; duplicates are dropped.
    ///
    /// # Errors
    ///
    /// [`StoreError::Corrupted`] if there is no `id` column.
    pub fn new(id: ArchetypeId, mut columns: Vec<TypedBuffer>) -> StoreResult<Self> {
        columns.sort_by(|a, b| a.name().cmp(b.name()));
        columns.dedup_by(|a, b| a.name() == b.name());
        let names: Vec<String> = columns.iter().map(|c| c.name().to_owned()).collect();
        let id_column = names
            .binary_search_by(|n| n.as_str().cmp(ID_COMPONENT))
            .map_err(|_| StoreError::Corrupted(format!("{id} has no id column")))?;

        Ok(Self {
            id,
            names,
            columns,
            id_column,
            rows: 0,
        })
    }

    /// This archetype's id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Number of rows.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rows
    }

    /// Returns `true` if the archetype has no rows.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Component names in sorted order, `id` included.
    #[inline]
    #[must_use]
    pub fn component_names(&self) -> &[String] {
        &self.names
    }

    /// Returns `true` if `name` is one of this archetype's columns.
    #[inline]
    #[must_use]
    pub fn has_component(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Column by component name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&TypedBuffer> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    /// Writable view of a column by component name. The `id` column is never
    /// handed out, and the view cannot add or remove rows.
    pub fn column_mut(&mut self, name: &str) -> Option<ColumnMut<'_>> {
        match self.column_index(name) {
            Some(i) if i != self.id_column => Some(ColumnMut {
                column: &mut self.columns[i],
            }),
            _ => None,
        }
    }

    /// Entity stored at `row`.
    #[must_use]
    pub fn entity_at(&self, row: usize) -> Option<Entity> {
        if row >= self.rows {
            return None;
        }
        self.columns[self.id_column]
            .leaf(0)
            .and_then(|leaf| leaf.as_u32())
            .and_then(|ids| ids.get(row))
            .map(|&raw| Entity::new(raw))
    }

    /// Entities in row order.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.columns[self.id_column]
            .leaf(0)
            .and_then(|leaf| leaf.as_u32())
            .unwrap_or(&[])
            .iter()
            .map(|&raw| Entity::new(raw))
    }

    /// Values of every component at `row`, `id` included.
    #[must_use]
    pub fn row_values(&self, row: usize) -> Option<ComponentValues> {
        if row >= self.rows {
            return None;
        }
        self.names
            .iter()
            .zip(&self.columns)
            .map(|(name, column)| column.get(row).map(|v| (name.clone(), v)))
            .collect()
    }

    /// Checks that every defined value names a writable column and fits its shape.
    ///
    /// `Undefined` entries are ignored.
    ///
    /// # Errors
    ///
    /// The first [`SchemaViolation`] found.
    pub fn check_values(&self, values: &ComponentValues) -> Result<(), SchemaViolation> {
        for (name, value) in values {
            if name == ID_COMPONENT {
                return Err(SchemaViolation::IdIsReadOnly);
            }
            if value.is_undefined() {
                continue;
            }
            let index = self
                .column_index(name)
                .ok_or_else(|| SchemaViolation::NotInArchetype {
                    component: name.clone(),
                    archetype: self.id.get(),
                })?;
            let column = &self.columns[index];
            if !column.shape().matches(value) {
                return Err(SchemaViolation::TypeMismatch {
                    component: name.clone(),
                    expected: column.shape().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Appends a row for `entity`, using `values` where given and defaults
    /// otherwise. Nothing is written if any value is rejected.
    ///
    /// # Returns
    ///
    /// The new row index. The caller registers the entity's location.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation`] if a value names a foreign column, the `id`
    /// column, or has the wrong shape.
    pub(crate) fn insert(&mut self, entity: Entity, values: &ComponentValues) -> Result<usize, SchemaViolation> {
        self.check_values(values)?;
        for (i, column) in self.columns.iter_mut().enumerate() {
            if i == self.id_column {
                column.push(&Value::U32(entity.index()))?;
                continue;
            }
            match values.get(column.name()) {
                Some(value) if !value.is_undefined() => {
                    column.push(value)?;
                }
                _ => {
                    column.push_default();
                }
            }
        }
        self.rows += 1;
        Ok(self.rows - 1)
    }

    /// Overwrites components of an existing row in place. Does not allocate
    /// for packable components.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation`] as for [`insert`](Self::insert). Nothing is
    /// written if any value is rejected.
    pub fn update_row(&mut self, row: usize, values: &ComponentValues) -> StoreResult<()> {
        if row >= self.rows {
            return Err(StoreError::Corrupted(format!("{} has no row {row}", self.id)));
        }
        self.check_values(values)?;
        for (name, value) in values {
            if value.is_undefined() {
                continue;
            }
            if let Some(index) = self.column_index(name) {
                self.columns[index].set(row, value)?;
            }
        }
        Ok(())
    }

    /// Overwrites components of an existing row, writing the column default
    /// wherever `values` holds `Undefined`. Keys outside the archetype are
    /// skipped when `Undefined`.
    ///
    /// # Errors
    ///
    /// As for [`update_row`](Self::update_row).
    pub(crate) fn restore_row(&mut self, row: usize, values: &ComponentValues) -> StoreResult<()> {
        if row >= self.rows {
            return Err(StoreError::Corrupted(format!("{} has no row {row}", self.id)));
        }
        self.check_values(values)?;
        for (name, value) in values {
            let Some(index) = self.column_index(name) else {
                continue;
            };
            let column = &mut self.columns[index];
            if value.is_undefined() {
                let default = column.default_value().clone();
                column.set(row, &default)?;
            } else {
                column.set(row, value)?;
            }
        }
        Ok(())
    }

    /// Removes `row`, moving the last row into its place.
    ///
    /// # Returns
    ///
    /// The entity that now occupies `row`, if a row was moved.
    ///
    /// # Errors
    ///
    /// [`StoreError::Corrupted`] if `row` does not exist.
    pub(crate) fn delete(&mut self, row: usize) -> StoreResult<Option<Entity>> {
        if row >= self.rows {
            return Err(StoreError::Corrupted(format!("{} has no row {row}", self.id)));
        }
        let last = self.rows - 1;
        let moved = if row == last { None } else { self.entity_at(last) };
        for column in &mut self.columns {
            column.swap_remove(row);
        }
        self.rows -= 1;
        Ok(moved)
    }

    /// Moves `row` into `destination`.
    ///
    /// Shared columns are copied, `overrides` are applied to destination
    /// columns, everything else gets its default. The row is then deleted
    /// from this archetype.
    ///
    /// # Returns
    ///
    /// `(new_row, moved)`: the row in `destination` and the entity that was
    /// swapped into the vacated row here, if any.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation`] if an override does not fit the destination, or
    /// [`StoreError::Corrupted`] if `row` does not exist.
    pub(crate) fn migrate_row(
        &mut self,
        destination: &mut Self,
        row: usize,
        overrides: &ComponentValues,
    ) -> StoreResult<(usize, Option<Entity>)> {
        if row >= self.rows {
            return Err(StoreError::Corrupted(format!("{} has no row {row}", self.id)));
        }
        destination.check_values(overrides)?;

        for column in &mut destination.columns {
            match overrides.get(column.name()) {
                Some(value) if !value.is_undefined() => {
                    column.push(value)?;
                }
                _ => match self.column_index(column.name()) {
                    Some(source) => {
                        column.push_from(&self.columns[source], row)?;
                    }
                    None => {
                        column.push_default();
                    }
                },
            }
        }
        destination.rows += 1;

        let moved = self.delete(row)?;
        Ok((destination.rows - 1, moved))
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.names.binary_search_by(|n| n.as_str().cmp(name)).ok()
    }
}

/// Writable view of one archetype column.
///
/// Rows can be overwritten but not added or removed, so every column keeps
/// the archetype's row count.
pub struct ColumnMut<'a> {
    column: &'a mut TypedBuffer,
}

impl ColumnMut<'_> {
    /// Component name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.column.name()
    }

    /// Number of rows.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.column.len()
    }

    /// Returns `true` if the column has no rows.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.column.is_empty()
    }

    /// Read access to the underlying buffer.
    #[must_use]
    pub fn as_buffer(&self) -> &TypedBuffer {
        self.column
    }

    /// Overwrites an existing row.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation::RowOutOfRange`] if `row` does not exist, or
    /// [`SchemaViolation::TypeMismatch`] if `value` does not fit the shape.
    pub fn set(&mut self, row: usize, value: &Value) -> Result<(), SchemaViolation> {
        if row >= self.column.len() {
            return Err(SchemaViolation::RowOutOfRange {
                component: self.column.name().to_owned(),
                row,
            });
        }
        self.column.set(row, value)
    }
}
