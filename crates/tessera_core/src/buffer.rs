//! # Typed Buffers
//!
//! One [`TypedBuffer`] per archetype column. Packable shapes are split into
//! one [`ScalarColumn`] per leaf (struct of arrays), so a whole leaf can be
//! handed to an external consumer as raw bytes without copying:
//!
//! ```text
//! transform: { position: [f32; 3], scale: f32 }
//!
//! leaf 0  position[0]  [x0, x1, x2, ...]
//! leaf 1  position[1]  [y0, y1, y2, ...]
//! leaf 2  position[2]  [z0, z1, z2, ...]
//! leaf 3  scale        [s0, s1, s2, ...]
//! ```
//!
//! Opaque columns keep whole [`Value`]s.
//!
//! Writing an existing row never allocates: the value is checked against the
//! shape first, then its leaves are written in place.

use bytemuck::{bytes_of, cast_slice};

use crate::error::SchemaViolation;
use crate::schema::{ComponentSchema, ScalarKind, Shape, StructLayout, Value};

/// Storage for one scalar leaf.
#[derive(Clone, Debug, PartialEq)]
pub enum ScalarColumn {
    /// `u32` and `bool` leaves.
    U32(Vec<u32>),
    /// `i32` leaves.
    I32(Vec<i32>),
    /// `f32` leaves.
    F32(Vec<f32>),
    /// `f64` leaves.
    F64(Vec<f64>),
}

impl ScalarColumn {
    /// Creates an empty column for `kind`.
    #[must_use]
    pub const fn for_kind(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::U32 | ScalarKind::Bool => Self::U32(Vec::new()),
            ScalarKind::I32 => Self::I32(Vec::new()),
            ScalarKind::F32 => Self::F32(Vec::new()),
            ScalarKind::F64 => Self::F64(Vec::new()),
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::U32(v) => v.len(),
            Self::I32(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
        }
    }

    /// Returns `true` if the column has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserved rows.
    #[must_use]
    pub fn capacity(&self) -> usize {
        match self {
            Self::U32(v) => v.capacity(),
            Self::I32(v) => v.capacity(),
            Self::F32(v) => v.capacity(),
            Self::F64(v) => v.capacity(),
        }
    }

    /// Raw bytes of every row, native endian.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::U32(v) => cast_slice(v),
            Self::I32(v) => cast_slice(v),
            Self::F32(v) => cast_slice(v),
            Self::F64(v) => cast_slice(v),
        }
    }

    /// `u32` view, if this is a `u32` column.
    #[must_use]
    pub fn as_u32(&self) -> Option<&[u32]> {
        match self {
            Self::U32(v) => Some(v),
            _ => None,
        }
    }

    /// `f32` view, if this is an `f32` column.
    #[must_use]
    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Self::F32(v) => Some(v),
            _ => None,
        }
    }

    fn read(&self, row: usize, kind: ScalarKind) -> Value {
        match self {
            Self::U32(v) if kind == ScalarKind::Bool => Value::Bool(v[row] != 0),
            Self::U32(v) => Value::U32(v[row]),
            Self::I32(v) => Value::I32(v[row]),
            Self::F32(v) => Value::F32(v[row]),
            Self::F64(v) => Value::F64(v[row]),
        }
    }

    fn equals(&self, row: usize, value: &Value) -> bool {
        match (self, value) {
            (Self::U32(v), Value::U32(x)) => v[row] == *x,
            (Self::U32(v), Value::Bool(b)) => v[row] == u32::from(*b),
            (Self::I32(v), Value::I32(x)) => v[row] == *x,
            (Self::F32(v), Value::F32(x)) => v[row] == *x,
            (Self::F64(v), Value::F64(x)) => v[row] == *x,
            (Self::F64(v), Value::F32(x)) => v[row] == f64::from(*x),
            _ => false,
        }
    }

    /// Writes a value already checked against the leaf kind.
    fn write(&mut self, row: usize, value: &Value) {
        match (self, value) {
            (Self::U32(v), Value::U32(x)) => v[row] = *x,
            (Self::U32(v), Value::Bool(b)) => v[row] = u32::from(*b),
            (Self::I32(v), Value::I32(x)) => v[row] = *x,
            (Self::F32(v), Value::F32(x)) => v[row] = *x,
            (Self::F64(v), Value::F64(x)) => v[row] = *x,
            (Self::F64(v), Value::F32(x)) => v[row] = f64::from(*x),
            _ => debug_assert!(false, "leaf write with unchecked value"),
        }
    }

    fn push(&mut self, value: &Value) {
        match (self, value) {
            (Self::U32(v), Value::U32(x)) => v.push(*x),
            (Self::U32(v), Value::Bool(b)) => v.push(u32::from(*b)),
            (Self::I32(v), Value::I32(x)) => v.push(*x),
            (Self::F32(v), Value::F32(x)) => v.push(*x),
            (Self::F64(v), Value::F64(x)) => v.push(*x),
            (Self::F64(v), Value::F32(x)) => v.push(f64::from(*x)),
            _ => debug_assert!(false, "leaf push with unchecked value"),
        }
    }

    fn push_from(&mut self, other: &Self, row: usize) {
        match (self, other) {
            (Self::U32(v), Self::U32(o)) => v.push(o[row]),
            (Self::I32(v), Self::I32(o)) => v.push(o[row]),
            (Self::F32(v), Self::F32(o)) => v.push(o[row]),
            (Self::F64(v), Self::F64(o)) => v.push(o[row]),
            _ => debug_assert!(false, "leaf copy between different kinds"),
        }
    }

    fn row_bytes(&self, row: usize) -> &[u8] {
        match self {
            Self::U32(v) => bytes_of(&v[row]),
            Self::I32(v) => bytes_of(&v[row]),
            Self::F32(v) => bytes_of(&v[row]),
            Self::F64(v) => bytes_of(&v[row]),
        }
    }

    fn swap_remove(&mut self, row: usize) {
        match self {
            Self::U32(v) => {
                v.swap_remove(row);
            }
            Self::I32(v) => {
                v.swap_remove(row);
            }
            Self::F32(v) => {
                v.swap_remove(row);
            }
            Self::F64(v) => {
                v.swap_remove(row);
            }
        }
    }

    fn truncate(&mut self, len: usize) {
        match self {
            Self::U32(v) => v.truncate(len),
            Self::I32(v) => v.truncate(len),
            Self::F32(v) => v.truncate(len),
            Self::F64(v) => v.truncate(len),
        }
    }

    fn reserve(&mut self, additional: usize) {
        match self {
            Self::U32(v) => v.reserve(additional),
            Self::I32(v) => v.reserve(additional),
            Self::F32(v) => v.reserve(additional),
            Self::F64(v) => v.reserve(additional),
        }
    }
}

#[derive(Clone, Debug)]
enum Storage {
    Leaves(Vec<ScalarColumn>),
    Opaque(Vec<Value>),
}

/// Growable column of values sharing one [`Shape`].
#[derive(Clone, Debug)]
pub struct TypedBuffer {
    name: String,
    shape: Shape,
    default: Value,
    kinds: Vec<ScalarKind>,
    layout: Option<StructLayout>,
    storage: Storage,
    len: usize,
}

impl TypedBuffer {
    /// Creates an empty buffer for the component `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, schema: &ComponentSchema) -> Self {
        let mut kinds = Vec::with_capacity(schema.shape.leaf_count());
        schema.shape.collect_leaves(&mut kinds);
        let storage = if schema.shape.is_opaque() {
            Storage::Opaque(Vec::new())
        } else {
            Storage::Leaves(kinds.iter().map(|k| ScalarColumn::for_kind(*k)).collect())
        };
        Self {
            name: name.into(),
            layout: StructLayout::of(&schema.shape),
            shape: schema.shape.clone(),
            default: schema.default.clone(),
            kinds,
            storage,
            len: 0,
        }
    }

    /// Component name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value shape.
    #[inline]
    #[must_use]
    pub const fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Default value for new rows.
    #[inline]
    #[must_use]
    pub const fn default_value(&self) -> &Value {
        &self.default
    }

    /// Number of rows.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if there are no rows.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Rows that fit without reallocating.
    #[must_use]
    pub fn capacity(&self) -> usize {
        match &self.storage {
            Storage::Leaves(columns) => columns
                .iter()
                .map(ScalarColumn::capacity)
                .min()
                .unwrap_or(0),
            Storage::Opaque(values) => values.capacity(),
        }
    }

    /// Reserves room for `additional` more rows.
    pub fn reserve(&mut self, additional: usize) {
        match &mut self.storage {
            Storage::Leaves(columns) => {
                for column in columns {
                    column.reserve(additional);
                }
            }
            Storage::Opaque(values) => values.reserve(additional),
        }
    }

    /// Reads one row.
    #[must_use]
    pub fn get(&self, row: usize) -> Option<Value> {
        if row >= self.len {
            return None;
        }
        match &self.storage {
            Storage::Leaves(columns) => {
                let mut leaf = 0;
                Some(rebuild(&self.shape, columns, &self.kinds, row, &mut leaf))
            }
            Storage::Opaque(values) => Some(values[row].clone()),
        }
    }

    /// Writes one row, growing the buffer with default rows if `row` is past the end.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation::TypeMismatch`] if `value` does not fit the shape.
    /// The buffer is unchanged in that case.
    pub fn set(&mut self, row: usize, value: &Value) -> Result<(), SchemaViolation> {
        self.check(value)?;
        while self.len <= row {
            self.push_default();
        }
        match &mut self.storage {
            Storage::Leaves(columns) => {
                let mut leaf = 0;
                visit_leaves(&self.shape, value, &mut leaf, &mut |i, v| columns[i].write(row, v));
            }
            Storage::Opaque(values) => values[row].clone_from(value),
        }
        Ok(())
    }

    /// Returns `true` if `row` holds the default value (or does not exist).
    #[must_use]
    pub fn is_default(&self, row: usize) -> bool {
        if row >= self.len {
            return true;
        }
        match &self.storage {
            Storage::Leaves(columns) => {
                let mut leaf = 0;
                let mut same = true;
                visit_leaves(&self.shape, &self.default, &mut leaf, &mut |i, v| {
                    same &= columns[i].equals(row, v);
                });
                same
            }
            Storage::Opaque(values) => values[row] == self.default,
        }
    }

    /// Appends a row.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation::TypeMismatch`] if `value` does not fit the shape.
    pub fn push(&mut self, value: &Value) -> Result<usize, SchemaViolation> {
        self.check(value)?;
        Ok(self.push_unchecked(value))
    }

    /// Appends a row holding the default value.
    pub fn push_default(&mut self) -> usize {
        let default = std::mem::take(&mut self.default);
        let row = self.push_unchecked(&default);
        self.default = default;
        row
    }

    /// Appends a copy of `other`'s row. Both buffers must share a shape.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation::TypeMismatch`] if the shapes differ.
    pub fn push_from(&mut self, other: &Self, row: usize) -> Result<usize, SchemaViolation> {
        if self.shape != other.shape || row >= other.len {
            return Err(self.mismatch());
        }
        let copied = match (&mut self.storage, &other.storage) {
            (Storage::Leaves(dst), Storage::Leaves(src)) => {
                for (d, s) in dst.iter_mut().zip(src) {
                    d.push_from(s, row);
                }
                true
            }
            (Storage::Opaque(dst), Storage::Opaque(src)) => {
                dst.push(src[row].clone());
                true
            }
            _ => false,
        };
        if !copied {
            return Err(self.mismatch());
        }
        self.len += 1;
        Ok(self.len - 1)
    }

    /// Removes `row` by moving the last row into it. O(1).
    ///
    /// Returns `false` if `row` is out of range.
    pub fn swap_remove(&mut self, row: usize) -> bool {
        if row >= self.len {
            return false;
        }
        match &mut self.storage {
            Storage::Leaves(columns) => {
                for column in columns {
                    column.swap_remove(row);
                }
            }
            Storage::Opaque(values) => {
                values.swap_remove(row);
            }
        }
        self.len -= 1;
        true
    }

    /// Shortens the buffer to `len` rows. Capacity is kept.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }
        match &mut self.storage {
            Storage::Leaves(columns) => {
                for column in columns {
                    column.truncate(len);
                }
            }
            Storage::Opaque(values) => values.truncate(len),
        }
        self.len = len;
    }

    /// Number of scalar leaves (zero for opaque columns).
    #[inline]
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.kinds.len()
    }

    /// One leaf column.
    #[must_use]
    pub fn leaf(&self, index: usize) -> Option<&ScalarColumn> {
        match &self.storage {
            Storage::Leaves(columns) => columns.get(index),
            Storage::Opaque(_) => None,
        }
    }

    /// Raw bytes of one leaf across every row, for bulk transfer.
    #[must_use]
    pub fn leaf_bytes(&self, index: usize) -> Option<&[u8]> {
        self.leaf(index).map(ScalarColumn::as_bytes)
    }

    /// Packed layout of one row. `None` for opaque columns.
    #[inline]
    #[must_use]
    pub const fn layout(&self) -> Option<&StructLayout> {
        self.layout.as_ref()
    }

    /// Writes `row` into `out` using the packed layout.
    ///
    /// Returns the number of bytes the layout spans, or `None` if the column
    /// is opaque, `row` is out of range or `out` is too small.
    pub fn write_packed(&self, row: usize, out: &mut [u8]) -> Option<usize> {
        let layout = self.layout.as_ref()?;
        let Storage::Leaves(columns) = &self.storage else {
            return None;
        };
        if row >= self.len || out.len() < layout.size() {
            return None;
        }
        for (slot, column) in layout.leaves().iter().zip(columns) {
            let bytes = column.row_bytes(row);
            out[slot.offset..slot.offset + bytes.len()].copy_from_slice(bytes);
        }
        Some(layout.size())
    }

    fn check(&self, value: &Value) -> Result<(), SchemaViolation> {
        if self.shape.matches(value) {
            Ok(())
        } else {
            Err(self.mismatch())
        }
    }

    fn mismatch(&self) -> SchemaViolation {
        SchemaViolation::TypeMismatch {
            component: self.name.clone(),
            expected: self.shape.to_string(),
        }
    }

    fn push_unchecked(&mut self, value: &Value) -> usize {
        match &mut self.storage {
            Storage::Leaves(columns) => {
                let mut leaf = 0;
                visit_leaves(&self.shape, value, &mut leaf, &mut |i, v| columns[i].push(v));
            }
            Storage::Opaque(values) => values.push(value.clone()),
        }
        self.len += 1;
        self.len - 1
    }
}

/// Calls `f(leaf_index, scalar)` for every leaf of a value already checked
/// against `shape`, in storage order.
fn visit_leaves(shape: &Shape, value: &Value, leaf: &mut usize, f: &mut impl FnMut(usize, &Value)) {
    match (shape, value) {
        (Shape::Scalar(_), v) => {
            f(*leaf, v);
            *leaf += 1;
        }
        (Shape::Array { .. }, Value::Array(items)) => {
            for item in items {
                f(*leaf, item);
                *leaf += 1;
            }
        }
        (Shape::Struct(fields), Value::Struct(map)) => {
            for field in fields {
                match map.get(&field.name) {
                    Some(v) => visit_leaves(&field.shape, v, leaf, f),
                    None => *leaf += field.shape.leaf_count(),
                }
            }
        }
        (shape, _) => *leaf += shape.leaf_count(),
    }
}

fn rebuild(
    shape: &Shape,
    columns: &[ScalarColumn],
    kinds: &[ScalarKind],
    row: usize,
    leaf: &mut usize,
) -> Value {
    match shape {
        Shape::Scalar(kind) => {
            let value = columns[*leaf].read(row, *kind);
            *leaf += 1;
            value
        }
        Shape::Array { len, .. } => {
            let items = (*leaf..*leaf + len)
                .map(|i| columns[i].read(row, kinds[i]))
                .collect();
            *leaf += len;
            Value::Array(items)
        }
        Shape::Struct(fields) => Value::Struct(
            fields
                .iter()
                .map(|f| (f.name.clone(), rebuild(&f.shape, columns, kinds, row, leaf)))
                .collect(),
        ),
        Shape::Opaque => Value::Undefined,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform_schema() -> ComponentSchema {
        ComponentSchema::new(Shape::structure([
            ("position", Shape::array(ScalarKind::F32, 3)),
            ("scale", Shape::F32),
        ]))
    }

    fn transform(x: f32, scale: f32) -> Value {
        Value::record([
            ("position", Value::f32s(&[x, 0.0, 0.0])),
            ("scale", Value::F32(scale)),
        ])
    }

    #[test]
    fn test_struct_decomposes_into_leaves() {
        let mut buffer = TypedBuffer::new("transform", &transform_schema());
        buffer.push(&transform(1.0, 2.0)).unwrap();
        buffer.push(&transform(3.0, 4.0)).unwrap();

        assert_eq!(buffer.leaf_count(), 4);
        assert_eq!(buffer.leaf(0).unwrap().as_f32(), Some(&[1.0, 3.0][..]));
        assert_eq!(buffer.leaf(3).unwrap().as_f32(), Some(&[2.0, 4.0][..]));
        assert_eq!(buffer.leaf_bytes(3).unwrap().len(), 8);
        assert_eq!(buffer.get(1), Some(transform(3.0, 4.0)));
        assert_eq!(buffer.get(2), None);
    }

    #[test]
    fn test_set_rejects_wrong_shape_without_change() {
        let mut buffer = TypedBuffer::new("mass", &ComponentSchema::new(Shape::F32));
        buffer.push(&Value::F32(1.0)).unwrap();

        let err = buffer.set(0, &Value::U32(3)).unwrap_err();
        assert_eq!(
            err,
            SchemaViolation::TypeMismatch {
                component: "mass".into(),
                expected: "f32".into()
            }
        );
        assert_eq!(buffer.get(0), Some(Value::F32(1.0)));
    }

    #[test]
    fn test_set_grows_with_defaults() {
        let schema = ComponentSchema::new(Shape::U32).with_default(7u32);
        let mut buffer = TypedBuffer::new("hp", &schema);
        buffer.set(3, &Value::U32(1)).unwrap();

        assert_eq!(buffer.len(), 4);
        assert!(buffer.is_default(0));
        assert!(buffer.is_default(2));
        assert!(!buffer.is_default(3));
        assert_eq!(buffer.get(2), Some(Value::U32(7)));
    }

    #[test]
    fn test_bool_roundtrips_through_u32_leaf() {
        let mut buffer = TypedBuffer::new("visible", &ComponentSchema::new(Shape::BOOL));
        buffer.push(&Value::Bool(true)).unwrap();
        assert_eq!(buffer.leaf(0).unwrap().as_u32(), Some(&[1][..]));
        assert_eq!(buffer.get(0), Some(Value::Bool(true)));
    }

    #[test]
    fn test_swap_remove_moves_last_row() {
        let mut buffer = TypedBuffer::new("n", &ComponentSchema::new(Shape::I32));
        for i in 0..4 {
            buffer.push(&Value::I32(i)).unwrap();
        }
        assert!(buffer.swap_remove(1));
        assert_eq!(buffer.get(1), Some(Value::I32(3)));
        assert_eq!(buffer.len(), 3);
        assert!(!buffer.swap_remove(3));

        buffer.truncate(1);
        assert_eq!(buffer.len(), 1);
        assert!(buffer.capacity() >= 4);
    }

    #[test]
    fn test_opaque_column() {
        let mut buffer = TypedBuffer::new("label", &ComponentSchema::new(Shape::Opaque));
        let row = buffer.push_default();
        assert!(buffer.is_default(row));
        buffer.set(row, &Value::from("hero")).unwrap();
        assert_eq!(buffer.get(row), Some(Value::Text("hero".into())));
        assert!(buffer.layout().is_none());
        assert!(buffer.leaf_bytes(0).is_none());
    }

    #[test]
    fn test_push_from_copies_row() {
        let mut a = TypedBuffer::new("transform", &transform_schema());
        let mut b = TypedBuffer::new("transform", &transform_schema());
        a.push(&transform(5.0, 1.0)).unwrap();
        b.push_from(&a, 0).unwrap();
        assert_eq!(b.get(0), a.get(0));

        let other = TypedBuffer::new("mass", &ComponentSchema::new(Shape::F32));
        assert!(b.push_from(&other, 0).is_err());
    }

    #[test]
    fn test_write_packed_uses_layout() {
        let mut buffer = TypedBuffer::new("transform", &transform_schema());
        buffer.push(&transform(1.5, 2.0)).unwrap();

        let mut out = [0u8; 32];
        assert_eq!(buffer.write_packed(0, &mut out), Some(32));
        assert_eq!(&out[0..4], 1.5f32.to_ne_bytes());
        assert_eq!(&out[16..20], 2.0f32.to_ne_bytes());
        assert_eq!(buffer.write_packed(0, &mut [0u8; 8]), None);
    }
}
