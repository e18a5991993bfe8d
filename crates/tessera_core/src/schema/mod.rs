//! # Component Schemas
//!
//! Every component is declared once with a [`Shape`] and a default [`Value`].
//! Shapes are deliberately small:
//!
//! ```text
//! Scalar   u32 | i32 | f32 | f64 | bool        one leaf
//! Array    [f32; 3]                            one leaf per element
//! Struct   { position: [f32; 3], scale: f32 }  one leaf per scalar, declaration order
//! Opaque   strings, handles, anything else     stored as Value, no leaves
//! ```
//!
//! Leaves are what the typed buffers actually store, one scalar column each.

mod fragment;
mod layout;

pub use fragment::SchemaFragment;
pub use layout::{LeafSlot, StructLayout};

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SchemaViolation;

/// Name of the core component present in every archetype.
pub const ID_COMPONENT: &str = "id";

/// Component name → value, as passed to insert and update.
pub type ComponentValues = BTreeMap<String, Value>;

/// Dynamic value flowing in and out of the store.
///
/// `Undefined` in an update map removes the component from the entity.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    /// No value. Removes a component when used in an update.
    #[default]
    Undefined,
    /// Boolean, stored as a `u32` leaf.
    Bool(bool),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Signed 32-bit integer.
    I32(i32),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// Fixed-length array.
    Array(Vec<Value>),
    /// Struct keyed by field name.
    Struct(BTreeMap<String, Value>),
    /// Text. Only valid in opaque columns and resources.
    Text(String),
    /// Handle to something owned outside the store (GPU object, asset).
    Handle(u64),
}

impl Value {
    /// Builds a struct value from `(field, value)` pairs.
    pub fn record<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::Struct(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Builds an `f32` array value.
    #[must_use]
    pub fn f32s(items: &[f32]) -> Self {
        Self::Array(items.iter().copied().map(Self::F32).collect())
    }

    /// Returns `true` for [`Value::Undefined`].
    #[inline]
    #[must_use]
    pub const fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Returns the value as `u32` if it is one.
    #[inline]
    #[must_use]
    pub const fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as `i32` if it is one.
    #[inline]
    #[must_use]
    pub const fn as_i32(&self) -> Option<i32> {
        match self {
            Self::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as `f32` if it is one.
    #[inline]
    #[must_use]
    pub const fn as_f32(&self) -> Option<f32> {
        match self {
            Self::F32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as `f64`, widening `f32`.
    #[inline]
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F64(v) => Some(*v),
            Self::F32(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    /// Returns the value as `bool` if it is one.
    #[inline]
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the elements of an array value.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Returns a struct field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Struct(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Returns the text of a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::U32(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::I32(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::F64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<const N: usize> From<[f32; N]> for Value {
    fn from(v: [f32; N]) -> Self {
        Self::f32s(&v)
    }
}

/// Scalar leaf type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    /// Unsigned 32-bit integer.
    U32,
    /// Signed 32-bit integer.
    I32,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// Boolean, stored as `u32` 0 or 1.
    Bool,
}

impl ScalarKind {
    /// Size of one leaf in bytes.
    #[inline]
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::F64 => 8,
            Self::U32 | Self::I32 | Self::F32 | Self::Bool => 4,
        }
    }

    /// Lowercase name used in declarations.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::U32 => "u32",
            Self::I32 => "i32",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Bool => "bool",
        }
    }

    /// Parses a lowercase scalar name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "u32" => Some(Self::U32),
            "i32" => Some(Self::I32),
            "f32" => Some(Self::F32),
            "f64" => Some(Self::F64),
            "bool" => Some(Self::Bool),
            _ => None,
        }
    }

    /// Zero value of this kind.
    #[must_use]
    pub const fn zero(self) -> Value {
        match self {
            Self::U32 => Value::U32(0),
            Self::I32 => Value::I32(0),
            Self::F32 => Value::F32(0.0),
            Self::F64 => Value::F64(0.0),
            Self::Bool => Value::Bool(false),
        }
    }

    /// Returns `true` if `value` can be stored in a leaf of this kind.
    ///
    /// `f64` leaves also accept `f32` values.
    #[inline]
    #[must_use]
    pub const fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::U32, Value::U32(_))
                | (Self::I32, Value::I32(_))
                | (Self::F32, Value::F32(_))
                | (Self::F64, Value::F64(_) | Value::F32(_))
                | (Self::Bool, Value::Bool(_))
        )
    }
}

/// Named struct field.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Field shape.
    pub shape: Shape,
}

/// Value shape of a component.
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    /// Single scalar.
    Scalar(ScalarKind),
    /// Fixed-length array of scalars.
    Array {
        /// Element kind.
        item: ScalarKind,
        /// Number of elements.
        len: usize,
    },
    /// Struct with fields in declaration order.
    Struct(Vec<Field>),
    /// Arbitrary value stored unpacked.
    Opaque,
}

impl Shape {
    /// `u32` scalar.
    pub const U32: Self = Self::Scalar(ScalarKind::U32);
    /// `i32` scalar.
    pub const I32: Self = Self::Scalar(ScalarKind::I32);
    /// `f32` scalar.
    pub const F32: Self = Self::Scalar(ScalarKind::F32);
    /// `f64` scalar.
    pub const F64: Self = Self::Scalar(ScalarKind::F64);
    /// `bool` scalar.
    pub const BOOL: Self = Self::Scalar(ScalarKind::Bool);

    /// Fixed-length scalar array.
    #[must_use]
    pub const fn array(item: ScalarKind, len: usize) -> Self {
        Self::Array { item, len }
    }

    /// Struct from `(name, shape)` pairs.
    pub fn structure<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Shape)>,
    {
        Self::Struct(
            fields
                .into_iter()
                .map(|(name, shape)| Field {
                    name: name.into(),
                    shape,
                })
                .collect(),
        )
    }

    /// Returns `true` for opaque shapes.
    #[inline]
    #[must_use]
    pub const fn is_opaque(&self) -> bool {
        matches!(self, Self::Opaque)
    }

    /// Number of scalar leaves.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Scalar(_) => 1,
            Self::Array { len, .. } => *len,
            Self::Struct(fields) => fields.iter().map(|f| f.shape.leaf_count()).sum(),
            Self::Opaque => 0,
        }
    }

    /// Appends the leaf kinds in storage order.
    pub fn collect_leaves(&self, out: &mut Vec<ScalarKind>) {
        match self {
            Self::Scalar(kind) => out.push(*kind),
            Self::Array { item, len } => out.extend(std::iter::repeat(*item).take(*len)),
            Self::Struct(fields) => {
                for field in fields {
                    field.shape.collect_leaves(out);
                }
            }
            Self::Opaque => {}
        }
    }

    /// All-zero value of this shape. Opaque shapes yield [`Value::Undefined`].
    #[must_use]
    pub fn zero_value(&self) -> Value {
        match self {
            Self::Scalar(kind) => kind.zero(),
            Self::Array { item, len } => Value::Array(vec![item.zero(); *len]),
            Self::Struct(fields) => Value::Struct(
                fields
                    .iter()
                    .map(|f| (f.name.clone(), f.shape.zero_value()))
                    .collect(),
            ),
            Self::Opaque => Value::Undefined,
        }
    }

    /// Returns `true` if `value` fits this shape exactly.
    ///
    /// Struct values must name every field and nothing else.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Opaque, _) => true,
            (Self::Scalar(kind), v) => kind.accepts(v),
            (Self::Array { item, len }, Value::Array(items)) => {
                items.len() == *len && items.iter().all(|v| item.accepts(v))
            }
            (Self::Struct(fields), Value::Struct(map)) => {
                map.len() == fields.len()
                    && fields
                        .iter()
                        .all(|f| map.get(&f.name).is_some_and(|v| f.shape.matches(v)))
            }
            _ => false,
        }
    }

    /// Checks the declaration itself.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation::InvalidDeclaration`] for empty arrays or structs,
    /// duplicate field names, or opaque struct fields.
    pub fn validate(&self, component: &str) -> Result<(), SchemaViolation> {
        match self {
            Self::Scalar(_) | Self::Opaque => Ok(()),
            Self::Array { len, .. } if *len == 0 => Err(SchemaViolation::InvalidDeclaration(
                format!("{component}: zero-length array"),
            )),
            Self::Array { .. } => Ok(()),
            Self::Struct(fields) => {
                if fields.is_empty() {
                    return Err(SchemaViolation::InvalidDeclaration(format!(
                        "{component}: struct without fields"
                    )));
                }
                for (i, field) in fields.iter().enumerate() {
                    if fields[..i].iter().any(|f| f.name == field.name) {
                        return Err(SchemaViolation::InvalidDeclaration(format!(
                            "{component}: duplicate field {}",
                            field.name
                        )));
                    }
                    if field.shape.is_opaque() {
                        return Err(SchemaViolation::InvalidDeclaration(format!(
                            "{component}.{}: opaque fields cannot be packed",
                            field.name
                        )));
                    }
                    field.shape.validate(component)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(kind) => f.write_str(kind.name()),
            Self::Array { item, len } => write!(f, "[{}; {len}]", item.name()),
            Self::Struct(fields) => {
                f.write_str("{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.shape)?;
                }
                f.write_str(" }")
            }
            Self::Opaque => f.write_str("opaque"),
        }
    }
}

/// Declaration of one component.
#[derive(Clone, Debug, PartialEq)]
pub struct ComponentSchema {
    /// Value shape.
    pub shape: Shape,
    /// Value stored when a row is created without one.
    pub default: Value,
}

impl ComponentSchema {
    /// Declares a component whose default is the zero value of `shape`.
    #[must_use]
    pub fn new(shape: Shape) -> Self {
        let default = shape.zero_value();
        Self { shape, default }
    }

    /// Replaces the default value.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }

    /// Checks the shape and that the default fits it.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation`] describing the first problem found.
    pub fn validate(&self, component: &str) -> Result<(), SchemaViolation> {
        self.shape.validate(component)?;
        if self.shape.matches(&self.default) {
            Ok(())
        } else {
            Err(SchemaViolation::TypeMismatch {
                component: component.to_owned(),
                expected: self.shape.to_string(),
            })
        }
    }

    /// Schema of the core `id` component.
    #[must_use]
    pub fn id() -> Self {
        Self::new(Shape::U32)
    }
}
