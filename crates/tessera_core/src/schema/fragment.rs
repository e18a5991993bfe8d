//! # Schema Fragments
//!
//! A fragment declares components, named archetypes and resources. Plugins
//! contribute fragments, the application merges them and hands the result to
//! [`Store::new`](crate::store::Store::new). Merging is associative; declaring
//! the same name twice is fine as long as both declarations agree.
//!
//! Fragments also load from TOML:
//!
//! ```toml
//! [components]
//! mass = "f32"
//! position = "vec3"
//! velocity = { shape = { array = "f32", len = 3 }, default = [0.0, 1.0, 0.0] }
//! label = "opaque"
//! transform = { fields = [
//!     { name = "position", shape = "vec3" },
//!     { name = "scale", shape = "f32" },
//! ] }
//!
//! [archetypes]
//! particle = ["position", "velocity", "mass"]
//!
//! [resources]
//! gravity = -9.8
//!
//! unassigned_resources = ["device"]
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;

use super::{ComponentSchema, Field, ScalarKind, Shape, Value, ID_COMPONENT};
use crate::error::{SchemaViolation, StoreError, StoreResult};

/// Declarations contributed by one part of the application.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchemaFragment {
    /// Component declarations.
    pub components: BTreeMap<String, ComponentSchema>,
    /// Named archetypes: name → component names (order irrelevant).
    pub archetypes: BTreeMap<String, Vec<String>>,
    /// Resources and their initial values. `Undefined` means declared but unassigned.
    pub resources: BTreeMap<String, Value>,
}

impl SchemaFragment {
    /// Creates an empty fragment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a component declaration.
    #[must_use]
    pub fn with_component(mut self, name: impl Into<String>, schema: ComponentSchema) -> Self {
        self.components.insert(name.into(), schema);
        self
    }

    /// Adds a named archetype.
    #[must_use]
    pub fn with_archetype<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        components: impl IntoIterator<Item = S>,
    ) -> Self {
        self.archetypes
            .insert(name.into(), components.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a resource with its initial value.
    #[must_use]
    pub fn with_resource(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.resources.insert(name.into(), value.into());
        self
    }

    /// Combines two fragments.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation::Conflict`] if both declare a name differently.
    /// Archetypes agree when they list the same component set.
    pub fn merge(mut self, other: Self) -> Result<Self, SchemaViolation> {
        for (name, schema) in other.components {
            match self.components.get(&name) {
                Some(existing) if *existing != schema => {
                    return Err(SchemaViolation::Conflict(format!("component {name}")));
                }
                Some(_) => {}
                None => {
                    self.components.insert(name, schema);
                }
            }
        }
        for (name, components) in other.archetypes {
            match self.archetypes.get(&name) {
                Some(existing) if normalized(existing) != normalized(&components) => {
                    return Err(SchemaViolation::Conflict(format!("archetype {name}")));
                }
                Some(_) => {}
                None => {
                    self.archetypes.insert(name, components);
                }
            }
        }
        for (name, value) in other.resources {
            match self.resources.get(&name) {
                Some(existing) if *existing != value => {
                    return Err(SchemaViolation::Conflict(format!("resource {name}")));
                }
                Some(_) => {}
                None => {
                    self.resources.insert(name, value);
                }
            }
        }
        Ok(self)
    }

    /// Checks that every declaration is well formed and every archetype only
    /// names declared components.
    ///
    /// # Errors
    ///
    /// The first [`SchemaViolation`] found.
    pub fn validate(&self) -> Result<(), SchemaViolation> {
        for (name, schema) in &self.components {
            if name == ID_COMPONENT && *schema != ComponentSchema::id() {
                return Err(SchemaViolation::Conflict(format!(
                    "component {ID_COMPONENT} is reserved"
                )));
            }
            schema.validate(name)?;
        }
        for components in self.archetypes.values() {
            for component in components {
                if component != ID_COMPONENT && !self.components.contains_key(component) {
                    return Err(SchemaViolation::UnknownComponent(component.clone()));
                }
            }
        }
        Ok(())
    }

    /// Parses a fragment from TOML.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidConfig`] for malformed TOML, or
    /// [`StoreError::Schema`] for a well formed file with bad declarations.
    pub fn from_toml_str(source: &str) -> StoreResult<Self> {
        let file: FragmentFile =
            toml::from_str(source).map_err(|e| StoreError::InvalidConfig(e.to_string()))?;

        let mut fragment = Self::new();
        for (name, decl) in file.components {
            let (shape_decl, default) = match decl {
                ComponentDecl::WithDefault { shape, default } => (shape, default),
                ComponentDecl::Bare(shape) => (shape, None),
            };
            let shape = shape_decl.into_shape(&name)?;
            let mut schema = ComponentSchema::new(shape);
            if let Some(default) = default {
                schema.default = typed_value(&schema.shape, &default, &name)?;
            }
            fragment.components.insert(name, schema);
        }
        fragment.archetypes = file.archetypes;
        for (name, value) in file.resources {
            fragment.resources.insert(name, untyped_value(&value));
        }
        for name in file.unassigned_resources {
            fragment.resources.entry(name).or_insert(Value::Undefined);
        }

        fragment.validate()?;
        Ok(fragment)
    }
}

fn normalized(components: &[String]) -> Vec<&str> {
    let mut names: Vec<&str> = components
        .iter()
        .map(String::as_str)
        .filter(|n| *n != ID_COMPONENT)
        .collect();
    names.sort_unstable();
    names.dedup();
    names
}

// ============================================================================
// TOML DECLARATIONS
// ============================================================================

#[derive(Deserialize)]
struct FragmentFile {
    #[serde(default)]
    components: BTreeMap<String, ComponentDecl>,
    #[serde(default)]
    archetypes: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    resources: BTreeMap<String, toml::Value>,
    #[serde(default)]
    unassigned_resources: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ComponentDecl {
    WithDefault {
        shape: ShapeDecl,
        default: Option<toml::Value>,
    },
    Bare(ShapeDecl),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ShapeDecl {
    Name(String),
    Array { array: ScalarKind, len: usize },
    Struct { fields: Vec<FieldDecl> },
}

#[derive(Deserialize)]
struct FieldDecl {
    name: String,
    shape: ShapeDecl,
}

impl ShapeDecl {
    fn into_shape(self, component: &str) -> Result<Shape, SchemaViolation> {
        match self {
            Self::Name(name) => match name.as_str() {
                "opaque" => Ok(Shape::Opaque),
                "vec2" => Ok(Shape::array(ScalarKind::F32, 2)),
                "vec3" => Ok(Shape::array(ScalarKind::F32, 3)),
                "vec4" => Ok(Shape::array(ScalarKind::F32, 4)),
                other => ScalarKind::from_name(other).map(Shape::Scalar).ok_or_else(|| {
                    SchemaViolation::InvalidDeclaration(format!("{component}: unknown type {other}"))
                }),
            },
            Self::Array { array, len } => Ok(Shape::array(array, len)),
            Self::Struct { fields } => fields
                .into_iter()
                .map(|f| {
                    Ok(Field {
                        shape: f.shape.into_shape(component)?,
                        name: f.name,
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Shape::Struct),
        }
    }
}

/// Converts a TOML value to a [`Value`] of the given shape.
fn typed_value(shape: &Shape, raw: &toml::Value, component: &str) -> Result<Value, SchemaViolation> {
    let mismatch = || SchemaViolation::TypeMismatch {
        component: component.to_owned(),
        expected: shape.to_string(),
    };
    match shape {
        Shape::Scalar(kind) => typed_scalar(*kind, raw).ok_or_else(mismatch),
        Shape::Array { item, len } => match raw {
            toml::Value::Array(items) if items.len() == *len => items
                .iter()
                .map(|v| typed_scalar(*item, v).ok_or_else(mismatch))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => Err(mismatch()),
        },
        Shape::Struct(fields) => match raw {
            toml::Value::Table(table) => {
                let mut out = BTreeMap::new();
                for field in fields {
                    let raw_field = table.get(&field.name).ok_or_else(mismatch)?;
                    out.insert(
                        field.name.clone(),
                        typed_value(&field.shape, raw_field, component)?,
                    );
                }
                Ok(Value::Struct(out))
            }
            _ => Err(mismatch()),
        },
        Shape::Opaque => Ok(untyped_value(raw)),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn typed_scalar(kind: ScalarKind, raw: &toml::Value) -> Option<Value> {
    match (kind, raw) {
        (ScalarKind::U32, toml::Value::Integer(i)) => u32::try_from(*i).ok().map(Value::U32),
        (ScalarKind::I32, toml::Value::Integer(i)) => i32::try_from(*i).ok().map(Value::I32),
        (ScalarKind::F32, toml::Value::Float(f)) => Some(Value::F32(*f as f32)),
        (ScalarKind::F32, toml::Value::Integer(i)) => Some(Value::F32(*i as f32)),
        (ScalarKind::F64, toml::Value::Float(f)) => Some(Value::F64(*f)),
        (ScalarKind::F64, toml::Value::Integer(i)) => Some(Value::F64(*i as f64)),
        (ScalarKind::Bool, toml::Value::Boolean(b)) => Some(Value::Bool(*b)),
        _ => None,
    }
}

/// Converts a TOML value without a declared shape.
///
/// Non-negative integers become `U32`, negative ones `I32`, floats `F64`.
#[allow(clippy::cast_precision_loss)]
fn untyped_value(raw: &toml::Value) -> Value {
    match raw {
        toml::Value::String(s) => Value::Text(s.clone()),
        toml::Value::Integer(i) => u32::try_from(*i)
            .map(Value::U32)
            .or_else(|_| i32::try_from(*i).map(Value::I32))
            .unwrap_or(Value::F64(*i as f64)),
        toml::Value::Float(f) => Value::F64(*f),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(d) => Value::Text(d.to_string()),
        toml::Value::Array(items) => Value::Array(items.iter().map(untyped_value).collect()),
        toml::Value::Table(table) => Value::Struct(
            table
                .iter()
                .map(|(k, v)| (k.clone(), untyped_value(v)))
                .collect(),
        ),
    }
}
