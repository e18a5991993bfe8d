//! # Resources
//!
//! Singleton named values living beside the archetypes: the current device
//! handle, the frame counter, global settings. The set of names is fixed when
//! the store is built; only the values change.
//!
//! A resource holding [`Value::Undefined`] is declared but unassigned.
//! Scheduled systems that require it are skipped until it is set.

use std::collections::BTreeMap;

use crate::error::SchemaViolation;
use crate::schema::Value;

/// Named singleton values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resources {
    values: BTreeMap<String, Value>,
}

impl Resources {
    /// Creates the resource set with initial values.
    #[must_use]
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    /// Current value of a resource.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation::UnknownResource`] if `name` was never declared.
    pub fn get(&self, name: &str) -> Result<&Value, SchemaViolation> {
        self.values
            .get(name)
            .ok_or_else(|| SchemaViolation::UnknownResource(name.to_owned()))
    }

    /// Replaces a resource value, returning the previous one.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation::UnknownResource`] if `name` was never declared.
    pub fn set(&mut self, name: &str, value: Value) -> Result<Value, SchemaViolation> {
        self.values
            .get_mut(name)
            .map(|slot| std::mem::replace(slot, value))
            .ok_or_else(|| SchemaViolation::UnknownResource(name.to_owned()))
    }

    /// Returns `true` if `name` is declared and holds a value.
    #[must_use]
    pub fn is_assigned(&self, name: &str) -> bool {
        self.values.get(name).is_some_and(|v| !v.is_undefined())
    }

    /// Returns `true` if `name` is declared.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Declared names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources() -> Resources {
        let mut values = BTreeMap::new();
        values.insert("device".to_owned(), Value::Undefined);
        values.insert("gravity".to_owned(), Value::F32(-9.8));
        Resources::new(values)
    }

    #[test]
    fn test_assignment_state() {
        let mut res = resources();
        assert!(res.contains("device"));
        assert!(!res.is_assigned("device"));
        assert!(res.is_assigned("gravity"));

        assert_eq!(res.set("device", Value::Handle(1)), Ok(Value::Undefined));
        assert!(res.is_assigned("device"));
        assert_eq!(res.get("device"), Ok(&Value::Handle(1)));
    }

    #[test]
    fn test_unknown_resource() {
        let mut res = resources();
        assert_eq!(
            res.get("clock"),
            Err(SchemaViolation::UnknownResource("clock".into()))
        );
        assert!(res.set("clock", Value::U32(0)).is_err());
        assert!(!res.is_assigned("clock"));
        assert_eq!(res.names().collect::<Vec<_>>(), ["device", "gravity"]);
    }
}
