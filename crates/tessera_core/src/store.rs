//! # Store
//!
//! Owns every archetype, the entity location table and the resources.
//!
//! ## Migration
//!
//! An update that adds or removes components moves the entity to the
//! archetype for its new component set:
//!
//! ```text
//! update(e, { b: 2 })              e in {id, a}
//!   destination = {id, a} ∪ {b}    created on first use
//!   copy a, write b, swap-delete the old row
//!   fix up e and whichever entity filled the hole
//! ```
//!
//! `Value::Undefined` in an update removes that component. Updates that keep
//! the component set are written in place.

use std::collections::{BTreeMap, HashMap};

use crate::archetype::{Archetype, ArchetypeId};
use crate::buffer::TypedBuffer;
use crate::entity::{Entity, EntityLocation, EntityLocationTable};
use crate::error::{SchemaViolation, StoreError, StoreResult};
use crate::query::{ArchetypeQuery, ComponentFilter};
use crate::resource::Resources;
use crate::schema::{ComponentSchema, ComponentValues, SchemaFragment, Value, ID_COMPONENT};

/// Columnar entity/component store.
#[derive(Debug)]
pub struct Store {
    schemas: BTreeMap<String, ComponentSchema>,
    archetypes: Vec<Archetype>,
    by_components: HashMap<Vec<String>, ArchetypeId>,
    named: BTreeMap<String, ArchetypeId>,
    entities: EntityLocationTable,
    resources: Resources,
}

impl Store {
    /// Builds a store from a merged schema. The schema is frozen from here on.
    ///
    /// Named archetypes are created eagerly.
    ///
    /// # Errors
    ///
    /// [`StoreError::Schema`] if the fragment does not validate.
    pub fn new(fragment: SchemaFragment) -> StoreResult<Self> {
        fragment.validate()?;
        let SchemaFragment {
            components,
            archetypes,
            resources,
        } = fragment;

        let mut schemas = components;
        schemas.insert(ID_COMPONENT.to_owned(), ComponentSchema::id());

        let mut store = Self {
            schemas,
            archetypes: Vec::new(),
            by_components: HashMap::new(),
            named: BTreeMap::new(),
            entities: EntityLocationTable::new(),
            resources: Resources::new(resources),
        };
        for (name, components) in archetypes {
            let id = store.ensure_archetype(&components)?;
            store.named.insert(name, id);
        }

        tracing::debug!(
            "Store built: {} components, {} archetypes",
            store.schemas.len(),
            store.archetypes.len()
        );
        Ok(store)
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// Declared schema of a component.
    #[must_use]
    pub fn component_schema(&self, name: &str) -> Option<&ComponentSchema> {
        self.schemas.get(name)
    }

    /// Declared component names, `id` included.
    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    // =========================================================================
    // Archetypes
    // =========================================================================

    /// Returns the archetype for exactly `names` (plus `id`), creating it if needed.
    ///
    /// Identity is by set: order and duplicates in `names` do not matter.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation::UnknownComponent`] for undeclared names.
    pub fn ensure_archetype<S: AsRef<str>>(&mut self, names: &[S]) -> StoreResult<ArchetypeId> {
        let key = self.component_set(names)?;
        if let Some(&id) = self.by_components.get(&key) {
            return Ok(id);
        }

        let id = ArchetypeId::new(
            u32::try_from(self.archetypes.len())
                .map_err(|_| StoreError::Corrupted("archetype index overflow".into()))?,
        );
        let mut columns = Vec::with_capacity(key.len());
        for name in &key {
            let schema = self
                .schemas
                .get(name)
                .ok_or_else(|| SchemaViolation::UnknownComponent(name.clone()))?;
            columns.push(TypedBuffer::new(name.clone(), schema));
        }
        self.archetypes.push(Archetype::new(id, columns)?);

        tracing::debug!("Created {} with components {:?}", id, key);
        self.by_components.insert(key, id);
        Ok(id)
    }

    /// Returns the archetype for exactly `names` without creating it.
    #[must_use]
    pub fn archetype_for<S: AsRef<str>>(&self, names: &[S]) -> Option<ArchetypeId> {
        let key = self.component_set(names).ok()?;
        self.by_components.get(&key).copied()
    }

    /// Archetype declared by name in the schema.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation::UnknownArchetype`] if no such name was declared.
    pub fn named_archetype(&self, name: &str) -> StoreResult<ArchetypeId> {
        self.named
            .get(name)
            .copied()
            .ok_or_else(|| SchemaViolation::UnknownArchetype(name.to_owned()).into())
    }

    /// Archetype by id.
    #[inline]
    #[must_use]
    pub fn archetype(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.index())
    }

    /// Mutable archetype by id, for bulk column writes.
    #[inline]
    pub fn archetype_mut(&mut self, id: ArchetypeId) -> Option<&mut Archetype> {
        self.archetypes.get_mut(id.index())
    }

    /// All archetypes in creation order.
    #[inline]
    #[must_use]
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Archetypes having every `include` component and no `exclude` component.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation::UnknownComponent`] for undeclared names.
    pub fn query(&self, include: &[&str], exclude: &[&str]) -> StoreResult<ArchetypeQuery> {
        self.query_filter(ComponentFilter::new(
            include.iter().copied(),
            exclude.iter().copied(),
        ))
    }

    /// Runs a prepared filter.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation::UnknownComponent`] for undeclared names.
    pub fn query_filter(&self, filter: ComponentFilter) -> StoreResult<ArchetypeQuery> {
        if let Some(unknown) = filter.names().find(|n| !self.schemas.contains_key(*n)) {
            return Err(SchemaViolation::UnknownComponent(unknown.to_owned()).into());
        }
        Ok(ArchetypeQuery::new(filter, &self.archetypes))
    }

    /// Adds archetypes created since `query` last scanned.
    pub fn refresh_query(&self, query: &mut ArchetypeQuery) {
        query.refresh(&self.archetypes);
    }

    /// Every live entity in a matching archetype.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation::UnknownComponent`] for undeclared names.
    pub fn select(&self, include: &[&str], exclude: &[&str]) -> StoreResult<Vec<Entity>> {
        let query = self.query(include, exclude)?;
        Ok(query
            .iter()
            .filter_map(|id| self.archetype(id))
            .flat_map(Archetype::entities)
            .collect())
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Number of live entities.
    #[inline]
    #[must_use]
    pub const fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Location of a live entity. `None` for unknown or deleted ids.
    #[inline]
    #[must_use]
    pub fn locate(&self, entity: Entity) -> Option<EntityLocation> {
        self.entities.locate(entity)
    }

    /// Every component value of a live entity, `id` included.
    #[must_use]
    pub fn read(&self, entity: Entity) -> Option<ComponentValues> {
        let location = self.locate(entity)?;
        self.archetype(location.archetype)?
            .row_values(location.row as usize)
    }

    /// One component value of a live entity.
    #[must_use]
    pub fn get(&self, entity: Entity, component: &str) -> Option<Value> {
        let location = self.locate(entity)?;
        self.archetype(location.archetype)?
            .column(component)?
            .get(location.row as usize)
    }

    /// Creates an entity in `archetype`, defaulting missing components.
    ///
    /// # Errors
    ///
    /// [`StoreError::Schema`] for undeclared components, components outside
    /// the archetype, or values of the wrong shape. Nothing is created then.
    pub fn insert(&mut self, archetype: ArchetypeId, values: &ComponentValues) -> StoreResult<Entity> {
        self.check_declared(values)?;
        let table = self
            .archetypes
            .get_mut(archetype.index())
            .ok_or_else(|| SchemaViolation::UnknownArchetype(archetype.to_string()))?;
        table.check_values(values)?;

        let row = to_row(table.len())?;
        let entity = self.entities.create(EntityLocation::new(archetype, row));
        table.insert(entity, values)?;
        Ok(entity)
    }

    /// Creates an entity in the archetype matching the defined keys of `values`.
    ///
    /// # Errors
    ///
    /// As for [`insert`](Self::insert).
    pub fn spawn(&mut self, values: &ComponentValues) -> StoreResult<Entity> {
        let names: Vec<&str> = values
            .iter()
            .filter(|(_, v)| !v.is_undefined())
            .map(|(k, _)| k.as_str())
            .collect();
        let archetype = self.ensure_archetype(&names)?;
        self.insert(archetype, values)
    }

    /// Writes, adds or removes components of a live entity.
    ///
    /// Keys absent from `values` are untouched; `Undefined` removes the component.
    ///
    /// # Errors
    ///
    /// - [`StoreError::EntityNotFound`] if `entity` is not live
    /// - [`StoreError::Schema`] for undeclared components, the `id`
    ///   component, or values of the wrong shape; the entity is unchanged
    /// - [`StoreError::Corrupted`] if location fix-up fails
    pub fn update(&mut self, entity: Entity, values: &ComponentValues) -> StoreResult<()> {
        let location = self
            .entities
            .locate(entity)
            .ok_or(StoreError::EntityNotFound(entity))?;
        self.check_update(values)?;

        let current = self.archetype_at(location.archetype)?;
        let reshapes = values.iter().any(|(name, value)| {
            let present = current.has_component(name);
            if value.is_undefined() {
                present
            } else {
                !present
            }
        });

        if !reshapes {
            return self.archetypes[location.archetype.index()]
                .update_row(location.row as usize, values);
        }

        let names: Vec<String> = current
            .component_names()
            .iter()
            .filter(|n| values.get(n.as_str()).map_or(true, |v| !v.is_undefined()))
            .chain(
                values
                    .iter()
                    .filter(|(_, v)| !v.is_undefined())
                    .map(|(k, _)| k),
            )
            .cloned()
            .collect();
        let destination = self.ensure_archetype(&names)?;
        self.migrate(entity, location, destination, values)
    }

    /// Moves a live entity into the archetype with exactly `components`
    /// (plus `id`) and writes `values` there.
    ///
    /// Unlike [`update`](Self::update), `Undefined` in `values` resets the
    /// component to its default instead of removing it. Components kept from
    /// the current archetype and not named in `values` keep their values.
    ///
    /// # Errors
    ///
    /// - [`StoreError::EntityNotFound`] if `entity` is not live
    /// - [`StoreError::Schema`] for undeclared components, the `id`
    ///   component, values outside `components`, or values of the wrong
    ///   shape; the entity is unchanged
    /// - [`StoreError::Corrupted`] if location fix-up fails
    pub fn relocate<S: AsRef<str>>(
        &mut self,
        entity: Entity,
        components: &[S],
        values: &ComponentValues,
    ) -> StoreResult<()> {
        let location = self
            .entities
            .locate(entity)
            .ok_or(StoreError::EntityNotFound(entity))?;
        self.check_update(values)?;
        let destination = self.ensure_archetype(components)?;
        self.archetype_at(destination)?.check_values(values)?;

        let location = if destination == location.archetype {
            location
        } else {
            self.migrate(entity, location, destination, &ComponentValues::new())?;
            self.entities
                .locate(entity)
                .ok_or_else(|| StoreError::Corrupted(format!("relocated entity {entity} has no location")))?
        };
        self.archetypes[destination.index()].restore_row(location.row as usize, values)
    }

    /// Deletes a live entity and frees its id.
    ///
    /// # Errors
    ///
    /// [`StoreError::EntityNotFound`] if `entity` is not live, or
    /// [`StoreError::Corrupted`] if location fix-up fails.
    pub fn delete(&mut self, entity: Entity) -> StoreResult<()> {
        let location = self.entities.delete(entity)?;
        let table = self
            .archetypes
            .get_mut(location.archetype.index())
            .ok_or_else(|| StoreError::Corrupted(format!("{entity} located in missing {}", location.archetype)))?;
        if let Some(moved) = table.delete(location.row as usize)? {
            self.entities
                .update(moved, location)
                .map_err(|_| StoreError::Corrupted(format!("moved entity {moved} has no location")))?;
        }
        Ok(())
    }

    // =========================================================================
    // Resources
    // =========================================================================

    /// All resources.
    #[inline]
    #[must_use]
    pub const fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Current value of a resource.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation::UnknownResource`] if `name` was never declared.
    pub fn resource(&self, name: &str) -> StoreResult<&Value> {
        Ok(self.resources.get(name)?)
    }

    /// Replaces a resource value, returning the previous one.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation::UnknownResource`] if `name` was never declared.
    pub fn set_resource(&mut self, name: &str, value: Value) -> StoreResult<Value> {
        Ok(self.resources.set(name, value)?)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn component_set<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<String>, SchemaViolation> {
        let mut set = Vec::with_capacity(names.len() + 1);
        set.push(ID_COMPONENT.to_owned());
        for name in names {
            let name = name.as_ref();
            if !self.schemas.contains_key(name) {
                return Err(SchemaViolation::UnknownComponent(name.to_owned()));
            }
            set.push(name.to_owned());
        }
        set.sort_unstable();
        set.dedup();
        Ok(set)
    }

    fn check_declared(&self, values: &ComponentValues) -> Result<(), SchemaViolation> {
        match values.keys().find(|k| !self.schemas.contains_key(k.as_str())) {
            Some(unknown) => Err(SchemaViolation::UnknownComponent(unknown.clone())),
            None => Ok(()),
        }
    }

    fn check_update(&self, values: &ComponentValues) -> Result<(), SchemaViolation> {
        for (name, value) in values {
            if name == ID_COMPONENT {
                return Err(SchemaViolation::IdIsReadOnly);
            }
            let schema = self
                .schemas
                .get(name)
                .ok_or_else(|| SchemaViolation::UnknownComponent(name.clone()))?;
            if !value.is_undefined() && !schema.shape.matches(value) {
                return Err(SchemaViolation::TypeMismatch {
                    component: name.clone(),
                    expected: schema.shape.to_string(),
                });
            }
        }
        Ok(())
    }

    fn archetype_at(&self, id: ArchetypeId) -> StoreResult<&Archetype> {
        self.archetypes
            .get(id.index())
            .ok_or_else(|| StoreError::Corrupted(format!("location points at missing {id}")))
    }

    fn migrate(
        &mut self,
        entity: Entity,
        from: EntityLocation,
        destination: ArchetypeId,
        values: &ComponentValues,
    ) -> StoreResult<()> {
        let (source, target) =
            pair_mut(&mut self.archetypes, from.archetype.index(), destination.index())?;
        let (new_row, moved) = source.migrate_row(target, from.row as usize, values)?;

        self.entities
            .update(entity, EntityLocation::new(destination, to_row(new_row)?))
            .map_err(|_| StoreError::Corrupted(format!("migrated entity {entity} has no location")))?;
        if let Some(moved) = moved {
            self.entities
                .update(moved, from)
                .map_err(|_| StoreError::Corrupted(format!("moved entity {moved} has no location")))?;
        }

        tracing::trace!("Migrated {} from {} to {}", entity, from.archetype, destination);
        Ok(())
    }
}

/// Borrows two distinct archetypes mutably.
fn pair_mut(
    archetypes: &mut [Archetype],
    a: usize,
    b: usize,
) -> StoreResult<(&mut Archetype, &mut Archetype)> {
    if a == b || a >= archetypes.len() || b >= archetypes.len() {
        return Err(StoreError::Corrupted(format!(
            "cannot migrate between archetypes {a} and {b}"
        )));
    }
    if a < b {
        let (left, right) = archetypes.split_at_mut(b);
        Ok((&mut left[a], &mut right[0]))
    } else {
        let (left, right) = archetypes.split_at_mut(a);
        Ok((&mut right[0], &mut left[b]))
    }
}

fn to_row(row: usize) -> StoreResult<u32> {
    u32::try_from(row).map_err(|_| StoreError::Corrupted(format!("row {row} exceeds u32")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Shape;

    fn schema() -> SchemaFragment {
        SchemaFragment::new()
            .with_component("a", ComponentSchema::new(Shape::U32))
            .with_component("b", ComponentSchema::new(Shape::U32))
            .with_component("c", ComponentSchema::new(Shape::U32))
            .with_component("label", ComponentSchema::new(Shape::Opaque))
            .with_archetype("pair", ["a", "b"])
            .with_resource("frame", 0u32)
    }

    fn vals(pairs: &[(&str, Value)]) -> ComponentValues {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn test_archetype_identity_is_by_set() {
        let mut store = Store::new(schema()).unwrap();
        let ab = store.ensure_archetype(&["id", "a", "b"]).unwrap();
        let ba = store.ensure_archetype(&["b", "a"]).unwrap();
        let a = store.ensure_archetype(&["id", "a"]).unwrap();

        assert_eq!(ab, ba);
        assert_ne!(ab, a);
        assert_eq!(store.named_archetype("pair").unwrap(), ab);
        assert_eq!(store.archetype_for(&["a"]), Some(a));
        assert_eq!(store.archetype_for(&["c"]), None);
    }

    #[test]
    fn test_unknown_names_are_schema_violations() {
        let mut store = Store::new(schema()).unwrap();
        assert_eq!(
            store.ensure_archetype(&["mass"]),
            Err(StoreError::Schema(SchemaViolation::UnknownComponent("mass".into())))
        );
        assert!(store.query(&["mass"], &[]).is_err());
        assert!(store.named_archetype("ghost").is_err());
        assert!(store.resource("clock").is_err());
        assert!(store.spawn(&vals(&[("mass", Value::U32(1))])).is_err());
        assert_eq!(store.entity_count(), 0);
    }

    #[test]
    fn test_update_in_place_keeps_archetype() {
        let mut store = Store::new(schema()).unwrap();
        let e = store.spawn(&vals(&[("a", Value::U32(1))])).unwrap();
        let before = store.locate(e).unwrap();

        store.update(e, &vals(&[("a", Value::U32(5))])).unwrap();
        assert_eq!(store.locate(e), Some(before));
        assert_eq!(store.get(e, "a"), Some(Value::U32(5)));

        // removing an absent component is a no-op
        store.update(e, &vals(&[("c", Value::Undefined)])).unwrap();
        assert_eq!(store.locate(e), Some(before));
    }

    #[test]
    fn test_update_rejections_leave_entity_unchanged() {
        let mut store = Store::new(schema()).unwrap();
        let e = store.spawn(&vals(&[("a", Value::U32(1))])).unwrap();

        assert_eq!(
            store.update(e, &vals(&[("id", Value::U32(3))])),
            Err(StoreError::Schema(SchemaViolation::IdIsReadOnly))
        );
        assert!(store
            .update(e, &vals(&[("b", Value::U32(2)), ("c", Value::F32(1.0))]))
            .is_err());
        assert_eq!(store.read(e).unwrap().len(), 2);

        store.delete(e).unwrap();
        assert!(store.update(e, &vals(&[("a", Value::U32(1))])).unwrap_err().is_not_found());
        assert!(store.delete(e).unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_fixes_up_moved_entity() {
        let mut store = Store::new(schema()).unwrap();
        let ids: Vec<_> = (0..3)
            .map(|i| store.spawn(&vals(&[("a", Value::U32(i))])).unwrap())
            .collect();

        store.delete(ids[0]).unwrap();
        let moved = store.locate(ids[2]).unwrap();
        assert_eq!(moved.row, 0);
        assert_eq!(store.locate(ids[1]).unwrap().row, 1);
        assert_eq!(store.get(ids[2], "a"), Some(Value::U32(2)));
        assert_eq!(store.locate(ids[0]), None);
    }

    #[test]
    fn test_select_and_resources() {
        let mut store = Store::new(schema()).unwrap();
        let a = store.spawn(&vals(&[("a", Value::U32(1))])).unwrap();
        let ab = store
            .spawn(&vals(&[("a", Value::U32(1)), ("b", Value::U32(2))]))
            .unwrap();
        let l = store.spawn(&vals(&[("label", Value::from("x"))])).unwrap();

        assert_eq!(store.select(&["a"], &["b"]).unwrap(), vec![a]);
        assert_eq!(store.select(&["a", "b"], &[]).unwrap(), vec![ab]);
        assert_eq!(store.select(&["label"], &[]).unwrap(), vec![l]);

        assert_eq!(store.set_resource("frame", Value::U32(9)), Ok(Value::U32(0)));
        assert_eq!(store.resource("frame"), Ok(&Value::U32(9)));
    }
}
