//! Integration tests for the store: id recycling, locations, swap-delete,
//! archetype identity, migration, queries and transactions.

use tessera_core::{
    ComponentSchema, ComponentValues, Entity, ScalarKind, SchemaFragment, SchemaViolation, Shape,
    Store, StoreError, Value,
};

fn vals(pairs: &[(&str, Value)]) -> ComponentValues {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect()
}

fn schema() -> SchemaFragment {
    SchemaFragment::new()
        .with_component("a", ComponentSchema::new(Shape::U32))
        .with_component("b", ComponentSchema::new(Shape::U32))
        .with_component("c", ComponentSchema::new(Shape::U32))
        .with_component("position", ComponentSchema::new(Shape::array(ScalarKind::F32, 3)))
        .with_component(
            "transform",
            ComponentSchema::new(Shape::structure([
                ("position", Shape::array(ScalarKind::F32, 3)),
                ("scale", Shape::F32),
            ])),
        )
        .with_component("name", ComponentSchema::new(Shape::Opaque))
}

/// Every live entity's location points at a row holding its id.
fn assert_locations_consistent(store: &Store, live: &[Entity]) {
    for &entity in live {
        let location = store.locate(entity).expect("live entity has a location");
        let archetype = store.archetype(location.archetype).expect("archetype exists");
        assert_eq!(archetype.entity_at(location.row as usize), Some(entity));
    }
    assert_eq!(store.entity_count(), live.len());
}

#[test]
fn test_id_recycling_is_lifo() {
    let mut store = Store::new(schema()).unwrap();
    let ids: Vec<_> = (0..6)
        .map(|i| store.spawn(&vals(&[("a", Value::U32(i))])).unwrap())
        .collect();
    assert_eq!(ids[0], Entity::new(0));

    for &d in &[ids[4], ids[1], ids[2]] {
        store.delete(d).unwrap();
    }

    let reused: Vec<_> = (0..4)
        .map(|_| store.spawn(&vals(&[("b", Value::U32(0))])).unwrap())
        .collect();
    assert_eq!(reused, vec![ids[2], ids[1], ids[4], Entity::new(6)]);
}

#[test]
fn test_location_invariant_under_churn() {
    let mut store = Store::new(schema()).unwrap();
    let mut live = Vec::new();

    for i in 0..40u32 {
        let e = store.spawn(&vals(&[("a", Value::U32(i))])).unwrap();
        live.push(e);
        if i % 3 == 0 {
            store.update(e, &vals(&[("b", Value::U32(i))])).unwrap();
        }
        if i % 5 == 4 {
            let victim = live.remove(live.len() / 2);
            store.delete(victim).unwrap();
        }
        if i % 7 == 6 {
            let first = live[0];
            store.update(first, &vals(&[("a", Value::Undefined), ("c", Value::U32(1))])).unwrap();
        }
        assert_locations_consistent(&store, &live);
    }

    assert_eq!(store.locate(Entity::new(10_000)), None);
}

#[test]
fn test_swap_delete_relocates_only_last_row() {
    let mut store = Store::new(schema()).unwrap();
    let ids: Vec<_> = (0..5)
        .map(|i| store.spawn(&vals(&[("a", Value::U32(i))])).unwrap())
        .collect();
    let archetype = store.locate(ids[0]).unwrap().archetype;
    let before: Vec<_> = ids.iter().map(|&e| store.locate(e)).collect();

    store.delete(ids[1]).unwrap();

    assert_eq!(store.archetype(archetype).unwrap().len(), 4);
    assert_eq!(store.locate(ids[4]).unwrap().row, 1);
    for i in [0, 2, 3] {
        assert_eq!(store.locate(ids[i]), before[i]);
    }
    assert_eq!(store.get(ids[4], "a"), Some(Value::U32(4)));
}

#[test]
fn test_archetype_identity() {
    let mut store = Store::new(schema()).unwrap();
    let first = store.ensure_archetype(&["id", "a", "b"]).unwrap();
    let second = store.ensure_archetype(&["b", "id", "a"]).unwrap();
    let other = store.ensure_archetype(&["id", "a"]).unwrap();

    assert_eq!(first, second);
    assert_ne!(first, other);
    assert_eq!(store.archetypes().len(), 2);
}

#[test]
fn test_migration_preserves_shared_values() {
    let mut store = Store::new(schema()).unwrap();
    let e = store
        .spawn(&vals(&[
            ("position", Value::f32s(&[1.0, 2.0, 3.0])),
            ("name", Value::from("scout")),
        ]))
        .unwrap();

    store.update(e, &vals(&[("a", Value::U32(9))])).unwrap();
    let row = store.read(e).unwrap();
    assert_eq!(row["position"], Value::f32s(&[1.0, 2.0, 3.0]));
    assert_eq!(row["name"], Value::from("scout"));
    assert_eq!(row["a"], Value::U32(9));

    store.update(e, &vals(&[("position", Value::Undefined)])).unwrap();
    let row = store.read(e).unwrap();
    assert!(!row.contains_key("position"));
    assert_eq!(row["name"], Value::from("scout"));
    assert_eq!(row["a"], Value::U32(9));
}

#[test]
fn test_query_matches_column_sets_only() {
    let mut store = Store::new(schema()).unwrap();
    let ab = store.ensure_archetype(&["a", "b"]).unwrap();
    let abc = store.ensure_archetype(&["a", "b", "c"]).unwrap();
    let abp = store.ensure_archetype(&["a", "b", "position"]).unwrap();
    store.ensure_archetype(&["a"]).unwrap();
    store.ensure_archetype(&["b", "c"]).unwrap();

    let query = store.query(&["a", "b"], &["c"]).unwrap();
    assert_eq!(query.ids(), [ab, abp]);
    assert!(!query.ids().contains(&abc));

    // empty archetypes match as well as populated ones
    assert!(store.archetype(ab).unwrap().is_empty());
}

#[test]
fn test_add_then_remove_scenario() {
    let mut store = Store::new(schema()).unwrap();
    let e = store.spawn(&vals(&[("a", Value::U32(1))])).unwrap();

    store.update(e, &vals(&[("b", Value::U32(2))])).unwrap();
    let location = store.locate(e).unwrap();
    assert_eq!(store.archetype_for(&["id", "a", "b"]), Some(location.archetype));
    assert_eq!(store.get(e, "a"), Some(Value::U32(1)));
    assert_eq!(store.get(e, "b"), Some(Value::U32(2)));

    store.update(e, &vals(&[("a", Value::Undefined)])).unwrap();
    let location = store.locate(e).unwrap();
    let archetype = store.archetype(location.archetype).unwrap();
    assert_eq!(archetype.component_names(), ["b", "id"]);
    assert_eq!(store.get(e, "b"), Some(Value::U32(2)));
    assert_eq!(store.get(e, "a"), None);
}

#[test]
fn test_struct_columns_expose_leaves() {
    let mut store = Store::new(schema()).unwrap();
    let transform = Value::record([
        ("position", Value::f32s(&[1.0, 2.0, 3.0])),
        ("scale", Value::F32(0.5)),
    ]);
    let e = store.spawn(&vals(&[("transform", transform.clone())])).unwrap();

    let archetype = store.archetype(store.locate(e).unwrap().archetype).unwrap();
    let column = archetype.column("transform").unwrap();
    assert_eq!(column.leaf_count(), 4);
    assert_eq!(column.leaf(3).unwrap().as_f32(), Some(&[0.5][..]));
    assert_eq!(column.layout().unwrap().size(), 32);
    assert_eq!(store.get(e, "transform"), Some(transform));
}

#[test]
fn test_observable_and_unobservable_agree() {
    fn body(tx: &mut tessera_core::Transaction<'_>) -> Result<(), StoreError> {
        let a = tx.spawn(&vals(&[("a", Value::U32(1))]))?;
        let b = tx.spawn(&vals(&[("b", Value::U32(2))]))?;
        tx.update(a, &vals(&[("c", Value::U32(3))]))?;
        tx.delete(b)?;
        tx.update(a, &vals(&[("a", Value::Undefined)]))?;
        Ok(())
    }

    let mut observed = Store::new(schema()).unwrap();
    let mut silent = Store::new(schema()).unwrap();
    let result = observed.execute(body).unwrap();
    silent.execute_unobservable(body).unwrap();

    let snapshot = |store: &Store| -> Vec<_> {
        (0..4)
            .map(|i| store.read(Entity::new(i)))
            .collect()
    };
    assert_eq!(snapshot(&observed), snapshot(&silent));
    assert_eq!(result.changed_entities.len(), 2);

    // the redo log replays the transaction on a fresh store
    let mut replay = Store::new(schema()).unwrap();
    replay.apply(&result.redo).unwrap();
    assert_eq!(snapshot(&replay), snapshot(&observed));
}

/// Sorted component names of the archetype holding `entity`.
fn archetype_names(store: &Store, entity: Entity) -> Vec<String> {
    let location = store.locate(entity).expect("live entity has a location");
    store
        .archetype(location.archetype)
        .expect("archetype exists")
        .component_names()
        .to_vec()
}

#[test]
fn test_rollback_of_delete_keeps_default_opaque_component() {
    let mut store = Store::new(schema()).unwrap();
    let labelled = store.ensure_archetype(&["a", "name"]).unwrap();
    let e = store.insert(labelled, &vals(&[("a", Value::U32(4))])).unwrap();
    let before = store.read(e).unwrap();
    assert_eq!(before["name"], Value::Undefined);

    let err = store
        .execute(|tx| {
            tx.delete(e)?;
            tx.delete(Entity::new(50))
        })
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(store.locate(e).unwrap().archetype, labelled);
    assert_eq!(store.read(e), Some(before));
    assert_eq!(store.archetypes().len(), 1);
}

#[test]
fn test_rollback_of_migrating_updates() {
    let mut store = Store::new(schema()).unwrap();
    let labelled = store.ensure_archetype(&["a", "name"]).unwrap();
    let e = store.insert(labelled, &vals(&[("a", Value::U32(1))])).unwrap();
    let f = store.spawn(&vals(&[("a", Value::U32(2))])).unwrap();
    let plain = store.locate(f).unwrap().archetype;
    let before = (store.read(e), store.read(f));

    let err = store
        .execute(|tx| {
            // drops the default label and adds b
            tx.update(e, &vals(&[("name", Value::Undefined), ("b", Value::U32(5))]))?;
            tx.update(f, &vals(&[("name", Value::from("scout"))]))?;
            tx.update(e, &vals(&[("a", Value::U32(9))]))?;
            tx.delete(Entity::new(50))
        })
        .unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(store.locate(e).unwrap().archetype, labelled);
    assert_eq!(store.locate(f).unwrap().archetype, plain);
    assert_eq!((store.read(e), store.read(f)), before);
    assert_locations_consistent(&store, &[e, f]);
}

#[test]
fn test_redo_replay_lands_in_same_archetypes() {
    let mut store = Store::new(schema()).unwrap();
    let result = store
        .execute(|tx| {
            let labelled = tx.ensure_archetype(&["a", "name"])?;
            let e = tx.insert(labelled, &vals(&[("a", Value::U32(3))]))?;
            let f = tx.spawn(&vals(&[("b", Value::U32(1)), ("name", Value::from("scout"))]))?;
            tx.update(f, &vals(&[("name", Value::Undefined), ("c", Value::U32(2))]))?;
            tx.update(e, &vals(&[("b", Value::U32(8))]))?;
            Ok(vec![e, f])
        })
        .unwrap();

    let mut replay = Store::new(schema()).unwrap();
    replay.apply(&result.redo).unwrap();
    for &entity in &result.value {
        assert_eq!(replay.read(entity), store.read(entity));
        assert_eq!(archetype_names(&replay, entity), archetype_names(&store, entity));
    }
    assert_eq!(archetype_names(&replay, result.value[0]), ["a", "b", "id", "name"]);
    assert_eq!(archetype_names(&replay, result.value[1]), ["b", "c", "id"]);

    store.apply(&result.undo).unwrap();
    assert_eq!(store.entity_count(), 0);
}

#[test]
fn test_column_writes_keep_row_count() {
    let mut store = Store::new(schema()).unwrap();
    let e = store.spawn(&vals(&[("a", Value::U32(1)), ("b", Value::U32(2))])).unwrap();
    let id = store.locate(e).unwrap().archetype;

    let table = store.archetype_mut(id).unwrap();
    let mut column = table.column_mut("a").unwrap();
    column.set(0, &Value::U32(10)).unwrap();
    assert!(matches!(
        column.set(5, &Value::U32(11)),
        Err(SchemaViolation::RowOutOfRange { row: 5, .. })
    ));
    assert!(table.column_mut("id").is_none());

    let f = store.spawn(&vals(&[("a", Value::U32(3)), ("b", Value::U32(4))])).unwrap();
    let table = store.archetype(id).unwrap();
    for name in table.component_names() {
        assert_eq!(table.column(name).unwrap().len(), table.len());
    }
    assert_eq!(store.get(e, "a"), Some(Value::U32(10)));
    assert_eq!(store.get(f, "a"), Some(Value::U32(3)));
    assert_locations_consistent(&store, &[e, f]);
}

#[test]
fn test_schema_from_toml_builds_store() {
    let source = r#"
        unassigned_resources = ["device"]

        [components]
        mass = { shape = "f32", default = 1.0 }
        velocity = "vec3"

        [archetypes]
        body = ["mass", "velocity"]

        [resources]
        gravity = -9.8
    "#;
    let mut store = Store::new(SchemaFragment::from_toml_str(source).unwrap()).unwrap();
    let body = store.named_archetype("body").unwrap();
    let e = store.insert(body, &ComponentValues::new()).unwrap();

    assert_eq!(store.get(e, "mass"), Some(Value::F32(1.0)));
    assert!(!store.resources().is_assigned("device"));
    assert_eq!(store.resource("gravity"), Ok(&Value::F64(-9.8)));
}
