//! # Transactions
//!
//! A transaction is a closure that mutates the store through a
//! [`Transaction`] handle. Two ways to run one:
//!
//! - [`Store::execute`] records every primitive write as a redo operation and
//!   its inverse as an undo operation, collects the changed entities,
//!   components, archetypes and resources, and replays the undo log if the
//!   closure fails.
//! - [`Store::execute_unobservable`] records nothing. A failure leaves earlier
//!   writes applied.
//!
//! Both paths leave the store in the same state on success.
//!
//! Inserts are logged with their full component set, so replaying one lands
//! in the same archetype even when a component holds `Undefined` (the opaque
//! default). Undoing an update relocates the entity back to its original
//! component set. Undoing a delete re-inserts the entity's values; because
//! ids are recycled LIFO, replaying the undo log in order hands back the
//! original ids.

use std::collections::BTreeSet;

use crate::archetype::ArchetypeId;
use crate::entity::{Entity, EntityLocation};
use crate::error::{StoreError, StoreResult};
use crate::schema::{ComponentValues, Value, ID_COMPONENT};
use crate::store::Store;

/// Value a transaction hands back: the entity it created, if any.
pub type TxValue = Option<Entity>;

/// One primitive write.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOperation {
    /// Create an entity in the archetype with exactly `components`.
    Insert {
        /// Component names, `id` excluded.
        components: Vec<String>,
        /// Component values, `id` excluded.
        values: ComponentValues,
    },
    /// Update an entity.
    Update {
        /// Target entity.
        entity: Entity,
        /// Values to write; `Undefined` removes.
        values: ComponentValues,
    },
    /// Move an entity to the archetype with exactly `components` and write
    /// `values`; `Undefined` resets to the default (see [`Store::relocate`]).
    Relocate {
        /// Target entity.
        entity: Entity,
        /// Component names, `id` excluded.
        components: Vec<String>,
        /// Values to write.
        values: ComponentValues,
    },
    /// Delete an entity.
    Delete {
        /// Target entity.
        entity: Entity,
    },
    /// Replace a resource value.
    SetResource {
        /// Resource name.
        name: String,
        /// New value.
        value: Value,
    },
}

/// Outcome of an observable transaction.
#[derive(Clone, Debug, PartialEq)]
pub struct TransactionResult<T> {
    /// Value returned by the transaction body.
    pub value: T,
    /// Operations that replay the transaction.
    pub redo: Vec<WriteOperation>,
    /// Operations that revert the transaction, in application order.
    pub undo: Vec<WriteOperation>,
    /// Entities inserted, updated or deleted.
    pub changed_entities: BTreeSet<Entity>,
    /// Components whose values changed.
    pub changed_components: BTreeSet<String>,
    /// Archetypes that gained or lost rows or had rows written.
    pub changed_archetypes: BTreeSet<ArchetypeId>,
    /// Resources that were assigned.
    pub changed_resources: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct ChangeLog {
    redo: Vec<WriteOperation>,
    /// Inverse operations in the order they were recorded.
    undo: Vec<WriteOperation>,
    entities: BTreeSet<Entity>,
    components: BTreeSet<String>,
    archetypes: BTreeSet<ArchetypeId>,
    resources: BTreeSet<String>,
}

impl ChangeLog {
    fn touch(&mut self, location: Option<EntityLocation>) {
        if let Some(location) = location {
            self.archetypes.insert(location.archetype);
        }
    }

    /// Records an update, folding it into the previous one when both target
    /// the same entity.
    ///
    /// The undo entry relocates back to `original` (the component set before
    /// the update) and restores the replaced values of those components.
    fn record_update(
        &mut self,
        entity: Entity,
        values: &ComponentValues,
        original: Vec<String>,
        replaced: ComponentValues,
    ) {
        if let (
            Some(WriteOperation::Update {
                entity: redo_entity,
                values: redo_values,
            }),
            Some(WriteOperation::Relocate {
                entity: undo_entity,
                components,
                values: undo_values,
            }),
        ) = (self.redo.last_mut(), self.undo.last_mut())
        {
            if *redo_entity == entity && *undo_entity == entity {
                redo_values.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
                for (name, old) in replaced {
                    if components.contains(&name) {
                        undo_values.entry(name).or_insert(old);
                    }
                }
                return;
            }
        }

        let restore = replaced
            .into_iter()
            .filter(|(name, _)| original.contains(name))
            .collect();
        self.redo.push(WriteOperation::Update {
            entity,
            values: values.clone(),
        });
        self.undo.push(WriteOperation::Relocate {
            entity,
            components: original,
            values: restore,
        });
    }
}

/// Write handle passed to transaction bodies.
pub struct Transaction<'s> {
    store: &'s mut Store,
    log: Option<ChangeLog>,
}

impl Transaction<'_> {
    /// Read access to the store.
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Store {
        self.store
    }

    /// Returns `true` if writes are being recorded.
    #[inline]
    #[must_use]
    pub const fn is_observed(&self) -> bool {
        self.log.is_some()
    }

    /// See [`Store::ensure_archetype`].
    ///
    /// # Errors
    ///
    /// As for [`Store::ensure_archetype`].
    pub fn ensure_archetype<S: AsRef<str>>(&mut self, names: &[S]) -> StoreResult<ArchetypeId> {
        self.store.ensure_archetype(names)
    }

    /// See [`Store::insert`].
    ///
    /// # Errors
    ///
    /// As for [`Store::insert`].
    pub fn insert(&mut self, archetype: ArchetypeId, values: &ComponentValues) -> StoreResult<Entity> {
        let entity = self.store.insert(archetype, values)?;
        if let Some(log) = &mut self.log {
            let mut row = self.store.read(entity).ok_or_else(|| {
                StoreError::Corrupted(format!("inserted entity {entity} cannot be read"))
            })?;
            row.remove(ID_COMPONENT);
            log.components.extend(row.keys().cloned());
            log.redo.push(WriteOperation::Insert {
                components: row.keys().cloned().collect(),
                values: row,
            });
            log.undo.push(WriteOperation::Delete { entity });
            log.entities.insert(entity);
            log.archetypes.insert(archetype);
        }
        Ok(entity)
    }

    /// See [`Store::spawn`].
    ///
    /// # Errors
    ///
    /// As for [`Store::spawn`].
    pub fn spawn(&mut self, values: &ComponentValues) -> StoreResult<Entity> {
        let names: Vec<&str> = values
            .iter()
            .filter(|(_, v)| !v.is_undefined())
            .map(|(k, _)| k.as_str())
            .collect();
        let archetype = self.store.ensure_archetype(&names)?;
        self.insert(archetype, values)
    }

    /// See [`Store::update`].
    ///
    /// # Errors
    ///
    /// As for [`Store::update`].
    pub fn update(&mut self, entity: Entity, values: &ComponentValues) -> StoreResult<()> {
        let Some(log) = &mut self.log else {
            return self.store.update(entity, values);
        };

        let old = self
            .store
            .read(entity)
            .ok_or(StoreError::EntityNotFound(entity))?;
        let before = self.store.locate(entity);
        self.store.update(entity, values)?;

        let mut replaced = ComponentValues::new();
        for (name, new) in values {
            let previous = old.get(name);
            // removing a component changes it even when it held `Undefined`
            let changed = match previous {
                Some(previous) => new.is_undefined() || new != previous,
                None => !new.is_undefined(),
            };
            if changed {
                log.components.insert(name.clone());
                replaced.insert(name.clone(), previous.cloned().unwrap_or_default());
            }
        }
        let original = old.into_keys().filter(|k| k != ID_COMPONENT).collect();
        log.entities.insert(entity);
        log.touch(before);
        log.touch(self.store.locate(entity));
        log.record_update(entity, values, original, replaced);
        Ok(())
    }

    /// See [`Store::delete`].
    ///
    /// # Errors
    ///
    /// As for [`Store::delete`].
    pub fn delete(&mut self, entity: Entity) -> StoreResult<()> {
        let Some(log) = &mut self.log else {
            return self.store.delete(entity);
        };

        let mut old = self
            .store
            .read(entity)
            .ok_or(StoreError::EntityNotFound(entity))?;
        log.touch(self.store.locate(entity));
        self.store.delete(entity)?;

        old.remove(ID_COMPONENT);
        log.components.extend(old.keys().cloned());
        log.entities.insert(entity);
        log.redo.push(WriteOperation::Delete { entity });
        log.undo.push(WriteOperation::Insert {
            components: old.keys().cloned().collect(),
            values: old,
        });
        Ok(())
    }

    /// See [`Store::set_resource`].
    ///
    /// # Errors
    ///
    /// As for [`Store::set_resource`].
    pub fn set_resource(&mut self, name: &str, value: Value) -> StoreResult<Value> {
        let Some(log) = &mut self.log else {
            return self.store.set_resource(name, value);
        };

        let previous = self.store.set_resource(name, value.clone())?;
        log.resources.insert(name.to_owned());
        log.redo.push(WriteOperation::SetResource {
            name: name.to_owned(),
            value,
        });
        log.undo.push(WriteOperation::SetResource {
            name: name.to_owned(),
            value: previous.clone(),
        });
        Ok(previous)
    }
}

impl Store {
    /// Runs `body` as an observable transaction.
    ///
    /// # Errors
    ///
    /// The error returned by `body`, after the recorded writes were undone.
    /// [`StoreError::Corrupted`] if undoing itself fails.
    pub fn execute<T, F>(&mut self, body: F) -> StoreResult<TransactionResult<T>>
    where
        F: FnOnce(&mut Transaction<'_>) -> StoreResult<T>,
    {
        let mut tx = Transaction {
            store: self,
            log: Some(ChangeLog::default()),
        };
        let outcome = body(&mut tx);
        let log = tx.log.take().unwrap_or_default();

        match outcome {
            Ok(value) => {
                tracing::trace!("Transaction committed {} writes", log.redo.len());
                let mut undo = log.undo;
                undo.reverse();
                Ok(TransactionResult {
                    value,
                    redo: log.redo,
                    undo,
                    changed_entities: log.entities,
                    changed_components: log.components,
                    changed_archetypes: log.archetypes,
                    changed_resources: log.resources,
                })
            }
            Err(error) => {
                tracing::debug!(
                    "Transaction failed ({}), rolling back {} writes",
                    error,
                    log.undo.len()
                );
                let undo: Vec<_> = log.undo.into_iter().rev().collect();
                match self.apply(&undo) {
                    Ok(()) => Err(error),
                    Err(rollback) => {
                        tracing::error!("Rollback failed: {}", rollback);
                        Err(StoreError::Corrupted(format!(
                            "rollback of failed transaction ({error}) failed: {rollback}"
                        )))
                    }
                }
            }
        }
    }

    /// Runs `body` without recording anything.
    ///
    /// # Errors
    ///
    /// The error returned by `body`. Earlier writes stay applied.
    pub fn execute_unobservable<T, F>(&mut self, body: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> StoreResult<T>,
    {
        let mut tx = Transaction {
            store: self,
            log: None,
        };
        body(&mut tx)
    }

    /// Applies write operations in order, e.g. a redo or undo log.
    ///
    /// # Errors
    ///
    /// The first failing operation's error. Earlier operations stay applied.
    pub fn apply(&mut self, operations: &[WriteOperation]) -> StoreResult<()> {
        for operation in operations {
            match operation {
                WriteOperation::Insert { components, values } => {
                    let archetype = self.ensure_archetype(components)?;
                    self.insert(archetype, values)?;
                }
                WriteOperation::Update { entity, values } => self.update(*entity, values)?,
                WriteOperation::Relocate {
                    entity,
                    components,
                    values,
                } => self.relocate(*entity, components, values)?,
                WriteOperation::Delete { entity } => self.delete(*entity)?,
                WriteOperation::SetResource { name, value } => {
                    self.set_resource(name, value.clone())?;
                }
            }
        }
        Ok(())
    }
}
