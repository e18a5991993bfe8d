//! # Database
//!
//! A shared [`Store`] plus a registry of named transactions. Callers invoke
//! transactions by name with an argument [`Value`]; the body runs under the
//! store's write lock.
//!
//! The store lives behind `Arc<RwLock<_>>` so the scheduler can hand the same
//! store to its systems.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{SchemaViolation, StoreResult};
use crate::schema::Value;
use crate::store::Store;
use crate::transaction::{Transaction, TransactionResult, TxValue};

/// Body of a named transaction.
pub type TransactionFn = Box<dyn Fn(&mut Transaction<'_>, &Value) -> StoreResult<TxValue> + Send + Sync>;

/// Store plus named transactions.
pub struct Database {
    store: Arc<RwLock<Store>>,
    transactions: BTreeMap<String, TransactionFn>,
}

impl Database {
    /// Wraps a store.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self {
            store: Arc::new(RwLock::new(store)),
            transactions: BTreeMap::new(),
        }
    }

    /// Shared handle to the store.
    #[inline]
    #[must_use]
    pub const fn store(&self) -> &Arc<RwLock<Store>> {
        &self.store
    }

    /// Runs `f` with read access to the store.
    pub fn read<R>(&self, f: impl FnOnce(&Store) -> R) -> R {
        f(&self.store.read())
    }

    /// Registers a named transaction.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation::Conflict`] if the name is taken.
    pub fn register<F>(&mut self, name: impl Into<String>, body: F) -> Result<(), SchemaViolation>
    where
        F: Fn(&mut Transaction<'_>, &Value) -> StoreResult<TxValue> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.transactions.contains_key(&name) {
            return Err(SchemaViolation::Conflict(format!("transaction {name}")));
        }
        self.transactions.insert(name, Box::new(body));
        Ok(())
    }

    /// Registered transaction names.
    pub fn transaction_names(&self) -> impl Iterator<Item = &str> {
        self.transactions.keys().map(String::as_str)
    }

    /// Runs a named transaction observably.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation::UnknownTransaction`] for unregistered names, or
    /// whatever the body returns (after rollback).
    pub fn transact(&self, name: &str, args: &Value) -> StoreResult<TransactionResult<TxValue>> {
        let body = self.transaction(name)?;
        let mut store = self.store.write();
        tracing::trace!("Executing transaction {}", name);
        store.execute(|tx| body(tx, args))
    }

    /// Runs a named transaction without recording changes.
    ///
    /// # Errors
    ///
    /// [`SchemaViolation::UnknownTransaction`] for unregistered names, or
    /// whatever the body returns. Earlier writes stay applied.
    pub fn transact_unobservable(&self, name: &str, args: &Value) -> StoreResult<TxValue> {
        let body = self.transaction(name)?;
        let mut store = self.store.write();
        store.execute_unobservable(|tx| body(tx, args))
    }

    fn transaction(&self, name: &str) -> StoreResult<&TransactionFn> {
        self.transactions
            .get(name)
            .ok_or_else(|| SchemaViolation::UnknownTransaction(name.to_owned()).into())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("transactions", &self.transactions.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
