//! Live operation registry with allow/deny filtering.
//!
//! A registry starts as a snapshot of the process-wide default table
//! ([`crate::operations::default_handlers`]) and is then narrowed from
//! configuration. Lookups take a shared lock; mutation is exclusive and
//! happens once at server startup.

use std::sync::{Arc, RwLock};

use kmipd_core::Operation;

use crate::config::OperationFilter;
use crate::operations::{default_handlers, HandlerTable, OperationHandler};

/// Concurrent mapping from operation code to handler.
pub struct OperationRegistry {
    handlers: RwLock<HandlerTable>,
}

impl OperationRegistry {
    /// A fresh registry holding a copy of the default table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(default_handlers().clone()),
        }
    }

    /// Looks up the handler for an operation.
    #[must_use]
    pub fn lookup(&self, operation: Operation) -> Option<Arc<dyn OperationHandler>> {
        self.handlers
            .read()
            .expect("registry lock poisoned")
            .get(&operation)
            .cloned()
    }

    /// Re-includes operations by copying them back from the defaults.
    /// Unknown operations are ignored.
    pub fn add(&self, operations: &[Operation]) {
        let mut handlers = self.handlers.write().expect("registry lock poisoned");
        for operation in operations {
            if let Some(handler) = default_handlers().get(operation) {
                handlers.insert(*operation, Arc::clone(handler));
            }
        }
    }

    /// Removes operations from the live table.
    pub fn remove(&self, operations: &[Operation]) {
        let mut handlers = self.handlers.write().expect("registry lock poisoned");
        for operation in operations {
            handlers.remove(operation);
        }
    }

    /// Retains only the listed operations.
    pub fn keep_only(&self, operations: &[Operation]) {
        let mut handlers = self.handlers.write().expect("registry lock poisoned");
        handlers.retain(|operation, _| operations.contains(operation));
    }

    /// Applies the configured filter: a non-empty `only` list wins over
    /// `exclude`; an empty filter passes the defaults through.
    pub fn configure(&self, filter: &OperationFilter) {
        if !filter.only.is_empty() {
            let only: Vec<Operation> = filter.only.iter().copied().map(Operation).collect();
            self.keep_only(&only);
        } else if !filter.exclude.is_empty() {
            let exclude: Vec<Operation> = filter.exclude.iter().copied().map(Operation).collect();
            self.remove(&exclude);
        }
    }

    /// Registered operations in ascending code order.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        self.handlers
            .read()
            .expect("registry lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().expect("registry lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl OperationRegistry {
    /// A registry over an arbitrary table, for exercising handler behavior
    /// the default stubs cannot produce.
    pub(crate) fn from_table(table: HandlerTable) -> Self {
        Self {
            handlers: RwLock::new(table),
        }
    }
}
