//! Operation handlers and the default registration table.
//!
//! Every supported KMIP operation is an [`OperationHandler`]: a stateless
//! function from request payload to response payload, tagged with the
//! operation code it serves. The process-wide default table is built once by
//! [`default_handlers`] as an explicit list - there is no init-time side
//! effect to register a handler; adding one means adding it to the list
//! below. Live registries clone this table and then filter it from
//! configuration.
//!
//! The handlers here are dispatch stubs: they pin the wire contract of their
//! operation without implementing key-management semantics.

mod create;
mod discover_versions;

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

pub use create::CreateHandler;
pub use discover_versions::DiscoverVersionsHandler;
use kmipd_core::{KmipResult, Operation, Ttlv};

use crate::protocol::context::RequestContext;
use crate::services::Services;

/// A handler for one KMIP operation.
///
/// Implementations must be stateless; shared state belongs behind
/// [`Services`]. Handlers run inside a panic barrier, so a defect in one
/// handler fails its batch item rather than the connection.
pub trait OperationHandler: Send + Sync {
    /// The operation code this handler serves.
    fn operation(&self) -> Operation;

    /// Executes the operation against a request payload, returning the
    /// response payload.
    ///
    /// # Errors
    ///
    /// Returns a [`kmipd_core::KmipError`] whose reason drives the batch
    /// item's `ResultReason`.
    fn execute(
        &self,
        ctx: &RequestContext,
        services: &Services,
        request_payload: &Ttlv,
    ) -> KmipResult<Ttlv>;
}

/// Table of all known handlers, keyed and iterated by operation code.
pub type HandlerTable = BTreeMap<Operation, Arc<dyn OperationHandler>>;

static DEFAULTS: OnceLock<HandlerTable> = OnceLock::new();

/// The process-wide default handler table, built on first use.
pub fn default_handlers() -> &'static HandlerTable {
    DEFAULTS.get_or_init(|| {
        let handlers: Vec<Arc<dyn OperationHandler>> = vec![
            Arc::new(CreateHandler),
            Arc::new(DiscoverVersionsHandler),
        ];

        handlers
            .into_iter()
            .map(|handler| (handler.operation(), handler))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_contain_the_stub_operations() {
        let defaults = default_handlers();
        assert!(defaults.contains_key(&Operation::CREATE));
        assert!(defaults.contains_key(&Operation::DISCOVER_VERSIONS));
        assert!(!defaults.contains_key(&Operation::DESTROY));
    }

    #[test]
    fn table_iterates_in_operation_order() {
        let ops: Vec<Operation> = default_handlers().keys().copied().collect();
        let mut sorted = ops.clone();
        sorted.sort();
        assert_eq!(ops, sorted);
    }
}
