//! Per-operation authorization from client identity.
//!
//! The gate answers one question: for each requested operation, may this
//! client (identified by its certificate chain) run it. The answer is a
//! [`CheckResponse`] with an explicit boolean per operation; an empty answer
//! counts as denial, so a gate that cannot decide fails closed.

use std::collections::BTreeMap;

use kmipd_core::Operation;
use rustls::pki_types::CertificateDer;

/// Result of an authorization check: one decision per asked operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckResponse {
    per_operation: BTreeMap<Operation, bool>,
}

impl CheckResponse {
    #[must_use]
    pub fn new(per_operation: BTreeMap<Operation, bool>) -> Self {
        Self { per_operation }
    }

    /// Grants every listed operation.
    #[must_use]
    pub fn allow_all(operations: &[Operation]) -> Self {
        Self {
            per_operation: operations.iter().map(|op| (*op, true)).collect(),
        }
    }

    /// The check passed: there is at least one decision and none is a
    /// denial. An empty response is a failure (fail-closed).
    #[must_use]
    pub fn succeeded(&self) -> bool {
        !self.per_operation.is_empty() && self.per_operation.values().all(|allowed| *allowed)
    }

    #[must_use]
    pub fn failed(&self) -> bool {
        !self.succeeded()
    }

    /// The decision for one operation, if the gate was asked about it.
    #[must_use]
    pub fn decision(&self, operation: Operation) -> Option<bool> {
        self.per_operation.get(&operation).copied()
    }
}

/// An authorization gate, constructed from configuration.
pub trait AuthorizationGate: Send + Sync {
    /// Produces a decision for every operation in `operations`.
    fn authorize(
        &self,
        client_certificates: &[CertificateDer<'static>],
        operations: &[Operation],
    ) -> CheckResponse;
}

/// Certificate-based gate.
///
/// Decisions are not yet policy-driven: every asked operation is granted,
/// which keeps the per-operation contract intact while the policy source is
/// out of scope. Restrictive gates are exercised through the trait in tests.
#[derive(Debug, Default)]
pub struct CertificateGate;

impl CertificateGate {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl AuthorizationGate for CertificateGate {
    fn authorize(
        &self,
        _client_certificates: &[CertificateDer<'static>],
        operations: &[Operation],
    ) -> CheckResponse {
        CheckResponse::allow_all(operations)
    }
}
