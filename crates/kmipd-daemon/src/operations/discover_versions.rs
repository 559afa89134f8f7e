//! DiscoverVersions operation.

use kmipd_core::payloads::{DiscoverVersionsRequestPayload, DiscoverVersionsResponsePayload};
use kmipd_core::{KmipError, KmipResult, Operation, Ttlv};

use super::OperationHandler;
use crate::protocol::context::RequestContext;
use crate::services::Services;

/// Handler for DiscoverVersions: reports the protocol versions this server
/// speaks, filtered to the client's list when one was supplied.
pub struct DiscoverVersionsHandler;

impl OperationHandler for DiscoverVersionsHandler {
    fn operation(&self) -> Operation {
        Operation::DISCOVER_VERSIONS
    }

    fn execute(
        &self,
        _ctx: &RequestContext,
        _services: &Services,
        request_payload: &Ttlv,
    ) -> KmipResult<Ttlv> {
        let request = DiscoverVersionsRequestPayload::from_ttlv(request_payload)
            .map_err(|e| KmipError::invalid_field(e))?;

        let mut supported = DiscoverVersionsResponsePayload::supported();
        if !request.protocol_version.is_empty() {
            supported
                .protocol_version
                .retain(|v| request.protocol_version.contains(v));
        }

        Ok(supported.to_ttlv())
    }
}
