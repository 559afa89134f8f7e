//! Create operation stub.

use kmipd_core::payloads::{CreateRequestPayload, CreateResponsePayload};
use kmipd_core::{KmipError, KmipResult, Operation, Ttlv};

use super::OperationHandler;
use crate::protocol::context::RequestContext;
use crate::services::Services;

/// Stub handler for Create: accepts any payload and returns an empty
/// `CreateResponsePayload`. No object is created and the ID placeholder is
/// left untouched.
pub struct CreateHandler;

impl OperationHandler for CreateHandler {
    fn operation(&self) -> Operation {
        Operation::CREATE
    }

    fn execute(
        &self,
        _ctx: &RequestContext,
        _services: &Services,
        request_payload: &Ttlv,
    ) -> KmipResult<Ttlv> {
        let _request = CreateRequestPayload::from_ttlv(request_payload)
            .map_err(|e| KmipError::invalid_field(e))?;

        Ok(CreateResponsePayload::default().to_ttlv())
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use kmipd_core::ttlv::tag;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::Config;
    use crate::protocol::context::ConnectionContext;

    fn request_context() -> RequestContext {
        let addr: SocketAddr = "127.0.0.1:5696".parse().unwrap();
        RequestContext::new(
            Arc::new(ConnectionContext::new(addr)),
            CancellationToken::new(),
        )
    }

    #[test]
    fn returns_an_empty_response_payload() {
        let services = Services::new(Arc::new(Config::default()));
        let payload = Ttlv::structure(tag::REQUEST_PAYLOAD, Vec::new());

        let result = CreateHandler
            .execute(&request_context(), &services, &payload)
            .unwrap();
        assert_eq!(result, Ttlv::structure(tag::RESPONSE_PAYLOAD, Vec::new()));
    }
}
