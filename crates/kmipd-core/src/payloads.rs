//! Operation payload stubs.
//!
//! The daemon's registered operations are dispatch stubs: they validate
//! nothing about key material and return skeleton payloads. The types here
//! pin the payload shapes so handlers and tests can speak about them without
//! hand-building TTLV trees.

use crate::message::ProtocolVersion;
use crate::ttlv::{tag, CodecError, Ttlv};

/// Request payload of the Create operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateRequestPayload {
    pub object_type: Option<u32>,
}

impl CreateRequestPayload {
    pub fn from_ttlv(node: &Ttlv) -> Result<Self, CodecError> {
        Ok(Self {
            object_type: node.child(tag::OBJECT_TYPE).map(Ttlv::as_enum).transpose()?,
        })
    }
}

/// Response payload of the Create operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateResponsePayload {
    pub object_type: Option<u32>,
    pub unique_identifier: Option<String>,
}

impl CreateResponsePayload {
    #[must_use]
    pub fn to_ttlv(&self) -> Ttlv {
        let mut fields = Vec::new();
        if let Some(object_type) = self.object_type {
            fields.push(Ttlv::enumeration(tag::OBJECT_TYPE, object_type));
        }
        if let Some(id) = &self.unique_identifier {
            fields.push(Ttlv::text(tag::UNIQUE_IDENTIFIER, id.clone()));
        }
        Ttlv::structure(tag::RESPONSE_PAYLOAD, fields)
    }
}

/// Request payload of the DiscoverVersions operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoverVersionsRequestPayload {
    pub protocol_version: Vec<ProtocolVersion>,
}

impl DiscoverVersionsRequestPayload {
    pub fn from_ttlv(node: &Ttlv) -> Result<Self, CodecError> {
        Ok(Self {
            protocol_version: node
                .children(tag::PROTOCOL_VERSION)
                .map(ProtocolVersion::from_ttlv)
                .collect::<Result<_, _>>()?,
        })
    }
}

/// Response payload of the DiscoverVersions operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoverVersionsResponsePayload {
    pub protocol_version: Vec<ProtocolVersion>,
}

impl DiscoverVersionsResponsePayload {
    /// The versions this server speaks, newest first.
    #[must_use]
    pub fn supported() -> Self {
        Self {
            protocol_version: vec![
                ProtocolVersion::V2_0,
                ProtocolVersion::V1_4,
                ProtocolVersion::V1_2,
                ProtocolVersion::V1_0,
            ],
        }
    }

    #[must_use]
    pub fn to_ttlv(&self) -> Ttlv {
        Ttlv::structure(
            tag::RESPONSE_PAYLOAD,
            self.protocol_version
                .iter()
                .map(|v| v.to_ttlv())
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_create_response_is_an_empty_structure() {
        let node = CreateResponsePayload::default().to_ttlv();
        assert_eq!(node, Ttlv::structure(tag::RESPONSE_PAYLOAD, Vec::new()));
    }

    #[test]
    fn discover_versions_lists_newest_first() {
        let payload = DiscoverVersionsResponsePayload::supported();
        assert_eq!(payload.protocol_version[0], ProtocolVersion::V2_0);
        let node = payload.to_ttlv();
        assert_eq!(node.children(tag::PROTOCOL_VERSION).count(), 4);
    }

    #[test]
    fn create_request_payload_parses_object_type() {
        let node = Ttlv::structure(
            tag::REQUEST_PAYLOAD,
            vec![Ttlv::enumeration(tag::OBJECT_TYPE, 0x02)],
        );
        let payload = CreateRequestPayload::from_ttlv(&node).unwrap();
        assert_eq!(payload.object_type, Some(0x02));
    }
}
