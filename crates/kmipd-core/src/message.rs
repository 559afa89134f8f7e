//! KMIP request and response message model.
//!
//! The structures here mirror the message layout of the protocol: a header
//! followed by one or more batch items. Conversion to and from the TTLV tree
//! is explicit (`to_ttlv` / `from_ttlv`); the `*_bytes` helpers bind the
//! conversion to one of the three codecs.

use chrono::{DateTime, TimeZone, Utc};

use crate::error::ResultReason;
use crate::operation::Operation;
use crate::ttlv::{self, tag, CodecError, Ttlv, Value};

/// KMIP protocol version, `major.minor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: i32,
    pub minor: i32,
}

impl ProtocolVersion {
    pub const V1_0: ProtocolVersion = ProtocolVersion { major: 1, minor: 0 };
    pub const V1_2: ProtocolVersion = ProtocolVersion { major: 1, minor: 2 };
    pub const V1_4: ProtocolVersion = ProtocolVersion { major: 1, minor: 4 };
    pub const V2_0: ProtocolVersion = ProtocolVersion { major: 2, minor: 0 };

    pub(crate) fn to_ttlv(self) -> Ttlv {
        Ttlv::structure(
            tag::PROTOCOL_VERSION,
            vec![
                Ttlv::int(tag::PROTOCOL_VERSION_MAJOR, self.major),
                Ttlv::int(tag::PROTOCOL_VERSION_MINOR, self.minor),
            ],
        )
    }

    pub(crate) fn from_ttlv(node: &Ttlv) -> Result<Self, CodecError> {
        Ok(Self {
            major: node.require(tag::PROTOCOL_VERSION_MAJOR)?.as_i32()?,
            minor: node.require(tag::PROTOCOL_VERSION_MINOR)?.as_i32()?,
        })
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Status of one response batch item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ResultStatus {
    Success = 0,
    OperationFailed = 1,
    OperationPending = 2,
    OperationUndone = 3,
}

impl ResultStatus {
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }

    #[must_use]
    pub const fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            1 => Some(Self::OperationFailed),
            2 => Some(Self::OperationPending),
            3 => Some(Self::OperationUndone),
            _ => None,
        }
    }
}

/// Header of a request message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestHeader {
    pub protocol_version: Option<ProtocolVersion>,
    pub client_correlation_value: Option<String>,
    pub server_correlation_value: Option<String>,
    pub batch_count: i32,
}

impl RequestHeader {
    fn to_ttlv(&self) -> Ttlv {
        let mut fields = Vec::new();
        if let Some(version) = self.protocol_version {
            fields.push(version.to_ttlv());
        }
        if let Some(value) = &self.client_correlation_value {
            fields.push(Ttlv::text(tag::CLIENT_CORRELATION_VALUE, value.clone()));
        }
        if let Some(value) = &self.server_correlation_value {
            fields.push(Ttlv::text(tag::SERVER_CORRELATION_VALUE, value.clone()));
        }
        fields.push(Ttlv::int(tag::BATCH_COUNT, self.batch_count));
        Ttlv::structure(tag::REQUEST_HEADER, fields)
    }

    fn from_ttlv(node: &Ttlv) -> Result<Self, CodecError> {
        Ok(Self {
            protocol_version: node
                .child(tag::PROTOCOL_VERSION)
                .map(ProtocolVersion::from_ttlv)
                .transpose()?,
            client_correlation_value: text_child(node, tag::CLIENT_CORRELATION_VALUE)?,
            server_correlation_value: text_child(node, tag::SERVER_CORRELATION_VALUE)?,
            batch_count: node.require(tag::BATCH_COUNT)?.as_i32()?,
        })
    }
}

/// One operation inside a request message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBatchItem {
    pub operation: Operation,
    pub unique_batch_item_id: Option<Vec<u8>>,
    pub request_payload: Ttlv,
}

impl RequestBatchItem {
    /// A batch item with an empty request payload.
    #[must_use]
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            unique_batch_item_id: None,
            request_payload: Ttlv::structure(tag::REQUEST_PAYLOAD, Vec::new()),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<Vec<u8>>) -> Self {
        self.unique_batch_item_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Ttlv) -> Self {
        self.request_payload = payload;
        self
    }

    fn to_ttlv(&self) -> Ttlv {
        let mut fields = vec![Ttlv::enumeration(tag::OPERATION, self.operation.code())];
        if let Some(id) = &self.unique_batch_item_id {
            fields.push(Ttlv::bytes(tag::UNIQUE_BATCH_ITEM_ID, id.clone()));
        }
        fields.push(self.request_payload.clone());
        Ttlv::structure(tag::BATCH_ITEM, fields)
    }

    fn from_ttlv(node: &Ttlv) -> Result<Self, CodecError> {
        Ok(Self {
            operation: Operation(node.require(tag::OPERATION)?.as_enum()?),
            unique_batch_item_id: node
                .child(tag::UNIQUE_BATCH_ITEM_ID)
                .map(|c| c.as_bytes().map(<[u8]>::to_vec))
                .transpose()?,
            request_payload: node
                .child(tag::REQUEST_PAYLOAD)
                .cloned()
                .unwrap_or_else(|| Ttlv::structure(tag::REQUEST_PAYLOAD, Vec::new())),
        })
    }
}

/// A complete request message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMessage {
    pub header: RequestHeader,
    pub batch_items: Vec<RequestBatchItem>,
}

impl RequestMessage {
    /// A single-item request with the header batch count already set.
    #[must_use]
    pub fn single(version: ProtocolVersion, item: RequestBatchItem) -> Self {
        Self {
            header: RequestHeader {
                protocol_version: Some(version),
                batch_count: 1,
                ..RequestHeader::default()
            },
            batch_items: vec![item],
        }
    }

    #[must_use]
    pub fn to_ttlv(&self) -> Ttlv {
        let mut fields = vec![self.header.to_ttlv()];
        fields.extend(self.batch_items.iter().map(RequestBatchItem::to_ttlv));
        Ttlv::structure(tag::REQUEST_MESSAGE, fields)
    }

    pub fn from_ttlv(node: &Ttlv) -> Result<Self, CodecError> {
        expect_tag(node, tag::REQUEST_MESSAGE)?;
        Ok(Self {
            header: RequestHeader::from_ttlv(node.require(tag::REQUEST_HEADER)?)?,
            batch_items: node
                .children(tag::BATCH_ITEM)
                .map(RequestBatchItem::from_ttlv)
                .collect::<Result<_, _>>()?,
        })
    }

    #[must_use]
    pub fn to_ttlv_bytes(&self) -> Vec<u8> {
        ttlv::marshal(&self.to_ttlv())
    }

    pub fn from_ttlv_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_ttlv(&ttlv::unmarshal(bytes)?)
    }

    #[must_use]
    pub fn to_json_bytes(&self) -> Vec<u8> {
        ttlv::json::marshal(&self.to_ttlv())
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_ttlv(&ttlv::json::unmarshal(bytes)?)
    }

    #[must_use]
    pub fn to_xml_bytes(&self) -> Vec<u8> {
        ttlv::xml::marshal(&self.to_ttlv())
    }

    pub fn from_xml_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_ttlv(&ttlv::xml::unmarshal(bytes)?)
    }
}

/// Header of a response message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub protocol_version: ProtocolVersion,
    pub time_stamp: DateTime<Utc>,
    pub client_correlation_value: Option<String>,
    pub server_correlation_value: Option<String>,
    pub batch_count: i32,
}

impl ResponseHeader {
    /// A header stamped with the current time, truncated to whole seconds
    /// (the granularity of the wire encoding).
    #[must_use]
    pub fn now(protocol_version: ProtocolVersion, batch_count: i32) -> Self {
        Self {
            protocol_version,
            time_stamp: wire_now(),
            client_correlation_value: None,
            server_correlation_value: None,
            batch_count,
        }
    }

    fn to_ttlv(&self) -> Ttlv {
        let mut fields = vec![
            self.protocol_version.to_ttlv(),
            Ttlv::date_time(tag::TIME_STAMP, self.time_stamp),
        ];
        if let Some(value) = &self.client_correlation_value {
            fields.push(Ttlv::text(tag::CLIENT_CORRELATION_VALUE, value.clone()));
        }
        if let Some(value) = &self.server_correlation_value {
            fields.push(Ttlv::text(tag::SERVER_CORRELATION_VALUE, value.clone()));
        }
        fields.push(Ttlv::int(tag::BATCH_COUNT, self.batch_count));
        Ttlv::structure(tag::RESPONSE_HEADER, fields)
    }

    fn from_ttlv(node: &Ttlv) -> Result<Self, CodecError> {
        Ok(Self {
            protocol_version: ProtocolVersion::from_ttlv(node.require(tag::PROTOCOL_VERSION)?)?,
            time_stamp: node.require(tag::TIME_STAMP)?.as_date_time()?,
            client_correlation_value: text_child(node, tag::CLIENT_CORRELATION_VALUE)?,
            server_correlation_value: text_child(node, tag::SERVER_CORRELATION_VALUE)?,
            batch_count: node.require(tag::BATCH_COUNT)?.as_i32()?,
        })
    }
}

/// One operation result inside a response message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseBatchItem {
    pub operation: Operation,
    pub unique_batch_item_id: Option<Vec<u8>>,
    pub result_status: ResultStatus,
    pub result_reason: Option<ResultReason>,
    pub result_message: Option<String>,
    pub response_payload: Option<Ttlv>,
}

impl ResponseBatchItem {
    /// A successful item carrying a payload.
    #[must_use]
    pub fn success(
        operation: Operation,
        unique_batch_item_id: Option<Vec<u8>>,
        payload: Ttlv,
    ) -> Self {
        Self {
            operation,
            unique_batch_item_id,
            result_status: ResultStatus::Success,
            result_reason: None,
            result_message: None,
            response_payload: Some(payload),
        }
    }

    /// A failed item; the payload is always absent.
    #[must_use]
    pub fn failure(
        operation: Operation,
        unique_batch_item_id: Option<Vec<u8>>,
        reason: ResultReason,
        message: Option<String>,
    ) -> Self {
        Self {
            operation,
            unique_batch_item_id,
            result_status: ResultStatus::OperationFailed,
            result_reason: Some(reason),
            result_message: message,
            response_payload: None,
        }
    }

    fn to_ttlv(&self) -> Ttlv {
        let mut fields = vec![Ttlv::enumeration(tag::OPERATION, self.operation.code())];
        if let Some(id) = &self.unique_batch_item_id {
            fields.push(Ttlv::bytes(tag::UNIQUE_BATCH_ITEM_ID, id.clone()));
        }
        fields.push(Ttlv::enumeration(
            tag::RESULT_STATUS,
            self.result_status.code(),
        ));
        if let Some(reason) = self.result_reason {
            fields.push(Ttlv::enumeration(tag::RESULT_REASON, reason.code()));
        }
        if let Some(message) = &self.result_message {
            fields.push(Ttlv::text(tag::RESULT_MESSAGE, message.clone()));
        }
        if let Some(payload) = &self.response_payload {
            fields.push(payload.clone());
        }
        Ttlv::structure(tag::BATCH_ITEM, fields)
    }

    fn from_ttlv(node: &Ttlv) -> Result<Self, CodecError> {
        let status_node = node.require(tag::RESULT_STATUS)?;
        let result_status = ResultStatus::from_code(status_node.as_enum()?)
            .ok_or(CodecError::ValueOutOfRange(tag::RESULT_STATUS))?;
        Ok(Self {
            operation: Operation(node.require(tag::OPERATION)?.as_enum()?),
            unique_batch_item_id: node
                .child(tag::UNIQUE_BATCH_ITEM_ID)
                .map(|c| c.as_bytes().map(<[u8]>::to_vec))
                .transpose()?,
            result_status,
            result_reason: node
                .child(tag::RESULT_REASON)
                .map(|c| c.as_enum().map(ResultReason::from_code))
                .transpose()?,
            result_message: text_child(node, tag::RESULT_MESSAGE)?,
            response_payload: node.child(tag::RESPONSE_PAYLOAD).cloned(),
        })
    }
}

/// A complete response message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMessage {
    pub header: ResponseHeader,
    pub batch_items: Vec<ResponseBatchItem>,
}

impl ResponseMessage {
    #[must_use]
    pub fn to_ttlv(&self) -> Ttlv {
        let mut fields = vec![self.header.to_ttlv()];
        fields.extend(self.batch_items.iter().map(ResponseBatchItem::to_ttlv));
        Ttlv::structure(tag::RESPONSE_MESSAGE, fields)
    }

    pub fn from_ttlv(node: &Ttlv) -> Result<Self, CodecError> {
        expect_tag(node, tag::RESPONSE_MESSAGE)?;
        Ok(Self {
            header: ResponseHeader::from_ttlv(node.require(tag::RESPONSE_HEADER)?)?,
            batch_items: node
                .children(tag::BATCH_ITEM)
                .map(ResponseBatchItem::from_ttlv)
                .collect::<Result<_, _>>()?,
        })
    }

    #[must_use]
    pub fn to_ttlv_bytes(&self) -> Vec<u8> {
        ttlv::marshal(&self.to_ttlv())
    }

    pub fn from_ttlv_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_ttlv(&ttlv::unmarshal(bytes)?)
    }

    #[must_use]
    pub fn to_json_bytes(&self) -> Vec<u8> {
        ttlv::json::marshal(&self.to_ttlv())
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_ttlv(&ttlv::json::unmarshal(bytes)?)
    }

    #[must_use]
    pub fn to_xml_bytes(&self) -> Vec<u8> {
        ttlv::xml::marshal(&self.to_ttlv())
    }

    pub fn from_xml_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_ttlv(&ttlv::xml::unmarshal(bytes)?)
    }
}

/// Current time at the granularity the wire encoding can carry.
#[must_use]
pub fn wire_now() -> DateTime<Utc> {
    Utc.timestamp_opt(Utc::now().timestamp(), 0)
        .single()
        .expect("current time is representable")
}

fn expect_tag(node: &Ttlv, expected: ttlv::Tag) -> Result<(), CodecError> {
    if node.tag != expected {
        return Err(CodecError::UnexpectedTag {
            expected,
            found: node.tag,
        });
    }
    match node.value {
        Value::Structure(_) => Ok(()),
        _ => Err(CodecError::TypeMismatch {
            tag: node.tag,
            expected: "Structure",
            found: node.value.type_name(),
        }),
    }
}

fn text_child(node: &Ttlv, tag: ttlv::Tag) -> Result<Option<String>, CodecError> {
    node.child(tag)
        .map(|c| c.as_text().map(str::to_owned))
        .transpose()
}
