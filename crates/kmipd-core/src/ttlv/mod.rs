//! TTLV value tree and codecs.
//!
//! KMIP messages are trees of tagged values. The native encoding is TTLV
//! (Tag-Type-Length-Value); the JSON and XML codecs are byte-for-byte
//! faithful representations of the same tree, used on the HTTP transport.
//!
//! ```text
//! +-----------------+--------+------------------+------------------+
//! | Tag (3 bytes)   | Type   | Length (4 bytes) | Value (padded)   |
//! +-----------------+--------+------------------+------------------+
//! ```
//!
//! Every item is padded to an 8-byte boundary, so a structure's length is
//! always a multiple of eight. Decoding validates lengths before allocating.

use chrono::{DateTime, Utc};

mod decode;
mod encode;
pub mod json;
pub mod xml;

pub use decode::unmarshal;
pub use encode::marshal;

/// A KMIP tag: a 24-bit identifier from the KMIP tag registry.
pub type Tag = u32;

/// Tags used by the message model and the stub payloads.
pub mod tag {
    use super::Tag;

    pub const ATTRIBUTE: Tag = 0x42_0008;
    pub const BATCH_COUNT: Tag = 0x42_000D;
    pub const BATCH_ITEM: Tag = 0x42_000F;
    pub const OBJECT_TYPE: Tag = 0x42_0057;
    pub const OPERATION: Tag = 0x42_005C;
    pub const PROTOCOL_VERSION: Tag = 0x42_0069;
    pub const PROTOCOL_VERSION_MAJOR: Tag = 0x42_006A;
    pub const PROTOCOL_VERSION_MINOR: Tag = 0x42_006B;
    pub const QUERY_FUNCTION: Tag = 0x42_0074;
    pub const REQUEST_HEADER: Tag = 0x42_0077;
    pub const REQUEST_MESSAGE: Tag = 0x42_0078;
    pub const REQUEST_PAYLOAD: Tag = 0x42_0079;
    pub const RESPONSE_HEADER: Tag = 0x42_007A;
    pub const RESPONSE_MESSAGE: Tag = 0x42_007B;
    pub const RESPONSE_PAYLOAD: Tag = 0x42_007C;
    pub const RESULT_MESSAGE: Tag = 0x42_007D;
    pub const RESULT_REASON: Tag = 0x42_007E;
    pub const RESULT_STATUS: Tag = 0x42_007F;
    pub const TIME_STAMP: Tag = 0x42_0092;
    pub const UNIQUE_BATCH_ITEM_ID: Tag = 0x42_0093;
    pub const UNIQUE_IDENTIFIER: Tag = 0x42_0094;
    pub const VENDOR_IDENTIFICATION: Tag = 0x42_009D;
    pub const CLIENT_CORRELATION_VALUE: Tag = 0x42_0105;
    pub const SERVER_CORRELATION_VALUE: Tag = 0x42_0106;
}

/// Human-readable names for the tags above, used by the JSON and XML codecs.
const TAG_NAMES: &[(Tag, &str)] = &[
    (tag::ATTRIBUTE, "Attribute"),
    (tag::BATCH_COUNT, "BatchCount"),
    (tag::BATCH_ITEM, "BatchItem"),
    (tag::OBJECT_TYPE, "ObjectType"),
    (tag::OPERATION, "Operation"),
    (tag::PROTOCOL_VERSION, "ProtocolVersion"),
    (tag::PROTOCOL_VERSION_MAJOR, "ProtocolVersionMajor"),
    (tag::PROTOCOL_VERSION_MINOR, "ProtocolVersionMinor"),
    (tag::QUERY_FUNCTION, "QueryFunction"),
    (tag::REQUEST_HEADER, "RequestHeader"),
    (tag::REQUEST_MESSAGE, "RequestMessage"),
    (tag::REQUEST_PAYLOAD, "RequestPayload"),
    (tag::RESPONSE_HEADER, "ResponseHeader"),
    (tag::RESPONSE_MESSAGE, "ResponseMessage"),
    (tag::RESPONSE_PAYLOAD, "ResponsePayload"),
    (tag::RESULT_MESSAGE, "ResultMessage"),
    (tag::RESULT_REASON, "ResultReason"),
    (tag::RESULT_STATUS, "ResultStatus"),
    (tag::TIME_STAMP, "TimeStamp"),
    (tag::UNIQUE_BATCH_ITEM_ID, "UniqueBatchItemID"),
    (tag::UNIQUE_IDENTIFIER, "UniqueIdentifier"),
    (tag::VENDOR_IDENTIFICATION, "VendorIdentification"),
    (tag::CLIENT_CORRELATION_VALUE, "ClientCorrelationValue"),
    (tag::SERVER_CORRELATION_VALUE, "ServerCorrelationValue"),
];

/// Returns the registry name of a tag, if known.
#[must_use]
pub fn tag_name(tag: Tag) -> Option<&'static str> {
    TAG_NAMES.iter().find(|(t, _)| *t == tag).map(|(_, n)| *n)
}

/// Resolves a registry name back to its tag.
#[must_use]
pub fn tag_from_name(name: &str) -> Option<Tag> {
    TAG_NAMES.iter().find(|(_, n)| *n == name).map(|(t, _)| *t)
}

/// A TTLV value.
///
/// The variants mirror the KMIP item types. `BigInteger` keeps its
/// sign-extended big-endian bytes as produced on the wire (a multiple of
/// eight bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Structure(Vec<Ttlv>),
    Integer(i32),
    LongInteger(i64),
    BigInteger(Vec<u8>),
    Enumeration(u32),
    Boolean(bool),
    TextString(String),
    ByteString(Vec<u8>),
    DateTime(DateTime<Utc>),
    Interval(u32),
}

impl Value {
    /// Wire type byte for this value.
    #[must_use]
    pub const fn item_type(&self) -> u8 {
        match self {
            Self::Structure(_) => 0x01,
            Self::Integer(_) => 0x02,
            Self::LongInteger(_) => 0x03,
            Self::BigInteger(_) => 0x04,
            Self::Enumeration(_) => 0x05,
            Self::Boolean(_) => 0x06,
            Self::TextString(_) => 0x07,
            Self::ByteString(_) => 0x08,
            Self::DateTime(_) => 0x09,
            Self::Interval(_) => 0x0A,
        }
    }

    /// Name of the item type, as used by the JSON and XML codecs.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Structure(_) => "Structure",
            Self::Integer(_) => "Integer",
            Self::LongInteger(_) => "LongInteger",
            Self::BigInteger(_) => "BigInteger",
            Self::Enumeration(_) => "Enumeration",
            Self::Boolean(_) => "Boolean",
            Self::TextString(_) => "TextString",
            Self::ByteString(_) => "ByteString",
            Self::DateTime(_) => "DateTime",
            Self::Interval(_) => "Interval",
        }
    }
}

/// A tagged TTLV value: one node of the message tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ttlv {
    pub tag: Tag,
    pub value: Value,
}

impl Ttlv {
    #[must_use]
    pub const fn new(tag: Tag, value: Value) -> Self {
        Self { tag, value }
    }

    #[must_use]
    pub fn structure(tag: Tag, fields: Vec<Ttlv>) -> Self {
        Self::new(tag, Value::Structure(fields))
    }

    #[must_use]
    pub const fn int(tag: Tag, v: i32) -> Self {
        Self::new(tag, Value::Integer(v))
    }

    #[must_use]
    pub const fn enumeration(tag: Tag, v: u32) -> Self {
        Self::new(tag, Value::Enumeration(v))
    }

    #[must_use]
    pub fn text(tag: Tag, v: impl Into<String>) -> Self {
        Self::new(tag, Value::TextString(v.into()))
    }

    #[must_use]
    pub fn bytes(tag: Tag, v: impl Into<Vec<u8>>) -> Self {
        Self::new(tag, Value::ByteString(v.into()))
    }

    #[must_use]
    pub const fn date_time(tag: Tag, v: DateTime<Utc>) -> Self {
        Self::new(tag, Value::DateTime(v))
    }

    /// First child of a structure with the given tag.
    #[must_use]
    pub fn child(&self, tag: Tag) -> Option<&Ttlv> {
        match &self.value {
            Value::Structure(fields) => fields.iter().find(|f| f.tag == tag),
            _ => None,
        }
    }

    /// All children of a structure with the given tag, in declared order.
    pub fn children(&self, tag: Tag) -> impl Iterator<Item = &Ttlv> {
        let fields: &[Ttlv] = match &self.value {
            Value::Structure(fields) => fields,
            _ => &[],
        };
        fields.iter().filter(move |f| f.tag == tag)
    }

    /// Required child lookup; missing children are a decode error.
    pub fn require(&self, tag: Tag) -> Result<&Ttlv, CodecError> {
        self.child(tag).ok_or(CodecError::MissingField(tag))
    }

    pub fn as_i32(&self) -> Result<i32, CodecError> {
        match self.value {
            Value::Integer(v) => Ok(v),
            _ => Err(self.type_mismatch("Integer")),
        }
    }

    pub fn as_enum(&self) -> Result<u32, CodecError> {
        match self.value {
            Value::Enumeration(v) => Ok(v),
            _ => Err(self.type_mismatch("Enumeration")),
        }
    }

    pub fn as_text(&self) -> Result<&str, CodecError> {
        match &self.value {
            Value::TextString(v) => Ok(v),
            _ => Err(self.type_mismatch("TextString")),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8], CodecError> {
        match &self.value {
            Value::ByteString(v) => Ok(v),
            _ => Err(self.type_mismatch("ByteString")),
        }
    }

    pub fn as_date_time(&self) -> Result<DateTime<Utc>, CodecError> {
        match self.value {
            Value::DateTime(v) => Ok(v),
            _ => Err(self.type_mismatch("DateTime")),
        }
    }

    fn type_mismatch(&self, expected: &'static str) -> CodecError {
        CodecError::TypeMismatch {
            tag: self.tag,
            expected,
            found: self.value.type_name(),
        }
    }
}

/// Errors produced while encoding or decoding a KMIP message in any of the
/// three representations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("truncated TTLV item: needed {needed} bytes, had {remaining}")]
    Truncated { needed: usize, remaining: usize },

    #[error("invalid TTLV length {length} for item type {item_type:#04x}")]
    InvalidLength { item_type: u8, length: usize },

    #[error("unknown TTLV item type {0:#04x}")]
    UnknownItemType(u8),

    #[error("trailing bytes after TTLV item")]
    TrailingBytes,

    #[error("invalid UTF-8 in text string")]
    InvalidUtf8,

    #[error("value out of range for tag {0:#08x}")]
    ValueOutOfRange(Tag),

    #[error("missing required field {0:#08x}")]
    MissingField(Tag),

    #[error("unexpected tag {found:#08x}, expected {expected:#08x}")]
    UnexpectedTag { expected: Tag, found: Tag },

    #[error("tag {tag:#08x}: expected {expected}, found {found}")]
    TypeMismatch {
        tag: Tag,
        expected: &'static str,
        found: &'static str,
    },

    #[error("unknown tag name {0:?}")]
    UnknownTagName(String),

    #[error("malformed JSON document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed JSON node: {0}")]
    JsonNode(String),

    #[error("malformed XML document: {0}")]
    Xml(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_names_resolve_both_ways() {
        for (tag, name) in TAG_NAMES {
            assert_eq!(tag_name(*tag), Some(*name));
            assert_eq!(tag_from_name(name), Some(*tag));
        }
    }

    #[test]
    fn child_lookup_on_structure() {
        let node = Ttlv::structure(
            tag::PROTOCOL_VERSION,
            vec![
                Ttlv::int(tag::PROTOCOL_VERSION_MAJOR, 1),
                Ttlv::int(tag::PROTOCOL_VERSION_MINOR, 4),
            ],
        );
        assert_eq!(
            node.child(tag::PROTOCOL_VERSION_MAJOR).unwrap().as_i32().unwrap(),
            1
        );
        assert!(node.child(tag::BATCH_COUNT).is_none());
        assert!(node.require(tag::BATCH_COUNT).is_err());
    }

    #[test]
    fn child_lookup_on_scalar_is_none() {
        let node = Ttlv::int(tag::BATCH_COUNT, 2);
        assert!(node.child(tag::BATCH_COUNT).is_none());
        assert_eq!(node.children(tag::BATCH_COUNT).count(), 0);
    }

    #[test]
    fn accessor_type_mismatch() {
        let node = Ttlv::text(tag::RESULT_MESSAGE, "denied");
        let err = node.as_i32().unwrap_err();
        assert!(matches!(err, CodecError::TypeMismatch { expected: "Integer", .. }));
    }
}
