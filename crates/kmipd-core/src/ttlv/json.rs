//! JSON codec for the TTLV tree.
//!
//! Each node becomes `{"tag": ..., "type": ..., "value": ...}`. Tags are
//! written by registry name when known, otherwise as `0x`-prefixed hex.
//! Enumerations, big integers and byte strings use `0x`-prefixed hex
//! strings; date-times use RFC 3339. The mapping is lossless, so
//! `from_json(to_json(t)) == t` for every tree.

use chrono::{DateTime, SecondsFormat};
use serde_json::{json, Map, Value as Json};

use super::{tag_from_name, tag_name, CodecError, Tag, Ttlv, Value};

/// Serializes a TTLV tree to a JSON byte vector.
#[must_use]
pub fn marshal(node: &Ttlv) -> Vec<u8> {
    serde_json::to_vec(&to_json(node)).expect("TTLV trees always serialize")
}

/// Parses a JSON byte vector into a TTLV tree.
///
/// # Errors
///
/// Returns a [`CodecError`] if the document is not valid JSON or does not
/// follow the node shape described above.
pub fn unmarshal(bytes: &[u8]) -> Result<Ttlv, CodecError> {
    let doc: Json = serde_json::from_slice(bytes)?;
    from_json(&doc)
}

/// Converts one node to its JSON representation.
#[must_use]
pub fn to_json(node: &Ttlv) -> Json {
    let value = match &node.value {
        Value::Structure(fields) => Json::Array(fields.iter().map(to_json).collect()),
        Value::Integer(v) => json!(v),
        Value::LongInteger(v) => json!(v),
        Value::BigInteger(bytes) => json!(format!("0x{}", hex::encode(bytes))),
        Value::Enumeration(v) => json!(format!("0x{v:08x}")),
        Value::Boolean(v) => json!(v),
        Value::TextString(s) => json!(s),
        Value::ByteString(bytes) => json!(format!("0x{}", hex::encode(bytes))),
        Value::DateTime(dt) => json!(dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
        Value::Interval(v) => json!(v),
    };

    json!({
        "tag": tag_to_json(node.tag),
        "type": node.value.type_name(),
        "value": value,
    })
}

/// Converts a JSON node back into a TTLV tree.
///
/// # Errors
///
/// Returns a [`CodecError`] for missing keys, unknown tag names or types,
/// and malformed scalar encodings.
pub fn from_json(doc: &Json) -> Result<Ttlv, CodecError> {
    let obj = doc
        .as_object()
        .ok_or_else(|| node_err("expected a JSON object"))?;

    let tag = parse_tag(obj)?;
    let type_name = obj
        .get("type")
        .and_then(Json::as_str)
        .ok_or_else(|| node_err("missing \"type\""))?;
    let value = obj
        .get("value")
        .ok_or_else(|| node_err("missing \"value\""))?;

    let value = match type_name {
        "Structure" => {
            let fields = value
                .as_array()
                .ok_or_else(|| node_err("Structure value must be an array"))?;
            Value::Structure(fields.iter().map(from_json).collect::<Result<_, _>>()?)
        }
        "Integer" => Value::Integer(
            value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .ok_or_else(|| node_err("Integer out of range"))?,
        ),
        "LongInteger" => Value::LongInteger(
            value
                .as_i64()
                .ok_or_else(|| node_err("LongInteger out of range"))?,
        ),
        "BigInteger" => Value::BigInteger(parse_hex(value)?),
        "Enumeration" => {
            let raw = parse_hex(value)?;
            let raw: [u8; 4] = raw
                .try_into()
                .map_err(|_| node_err("Enumeration must be 4 bytes of hex"))?;
            Value::Enumeration(u32::from_be_bytes(raw))
        }
        "Boolean" => Value::Boolean(
            value
                .as_bool()
                .ok_or_else(|| node_err("Boolean must be true or false"))?,
        ),
        "TextString" => Value::TextString(
            value
                .as_str()
                .ok_or_else(|| node_err("TextString must be a string"))?
                .to_owned(),
        ),
        "ByteString" => Value::ByteString(parse_hex(value)?),
        "DateTime" => {
            let text = value
                .as_str()
                .ok_or_else(|| node_err("DateTime must be a string"))?;
            let dt = DateTime::parse_from_rfc3339(text)
                .map_err(|e| node_err(format!("bad DateTime: {e}")))?;
            Value::DateTime(dt.with_timezone(&chrono::Utc))
        }
        "Interval" => Value::Interval(
            value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| node_err("Interval out of range"))?,
        ),
        other => return Err(node_err(format!("unknown type {other:?}"))),
    };

    Ok(Ttlv::new(tag, value))
}

fn tag_to_json(tag: Tag) -> Json {
    match tag_name(tag) {
        Some(name) => json!(name),
        None => json!(format!("0x{tag:06x}")),
    }
}

fn parse_tag(obj: &Map<String, Json>) -> Result<Tag, CodecError> {
    let raw = obj
        .get("tag")
        .and_then(Json::as_str)
        .ok_or_else(|| node_err("missing \"tag\""))?;
    if let Some(hex_digits) = raw.strip_prefix("0x") {
        return Tag::from_str_radix(hex_digits, 16)
            .map_err(|_| CodecError::UnknownTagName(raw.to_owned()));
    }
    tag_from_name(raw).ok_or_else(|| CodecError::UnknownTagName(raw.to_owned()))
}

fn parse_hex(value: &Json) -> Result<Vec<u8>, CodecError> {
    let text = value
        .as_str()
        .and_then(|s| s.strip_prefix("0x"))
        .ok_or_else(|| node_err("expected a 0x-prefixed hex string"))?;
    hex::decode(text).map_err(|e| node_err(format!("bad hex: {e}")))
}

fn node_err(msg: impl Into<String>) -> CodecError {
    CodecError::JsonNode(msg.into())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::super::tag;
    use super::*;

    fn sample_tree() -> Ttlv {
        Ttlv::structure(
            tag::RESPONSE_MESSAGE,
            vec![
                Ttlv::structure(
                    tag::RESPONSE_HEADER,
                    vec![
                        Ttlv::structure(
                            tag::PROTOCOL_VERSION,
                            vec![
                                Ttlv::int(tag::PROTOCOL_VERSION_MAJOR, 2),
                                Ttlv::int(tag::PROTOCOL_VERSION_MINOR, 0),
                            ],
                        ),
                        Ttlv::date_time(
                            tag::TIME_STAMP,
                            Utc.timestamp_opt(1_720_000_000, 0).unwrap(),
                        ),
                        Ttlv::int(tag::BATCH_COUNT, 1),
                    ],
                ),
                Ttlv::structure(
                    tag::BATCH_ITEM,
                    vec![
                        Ttlv::enumeration(tag::OPERATION, 0x01),
                        Ttlv::bytes(tag::UNIQUE_BATCH_ITEM_ID, vec![0x01, 0x02]),
                        Ttlv::enumeration(tag::RESULT_STATUS, 0),
                        Ttlv::structure(tag::RESPONSE_PAYLOAD, vec![]),
                    ],
                ),
            ],
        )
    }

    #[test]
    fn round_trip() {
        let tree = sample_tree();
        assert_eq!(unmarshal(&marshal(&tree)).unwrap(), tree);
    }

    #[test]
    fn known_tags_use_names() {
        let doc: serde_json::Value =
            serde_json::from_slice(&marshal(&sample_tree())).unwrap();
        assert_eq!(doc["tag"], "ResponseMessage");
        assert_eq!(doc["type"], "Structure");
    }

    #[test]
    fn unknown_tags_round_trip_as_hex() {
        let tree = Ttlv::int(0x54_0002, 9);
        let doc: serde_json::Value = serde_json::from_slice(&marshal(&tree)).unwrap();
        assert_eq!(doc["tag"], "0x540002");
        assert_eq!(unmarshal(&marshal(&tree)).unwrap(), tree);
    }

    #[test]
    fn rejects_unknown_tag_name() {
        let doc = br#"{"tag":"NoSuchTag","type":"Integer","value":1}"#;
        assert!(matches!(
            unmarshal(doc),
            Err(CodecError::UnknownTagName(_))
        ));
    }

    #[test]
    fn rejects_non_object_node() {
        assert!(unmarshal(b"[1,2,3]").is_err());
        assert!(unmarshal(b"not json at all").is_err());
    }
}
