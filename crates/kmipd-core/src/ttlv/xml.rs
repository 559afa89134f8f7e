//! XML codec for the TTLV tree.
//!
//! Elements are named by registry tag name; tags without a registry name use
//! a `TTLV` element with a `tag` attribute. Structures contain their children
//! as nested elements; scalars are empty elements with `type` and `value`
//! attributes, using the same textual forms as the JSON codec.
//!
//! ```text
//! <RequestMessage>
//!   <RequestHeader>
//!     <ProtocolVersion>
//!       <ProtocolVersionMajor type="Integer" value="1"/>
//!       ...
//! ```

use std::io::Write;

use chrono::{DateTime, SecondsFormat, Utc};
use xml::reader::{ParserConfig, XmlEvent as ReadEvent};
use xml::writer::{EmitterConfig, EventWriter, XmlEvent as WriteEvent};

use super::{tag_from_name, tag_name, CodecError, Tag, Ttlv, Value};

/// Serializes a TTLV tree to an XML byte vector.
#[must_use]
pub fn marshal(node: &Ttlv) -> Vec<u8> {
    let mut out = Vec::new();
    let mut writer = EmitterConfig::new()
        .write_document_declaration(false)
        .perform_indent(false)
        .create_writer(&mut out);
    write_node(node, &mut writer).expect("writing XML to a Vec cannot fail");
    out
}

/// Parses an XML byte vector into a TTLV tree.
///
/// # Errors
///
/// Returns a [`CodecError`] if the document is not well-formed XML or does
/// not follow the element shape described in the module docs.
pub fn unmarshal(bytes: &[u8]) -> Result<Ttlv, CodecError> {
    let reader = ParserConfig::new()
        .trim_whitespace(true)
        .ignore_comments(true)
        .create_reader(bytes);

    enum Frame {
        Structure(Tag, Vec<Ttlv>),
        Scalar(Ttlv),
    }

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<Ttlv> = None;

    for event in reader {
        let event = event.map_err(|e| CodecError::Xml(e.to_string()))?;
        match event {
            ReadEvent::StartDocument { .. } => {}
            ReadEvent::StartElement {
                name, attributes, ..
            } => {
                if root.is_some() {
                    return Err(CodecError::Xml("content after root element".into()));
                }
                let attr = |key: &str| {
                    attributes
                        .iter()
                        .find(|a| a.name.local_name == key)
                        .map(|a| a.value.as_str())
                };

                let tag = resolve_tag(&name.local_name, attr("tag"))?;
                match attr("type") {
                    None | Some("Structure") => stack.push(Frame::Structure(tag, Vec::new())),
                    Some(type_name) => {
                        let value = attr("value").ok_or_else(|| {
                            CodecError::Xml(format!("<{}> missing value", name.local_name))
                        })?;
                        stack.push(Frame::Scalar(Ttlv::new(tag, parse_scalar(type_name, value)?)));
                    }
                }
            }
            ReadEvent::EndElement { .. } => {
                let node = match stack.pop() {
                    Some(Frame::Structure(tag, fields)) => Ttlv::structure(tag, fields),
                    Some(Frame::Scalar(node)) => node,
                    None => return Err(CodecError::Xml("unbalanced end element".into())),
                };
                match stack.last_mut() {
                    Some(Frame::Structure(_, fields)) => fields.push(node),
                    Some(Frame::Scalar(_)) => {
                        return Err(CodecError::Xml("scalar element with children".into()))
                    }
                    None => root = Some(node),
                }
            }
            ReadEvent::Characters(text) => {
                return Err(CodecError::Xml(format!("unexpected text {text:?}")))
            }
            ReadEvent::EndDocument => break,
            _ => {}
        }
    }

    root.ok_or_else(|| CodecError::Xml("empty document".into()))
}

fn write_node<W: Write>(node: &Ttlv, writer: &mut EventWriter<W>) -> xml::writer::Result<()> {
    let tag_attr = tag_name(node.tag)
        .is_none()
        .then(|| format!("0x{:06x}", node.tag));
    let element = tag_name(node.tag).unwrap_or("TTLV");

    match &node.value {
        Value::Structure(fields) => {
            let mut start = WriteEvent::start_element(element);
            if let Some(tag_attr) = tag_attr.as_deref() {
                start = start.attr("tag", tag_attr);
            }
            writer.write(start)?;
            for field in fields {
                write_node(field, writer)?;
            }
            writer.write(WriteEvent::end_element())?;
        }
        value => {
            let text = scalar_text(value);
            let mut start = WriteEvent::start_element(element);
            if let Some(tag_attr) = tag_attr.as_deref() {
                start = start.attr("tag", tag_attr);
            }
            start = start.attr("type", value.type_name()).attr("value", &text);
            writer.write(start)?;
            writer.write(WriteEvent::end_element())?;
        }
    }
    Ok(())
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Structure(_) => unreachable!("structures are not scalars"),
        Value::Integer(v) => v.to_string(),
        Value::LongInteger(v) => v.to_string(),
        Value::BigInteger(bytes) => format!("0x{}", hex::encode(bytes)),
        Value::Enumeration(v) => format!("0x{v:08x}"),
        Value::Boolean(v) => v.to_string(),
        Value::TextString(s) => s.clone(),
        Value::ByteString(bytes) => format!("0x{}", hex::encode(bytes)),
        Value::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
        Value::Interval(v) => v.to_string(),
    }
}

fn resolve_tag(element: &str, tag_attr: Option<&str>) -> Result<Tag, CodecError> {
    if let Some(raw) = tag_attr {
        let digits = raw
            .strip_prefix("0x")
            .ok_or_else(|| CodecError::UnknownTagName(raw.to_owned()))?;
        return Tag::from_str_radix(digits, 16)
            .map_err(|_| CodecError::UnknownTagName(raw.to_owned()));
    }
    tag_from_name(element).ok_or_else(|| CodecError::UnknownTagName(element.to_owned()))
}

fn parse_scalar(type_name: &str, text: &str) -> Result<Value, CodecError> {
    let bad = |what: &str| CodecError::Xml(format!("bad {what} value {text:?}"));
    Ok(match type_name {
        "Integer" => Value::Integer(text.parse().map_err(|_| bad("Integer"))?),
        "LongInteger" => Value::LongInteger(text.parse().map_err(|_| bad("LongInteger"))?),
        "BigInteger" => Value::BigInteger(parse_hex(text)?),
        "Enumeration" => {
            let raw: [u8; 4] = parse_hex(text)?
                .try_into()
                .map_err(|_| bad("Enumeration"))?;
            Value::Enumeration(u32::from_be_bytes(raw))
        }
        "Boolean" => Value::Boolean(text.parse().map_err(|_| bad("Boolean"))?),
        "TextString" => Value::TextString(text.to_owned()),
        "ByteString" => Value::ByteString(parse_hex(text)?),
        "DateTime" => Value::DateTime(
            DateTime::parse_from_rfc3339(text)
                .map_err(|_| bad("DateTime"))?
                .with_timezone(&Utc),
        ),
        "Interval" => Value::Interval(text.parse().map_err(|_| bad("Interval"))?),
        other => return Err(CodecError::Xml(format!("unknown type {other:?}"))),
    })
}

fn parse_hex(text: &str) -> Result<Vec<u8>, CodecError> {
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| CodecError::Xml(format!("expected 0x-prefixed hex, got {text:?}")))?;
    hex::decode(digits).map_err(|e| CodecError::Xml(format!("bad hex: {e}")))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::super::tag;
    use super::*;

    fn sample_tree() -> Ttlv {
        Ttlv::structure(
            tag::REQUEST_MESSAGE,
            vec![
                Ttlv::structure(
                    tag::REQUEST_HEADER,
                    vec![
                        Ttlv::structure(
                            tag::PROTOCOL_VERSION,
                            vec![
                                Ttlv::int(tag::PROTOCOL_VERSION_MAJOR, 1),
                                Ttlv::int(tag::PROTOCOL_VERSION_MINOR, 2),
                            ],
                        ),
                        Ttlv::int(tag::BATCH_COUNT, 1),
                    ],
                ),
                Ttlv::structure(
                    tag::BATCH_ITEM,
                    vec![
                        Ttlv::enumeration(tag::OPERATION, 0x18),
                        Ttlv::structure(
                            tag::REQUEST_PAYLOAD,
                            vec![
                                Ttlv::text(tag::VENDOR_IDENTIFICATION, "acme <&> \"kms\""),
                                Ttlv::bytes(tag::UNIQUE_BATCH_ITEM_ID, vec![0xCA, 0xFE]),
                                Ttlv::date_time(
                                    tag::TIME_STAMP,
                                    Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                                ),
                            ],
                        ),
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
    fn elements_are_named_by_tag() {
        let text = String::from_utf8(marshal(&sample_tree())).unwrap();
        assert!(text.starts_with("<RequestMessage>"));
        assert!(text.contains(r#"<ProtocolVersionMajor type="Integer" value="1""#));
    }

    #[test]
    fn unknown_tags_use_ttlv_element() {
        let tree = Ttlv::int(0x54_0002, 3);
        let text = String::from_utf8(marshal(&tree)).unwrap();
        assert!(text.contains(r#"tag="0x540002""#));
        assert_eq!(unmarshal(&marshal(&tree)).unwrap(), tree);
    }

    #[test]
    fn rejects_malformed_documents() {
        assert!(unmarshal(b"<RequestMessage>").is_err());
        assert!(unmarshal(b"no xml here").is_err());
        assert!(unmarshal(b"<NotATag/>").is_err());
    }
}
