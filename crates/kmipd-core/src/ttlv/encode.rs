//! Binary TTLV encoder.

use bytes::{BufMut, BytesMut};

use super::{Ttlv, Value};

/// Number of pad bytes needed to bring `len` to an 8-byte boundary.
pub(super) const fn padding(len: usize) -> usize {
    (8 - len % 8) % 8
}

/// Serializes a TTLV tree to its binary wire form.
#[must_use]
pub fn marshal(node: &Ttlv) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_item(node, &mut buf);
    buf.to_vec()
}

fn encode_item(node: &Ttlv, buf: &mut BytesMut) {
    buf.put_uint(u64::from(node.tag), 3);
    buf.put_u8(node.value.item_type());

    match &node.value {
        Value::Structure(fields) => {
            // A structure's length is only known once its children are
            // encoded; children are always 8-byte aligned so no padding
            // follows.
            let mut inner = BytesMut::new();
            for field in fields {
                encode_item(field, &mut inner);
            }
            buf.put_u32(inner.len() as u32);
            buf.extend_from_slice(&inner);
        }
        Value::Integer(v) => {
            buf.put_u32(4);
            buf.put_i32(*v);
            buf.put_bytes(0, 4);
        }
        Value::LongInteger(v) => {
            buf.put_u32(8);
            buf.put_i64(*v);
        }
        Value::BigInteger(bytes) => {
            buf.put_u32(bytes.len() as u32);
            buf.extend_from_slice(bytes);
            buf.put_bytes(0, padding(bytes.len()));
        }
        Value::Enumeration(v) => {
            buf.put_u32(4);
            buf.put_u32(*v);
            buf.put_bytes(0, 4);
        }
        Value::Boolean(v) => {
            buf.put_u32(8);
            buf.put_u64(u64::from(*v));
        }
        Value::TextString(s) => {
            buf.put_u32(s.len() as u32);
            buf.extend_from_slice(s.as_bytes());
            buf.put_bytes(0, padding(s.len()));
        }
        Value::ByteString(bytes) => {
            buf.put_u32(bytes.len() as u32);
            buf.extend_from_slice(bytes);
            buf.put_bytes(0, padding(bytes.len()));
        }
        Value::DateTime(dt) => {
            buf.put_u32(8);
            buf.put_i64(dt.timestamp());
        }
        Value::Interval(v) => {
            buf.put_u32(4);
            buf.put_u32(*v);
            buf.put_bytes(0, 4);
        }
    }
}
