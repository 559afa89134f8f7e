//! Binary TTLV decoder.
//!
//! Lengths are validated against the remaining input before any allocation,
//! so a hostile length field cannot cause memory exhaustion.

use chrono::TimeZone;
use chrono::Utc;

use super::encode::padding;
use super::{CodecError, Ttlv, Value};

/// Parses exactly one TTLV tree from `bytes`.
///
/// # Errors
///
/// Returns a [`CodecError`] on truncation, an unknown item type, a length
/// that does not match the item type, or trailing bytes after the tree.
pub fn unmarshal(bytes: &[u8]) -> Result<Ttlv, CodecError> {
    let mut input = bytes;
    let item = decode_item(&mut input)?;
    if !input.is_empty() {
        return Err(CodecError::TrailingBytes);
    }
    Ok(item)
}

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], CodecError> {
    if input.len() < n {
        return Err(CodecError::Truncated {
            needed: n,
            remaining: input.len(),
        });
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

fn decode_item(input: &mut &[u8]) -> Result<Ttlv, CodecError> {
    let header = take(input, 8)?;
    let tag = u32::from(header[0]) << 16 | u32::from(header[1]) << 8 | u32::from(header[2]);
    let item_type = header[3];
    let length = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

    let value = match item_type {
        0x01 => {
            if length % 8 != 0 {
                return Err(CodecError::InvalidLength { item_type, length });
            }
            let mut inner = take(input, length)?;
            let mut fields = Vec::new();
            while !inner.is_empty() {
                fields.push(decode_item(&mut inner)?);
            }
            Value::Structure(fields)
        }
        0x02 => {
            expect_length(item_type, length, 4)?;
            let raw = take(input, 8)?;
            Value::Integer(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
        }
        0x03 => {
            expect_length(item_type, length, 8)?;
            let raw = take(input, 8)?;
            Value::LongInteger(i64::from_be_bytes(raw.try_into().expect("8 bytes")))
        }
        0x04 => {
            if length == 0 || length % 8 != 0 {
                return Err(CodecError::InvalidLength { item_type, length });
            }
            Value::BigInteger(take(input, length)?.to_vec())
        }
        0x05 => {
            expect_length(item_type, length, 4)?;
            let raw = take(input, 8)?;
            Value::Enumeration(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
        }
        0x06 => {
            expect_length(item_type, length, 8)?;
            let raw = take(input, 8)?;
            match u64::from_be_bytes(raw.try_into().expect("8 bytes")) {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                _ => return Err(CodecError::ValueOutOfRange(tag)),
            }
        }
        0x07 => {
            let raw = take(input, length)?;
            let text = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)?;
            let value = Value::TextString(text.to_owned());
            take(input, padding(length))?;
            value
        }
        0x08 => {
            let value = Value::ByteString(take(input, length)?.to_vec());
            take(input, padding(length))?;
            value
        }
        0x09 => {
            expect_length(item_type, length, 8)?;
            let raw = take(input, 8)?;
            let secs = i64::from_be_bytes(raw.try_into().expect("8 bytes"));
            let dt = Utc
                .timestamp_opt(secs, 0)
                .single()
                .ok_or(CodecError::ValueOutOfRange(tag))?;
            Value::DateTime(dt)
        }
        0x0A => {
            expect_length(item_type, length, 4)?;
            let raw = take(input, 8)?;
            Value::Interval(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
        }
        other => return Err(CodecError::UnknownItemType(other)),
    };

    Ok(Ttlv::new(tag, value))
}

fn expect_length(item_type: u8, length: usize, expected: usize) -> Result<(), CodecError> {
    if length == expected {
        Ok(())
    } else {
        Err(CodecError::InvalidLength { item_type, length })
    }
}
