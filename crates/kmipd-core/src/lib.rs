//! kmipd-core - KMIP message model and wire codecs
//!
//! This crate holds everything the daemon needs to speak KMIP that does not
//! involve I/O: the message structures ([`RequestMessage`],
//! [`ResponseMessage`] and their headers and batch items), the operation and
//! result enumerations, the structured KMIP error type ([`KmipError`]), and
//! the TTLV value tree with its three codecs (binary TTLV, JSON, XML).
//!
//! # Modules
//!
//! - [`ttlv`]: TTLV value tree and the binary/JSON/XML codecs
//! - [`message`]: request and response message model
//! - [`operation`]: operation codes from the KMIP registry
//! - [`error`]: KMIP errors carrying a result reason
//! - [`payloads`]: operation payload stubs

pub mod error;
pub mod message;
pub mod operation;
pub mod payloads;
pub mod ttlv;

pub use error::{KmipError, KmipResult};
pub use message::{
    ProtocolVersion, RequestBatchItem, RequestHeader, RequestMessage, ResponseBatchItem,
    ResponseHeader, ResponseMessage, ResultStatus,
};
pub use operation::Operation;
pub use ttlv::{CodecError, Ttlv, Value};
