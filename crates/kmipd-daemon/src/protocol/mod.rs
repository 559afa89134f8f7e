//! KMIP TCP protocol stack.
//!
//! Layered bottom-up:
//!
//! ```text
//! +------------------------------------------+
//! |  server: accept loop, hooks, shutdown    |
//! +------------------------------------------+
//! |  stream: framed recv/decode, encode/send |
//! +------------------------------------------+
//! |  framing: 8-byte-headered KMIP frames    |
//! +------------------------------------------+
//! |  TCP (optionally TLS)                    |
//! +------------------------------------------+
//! ```
//!
//! [`context`] carries the per-connection state bag shared with the HTTP
//! transport.

pub mod context;
pub mod framing;
pub mod server;
pub mod stream;

pub use context::{ConnectionContext, RequestContext, TlsState};
pub use framing::{FrameCodec, FrameError, FRAME_VERSION, MAX_FRAME_SIZE};
pub use server::{RequestHandler, Server, ServerBuilder, ServerError};
pub use stream::{KmipStream, StreamError};
