//! Stream connection: binds a socket to the framed KMIP decode/encode loop.
//!
//! The receive path owns the decode buffer (reused between frames by the
//! framed transport) and yields fully decoded [`RequestMessage`]s. The send
//! path serializes a [`ResponseMessage`] to TTLV and writes it as one frame,
//! retrying transient errors with exponential backoff.
//!
//! Receive contract: `Ok(msg)`, or [`StreamError::Eof`] on clean close, or
//! [`StreamError::Decode`] when the frame arrived but its TTLV payload did
//! not parse - the server answers that one with a synthetic error response
//! before closing.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use kmipd_core::{CodecError, RequestMessage, ResponseMessage};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use super::framing::{FrameCodec, FrameError};

/// Deadline for one `recv` call.
pub const READ_DEADLINE: Duration = Duration::from_secs(60);

/// Deadline for one write attempt.
pub const WRITE_DEADLINE: Duration = Duration::from_secs(30);

/// Write retries after the first failed attempt.
const WRITE_RETRIES: u32 = 3;

/// Backoff before the first retry; doubles per attempt.
const WRITE_BACKOFF: Duration = Duration::from_millis(50);

/// Errors from the stream connection.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The peer closed the connection between messages.
    #[error("end of stream")]
    Eof,

    /// The framed transport failed (bad length, mid-frame close, I/O).
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A complete frame arrived but its payload is not a valid message.
    #[error(transparent)]
    Decode(#[from] CodecError),

    /// The per-call read deadline elapsed.
    #[error("read deadline elapsed")]
    ReadTimeout,

    /// The governing cancellation token fired.
    #[error("connection cancelled")]
    Cancelled,
}

/// A KMIP stream connection over any byte stream (plain TCP or TLS).
pub struct KmipStream<S> {
    framed: Framed<S, FrameCodec>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> KmipStream<S> {
    #[must_use]
    pub fn new(io: S) -> Self {
        Self {
            framed: Framed::new(io, FrameCodec::new()),
        }
    }

    /// Receives and decodes the next request.
    ///
    /// Aborts early when `cancel` fires, so shutdown can forbid new request
    /// reads while in-flight handlers drain.
    ///
    /// # Errors
    ///
    /// See [`StreamError`]; `Eof` is the normal end of a connection.
    pub async fn recv(&mut self, cancel: &CancellationToken) -> Result<RequestMessage, StreamError> {
        let frame = tokio::select! {
            () = cancel.cancelled() => return Err(StreamError::Cancelled),
            next = tokio::time::timeout(READ_DEADLINE, self.framed.next()) => match next {
                Err(_) => return Err(StreamError::ReadTimeout),
                Ok(None) => return Err(StreamError::Eof),
                Ok(Some(Err(err))) => return Err(err.into()),
                Ok(Some(Ok(frame))) => frame,
            },
        };

        Ok(RequestMessage::from_ttlv_bytes(&frame)?)
    }

    /// Serializes and writes one response frame.
    ///
    /// Transient errors (timeouts and would-block conditions) are retried up
    /// to three times with exponential backoff; cancellation aborts
    /// immediately.
    ///
    /// # Errors
    ///
    /// Returns the final [`StreamError`] once retries are exhausted, or the
    /// first permanent error.
    pub async fn send(
        &mut self,
        response: &ResponseMessage,
        cancel: &CancellationToken,
    ) -> Result<(), StreamError> {
        let payload = Bytes::from(response.to_ttlv_bytes());

        let mut backoff = WRITE_BACKOFF;
        let mut last_err = StreamError::Frame(FrameError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "write deadline elapsed",
        )));
        for attempt in 0..=WRITE_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            let result = tokio::select! {
                () = cancel.cancelled() => return Err(StreamError::Cancelled),
                sent = tokio::time::timeout(WRITE_DEADLINE, self.framed.send(payload.clone())) => sent,
            };

            match result {
                Ok(Ok(())) => return Ok(()),
                Err(_) => {
                    last_err = StreamError::Frame(FrameError::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "write deadline elapsed",
                    )));
                }
                Ok(Err(err)) => {
                    if !is_transient(&err) {
                        return Err(err.into());
                    }
                    last_err = err.into();
                }
            }
        }

        Err(last_err)
    }
}

/// An error is transient iff the platform classifies it as a timeout or
/// temporary condition.
fn is_transient(err: &FrameError) -> bool {
    match err {
        FrameError::Io(io_err) => matches!(
            io_err.kind(),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
        ),
        _ => false,
    }
}
