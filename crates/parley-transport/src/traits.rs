//! Connection abstraction traits for Parley.
//!
//! A connection is split into a reading half and a writing half so that the
//! inbound and outbound pumps of a client can run as independent tasks.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code sent by a peer that is going away (page unload, shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code reported when the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A read or write deadline expired.
    #[error("Connection timed out")]
    Timeout,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Inbound frame exceeded the read limit.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Configured read limit.
        max: usize,
    },
}

/// A frame surfaced to the reading side of a connection.
///
/// Pings are answered by the adapter itself and never surface here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A data frame (text or binary).
    Message(Bytes),
    /// A keepalive pong answering one of our pings.
    Pong,
    /// The peer sent a close frame, with its status code if it gave one.
    Close(Option<u16>),
}

/// A duplex connection that can be split into independent halves.
pub trait Connection: Send {
    /// Split the connection into its reading and writing halves.
    fn split(self: Box<Self>) -> (Box<dyn ConnectionReader>, Box<dyn ConnectionWriter>);

    /// Get the remote address of the connection, if available.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}

/// The reading half of a connection.
#[async_trait]
pub trait ConnectionReader: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` if the stream ended without a close frame.
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError>;
}

/// The writing half of a connection.
#[async_trait]
pub trait ConnectionWriter: Send {
    /// Send one text frame.
    async fn send_text(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Send a keepalive ping control frame.
    async fn send_ping(&mut self) -> Result<(), TransportError>;

    /// Send a close frame.
    async fn send_close(&mut self) -> Result<(), TransportError>;

    /// Release the writing half. Idempotent.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Whether a close code is part of an orderly shutdown.
///
/// `None` means the stream ended without a close frame, which is reported
/// the same way as [`CLOSE_ABNORMAL`].
#[must_use]
pub fn is_expected_close(code: Option<u16>) -> bool {
    matches!(
        code.unwrap_or(CLOSE_ABNORMAL),
        CLOSE_NORMAL | CLOSE_GOING_AWAY | CLOSE_ABNORMAL
    )
}
