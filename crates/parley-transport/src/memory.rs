//! In-process connection pairs.
//!
//! [`pair`] returns a server-side [`MemoryConnection`] together with the
//! [`MemoryPeer`] that plays the remote end. Tests and benchmarks use it in
//! place of a socket.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{Connection, ConnectionReader, ConnectionWriter, Incoming, TransportError};

/// A frame written by the server side, as observed by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// A text frame.
    Text(Bytes),
    /// A keepalive ping.
    Ping,
    /// A close frame.
    Close,
}

impl Outgoing {
    /// The text payload, if this is a text frame.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Outgoing::Text(payload) => std::str::from_utf8(payload).ok(),
            _ => None,
        }
    }
}

/// Create a connected pair.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
    let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
    (
        MemoryConnection {
            incoming: incoming_rx,
            outgoing: outgoing_tx,
        },
        MemoryPeer {
            incoming: Some(incoming_tx),
            outgoing: outgoing_rx,
        },
    )
}

/// Server side of an in-process connection.
pub struct MemoryConnection {
    incoming: mpsc::UnboundedReceiver<Incoming>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl Connection for MemoryConnection {
    fn split(self: Box<Self>) -> (Box<dyn ConnectionReader>, Box<dyn ConnectionWriter>) {
        (
            Box::new(MemoryReader {
                incoming: self.incoming,
            }),
            Box::new(MemoryWriter {
                outgoing: Some(self.outgoing),
            }),
        )
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

struct MemoryReader {
    incoming: mpsc::UnboundedReceiver<Incoming>,
}

#[async_trait]
impl ConnectionReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError> {
        Ok(self.incoming.recv().await)
    }
}

struct MemoryWriter {
    outgoing: Option<mpsc::UnboundedSender<Outgoing>>,
}

impl MemoryWriter {
    fn push(&self, frame: Outgoing) -> Result<(), TransportError> {
        self.outgoing
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[async_trait]
impl ConnectionWriter for MemoryWriter {
    async fn send_text(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.push(Outgoing::Text(payload))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.push(Outgoing::Ping)
    }

    async fn send_close(&mut self) -> Result<(), TransportError> {
        self.push(Outgoing::Close)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outgoing = None;
        Ok(())
    }
}

/// Remote end of an in-process connection.
pub struct MemoryPeer {
    incoming: Option<mpsc::UnboundedSender<Incoming>>,
    outgoing: mpsc::UnboundedReceiver<Outgoing>,
}

impl MemoryPeer {
    fn push(&self, frame: Incoming) -> Result<(), TransportError> {
        self.incoming
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send a data frame to the server side.
    pub fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.push(Incoming::Message(Bytes::copy_from_slice(text.as_bytes())))
    }

    /// Answer a ping.
    pub fn send_pong(&self) -> Result<(), TransportError> {
        self.push(Incoming::Pong)
    }

    /// Send a close frame with the given code.
    pub fn send_close(&self, code: u16) -> Result<(), TransportError> {
        self.push(Incoming::Close(Some(code)))
    }

    /// Drop the stream without a close frame.
    pub fn hang_up(&mut self) {
        self.incoming = None;
    }

    /// Wait for the next frame written by the server side.
    ///
    /// Returns `None` once the writing half has been released.
    pub async fn next_frame(&mut self) -> Option<Outgoing> {
        self.outgoing.recv().await
    }

    /// Take a frame if one is already waiting.
    pub fn try_next_frame(&mut self) -> Option<Outgoing> {
        self.outgoing.try_recv().ok()
    }
}
