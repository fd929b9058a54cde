//! WebSocket connection adapter.
//!
//! This module wraps an upgraded axum [`WebSocket`] so that the client pumps
//! can drive it through the [`Connection`] traits.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, trace};

use crate::traits::{Connection, ConnectionReader, ConnectionWriter, Incoming, TransportError};

/// A WebSocket connection established through an axum upgrade.
pub struct WebSocketConnection {
    socket: WebSocket,
    remote_addr: Option<String>,
}

impl WebSocketConnection {
    /// Wrap an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self {
            socket,
            remote_addr: None,
        }
    }

    /// Attach the peer address reported by the HTTP layer.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }
}

impl Connection for WebSocketConnection {
    fn split(self: Box<Self>) -> (Box<dyn ConnectionReader>, Box<dyn ConnectionWriter>) {
        let (sink, stream) = self.socket.split();
        (
            Box::new(WebSocketReader { stream }),
            Box::new(WebSocketWriter { sink, closed: false }),
        )
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.clone()
    }
}

/// Reading half of a [`WebSocketConnection`].
pub struct WebSocketReader {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl ConnectionReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Ok(Some(Incoming::Message(Bytes::from(text))));
                }
                Some(Ok(Message::Binary(data))) => {
                    return Ok(Some(Incoming::Message(Bytes::from(data))));
                }
                Some(Ok(Message::Ping(_))) => {
                    // axum queues the pong reply itself
                    trace!("Received ping");
                }
                Some(Ok(Message::Pong(_))) => return Ok(Some(Incoming::Pong)),
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| f.code);
                    debug!(code = ?code, "Received close frame");
                    return Ok(Some(Incoming::Close(code)));
                }
                Some(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}

/// Writing half of a [`WebSocketConnection`].
pub struct WebSocketWriter {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl ConnectionWriter for WebSocketWriter {
    async fn send_text(&mut self, payload: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        let text = String::from_utf8_lossy(&payload).into_owned();
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.sink
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn send_close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.sink
            .send(Message::Close(None))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(()); // Already closed
        }
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {}", e)))
    }
}
