//! # parley-transport
//!
//! Connection adapters for the Parley chat hub.
//!
//! Every adapter implements [`Connection`], which splits into a
//! [`ConnectionReader`] and a [`ConnectionWriter`] so the inbound and outbound
//! pumps of a client can own one half each:
//!
//! - **WebSocket** - an upgraded axum socket
//! - **Memory** - an in-process pair for tests and benchmarks
//!
//! ```rust,ignore
//! use parley_transport::{Connection, Incoming};
//!
//! async fn drain(conn: Box<dyn Connection>) {
//!     let (mut reader, _writer) = conn.split();
//!     while let Ok(Some(Incoming::Message(data))) = reader.recv().await {
//!         // Process data
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{
    is_expected_close, Connection, ConnectionReader, ConnectionWriter, Incoming, TransportError,
};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
