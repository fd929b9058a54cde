//! # parley-server
//!
//! HTTP and WebSocket front end for the Parley chat hub.
//!
//! - `POST /rooms?roomname=<name>` creates a room
//! - `GET /ws?roomname=<name>&name=<display name>` joins a room over WebSocket
//! - `GET /health` reports liveness

pub mod config;
pub mod handlers;
pub mod metrics;

pub use config::Config;
pub use handlers::{router, run_server, serve, AppState};
