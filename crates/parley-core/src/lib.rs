//! # parley-core
//!
//! Rooms, clients, and message fan-out for the Parley chat hub.
//!
//! This crate provides the moving parts:
//!
//! - **Registry** - name to room mapping with atomic creation
//! - **Room** - a serialized event loop that owns membership and fans out
//! - **Client** - an attached connection with inbound and outbound pumps
//! - **Mailbox** - the bounded queue between a room and one client
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐ broadcast ┌─────────────┐  mailbox  ┌─────────────┐
//! │  inbound   │──────────▶│  room loop  │──────────▶│  outbound   │
//! │   pump     │           │ join/leave  │  (x N)    │    pump     │
//! └────────────┘           └─────────────┘           └─────────────┘
//!       ▲                                                   │
//!       └──────────────────── connection ◀─────────────────┘
//! ```

pub mod client;
pub mod mailbox;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod room;

pub use client::{attach, ClientConfig, ClientTasks};
pub use message::ClientId;
pub use registry::{RoomRegistry, DEFAULT_ROOM_ID, DEFAULT_ROOM_NAME};
pub use room::{Member, Room, RoomConfig, RoomError, RoomId, RoomInfo, RoomRunner};
