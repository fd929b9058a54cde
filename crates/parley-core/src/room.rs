//! Chat rooms for Parley.
//!
//! A [`Room`] is a cheap handle onto three channels (join, leave, broadcast).
//! The matching [`RoomRunner`] is the room's event loop: the only code that
//! touches membership and the only place messages are fanned out.

use crate::mailbox::{Outbox, PushError};
use crate::message::{left_notice, welcome_notice, ClientId};
use crate::metrics;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 256;

/// Default broadcast buffer per room.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 5;

/// A room identifier.
pub type RoomId = u64;

/// Room errors.
#[derive(Debug, Error)]
pub enum RoomError {
    /// A room with this name already exists.
    #[error("Room already exists: {0}")]
    DuplicateRoomName(String),

    /// Invalid room name.
    #[error("Invalid room name: {0}")]
    InvalidRoomName(&'static str),

    /// The room's event loop is not running.
    #[error("Room is closed: {0}")]
    RoomClosed(String),
}

/// Validate a room name.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Room name contains control characters");
    }
    Ok(())
}

/// Room configuration.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Pending broadcasts buffered before senders wait.
    pub broadcast_capacity: usize,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}

/// Public view of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    /// Room identifier.
    pub id: RoomId,
    /// Room name.
    pub name: String,
}

/// A room member as seen by the event loop.
#[derive(Debug)]
pub struct Member {
    id: ClientId,
    name: String,
    outbox: Outbox,
}

impl Member {
    /// Create a member that receives room traffic through `outbox`.
    #[must_use]
    pub fn new(id: ClientId, name: impl Into<String>, outbox: Outbox) -> Self {
        Self {
            id,
            name: name.into(),
            outbox,
        }
    }

    /// Get the member's client id.
    #[must_use]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Get the member's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct JoinRequest {
    member: Member,
    applied: oneshot::Sender<()>,
}

struct LeaveRequest {
    client: ClientId,
    applied: oneshot::Sender<()>,
}

/// Handle to a running room.
///
/// Cloning is cheap; every clone feeds the same event loop.
#[derive(Clone)]
pub struct Room {
    id: RoomId,
    name: Arc<str>,
    join: mpsc::Sender<JoinRequest>,
    leave: mpsc::Sender<LeaveRequest>,
    broadcast: mpsc::Sender<Bytes>,
}

impl Room {
    /// Create a room handle and its not-yet-started event loop.
    #[must_use]
    pub fn new(id: RoomId, name: &str, config: &RoomConfig) -> (Self, RoomRunner) {
        let (join_tx, join_rx) = mpsc::channel(1);
        let (leave_tx, leave_rx) = mpsc::channel(1);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_capacity.max(1));
        let name: Arc<str> = Arc::from(name);

        let room = Self {
            id,
            name: Arc::clone(&name),
            join: join_tx,
            leave: leave_tx,
            broadcast: broadcast_tx,
        };
        let runner = RoomRunner {
            id,
            name,
            join: join_rx,
            leave: leave_rx,
            broadcast: broadcast_rx,
            members: HashMap::new(),
        };
        (room, runner)
    }

    /// Get the room id.
    #[must_use]
    pub fn id(&self) -> RoomId {
        self.id
    }

    /// Get the room name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a serializable view of the room.
    #[must_use]
    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            name: self.name.to_string(),
        }
    }

    /// Check if the event loop has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.broadcast.is_closed()
    }

    /// Add a member. Returns once the event loop has applied the join.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::RoomClosed`] if the event loop is not running.
    pub async fn join(&self, member: Member) -> Result<(), RoomError> {
        let (applied, done) = oneshot::channel();
        self.join
            .send(JoinRequest { member, applied })
            .await
            .map_err(|_| self.closed())?;
        done.await.map_err(|_| self.closed())
    }

    /// Remove a member. Returns once the event loop has applied the leave.
    ///
    /// Leaving twice is harmless; the second request is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::RoomClosed`] if the event loop is not running.
    pub async fn leave(&self, client: ClientId) -> Result<(), RoomError> {
        let (applied, done) = oneshot::channel();
        self.leave
            .send(LeaveRequest { client, applied })
            .await
            .map_err(|_| self.closed())?;
        done.await.map_err(|_| self.closed())
    }

    /// Queue a payload for every member. Waits while the broadcast buffer is full.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::RoomClosed`] if the event loop is not running.
    pub async fn broadcast(&self, payload: impl Into<Bytes>) -> Result<(), RoomError> {
        self.broadcast
            .send(payload.into())
            .await
            .map_err(|_| self.closed())
    }

    fn closed(&self) -> RoomError {
        RoomError::RoomClosed(self.name.to_string())
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The event loop of one room.
///
/// Runs until every [`Room`] handle has been dropped.
pub struct RoomRunner {
    id: RoomId,
    name: Arc<str>,
    join: mpsc::Receiver<JoinRequest>,
    leave: mpsc::Receiver<LeaveRequest>,
    broadcast: mpsc::Receiver<Bytes>,
    members: HashMap<ClientId, Member>,
}

impl RoomRunner {
    /// Run the event loop on a new task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the event loop on the current task.
    pub async fn run(mut self) {
        debug!(room = %self.name, id = self.id, "Room loop started");

        loop {
            tokio::select! {
                Some(request) = self.join.recv() => self.handle_join(request),
                Some(request) = self.leave.recv() => self.handle_leave(request),
                Some(payload) = self.broadcast.recv() => self.fan_out(payload),
                else => break,
            }
        }

        info!(room = %self.name, "Room loop stopped");
    }

    fn handle_join(&mut self, request: JoinRequest) {
        let JoinRequest { member, applied } = request;
        let notice = welcome_notice(member.name());

        debug!(
            room = %self.name,
            client = member.id(),
            name = %member.name(),
            members = self.members.len() + 1,
            "Member joined"
        );

        self.members.insert(member.id(), member);
        self.fan_out(notice);
        let _ = applied.send(());
    }

    fn handle_leave(&mut self, request: LeaveRequest) {
        let LeaveRequest { client, applied } = request;

        if let Some(member) = self.members.remove(&client) {
            debug!(
                room = %self.name,
                client = client,
                name = %member.name,
                members = self.members.len(),
                "Member left"
            );
            let notice = left_notice(&member.name);
            member.outbox.close();
            self.fan_out(notice);
        } else {
            trace!(room = %self.name, client = client, "Leave for absent member");
        }

        let _ = applied.send(());
    }

    fn fan_out(&mut self, payload: Bytes) {
        let mut delivered = 0;
        let mut evicted = Vec::new();

        for (id, member) in &self.members {
            match member.outbox.try_push(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(PushError::Full) => evicted.push(*id),
                // The member's own inbound pump will send the leave.
                Err(PushError::Closed) => trace!(room = %self.name, client = *id, "Outbox gone"),
            }
        }

        for id in evicted {
            if let Some(member) = self.members.remove(&id) {
                warn!(
                    room = %self.name,
                    client = id,
                    name = %member.name,
                    "Mailbox full, disconnecting slow member"
                );
                metrics::record_slow_consumer();
                member.outbox.abort();
            }
        }

        trace!(room = %self.name, recipients = delivered, "Fanned out message");
        metrics::record_fanout(delivered);
    }
}
