//! Room registry for Parley.
//!
//! The registry maps room names to running rooms. It is created once at
//! startup and shared by reference with whatever accepts connections.

use crate::room::{validate_room_name, Room, RoomConfig, RoomError, RoomId, RoomRunner};
use crate::metrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Name of the room every unknown lookup falls back to.
pub const DEFAULT_ROOM_NAME: &str = "first";

/// Id given to the default room.
pub const DEFAULT_ROOM_ID: RoomId = 1;

/// Process-wide mapping from room name to room.
pub struct RoomRegistry {
    /// Rooms indexed by name.
    rooms: DashMap<String, Room>,
    /// Configuration applied to every room created here.
    config: RoomConfig,
    /// Fallback for unknown names.
    default_room: String,
    /// Next id handed out by [`RoomRegistry::next_room_id`].
    next_id: AtomicU64,
}

impl RoomRegistry {
    /// Create an empty registry with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RoomConfig::default(), DEFAULT_ROOM_NAME)
    }

    /// Create an empty registry.
    ///
    /// Lookups of unknown names resolve to `default_room` once it exists.
    #[must_use]
    pub fn with_config(config: RoomConfig, default_room: impl Into<String>) -> Self {
        Self {
            rooms: DashMap::new(),
            config,
            default_room: default_room.into(),
            next_id: AtomicU64::new(DEFAULT_ROOM_ID + 1),
        }
    }

    /// Register a new room.
    ///
    /// The existence check and the insert are a single step, so concurrent
    /// creators of one name see exactly one success. The caller starts the
    /// returned event loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or already taken.
    pub fn create_room(&self, id: RoomId, name: &str) -> Result<(Room, RoomRunner), RoomError> {
        validate_room_name(name).map_err(RoomError::InvalidRoomName)?;

        match self.rooms.entry(name.to_string()) {
            Entry::Occupied(_) => Err(RoomError::DuplicateRoomName(name.to_string())),
            Entry::Vacant(slot) => {
                let (room, runner) = Room::new(id, name, &self.config);
                slot.insert(room.clone());
                self.next_id.fetch_max(id.saturating_add(1), Ordering::Relaxed);
                metrics::record_room_created();
                info!(room = %name, id = id, "Room created");
                Ok((room, runner))
            }
        }
    }

    /// Register a new room and start its event loop.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or already taken.
    pub fn spawn_room(&self, id: RoomId, name: &str) -> Result<Room, RoomError> {
        let (room, runner) = self.create_room(id, name)?;
        runner.spawn();
        Ok(room)
    }

    /// Get a room by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Room> {
        self.rooms.get(name).map(|entry| entry.value().clone())
    }

    /// Get a room by name, falling back to the default room.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Room> {
        self.get(name).or_else(|| self.get(&self.default_room))
    }

    /// Hand out an id not used by any room created so far.
    pub fn next_room_id(&self) -> RoomId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Name of the fallback room.
    #[must_use]
    pub fn default_room_name(&self) -> &str {
        &self.default_room
    }

    /// Number of registered rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no room has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Get all room names.
    #[must_use]
    pub fn room_names(&self) -> Vec<String> {
        self.rooms.iter().map(|e| e.key().clone()).collect()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_name_is_rejected() {
        let registry = RoomRegistry::new();

        let (first, _runner) = registry.create_room(1, "lobby").unwrap();
        assert!(matches!(
            registry.create_room(2, "lobby"),
            Err(RoomError::DuplicateRoomName(name)) if name == "lobby"
        ));

        let found = registry.get("lobby").unwrap();
        assert_eq!(found.id(), first.id());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_name_is_rejected() {
        let registry = RoomRegistry::new();
        assert!(matches!(
            registry.create_room(1, ""),
            Err(RoomError::InvalidRoomName(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_resolve_falls_back_to_default_room() {
        let registry = RoomRegistry::new();
        assert!(registry.resolve("missing").is_none());

        let _default = registry.create_room(DEFAULT_ROOM_ID, DEFAULT_ROOM_NAME).unwrap();
        let _other = registry.create_room(5, "other").unwrap();

        assert_eq!(registry.resolve("missing").unwrap().name(), "first");
        assert_eq!(registry.resolve("other").unwrap().name(), "other");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_concurrent_creation_succeeds_once() {
        let registry = RoomRegistry::new();

        let successes = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let registry = &registry;
                    scope.spawn(move || registry.create_room(i, "contested").is_ok())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count()
        });

        assert_eq!(successes, 1);
        assert_eq!(registry.room_names(), vec!["contested".to_string()]);
    }

    #[test]
    fn test_room_ids_skip_explicit_ones() {
        let registry = RoomRegistry::new();
        let _room = registry.create_room(40, "explicit").unwrap();

        let id = registry.next_room_id();
        assert!(id > 40);
        assert_ne!(registry.next_room_id(), id);
    }

    #[tokio::test]
    async fn test_spawned_room_accepts_broadcasts() {
        let registry = RoomRegistry::new();
        let room = registry.spawn_room(DEFAULT_ROOM_ID, DEFAULT_ROOM_NAME).unwrap();
        room.broadcast("hello").await.unwrap();
        assert!(!room.is_closed());
    }
}
