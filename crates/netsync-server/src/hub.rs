//! Room registry shared by all connection tasks.

use std::collections::HashMap;
use std::sync::Arc;

use netsync_core::{ClientNo, VariableLimits};
use parking_lot::RwLock;
use thiserror::Error;

use crate::room::{Outbox, Room, RoomError};

#[derive(Error, Debug)]
pub enum HubError {
    #[error(transparent)]
    Room(#[from] RoomError),

    #[error("Room not found: {0}")]
    RoomNotFound(String),
}

/// All rooms, created on first join and removed when the last client leaves.
#[derive(Debug, Clone)]
pub struct Hub {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
    max_clients_per_room: u32,
    limits: VariableLimits,
}

impl Hub {
    pub fn new(max_clients_per_room: u32, limits: VariableLimits) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            max_clients_per_room,
            limits,
        }
    }

    /// Join `room_id`, creating the room if needed.
    pub fn join(&self, room_id: &str, device_id: &str, outbox: Outbox) -> Result<ClientNo, HubError> {
        let mut rooms = self.rooms.write();
        let room = rooms.entry(room_id.to_string()).or_insert_with(|| {
            tracing::info!(room = room_id, "Room created");
            Room::new(room_id.to_string(), self.max_clients_per_room, self.limits)
        });

        match room.join(device_id, outbox) {
            Ok(client_no) => Ok(client_no),
            Err(e) => {
                if room.is_empty() {
                    rooms.remove(room_id);
                }
                Err(e.into())
            }
        }
    }

    /// Leave a room; the room is dropped once empty.
    pub fn leave(&self, room_id: &str, client_no: ClientNo) -> bool {
        let mut rooms = self.rooms.write();
        let Some(room) = rooms.get_mut(room_id) else {
            return false;
        };
        let removed = room.leave(client_no);
        if room.is_empty() {
            rooms.remove(room_id);
            tracing::info!(room = room_id, "Room closed");
        }
        removed
    }

    /// Run a mutation against one room.
    pub fn with_room<R>(
        &self,
        room_id: &str,
        f: impl FnOnce(&mut Room) -> Result<R, RoomError>,
    ) -> Result<R, HubError> {
        let mut rooms = self.rooms.write();
        let room = rooms
            .get_mut(room_id)
            .ok_or_else(|| HubError::RoomNotFound(room_id.to_string()))?;
        Ok(f(room)?)
    }

    /// Read one room.
    pub fn inspect<R>(&self, room_id: &str, f: impl FnOnce(&Room) -> R) -> Option<R> {
        let rooms = self.rooms.read();
        rooms.get(room_id).map(f)
    }

    /// Read every room, ordered by id.
    pub fn inspect_all<R>(&self, mut f: impl FnMut(&Room) -> R) -> Vec<R> {
        let rooms = self.rooms.read();
        let mut ids: Vec<&String> = rooms.keys().collect();
        ids.sort();
        ids.into_iter().map(|id| f(&rooms[id])).collect()
    }

    pub fn count_rooms(&self) -> usize {
        self.rooms.read().len()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[test]
    fn test_rooms_created_and_removed() {
        let hub = Hub::new(8, VariableLimits::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        let a = hub.join("lobby", "dev-a", tx.clone()).unwrap();
        let b = hub.join("lobby", "dev-b", tx.clone()).unwrap();
        hub.join("other", "dev-c", tx).unwrap();

        assert_eq!((a, b), (1, 2));
        assert_eq!(hub.count_rooms(), 2);
        assert_eq!(hub.inspect("lobby", Room::count_clients), Some(2));

        assert!(hub.leave("lobby", a));
        assert!(hub.leave("lobby", b));
        assert_eq!(hub.count_rooms(), 1);
        assert!(!hub.leave("lobby", b));
    }

    #[test]
    fn test_with_room_missing() {
        let hub = Hub::new(8, VariableLimits::default());
        let result = hub.with_room("nowhere", |room| room.set_global(1, "a", "b"));
        assert!(matches!(result, Err(HubError::RoomNotFound(id)) if id == "nowhere"));
    }

    #[test]
    fn test_full_room_error_keeps_room() {
        let hub = Hub::new(1, VariableLimits::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.join("lobby", "dev-a", tx.clone()).unwrap();
        assert!(matches!(
            hub.join("lobby", "dev-b", tx),
            Err(HubError::Room(RoomError::RoomFull))
        ));
        assert_eq!(hub.count_rooms(), 1);
    }

    #[test]
    fn test_inspect_all_sorted() {
        let hub = Hub::new(8, VariableLimits::default());
        let (tx, _rx) = mpsc::unbounded_channel();
        hub.join("b", "d1", tx.clone()).unwrap();
        hub.join("a", "d2", tx).unwrap();
        let ids = hub.inspect_all(|room| room.id().to_string());
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
