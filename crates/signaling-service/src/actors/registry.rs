//! `RoomRegistry` - lazily spawns and hands out room actors.
//!
//! The front door is stateless; the registry is where a `roomId` becomes a
//! live single-writer actor. Each room gets its own `MemoryStore`. The
//! registry owns the root `CancellationToken`, so cancelling it fans out to
//! every room and from there to every socket.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::room::{RoomActor, RoomHandle};
use crate::storage::MemoryStore;

/// Registry of live rooms.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, RoomHandle>>,
    cancel_token: CancellationToken,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Get the handle for a room, spawning its actor on first use.
    pub async fn room(&self, room_id: &str) -> RoomHandle {
        let mut rooms = self.rooms.lock().await;

        if let Some(handle) = rooms.get(room_id) {
            if !handle.is_cancelled() {
                return handle.clone();
            }
        }

        let (handle, _task) = RoomActor::spawn(
            room_id.to_string(),
            Arc::new(MemoryStore::new()),
            self.cancel_token.child_token(),
        );
        info!(
            target: "signal.registry",
            room_id = %room_id,
            rooms = rooms.len() + 1,
            "room spawned"
        );
        rooms.insert(room_id.to_string(), handle.clone());
        handle
    }

    /// Number of rooms ever spawned and still registered.
    pub async fn room_count(&self) -> usize {
        self.rooms.lock().await.len()
    }

    /// Begin shutdown: cancels every room and every socket under it.
    pub fn shutdown(&self) {
        info!(target: "signal.registry", "registry shutdown requested");
        self.cancel_token.cancel();
    }
}
