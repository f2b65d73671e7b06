//! Actor hierarchy for room state.
//!
//! - [`registry::RoomRegistry`]: spawns one actor per room id
//! - [`room::RoomActor`]: per-room single writer owning all room state
//! - [`socket::SocketActor`]: per-connection writer owning one WebSocket sink

pub mod messages;
pub mod registry;
pub mod room;
pub mod socket;
