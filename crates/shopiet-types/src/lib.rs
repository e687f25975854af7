pub mod api;
pub mod events;
pub mod room;

pub use room::{RoomName, RoomNameError, canonical_room_key};
