pub mod connection;
pub mod registry;
pub mod session;

pub use registry::RoomRegistry;
pub use session::{Session, SessionState};
