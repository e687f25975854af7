use std::sync::Arc;

use shopiet_chat::{MessageStore, QueryService};
use shopiet_gateway::RoomRegistry;

pub type AppState = Arc<AppStateInner>;

/// Services shared by every request and socket. Built once at startup.
pub struct AppStateInner {
    pub store: Arc<MessageStore>,
    pub queries: QueryService,
    pub registry: RoomRegistry,
    pub jwt_secret: String,
}
