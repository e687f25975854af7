pub mod chat;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod ws;

pub use routes::router;
pub use state::{AppState, AppStateInner};
