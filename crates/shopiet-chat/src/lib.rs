pub mod cache;
pub mod conversations;
pub mod error;
pub mod identity;
pub mod query;
pub mod store;

pub use cache::ResponseCache;
pub use error::{ChatError, ChatResult};
pub use identity::IdentityResolver;
pub use query::QueryService;
pub use store::MessageStore;
