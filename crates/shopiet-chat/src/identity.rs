use shopiet_db::Database;

/// Resolves a username to the identity service's stable user id.
///
/// Called from the blocking pool, so implementations may do synchronous I/O.
pub trait IdentityResolver: Send + Sync {
    /// `Ok(None)` when the username is unknown.
    fn resolve(&self, username: &str) -> anyhow::Result<Option<String>>;
}

/// Users provisioned by the identity service into the shared `users` table.
impl IdentityResolver for Database {
    fn resolve(&self, username: &str) -> anyhow::Result<Option<String>> {
        Ok(self.get_user_by_username(username)?.map(|user| user.id))
    }
}
