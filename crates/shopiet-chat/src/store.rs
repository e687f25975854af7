use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error};

use shopiet_db::Database;
use shopiet_types::api::{ConversationEntry, MessageView};

use crate::cache::{ResponseCache, conversations_key, history_key};
use crate::conversations;
use crate::error::{ChatError, ChatResult};
use crate::identity::IdentityResolver;

/// Source of truth for direct messages.
///
/// Every write that changes what a reader would see invalidates the cached
/// responses for both participants after the row is committed, so a reader
/// that misses afterwards always observes the write.
pub struct MessageStore {
    db: Arc<Database>,
    identities: Arc<dyn IdentityResolver>,
    cache: Arc<ResponseCache>,
}

impl MessageStore {
    pub fn new(
        db: Arc<Database>,
        identities: Arc<dyn IdentityResolver>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            db,
            identities,
            cache,
        }
    }

    /// Persist a message from `sender` to `recipient` (usernames).
    ///
    /// Fails without writing if the content is blank, the two users are the
    /// same, or either username is unknown. A failed insert performs no
    /// invalidation.
    pub async fn append(
        &self,
        sender: &str,
        recipient: &str,
        content: &str,
    ) -> ChatResult<MessageView> {
        if content.trim().is_empty() {
            return Err(ChatError::validation("message content must not be empty"));
        }
        if sender == recipient {
            return Err(ChatError::validation("sender and recipient must differ"));
        }

        let sender_id = self.resolve_user(sender).await?;
        let recipient_id = self.resolve_user(recipient).await?;

        let content = content.to_string();
        let cache = self.cache.clone();
        let (user_a, user_b) = (sender.to_string(), recipient.to_string());
        // Invalidate on the blocking thread: the insert commits even if the
        // awaiting task is cancelled, and so must the invalidation.
        let row = self
            .blocking(move |db| {
                let row = db.insert_message(&sender_id, &recipient_id, &content, Utc::now())?;
                invalidate_pair(&cache, &user_a, &user_b);
                Ok(row)
            })
            .await?;

        debug!("Stored message {} from {} to {}", row.id, sender, recipient);
        Ok(row.into())
    }

    /// Mark every unviewed message between `user_a` and `user_b` as viewed
    /// when `viewer` is one of them. Returns the number of messages changed;
    /// a non-participant changes nothing.
    pub async fn mark_viewed(&self, user_a: &str, user_b: &str, viewer: &str) -> ChatResult<usize> {
        if viewer != user_a && viewer != user_b {
            return Ok(0);
        }

        let a_id = self.resolve_user(user_a).await?;
        let b_id = self.resolve_user(user_b).await?;

        let cache = self.cache.clone();
        let (name_a, name_b) = (user_a.to_string(), user_b.to_string());
        let changed = self
            .blocking(move |db| {
                let changed = db.mark_viewed_between(&a_id, &b_id)?;
                if changed > 0 {
                    invalidate_pair(&cache, &name_a, &name_b);
                }
                Ok(changed)
            })
            .await?;

        if changed > 0 {
            debug!(
                "{} marked {} messages viewed in {}_{}",
                viewer, changed, user_a, user_b
            );
        }
        Ok(changed)
    }

    /// Every message between the two users, oldest first.
    pub async fn query_between(&self, user_a: &str, user_b: &str) -> ChatResult<Vec<MessageView>> {
        let a_id = self.resolve_user(user_a).await?;
        let b_id = self.resolve_user(user_b).await?;

        let rows = self
            .blocking(move |db| db.get_messages_between(&a_id, &b_id))
            .await?;
        Ok(rows.into_iter().map(MessageView::from).collect())
    }

    /// One summary per conversation partner of `username`, newest first.
    pub async fn conversations_for(&self, username: &str) -> ChatResult<Vec<ConversationEntry>> {
        let user_id = self.resolve_user(username).await?;

        let viewer_id = user_id.clone();
        let rows = self
            .blocking(move |db| db.get_conversations(&viewer_id))
            .await?;
        Ok(conversations::summarize(&user_id, rows))
    }

    /// Identity-service id for `username`, or `NotFound`.
    pub async fn resolve_user(&self, username: &str) -> ChatResult<String> {
        let identities = self.identities.clone();
        let name = username.to_string();
        let resolved = tokio::task::spawn_blocking(move || identities.resolve(&name))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ChatError::Store(anyhow::anyhow!("identity lookup task failed: {}", e))
            })??;

        resolved.ok_or_else(|| ChatError::not_found(format!("user '{}' not found", username)))
    }

    // Run blocking DB work off the async runtime
    async fn blocking<T, F>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let result = tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ChatError::Store(anyhow::anyhow!("database task failed: {}", e))
            })?;
        result.map_err(ChatError::Store)
    }
}

/// Drop every cached response the pair's messages appear in: both history
/// orderings and both conversation lists.
fn invalidate_pair(cache: &ResponseCache, user_a: &str, user_b: &str) {
    cache.invalidate(&history_key(user_a, user_b));
    cache.invalidate(&history_key(user_b, user_a));
    cache.invalidate(&conversations_key(user_a));
    cache.invalidate(&conversations_key(user_b));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::Bytes;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<ResponseCache>, MessageStore) {
        let dir = TempDir::new().expect("temp dir");
        let db = Arc::new(Database::open(&dir.path().join("chat.db")).expect("open db"));
        for name in ["alice", "bob", "carol"] {
            db.create_user(&format!("id-{name}"), name).expect("create user");
        }
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(300)));
        let store = MessageStore::new(db.clone(), db, cache.clone());
        (dir, cache, store)
    }

    #[tokio::test]
    async fn append_is_visible_exactly_once_at_the_end() {
        let (_dir, _cache, store) = setup();
        store.append("alice", "bob", "first").await.unwrap();
        store.append("bob", "alice", "second").await.unwrap();
        let sent = store.append("alice", "bob", "third").await.unwrap();

        let history = store.query_between("bob", "alice").await.unwrap();
        assert_eq!(history.last(), Some(&sent));
        assert_eq!(history.iter().filter(|m| m.id == sent.id).count(), 1);
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn append_rejects_invalid_input_without_writing() {
        let (_dir, _cache, store) = setup();

        let err = store.append("alice", "bob", "   ").await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        let err = store.append("alice", "alice", "hi me").await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        let err = store.append("alice", "mallory", "hi").await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));

        assert!(store.query_between("alice", "bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_invalidates_both_orderings_and_both_lists() {
        let (_dir, cache, store) = setup();
        let keys = [
            history_key("carol", "bob"),
            history_key("bob", "carol"),
            conversations_key("carol"),
            conversations_key("bob"),
        ];
        for key in &keys {
            assert!(cache.insert_if_current(key, cache.generation(), Bytes::from_static(b"[]")));
        }
        let untouched = conversations_key("alice");
        cache.insert_if_current(&untouched, 0, Bytes::from_static(b"[]"));

        store.append("carol", "bob", "m").await.unwrap();

        for key in &keys {
            assert!(cache.get(key).is_none(), "{key} still cached");
        }
        assert!(cache.get(&untouched).is_some());
    }

    #[tokio::test]
    async fn cancelled_append_still_invalidates_once_committed() {
        let dir = TempDir::new().expect("temp dir");
        let db = Arc::new(Database::open(&dir.path().join("chat.db")).expect("open db"));
        for name in ["alice", "bob"] {
            db.create_user(&format!("id-{name}"), name).expect("create user");
        }
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(300)));
        let store = Arc::new(MessageStore::new(db.clone(), db.clone(), cache.clone()));
        let key = history_key("alice", "bob");
        cache.insert_if_current(&key, 0, Bytes::from_static(b"[]"));

        // Park the writer so the insert is in flight when the caller goes away.
        let (held_tx, held_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let writer = db.clone();
        let holder = tokio::task::spawn_blocking(move || {
            writer.with_conn_mut(|_| {
                let _ = held_tx.send(());
                let _ = release_rx.recv();
                Ok(())
            })
        });
        held_rx.await.unwrap();

        let appender = store.clone();
        let append = tokio::spawn(async move { appender.append("alice", "bob", "late").await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        append.abort();
        assert!(append.await.unwrap_err().is_cancelled());

        release_tx.send(()).unwrap();
        holder.await.unwrap().unwrap();

        let mut settled = false;
        for _ in 0..100 {
            let stored = store.query_between("alice", "bob").await.unwrap();
            if stored.len() == 1 && cache.get(&key).is_none() {
                settled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(settled, "committed message left a stale history cached");
    }

    #[tokio::test]
    async fn failed_append_keeps_cache() {
        let (_dir, cache, store) = setup();
        let key = history_key("alice", "bob");
        cache.insert_if_current(&key, 0, Bytes::from_static(b"[]"));

        assert!(store.append("alice", "bob", "").await.is_err());
        assert!(cache.get(&key).is_some());
    }

    #[tokio::test]
    async fn mark_viewed_only_for_participants() {
        let (_dir, _cache, store) = setup();
        store.append("bob", "alice", "1").await.unwrap();
        store.append("bob", "alice", "2").await.unwrap();

        assert_eq!(store.mark_viewed("alice", "bob", "carol").await.unwrap(), 0);
        assert_eq!(store.mark_viewed("alice", "bob", "alice").await.unwrap(), 2);
        assert_eq!(store.mark_viewed("bob", "alice", "alice").await.unwrap(), 0);

        let history = store.query_between("alice", "bob").await.unwrap();
        assert!(history.iter().all(|m| m.viewed));
    }

    #[tokio::test]
    async fn conversations_for_unknown_user_is_not_found() {
        let (_dir, _cache, store) = setup();
        let err = store.conversations_for("mallory").await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
        assert!(store.conversations_for("alice").await.unwrap().is_empty());
    }
}
