use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use shopiet_types::RoomName;

use crate::cache::{ResponseCache, conversations_key, history_key};
use crate::error::{ChatError, ChatResult};
use crate::store::MessageStore;

/// Read-through entry points for the HTTP API. Both return the serialized
/// JSON body so a cache hit is served without re-encoding.
pub struct QueryService {
    store: Arc<MessageStore>,
    cache: Arc<ResponseCache>,
}

impl QueryService {
    pub fn new(store: Arc<MessageStore>, cache: Arc<ResponseCache>) -> Self {
        Self { store, cache }
    }

    /// Messages of `room`, oldest first, fetched by `viewer`.
    ///
    /// Marks the room's unviewed messages as viewed before the cache lookup;
    /// when that changes anything the cached history is invalidated, so the
    /// returned flags are never older than the fetch itself.
    pub async fn get_room_history(&self, room: &RoomName, viewer: &str) -> ChatResult<Bytes> {
        if room.first() == room.second() {
            return Err(ChatError::validation("a room needs two different users"));
        }
        if !room.contains(viewer) {
            return Err(ChatError::forbidden(format!(
                "'{}' is not a participant of room '{}'",
                viewer, room
            )));
        }

        self.store
            .mark_viewed(room.first(), room.second(), viewer)
            .await?;

        let key = history_key(room.first(), room.second());
        self.read_through(&key, move || async move {
            let messages = self.store.query_between(room.first(), room.second()).await?;
            let body = serde_json::to_string(&messages).map_err(anyhow::Error::from)?;
            Ok::<_, ChatError>(body)
        })
        .await
    }

    /// `username`'s conversations, newest first. Only the owner may read them.
    pub async fn get_conversation_list(&self, username: &str, viewer: &str) -> ChatResult<Bytes> {
        if username != viewer {
            return Err(ChatError::forbidden("conversation lists are private"));
        }

        let key = conversations_key(username);
        self.read_through(&key, move || async move {
            let entries = self.store.conversations_for(username).await?;
            let body = serde_json::to_string(&entries).map_err(anyhow::Error::from)?;
            Ok::<_, ChatError>(body)
        })
        .await
    }

    async fn read_through<F, Fut>(&self, key: &str, load: F) -> ChatResult<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ChatResult<String>>,
    {
        if let Some(body) = self.cache.get(key) {
            debug!("Cache hit {}", key);
            return Ok(body);
        }

        let _flight = self.cache.lock(key).await;
        if let Some(body) = self.cache.get(key) {
            debug!("Cache hit {} after waiting for loader", key);
            return Ok(body);
        }

        let generation = self.cache.generation();
        let body = Bytes::from(load().await?);
        if !self.cache.insert_if_current(key, generation, body.clone()) {
            debug!("Not caching {}: invalidated during load", key);
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use shopiet_db::Database;
    use shopiet_types::api::{ConversationEntry, MessageView};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        cache: Arc<ResponseCache>,
        store: Arc<MessageStore>,
        queries: QueryService,
    }

    fn setup() -> Fixture {
        let dir = TempDir::new().expect("temp dir");
        let db = Arc::new(Database::open(&dir.path().join("chat.db")).expect("open db"));
        for name in ["alice", "bob", "carol"] {
            db.create_user(&format!("id-{name}"), name).expect("create user");
        }
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(300)));
        let store = Arc::new(MessageStore::new(db.clone(), db, cache.clone()));
        let queries = QueryService::new(store.clone(), cache.clone());
        Fixture {
            _dir: dir,
            cache,
            store,
            queries,
        }
    }

    fn room(raw: &str) -> RoomName {
        RoomName::parse(raw).unwrap()
    }

    async fn conversations(f: &Fixture, user: &str) -> Vec<ConversationEntry> {
        let body = f.queries.get_conversation_list(user, user).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn history(f: &Fixture, raw: &str, viewer: &str) -> Vec<MessageView> {
        let body = f.queries.get_room_history(&room(raw), viewer).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn conversation_list_orders_partners_by_latest_message() {
        let f = setup();
        f.store.append("alice", "bob", "t1").await.unwrap();
        f.store.append("bob", "alice", "t2").await.unwrap();
        f.store.append("alice", "carol", "t3").await.unwrap();

        let list = conversations(&f, "alice").await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].latest.content, "t3");
        assert_eq!(list[0].latest.recipient, "carol");
        assert_eq!(list[1].latest.content, "t2");
        assert!(list.iter().all(|e| !(e.latest.sender == "alice" && e.latest.recipient == "alice")));
    }

    #[tokio::test]
    async fn unseen_count_clears_after_history_fetch() {
        let f = setup();
        f.store.append("alice", "bob", "seen").await.unwrap();
        f.store.mark_viewed("alice", "bob", "bob").await.unwrap();
        for i in 0..3 {
            f.store.append("bob", "alice", &format!("new {i}")).await.unwrap();
        }

        let list = conversations(&f, "alice").await;
        assert_eq!(list[0].unseen_count, 3);

        let messages = history(&f, "alice_bob", "alice").await;
        assert_eq!(messages.len(), 4);
        assert!(messages.iter().all(|m| m.viewed));

        let list = conversations(&f, "alice").await;
        assert_eq!(list[0].unseen_count, 0);
    }

    #[tokio::test]
    async fn second_history_fetch_is_served_from_cache() {
        let f = setup();
        f.store.append("bob", "alice", "hello").await.unwrap();

        let first = f.queries.get_room_history(&room("alice_bob"), "alice").await.unwrap();
        let second = f.queries.get_room_history(&room("alice_bob"), "alice").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.as_ptr(), second.as_ptr());
    }

    #[tokio::test]
    async fn concurrent_cold_misses_load_once() {
        let f = setup();
        let queries = Arc::new(QueryService::new(f.store.clone(), f.cache.clone()));
        let loads = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let queries = queries.clone();
            let loads = loads.clone();
            handles.push(tokio::spawn(async move {
                queries
                    .read_through("messages_alice_bob", move || async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok("[]".to_string())
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut bodies = Vec::new();
        for handle in handles {
            bodies.push(handle.await.unwrap());
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(bodies.iter().all(|b| b.as_ptr() == bodies[0].as_ptr()));
        assert_eq!(&bodies[0][..], b"[]");
    }

    #[tokio::test]
    async fn history_caches_are_invalidated_in_both_orderings() {
        let f = setup();
        f.store.append("alice", "bob", "one").await.unwrap();

        history(&f, "alice_bob", "alice").await;
        history(&f, "bob_alice", "bob").await;
        assert!(f.cache.get("messages_alice_bob").is_some());
        assert!(f.cache.get("messages_bob_alice").is_some());

        f.store.append("alice", "bob", "two").await.unwrap();
        assert!(f.cache.get("messages_alice_bob").is_none());
        assert!(f.cache.get("messages_bob_alice").is_none());

        let messages = history(&f, "bob_alice", "bob").await;
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["one", "two"]);
    }

    #[tokio::test]
    async fn empty_room_history_is_an_empty_list() {
        let f = setup();
        assert!(history(&f, "carol_bob", "carol").await.is_empty());
    }

    #[tokio::test]
    async fn history_errors() {
        let f = setup();

        let err = f.queries.get_room_history(&room("alice_mallory"), "alice").await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));

        let err = f.queries.get_room_history(&room("alice_bob"), "carol").await.unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));

        let err = f.queries.get_room_history(&room("alice_alice"), "alice").await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test]
    async fn conversation_list_is_private() {
        let f = setup();
        let err = f.queries.get_conversation_list("alice", "bob").await.unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
    }

    #[tokio::test]
    async fn new_message_refreshes_cached_conversation_list() {
        let f = setup();
        f.store.append("alice", "bob", "first").await.unwrap();
        assert_eq!(conversations(&f, "bob").await[0].latest.content, "first");

        f.store.append("carol", "bob", "second").await.unwrap();
        let list = conversations(&f, "bob").await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].latest.content, "second");
    }
}
