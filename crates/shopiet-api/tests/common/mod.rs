#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use tempfile::TempDir;
use uuid::Uuid;

use shopiet_api::{AppState, AppStateInner};
use shopiet_chat::{MessageStore, QueryService, ResponseCache};
use shopiet_db::Database;
use shopiet_gateway::RoomRegistry;
use shopiet_types::api::Claims;

pub const SECRET: &str = "test-secret";

pub struct TestApp {
    _dir: TempDir,
    pub state: AppState,
}

impl TestApp {
    /// Fresh database with `alice`, `bob` and `carol` registered.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("test.db")).unwrap());
        for name in ["alice", "bob", "carol"] {
            db.create_user(&Uuid::new_v4().to_string(), name).unwrap();
        }

        let cache = Arc::new(ResponseCache::new(Duration::from_secs(300)));
        let store = Arc::new(MessageStore::new(db.clone(), db, cache.clone()));
        let state = Arc::new(AppStateInner {
            queries: QueryService::new(store.clone(), cache),
            store,
            registry: RoomRegistry::new(16),
            jwt_secret: SECRET.into(),
        });

        Self { _dir: dir, state }
    }

    pub fn router(&self) -> Router {
        shopiet_api::router(self.state.clone())
    }

    pub async fn send(&self, from: &str, to: &str, content: &str) {
        self.state.store.append(from, to, content).await.unwrap();
    }
}

pub fn token(username: &str) -> String {
    token_with_secret(username, SECRET)
}

pub fn token_with_secret(username: &str, secret: &str) -> String {
    let claims = Claims {
        sub: Uuid::new_v4(),
        username: username.to_string(),
        exp: (Utc::now().timestamp() + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}
