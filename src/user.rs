//! `UserRegistry`: in-memory cache of uid → user record, write-through to
//! the store, falling back to the store on a cache miss.

use std::{collections::HashMap, sync::Arc};

use serde_json::Value;
use tokio::sync::Mutex;

use crate::{error::Result, store::Store};

/// A cached user record.
#[derive(Debug, Clone)]
pub struct User {
    pub uid: String,
    pub public: Option<Value>,
    pub private: Option<Value>,
}

impl User {
    #[must_use]
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            public: None,
            private: None,
        }
    }

    /// Merges a fresh description payload into this record.
    pub fn merge_desc(&mut self, public: Option<Value>, private: Option<Value>) {
        if public.is_some() {
            self.public = public;
        }
        if private.is_some() {
            self.private = private;
        }
    }
}

/// Caches user records by uid. Write-through: every update is also
/// persisted via the attached [`Store`] before the cache is updated.
pub struct UserRegistry {
    users: Mutex<HashMap<String, User>>,
    store: Option<Arc<dyn Store>>,
}

impl UserRegistry {
    #[must_use]
    pub fn new(store: Option<Arc<dyn Store>>) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Merges fresh description or subscription payloads into an existing
    /// record, or creates a new one, then writes through to the store.
    pub async fn update_user(
        &self,
        uid: &str,
        public: Option<Value>,
        private: Option<Value>,
    ) -> Result<User> {
        let mut guard = self.users.lock().await;
        let entry = guard
            .entry(uid.to_string())
            .or_insert_with(|| User::new(uid));
        entry.merge_desc(public, private);
        let snapshot = entry.clone();
        drop(guard);
        if let Some(store) = &self.store {
            store.user_update(&snapshot).await?;
        }
        Ok(snapshot)
    }

    /// Returns the cached record, falling back to the store on miss and
    /// re-caching the result.
    pub async fn get_user(&self, uid: &str) -> Result<Option<User>> {
        if let Some(cached) = self.users.lock().await.get(uid).cloned() {
            return Ok(Some(cached));
        }
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let Some(fetched) = store.user_get(uid).await? else {
            return Ok(None);
        };
        self.users
            .lock()
            .await
            .insert(uid.to_string(), fetched.clone());
        Ok(Some(fetched))
    }
}
