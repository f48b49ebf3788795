//! `Store`: the key-value-like persistence collaborator. An interface
//! only; no concrete implementation ships in this crate, unlike
//! [`crate::connection::Transport`], which does get a concrete
//! `WsTransport`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{error::Result, message::Credential, user::User};

/// A topic record as persisted by the store, read back during
/// [`crate::topic::TopicRegistry`]'s cold-load.
#[derive(Debug, Clone)]
pub struct StoredTopic {
    pub name: String,
    pub updated: Option<DateTime<Utc>>,
    pub touched: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Store: Send + Sync {
    fn is_ready(&self) -> bool;

    async fn my_uid(&self) -> Option<String>;
    async fn set_my_uid(&self, uid: Option<String>, cred_methods: Vec<Credential>) -> Result<()>;

    async fn device_token(&self) -> Option<String>;
    async fn set_device_token(&self, token: Option<String>) -> Result<()>;

    async fn set_time_adjustment(&self, offset: chrono::Duration) -> Result<()>;

    /// `fromSession` signals whether the caller already has cached records
    /// in-memory, letting an implementation decide whether a full reload is
    /// worth doing.
    async fn topic_get_all(&self, from_session: bool) -> Result<Vec<StoredTopic>>;
    async fn topic_update(&self, topic: &StoredTopic) -> Result<()>;

    async fn user_get(&self, uid: &str) -> Result<Option<User>>;
    async fn user_update(&self, user: &User) -> Result<()>;

    async fn logout(&self) -> Result<()>;
    async fn delete_account(&self, uid: &str) -> Result<()>;
}
