//! `TopicRegistry` and the topic capability set: a small `Send + Sync`
//! async trait with default no-op methods, registered into the registry by
//! name.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    error::Result,
    message::Meta,
    store::{Store, StoredTopic},
};

/// Topic name → type classification by prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicType {
    Me,
    Fnd,
    Group,
    P2p,
    Unknown,
}

impl TopicType {
    #[must_use]
    pub fn classify(name: &str) -> Self {
        if name == "me" {
            Self::Me
        } else if name == "fnd" {
            Self::Fnd
        } else if name.starts_with("grp") || name.starts_with("new") {
            Self::Group
        } else if name.starts_with("usr") {
            Self::P2p
        } else {
            Self::Unknown
        }
    }
}

/// The capability set the core needs from an opaque, application-owned
/// topic handle. Every method defaults to a no-op so a minimal topic
/// implementation can override only what it cares about.
#[async_trait]
pub trait Topic: Send + Sync {
    fn name(&self) -> &str;
    fn topic_type(&self) -> TopicType;
    fn updated(&self) -> Option<DateTime<Utc>> {
        None
    }
    fn touched(&self) -> Option<DateTime<Utc>> {
        None
    }

    async fn route_data(&self, _data: &crate::message::Data) {}
    async fn route_meta(&self, _meta: &Meta) {}
    async fn route_pres(&self, _pres: &crate::message::Pres) {}
    async fn route_info(&self, _info: &crate::message::Info) {}
    async fn topic_left(&self, _unsub: bool, _code: u16, _reason: &str) {}
    async fn all_messages_received(&self, _count: Option<i64>) {}
    async fn all_subs_received(&self) {}
}

/// Builds a topic handle for a name the core has not seen before. Supplied
/// by the application; the core has no opinion on what a default topic
/// handle looks like.
pub trait TopicFactory: Send + Sync {
    fn create(&self, name: &str, topic_type: TopicType) -> Arc<dyn Topic>;
}

/// In-memory map of topic name → handle, with cold-load-from-store.
pub struct TopicRegistry {
    topics: Mutex<HashMap<String, Arc<dyn Topic>>>,
    topics_loaded: Mutex<bool>,
    topics_updated: Mutex<Option<DateTime<Utc>>>,
    store: Option<Arc<dyn Store>>,
    factory: Option<Arc<dyn TopicFactory>>,
}

impl TopicRegistry {
    #[must_use]
    pub fn new(store: Option<Arc<dyn Store>>, factory: Option<Arc<dyn TopicFactory>>) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            topics_loaded: Mutex::new(false),
            topics_updated: Mutex::new(None),
            store,
            factory,
        }
    }

    pub async fn start_tracking(&self, handle: Arc<dyn Topic>) {
        let name = handle.name().to_string();
        self.bump_topics_updated(TopicType::classify(&name), handle.updated())
            .await;
        self.topics.lock().await.insert(name, handle);
    }

    /// Returns `true` if `name` was tracked.
    pub async fn stop_tracking(&self, name: &str) -> bool {
        self.topics.lock().await.remove(name).is_some()
    }

    pub async fn is_tracked(&self, name: &str) -> bool {
        self.topics.lock().await.contains_key(name)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Topic>> {
        self.topics.lock().await.get(name).cloned()
    }

    pub async fn get_all(&self) -> Vec<Arc<dyn Topic>> {
        self.topics.lock().await.values().cloned().collect()
    }

    /// Topics matching `predicate`, sorted by `touched` descending (missing
    /// values sort as distant past).
    pub async fn get_filtered(
        &self,
        predicate: impl Fn(&Arc<dyn Topic>) -> bool,
    ) -> Vec<Arc<dyn Topic>> {
        let mut matched: Vec<Arc<dyn Topic>> = self
            .topics
            .lock()
            .await
            .values()
            .filter(|t| predicate(t))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            let ta = a.touched().unwrap_or(DateTime::<Utc>::MIN_UTC);
            let tb = b.touched().unwrap_or(DateTime::<Utc>::MIN_UTC);
            tb.cmp(&ta)
        });
        matched
    }

    /// Rekeys `oldName` to `handle.name()` and asks the store to persist.
    /// Returns whether `oldName` was present.
    pub async fn change_topic_name(&self, handle: Arc<dyn Topic>, old_name: &str) -> Result<bool> {
        let new_name = handle.name().to_string();
        let mut guard = self.topics.lock().await;
        let was_present = guard.remove(old_name).is_some();
        guard.insert(new_name.clone(), Arc::clone(&handle));
        drop(guard);
        if let Some(store) = &self.store {
            store
                .topic_update(&StoredTopic {
                    name: new_name,
                    updated: handle.updated(),
                    touched: handle.touched(),
                })
                .await?;
        }
        Ok(was_present)
    }

    /// Constructs a topic handle for an unknown name referenced by an
    /// inbound meta frame carrying a description, classifying its subtype
    /// from the name. Returns `None` if no description is present or no
    /// factory is attached.
    pub async fn maybe_create_topic(&self, meta: &Meta) -> Option<Arc<dyn Topic>> {
        if meta.desc.is_none() {
            return None;
        }
        let factory = self.factory.as_ref()?;
        let topic_type = TopicType::classify(&meta.topic);
        let handle = factory.create(&meta.topic, topic_type);
        self.start_tracking(Arc::clone(&handle)).await;
        Some(handle)
    }

    /// Loads all topics from the store, if attached and ready, binding the
    /// registry's `topicsLoaded` flag so this only ever runs once.
    /// `from_session` is passed through to the store so it can decide
    /// whether a reload is worth doing. Loading without a factory attached
    /// only computes `topicsUpdated`; it cannot materialize topic handles
    /// on its own.
    pub async fn cold_load(&self, from_session: bool) -> Result<()> {
        let mut loaded = self.topics_loaded.lock().await;
        if *loaded {
            return Ok(());
        }
        let Some(store) = &self.store else {
            *loaded = true;
            return Ok(());
        };
        if !store.is_ready() {
            return Ok(());
        }
        let stored = store.topic_get_all(from_session).await?;
        for record in &stored {
            self.bump_topics_updated(TopicType::classify(&record.name), record.updated)
                .await;
            if let Some(factory) = &self.factory {
                let handle = factory.create(&record.name, TopicType::classify(&record.name));
                self.topics
                    .lock()
                    .await
                    .insert(record.name.clone(), handle);
            }
        }
        *loaded = true;
        Ok(())
    }

    #[must_use]
    pub async fn topics_loaded(&self) -> bool {
        *self.topics_loaded.lock().await
    }

    /// Max `updated` among tracked topics excluding types `me` and `fnd`.
    #[must_use]
    pub async fn topics_updated(&self) -> Option<DateTime<Utc>> {
        *self.topics_updated.lock().await
    }

    /// Updates `topicsUpdated` from a topic that changed after already
    /// being tracked (e.g. a fresh meta frame).
    pub async fn note_topic_updated(&self, topic_type: TopicType, updated: Option<DateTime<Utc>>) {
        self.bump_topics_updated(topic_type, updated).await;
    }

    async fn bump_topics_updated(&self, topic_type: TopicType, updated: Option<DateTime<Utc>>) {
        if matches!(topic_type, TopicType::Me | TopicType::Fnd) {
            return;
        }
        let Some(updated) = updated else { return };
        let mut guard = self.topics_updated.lock().await;
        *guard = Some(match *guard {
            Some(current) if current >= updated => current,
            _ => updated,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub {
        name: String,
        topic_type: TopicType,
        touched: Option<DateTime<Utc>>,
    }

    #[async_trait]
    impl Topic for Stub {
        fn name(&self) -> &str {
            &self.name
        }
        fn topic_type(&self) -> TopicType {
            self.topic_type
        }
        fn touched(&self) -> Option<DateTime<Utc>> {
            self.touched
        }
    }

    #[test]
    fn classifies_by_prefix() {
        assert_eq!(TopicType::classify("me"), TopicType::Me);
        assert_eq!(TopicType::classify("fnd"), TopicType::Fnd);
        assert_eq!(TopicType::classify("grpAbC"), TopicType::Group);
        assert_eq!(TopicType::classify("newAbC"), TopicType::Group);
        assert_eq!(TopicType::classify("usrXyz"), TopicType::P2p);
        assert_eq!(TopicType::classify("weird"), TopicType::Unknown);
    }

    #[tokio::test]
    async fn start_and_stop_tracking() {
        let registry = TopicRegistry::new(None, None);
        let handle = Arc::new(Stub {
            name: "grpX".into(),
            topic_type: TopicType::Group,
            touched: None,
        });
        registry.start_tracking(handle).await;
        assert!(registry.is_tracked("grpX").await);
        assert!(registry.stop_tracking("grpX").await);
        assert!(!registry.is_tracked("grpX").await);
    }

    #[tokio::test]
    async fn get_filtered_sorts_by_touched_descending_with_missing_as_past() {
        let registry = TopicRegistry::new(None, None);
        let now = Utc::now();
        registry
            .start_tracking(Arc::new(Stub {
                name: "grpA".into(),
                topic_type: TopicType::Group,
                touched: Some(now),
            }))
            .await;
        registry
            .start_tracking(Arc::new(Stub {
                name: "grpB".into(),
                topic_type: TopicType::Group,
                touched: None,
            }))
            .await;
        let sorted = registry.get_filtered(|_| true).await;
        assert_eq!(sorted[0].name(), "grpA");
        assert_eq!(sorted[1].name(), "grpB");
    }

    #[tokio::test]
    async fn cold_load_without_a_store_just_marks_loaded() {
        let registry = TopicRegistry::new(None, None);
        registry.cold_load(false).await.unwrap();
        assert!(registry.topics_loaded().await);
        registry.cold_load(false).await.unwrap();
    }
}
