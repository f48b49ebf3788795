//! `Dispatcher`: decodes inbound frames and routes them to the
//! `FutureRegistry`, `ListenerSet`, and `TopicRegistry`.

use std::sync::Arc;

use tracing::warn;

use crate::{
    codec::MessageCodec,
    error::Error,
    future_registry::FutureRegistry,
    listener::ListenerSet,
    message::{Ctrl, ServerMessage},
    topic::TopicRegistry,
};

/// Entry point for inbound bytes off the transport.
pub struct Dispatcher {
    codec: MessageCodec,
    futures: Arc<FutureRegistry>,
    listeners: Arc<ListenerSet>,
    topics: Arc<TopicRegistry>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        futures: Arc<FutureRegistry>,
        listeners: Arc<ListenerSet>,
        topics: Arc<TopicRegistry>,
    ) -> Self {
        Self {
            codec: MessageCodec::new(),
            futures,
            listeners,
            topics,
        }
    }

    /// Dispatches one raw frame. Empty frames are ignored; everything else
    /// is reported via `onRawMessage` before decoding is attempted.
    pub async fn dispatch(&self, raw: &str) {
        if raw.is_empty() {
            return;
        }
        self.listeners.notify_raw_message(raw).await;

        let decoded = match self.codec.decode(raw) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(error = %err, "failed to decode inbound frame");
                return;
            },
        };

        self.listeners.notify_message(&decoded).await;

        match &decoded {
            ServerMessage::Ctrl(ctrl) => self.handle_ctrl(ctrl).await,
            ServerMessage::Meta(meta) => self.handle_meta(meta).await,
            ServerMessage::Data(data) => self.handle_data(data).await,
            ServerMessage::Pres(pres) => self.handle_pres(pres).await,
            ServerMessage::Info(info) => self.handle_info(info).await,
        }
    }

    async fn handle_ctrl(&self, ctrl: &Ctrl) {
        if let Some(id) = &ctrl.id {
            if (200..400).contains(&ctrl.code) {
                self.futures.resolve(id, ServerMessage::Ctrl(ctrl.clone())).await;
            } else {
                let what = ctrl.param_str("what").map(str::to_string);
                self.futures
                    .reject(id, Error::server_response(ctrl.code, ctrl.text.clone(), what))
                    .await;
            }
        }

        if ctrl.code == 205 && ctrl.text == "evicted" {
            if let Some(topic_name) = &ctrl.topic {
                if let Some(topic) = self.topics.get(topic_name).await {
                    let unsub = ctrl.param_bool("unsub");
                    topic.topic_left(unsub, ctrl.code, &ctrl.text).await;
                }
            }
            return;
        }

        if let Some(what) = ctrl.param_str("what") {
            let Some(topic_name) = &ctrl.topic else {
                return;
            };
            let Some(topic) = self.topics.get(topic_name).await else {
                return;
            };
            match what {
                "data" => topic.all_messages_received(ctrl.param_i64("count")).await,
                "sub" => topic.all_subs_received().await,
                _ => {},
            }
        }
    }

    async fn handle_meta(&self, meta: &crate::message::Meta) {
        let topic = match self.topics.get(&meta.topic).await {
            Some(topic) => Some(topic),
            None => self.topics.maybe_create_topic(meta).await,
        };

        if let Some(topic) = &topic {
            topic.route_meta(meta).await;
            let topic_type = topic.topic_type();
            self.topics.note_topic_updated(topic_type, meta.updated()).await;
        }

        if let Some(id) = &meta.id {
            self.futures
                .resolve(id, ServerMessage::Meta(meta.clone()))
                .await;
        }
    }

    async fn handle_data(&self, data: &crate::message::Data) {
        if let Some(topic) = self.topics.get(&data.topic).await {
            topic.route_data(data).await;
        }
        if let Some(id) = &data.id {
            self.futures
                .resolve(id, ServerMessage::Data(data.clone()))
                .await;
        }
    }

    async fn handle_pres(&self, pres: &crate::message::Pres) {
        let Some(topic) = self.topics.get(&pres.topic).await else {
            return;
        };
        topic.route_pres(pres).await;

        if pres.topic == "me" {
            if let Some(src) = &pres.src {
                if src.starts_with("usr") {
                    if let Some(peer) = self.topics.get(src).await {
                        peer.route_pres(pres).await;
                    }
                }
            }
        }
    }

    async fn handle_info(&self, info: &crate::message::Info) {
        if let Some(topic) = self.topics.get(&info.topic).await {
            topic.route_info(info).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::{message::Data, topic::TopicType};

    struct RecordingTopic {
        name: String,
        data_routed: AtomicBool,
        evicted: AtomicBool,
        all_received_count: AtomicI64,
    }

    #[async_trait]
    impl crate::topic::Topic for RecordingTopic {
        fn name(&self) -> &str {
            &self.name
        }
        fn topic_type(&self) -> TopicType {
            TopicType::classify(&self.name)
        }
        async fn route_data(&self, _data: &Data) {
            self.data_routed.store(true, Ordering::SeqCst);
        }
        async fn topic_left(&self, _unsub: bool, _code: u16, _reason: &str) {
            self.evicted.store(true, Ordering::SeqCst);
        }
        async fn all_messages_received(&self, count: Option<i64>) {
            self.all_received_count.store(count.unwrap_or(-1), Ordering::SeqCst);
        }
    }

    fn new_dispatcher() -> (Dispatcher, Arc<FutureRegistry>, Arc<TopicRegistry>) {
        let futures = Arc::new(FutureRegistry::new());
        let listeners = Arc::new(ListenerSet::new());
        let topics = Arc::new(TopicRegistry::new(None, None));
        (
            Dispatcher::new(futures.clone(), listeners, topics.clone()),
            futures,
            topics,
        )
    }

    #[tokio::test]
    async fn empty_frame_is_ignored() {
        let (dispatcher, _futures, _topics) = new_dispatcher();
        dispatcher.dispatch("").await;
    }

    #[tokio::test]
    async fn ctrl_success_resolves_the_pending_future() {
        let (dispatcher, futures, _topics) = new_dispatcher();
        let rx = futures.insert("1".into()).await;
        dispatcher
            .dispatch(r#"{"ctrl":{"id":"1","code":200,"text":"ok"}}"#)
            .await;
        let reply = rx.await.unwrap().unwrap();
        assert!(matches!(reply, ServerMessage::Ctrl(c) if c.code == 200));
    }

    #[tokio::test]
    async fn ctrl_failure_rejects_with_server_response() {
        let (dispatcher, futures, _topics) = new_dispatcher();
        let rx = futures.insert("2".into()).await;
        dispatcher
            .dispatch(r#"{"ctrl":{"id":"2","code":401,"text":"unauthorized"}}"#)
            .await;
        let reply = rx.await.unwrap();
        match reply {
            Err(Error::ServerResponse { code, .. }) => assert_eq!(code, 401),
            other => panic!("expected ServerResponse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn evicted_ctrl_notifies_the_topic() {
        let (dispatcher, _futures, topics) = new_dispatcher();
        let topic = Arc::new(RecordingTopic {
            name: "grpX".into(),
            data_routed: AtomicBool::new(false),
            evicted: AtomicBool::new(false),
            all_received_count: AtomicI64::new(0),
        });
        topics.start_tracking(topic.clone()).await;
        dispatcher
            .dispatch(r#"{"ctrl":{"code":205,"text":"evicted","topic":"grpX","params":{"unsub":true}}}"#)
            .await;
        assert!(topic.evicted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn ctrl_what_data_routes_all_messages_received() {
        let (dispatcher, _futures, topics) = new_dispatcher();
        let topic = Arc::new(RecordingTopic {
            name: "grpX".into(),
            data_routed: AtomicBool::new(false),
            evicted: AtomicBool::new(false),
            all_received_count: AtomicI64::new(-99),
        });
        topics.start_tracking(topic.clone()).await;
        dispatcher
            .dispatch(r#"{"ctrl":{"code":200,"text":"ok","topic":"grpX","params":{"what":"data","count":5}}}"#)
            .await;
        assert_eq!(topic.all_received_count.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn data_frame_routes_to_the_tracked_topic() {
        let (dispatcher, _futures, topics) = new_dispatcher();
        let topic = Arc::new(RecordingTopic {
            name: "grpX".into(),
            data_routed: AtomicBool::new(false),
            evicted: AtomicBool::new(false),
            all_received_count: AtomicI64::new(0),
        });
        topics.start_tracking(topic.clone()).await;
        dispatcher
            .dispatch(r#"{"data":{"topic":"grpX","seq":7,"content":"hi"}}"#)
            .await;
        assert!(topic.data_routed.load(Ordering::SeqCst));
    }
}
