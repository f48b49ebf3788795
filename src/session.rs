//! `Session`/`SessionApi`: the public entry point. Owns the connection,
//! wires every other component together, and exposes the high-level
//! operations.
//!
//! One `Session` owns a single `Transport`; there is no multi-server
//! fan-out to manage.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, Mutex as AsyncMutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    auth::AuthCoordinator,
    codec::MessageCodec,
    connection::{ConnState, ConnectionStateMachine, ReconnectDecision, Transport, TransportEvent},
    dispatch::Dispatcher,
    error::{Error, Result},
    future_registry::{FutureRegistry, REPLY_TIMEOUT, SWEEP_INTERVAL, SWEEP_TOLERANCE},
    id::IdGenerator,
    listener::{Listener, ListenerSet},
    message::{
        Acc, ClientMessage, Credential, Ctrl, Del, DelWhat, Get, Hi, Leave, Login, Note,
        ParamsMap, Pub, SeqRange, ServerMessage, Set, Sub,
    },
    store::Store,
    topic::{TopicFactory, TopicRegistry, TopicType},
    user::UserRegistry,
};

/// Construction parameters for a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub app_name: String,
    pub api_key: String,
    pub host: String,
    pub tls: bool,
    /// Protocol version literal, fixed at `"0"`.
    pub protocol_version: String,
    pub lib_version: String,
    pub locale: String,
    pub os_version: String,
    /// Informational copies of the `FutureRegistry` constants, surfaced
    /// here so callers can observe the tunables a `SessionConfig` is built
    /// from. The registry itself is the source of truth and is not
    /// reconfigured per-session.
    pub future_timeout: Duration,
    pub sweep_interval: Duration,
    pub sweep_tolerance: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            app_name: "plaza".into(),
            api_key: String::new(),
            host: String::new(),
            tls: true,
            protocol_version: "0".into(),
            lib_version: env!("CARGO_PKG_VERSION").into(),
            locale: "en".into(),
            os_version: std::env::consts::OS.into(),
            future_timeout: REPLY_TIMEOUT,
            sweep_interval: SWEEP_INTERVAL,
            sweep_tolerance: SWEEP_TOLERANCE,
        }
    }
}

impl SessionConfig {
    /// The endpoint URL for a websocket connection.
    #[must_use]
    pub fn websocket_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!(
            "{scheme}://{}/v{}/channels",
            self.host, self.protocol_version
        )
    }
}

/// The scalar, rarely-contended pieces of `Session`'s state, guarded
/// together since they change in lockstep during hello/login.
struct ScalarState {
    self_uid: Option<String>,
    device_token: Option<String>,
    auth_token: Option<String>,
    server_version: Option<String>,
    server_build: Option<String>,
    server_clock_offset: chrono::Duration,
    is_connection_authenticated: bool,
}

impl Default for ScalarState {
    fn default() -> Self {
        Self {
            self_uid: None,
            device_token: None,
            auth_token: None,
            server_version: None,
            server_build: None,
            server_clock_offset: chrono::Duration::zero(),
            is_connection_authenticated: false,
        }
    }
}

/// The session layer: owns the connection, multiplexes request/response
/// pairs, and exposes the `SessionApi` operations.
pub struct Session {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    store: Option<Arc<dyn Store>>,
    conn: ConnectionStateMachine,
    futures: Arc<FutureRegistry>,
    listeners: Arc<ListenerSet>,
    topics: Arc<TopicRegistry>,
    users: Arc<UserRegistry>,
    dispatcher: Dispatcher,
    auth: AuthCoordinator,
    ids: IdGenerator,
    codec: MessageCodec,
    scalar: AsyncMutex<ScalarState>,
    event_loop: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Session {
    #[must_use]
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        store: Option<Arc<dyn Store>>,
        topic_factory: Option<Arc<dyn TopicFactory>>,
    ) -> Arc<Self> {
        let futures = Arc::new(FutureRegistry::new());
        let listeners = Arc::new(ListenerSet::new());
        let topics = Arc::new(TopicRegistry::new(store.clone(), topic_factory));
        let users = Arc::new(UserRegistry::new(store.clone()));
        let dispatcher = Dispatcher::new(
            Arc::clone(&futures),
            Arc::clone(&listeners),
            Arc::clone(&topics),
        );
        Arc::new(Self {
            config,
            transport,
            store,
            conn: ConnectionStateMachine::new(),
            futures,
            listeners,
            topics,
            users,
            dispatcher,
            auth: AuthCoordinator::new(),
            ids: IdGenerator::new(),
            codec: MessageCodec::new(),
            scalar: AsyncMutex::new(ScalarState::default()),
            event_loop: AsyncMutex::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ConnState {
        self.conn.state()
    }

    pub async fn is_connection_authenticated(&self) -> bool {
        self.scalar.lock().await.is_connection_authenticated
    }

    pub async fn self_uid(&self) -> Option<String> {
        self.scalar.lock().await.self_uid.clone()
    }

    pub async fn auth_token(&self) -> Option<String> {
        self.scalar.lock().await.auth_token.clone()
    }

    pub async fn server_version(&self) -> Option<String> {
        self.scalar.lock().await.server_version.clone()
    }

    pub async fn server_build(&self) -> Option<String> {
        self.scalar.lock().await.server_build.clone()
    }

    #[must_use]
    pub fn topics(&self) -> &Arc<TopicRegistry> {
        &self.topics
    }

    #[must_use]
    pub fn users(&self) -> &Arc<UserRegistry> {
        &self.users
    }

    #[must_use]
    pub fn auth(&self) -> &AuthCoordinator {
        &self.auth
    }

    pub fn add_listener(&self, listener: Arc<dyn Listener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn Listener>) {
        self.listeners.remove(listener);
    }

    pub async fn set_device_token(&self, token: Option<String>) -> Result<()> {
        self.scalar.lock().await.device_token = token.clone();
        if let Some(store) = &self.store {
            store.set_device_token(token).await?;
        }
        Ok(())
    }

    // connection lifecycle

    /// Opens the connection and starts the dispatch loop. A no-op if
    /// already connected or connecting.
    pub async fn connect(self: &Arc<Self>, reconnect_automatically: bool) -> Result<()> {
        if self.conn.state() != ConnState::Disconnected {
            return Ok(());
        }
        self.ids.reseed();
        self.conn.to_connecting();

        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::clone(self);
        let handle = tokio::spawn(async move { session.run_event_loop(rx).await });
        *self.event_loop.lock().await = Some(handle);

        self.transport.connect(reconnect_automatically, tx).await
    }

    /// Disconnects the transport; the event loop observes the resulting
    /// `Disconnected` event and runs the enter-`Disconnected` side effects.
    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
        if let Some(handle) = self.event_loop.lock().await.take() {
            handle.abort();
        }
        self.enter_disconnected(false, 0, "disconnected").await;
    }

    /// `reconnectNow(interactively, reset)`.
    pub async fn reconnect_now(self: &Arc<Self>, interactively: bool, reset: bool) -> Result<()> {
        let decision = self.conn.reconnect_now(
            interactively,
            reset,
            self.transport.is_waiting_to_reconnect(),
            true,
        );
        match decision {
            ReconnectDecision::ConnectNow => self.connect(true).await,
            ReconnectDecision::DisconnectAndReconnectInteractively => {
                self.disconnect().await;
                self.connect(true).await
            },
            ReconnectDecision::TriggerImmediateAttempt | ReconnectDecision::NoOp => Ok(()),
        }
    }

    async fn run_event_loop(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected { .. } => {
                    // Spawned rather than awaited in-line: hello()/login() below
                    // suspend on a reply that can only arrive as a later
                    // TransportEvent::Message on this same channel. Awaiting the
                    // handshake here would stall this loop before it ever reads
                    // that event back off `events`, deadlocking every connect.
                    if self.conn.to_connected_unauth() {
                        let session = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(err) = session.on_connected_unauth().await {
                                warn!(error = %err, "post-connect handshake failed");
                            }
                        });
                    }
                },
                TransportEvent::Message(text) => self.dispatcher.dispatch(&text).await,
                TransportEvent::Disconnected {
                    by_server,
                    code,
                    reason,
                } => self.enter_disconnected(by_server, code, &reason).await,
                TransportEvent::Error(err) => warn!(error = %err, "transport error"),
            }
        }
    }

    async fn on_connected_unauth(&self) -> Result<()> {
        let ctrl = self.hello().await?;
        if self.auth.should_chain_login() {
            if let Some(creds) = self.auth.credentials() {
                self.login(&creds.scheme, &creds.secret).await.ok();
            }
        }
        let _ = ctrl;
        Ok(())
    }

    async fn enter_disconnected(&self, by_server: bool, code: u16, reason: &str) {
        let previous = self.conn.to_disconnected();
        if previous == ConnState::Disconnected {
            return;
        }
        self.futures
            .purge_all(|| Error::NotConnected("disconnected".into()))
            .await;
        {
            let mut scalar = self.scalar.lock().await;
            scalar.server_version = None;
            scalar.server_build = None;
            scalar.is_connection_authenticated = false;
        }
        for topic in self.topics.get_all().await {
            topic.topic_left(false, 503, "disconnected").await;
        }
        info!(code = code, reason = %reason, "session disconnected");
        self.listeners.notify_disconnect(by_server, code, reason).await;
    }

    // SessionApi

    async fn send_and_await(&self, msg: ClientMessage) -> Result<ServerMessage> {
        if !self.conn.is_connected() && !matches!(msg, ClientMessage::Hi(_)) {
            return Err(Error::NotConnected(
                "session is not connected".to_string(),
            ));
        }
        let Some(id) = msg.id().map(str::to_string) else {
            return Err(Error::InvalidArgument(
                "message requires an id to await a reply".into(),
            ));
        };
        let rx = self.futures.insert(id).await;
        let encoded = self.codec.encode(&msg)?;
        debug!(frame = %encoded, "session -> transport");
        self.transport.send(encoded.into_bytes()).await?;
        rx.await
            .map_err(|_| Error::InvalidState("reply channel dropped".into()))?
    }

    fn expect_ctrl(msg: ServerMessage) -> Result<Ctrl> {
        match msg {
            ServerMessage::Ctrl(ctrl) => Ok(ctrl),
            other => Err(Error::InvalidReply(format!(
                "expected a ctrl reply, got {other:?}"
            ))),
        }
    }

    /// `hi`: the handshake sent on every connect.
    pub async fn hello(&self) -> Result<Ctrl> {
        let id = self.ids.next_msg_id();
        let device_token = self.scalar.lock().await.device_token.clone();
        let ua = format!(
            "{} ({}; {}); tinode-core/{}",
            self.config.app_name, self.config.os_version, self.config.locale, self.config.lib_version
        );
        let msg = ClientMessage::Hi(Hi {
            id,
            ver: Some(self.config.protocol_version.clone()),
            ua: Some(ua),
            dev: device_token,
            lang: Some(self.config.locale.clone()),
        });
        let ctrl = Self::expect_ctrl(self.send_and_await(msg).await?)?;
        if ctrl.is_success() {
            let mut scalar = self.scalar.lock().await;
            scalar.server_version = ctrl.param_str("ver").map(str::to_string);
            scalar.server_build = ctrl.param_str("build").map(str::to_string);
        }
        self.listeners
            .notify_connect(ctrl.code, &ctrl.text, ctrl.params.as_ref())
            .await;
        Ok(ctrl)
    }

    /// `acc`: create or update an account.
    pub async fn account(
        &self,
        user: impl Into<String>,
        scheme: Option<String>,
        secret: Option<String>,
        login_now: bool,
        tags: Option<Vec<String>>,
        desc: Option<serde_json::Value>,
        cred: Option<Vec<Credential>>,
    ) -> Result<Ctrl> {
        let id = self.ids.next_msg_id();
        let msg = ClientMessage::Acc(Acc {
            id,
            user: user.into(),
            scheme,
            secret,
            login: login_now,
            tags,
            desc,
            cred,
        });
        let result = self.send_and_await(msg).await;
        match result {
            Ok(reply) => {
                let ctrl = Self::expect_ctrl(reply)?;
                if login_now && ctrl.is_success() {
                    self.apply_login_success(&ctrl).await?;
                }
                Ok(ctrl)
            },
            Err(Error::ServerResponse { code, text, what }) if (400..500).contains(&code) => {
                self.auth.clear();
                let mut scalar = self.scalar.lock().await;
                scalar.auth_token = None;
                Err(Error::ServerResponse { code, text, what })
            },
            Err(other) => Err(other),
        }
    }

    /// `login`: authenticate the connection.
    pub async fn login(&self, scheme: impl Into<String>, secret: impl Into<String>) -> Result<Ctrl> {
        if self.is_connection_authenticated().await {
            return Ok(Ctrl {
                id: None,
                code: 200,
                text: "already authenticated".into(),
                topic: None,
                params: None,
                ts: None,
            });
        }
        if !self.auth.try_begin_login() {
            return Err(Error::InvalidState("Login in progress".into()));
        }
        let id = self.ids.next_msg_id();
        let msg = ClientMessage::Login(Login {
            id,
            scheme: scheme.into(),
            secret: secret.into(),
            cred: None,
        });
        let result = self.send_and_await(msg).await;
        self.auth.end_login();

        let ctrl = match result {
            Ok(reply) => Self::expect_ctrl(reply)?,
            Err(Error::ServerResponse { code, text, what }) => {
                self.auth.clear();
                self.scalar.lock().await.auth_token = None;
                self.listeners.notify_login(code, &text).await;
                return Err(Error::ServerResponse { code, text, what });
            },
            Err(other) => return Err(other),
        };

        if ctrl.is_success() {
            self.apply_login_success(&ctrl).await?;
        } else {
            self.auth.clear();
            self.scalar.lock().await.auth_token = None;
        }
        self.listeners.notify_login(ctrl.code, &ctrl.text).await;
        Ok(ctrl)
    }

    async fn apply_login_success(&self, ctrl: &Ctrl) -> Result<()> {
        let new_uid = ctrl.param_str("user").map(str::to_string);
        let previous_uid = self.scalar.lock().await.self_uid.clone();

        if let (Some(previous), Some(ref fresh)) = (&previous_uid, &new_uid) {
            if previous != fresh {
                self.force_logout().await;
                self.listeners.notify_login(400, "UID mismatch").await;
                return Ok(());
            }
        }

        {
            let mut scalar = self.scalar.lock().await;
            scalar.self_uid = new_uid.clone();
            scalar.auth_token = ctrl.param_str("token").map(str::to_string);
            scalar.is_connection_authenticated = (200..300).contains(&ctrl.code);
        }
        self.conn.to_connected_auth();

        if ctrl.code < 300 {
            if let Some(uid) = &new_uid {
                if let Some(store) = &self.store {
                    store.set_my_uid(Some(uid.clone()), Vec::new()).await?;
                }
            }
            self.topics.cold_load(true).await?;
        } else if let Some(cred) = ctrl.params.as_ref().and_then(|p| p.get("cred")) {
            if let Some(store) = &self.store {
                if let Ok(methods) = serde_json::from_value::<Vec<Credential>>(cred.clone()) {
                    store.set_my_uid(new_uid, methods).await?;
                }
            }
        }
        Ok(())
    }

    async fn force_logout(&self) {
        self.auth.clear();
        let mut scalar = self.scalar.lock().await;
        scalar.self_uid = None;
        scalar.auth_token = None;
        scalar.is_connection_authenticated = false;
    }

    /// `sub`: subscribe to a topic.
    pub async fn sub(
        &self,
        topic: impl Into<String>,
        set: Option<serde_json::Value>,
        get: Option<serde_json::Value>,
    ) -> Result<Ctrl> {
        let id = self.ids.next_msg_id();
        let msg = ClientMessage::Sub(Sub {
            id,
            topic: topic.into(),
            set,
            get,
        });
        Self::expect_ctrl(self.send_and_await(msg).await?)
    }

    /// `get`: query topic metadata or content.
    pub async fn get(&self, topic: impl Into<String>, what: Option<String>) -> Result<Ctrl> {
        let id = self.ids.next_msg_id();
        let msg = ClientMessage::Get(Get {
            id,
            topic: topic.into(),
            what,
        });
        Self::expect_ctrl(self.send_and_await(msg).await?)
    }

    /// `set`: update topic metadata.
    pub async fn set(
        &self,
        topic: impl Into<String>,
        desc: Option<serde_json::Value>,
        sub: Option<serde_json::Value>,
        tags: Option<Vec<String>>,
    ) -> Result<Ctrl> {
        let id = self.ids.next_msg_id();
        let msg = ClientMessage::Set(Set {
            id,
            topic: topic.into(),
            desc,
            sub,
            tags,
        });
        Self::expect_ctrl(self.send_and_await(msg).await?)
    }

    /// `pub`: publish content to a topic. `no_echo` suppresses the sender's
    /// own copy of the message.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        content: serde_json::Value,
        head: Option<ParamsMap>,
        no_echo: bool,
    ) -> Result<Ctrl> {
        let id = self.ids.next_msg_id();
        let msg = ClientMessage::Pub(Pub {
            id,
            topic: topic.into(),
            no_echo,
            head,
            content,
        });
        Self::expect_ctrl(self.send_and_await(msg).await?)
    }

    /// `leave`: detach from a topic, optionally unsubscribing.
    pub async fn leave(&self, topic: impl Into<String>, unsub: bool) -> Result<Ctrl> {
        let id = self.ids.next_msg_id();
        let msg = ClientMessage::Leave(Leave {
            id,
            topic: topic.into(),
            unsub,
        });
        Self::expect_ctrl(self.send_and_await(msg).await?)
    }

    /// `del`: delete messages, a subscription, a credential, or the whole
    /// account. An account-wide delete disconnects and purges local state
    /// on success.
    pub async fn del(
        &self,
        topic: impl Into<String>,
        what: Option<DelWhat>,
        delseq: Option<Vec<SeqRange>>,
        user: Option<String>,
        cred: Option<Credential>,
        hard: bool,
    ) -> Result<Ctrl> {
        let id = self.ids.next_msg_id();
        let is_account_wide = matches!(what, Some(DelWhat::User));
        let msg = ClientMessage::Del(Del {
            id,
            topic: topic.into(),
            what,
            delseq,
            user,
            cred,
            hard,
        });
        let ctrl = Self::expect_ctrl(self.send_and_await(msg).await?)?;
        if is_account_wide && ctrl.is_success() {
            let uid = self.self_uid().await;
            if let (Some(store), Some(uid)) = (&self.store, uid) {
                store.delete_account(&uid).await?;
            }
            self.disconnect().await;
        }
        Ok(ctrl)
    }

    /// `note` (read/recv/keypress): fire-and-forget, never registered in
    /// `FutureRegistry`.
    pub async fn note(&self, topic: impl Into<String>, what: impl Into<String>, seq: Option<i64>) -> Result<()> {
        let msg = ClientMessage::Note(Note {
            topic: topic.into(),
            what: what.into(),
            seq,
        });
        let encoded = self.codec.encode(&msg)?;
        self.transport.send(encoded.into_bytes()).await
    }

    /// `logout()`: clear the device token, disconnect, clear `myUid`, and
    /// tell the store to drop its state.
    pub async fn logout(&self) -> Result<()> {
        let _ = self
            .set_device_token(Some(crate::message::NULL_SENTINEL.to_string()))
            .await;
        self.disconnect().await;
        self.force_logout().await;
        if let Some(store) = &self.store {
            store.logout().await?;
        }
        Ok(())
    }

    /// A fresh, process-lifetime-unique string, e.g. for client-generated
    /// names.
    #[must_use]
    pub fn next_unique_string(&self, now_millis: i64) -> String {
        self.ids.next_unique_string(now_millis)
    }

    #[must_use]
    pub fn topic_type_of(name: &str) -> TopicType {
        TopicType::classify(name)
    }
}
