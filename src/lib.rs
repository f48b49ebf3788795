//! Session-layer client for a real-time JSON/websocket messaging service.
//!
//! This crate implements the core session object: it owns the single
//! server connection, multiplexes request/response pairs by message id,
//! drives the login/handshake state machine, and exposes the high-level
//! operations (`hi`, `login`, `sub`, `pub`, `get`, `set`, `leave`, `del`,
//! `note`, `acc`) that higher layers build on.
//!
//! The websocket transport, per-topic behaviors, and persistent store are
//! external collaborators expressed as traits ([`connection::Transport`],
//! [`topic::Topic`], [`store::Store`]); a concrete websocket transport is
//! provided in [`ws`].

pub mod auth;
pub mod codec;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod future_registry;
pub mod id;
pub mod listener;
pub mod message;
pub mod session;
pub mod store;
pub mod topic;
pub mod user;
pub mod ws;

pub use {
    auth::AuthCoordinator,
    codec::MessageCodec,
    connection::{ConnState, ConnectionStateMachine, Transport, TransportEvent},
    dispatch::Dispatcher,
    error::{Error, Result},
    future_registry::FutureRegistry,
    id::IdGenerator,
    listener::{Listener, ListenerSet},
    message::{ClientMessage, ServerMessage},
    session::{Session, SessionConfig},
    store::Store,
    topic::{Topic, TopicFactory, TopicRegistry, TopicType},
    user::{User, UserRegistry},
    ws::WsTransport,
};
