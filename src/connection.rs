//! `ConnectionStateMachine`: the four connection states and the
//! `reconnectNow` policy, plus the `Transport` collaborator interface.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::Result;

/// Events the transport reports back to the session, delivered over a
/// channel instead of callbacks.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Connected { reconnecting: bool },
    Message(String),
    Disconnected {
        by_server: bool,
        code: u16,
        reason: String,
    },
    Error(String),
}

/// The four connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    ConnectedUnauth,
    ConnectedAuth,
}

/// The websocket (or other) transport collaborator consumed by the core.
/// A real implementation is provided by [`crate::ws::WsTransport`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens the connection, streaming [`TransportEvent`]s back over
    /// `events` for the lifetime of the connection.
    async fn connect(
        &self,
        reconnect_automatically: bool,
        events: UnboundedSender<TransportEvent>,
    ) -> Result<()>;
    async fn disconnect(&self);
    async fn send(&self, bytes: Vec<u8>) -> Result<()>;
    fn is_connected(&self) -> bool;
    fn is_waiting_to_reconnect(&self) -> bool;
}

/// What a caller should do in response to a `reconnectNow` call. The state
/// machine only decides; it does not own a `Transport`, so the caller (the
/// `Session`) carries out the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// No connection exists (and none is waiting to reconnect): create one
    /// and connect.
    ConnectNow,
    /// Already connected and `reset` was requested: disconnect, and mark
    /// the next attempt as interactive.
    DisconnectAndReconnectInteractively,
    /// Already connected and `reset` was not requested: nothing to do.
    NoOp,
    /// A connection exists but is waiting to reconnect, and the caller is
    /// either interactive or auto-reconnect is disabled: trigger an
    /// immediate attempt.
    TriggerImmediateAttempt,
}

/// The four-state connection lifecycle. Transition legality is enforced by
/// `to_*` methods returning whether the move from the current state was
/// legal; illegal calls are no-ops that leave the state unchanged (callers
/// are expected to check the return value).
///
/// Holds only the state itself. The side effects of entering
/// `Disconnected` (failing pending futures, notifying topics, emitting
/// `onDisconnect`) span the `FutureRegistry`, `TopicRegistry`, and
/// `ListenerSet`, which this type does not own; the `Session` performs
/// those effects after observing a transition here.
pub struct ConnectionStateMachine {
    state: Mutex<ConnState>,
}

impl ConnectionStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ConnState::Disconnected),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            ConnState::ConnectedUnauth | ConnState::ConnectedAuth
        )
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state() == ConnState::ConnectedAuth
    }

    /// `Disconnected → Connecting`, on user connect or auto-reconnect.
    pub fn to_connecting(&self) -> bool {
        self.transition(ConnState::Disconnected, ConnState::Connecting)
    }

    /// `Connecting → ConnectedUnauth`, when the transport reports open and
    /// the hello handshake has been sent.
    pub fn to_connected_unauth(&self) -> bool {
        self.transition(ConnState::Connecting, ConnState::ConnectedUnauth)
    }

    /// `ConnectedUnauth → ConnectedAuth`, when a login response lands with
    /// a code in `[200, 299]`.
    pub fn to_connected_auth(&self) -> bool {
        self.transition(ConnState::ConnectedUnauth, ConnState::ConnectedAuth)
    }

    /// Any state → `Disconnected`, on transport close or fatal error.
    /// Always legal; returns the state transitioned away from so the
    /// caller can decide whether the enter-`Disconnected` effects actually
    /// need to run (they don't if we were already disconnected).
    pub fn to_disconnected(&self) -> ConnState {
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let previous = *guard;
        *guard = ConnState::Disconnected;
        previous
    }

    fn transition(&self, from: ConnState, to: ConnState) -> bool {
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if *guard == from {
            *guard = to;
            true
        } else {
            false
        }
    }

    /// Decides what a `reconnectNow(interactively, reset)` call should do,
    /// given whether the transport is currently waiting to reconnect and
    /// whether auto-reconnect is enabled.
    #[must_use]
    pub fn reconnect_now(
        &self,
        interactively: bool,
        reset: bool,
        waiting_to_reconnect: bool,
        auto_reconnect_enabled: bool,
    ) -> ReconnectDecision {
        if self.is_connected() {
            if reset {
                ReconnectDecision::DisconnectAndReconnectInteractively
            } else {
                ReconnectDecision::NoOp
            }
        } else if waiting_to_reconnect {
            if interactively || !auto_reconnect_enabled {
                ReconnectDecision::TriggerImmediateAttempt
            } else {
                ReconnectDecision::NoOp
            }
        } else {
            ReconnectDecision::ConnectNow
        }
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walks_the_happy_path() {
        let sm = ConnectionStateMachine::new();
        assert_eq!(sm.state(), ConnState::Disconnected);
        assert!(sm.to_connecting());
        assert!(sm.to_connected_unauth());
        assert!(!sm.is_authenticated());
        assert!(sm.to_connected_auth());
        assert!(sm.is_authenticated());
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let sm = ConnectionStateMachine::new();
        // Can't jump straight to ConnectedUnauth from Disconnected.
        assert!(!sm.to_connected_unauth());
        assert_eq!(sm.state(), ConnState::Disconnected);
    }

    #[test]
    fn any_state_can_disconnect() {
        let sm = ConnectionStateMachine::new();
        sm.to_connecting();
        sm.to_connected_unauth();
        let previous = sm.to_disconnected();
        assert_eq!(previous, ConnState::ConnectedUnauth);
        assert_eq!(sm.state(), ConnState::Disconnected);
    }

    #[test]
    fn reconnect_now_connects_when_idle() {
        let sm = ConnectionStateMachine::new();
        let decision = sm.reconnect_now(false, false, false, true);
        assert_eq!(decision, ReconnectDecision::ConnectNow);
    }

    #[test]
    fn reconnect_now_no_ops_when_connected_and_not_resetting() {
        let sm = ConnectionStateMachine::new();
        sm.to_connecting();
        sm.to_connected_unauth();
        let decision = sm.reconnect_now(false, false, false, true);
        assert_eq!(decision, ReconnectDecision::NoOp);
    }

    #[test]
    fn reconnect_now_resets_an_existing_connection() {
        let sm = ConnectionStateMachine::new();
        sm.to_connecting();
        sm.to_connected_unauth();
        let decision = sm.reconnect_now(false, true, false, true);
        assert_eq!(
            decision,
            ReconnectDecision::DisconnectAndReconnectInteractively
        );
    }

    #[test]
    fn reconnect_now_triggers_immediate_attempt_when_interactive() {
        let sm = ConnectionStateMachine::new();
        let decision = sm.reconnect_now(true, false, true, true);
        assert_eq!(decision, ReconnectDecision::TriggerImmediateAttempt);
    }

    #[test]
    fn reconnect_now_triggers_immediate_attempt_when_auto_reconnect_disabled() {
        let sm = ConnectionStateMachine::new();
        let decision = sm.reconnect_now(false, false, true, false);
        assert_eq!(decision, ReconnectDecision::TriggerImmediateAttempt);
    }

    #[test]
    fn reconnect_now_waits_when_passive_and_auto_reconnect_enabled() {
        let sm = ConnectionStateMachine::new();
        let decision = sm.reconnect_now(false, false, true, true);
        assert_eq!(decision, ReconnectDecision::NoOp);
    }
}
