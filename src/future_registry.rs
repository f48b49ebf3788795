//! `FutureRegistry`: thread-safe map from message-id to pending reply, with
//! a background timeout sweep.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::{oneshot, Mutex};
use tracing::warn;

use crate::{error::Error, message::ServerMessage};

/// How often the sweep wakes up to look for expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(3_000);
/// Timer tolerance around the sweep interval, kept as a named constant so
/// tests can reason about the worst-case expiry bound.
pub const SWEEP_TOLERANCE: Duration = Duration::from_millis(200);
/// Age at which a pending reply is considered timed out.
pub const REPLY_TIMEOUT: Duration = Duration::from_millis(5_000);

type Reply = Result<ServerMessage, Error>;

struct Pending {
    sender: oneshot::Sender<Reply>,
    created_at: Instant,
}

struct Inner {
    pending: HashMap<String, Pending>,
}

/// Owns the id → pending-reply map and the sweep task that expires old
/// entries. The sweep task is bound to this value's lifetime and is aborted
/// on drop.
pub struct FutureRegistry {
    inner: Arc<Mutex<Inner>>,
    sweep_handle: tokio::task::JoinHandle<()>,
}

impl FutureRegistry {
    #[must_use]
    pub fn new() -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            pending: HashMap::new(),
        }));
        let sweep_handle = tokio::spawn(sweep_loop(Arc::clone(&inner)));
        Self {
            inner,
            sweep_handle,
        }
    }

    /// Registers a new pending reply for `id`, returning the receiver half
    /// the requester awaits on. A given id maps to at most one pending
    /// reply at a time; inserting over an existing id settles the old one
    /// with an `InvalidState` error first.
    pub async fn insert(&self, id: String) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock().await;
        if let Some(old) = inner.pending.remove(&id) {
            let _ = old.sender.send(Err(Error::InvalidState(format!(
                "message id {id} reused while a reply was still pending"
            ))));
        }
        inner.pending.insert(
            id,
            Pending {
                sender: tx,
                created_at: Instant::now(),
            },
        );
        rx
    }

    /// Removes and returns the pending entry for `id`, if any.
    async fn take(&self, id: &str) -> Option<Pending> {
        self.inner.lock().await.pending.remove(id)
    }

    /// Resolves the pending reply for `id` with a successful server message.
    /// Idempotent: a missing id is silently ignored.
    pub async fn resolve(&self, id: &str, msg: ServerMessage) {
        if let Some(pending) = self.take(id).await {
            let _ = pending.sender.send(Ok(msg));
        }
    }

    /// Rejects the pending reply for `id` with `err`.
    pub async fn reject(&self, id: &str, err: Error) {
        if let Some(pending) = self.take(id).await {
            let _ = pending.sender.send(Err(err));
        }
    }

    /// Rejects every pending reply with a freshly constructed error and
    /// empties the map. Used on disconnect.
    pub async fn purge_all(&self, make_err: impl Fn() -> Error) {
        let drained: Vec<Pending> = {
            let mut inner = self.inner.lock().await;
            inner.pending.drain().map(|(_, p)| p).collect()
        };
        for pending in drained {
            let _ = pending.sender.send(Err(make_err()));
        }
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.pending.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.pending.len()
    }
}

impl Default for FutureRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FutureRegistry {
    fn drop(&mut self) {
        self.sweep_handle.abort();
    }
}

async fn sweep_loop(inner: Arc<Mutex<Inner>>) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        // Collect ids to expire while holding the lock only long enough to
        // read+remove; the `send` calls (which may race with a caller
        // dropping its receiver) run outside the critical section.
        let expired: Vec<Pending> = {
            let mut guard = inner.lock().await;
            let now = Instant::now();
            let expired_ids: Vec<String> = guard
                .pending
                .iter()
                .filter(|(_, p)| now.duration_since(p.created_at) >= REPLY_TIMEOUT)
                .map(|(id, _)| id.clone())
                .collect();
            expired_ids
                .into_iter()
                .filter_map(|id| guard.pending.remove(&id))
                .collect()
        };
        for pending in expired {
            if pending.sender.send(Err(Error::timeout())).is_err() {
                warn!("pending reply timed out but receiver was already dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::message::Ctrl;

    use super::*;

    #[tokio::test]
    async fn resolve_delivers_to_the_right_receiver() {
        let registry = FutureRegistry::new();
        let rx = registry.insert("1".into()).await;
        registry
            .resolve(
                "1",
                ServerMessage::Ctrl(Ctrl {
                    id: Some("1".into()),
                    code: 200,
                    text: "ok".into(),
                    topic: None,
                    params: None,
                    ts: None,
                }),
            )
            .await;
        let reply = rx.await.unwrap().unwrap();
        assert!(matches!(reply, ServerMessage::Ctrl(c) if c.code == 200));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn reject_unknown_id_is_a_noop() {
        let registry = FutureRegistry::new();
        registry.reject("missing", Error::timeout()).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn purge_all_settles_every_pending_future() {
        let registry = FutureRegistry::new();
        let rx1 = registry.insert("1".into()).await;
        let rx2 = registry.insert("2".into()).await;
        registry
            .purge_all(|| Error::NotConnected("disconnected".into()))
            .await;
        assert!(rx1.await.unwrap().is_err());
        assert!(rx2.await.unwrap().is_err());
        assert!(registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_rejects_entries_older_than_timeout() {
        let registry = FutureRegistry::new();
        let rx = registry.insert("1".into()).await;
        tokio::time::advance(REPLY_TIMEOUT + SWEEP_INTERVAL + SWEEP_TOLERANCE).await;
        let reply = rx.await.unwrap();
        match reply {
            Err(Error::ServerResponse { code, text, .. }) => {
                assert_eq!(code, 504);
                assert_eq!(text, "timeout");
            },
            other => panic!("expected a 504 timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn reinserting_the_same_id_settles_the_old_pending() {
        let registry = FutureRegistry::new();
        let rx_old = registry.insert("1".into()).await;
        let _rx_new = registry.insert("1".into()).await;
        assert!(rx_old.await.unwrap().is_err());
    }
}
