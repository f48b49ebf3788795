//! `WsTransport`: a concrete [`Transport`](crate::connection::Transport)
//! over a websocket, built on `tokio-tungstenite`. A background task reads
//! frames off the socket and forwards them as [`TransportEvent`]s; the
//! write half lives behind its own `Mutex`.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::{mpsc::UnboundedSender, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{
    tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};

use crate::{
    connection::{Transport, TransportEvent},
    error::{Error, Result},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A websocket-backed [`Transport`]. One instance per connection attempt;
/// `connect` replaces the inner socket and (re)spawns the reader task.
pub struct WsTransport {
    url: String,
    write: Mutex<Option<futures::stream::SplitSink<WsStream, Message>>>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
    waiting_to_reconnect: AtomicBool,
}

impl WsTransport {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            url: url.into(),
            write: Mutex::new(None),
            reader_handle: Mutex::new(None),
            connected: AtomicBool::new(false),
            waiting_to_reconnect: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(
        &self,
        reconnect_automatically: bool,
        events: UnboundedSender<TransportEvent>,
    ) -> Result<()> {
        debug!(url = %self.url, "opening websocket connection");
        let (stream, _response) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| Error::Message(format!("websocket connect failed: {e}")))?;
        let (write, mut read) = stream.split();

        *self.write.lock().await = Some(write);
        self.connected.store(true, Ordering::SeqCst);
        self.waiting_to_reconnect.store(false, Ordering::SeqCst);

        let _ = events.send(TransportEvent::Connected {
            reconnecting: reconnect_automatically,
        });

        let handle = tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if events.send(TransportEvent::Message(text.to_string())).is_err() {
                            break;
                        }
                    },
                    Ok(Message::Binary(bytes)) => {
                        let text = String::from_utf8_lossy(&bytes).into_owned();
                        if events.send(TransportEvent::Message(text)).is_err() {
                            break;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        let (code, reason) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((0, String::new()));
                        let _ = events.send(TransportEvent::Disconnected {
                            by_server: true,
                            code,
                            reason,
                        });
                        break;
                    },
                    Ok(_) => {},
                    Err(err) => {
                        warn!(error = %err, "websocket read error");
                        let _ = events.send(TransportEvent::Error(err.to_string()));
                        let _ = events.send(TransportEvent::Disconnected {
                            by_server: true,
                            code: 0,
                            reason: err.to_string(),
                        });
                        break;
                    },
                }
            }
        });
        *self.reader_handle.lock().await = Some(handle);
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(mut write) = self.write.lock().await.take() {
            let _ = write.close().await;
        }
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn send(&self, bytes: Vec<u8>) -> Result<()> {
        let mut guard = self.write.lock().await;
        let Some(write) = guard.as_mut() else {
            return Err(Error::NotConnected("websocket is not connected".into()));
        };
        let text = String::from_utf8(bytes)
            .map_err(|e| Error::Message(format!("outbound frame was not valid utf-8: {e}")))?;
        write
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| Error::Message(format!("websocket send failed: {e}")))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_waiting_to_reconnect(&self) -> bool {
        self.waiting_to_reconnect.load(Ordering::SeqCst)
    }
}
