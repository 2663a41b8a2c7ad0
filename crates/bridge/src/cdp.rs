//! DevTools protocol client over WebSocket.
//!
//! A writer task owns the sink and drains an outgoing queue; a reader task
//! decodes every frame and either settles the matching pending call or
//! publishes it as an event.

use async_trait::async_trait;
use pagebridge_core::{Error, Framing, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::control::ControlChannel;
use crate::correlator::Correlator;
use crate::router::EventRouter;
use crate::transport::Transport;

struct WsTransport {
    tx: mpsc::Sender<String>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, message: Value) -> Result<()> {
        self.tx
            .send(message.to_string())
            .await
            .map_err(|e| Error::Transport(format!("Failed to queue CDP message: {}", e)))
    }
}

pub struct CdpClient {
    correlator: Arc<Correlator>,
    router: Arc<EventRouter>,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a DevTools WebSocket endpoint (browser- or page-level).
    pub async fn connect(ws_url: &str, call_timeout: Option<Duration>) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url).await.map_err(|e| {
            Error::Transport(format!("Failed to connect to CDP endpoint {}: {}", ws_url, e))
        })?;
        let (mut ws_sink, mut ws_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);
        let correlator = Arc::new(
            Correlator::new(Framing::Cdp, Arc::new(WsTransport { tx: ws_tx }))
                .with_timeout(call_timeout),
        );
        let router = Arc::new(EventRouter::new());

        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        let reader_correlator = correlator.clone();
        let reader_router = router.clone();
        let reader_handle = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                match frame {
                    Ok(Message::Text(text)) => match Framing::Cdp.decode_str(&text) {
                        Ok(inbound) => {
                            if let Some(event) = reader_correlator.accept(inbound).await {
                                reader_router.publish(event).await;
                            }
                        }
                        Err(e) => warn!(error = %e, "Ignoring malformed CDP frame"),
                    },
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by remote");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            reader_correlator
                .cancel_all("control channel closed")
                .await;
        });

        debug!(ws_url, "CDP connection established");
        Ok(Self {
            correlator,
            router,
            reader_handle,
            writer_handle,
        })
    }
}

#[async_trait]
impl ControlChannel for CdpClient {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.correlator.issue(method, params).await
    }

    fn events(&self) -> &EventRouter {
        &self.router
    }

    async fn close(&self, reason: &str) {
        self.correlator.cancel_all(reason).await;
        self.router.clear().await;
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}
