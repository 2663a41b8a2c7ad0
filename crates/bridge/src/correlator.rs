//! Request/response correlation.
//!
//! Every correlated call gets a fresh id from a monotonic counter and a
//! pending entry holding the reply channel. The first matching response
//! settles it and removes the entry; later responses for the same id find
//! nothing and are ignored.

use pagebridge_core::{Error, Framing, Inbound, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::router::RoutedEvent;
use crate::transport::Transport;

struct PendingCall {
    tx: oneshot::Sender<Result<Value>>,
    issued_at: Instant,
    method: String,
}

type PendingMap = Arc<Mutex<HashMap<u64, PendingCall>>>;

pub struct Correlator {
    framing: Framing,
    transport: Arc<dyn Transport>,
    pending: PendingMap,
    next_id: AtomicU64,
    timeout: Option<Duration>,
}

/// A call that has been transmitted and is awaiting its reply.
pub struct PendingReply {
    id: u64,
    method: String,
    rx: oneshot::Receiver<Result<Value>>,
    timeout: Option<Duration>,
    pending: PendingMap,
}

impl PendingReply {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn wait(self) -> Result<Value> {
        let PendingReply {
            id,
            method,
            rx,
            timeout,
            pending,
        } = self;

        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    pending.lock().await.remove(&id);
                    return Err(Error::Timeout(format!(
                        "'{}' (id {}) got no reply within {}ms",
                        method,
                        id,
                        limit.as_millis()
                    )));
                }
            },
            None => rx.await,
        };

        match received {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Transport(format!(
                "correlator dropped while '{}' (id {}) was pending",
                method, id
            ))),
        }
    }
}

impl Correlator {
    pub fn new(framing: Framing, transport: Arc<dyn Transport>) -> Self {
        Self {
            framing,
            transport,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            timeout: None,
        }
    }

    /// Fail calls that get no reply within `timeout`. None waits until a reply
    /// or `cancel_all`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Allocate an id, record the pending call and transmit it.
    pub async fn start(&self, method: &str, params: Value) -> Result<PendingReply> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            id,
            PendingCall {
                tx,
                issued_at: Instant::now(),
                method: method.to_string(),
            },
        );

        let message = self.framing.encode_call(id, method, params);
        if let Err(e) = self.transport.send(message).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        debug!(id, method, "Issued correlated call");
        Ok(PendingReply {
            id,
            method: method.to_string(),
            rx,
            timeout: self.timeout,
            pending: self.pending.clone(),
        })
    }

    /// Issue a correlated call and wait for its outcome.
    pub async fn issue(&self, method: &str, params: Value) -> Result<Value> {
        self.start(method, params).await?.wait().await
    }

    /// Send a message that expects no reply. No pending entry is created.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.transport
            .send(self.framing.encode_notification(method, params))
            .await
    }

    /// Settle a pending call with a result. Returns false if the id is unknown.
    pub async fn resolve(&self, id: u64, result: Value) -> bool {
        self.settle(id, Ok(result)).await
    }

    /// Settle a pending call with an error message. Returns false if the id is
    /// unknown.
    pub async fn reject(&self, id: u64, message: impl Into<String>) -> bool {
        self.settle(id, Err(Error::Remote(message.into()))).await
    }

    async fn settle(&self, id: u64, outcome: Result<Value>) -> bool {
        let call = self.pending.lock().await.remove(&id);
        match call {
            Some(call) => {
                debug!(
                    id,
                    method = %call.method,
                    elapsed_ms = call.issued_at.elapsed().as_millis() as u64,
                    ok = outcome.is_ok(),
                    "Settled correlated call"
                );
                let _ = call.tx.send(outcome);
                true
            }
            None => {
                debug!(id, "Reply for unknown call id ignored");
                false
            }
        }
    }

    /// Reject every pending call with a terminal disposal error. The counter is
    /// left untouched so ids issued afterwards never collide with the
    /// cancelled ones.
    pub async fn cancel_all(&self, reason: &str) -> usize {
        let drained: Vec<(u64, PendingCall)> = self.pending.lock().await.drain().collect();
        let count = drained.len();
        for (_, call) in drained {
            let _ = call.tx.send(Err(Error::Disposed(reason.to_string())));
        }
        if count > 0 {
            warn!(count, reason, "Cancelled pending calls");
        }
        count
    }

    /// Consume responses; hand events back to the caller for routing.
    pub async fn accept(&self, inbound: Inbound) -> Option<RoutedEvent> {
        match inbound {
            Inbound::Response { id, outcome } => {
                match outcome {
                    Ok(result) => self.resolve(id, result).await,
                    Err(message) => self.reject(id, message).await,
                };
                None
            }
            Inbound::Event { method, params } => Some(RoutedEvent { method, params }),
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }
}
