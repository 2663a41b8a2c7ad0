//! Fan-out of unsolicited events by method name.

use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{trace, warn};

/// An unsolicited message: method name plus payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedEvent {
    pub method: String,
    pub params: Value,
}

/// Delivers each event to every subscriber of its method. Events nobody
/// subscribed to by name go to the catch-all subscribers instead.
///
/// Subscriptions are unbounded: a binding call carries a reply sequence
/// the page is waiting on, so an event is only lost when its receiver is
/// gone.
pub struct EventRouter {
    listeners: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>,
    fallback: Mutex<Vec<mpsc::UnboundedSender<RoutedEvent>>>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            fallback: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to one method. The receiver gets the event params.
    pub async fn subscribe(&self, method: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners
            .lock()
            .await
            .entry(method.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Subscribe to every event that has no named subscriber.
    pub async fn subscribe_unhandled(&self) -> mpsc::UnboundedReceiver<RoutedEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.fallback.lock().await.push(tx);
        rx
    }

    /// Deliver one event. Returns how many subscribers received it.
    pub async fn publish(&self, event: RoutedEvent) -> usize {
        {
            let mut listeners = self.listeners.lock().await;
            if let Some(senders) = listeners.get_mut(&event.method) {
                senders.retain(|tx| !tx.is_closed());
                if !senders.is_empty() {
                    let mut delivered = 0;
                    for tx in senders.iter() {
                        match tx.send(event.params.clone()) {
                            Ok(()) => delivered += 1,
                            Err(_) => {
                                warn!(method = %event.method, "Subscriber went away, event dropped")
                            }
                        }
                    }
                    return delivered;
                }
                listeners.remove(&event.method);
            }
        }

        let mut fallback = self.fallback.lock().await;
        fallback.retain(|tx| !tx.is_closed());
        let mut delivered = 0;
        for tx in fallback.iter() {
            match tx.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(method = %event.method, "Subscriber went away, event dropped"),
            }
        }
        if delivered == 0 {
            trace!(method = %event.method, "Event had no subscriber");
        }
        delivered
    }

    /// Drop every subscription; receivers observe end-of-stream.
    pub async fn clear(&self) {
        self.listeners.lock().await.clear();
        self.fallback.lock().await.clear();
    }
}
