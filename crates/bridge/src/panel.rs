//! The panel UI's end of the bridge.
//!
//! Requests go out as `{callbackId, type, params}`; host messages come back
//! through [`PanelConnection::handle_message`], which settles replies and
//! publishes everything else on the event router.

use pagebridge_core::{Framing, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::correlator::Correlator;
use crate::router::EventRouter;
use crate::transport::Transport;

pub struct PanelConnection {
    correlator: Correlator,
    router: EventRouter,
}

impl PanelConnection {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            correlator: Correlator::new(Framing::Panel, transport),
            router: EventRouter::new(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.correlator = self.correlator.with_timeout(timeout);
        self
    }

    /// Correlated request; resolves with the host's result or its error
    /// message.
    pub async fn call(&self, action: &str, params: Value) -> Result<Value> {
        self.correlator.issue(action, params).await
    }

    /// Fire-and-forget request.
    pub async fn notify(&self, action: &str, params: Value) -> Result<()> {
        self.correlator.notify(action, params).await
    }

    /// Feed one message received from the host.
    pub async fn handle_message(&self, message: &Value) {
        match Framing::Panel.decode(message) {
            Ok(inbound) => {
                if let Some(event) = self.correlator.accept(inbound).await {
                    self.router.publish(event).await;
                }
            }
            Err(e) => warn!(error = %e, "Ignoring malformed host message"),
        }
    }

    pub fn events(&self) -> &EventRouter {
        &self.router
    }

    /// Reject everything still waiting on the host.
    pub async fn shutdown(&self, reason: &str) -> usize {
        self.correlator.cancel_all(reason).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;
    use serde_json::json;

    #[tokio::test]
    async fn test_call_resolves_from_host_reply() {
        let (transport, mut wire) = ChannelTransport::pair();
        let conn = Arc::new(PanelConnection::new(Arc::new(transport)));

        let caller = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.call("Clipboard.readText", json!({})).await })
        };
        let sent = wire.recv().await.unwrap();
        assert_eq!(sent["type"], "Clipboard.readText");
        let id = sent["callbackId"].as_u64().unwrap();

        conn.handle_message(&json!({ "callbackId": id, "result": "pasted" }))
            .await;
        assert_eq!(caller.await.unwrap().unwrap(), json!("pasted"));
    }

    #[tokio::test]
    async fn test_error_reply_rejects_with_message() {
        let (transport, mut wire) = ChannelTransport::pair();
        let conn = Arc::new(PanelConnection::new(Arc::new(transport)));
        let caller = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.call("DOM.getDocument", json!({})).await })
        };
        let id = wire.recv().await.unwrap()["callbackId"].as_u64().unwrap();
        conn.handle_message(&json!({ "callbackId": id, "error": "No node" }))
            .await;
        assert_eq!(caller.await.unwrap().unwrap_err().message(), "No node");
    }

    #[tokio::test]
    async fn test_events_fan_out_by_method() {
        let (transport, _wire) = ChannelTransport::pair();
        let conn = PanelConnection::new(Arc::new(transport));
        let mut menu = conn.events().subscribe("extension.contextMenu").await;
        let mut rest = conn.events().subscribe_unhandled().await;

        conn.handle_message(&json!({ "method": "extension.contextMenu", "result": { "x": 3 } }))
            .await;
        conn.handle_message(&json!({ "method": "Page.frameNavigated", "result": {} }))
            .await;
        conn.handle_message(&json!({ "garbage": true })).await;

        assert_eq!(menu.recv().await.unwrap()["x"], 3);
        assert_eq!(rest.recv().await.unwrap().method, "Page.frameNavigated");
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_callers() {
        let (transport, _wire) = ChannelTransport::pair();
        let conn = Arc::new(PanelConnection::new(Arc::new(transport)));
        let caller = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.call("Page.reload", json!({})).await })
        };
        tokio::task::yield_now().await;
        while conn.correlator.pending_count().await == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(conn.shutdown("panel closed").await, 1);
        assert!(caller.await.unwrap().unwrap_err().is_disposed());
    }
}
