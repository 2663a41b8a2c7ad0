//! What the bridge hands back to the embedding host.

use pagebridge_core::PanelMessage;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// Session lifecycle and panel-local notifications.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HostNotification {
    #[serde(rename_all = "camelCase")]
    Created { session_id: String },
    #[serde(rename_all = "camelCase")]
    Disposed { session_id: String },
    #[serde(rename_all = "camelCase")]
    WindowOpenRequested { session_id: String, url: String },
    /// An `extension.*` action the panel sent that the bridge does not
    /// handle itself (title updates, app state).
    #[serde(rename_all = "camelCase")]
    Panel {
        session_id: String,
        action: String,
        params: Value,
    },
}

impl HostNotification {
    pub fn session_id(&self) -> &str {
        match self {
            HostNotification::Created { session_id }
            | HostNotification::Disposed { session_id }
            | HostNotification::WindowOpenRequested { session_id, .. }
            | HostNotification::Panel { session_id, .. } => session_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum HostEvent {
    /// A reply or event addressed to one session's panel.
    #[serde(rename_all = "camelCase")]
    Message {
        session_id: String,
        message: PanelMessage,
    },
    Notification(HostNotification),
}

/// Receiver of everything a session produces for its host.
pub trait HostSink: Send + Sync {
    fn emit(&self, event: HostEvent);

    fn deliver(&self, session_id: &str, message: PanelMessage) {
        self.emit(HostEvent::Message {
            session_id: session_id.to_string(),
            message,
        });
    }

    fn notify(&self, notification: HostNotification) {
        self.emit(HostEvent::Notification(notification));
    }
}

impl HostSink for mpsc::UnboundedSender<HostEvent> {
    fn emit(&self, event: HostEvent) {
        if self.send(event).is_err() {
            debug!("Host sink closed, dropping event");
        }
    }
}
