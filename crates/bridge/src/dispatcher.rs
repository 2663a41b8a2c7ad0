//! Per-session action dispatch.
//!
//! A closed set of actions runs built-in logic against the document,
//! the clipboard, or the host; every other name is forwarded verbatim to the
//! control channel. Each action is independent: a failure is reported once
//! (as a reply when the caller is waiting, otherwise as a log line) and
//! never affects the next dispatch.

use pagebridge_core::{Error, PanelMessage, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clipboard::ClipboardProxy;
use crate::control::ControlChannel;
use crate::document::RemoteDocument;
use crate::host::{HostNotification, HostSink};

const EXTENSION_PREFIX: &str = "extension";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    NavigateForward,
    NavigateBack,
    RemoveSelection,
    PasteFromClipboard,
    SelectAll,
    FindQuery,
    ScrollToMatch,
    CloseFindBar,
    ClipboardWrite,
    ClipboardRead,
    WindowOpenRequested,
    /// Panel-local notification; surfaced to the host, never forwarded.
    Extension(String),
    PassThrough(String),
}

impl Action {
    /// Accepts the dotted names the panel sends and the descriptive aliases.
    pub fn parse(name: &str) -> Action {
        match name {
            "Page.goForward" | "navigate-forward" => Action::NavigateForward,
            "Page.goBackward" | "navigate-back" => Action::NavigateBack,
            "Page.removeSelection" | "remove-selection" => Action::RemoveSelection,
            "Page.pasteFromClipboard" | "paste-from-clipboard" => Action::PasteFromClipboard,
            "Page.selectAll" | "select-all" => Action::SelectAll,
            "extension.findSearchBarQuery" | "find-query" => Action::FindQuery,
            "extension.scrollToFindSearchBarQueryMatch" | "scroll-to-match" => {
                Action::ScrollToMatch
            }
            "extension.closeFindSearchBar" | "close-find-bar" => Action::CloseFindBar,
            "Clipboard.writeText" | "clipboard-write" => Action::ClipboardWrite,
            "Clipboard.readText" | "clipboard-read" => Action::ClipboardRead,
            "extension.windowOpenRequested" => Action::WindowOpenRequested,
            other if other.starts_with(EXTENSION_PREFIX) => Action::Extension(other.to_string()),
            other => Action::PassThrough(other.to_string()),
        }
    }

    pub fn is_pass_through(&self) -> bool {
        matches!(self, Action::PassThrough(_))
    }
}

fn value_field<'a>(params: &'a Value, key: &str) -> Option<&'a Value> {
    params.get("value").and_then(|v| v.get(key))
}

fn value_str(params: &Value, key: &str) -> Result<String> {
    value_field(params, key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::Protocol(format!("missing value.{}", key)))
}

fn value_index(params: &Value, key: &str) -> i64 {
    value_field(params, key)
        .and_then(Value::as_i64)
        .unwrap_or(-1)
}

pub struct Dispatcher {
    session_id: String,
    control: Arc<dyn ControlChannel>,
    document: Arc<dyn RemoteDocument>,
    clipboard: Arc<dyn ClipboardProxy>,
    sink: Arc<dyn HostSink>,
}

impl Dispatcher {
    pub fn new(
        session_id: &str,
        control: Arc<dyn ControlChannel>,
        document: Arc<dyn RemoteDocument>,
        clipboard: Arc<dyn ClipboardProxy>,
        sink: Arc<dyn HostSink>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            control,
            document,
            clipboard,
            sink,
        }
    }

    pub fn document(&self) -> &Arc<dyn RemoteDocument> {
        &self.document
    }

    pub fn clipboard(&self) -> &Arc<dyn ClipboardProxy> {
        &self.clipboard
    }

    /// Run one action. The outcome reaches the panel through the host sink
    /// when `callback_id` is set.
    pub async fn dispatch(&self, action: &str, params: Value, callback_id: Option<u64>) {
        let parsed = Action::parse(action);
        debug!(session = %self.session_id, action, ?callback_id, "Dispatching");
        let outcome = self.execute(&parsed, params).await;
        match (outcome, callback_id) {
            (Ok(result), Some(id)) => {
                self.sink
                    .deliver(&self.session_id, PanelMessage::result(id, result));
            }
            (Ok(_), None) => {}
            (Err(e), Some(id)) => {
                debug!(session = %self.session_id, action, error = %e, "Action rejected");
                self.sink
                    .deliver(&self.session_id, PanelMessage::error(id, e.message()));
            }
            (Err(e), None) => {
                warn!(session = %self.session_id, action, error = %e, "Action failed");
            }
        }
    }

    async fn execute(&self, action: &Action, params: Value) -> Result<Value> {
        match action {
            Action::NavigateForward => {
                let moved = self.control.go_forward().await?;
                Ok(Value::Bool(moved))
            }
            Action::NavigateBack => {
                let moved = self.control.go_back().await?;
                Ok(Value::Bool(moved))
            }
            Action::RemoveSelection => {
                let uid = value_str(&params, "uid")?;
                self.document.remove_selection(&uid).await?;
                Ok(Value::Null)
            }
            Action::PasteFromClipboard => {
                let uid = value_str(&params, "uid")?;
                let text = value_str(&params, "text")?;
                self.document.paste_from_clipboard(&uid, &text).await?;
                Ok(Value::Null)
            }
            Action::SelectAll => {
                let uid = value_field(&params, "uid").and_then(Value::as_str);
                self.document.select_all(uid).await?;
                Ok(Value::Null)
            }
            Action::FindQuery => {
                let text = value_field(&params, "text")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let count = self.document.update_highlights(text).await?;
                Ok(json!(count))
            }
            Action::ScrollToMatch => {
                let previous = value_index(&params, "previousIndex");
                let current = value_index(&params, "currentIndex");
                self.document.scroll_to_match(previous, current).await?;
                Ok(Value::Null)
            }
            Action::CloseFindBar => {
                self.document.remove_all_highlights().await?;
                Ok(Value::Null)
            }
            Action::ClipboardWrite => {
                let text = params
                    .get("value")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Protocol("clipboard write without text".to_string()))?;
                self.clipboard.write_text(text).await?;
                Ok(Value::Null)
            }
            Action::ClipboardRead => Ok(Value::String(self.clipboard.read_text().await?)),
            Action::WindowOpenRequested => {
                let url = params
                    .get("url")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Protocol("window open request without url".to_string()))?;
                self.sink.notify(HostNotification::WindowOpenRequested {
                    session_id: self.session_id.clone(),
                    url: url.to_string(),
                });
                Ok(Value::Null)
            }
            Action::Extension(name) => {
                self.sink.notify(HostNotification::Panel {
                    session_id: self.session_id.clone(),
                    action: name.clone(),
                    params,
                });
                Ok(Value::Null)
            }
            Action::PassThrough(method) => self.control.call(method, params).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::MemoryClipboard;
    use crate::control::testing::ScriptedChannel;
    use crate::document::SnapshotDocument;
    use crate::highlight::{editing, Document, Element};
    use crate::host::HostEvent;
    use tokio::sync::mpsc;

    struct Fixture {
        channel: Arc<ScriptedChannel>,
        document: SnapshotDocument,
        clipboard: Arc<MemoryClipboard>,
        events: mpsc::UnboundedReceiver<HostEvent>,
        dispatcher: Dispatcher,
    }

    fn fixture(doc: Document) -> Fixture {
        let channel = Arc::new(ScriptedChannel::new());
        let document = SnapshotDocument::new(doc);
        let clipboard = Arc::new(MemoryClipboard::with_text("clip"));
        let (tx, events) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            "s1",
            channel.clone(),
            Arc::new(document.clone()),
            clipboard.clone(),
            Arc::new(tx),
        );
        Fixture {
            channel,
            document,
            clipboard,
            events,
            dispatcher,
        }
    }

    fn paragraph(text: &str) -> Document {
        let mut doc = Document::new();
        let body = doc.body();
        let p = doc.append_element(body, Element::new("p"));
        doc.append_text(p, text);
        doc
    }

    fn reply(event: HostEvent) -> PanelMessage {
        match event {
            HostEvent::Message { message, .. } => message,
            other => panic!("expected a panel message, got {:?}", other),
        }
    }

    #[test]
    fn test_action_names() {
        assert_eq!(Action::parse("Page.goBackward"), Action::NavigateBack);
        assert_eq!(Action::parse("navigate-back"), Action::NavigateBack);
        assert_eq!(Action::parse("find-query"), Action::FindQuery);
        assert_eq!(
            Action::parse("extension.updateTitle"),
            Action::Extension("extension.updateTitle".into())
        );
        assert!(Action::parse("DOM.getNodeForLocation").is_pass_through());
    }

    #[tokio::test]
    async fn test_find_query_replies_with_match_count() {
        let mut fx = fixture(paragraph("one Two three"));
        fx.dispatcher
            .dispatch(
                "extension.findSearchBarQuery",
                json!({ "value": { "text": "two" } }),
                Some(9),
            )
            .await;
        assert_eq!(reply(fx.events.recv().await.unwrap()), PanelMessage::result(9, json!(1)));

        fx.dispatcher
            .dispatch("find-query", json!({ "value": { "text": "  " } }), Some(10))
            .await;
        assert_eq!(reply(fx.events.recv().await.unwrap()), PanelMessage::result(10, json!(0)));
    }

    #[tokio::test]
    async fn test_clipboard_read_and_write() {
        let mut fx = fixture(Document::new());
        fx.dispatcher
            .dispatch("Clipboard.readText", json!({}), Some(1))
            .await;
        assert_eq!(
            reply(fx.events.recv().await.unwrap()),
            PanelMessage::result(1, json!("clip"))
        );

        fx.dispatcher
            .dispatch("Clipboard.writeText", json!({ "value": "new" }), None)
            .await;
        assert_eq!(fx.clipboard.read_text().await.unwrap(), "new");
        assert!(fx.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pass_through_forwards_verbatim() {
        let mut fx = fixture(Document::new());
        fx.channel.on("DOM.getNodeForLocation", |params| {
            Ok(json!({ "backendNodeId": params["x"].as_i64().unwrap_or(0) * 2 }))
        });
        fx.channel.on("Page.reload", |_| Err(Error::Remote("Not attached".into())));

        fx.dispatcher
            .dispatch("DOM.getNodeForLocation", json!({ "x": 21, "y": 1 }), Some(3))
            .await;
        assert_eq!(
            reply(fx.events.recv().await.unwrap()),
            PanelMessage::result(3, json!({ "backendNodeId": 42 }))
        );

        fx.dispatcher.dispatch("Page.reload", json!({}), Some(4)).await;
        assert_eq!(
            reply(fx.events.recv().await.unwrap()),
            PanelMessage::error(4, "Not attached")
        );
    }

    #[tokio::test]
    async fn test_extension_actions_are_not_forwarded() {
        let mut fx = fixture(Document::new());
        fx.dispatcher
            .dispatch("extension.updateTitle", json!({ "title": "x" }), None)
            .await;
        fx.dispatcher
            .dispatch(
                "extension.windowOpenRequested",
                json!({ "url": "https://a.com" }),
                None,
            )
            .await;

        assert!(fx.channel.methods().is_empty());
        assert!(matches!(
            fx.events.recv().await.unwrap(),
            HostEvent::Notification(HostNotification::Panel { ref action, .. })
                if action == "extension.updateTitle"
        ));
        assert_eq!(
            fx.events.recv().await.unwrap(),
            HostEvent::Notification(HostNotification::WindowOpenRequested {
                session_id: "s1".into(),
                url: "https://a.com".into(),
            })
        );
    }

    #[tokio::test]
    async fn test_failure_does_not_block_next_action() {
        let mut fx = fixture(paragraph("abc"));
        fx.channel.on("Page.getNavigationHistory", |_| {
            Err(Error::Remote("target navigated away".into()))
        });

        fx.dispatcher.dispatch("Page.goForward", json!({}), None).await;
        fx.dispatcher
            .dispatch("Page.pasteFromClipboard", json!({ "value": {} }), Some(5))
            .await;
        fx.dispatcher
            .dispatch("find-query", json!({ "value": { "text": "b" } }), Some(6))
            .await;

        let first = reply(fx.events.recv().await.unwrap());
        assert_eq!(first.callback_id, Some(5));
        assert!(first.error.is_some());
        assert_eq!(
            reply(fx.events.recv().await.unwrap()),
            PanelMessage::result(6, json!(1))
        );
    }

    #[tokio::test]
    async fn test_selection_editing_is_safe_to_repeat() {
        let mut doc = Document::new();
        let body = doc.body();
        let input = doc.append_element(
            body,
            Element::new("input")
                .with_value("hello world")
                .with_attr(editing::UID_ATTR, "ctx")
                .with_attr(editing::SELECTION_START_ATTR, "5")
                .with_attr(editing::SELECTION_END_ATTR, "11"),
        );
        let fx = fixture(doc);

        let params = json!({ "value": { "uid": "ctx" } });
        fx.dispatcher
            .dispatch("Page.removeSelection", params.clone(), None)
            .await;
        fx.dispatcher
            .dispatch("Page.removeSelection", params, None)
            .await;

        let shared = fx.document.shared();
        let doc = shared.lock().await;
        assert_eq!(doc.element(input).unwrap().value, "hello");
    }
}
