//! Operations the dispatcher runs against the remote document.

use async_trait::async_trait;
use pagebridge_core::{Error, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::control::ControlChannel;
use crate::highlight::{editing, engine, script, Document};

#[async_trait]
pub trait RemoteDocument: Send + Sync {
    /// Highlight `query` and return the number of matches. A blank query
    /// returns 0 without touching the document.
    async fn update_highlights(&self, query: &str) -> Result<usize>;

    /// Move the current-match emphasis. A missing marker is a no-op.
    async fn scroll_to_match(&self, previous: i64, current: i64) -> Result<()>;

    async fn remove_all_highlights(&self) -> Result<()>;

    async fn remove_selection(&self, uid: &str) -> Result<()>;

    async fn paste_from_clipboard(&self, uid: &str, text: &str) -> Result<()>;

    async fn select_all(&self, uid: Option<&str>) -> Result<()>;
}

/// Runs the page-side scripts through `Runtime.evaluate`.
pub struct ScriptedDocument {
    control: Arc<dyn ControlChannel>,
}

impl ScriptedDocument {
    pub fn new(control: Arc<dyn ControlChannel>) -> Self {
        Self { control }
    }
}

#[async_trait]
impl RemoteDocument for ScriptedDocument {
    async fn update_highlights(&self, query: &str) -> Result<usize> {
        let keyword = query.trim();
        if keyword.is_empty() {
            return Ok(0);
        }
        self.control.evaluate(&script::install_styles()).await?;
        let count = self
            .control
            .evaluate(&script::update_highlights(keyword))
            .await?;
        count
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| Error::Script(format!("highlight pass returned {}", count)))
    }

    async fn scroll_to_match(&self, previous: i64, current: i64) -> Result<()> {
        let found = self
            .control
            .evaluate(&script::scroll_to_match(previous, current))
            .await?;
        if found != serde_json::Value::Bool(true) {
            debug!(current, "No marker to scroll to");
        }
        Ok(())
    }

    async fn remove_all_highlights(&self) -> Result<()> {
        self.control
            .evaluate(&script::remove_all_highlights())
            .await?;
        Ok(())
    }

    async fn remove_selection(&self, uid: &str) -> Result<()> {
        self.control.evaluate(&script::remove_selection(uid)).await?;
        Ok(())
    }

    async fn paste_from_clipboard(&self, uid: &str, text: &str) -> Result<()> {
        self.control
            .evaluate(&script::paste_from_clipboard(uid, text))
            .await?;
        Ok(())
    }

    async fn select_all(&self, uid: Option<&str>) -> Result<()> {
        self.control.evaluate(&script::select_all(uid)).await?;
        Ok(())
    }
}

/// Applies the same operations to an in-memory [`Document`].
#[derive(Clone, Default)]
pub struct SnapshotDocument {
    doc: Arc<Mutex<Document>>,
}

impl SnapshotDocument {
    pub fn new(doc: Document) -> Self {
        Self {
            doc: Arc::new(Mutex::new(doc)),
        }
    }

    pub fn shared(&self) -> Arc<Mutex<Document>> {
        self.doc.clone()
    }
}

#[async_trait]
impl RemoteDocument for SnapshotDocument {
    async fn update_highlights(&self, query: &str) -> Result<usize> {
        let mut doc = self.doc.lock().await;
        Ok(engine::update_highlights(&mut doc, query).len())
    }

    async fn scroll_to_match(&self, previous: i64, current: i64) -> Result<()> {
        let mut doc = self.doc.lock().await;
        engine::scroll_to_match(&mut doc, previous, current);
        Ok(())
    }

    async fn remove_all_highlights(&self) -> Result<()> {
        let mut doc = self.doc.lock().await;
        engine::remove_all_highlights(&mut doc);
        Ok(())
    }

    async fn remove_selection(&self, uid: &str) -> Result<()> {
        let mut doc = self.doc.lock().await;
        editing::remove_selection(&mut doc, uid);
        Ok(())
    }

    async fn paste_from_clipboard(&self, uid: &str, text: &str) -> Result<()> {
        let mut doc = self.doc.lock().await;
        editing::paste_from_clipboard(&mut doc, uid, text);
        Ok(())
    }

    async fn select_all(&self, uid: Option<&str>) -> Result<()> {
        let mut doc = self.doc.lock().await;
        editing::select_all(&mut doc, uid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::testing::ScriptedChannel;
    use crate::highlight::Element;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_blank_query_skips_evaluation() {
        let channel = Arc::new(ScriptedChannel::new());
        let document = ScriptedDocument::new(channel.clone());
        assert_eq!(document.update_highlights("  \t").await.unwrap(), 0);
        assert!(channel.methods().is_empty());
    }

    #[tokio::test]
    async fn test_scripted_query_installs_styles_then_counts() {
        let channel = Arc::new(ScriptedChannel::new());
        channel.on("Runtime.evaluate", |params| {
            let expr = params["expression"].as_str().unwrap_or_default();
            if expr.contains("keyword") {
                Ok(json!({ "result": { "type": "number", "value": 3 } }))
            } else {
                Ok(json!({ "result": { "type": "undefined" } }))
            }
        });
        let document = ScriptedDocument::new(channel.clone());
        assert_eq!(document.update_highlights(" rust ").await.unwrap(), 3);

        let calls = channel.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].1["expression"].as_str().unwrap().contains("pagebridge-highlight-styles"));
        assert!(calls[1].1["expression"].as_str().unwrap().contains("\"rust\""));
    }

    #[tokio::test]
    async fn test_scripted_exception_propagates() {
        let channel = Arc::new(ScriptedChannel::new());
        channel.on("Runtime.evaluate", |_| {
            Ok(json!({ "exceptionDetails": { "text": "Uncaught ReferenceError" } }))
        });
        let document = ScriptedDocument::new(channel);
        assert!(matches!(
            document.remove_all_highlights().await,
            Err(Error::Script(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_document_round_trip() {
        let mut doc = Document::new();
        let body = doc.body();
        let p = doc.append_element(body, Element::new("p"));
        doc.append_text(p, "Alpha beta alpha");
        let document = SnapshotDocument::new(doc);
        let shared = document.shared();
        let before = {
            let doc = shared.lock().await;
            doc.text_content(doc.body())
        };

        assert_eq!(document.update_highlights("ALPHA").await.unwrap(), 1);
        document.scroll_to_match(-1, 0).await.unwrap();
        document.remove_all_highlights().await.unwrap();

        let doc = shared.lock().await;
        assert_eq!(doc.text_content(doc.body()), before);
    }
}
