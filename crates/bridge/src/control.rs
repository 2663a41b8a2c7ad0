//! The per-target remote-control channel.
//!
//! [`ControlChannel`] is the seam between sessions and the DevTools wire:
//! `call` carries opaque method/params pairs, everything else here is built
//! on top of it.

use async_trait::async_trait;
use pagebridge_core::{Error, Result};
use serde_json::{json, Value};
use tracing::debug;

use crate::router::EventRouter;

#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Send one command and wait for its result.
    async fn call(&self, method: &str, params: Value) -> Result<Value>;

    /// Unsolicited events from the target.
    fn events(&self) -> &EventRouter;

    /// Fail pending calls with `reason` and release the connection.
    async fn close(&self, reason: &str);

    /// Evaluate an expression in the page and return its value. A script
    /// exception surfaces as [`Error::Script`].
    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let response = self
            .call(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        evaluation_value(response)
    }

    async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.call(&format!("{}.enable", domain), json!({})).await?;
        Ok(())
    }

    /// Load `url` in the target. A navigation the browser refuses surfaces
    /// as [`Error::Remote`].
    async fn navigate(&self, url: &str) -> Result<()> {
        let result = self.call("Page.navigate", json!({ "url": url })).await?;
        match result.get("errorText").and_then(|v| v.as_str()) {
            Some(text) if !text.is_empty() => {
                Err(Error::Remote(format!("navigation to {} failed: {}", url, text)))
            }
            _ => Ok(()),
        }
    }

    async fn go_back(&self) -> Result<bool> {
        navigate_history(self, -1).await
    }

    async fn go_forward(&self) -> Result<bool> {
        navigate_history(self, 1).await
    }

    /// Expose `window[name]` to page scripts; calls arrive as
    /// `Runtime.bindingCalled` events.
    async fn add_binding(&self, name: &str) -> Result<()> {
        self.call("Runtime.addBinding", json!({ "name": name })).await?;
        Ok(())
    }

    async fn remove_binding(&self, name: &str) -> Result<()> {
        self.call("Runtime.removeBinding", json!({ "name": name }))
            .await?;
        Ok(())
    }

    /// Run `source` in every document the target loads from now on.
    async fn add_script_on_new_document(&self, source: &str) -> Result<String> {
        let result = self
            .call(
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": source }),
            )
            .await?;
        Ok(result
            .get("identifier")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn emulate_color_scheme(&self, scheme: &str) -> Result<()> {
        self.call(
            "Emulation.setEmulatedMedia",
            json!({
                "features": [{ "name": "prefers-color-scheme", "value": scheme }],
            }),
        )
        .await?;
        Ok(())
    }

    async fn close_page(&self) -> Result<()> {
        self.call("Page.close", json!({})).await?;
        Ok(())
    }
}

/// Unwrap a `Runtime.evaluate` response.
pub fn evaluation_value(response: Value) -> Result<Value> {
    if let Some(details) = response.get("exceptionDetails") {
        let text = details
            .get("exception")
            .and_then(|e| e.get("description"))
            .and_then(|d| d.as_str())
            .or_else(|| details.get("text").and_then(|t| t.as_str()))
            .unwrap_or("script threw");
        return Err(Error::Script(text.to_string()));
    }
    Ok(response
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null))
}

/// Step through the navigation history. Returns false when there is no entry
/// in that direction.
async fn navigate_history<C>(channel: &C, delta: i64) -> Result<bool>
where
    C: ControlChannel + ?Sized,
{
    let history = channel
        .call("Page.getNavigationHistory", json!({}))
        .await?;
    let current = history
        .get("currentIndex")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| Error::Protocol("navigation history without currentIndex".to_string()))?;
    let entries = history
        .get("entries")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let target = current + delta;
    if target < 0 || target as usize >= entries.len() {
        debug!(current, delta, "No history entry in that direction");
        return Ok(false);
    }
    let entry_id = entries[target as usize]
        .get("id")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| Error::Protocol("history entry without id".to_string()))?;

    channel
        .call(
            "Page.navigateToHistoryEntry",
            json!({ "entryId": entry_id }),
        )
        .await?;
    Ok(true)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted stand-in for a live target.

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    type Handler = Box<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

    pub struct ScriptedChannel {
        router: EventRouter,
        handlers: Mutex<HashMap<String, Handler>>,
        pub calls: Mutex<Vec<(String, Value)>>,
        pub closed: AtomicBool,
    }

    impl ScriptedChannel {
        pub fn new() -> Self {
            Self {
                router: EventRouter::new(),
                handlers: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }
        }

        pub fn on<F>(&self, method: &str, handler: F)
        where
            F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
        {
            self.handlers
                .lock()
                .unwrap()
                .insert(method.to_string(), Box::new(handler));
        }

        pub fn methods(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(m, _)| m.clone())
                .collect()
        }

        pub fn count(&self, method: &str) -> usize {
            self.methods().iter().filter(|m| *m == method).count()
        }
    }

    #[async_trait]
    impl ControlChannel for ScriptedChannel {
        async fn call(&self, method: &str, params: Value) -> Result<Value> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), params.clone()));
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::Disposed("channel closed".to_string()));
            }
            let handlers = self.handlers.lock().unwrap();
            match handlers.get(method) {
                Some(handler) => handler(&params),
                None => Ok(json!({})),
            }
        }

        fn events(&self) -> &EventRouter {
            &self.router
        }

        async fn close(&self, _reason: &str) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedChannel;
    use super::*;

    fn history(channel: &ScriptedChannel, current: i64, len: usize) {
        let entries: Vec<Value> = (0..len).map(|i| json!({ "id": 100 + i })).collect();
        channel.on("Page.getNavigationHistory", move |_| {
            Ok(json!({ "currentIndex": current, "entries": entries.clone() }))
        });
    }

    #[tokio::test]
    async fn test_go_back_navigates_to_previous_entry() {
        let channel = ScriptedChannel::new();
        history(&channel, 2, 3);
        assert!(channel.go_back().await.unwrap());

        let calls = channel.calls.lock().unwrap().clone();
        let (method, params) = calls.last().unwrap();
        assert_eq!(method, "Page.navigateToHistoryEntry");
        assert_eq!(params["entryId"], 101);
    }

    #[tokio::test]
    async fn test_go_forward_at_end_is_noop() {
        let channel = ScriptedChannel::new();
        history(&channel, 1, 2);
        assert!(!channel.go_forward().await.unwrap());
        assert_eq!(channel.count("Page.navigateToHistoryEntry"), 0);
    }

    #[tokio::test]
    async fn test_evaluate_unwraps_value() {
        let channel = ScriptedChannel::new();
        channel.on("Runtime.evaluate", |_| {
            Ok(json!({ "result": { "type": "number", "value": 4 } }))
        });
        assert_eq!(channel.evaluate("2 + 2").await.unwrap(), json!(4));
    }

    #[tokio::test]
    async fn test_evaluate_exception_is_script_error() {
        let channel = ScriptedChannel::new();
        channel.on("Runtime.evaluate", |_| {
            Ok(json!({
                "result": { "type": "object" },
                "exceptionDetails": {
                    "text": "Uncaught",
                    "exception": { "description": "TypeError: x is undefined" }
                }
            }))
        });
        match channel.evaluate("x.y").await {
            Err(Error::Script(msg)) => assert!(msg.contains("TypeError")),
            other => panic!("expected script error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_navigate_reports_refused_load() {
        let channel = ScriptedChannel::new();
        channel.navigate("https://a.com").await.unwrap();
        channel.on("Page.navigate", |_| {
            Ok(json!({ "frameId": "F", "errorText": "net::ERR_NAME_NOT_RESOLVED" }))
        });
        match channel.navigate("https://nowhere.invalid").await {
            Err(Error::Remote(msg)) => assert!(msg.contains("ERR_NAME_NOT_RESOLVED")),
            other => panic!("expected remote error, got {:?}", other),
        }
        assert_eq!(channel.count("Page.navigate"), 2);
    }

    #[tokio::test]
    async fn test_color_scheme_feature() {
        let channel = ScriptedChannel::new();
        channel.emulate_color_scheme("dark").await.unwrap();
        let calls = channel.calls.lock().unwrap().clone();
        assert_eq!(calls[0].0, "Emulation.setEmulatedMedia");
        assert_eq!(calls[0].1["features"][0]["value"], "dark");
    }
}
