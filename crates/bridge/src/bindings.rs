//! Host functions exposed to page scripts.
//!
//! Each binding is installed with `Runtime.addBinding`. The page calls it
//! through `window.__pagebridge.call(name, ...args)`, which sends
//! `{"seq": n, "args": [...]}` as the binding payload; the host answers by
//! evaluating [`deliver_script`] with the same `seq`.

use pagebridge_core::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::control::ControlChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    /// Capability probe: is clipboard sync on.
    EnableCopyPaste,
    EmitCopy,
    GetPaste,
    EmitContextMenu,
    EmitSelection,
    EmitClick,
    EmitSelectAll,
    EmitFindQuery,
    RemoveHighlights,
    UpdateHighlights,
}

impl Binding {
    pub const ALL: [Binding; 10] = [
        Binding::EnableCopyPaste,
        Binding::EmitCopy,
        Binding::GetPaste,
        Binding::EmitContextMenu,
        Binding::EmitSelection,
        Binding::EmitClick,
        Binding::EmitSelectAll,
        Binding::EmitFindQuery,
        Binding::RemoveHighlights,
        Binding::UpdateHighlights,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Binding::EnableCopyPaste => "PAGEBRIDGE_ENABLE_COPY_PASTE",
            Binding::EmitCopy => "PAGEBRIDGE_EMIT_COPY",
            Binding::GetPaste => "PAGEBRIDGE_GET_PASTE",
            Binding::EmitContextMenu => "PAGEBRIDGE_EMIT_CONTEXT_MENU",
            Binding::EmitSelection => "PAGEBRIDGE_EMIT_SELECTION",
            Binding::EmitClick => "PAGEBRIDGE_EMIT_CLICK",
            Binding::EmitSelectAll => "PAGEBRIDGE_EMIT_SELECT_ALL",
            Binding::EmitFindQuery => "PAGEBRIDGE_EMIT_FIND_QUERY",
            Binding::RemoveHighlights => "PAGEBRIDGE_REMOVE_HIGHLIGHTS",
            Binding::UpdateHighlights => "PAGEBRIDGE_UPDATE_HIGHLIGHTS",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    seq: Option<u64>,
    #[serde(default)]
    args: Vec<Value>,
}

/// One decoded `Runtime.bindingCalled` event.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingCall {
    pub binding: Binding,
    pub seq: Option<u64>,
    pub args: Vec<Value>,
}

impl BindingCall {
    pub fn parse(params: &Value) -> Result<Self> {
        let name = params
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Protocol("bindingCalled without name".to_string()))?;
        let binding = Binding::from_name(name)
            .ok_or_else(|| Error::Protocol(format!("unknown binding '{}'", name)))?;
        let payload = params.get("payload").and_then(|v| v.as_str()).unwrap_or("");
        let Payload { seq, args } = if payload.is_empty() {
            Payload {
                seq: None,
                args: Vec::new(),
            }
        } else {
            serde_json::from_str(payload).map_err(|e| {
                Error::Protocol(format!("bad payload for binding '{}': {}", name, e))
            })?
        };
        Ok(Self { binding, seq, args })
    }

    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or(Value::Null)
    }

    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(|v| v.as_str())
    }
}

/// Script that resolves the page-side promise for `seq` with `value`.
pub fn deliver_script(seq: u64, value: &Value) -> String {
    format!(
        "window.__pagebridge && window.__pagebridge.deliver({}, {})",
        seq, value
    )
}

/// The bindings currently installed on one target.
#[derive(Default)]
pub struct BindingSet {
    registered: Mutex<Vec<Binding>>,
}

impl BindingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install every binding. A binding that fails to install is logged and
    /// left out; the rest still go in.
    pub async fn register_all(&self, channel: &dyn ControlChannel) -> usize {
        let mut registered = self.registered.lock().await;
        for binding in Binding::ALL {
            if registered.contains(&binding) {
                continue;
            }
            match channel.add_binding(binding.name()).await {
                Ok(()) => registered.push(binding),
                Err(e) => warn!(binding = binding.name(), error = %e, "Failed to add binding"),
            }
        }
        registered.len()
    }

    /// Remove every installed binding. Removal errors are ignored and a
    /// second call finds nothing to remove.
    pub async fn unregister_all(&self, channel: &dyn ControlChannel) -> usize {
        let drained: Vec<Binding> = std::mem::take(&mut *self.registered.lock().await);
        for binding in &drained {
            if let Err(e) = channel.remove_binding(binding.name()).await {
                debug!(binding = binding.name(), error = %e, "Binding removal failed, ignoring");
            }
        }
        drained.len()
    }

    pub async fn registered(&self) -> Vec<Binding> {
        self.registered.lock().await.clone()
    }
}
