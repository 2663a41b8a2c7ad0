//! One managed remote target.
//!
//! A session owns its control channel, its dispatcher and the bindings it
//! installed on the page. Panel requests go through a per-session queue so
//! actions on one target never run in parallel. Teardown runs once, in a
//! fixed order: bindings, page, channel, background tasks, then the host
//! is told. Every queued request that expects a reply gets one before the
//! host hears the session is gone.

use futures::future::{BoxFuture, FutureExt};
use pagebridge_core::{BridgeConfig, Error, PanelMessage, PanelRequest, Result};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bindings::{deliver_script, Binding, BindingCall, BindingSet};
use crate::clipboard::ClipboardProxy;
use crate::control::ControlChannel;
use crate::dispatcher::Dispatcher;
use crate::document::{RemoteDocument, ScriptedDocument};
use crate::highlight::script;
use crate::host::{HostNotification, HostSink};

const BINDING_CALLED: &str = "Runtime.bindingCalled";

/// How long teardown waits for the request queue to drain.
const QUEUE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Answer to the page's copy/paste capability probe.
    pub sync_copy_paste: bool,
    pub color_scheme: &'static str,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            sync_copy_paste: true,
            color_scheme: "dark",
        }
    }
}

impl From<&BridgeConfig> for SessionOptions {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            sync_copy_paste: config.sync_copy_paste,
            color_scheme: config.color_scheme(),
        }
    }
}

/// Answers binding calls coming from the page.
#[derive(Clone)]
struct BindingHandler {
    session_id: String,
    document: Arc<dyn RemoteDocument>,
    clipboard: Arc<dyn ClipboardProxy>,
    sink: Arc<dyn HostSink>,
    sync_copy_paste: bool,
}

impl BindingHandler {
    fn emit(&self, method: &str, payload: Value) -> Value {
        self.sink
            .deliver(&self.session_id, PanelMessage::event(method, payload));
        Value::Null
    }

    async fn handle(&self, call: &BindingCall) -> Result<Value> {
        match call.binding {
            Binding::EnableCopyPaste => Ok(Value::Bool(self.sync_copy_paste)),
            Binding::EmitCopy => {
                if let Some(text) = call.arg_str(0) {
                    self.clipboard.write_text(text).await?;
                }
                Ok(Value::Null)
            }
            Binding::GetPaste => Ok(Value::String(self.clipboard.read_text().await?)),
            Binding::EmitContextMenu => Ok(self.emit("extension.contextMenu", call.arg(0))),
            Binding::EmitSelection => Ok(self.emit("extension.selection", call.arg(0))),
            Binding::EmitClick => Ok(self.emit("extension.click", Value::Null)),
            Binding::EmitSelectAll => {
                self.document.select_all(call.arg_str(0)).await?;
                Ok(Value::Null)
            }
            Binding::EmitFindQuery => Ok(self.emit("extension.openFindSearchBar", Value::Null)),
            Binding::RemoveHighlights => {
                self.document.remove_all_highlights().await?;
                Ok(Value::Null)
            }
            Binding::UpdateHighlights => {
                let count = self
                    .document
                    .update_highlights(call.arg_str(0).unwrap_or_default())
                    .await?;
                Ok(Value::from(count))
            }
        }
    }
}

pub struct Session {
    id: String,
    control: Arc<dyn ControlChannel>,
    sink: Arc<dyn HostSink>,
    bindings: BindingSet,
    queue: Mutex<Option<mpsc::UnboundedSender<PanelRequest>>>,
    queue_task: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    children: Mutex<Vec<Arc<Session>>>,
    disposed: Arc<AtomicBool>,
}

impl Session {
    /// Prepare the target behind `control` and start serving it, then load
    /// `url`. The target should still be blank: the bootstrap script only
    /// reaches documents loaded after it is installed.
    pub async fn attach(
        id: &str,
        control: Arc<dyn ControlChannel>,
        clipboard: Arc<dyn ClipboardProxy>,
        sink: Arc<dyn HostSink>,
        options: SessionOptions,
        url: Option<&str>,
    ) -> Result<Arc<Session>> {
        let document: Arc<dyn RemoteDocument> = Arc::new(ScriptedDocument::new(control.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            id,
            control.clone(),
            document.clone(),
            clipboard.clone(),
            sink.clone(),
        ));
        let handler = BindingHandler {
            session_id: id.to_string(),
            document,
            clipboard,
            sink: sink.clone(),
            sync_copy_paste: options.sync_copy_paste,
        };

        // Subscribe before the page can call anything.
        let binding_calls = control.events().subscribe(BINDING_CALLED).await;
        let unhandled = control.events().subscribe_unhandled().await;

        control.enable_domain("Page").await?;
        control.enable_domain("Runtime").await?;

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Session {
            id: id.to_string(),
            control: control.clone(),
            sink: sink.clone(),
            bindings: BindingSet::new(),
            queue: Mutex::new(Some(queue_tx)),
            queue_task: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            children: Mutex::new(Vec::new()),
            disposed: Arc::new(AtomicBool::new(false)),
        });

        let installed = session.bindings.register_all(&*control).await;
        debug!(session = id, installed, "Bindings registered");
        control.add_script_on_new_document(&script::bootstrap()).await?;
        if let Err(e) = control.emulate_color_scheme(options.color_scheme).await {
            warn!(session = id, error = %e, "Color scheme emulation failed");
        }

        {
            let mut tasks = session.tasks.lock().await;
            tasks.push(tokio::spawn(serve_bindings(
                handler,
                control.clone(),
                binding_calls,
            )));
            tasks.push(tokio::spawn(forward_events(
                id.to_string(),
                sink.clone(),
                unhandled,
            )));
        }
        *session.queue_task.lock().await = Some(tokio::spawn(run_queue(
            id.to_string(),
            dispatcher,
            sink.clone(),
            session.disposed.clone(),
            queue_rx,
        )));

        if let Some(url) = url.filter(|u| !u.is_empty() && *u != "about:blank") {
            if let Err(e) = control.navigate(url).await {
                warn!(session = id, url, error = %e, "Initial navigation failed");
            }
        }

        info!(session = id, "Session attached");
        sink.notify(HostNotification::Created {
            session_id: id.to_string(),
        });
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Queue one panel request. A request for a disposed session is
    /// answered with an error when the panel is waiting for one.
    pub async fn submit(&self, request: PanelRequest) {
        let rejected = {
            let queue = self.queue.lock().await;
            match queue.as_ref() {
                Some(tx) => tx.send(request).err().map(|e| e.0),
                None => Some(request),
            }
        };
        if let Some(request) = rejected {
            reject_disposed(&self.id, self.sink.as_ref(), request);
        }
    }

    pub async fn add_child(&self, child: Arc<Session>) {
        self.children.lock().await.push(child);
    }

    pub async fn remove_child(&self, id: &str) -> bool {
        let mut children = self.children.lock().await;
        let before = children.len();
        children.retain(|c| c.id != id);
        children.len() != before
    }

    /// Ids of every session below this one, parents before their children.
    pub fn descendant_ids(&self) -> BoxFuture<'_, Vec<String>> {
        async move {
            let children: Vec<Arc<Session>> = self.children.lock().await.clone();
            let mut ids = Vec::new();
            for child in children {
                ids.push(child.id.clone());
                ids.extend(child.descendant_ids().await);
            }
            ids
        }
        .boxed()
    }

    pub async fn children(&self) -> Vec<String> {
        self.children
            .lock()
            .await
            .iter()
            .map(|c| c.id.clone())
            .collect()
    }

    /// Tear this session down. Returns false if it was already disposed.
    pub async fn dispose(&self) -> bool {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        debug!(session = %self.id, "Disposing session");

        self.queue.lock().await.take();
        let removed = self.bindings.unregister_all(&*self.control).await;
        debug!(session = %self.id, removed, "Bindings removed");
        if let Err(e) = self.control.close_page().await {
            debug!(session = %self.id, error = %e, "Page close failed");
        }
        self.control.close("session disposed").await;

        // The queue's sender is gone, so the task answers whatever is still
        // buffered and ends. A dispatch in flight fails on the closed channel
        // and is answered too.
        let queue_task = self.queue_task.lock().await.take();
        if let Some(mut task) = queue_task {
            if tokio::time::timeout(QUEUE_DRAIN_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                warn!(session = %self.id, "Request queue did not drain, aborting it");
                task.abort();
            }
        }
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }

        info!(session = %self.id, "Session disposed");
        self.sink.notify(HostNotification::Disposed {
            session_id: self.id.clone(),
        });
        true
    }

    /// Dispose every child depth-first, then this session. Returns the ids
    /// that were torn down by this call.
    pub fn dispose_subtree(&self) -> BoxFuture<'_, Vec<String>> {
        async move {
            let children: Vec<Arc<Session>> = std::mem::take(&mut *self.children.lock().await);
            let mut disposed = Vec::new();
            for child in children {
                disposed.extend(child.dispose_subtree().await);
            }
            if self.dispose().await {
                disposed.push(self.id.clone());
            }
            disposed
        }
        .boxed()
    }
}

async fn serve_bindings(
    handler: BindingHandler,
    control: Arc<dyn ControlChannel>,
    mut calls: mpsc::UnboundedReceiver<Value>,
) {
    while let Some(params) = calls.recv().await {
        let call = match BindingCall::parse(&params) {
            Ok(call) => call,
            Err(e) => {
                warn!(session = %handler.session_id, error = %e, "Ignoring binding call");
                continue;
            }
        };
        let value = match handler.handle(&call).await {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    session = %handler.session_id,
                    binding = call.binding.name(),
                    error = %e,
                    "Binding handler failed"
                );
                Value::Null
            }
        };
        if let Some(seq) = call.seq {
            if let Err(e) = control.evaluate(&deliver_script(seq, &value)).await {
                debug!(session = %handler.session_id, seq, error = %e, "Binding reply not delivered");
            }
        }
    }
}

async fn forward_events(
    session_id: String,
    sink: Arc<dyn HostSink>,
    mut events: mpsc::UnboundedReceiver<crate::router::RoutedEvent>,
) {
    while let Some(event) = events.recv().await {
        sink.deliver(&session_id, PanelMessage::event(&event.method, event.params));
    }
}

/// Answer a request that arrived too late with a disposed error.
fn reject_disposed(session_id: &str, sink: &dyn HostSink, request: PanelRequest) {
    let err = Error::Disposed(session_id.to_string());
    match request.callback_id {
        Some(id) => sink.deliver(session_id, PanelMessage::error(id, err.message())),
        None => {
            debug!(session = %session_id, action = %request.action, "Dropped request after disposal")
        }
    }
}

async fn run_queue(
    session_id: String,
    dispatcher: Arc<Dispatcher>,
    sink: Arc<dyn HostSink>,
    disposed: Arc<AtomicBool>,
    mut queue: mpsc::UnboundedReceiver<PanelRequest>,
) {
    while let Some(request) = queue.recv().await {
        if disposed.load(Ordering::SeqCst) {
            reject_disposed(&session_id, sink.as_ref(), request);
            continue;
        }
        let params = request.params_or_null();
        dispatcher
            .dispatch(&request.action, params, request.callback_id)
            .await;
    }
}
