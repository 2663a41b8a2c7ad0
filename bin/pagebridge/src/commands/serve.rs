//! stdio host: one NDJSON request per line in, one host event per line out.
//!
//! Lines carrying a `sessionId` are panel requests for that session. Lines
//! without one address the host itself:
//!
//! - `bridge.open {url?, parent?}` opens a session and answers `{sessionId}`
//! - `bridge.close {sessionId}` disposes a session and its children
//! - `bridge.list` answers the live session ids

use pagebridge_bridge::clipboard::ClipboardProxy;
use pagebridge_bridge::transport::{spawn_line_reader, LineTransport, Transport};
use pagebridge_bridge::{ChromeLauncher, HostEvent, HostSink, LaunchOptions, SessionManager, SessionOptions};
use pagebridge_core::{BridgeConfig, Error, PanelMessage, PanelRequest, Paths};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Address used for replies to host-level requests.
const BRIDGE_ADDRESS: &str = "bridge";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(flatten)]
    request: PanelRequest,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct OpenParams {
    url: Option<String>,
    parent: Option<String>,
}

fn clipboard() -> Arc<dyn ClipboardProxy> {
    #[cfg(feature = "system-clipboard")]
    {
        Arc::new(pagebridge_bridge::SystemClipboard::new())
    }
    #[cfg(not(feature = "system-clipboard"))]
    {
        Arc::new(pagebridge_bridge::MemoryClipboard::new())
    }
}

pub async fn run(url: Option<String>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = BridgeConfig::load_or_default(&paths)?;
    if config.store_user_data {
        paths.ensure_dirs()?;
    }

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<HostEvent>();
    let sink: Arc<dyn HostSink> = Arc::new(events_tx);
    let launcher = Arc::new(ChromeLauncher::new(LaunchOptions::from_config(&config, &paths)));
    let manager = SessionManager::new(
        launcher,
        clipboard(),
        sink.clone(),
        SessionOptions::from(&config),
    );

    let writer = tokio::spawn(async move {
        let out = LineTransport::stdout();
        while let Some(event) = events_rx.recv().await {
            if let HostEvent::Notification(notification) = &event {
                debug!(session = notification.session_id(), "Host notification");
            }
            let line = match serde_json::to_value(&event) {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Failed to encode host event");
                    continue;
                }
            };
            if let Err(e) = out.send(line).await {
                warn!(error = %e, "stdout closed");
                break;
            }
        }
    });

    if let Some(url) = url {
        match manager.create_session(Some(&url)).await {
            Ok(id) => info!(session = %id, url = %url, "Initial session opened"),
            Err(e) => warn!(url = %url, error = %e, "Failed to open initial session"),
        }
    }

    let mut lines = spawn_line_reader(tokio::io::BufReader::new(tokio::io::stdin()));
    info!("Serving on stdio");
    loop {
        tokio::select! {
            line = lines.recv() => match line {
                Some(value) => handle_line(&manager, sink.as_ref(), value).await,
                None => {
                    debug!("stdin closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    let disposed = manager.dispose_all().await;
    info!(disposed, "All sessions disposed");
    drop(manager);
    drop(sink);
    if tokio::time::timeout(Duration::from_secs(2), writer).await.is_err() {
        warn!("Timed out flushing host events");
    }
    Ok(())
}

async fn handle_line(manager: &SessionManager, sink: &dyn HostSink, value: Value) {
    let host_request: HostRequest = match serde_json::from_value(value) {
        Ok(req) => req,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed request");
            return;
        }
    };
    let HostRequest {
        session_id,
        request,
    } = host_request;

    if let Some(session_id) = session_id {
        if let Err(e) = manager.submit(&session_id, request).await {
            debug!(session = %session_id, error = %e, "Request not routed");
        }
        return;
    }

    let callback_id = request.callback_id;
    let outcome = handle_bridge_request(manager, &request).await;
    match (outcome, callback_id) {
        (Ok(result), Some(id)) => sink.deliver(BRIDGE_ADDRESS, PanelMessage::result(id, result)),
        (Err(e), Some(id)) => sink.deliver(BRIDGE_ADDRESS, PanelMessage::error(id, e.message())),
        (Err(e), None) => warn!(action = %request.action, error = %e, "Host request failed"),
        (Ok(_), None) => {}
    }
}

async fn handle_bridge_request(
    manager: &SessionManager,
    request: &PanelRequest,
) -> pagebridge_core::Result<Value> {
    let params = request.params_or_null();
    match request.action.as_str() {
        "bridge.open" => {
            let open: OpenParams = if params.is_null() {
                OpenParams::default()
            } else {
                serde_json::from_value(params)?
            };
            let id = match open.parent {
                Some(parent) => {
                    manager
                        .create_child_session(&parent, open.url.as_deref())
                        .await?
                }
                None => manager.create_session(open.url.as_deref()).await?,
            };
            Ok(json!({ "sessionId": id }))
        }
        "bridge.close" => {
            let id = params
                .get("sessionId")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Protocol("bridge.close needs sessionId".to_string()))?;
            Ok(Value::Bool(manager.dispose_session(id).await))
        }
        "bridge.list" => Ok(json!(manager.session_ids().await)),
        other => Err(Error::NotFound(format!("host action '{}'", other))),
    }
}
