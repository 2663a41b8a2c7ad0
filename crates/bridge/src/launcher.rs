//! Chromium launch and target creation.
//!
//! The browser process is started on the first `open_target` and kept until
//! [`TargetLauncher::shutdown`]. Each target gets its own page-level CDP
//! connection; the browser-level connection is only used to create targets
//! and to close the browser.

use async_trait::async_trait;
use pagebridge_core::{BridgeConfig, Error, Paths, Result};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cdp::CdpClient;
use crate::control::ControlChannel;
use crate::manager::{RemoteTarget, TargetLauncher};

/// How far above the configured port to look for a free one.
const PORT_PROBE_RANGE: u16 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOptions {
    pub executable: Option<String>,
    pub host: String,
    pub port: u16,
    pub headless: bool,
    pub user_data_dir: Option<PathBuf>,
    pub user_args: Vec<String>,
    pub start_url: String,
    pub launch_timeout: Duration,
    pub call_timeout: Option<Duration>,
}

impl LaunchOptions {
    pub fn from_config(config: &BridgeConfig, paths: &Paths) -> Self {
        Self {
            executable: config.chrome_executable.clone(),
            host: config.debug_host.clone(),
            port: config.debug_port,
            headless: config.headless,
            user_data_dir: config.store_user_data.then(|| paths.user_data_dir()),
            user_args: config.user_args(),
            start_url: config.start_url.clone(),
            launch_timeout: config.launch_timeout(),
            call_timeout: config.call_timeout(),
        }
    }
}

/// Command line for a browser listening on `port`.
pub fn build_browser_args(options: &LaunchOptions, port: u16) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", port),
        "--allow-file-access-from-files".to_string(),
        "--remote-allow-origins=*".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
    ];
    args.extend(options.user_args.iter().cloned());
    if cfg!(target_os = "linux") {
        args.push("--no-sandbox".to_string());
    }
    if let Some(dir) = &options.user_data_dir {
        args.push(format!("--user-data-dir={}", dir.display()));
    }
    if options.headless {
        args.push("--headless=new".to_string());
    }
    args.push("about:blank".to_string());
    args
}

fn candidates() -> Vec<&'static str> {
    if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "microsoft-edge",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ]
    }
}

fn resolve(candidate: &str) -> Option<String> {
    if std::path::Path::new(candidate).exists() {
        return Some(candidate.to_string());
    }
    if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok() {
        return Some(candidate.to_string());
    }
    None
}

/// The configured executable if it resolves, otherwise the first known
/// install found on this machine.
pub fn find_browser_binary(configured: Option<&str>) -> Option<String> {
    if let Some(path) = configured.filter(|p| !p.trim().is_empty()) {
        return resolve(path);
    }
    candidates().into_iter().find_map(resolve)
}

pub fn list_available_browsers() -> Vec<String> {
    candidates().into_iter().filter_map(resolve).collect()
}

/// First port at or above `start` that can be bound locally.
pub async fn find_free_port(start: u16) -> Result<u16> {
    for port in start..start.saturating_add(PORT_PROBE_RANGE) {
        if tokio::net::TcpListener::bind(("127.0.0.1", port)).await.is_ok() {
            return Ok(port);
        }
    }
    Err(Error::Launch(format!(
        "No free debugging port in {}..{}",
        start,
        start.saturating_add(PORT_PROBE_RANGE)
    )))
}

/// Poll `/json/version` until the browser answers with its WebSocket URL.
pub async fn wait_for_cdp_ready(host: &str, port: u16, timeout: Duration) -> Result<String> {
    let start = Instant::now();
    let url = format!("http://{}:{}/json/version", host, port);

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Timeout(format!(
                "browser not ready after {}s on port {}",
                timeout.as_secs(),
                port
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Resolve a target id to its WebSocket URL via `/json/list`. Retries a few
/// times since a new target may not be listed immediately.
pub async fn get_target_ws_url(host: &str, port: u16, target_id: &str) -> Result<String> {
    let url = format!("http://{}:{}/json/list", host, port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let Ok(resp) = reqwest::get(&url).await else {
            continue;
        };
        let Ok(targets) = resp.json::<Vec<Value>>().await else {
            continue;
        };

        let found = targets
            .iter()
            .find(|t| {
                t.get("id")
                    .or_else(|| t.get("targetId"))
                    .and_then(|v| v.as_str())
                    == Some(target_id)
            })
            .and_then(|t| t.get("webSocketDebuggerUrl"))
            .and_then(|v| v.as_str());
        if let Some(ws_url) = found {
            return Ok(ws_url.to_string());
        }
    }

    Err(Error::NotFound(format!(
        "WebSocket URL for target '{}'",
        target_id
    )))
}

struct Browser {
    process: Child,
    client: CdpClient,
    port: u16,
}

pub struct ChromeLauncher {
    options: LaunchOptions,
    browser: Mutex<Option<Browser>>,
}

impl ChromeLauncher {
    pub fn new(options: LaunchOptions) -> Self {
        Self {
            options,
            browser: Mutex::new(None),
        }
    }

    pub async fn is_running(&self) -> bool {
        self.browser.lock().await.is_some()
    }

    async fn launch(&self) -> Result<Browser> {
        let binary = find_browser_binary(self.options.executable.as_deref()).ok_or_else(|| {
            Error::Launch("No Chromium-based browser found; set chromeExecutable".to_string())
        })?;
        if let Some(dir) = &self.options.user_data_dir {
            std::fs::create_dir_all(dir)?;
        }

        let port = find_free_port(self.options.port).await?;
        let args = build_browser_args(&self.options, port);
        info!(browser = %binary, port, headless = self.options.headless, "Launching browser");

        let mut process = Command::new(&binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Launch(format!("Failed to start {}: {}", binary, e)))?;

        let ws_url =
            match wait_for_cdp_ready(&self.options.host, port, self.options.launch_timeout).await {
                Ok(url) => url,
                Err(e) => {
                    let _ = process.kill().await;
                    return Err(e);
                }
            };
        let client = match CdpClient::connect(&ws_url, self.options.call_timeout).await {
            Ok(client) => client,
            Err(e) => {
                let _ = process.kill().await;
                return Err(e);
            }
        };
        debug!(ws_url = %ws_url, "Browser endpoint connected");
        Ok(Browser {
            process,
            client,
            port,
        })
    }
}

/// The page a new target should load: the requested URL, else the
/// configured start page. None when that is blank.
fn initial_url(requested: Option<&str>, start_url: &str) -> Option<String> {
    let url = requested.filter(|u| !u.is_empty()).unwrap_or(start_url);
    if url.is_empty() || url == "about:blank" {
        None
    } else {
        Some(url.to_string())
    }
}

#[async_trait]
impl TargetLauncher for ChromeLauncher {
    async fn open_target(&self, url: Option<&str>) -> Result<RemoteTarget> {
        let mut guard = self.browser.lock().await;
        if guard.is_none() {
            *guard = Some(self.launch().await?);
        }
        let Some(browser) = guard.as_ref() else {
            return Err(Error::Launch("browser unavailable".to_string()));
        };

        let url = initial_url(url, &self.options.start_url);
        let created = browser
            .client
            .call("Target.createTarget", json!({ "url": "about:blank" }))
            .await?;
        let target_id = created
            .get("targetId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Protocol("Target.createTarget returned no targetId".to_string()))?
            .to_string();

        let ws_url = get_target_ws_url(&self.options.host, browser.port, &target_id).await?;
        let channel = CdpClient::connect(&ws_url, self.options.call_timeout).await?;
        info!(target = %target_id, url = url.as_deref().unwrap_or("about:blank"), "Target opened");
        Ok(RemoteTarget {
            target_id,
            channel: Arc::new(channel),
            url,
        })
    }

    async fn shutdown(&self) {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return;
        };
        if let Err(e) = browser.client.call("Browser.close", json!({})).await {
            debug!("Browser.close failed (may already be closed): {}", e);
        }
        browser.client.close("browser shut down").await;
        if let Err(e) = browser.process.kill().await {
            warn!(error = %e, "Failed to kill browser process");
        }
        info!("Browser shut down");
    }
}
