//! The set of live sessions and the browser they share.

use async_trait::async_trait;
use pagebridge_core::{Error, PanelMessage, PanelRequest, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clipboard::ClipboardProxy;
use crate::control::ControlChannel;
use crate::host::HostSink;
use crate::session::{Session, SessionOptions};

/// A freshly opened page and the channel that controls it.
pub struct RemoteTarget {
    pub target_id: String,
    pub channel: Arc<dyn ControlChannel>,
    /// Page to load once the session is attached. Targets open blank so
    /// the bootstrap script is in place before the first document.
    pub url: Option<String>,
}

/// Owner of the shared remote-target resource (a browser process).
#[async_trait]
pub trait TargetLauncher: Send + Sync {
    /// Open a new blank page, starting the underlying resource if needed.
    async fn open_target(&self, url: Option<&str>) -> Result<RemoteTarget>;

    /// Release the underlying resource.
    async fn shutdown(&self);
}

struct Inner {
    sessions: HashMap<String, Arc<Session>>,
    launched: bool,
    /// Opens and disposals running outside the lock.
    busy: usize,
}

/// Live sessions by id. Launching, attaching and teardown run without the
/// lock held, so a slow browser never stalls requests to other sessions.
pub struct SessionManager {
    launcher: Arc<dyn TargetLauncher>,
    clipboard: Arc<dyn ClipboardProxy>,
    sink: Arc<dyn HostSink>,
    options: SessionOptions,
    inner: Mutex<Inner>,
}

impl SessionManager {
    pub fn new(
        launcher: Arc<dyn TargetLauncher>,
        clipboard: Arc<dyn ClipboardProxy>,
        sink: Arc<dyn HostSink>,
        options: SessionOptions,
    ) -> Self {
        Self {
            launcher,
            clipboard,
            sink,
            options,
            inner: Mutex::new(Inner {
                sessions: HashMap::new(),
                launched: false,
                busy: 0,
            }),
        }
    }

    async fn attach_target(&self, url: Option<&str>) -> Result<Arc<Session>> {
        let target = self.launcher.open_target(url).await?;
        self.inner.lock().await.launched = true;

        let attached = Session::attach(
            &target.target_id,
            target.channel.clone(),
            self.clipboard.clone(),
            self.sink.clone(),
            self.options.clone(),
            target.url.as_deref(),
        )
        .await;
        if let Err(e) = &attached {
            warn!(target = %target.target_id, error = %e, "Failed to attach session");
            target.channel.close("attach failed").await;
        }
        attached
    }

    async fn open(&self, parent_id: Option<&str>, url: Option<&str>) -> Result<Arc<Session>> {
        {
            let mut inner = self.inner.lock().await;
            if let Some(parent_id) = parent_id {
                if !inner.sessions.contains_key(parent_id) {
                    return Err(Error::NotFound(format!("session '{}'", parent_id)));
                }
            }
            inner.busy += 1;
        }

        let attached = self.attach_target(url).await;

        let mut inner = self.inner.lock().await;
        inner.busy -= 1;
        let session = match attached {
            Ok(session) => session,
            Err(e) => {
                self.release_if_idle(&mut inner).await;
                return Err(e);
            }
        };

        if let Some(parent_id) = parent_id {
            let parent = inner.sessions.get(parent_id).cloned();
            let Some(parent) = parent else {
                // The parent went away while this target was opening.
                inner.busy += 1;
                drop(inner);
                session.dispose().await;
                let mut inner = self.inner.lock().await;
                inner.busy -= 1;
                self.release_if_idle(&mut inner).await;
                return Err(Error::NotFound(format!("session '{}'", parent_id)));
            };
            parent.add_child(session.clone()).await;
            debug!(parent = parent.id(), child = session.id(), "Child session attached");
        }
        inner
            .sessions
            .insert(session.id().to_string(), session.clone());
        Ok(session)
    }

    async fn release_if_idle(&self, inner: &mut Inner) {
        if inner.sessions.is_empty() && inner.busy == 0 && inner.launched {
            info!("Last session closed, shutting down browser");
            inner.launched = false;
            self.launcher.shutdown().await;
        }
    }

    /// Open a target and return the new session's id.
    pub async fn create_session(&self, url: Option<&str>) -> Result<String> {
        let session = self.open(None, url).await?;
        Ok(session.id().to_string())
    }

    /// Open a target owned by `parent_id`; it is disposed with its parent.
    pub async fn create_child_session(&self, parent_id: &str, url: Option<&str>) -> Result<String> {
        let child = self.open(Some(parent_id), url).await?;
        Ok(child.id().to_string())
    }

    /// Dispose a session and everything it owns. Returns false for an
    /// unknown or already-disposed id.
    pub async fn dispose_session(&self, id: &str) -> bool {
        let session = {
            let mut inner = self.inner.lock().await;
            let Some(session) = inner.sessions.remove(id) else {
                return false;
            };
            for other in inner.sessions.values() {
                other.remove_child(id).await;
            }
            for gone in session.descendant_ids().await {
                inner.sessions.remove(&gone);
            }
            inner.busy += 1;
            session
        };

        let disposed = session.dispose_subtree().await;

        let mut inner = self.inner.lock().await;
        inner.busy -= 1;
        self.release_if_idle(&mut inner).await;
        !disposed.is_empty()
    }

    pub async fn dispose_all(&self) -> usize {
        let sessions: Vec<Arc<Session>> = {
            let mut inner = self.inner.lock().await;
            inner.busy += 1;
            inner.sessions.drain().map(|(_, s)| s).collect()
        };
        let mut count = 0;
        for session in sessions {
            count += session.dispose_subtree().await.len();
        }
        let mut inner = self.inner.lock().await;
        inner.busy -= 1;
        self.release_if_idle(&mut inner).await;
        count
    }

    /// Route a panel request to its session. Requests for unknown sessions
    /// are answered with an error when a reply is expected.
    pub async fn submit(&self, session_id: &str, request: PanelRequest) -> Result<()> {
        let session = self.inner.lock().await.sessions.get(session_id).cloned();
        match session {
            Some(session) => {
                session.submit(request).await;
                Ok(())
            }
            None => {
                let err = Error::NotFound(format!("session '{}'", session_id));
                if let Some(id) = request.callback_id {
                    self.sink
                        .deliver(session_id, PanelMessage::error(id, err.message()));
                }
                Err(err)
            }
        }
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().await.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::MemoryClipboard;
    use crate::control::testing::ScriptedChannel;
    use crate::host::HostEvent;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    #[derive(Default)]
    struct CountingLauncher {
        opened: AtomicUsize,
        shutdowns: AtomicUsize,
        fail_open: bool,
        delay: std::sync::Mutex<Option<Duration>>,
    }

    #[async_trait]
    impl TargetLauncher for CountingLauncher {
        async fn open_target(&self, url: Option<&str>) -> Result<RemoteTarget> {
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_open {
                return Err(Error::Launch("no browser".into()));
            }
            let n = self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(RemoteTarget {
                target_id: format!("target-{}", n),
                channel: Arc::new(ScriptedChannel::new()),
                url: url.map(str::to_string),
            })
        }

        async fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn manager(
        launcher: Arc<CountingLauncher>,
    ) -> (SessionManager, mpsc::UnboundedReceiver<HostEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = SessionManager::new(
            launcher,
            Arc::new(MemoryClipboard::new()),
            Arc::new(tx),
            SessionOptions::default(),
        );
        (manager, rx)
    }

    #[tokio::test]
    async fn test_shutdown_only_after_last_session() {
        let launcher = Arc::new(CountingLauncher::default());
        let (manager, _events) = manager(launcher.clone());

        let a = manager.create_session(None).await.unwrap();
        let b = manager.create_session(Some("https://a.com")).await.unwrap();
        assert_eq!(manager.len().await, 2);

        assert!(manager.dispose_session(&a).await);
        assert_eq!(launcher.shutdowns.load(Ordering::SeqCst), 0);

        assert!(manager.dispose_session(&b).await);
        assert_eq!(launcher.shutdowns.load(Ordering::SeqCst), 1);

        assert!(!manager.dispose_session(&b).await);
        assert_eq!(launcher.shutdowns.load(Ordering::SeqCst), 1);
        assert!(manager.is_empty().await);
    }

    #[tokio::test]
    async fn test_relaunch_after_idle() {
        let launcher = Arc::new(CountingLauncher::default());
        let (manager, _events) = manager(launcher.clone());

        let a = manager.create_session(None).await.unwrap();
        manager.dispose_session(&a).await;
        let b = manager.create_session(None).await.unwrap();
        manager.dispose_session(&b).await;
        assert_eq!(launcher.shutdowns.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_child_sessions_go_with_parent() {
        let launcher = Arc::new(CountingLauncher::default());
        let (manager, _events) = manager(launcher.clone());

        let parent = manager.create_session(None).await.unwrap();
        let child = manager.create_child_session(&parent, None).await.unwrap();
        assert_eq!(manager.session_ids().await, vec![parent.clone(), child.clone()]);

        assert!(manager.dispose_session(&parent).await);
        assert!(manager.is_empty().await);
        assert_eq!(launcher.shutdowns.load(Ordering::SeqCst), 1);
        assert!(!manager.dispose_session(&child).await);
    }

    #[tokio::test]
    async fn test_disposing_child_keeps_parent() {
        let launcher = Arc::new(CountingLauncher::default());
        let (manager, _events) = manager(launcher.clone());

        let parent = manager.create_session(None).await.unwrap();
        let child = manager.create_child_session(&parent, None).await.unwrap();
        assert!(manager.dispose_session(&child).await);
        assert_eq!(manager.session_ids().await, vec![parent]);
        assert_eq!(launcher.shutdowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dispose_all_shuts_down_once() {
        let launcher = Arc::new(CountingLauncher::default());
        let (manager, _events) = manager(launcher.clone());
        let parent = manager.create_session(None).await.unwrap();
        manager.create_child_session(&parent, None).await.unwrap();
        manager.create_session(None).await.unwrap();

        assert_eq!(manager.dispose_all().await, 3);
        assert_eq!(manager.dispose_all().await, 0);
        assert_eq!(launcher.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_launch_creates_nothing() {
        let launcher = Arc::new(CountingLauncher {
            fail_open: true,
            ..Default::default()
        });
        let (manager, _events) = manager(launcher.clone());
        assert!(manager.create_session(None).await.is_err());
        assert!(manager.is_empty().await);
        assert_eq!(launcher.shutdowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slow_open_does_not_block_other_sessions() {
        let launcher = Arc::new(CountingLauncher::default());
        let (manager, _events) = manager(launcher.clone());
        let manager = Arc::new(manager);
        let a = manager.create_session(None).await.unwrap();

        *launcher.delay.lock().unwrap() = Some(Duration::from_millis(500));
        let opening = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.create_session(None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        manager
            .submit(&a, PanelRequest::new("Clipboard.writeText", json!({ "value": "x" })))
            .await
            .unwrap();
        assert!(manager.dispose_session(&a).await);
        assert!(started.elapsed() < Duration::from_millis(250));
        // The open still in flight keeps the browser up.
        assert_eq!(launcher.shutdowns.load(Ordering::SeqCst), 0);

        let b = opening.await.unwrap().unwrap();
        assert_eq!(manager.session_ids().await, vec![b]);
        assert_eq!(launcher.shutdowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_child_of_parent_disposed_while_opening() {
        let launcher = Arc::new(CountingLauncher::default());
        let (manager, _events) = manager(launcher.clone());
        let manager = Arc::new(manager);
        let parent = manager.create_session(None).await.unwrap();

        *launcher.delay.lock().unwrap() = Some(Duration::from_millis(200));
        let opening = {
            let manager = manager.clone();
            let parent = parent.clone();
            tokio::spawn(async move { manager.create_child_session(&parent, None).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.dispose_session(&parent).await);
        assert_eq!(launcher.shutdowns.load(Ordering::SeqCst), 0);

        assert!(matches!(opening.await.unwrap(), Err(Error::NotFound(_))));
        assert!(manager.is_empty().await);
        assert_eq!(launcher.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_submit_to_unknown_session() {
        let launcher = Arc::new(CountingLauncher::default());
        let (manager, mut events) = manager(launcher);
        let request = PanelRequest::new("Page.reload", serde_json::json!({})).with_callback(2);
        assert!(matches!(
            manager.submit("missing", request).await,
            Err(Error::NotFound(_))
        ));
        match events.recv().await.unwrap() {
            HostEvent::Message { message, .. } => assert_eq!(message.callback_id, Some(2)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
