//! Host clipboard access.

use async_trait::async_trait;
use pagebridge_core::Result;
use tokio::sync::Mutex;

#[async_trait]
pub trait ClipboardProxy: Send + Sync {
    async fn write_text(&self, text: &str) -> Result<()>;

    async fn read_text(&self) -> Result<String>;
}

/// Process-local clipboard.
#[derive(Default)]
pub struct MemoryClipboard {
    text: Mutex<String>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: &str) -> Self {
        Self {
            text: Mutex::new(text.to_string()),
        }
    }
}

#[async_trait]
impl ClipboardProxy for MemoryClipboard {
    async fn write_text(&self, text: &str) -> Result<()> {
        *self.text.lock().await = text.to_string();
        Ok(())
    }

    async fn read_text(&self) -> Result<String> {
        Ok(self.text.lock().await.clone())
    }
}

#[cfg(feature = "system-clipboard")]
pub use system::SystemClipboard;

#[cfg(feature = "system-clipboard")]
mod system {
    use super::ClipboardProxy;
    use arboard::Clipboard as ArboardClipboard;
    use async_trait::async_trait;
    use pagebridge_core::{Error, Result};

    /// The desktop clipboard. arboard is blocking, so each access runs on the
    /// blocking pool with a fresh handle.
    #[derive(Default)]
    pub struct SystemClipboard;

    impl SystemClipboard {
        pub fn new() -> Self {
            Self
        }
    }

    async fn blocking<T, F>(f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> std::result::Result<T, arboard::Error> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| Error::Clipboard(format!("clipboard task failed: {}", e)))?
            .map_err(|e| Error::Clipboard(e.to_string()))
    }

    #[async_trait]
    impl ClipboardProxy for SystemClipboard {
        async fn write_text(&self, text: &str) -> Result<()> {
            let text = text.to_string();
            blocking(move || ArboardClipboard::new().and_then(|mut c| c.set_text(text))).await
        }

        async fn read_text(&self) -> Result<String> {
            blocking(|| match ArboardClipboard::new().and_then(|mut c| c.get_text()) {
                Err(arboard::Error::ContentNotAvailable) => Ok(String::new()),
                other => other,
            })
            .await
        }
    }
}
