//! Message transports.
//!
//! The bridge only needs an asynchronous `send`; inbound messages are pushed
//! to it by whoever owns the read side (a WebSocket reader task, a stdin line
//! reader, or a test).

use async_trait::async_trait;
use pagebridge_core::{Error, Result};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Outbound half of a duplex, message-based channel.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: Value) -> Result<()>;
}

/// In-process transport backed by an unbounded channel.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Value>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::UnboundedSender<Value>) -> Self {
        Self { tx }
    }

    /// A transport plus the receiver that observes everything sent on it.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, message: Value) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| Error::Transport("channel receiver dropped".to_string()))
    }
}

/// Newline-delimited JSON over any async writer (stdout in the CLI).
pub struct LineTransport<W> {
    writer: Mutex<W>,
}

impl<W> LineTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl LineTransport<tokio::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W> Transport for LineTransport<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&self, message: Value) -> Result<()> {
        let mut line = serde_json::to_string(&message)?;
        line.push('\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Read newline-delimited JSON values until EOF. Blank lines are skipped and
/// lines that are not JSON are logged and dropped.
pub fn spawn_line_reader<R>(reader: R) -> mpsc::Receiver<Value>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Value>(line) {
                        Ok(value) => {
                            if tx.send(value).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Dropping malformed input line"),
                    }
                }
                Ok(None) => {
                    debug!("Line reader reached EOF");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Line reader failed");
                    break;
                }
            }
        }
    });
    rx
}
