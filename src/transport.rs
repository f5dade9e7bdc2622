// src/transport.rs - Links to the shelf controller
use crate::config::SerialConfig;
use crate::error::{MonitorError, Result};
use crate::telemetry::Command;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "serial")]
pub use serial::SerialLink;

/// Lines drained in one read, plus how the read ended
#[derive(Debug, Default)]
pub struct ReadOutcome {
    /// Complete lines in arrival order
    pub lines: Vec<String>,
    /// Lines over the length limit that were thrown away
    pub discarded: usize,
    /// Set when the link failed; `lines` still holds what came before it
    pub failure: Option<MonitorError>,
}

impl ReadOutcome {
    pub fn failed(error: MonitorError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }
}

/// Line-oriented link to a controller
///
/// Implementations own the framing. The engine only sees whole lines in
/// and [`Command`]s out; a read failure or any `Err` from `send` is treated
/// as loss of the link.
#[async_trait]
pub trait Transport: Send {
    /// Open the link; must leave it closed on failure
    async fn open(&mut self) -> Result<()>;

    /// Drain up to `max` lines, waiting at most `timeout` for each
    ///
    /// Fewer than `max` lines (possibly none) without a failure means no
    /// more data was available this tick. A failing link must be closed
    /// before returning.
    async fn read_lines(&mut self, max: usize, timeout: Duration) -> ReadOutcome;

    /// Send one command as a single line
    async fn send(&mut self, command: &Command) -> Result<()>;

    async fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Human-readable endpoint, e.g. the device path
    fn describe(&self) -> String;

    /// Replace connection settings; takes effect on the next `open`
    fn apply_settings(&mut self, _settings: &SerialConfig) {}
}

// ============================================================================
// IN-MEMORY LINK
// ============================================================================

#[derive(Debug, Default)]
struct MemoryLinkInner {
    inbound: VecDeque<String>,
    sent: Vec<Command>,
    open: bool,
    refuse_open: Option<String>,
    // Lines still delivered before reads start failing
    fail_reads_after: Option<usize>,
    fail_sends: bool,
    open_count: usize,
}

/// Scripted link for tests and builds without serial support
///
/// Clones share the same queues, so a test can keep one clone while the
/// engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryLink {
    inner: Arc<Mutex<MemoryLinkInner>>,
    name: String,
}

impl MemoryLink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::default(),
            name: name.into(),
        }
    }

    /// A link that can never be opened
    pub fn offline(reason: impl Into<String>) -> Self {
        let link = Self::new("offline");
        link.refuse_open(Some(reason.into()));
        link
    }

    /// Queue a line as if the controller had sent it
    pub fn push_line(&self, line: impl Into<String>) {
        self.inner.lock().inbound.push_back(line.into());
    }

    pub fn push_json(&self, value: &serde_json::Value) {
        self.push_line(value.to_string());
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().inbound.len()
    }

    /// Commands sent so far, oldest first
    pub fn sent(&self) -> Vec<Command> {
        self.inner.lock().sent.clone()
    }

    pub fn open_count(&self) -> usize {
        self.inner.lock().open_count
    }

    /// Make `open` fail with `reason`, or succeed again with `None`
    pub fn refuse_open(&self, reason: Option<String>) {
        self.inner.lock().refuse_open = reason;
    }

    /// Make the next reads fail as if the cable were pulled
    pub fn fail_reads(&self, fail: bool) {
        self.inner.lock().fail_reads_after = fail.then_some(0);
    }

    /// Deliver `lines` more lines, then fail the read that wants another
    pub fn fail_reads_after(&self, lines: usize) {
        self.inner.lock().fail_reads_after = Some(lines);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.inner.lock().fail_sends = fail;
    }
}

#[async_trait]
impl Transport for MemoryLink {
    async fn open(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(reason) = inner.refuse_open.clone() {
            inner.open = false;
            return Err(MonitorError::Transport(reason));
        }
        inner.open = true;
        inner.open_count += 1;
        Ok(())
    }

    async fn read_lines(&mut self, max: usize, _timeout: Duration) -> ReadOutcome {
        let mut inner = self.inner.lock();
        if !inner.open {
            return ReadOutcome::failed(MonitorError::NotConnected);
        }
        let mut outcome = ReadOutcome::default();
        while outcome.lines.len() < max {
            if inner.fail_reads_after == Some(0) {
                inner.open = false;
                outcome.failure = Some(MonitorError::Transport("link lost".into()));
                break;
            }
            let Some(line) = inner.inbound.pop_front() else {
                break;
            };
            outcome.lines.push(line);
            if let Some(left) = inner.fail_reads_after.as_mut() {
                *left -= 1;
            }
        }
        outcome
    }

    async fn send(&mut self, command: &Command) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.open {
            return Err(MonitorError::NotConnected);
        }
        if inner.fail_sends {
            inner.open = false;
            return Err(MonitorError::Transport("write failed".into()));
        }
        inner.sent.push(command.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.lock().open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }
}

// ============================================================================
// SERIAL LINK
// ============================================================================

#[cfg(feature = "serial")]
mod serial {
    use super::{ReadOutcome, Transport};
    use crate::config::SerialConfig;
    use crate::error::{MonitorError, Result};
    use crate::telemetry::Command;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::io::{AsyncRead, AsyncWrite};
    use tokio_serial::{SerialPortBuilderExt, SerialStream};
    use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Framed};
    use tracing::{debug, info, warn};

    /// Newline-delimited JSON over a serial port
    pub struct SerialLink {
        settings: SerialConfig,
        framed: Option<Framed<SerialStream, AnyDelimiterCodec>>,
    }

    impl SerialLink {
        pub fn new(settings: SerialConfig) -> Self {
            Self {
                settings,
                framed: None,
            }
        }

        pub fn settings(&self) -> &SerialConfig {
            &self.settings
        }
    }

    // Controllers may send CRLF and the odd non-UTF-8 byte during reset.
    pub(super) fn frame_to_line(frame: &Bytes) -> String {
        String::from_utf8_lossy(frame).trim_end_matches('\r').to_string()
    }

    /// Read up to `max` frames from `slot`, dropping it if the stream fails
    pub(super) async fn drain_frames<T>(
        slot: &mut Option<Framed<T, AnyDelimiterCodec>>,
        max: usize,
        timeout: Duration,
    ) -> ReadOutcome
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut outcome = ReadOutcome::default();

        while outcome.lines.len() < max {
            let Some(framed) = slot.as_mut() else {
                outcome.failure = Some(MonitorError::NotConnected);
                break;
            };
            match tokio::time::timeout(timeout, framed.next()).await {
                Err(_) => break,
                Ok(None) => {
                    outcome.failure = Some(MonitorError::Transport("port closed".into()));
                    break;
                }
                Ok(Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded))) => {
                    outcome.discarded += 1;
                    warn!("Discarding line longer than the frame limit");
                    // A framed stream ends after any decode error. Rebuilding
                    // from parts keeps the port, the buffer and the codec,
                    // which skips the rest of the long line on its own.
                    if let Some(framed) = slot.take() {
                        *slot = Some(Framed::from_parts(framed.into_parts()));
                    }
                }
                Ok(Some(Err(e))) => {
                    outcome.failure = Some(MonitorError::Transport(e.to_string()));
                    break;
                }
                Ok(Some(Ok(frame))) => outcome.lines.push(frame_to_line(&frame)),
            }
        }

        if outcome.failure.is_some() && slot.take().is_some() {
            debug!("Link failed after {} line(s)", outcome.lines.len());
        }
        outcome
    }

    #[async_trait]
    impl Transport for SerialLink {
        async fn open(&mut self) -> Result<()> {
            self.framed = None;
            let stream = tokio_serial::new(&self.settings.port, self.settings.baud)
                .open_native_async()
                .map_err(|e| {
                    MonitorError::Transport(format!("{}: {}", self.settings.port, e))
                })?;

            // Most controllers reset when the port opens.
            tokio::time::sleep(Duration::from_millis(self.settings.settle_ms)).await;

            let codec = AnyDelimiterCodec::new_with_max_length(
                b"\n".to_vec(),
                b"\n".to_vec(),
                self.settings.max_line_len,
            );
            self.framed = Some(Framed::new(stream, codec));
            info!("Opened {} at {} baud", self.settings.port, self.settings.baud);
            Ok(())
        }

        async fn read_lines(&mut self, max: usize, timeout: Duration) -> ReadOutcome {
            drain_frames(&mut self.framed, max, timeout).await
        }

        async fn send(&mut self, command: &Command) -> Result<()> {
            let line = command.encode()?;
            let framed = self.framed.as_mut().ok_or(MonitorError::NotConnected)?;
            if let Err(e) = framed.send(line).await {
                self.framed = None;
                return Err(MonitorError::Transport(e.to_string()));
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            // Dropping the stream releases the port.
            if self.framed.take().is_some() {
                debug!("Closed {}", self.settings.port);
            }
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.framed.is_some()
        }

        fn describe(&self) -> String {
            format!("{} @ {} baud", self.settings.port, self.settings.baud)
        }

        fn apply_settings(&mut self, settings: &SerialConfig) {
            self.settings = settings.clone();
        }
    }
}
