//! PTY controller: the mediator between the dialog engine and the child
//! process performing transport.
//!
//! The controller owns one child process at a time, accumulates its
//! output in a search-window buffer, and offers the expect/send
//! primitives every state machine in the crate is built on. The byte
//! source is abstracted behind [`SessionIo`] so a scripted transport can
//! be attached for tests or custom transports.

mod buffer;
mod pty;
mod transcript;

pub use pty::NativePty;
pub use transcript::{SharedWriter, Transcript};

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::time::Instant;

use buffer::ExpectBuffer;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fsm::FsmEvent;
use crate::util::levenshtein_distance;

/// Byte-stream transport under the controller.
///
/// The production implementation is a [`NativePty`] child; tests attach
/// scripted implementations.
#[async_trait]
pub trait SessionIo: Send {
    /// Read one chunk; `Ok(0)` means end of stream.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole payload.
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Whether the transport is still up.
    fn is_alive(&self) -> bool;

    /// Tear the transport down.
    fn close(&mut self);
}

/// A spawned protocol child as a [`SessionIo`].
pub struct PtySession {
    pty: NativePty,
}

#[async_trait]
impl SessionIo for PtySession {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.pty.read_chunk(buf).await {
            // A hangup on the slave side is an ordinary end of stream.
            Err(ref e) if NativePty::is_hangup(e) => Ok(0),
            other => other,
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.pty.write_all(data).await
    }

    fn is_alive(&self) -> bool {
        self.pty.is_alive()
    }

    fn close(&mut self) {
        self.pty.close();
    }
}

/// Wrapper around the child process session.
pub struct Controller {
    config: Arc<Config>,
    session: Option<Box<dyn SessionIo>>,
    buffer: ExpectBuffer,
    before: String,
    after: String,
    host: String,
    transcript: Option<Transcript>,
    /// Session-level connectivity, independent of any device state.
    pub connected: bool,
}

impl Controller {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            buffer: ExpectBuffer::new(config.search_window),
            config,
            session: None,
            before: String::new(),
            after: String::new(),
            host: String::new(),
            transcript: None,
            connected: false,
        }
    }

    /// Hostname used in error messages, updated per hop by the chain.
    pub fn set_host(&mut self, host: &str) {
        self.host = host.to_string();
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Tee all session output into a transcript sink.
    pub fn set_transcript(&mut self, transcript: Transcript) {
        self.transcript = Some(transcript);
    }

    /// Attach an already-established transport.
    ///
    /// This is the seam for scripted transports in tests and for callers
    /// bringing their own transport.
    pub fn attach_session(&mut self, session: Box<dyn SessionIo>) {
        self.buffer.clear();
        self.session = Some(session);
        self.connected = true;
    }

    /// Text read before the last matched pattern.
    pub fn before(&self) -> &str {
        &self.before
    }

    /// Text matched by the last pattern.
    pub fn after(&self) -> &str {
        &self.after
    }

    /// Whether a live child is attached.
    pub fn is_alive(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_alive())
    }

    pub fn is_connected(&self) -> bool {
        self.connected && self.is_alive()
    }

    /// Establish the session for the given protocol command.
    ///
    /// If a live session already exists the command is typed into it (the
    /// next hop is reached from inside the previous one) and its echo
    /// verified; otherwise a child process is spawned on a fresh PTY.
    pub async fn spawn_session(&mut self, command: &str) -> Result<()> {
        if self.is_alive() {
            debug!("executing command: '{}'", command);
            self.send(command).await?;
            self.expect_exact(command, Duration::from_secs(20)).await?;
            self.sendline("").await?;
            return Ok(());
        }

        debug!("spawning command: '{}'", command);
        let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        let pty = NativePty::spawn(&argv, 160, 1024)?;
        self.attach_session(Box::new(PtySession { pty }));
        Ok(())
    }

    /// Write text to the child, honoring the configured send delay.
    pub async fn send(&mut self, data: &str) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::connection("No session", Some(&self.host)))?;
        tokio::time::sleep(self.config.delay_before_send).await;
        session.write_all(data.as_bytes()).await?;
        Ok(())
    }

    /// Write a line to the child.
    pub async fn sendline(&mut self, line: &str) -> Result<()> {
        self.send(&format!("{}\n", line)).await
    }

    /// Send a command: type it, wait for the remote echo, then commit it
    /// with a newline. A missing echo is tolerated.
    pub async fn send_command(&mut self, cmd: &str) -> Result<()> {
        self.send(cmd).await?;
        match self.expect_exact(cmd, Duration::from_secs(15)).await {
            Ok(()) | Err(Error::ConnectionTimeout(_)) => {}
            Err(e) => return Err(e),
        }
        self.sendline("").await
    }

    /// Wait for the first of the given events.
    ///
    /// Returns the index of the event that fired. `before`/`after` are
    /// updated on a pattern match. A timeout or end of stream is returned
    /// as the index of the corresponding sentinel when present among the
    /// events, and as an error otherwise.
    pub async fn expect(
        &mut self,
        events: &[FsmEvent],
        timeout: Duration,
        window: Option<usize>,
    ) -> Result<usize> {
        let candidates: Vec<(usize, &regex::Regex)> = events
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.pattern().map(|re| (i, re)))
            .collect();
        let timeout_event = events.iter().position(|e| matches!(e, FsmEvent::Timeout));
        let eof_event = events.iter().position(|e| matches!(e, FsmEvent::Eof));

        let deadline = Instant::now() + timeout;
        let mut read_buf = vec![0u8; self.config.read_buffer_size];
        loop {
            if let Some((index, start, end)) = self.buffer.find_first(&candidates, window) {
                self.before = self.buffer.consume(start);
                self.after = self.buffer.consume(end - start);
                return Ok(index);
            }

            let Some(session) = self.session.as_mut() else {
                return self.at_eof(eof_event);
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.at_timeout(timeout_event, timeout);
            }

            match tokio::time::timeout(remaining, session.read_chunk(&mut read_buf)).await {
                Err(_elapsed) => return self.at_timeout(timeout_event, timeout),
                Ok(Ok(0)) => return self.at_eof(eof_event),
                Ok(Ok(n)) => {
                    if let Some(ref mut transcript) = self.transcript {
                        transcript.write(&read_buf[..n]);
                    }
                    self.buffer.extend(&read_buf[..n]);
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    fn at_timeout(&mut self, timeout_event: Option<usize>, timeout: Duration) -> Result<usize> {
        match timeout_event {
            Some(index) => {
                self.before = self.buffer.as_str().to_string();
                self.after.clear();
                Ok(index)
            }
            None => Err(Error::connection_timeout(
                format!("Timeout waiting for pattern after {:?}", timeout),
                Some(&self.host),
            )),
        }
    }

    fn at_eof(&mut self, eof_event: Option<usize>) -> Result<usize> {
        self.connected = false;
        match eof_event {
            Some(index) => {
                self.before = self.buffer.take();
                self.after.clear();
                Ok(index)
            }
            None => Err(Error::connection(
                "Session closed unexpectedly",
                Some(&self.host),
            )),
        }
    }

    /// Wait for one pattern.
    pub async fn expect_pattern(&mut self, pattern: regex::Regex, timeout: Duration) -> Result<()> {
        self.expect(&[FsmEvent::Pattern(pattern)], timeout, None)
            .await
            .map(|_| ())
    }

    /// Wait for an exact substring (typically a command echo).
    pub async fn expect_exact(&mut self, needle: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut read_buf = vec![0u8; self.config.read_buffer_size];
        loop {
            if let Some((start, end)) = self.buffer.find_exact(needle, None) {
                self.before = self.buffer.consume(start);
                self.after = self.buffer.consume(end - start);
                return Ok(());
            }

            let Some(session) = self.session.as_mut() else {
                return Err(Error::connection(
                    "Session closed unexpectedly",
                    Some(&self.host),
                ));
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::connection_timeout(
                    format!("Timeout waiting for '{}'", needle),
                    Some(&self.host),
                ));
            }

            match tokio::time::timeout(remaining, session.read_chunk(&mut read_buf)).await {
                Err(_elapsed) => {
                    return Err(Error::connection_timeout(
                        format!("Timeout waiting for '{}'", needle),
                        Some(&self.host),
                    ));
                }
                Ok(Ok(0)) => {
                    self.connected = false;
                    return Err(Error::connection(
                        "Session closed unexpectedly",
                        Some(&self.host),
                    ));
                }
                Ok(Ok(n)) => {
                    if let Some(ref mut transcript) = self.transcript {
                        transcript.write(&read_buf[..n]);
                    }
                    self.buffer.extend(&read_buf[..n]);
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Read back whatever the device prints, stopping once the stream
    /// goes quiet.
    ///
    /// The timing model follows pxssh: a generous window for the first
    /// byte, a short inter-character window afterwards, and an overall
    /// cap, all scaled by `multiplier`.
    pub async fn try_read_prompt(&mut self, multiplier: f64) -> Result<String> {
        let first_char_timeout = Duration::from_secs_f64(multiplier * 2.0);
        let inter_char_timeout = Duration::from_secs_f64(multiplier * 0.4);
        let total_timeout = Duration::from_secs_f64(multiplier * 4.0);

        let mut prompt = String::new();
        let mut timeout = first_char_timeout;
        let begin = Instant::now();
        let mut read_buf = vec![0u8; 256];

        while begin.elapsed() < total_timeout {
            let Some(session) = self.session.as_mut() else {
                break;
            };
            match tokio::time::timeout(timeout, session.read_chunk(&mut read_buf)).await {
                Err(_elapsed) => break,
                Ok(Ok(0)) => {
                    self.connected = false;
                    return Err(Error::connection("Session disconnected", Some(&self.host)));
                }
                Ok(Ok(n)) => {
                    if let Some(ref mut transcript) = self.transcript {
                        transcript.write(&read_buf[..n]);
                    }
                    let cleaned = strip_ansi_escapes::strip(&read_buf[..n]);
                    let text = String::from_utf8_lossy(&cleaned);
                    if text.chars().any(|c| c != '\r' && c != '\n') {
                        timeout = inter_char_timeout;
                    }
                    prompt.push_str(&text);
                }
                Ok(Err(e)) => return Err(e.into()),
            }
        }

        Ok(prompt.trim().to_string())
    }

    /// Detect the prompt by pressing enter twice and comparing the
    /// responses.
    ///
    /// The two readbacks are compared by normalized Levenshtein distance;
    /// below 0.3 the last non-empty line is accepted as the prompt. Up to
    /// ten attempts are made with the settle time growing by 1.2 per
    /// attempt.
    pub async fn detect_prompt(&mut self) -> Result<Option<String>> {
        let mut sync_multiplier = 4.0;
        self.sendline("").await?;
        self.try_read_prompt(sync_multiplier).await?;

        let max_attempts = 10;
        for attempt in 1..=max_attempts {
            debug!("detecting prompt, attempt ({}/{})", attempt, max_attempts);

            self.sendline("").await?;
            let first = self.try_read_prompt(sync_multiplier).await?;

            self.sendline("").await?;
            let second = self.try_read_prompt(sync_multiplier).await?;

            let distance = levenshtein_distance(&first, &second);
            debug!("LD={},MP={}", distance, sync_multiplier);
            sync_multiplier *= 1.2;
            if first.is_empty() {
                continue;
            }

            if (distance as f64) / (first.len() as f64) < 0.3 {
                let prompt = second
                    .lines()
                    .rev()
                    .find(|line| !line.trim().is_empty())
                    .unwrap_or("")
                    .trim()
                    .to_string();
                if prompt.is_empty() {
                    continue;
                }
                debug!("detected prompt: '{}'", prompt);

                // Resynchronize on the detected prompt.
                let resync =
                    regex::Regex::new(&format!(r"(\r\n|\n\r|\n){}", regex::escape(&prompt)))?;
                self.sendline("").await?;
                self.expect_pattern(resync, Duration::from_secs(10)).await?;
                return Ok(Some(prompt));
            }
        }

        Ok(None)
    }

    /// Close the child process, releasing any pending expect.
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("disconnecting the session");
            session.close();
        }
        self.connected = false;
        self.buffer.clear();
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("host", &self.host)
            .field("connected", &self.connected)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}
