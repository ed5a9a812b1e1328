//! Scripted transport simulating a remote device for dialog tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use viaduct::SessionIo;

#[derive(Default)]
struct ScriptState {
    pending: VecDeque<Vec<u8>>,
    rules: VecDeque<(String, Vec<Vec<u8>>)>,
    written: String,
    closed: bool,
}

/// A fake remote side: responds to written triggers with scripted
/// output, in order. Rules fire once each; reads block until output is
/// due (the caller's expect timeout is the way out).
#[derive(Clone, Default)]
pub struct ScriptedDevice {
    state: Arc<Mutex<ScriptState>>,
    notify: Arc<Notify>,
}

impl ScriptedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue output available before any write happens (banners).
    pub fn push(&self, data: &str) {
        let mut state = self.state.lock().unwrap();
        state.pending.push_back(data.as_bytes().to_vec());
        self.notify.notify_waiters();
    }

    /// Respond with `responses` once `trigger` has been written. Rules
    /// are consumed strictly in the order they were added.
    pub fn on(&self, trigger: &str, responses: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.rules.push_back((
            trigger.to_string(),
            responses.iter().map(|r| r.as_bytes().to_vec()).collect(),
        ));
    }

    /// Everything written and not yet claimed by a rule.
    #[allow(dead_code)]
    pub fn unclaimed_input(&self) -> String {
        self.state.lock().unwrap().written.clone()
    }
}

#[async_trait]
impl SessionIo for ScriptedDevice {
    async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if let Some(mut chunk) = state.pending.pop_front() {
                    let n = chunk.len().min(buf.len());
                    let rest = chunk.split_off(n);
                    buf[..n].copy_from_slice(&chunk);
                    if !rest.is_empty() {
                        state.pending.push_front(rest);
                    }
                    return Ok(n);
                }
                if state.closed {
                    return Ok(0);
                }
            }
            self.notify.notified().await;
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.written.push_str(&String::from_utf8_lossy(data));
        loop {
            let end = {
                let Some((trigger, _)) = state.rules.front() else {
                    break;
                };
                match state.written.find(trigger.as_str()) {
                    Some(position) => position + trigger.len(),
                    None => break,
                }
            };
            state.written.drain(..end);
            if let Some((_, responses)) = state.rules.pop_front() {
                for response in responses {
                    state.pending.push_back(response);
                }
            }
            self.notify.notify_waiters();
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        !self.state.lock().unwrap().closed
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
        self.notify.notify_waiters();
    }
}
