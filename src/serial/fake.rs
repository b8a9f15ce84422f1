//! In-memory device double for offline use and tests.
//!
//! Speaks the same `valore=` line protocol as the firmware: `get`
//! replies with the stored parameter value (or the parameter name when
//! nothing is stored), `set` stores and acknowledges with `OK`.
//! Replies can be scripted per command, forced malformed, or replaced
//! with timeouts to exercise the client's retry path.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{Result, SerialError, SerialLink};

#[derive(Debug, Clone)]
pub enum FakeReply {
    Line(String),
    Timeout,
}

#[derive(Debug, Default)]
struct FakeState {
    writes: Vec<String>,
    answered: usize,
    scripted: VecDeque<FakeReply>,
    values: HashMap<String, String>,
    fail_params: HashSet<String>,
    always_malformed: bool,
    closed: bool,
}

/// Cloning shares the underlying state, so a test can keep one handle
/// for inspection while the client owns the other.
#[derive(Clone, Default)]
pub struct FakeDeviceLink {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDeviceLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that never produces a parseable reply.
    pub fn malformed() -> Self {
        let link = Self::new();
        link.state.lock().unwrap().always_malformed = true;
        link
    }

    /// Store a parameter value returned by subsequent `get` commands.
    pub fn with_value(self, name: &str, value: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .values
            .insert(name.to_string(), value.to_string());
        self
    }

    /// Commands naming this parameter get malformed replies.
    pub fn fail_on(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_params
            .insert(name.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().fail_params.clear();
    }

    /// Queue a raw reply consumed (in order) instead of the computed one.
    pub fn push_reply(&self, line: &str) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .push_back(FakeReply::Line(line.to_string()));
    }

    /// Queue a read timeout in place of the next reply.
    pub fn push_timeout(&self) {
        self.state
            .lock()
            .unwrap()
            .scripted
            .push_back(FakeReply::Timeout);
    }

    /// Every line the client has written, oldest first.
    pub fn writes(&self) -> Vec<String> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().unwrap().writes.len()
    }

    /// Value most recently stored by a `set` command.
    pub fn stored(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().values.get(name).cloned()
    }

    fn compute_reply(state: &mut FakeState, command: &str) -> FakeReply {
        let mut words = command.split_whitespace();
        let verb = words.next().unwrap_or_default();
        let name = words.next().unwrap_or_default();

        if state.always_malformed || state.fail_params.contains(name) {
            return FakeReply::Line("ERROR".to_string());
        }

        match verb {
            "get" => {
                let value = state
                    .values
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| name.to_string());
                FakeReply::Line(format!("valore={}", value))
            }
            "set" => {
                let value: String = words.collect::<Vec<_>>().join(" ");
                state.values.insert(name.to_string(), value);
                FakeReply::Line("valore=OK".to_string())
            }
            _ => FakeReply::Line("ERROR".to_string()),
        }
    }
}

#[async_trait]
impl SerialLink for FakeDeviceLink {
    async fn write_line(&mut self, line: &[u8]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(SerialError::PortClosed);
        }
        state
            .writes
            .push(String::from_utf8_lossy(line).trim_end().to_string());
        Ok(())
    }

    async fn read_line(&mut self) -> Result<Vec<u8>> {
        // Let concurrent callers make progress between write and read.
        tokio::task::yield_now().await;

        let reply = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(SerialError::PortClosed);
            }
            if state.answered < state.writes.len() {
                let command = state.writes[state.answered].clone();
                state.answered += 1;
                match state.scripted.pop_front() {
                    Some(reply) => reply,
                    None => Self::compute_reply(&mut state, &command),
                }
            } else {
                match state.scripted.pop_front() {
                    Some(reply) => reply,
                    None => return Err(SerialError::Timeout),
                }
            }
        };

        match reply {
            FakeReply::Line(line) => Ok(line.into_bytes()),
            FakeReply::Timeout => Err(SerialError::Timeout),
        }
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}
