//! Debug Sinks
//!
//! Optional observers of raw wire traffic. The controller hands every sent
//! and received text to each installed sink; the sink decides what to keep
//! according to its [`DebugWhen`] policy.

use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which traffic a sink records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugWhen {
    /// Sent and received messages.
    All,
    /// Only messages the client sends.
    #[default]
    Response,
    /// Nothing.
    Never,
}

impl DebugWhen {
    /// Whether outbound messages are recorded.
    pub fn records_send(self) -> bool {
        matches!(self, DebugWhen::All | DebugWhen::Response)
    }

    /// Whether inbound messages are recorded.
    pub fn records_recv(self) -> bool {
        self == DebugWhen::All
    }
}

impl FromStr for DebugWhen {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(DebugWhen::All),
            "response" => Ok(DebugWhen::Response),
            "never" => Ok(DebugWhen::Never),
            other => Err(format!("unknown debug setting: {}", other)),
        }
    }
}

/// Observer of raw wire traffic.
pub trait DebugSink: Send + Sync {
    /// Called with every text the client sends.
    fn on_send(&self, message: &str);

    /// Called with every text the client receives.
    fn on_recv(&self, message: &str);
}

/// Logs traffic through `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink {
    when: DebugWhen,
}

impl TracingSink {
    /// Sink recording according to `when`.
    pub fn new(when: DebugWhen) -> Self {
        Self { when }
    }
}

impl DebugSink for TracingSink {
    fn on_send(&self, message: &str) {
        if self.when.records_send() {
            debug!(target: "arcanar_client::wire", "Sending: {}", message);
        }
    }

    fn on_recv(&self, message: &str) {
        if self.when.records_recv() {
            debug!(target: "arcanar_client::wire", "Received: {}", message);
        }
    }
}

/// Direction of a logged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Client to server.
    Send,
    /// Server to client.
    Recv,
}

/// One logged message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Direction.
    #[serde(rename = "type")]
    pub direction: Direction,
    /// Raw wire text.
    #[serde(rename = "msg")]
    pub message: String,
    /// When it was recorded.
    pub at: DateTime<Utc>,
}

/// In-memory message log.
#[derive(Debug)]
pub struct MessageLog {
    when: DebugWhen,
    entries: Mutex<Vec<LogEntry>>,
}

impl MessageLog {
    /// Log recording both directions.
    pub fn new() -> Self {
        Self::with_policy(DebugWhen::All)
    }

    /// Log recording according to `when`.
    pub fn with_policy(when: DebugWhen) -> Self {
        Self {
            when,
            entries: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, direction: Direction, message: &str) {
        self.lock().push(LogEntry {
            direction,
            message: message.to_string(),
            at: Utc::now(),
        });
    }

    /// Copy of all entries so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if nothing was logged.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Export the log as a JSON array.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&*self.lock())
    }
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugSink for MessageLog {
    fn on_send(&self, message: &str) {
        if self.when.records_send() {
            self.push(Direction::Send, message);
        }
    }

    fn on_recv(&self, message: &str) {
        if self.when.records_recv() {
            self.push(Direction::Recv, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policies() {
        assert!(DebugWhen::All.records_send());
        assert!(DebugWhen::All.records_recv());
        assert!(DebugWhen::Response.records_send());
        assert!(!DebugWhen::Response.records_recv());
        assert!(!DebugWhen::Never.records_send());
        assert!(!DebugWhen::Never.records_recv());
        assert_eq!(DebugWhen::default(), DebugWhen::Response);
    }

    #[test]
    fn test_parse() {
        assert_eq!("ALL".parse::<DebugWhen>(), Ok(DebugWhen::All));
        assert_eq!(" never ".parse::<DebugWhen>(), Ok(DebugWhen::Never));
        assert!("sometimes".parse::<DebugWhen>().is_err());
    }

    #[test]
    fn test_message_log_default_records_everything() {
        let log = MessageLog::default();
        log.on_recv(r#"{"request":"shutdown"}"#);
        log.on_send(r#"{"thread":2}"#);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_message_log_records_in_order() {
        let log = MessageLog::new();
        log.on_recv(r#"{"request":"init"}"#);
        log.on_send(r#"{"action_type":"buy","thread":1}"#);

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].direction, Direction::Recv);
        assert_eq!(entries[1].direction, Direction::Send);
        assert!(entries[0].at <= entries[1].at);
    }

    #[test]
    fn test_message_log_respects_policy() {
        let log = MessageLog::with_policy(DebugWhen::Response);
        log.on_recv("in");
        log.on_send("out");
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries()[0].message, "out");

        let silent = MessageLog::with_policy(DebugWhen::Never);
        silent.on_send("out");
        assert!(silent.is_empty());
    }

    #[test]
    fn test_export_json() {
        let log = MessageLog::new();
        log.on_send("hello");
        let exported: serde_json::Value = serde_json::from_str(&log.to_json().unwrap()).unwrap();
        assert_eq!(exported[0]["type"], "send");
        assert_eq!(exported[0]["msg"], "hello");
        assert!(exported[0]["at"].is_string());
    }
}
