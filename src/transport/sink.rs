// Network log sinks: where instrumented calls are written to.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::time;

#[derive(Debug, Clone, PartialEq)]
pub enum CallPhase {
    Sent,
    Completed { status: u16 },
    Failed { error: String },
}

/// One observation of an outbound call.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub at: DateTime<Local>,
    pub method: String,
    pub url: String,
    pub phase: CallPhase,
    /// Wall-clock time since send, one decimal. Unset for `Sent`.
    pub elapsed_ms: Option<f64>,
}

impl CallRecord {
    pub fn sent(method: &str, url: &str) -> Self {
        Self {
            at: Local::now(),
            method: method.to_string(),
            url: url.to_string(),
            phase: CallPhase::Sent,
            elapsed_ms: None,
        }
    }

    pub fn completed(method: &str, url: &str, status: u16, elapsed_ms: f64) -> Self {
        Self {
            at: Local::now(),
            method: method.to_string(),
            url: url.to_string(),
            phase: CallPhase::Completed { status },
            elapsed_ms: Some(elapsed_ms),
        }
    }

    pub fn failed(method: &str, url: &str, error: &str, elapsed_ms: f64) -> Self {
        Self {
            at: Local::now(),
            method: method.to_string(),
            url: url.to_string(),
            phase: CallPhase::Failed {
                error: error.to_string(),
            },
            elapsed_ms: Some(elapsed_ms),
        }
    }

    /// Full log line: `[HH:MM:SS.mmm] [label] <record>`.
    pub fn line(&self, label: &str) -> String {
        format!("[{}] [{}] {}", time::stamp(&self.at), label, self)
    }
}

impl fmt::Display for CallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = self.elapsed_ms.unwrap_or_default();
        match &self.phase {
            CallPhase::Sent => write!(f, "→ {} {}", self.method, self.url),
            CallPhase::Completed { status } => {
                write!(f, "← {} {}  {}  {:.1}ms", self.method, self.url, status, elapsed)
            }
            CallPhase::Failed { error } => write!(
                f,
                "× {} {}  ERR  {:.1}ms  {}",
                self.method, self.url, elapsed, error
            ),
        }
    }
}

/// Observable sink for instrumented calls. Must not block.
pub trait CallSink: Send + Sync {
    fn record(&self, record: &CallRecord);
}

/// Writes every call to the structured log.
pub struct TracingSink {
    label: String,
}

impl TracingSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

impl CallSink for TracingSink {
    fn record(&self, record: &CallRecord) {
        let line = record.line(&self.label);
        match &record.phase {
            CallPhase::Sent => debug!(
                component = "transport",
                event = "sent",
                method = %record.method,
                url = %record.url,
                "{}", line
            ),
            CallPhase::Completed { status } => info!(
                component = "transport",
                event = "completed",
                method = %record.method,
                url = %record.url,
                status = *status,
                elapsed_ms = record.elapsed_ms.unwrap_or_default(),
                "{}", line
            ),
            CallPhase::Failed { error } => warn!(
                component = "transport",
                event = "failed",
                method = %record.method,
                url = %record.url,
                error = %error,
                elapsed_ms = record.elapsed_ms.unwrap_or_default(),
                "{}", line
            ),
        }
    }
}

/// Keeps records in memory; used by tests and by the CLI network log dump.
pub struct MemorySink {
    label: String,
    records: Mutex<Vec<CallRecord>>,
}

impl MemorySink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .map(|r| r.line(&self.label))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl CallSink for MemorySink {
    fn record(&self, record: &CallRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Forwards each record to every inner sink in order.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn CallSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn CallSink>>) -> Self {
        Self { sinks }
    }
}

impl CallSink for FanoutSink {
    fn record(&self, record: &CallRecord) {
        for sink in &self.sinks {
            sink.record(record);
        }
    }
}
