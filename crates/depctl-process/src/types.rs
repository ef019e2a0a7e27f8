use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies a fan-out channel: `(operationKind, correlationId)`, e.g.
/// `("build", "<tag>")` or `("logs", "<containerId>")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub operation_kind: String,
    pub correlation_id: String,
}

impl CorrelationKey {
    pub fn new(operation_kind: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        CorrelationKey { operation_kind: operation_kind.into(), correlation_id: correlation_id.into() }
    }
}

/// One event forwarded to streaming subscribers. `stdout`/`stderr` chunks
/// are forwarded verbatim as they arrive; `end` is the terminal event
/// carrying the exit code and final buffered text; `error` reports a
/// runner-level failure (spawn failure, timeout, cancellation).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Stdout { text: String, at: DateTime<Utc> },
    Stderr { text: String, at: DateTime<Utc> },
    End { exit_code: i32, final_output: String, at: DateTime<Utc> },
    Error { message: String, at: DateTime<Utc> },
    /// Job Dispatcher progress (0..100), published over the same registry.
    Progress { percent: u8, message: Option<String>, at: DateTime<Utc> },
}

/// The result of [`crate::runner::run`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
    pub truncated: bool,
}
