//! The progress event streamed to callers (§3 *Event*, §6 *Event wire format*).
//!
//! `Event` is the only external view of a `WorkflowRun`'s state. The orchestrator is the sole
//! producer: no other component constructs one directly (§7 *Propagation policy*). Serialized to
//! the `text/event-stream` wire format as `data: <json>\n\n`; heartbeats are a bare `: heartbeat\n\n`
//! comment line with no JSON payload at all, represented here by [`Frame::Heartbeat`].

use serde::Serialize;
use serde_json::Value;

/// Which half of the pipeline an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Generation,
    Execution,
}

/// The lifecycle state an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Running,
    Info,
    Complete,
    Error,
}

/// A single record emitted to the caller's event stream.
///
/// Construction always goes through [`Event::running`], [`Event::info`], [`Event::complete`], or
/// [`Event::error`] so that `status` and the event's terminal payload stay consistent.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub stage: Stage,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub robot_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

impl Event {
    /// A non-terminal progress update.
    pub fn running(stage: Stage, progress: u8, message: impl Into<String>) -> Self {
        Event {
            stage,
            status: Status::Running,
            message: Some(message.into()),
            progress: Some(progress),
            log: None,
            robot_code: None,
            result: None,
            info: None,
        }
    }

    /// A cosmetic advisory event; progress is unchanged from the caller's perspective and carries
    /// a short rotating tip, never gating a state transition.
    pub fn advisory(stage: Stage, progress: u8, tip: impl Into<String>) -> Self {
        Event {
            stage,
            status: Status::Info,
            message: None,
            progress: Some(progress),
            log: None,
            robot_code: None,
            result: None,
            info: Some(tip.into()),
        }
    }

    /// A `running` event carrying a log line (used for Docker pull/build streaming).
    pub fn running_log(stage: Stage, progress: u8, log: impl Into<String>) -> Self {
        Event {
            stage,
            status: Status::Running,
            message: None,
            progress: Some(progress),
            log: Some(log.into()),
            robot_code: None,
            result: None,
            info: None,
        }
    }

    /// Terminal `generation.complete` carrying the produced script.
    pub fn generation_complete(robot_code: impl Into<String>) -> Self {
        Event {
            stage: Stage::Generation,
            status: Status::Complete,
            message: None,
            progress: Some(100),
            log: None,
            robot_code: Some(robot_code.into()),
            result: None,
            info: None,
        }
    }

    /// Terminal `execution.complete` carrying the structured run result.
    pub fn execution_complete(result: Value) -> Self {
        Event {
            stage: Stage::Execution,
            status: Status::Complete,
            message: None,
            progress: Some(100),
            log: None,
            robot_code: None,
            result: Some(result),
            info: None,
        }
    }

    /// A terminal error event for `stage`.
    pub fn error(stage: Stage, message: impl Into<String>) -> Self {
        Event {
            stage,
            status: Status::Error,
            message: Some(message.into()),
            progress: None,
            log: None,
            robot_code: None,
            result: None,
            info: None,
        }
    }

    /// True for any event that ends its stage (`complete` or `error`).
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, Status::Complete | Status::Error)
    }

    /// Render this event in SSE wire format: `data: <json>\n\n`.
    pub fn to_sse_frame(&self) -> String {
        format!(
            "data: {}\n\n",
            serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
        )
    }
}

/// The literal heartbeat comment line sent when the hand-off queue is empty and the producing
/// worker is still alive.
pub const HEARTBEAT_FRAME: &str = ": heartbeat\n\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_complete_serializes_robot_code() {
        let ev = Event::generation_complete("*** Settings ***\n");
        let frame = ev.to_sse_frame();
        assert!(frame.starts_with("data: "));
        assert!(frame.ends_with("\n\n"));
        assert!(frame.contains("\"robot_code\""));
        assert!(frame.contains("\"status\":\"complete\""));
    }

    #[test]
    fn error_event_has_no_progress_and_is_terminal() {
        let ev = Event::error(Stage::Execution, "docker unreachable");
        assert!(ev.is_terminal());
        assert!(ev.progress.is_none());
    }

    #[test]
    fn running_event_is_not_terminal() {
        let ev = Event::running(Stage::Generation, 30, "identifying elements");
        assert!(!ev.is_terminal());
    }
}
