//! Crate-wide error boundary.
//!
//! Every fallible public function in this crate returns `Result<T, PipelineError>`. The variants
//! mirror the error taxonomy described for the orchestrator: input errors never persist run
//! state, generation/execution errors carry a best-available message, and infrastructure errors
//! describe an unreachable collaborator (Docker, the on-disk stores). Internal component failures
//! that should *not* surface to the caller (C3's context-optimizer degradation, for instance) are
//! logged and absorbed rather than converted into a `PipelineError` at all — see
//! [`crate::context_optimizer`].

use std::error::Error as StdError;
use std::fmt;

/// The single error type threaded through every fallible public function in this crate.
///
/// Converted into an [`crate::event::Event`] with `status: "error"` at exactly one place: the
/// orchestrator's event-emission boundary. Nothing else in the crate constructs an `Event` from
/// an error directly.
#[derive(Debug)]
pub enum PipelineError {
    /// Missing query, empty script, unknown model — surfaced with an explicit user message and
    /// no run state persisted.
    Input(String),
    /// Agent runner failure, post-processing failure, or a validator `valid: false` verdict.
    Generation(String),
    /// Image provisioning failure, container creation failure, or a run that exited without
    /// producing artifacts.
    Execution(String),
    /// Docker unreachable, vector store unreachable, or any other collaborator outage.
    Infrastructure(String),
    /// An opaque lower-level error, preserved for logging but not re-classified.
    Other(Box<dyn StdError + Send + Sync>),
}

impl PipelineError {
    /// Short machine-stable tag used when serializing into an `Event`.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Input(_) => "input",
            PipelineError::Generation(_) => "generation",
            PipelineError::Execution(_) => "execution",
            PipelineError::Infrastructure(_) => "infrastructure",
            PipelineError::Other(_) => "other",
        }
    }

    /// The user-facing message, independent of the internal variant.
    pub fn message(&self) -> String {
        match self {
            PipelineError::Input(m)
            | PipelineError::Generation(m)
            | PipelineError::Execution(m)
            | PipelineError::Infrastructure(m) => m.clone(),
            PipelineError::Other(e) => e.to_string(),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())
    }
}

impl StdError for PipelineError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            PipelineError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<Box<dyn StdError + Send + Sync>> for PipelineError {
    fn from(e: Box<dyn StdError + Send + Sync>) -> Self {
        PipelineError::Other(e)
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Infrastructure(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Other(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(PipelineError::Input("x".into()).kind(), "input");
        assert_eq!(PipelineError::Execution("x".into()).kind(), "execution");
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = PipelineError::Infrastructure("docker unreachable".to_string());
        assert_eq!(err.to_string(), "infrastructure: docker unreachable");
    }
}
