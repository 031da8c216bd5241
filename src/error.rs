//! Error types for the MTConnect protocol client.
//!
//! Every failure the client can hit is an [`AgentError`]. The monitoring loop
//! never looks at individual variants when deciding what to do next; it asks
//! [`AgentError::failure_kind`] for one of four classes and feeds that into the
//! retry table in [`crate::retry`].
//!
//! ## Error Categories
//!
//! - **Transport Errors**: connection failures, bad HTTP status, idle timeouts
//! - **Framing Errors**: the multipart stream cannot be decoded (missing boundary,
//!   missing `Content-Length`)
//! - **Document Errors**: a body is not valid JSON or does not match the schema
//! - **Session Discontinuity**: the agent restarted (`instanceId` changed)
//! - **Probe Errors**: the device model could not be obtained
//!
//! ## Recovery and Retry
//!
//! ```rust
//! use mtconnect_stream::{AgentError, FailureKind};
//!
//! let error = AgentError::connection_failed("agent refused connection");
//! assert!(error.is_retryable());
//! assert_eq!(error.failure_kind(), FailureKind::Transient);
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::time::Duration;
use thiserror::Error;

use crate::framing::FramingError;

/// Result type alias for client operations.
pub type Result<T, E = AgentError> = std::result::Result<T, E>;

/// How the monitoring loop reacts to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Discard the attempt, wait, take a fresh snapshot.
    Transient,
    /// The stream cannot be framed; give up on streaming for this session.
    Framing,
    /// The agent restarted; the cursor is void.
    Restart,
    /// The device model could not be obtained; probe again.
    Probe,
}

/// Main error type for client operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AgentError {
    #[error("Request to {url} failed: {reason}")]
    Http {
        url: String,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Agent answered {url} with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Stream framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Document does not match schema: {reason}")]
    Schema { reason: String },

    #[error("Unsupported JSON document version {found}")]
    UnsupportedVersion { found: u64 },

    #[error("Agent restarted: instance {previous} replaced by {current}")]
    StreamRestart { previous: u64, current: u64 },

    #[error("Agent reported {code}: {message}")]
    Agent { code: String, message: String },

    #[error("Cannot probe agent: {reason}")]
    Probe {
        reason: String,
        #[source]
        source: Option<Box<AgentError>>,
    },

    #[error("Invalid configuration: {details}")]
    Config { details: String },
}

impl AgentError {
    /// Classify this error for the retry table.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AgentError::Framing(_) => FailureKind::Framing,
            AgentError::StreamRestart { .. } => FailureKind::Restart,
            AgentError::Probe { .. } | AgentError::UnsupportedVersion { .. } => FailureKind::Probe,
            AgentError::Http { .. }
            | AgentError::Status { .. }
            | AgentError::Timeout { .. }
            | AgentError::Parse { .. }
            | AgentError::Schema { .. }
            | AgentError::Agent { .. }
            | AgentError::Config { .. } => FailureKind::Transient,
        }
    }

    /// Returns whether repeating the same request may succeed.
    ///
    /// Framing violations and restarts are recoverable, but not by repeating
    /// the request unchanged, so they report `false` here.
    pub fn is_retryable(&self) -> bool {
        match self {
            AgentError::Http { .. } => true,
            AgentError::Status { status, .. } => *status >= 500 || *status == 429,
            AgentError::Timeout { .. } => true,
            AgentError::Parse { .. } => true,
            AgentError::Agent { .. } => true,
            AgentError::Probe { .. } => true,
            AgentError::Framing(_) => false,
            AgentError::Schema { .. } => false,
            AgentError::UnsupportedVersion { .. } => false,
            AgentError::StreamRestart { .. } => false,
            AgentError::Config { .. } => false,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            AgentError::Http { .. } => vec![
                "Check the agent is running and reachable",
                "Verify the base URL and port",
                "Check proxies or firewalls between client and agent",
            ],
            AgentError::Status { .. } => vec![
                "Verify the request path and device name",
                "Check the agent log for the rejected request",
            ],
            AgentError::Timeout { .. } => vec![
                "Increase streaming_timeout_ms",
                "Verify the agent heartbeat is shorter than the timeout",
            ],
            AgentError::Framing(_) => vec![
                "Check intermediaries are not rewriting the multipart response",
                "Set use_polling to skip streaming for this agent",
            ],
            AgentError::Parse { .. } => vec![
                "Verify the agent serves JSON for Accept: application/json",
                "Check the agent JSON version setting",
            ],
            AgentError::Schema { .. } => vec![
                "Check the agent JSON version matches the probed version",
                "Verify the document against the MTConnect schema",
            ],
            AgentError::UnsupportedVersion { .. } => {
                vec!["Configure the agent for JSON version 1 or 2"]
            }
            AgentError::StreamRestart { .. } => vec![
                "No action needed, the client re-baselines from a fresh snapshot",
            ],
            AgentError::Agent { .. } => vec![
                "Check the data item selector matches the probed device",
                "A cursor outside the agent buffer is repaired by the next snapshot",
            ],
            AgentError::Probe { .. } => vec![
                "Check the agent is running and reachable",
                "Verify the probe document is JSON",
            ],
            AgentError::Config { .. } => vec![
                "Check configuration values are positive",
                "Verify the YAML field names",
            ],
        }
    }

    /// Helper constructor for connection errors.
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        AgentError::Http { url: String::new(), reason: reason.into(), source: None }
    }

    /// Helper constructor for request errors with source.
    pub fn request_failed(
        url: impl Into<String>,
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        AgentError::Http { url: url.into(), reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for document parse errors.
    pub fn parse_error(context: impl Into<String>, details: impl Into<String>) -> Self {
        AgentError::Parse { context: context.into(), details: details.into() }
    }

    /// Helper constructor for schema violations.
    pub fn schema_error(reason: impl Into<String>) -> Self {
        AgentError::Schema { reason: reason.into() }
    }

    /// Wrap a failure that happened while probing.
    pub fn probe_failed(reason: impl Into<String>, source: Option<AgentError>) -> Self {
        AgentError::Probe { reason: reason.into(), source: source.map(Box::new) }
    }

    /// Helper constructor for configuration errors.
    pub fn config_error(details: impl Into<String>) -> Self {
        AgentError::Config { details: details.into() }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Parse { context: "JSON document".to_string(), details: err.to_string() }
    }
}
