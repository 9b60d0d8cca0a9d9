//! Error taxonomy shared by every rolewalk crate
//!
//! Per-attempt failures (`AssumeRoleFailed`) are recoverable and absorbed by
//! the parent retry loops. `NoWorkingParent` is terminal for a single
//! resolution. `ScopeViolation` stops a scan.

use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RolewalkError>;

/// One failed attempt to derive credentials through a candidate parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentFailure {
    /// Canonical ID of the parent that was tried
    pub parent: String,
    /// Rendered error from the attempt
    pub error: String,
}

impl fmt::Display for ParentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.parent, self.error)
    }
}

fn render_attempts(attempts: &[ParentFailure]) -> String {
    if attempts.is_empty() {
        return "no inbound parents".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors produced while discovering, assuming and persisting identities
#[derive(Debug, Error)]
pub enum RolewalkError {
    /// Malformed ARN
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Lookup of an ID the graph does not know
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// A single AssumeRole attempt failed
    #[error("AssumeRole {caller} -> {target} failed: {reason}")]
    AssumeRoleFailed {
        caller: String,
        target: String,
        reason: String,
    },

    /// Every inbound parent was tried and none could assume the target
    #[error("No working parent for {target}: {}", render_attempts(.attempts))]
    NoWorkingParent {
        target: String,
        attempts: Vec<ParentFailure>,
    },

    /// A candidate outside the configured scope reached the assumption stage
    #[error("Out of scope ARN reached the assume stage (this is a bug): {arn}")]
    ScopeViolation { arn: String },

    /// Malformed persisted graph
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A credential context outlived the graph it was registered in
    #[error("Identity graph has been dropped")]
    GraphDropped,

    /// Failure reported by an external service client
    #[error("Service error: {0}")]
    Service(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RolewalkError {
    /// Create an invalid identity error
    pub fn invalid_identity<S: Into<String>>(msg: S) -> Self {
        RolewalkError::InvalidIdentity(msg.into())
    }

    /// Create a node not found error
    pub fn node_not_found<S: Into<String>>(id: S) -> Self {
        RolewalkError::NodeNotFound(id.into())
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        RolewalkError::Serialization(msg.into())
    }

    /// Create a service error
    pub fn service<S: Into<String>>(msg: S) -> Self {
        RolewalkError::Service(msg.into())
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        RolewalkError::Configuration(msg.into())
    }

    /// Whether this error should stop a running scan
    pub fn is_fatal(&self) -> bool {
        matches!(self, RolewalkError::ScopeViolation { .. })
    }
}

impl From<serde_json::Error> for RolewalkError {
    fn from(err: serde_json::Error) -> Self {
        RolewalkError::Serialization(err.to_string())
    }
}
