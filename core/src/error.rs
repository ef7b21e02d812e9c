//! Error types for the query core.
//!
//! # Design
//! Per-operation failures are `QueryError` values. They are `Clone` because a
//! single batch-level failure (a broken envelope, a failed credential priming)
//! terminates every operation in the group with the same error.
//!
//! `execute_all` never returns a bare `QueryError`: it returns an
//! [`ExecuteError`] listing every failed operation once all of them reached a
//! terminal state.

use std::fmt;

/// Which error handler a failure is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The remote API answered with status >= 400.
    Server,
    /// Everything else: transport, decode, timeout, protocol, handler panic.
    Client,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Server => f.write_str("server"),
            ErrorClass::Client => f.write_str("client"),
        }
    }
}

/// Failure of a single operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// The request could not be completed at all.
    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),

    /// The remote API returned status >= 400. Decoding was skipped.
    #[error("HTTP {status}: {body}")]
    Server { status: u16, body: String },

    /// The body did not match the expected result type.
    #[error("decode failed: {0}")]
    Decode(String),

    /// A request body or batch envelope could not be serialized.
    #[error("encode failed: {0}")]
    Encode(String),

    /// The batch envelope did not line up with the dispatched group.
    #[error("batch protocol error: {0}")]
    Protocol(String),

    /// The operation did not reach a response within the configured limit.
    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The success handler panicked while consuming the decoded value.
    #[error("success handler for {label} panicked")]
    HandlerPanicked { label: String },

    /// A failure occurred but no handler was registered for its class.
    #[error("no {class} error handler registered: {source}")]
    Unhandled {
        class: ErrorClass,
        source: Box<QueryError>,
    },
}

impl QueryError {
    pub fn class(&self) -> ErrorClass {
        match self {
            QueryError::Server { .. } => ErrorClass::Server,
            QueryError::Unhandled { class, .. } => *class,
            _ => ErrorClass::Client,
        }
    }

    /// Status code of a server error, looking through `Unhandled`.
    pub fn status(&self) -> Option<u16> {
        match self {
            QueryError::Server { status, .. } => Some(*status),
            QueryError::Unhandled { source, .. } => source.status(),
            _ => None,
        }
    }

    pub fn is_unhandled(&self) -> bool {
        matches!(self, QueryError::Unhandled { .. })
    }
}

impl From<CodecError> for QueryError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Decode(msg) => QueryError::Decode(msg),
            CodecError::Encode(msg) => QueryError::Encode(msg),
        }
    }
}

/// Errors raised by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Network, DNS or TLS failure.
    #[error("network: {0}")]
    Network(String),

    /// The credential could not be acquired.
    #[error("credential: {0}")]
    Credential(String),

    /// The blocking worker running the call was lost.
    #[error("worker: {0}")]
    Join(String),
}

/// Errors raised by a [`Codec`](crate::codec::Codec) or request builder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("deserialization failed: {0}")]
    Decode(String),

    #[error("serialization failed: {0}")]
    Encode(String),
}

/// Invalid [`QueryConfig`](crate::config::QueryConfig).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("batch max_group_size must be at least 1")]
    ZeroGroupSize,

    #[error("batch endpoint must not be empty")]
    EmptyEndpoint,

    #[error("request_timeout_ms must be greater than zero")]
    ZeroTimeout,
}

/// One failed operation inside an `execute_all` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationFailure {
    /// Type name, field name or map key the operation was registered under.
    pub label: String,
    pub error: QueryError,
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label, self.error)
    }
}

/// Terminal outcome counts for one `execute_all` run.
///
/// `dispatched` is fixed before any operation runs; the other four always sum
/// to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteSummary {
    pub dispatched: usize,
    /// A success handler received the decoded value.
    pub delivered: usize,
    /// Status < 400 with an empty body; no handler invoked.
    pub empty: usize,
    /// Decoded but no success handler registered for the type.
    pub discarded: usize,
    pub failed: usize,
}

impl ExecuteSummary {
    pub fn terminal(&self) -> usize {
        self.delivered + self.empty + self.discarded + self.failed
    }
}

/// Aggregate failure of `execute_all`: at least one operation failed.
///
/// Returned only after every operation reached a terminal state, so
/// `summary` is complete.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} of {} operations failed", failures.len(), summary.dispatched)]
pub struct ExecuteError {
    pub summary: ExecuteSummary,
    pub failures: Vec<OperationFailure>,
}

impl ExecuteError {
    /// Failures that had no registered handler (configuration errors).
    pub fn unhandled(&self) -> impl Iterator<Item = &OperationFailure> {
        self.failures.iter().filter(|f| f.error.is_unhandled())
    }
}
