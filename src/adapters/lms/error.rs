//! Error taxonomy for the LMS CLI session layer

use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the connection, codec, parser, registry and dispatcher.
///
/// Errors propagate unchanged up to the HTTP layer, which owns the mapping to
/// status codes.
#[derive(Debug, Error)]
pub enum LmsError {
    /// Transport unreachable, refused, or lost after the single reconnect attempt
    #[error("LMS connection error: {0}")]
    Connection(String),

    /// Malformed line framing, escaping, or reply shape
    #[error("LMS protocol error: {0}")]
    Protocol(String),

    /// No reply within the configured I/O bound
    #[error("LMS did not reply within {0:?}")]
    Timeout(Duration),

    /// Player identifier matches neither a name nor a native id
    #[error("Player not found: {0}")]
    NotFound(String),

    /// Action name is not in the dispatch table
    #[error("Unknown action: {0}")]
    UnknownAction(String),
}

impl LmsError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub(crate) fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, LmsError>;
