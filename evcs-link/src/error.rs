//! Error types for the charger link

use thiserror::Error;

use crate::grammar::LineKind;
use crate::types::{SessionId, Tag};

/// Session registry errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Session for tag {0} is already open")]
    DuplicateSession(Tag),

    #[error("No open session for tag {0}")]
    SessionNotFound(Tag),
}

/// Session lifecycle errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Session already opened")]
    AlreadyOpen,

    #[error("Session is not open")]
    NotOpen,
}

/// Structured frame decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Malformed request line: {0:?}")]
    BadRequestLine(String),

    #[error("Invalid Content-Length line: {0:?}")]
    BadContentLength(String),

    #[error("Malformed header line: {0:?}")]
    BadHeader(String),

    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    #[error("No open session with id {0}")]
    UnknownSession(SessionId),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Timeout waiting for frame headers")]
    Timeout,
}

/// Protocol violations seen by the engine. Logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Expected {expected} line, got {got:?}")]
    UnexpectedLine { expected: LineKind, got: String },

    #[error("Timeout waiting for {expected} line")]
    Timeout { expected: LineKind },
}

/// Errors from running the link
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid grammar pattern: {0}")]
    Grammar(#[from] regex::Error),

    #[error("Link task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
