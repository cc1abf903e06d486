//! Error types for store operations.

use std::io;

use thiserror::Error;

/// The record kinds the store manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Server,
    Layout,
    Template,
    Log,
    QueueItem,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Layout => write!(f, "layout"),
            Self::Template => write!(f, "template"),
            Self::Log => write!(f, "log"),
            Self::QueueItem => write!(f, "queue item"),
        }
    }
}

/// Top-level store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record of the given kind with the given id.
    #[error("{kind} {id} not found")]
    NotFound { kind: RecordKind, id: u64 },

    /// A layout wrapper was written without the `{{content}}` token.
    #[error("layout wrapper is missing the {{{{content}}}} token")]
    MissingContentToken,

    /// A template slug collided with an existing one.
    #[error("template slug already in use: {0}")]
    DuplicateSlug(String),

    /// A record was asked to move backwards or out of its lifecycle.
    #[error("invalid {kind} transition: {detail}")]
    InvalidTransition { kind: RecordKind, detail: String },

    /// An object path escaped the store root or was otherwise malformed.
    #[error("invalid object path: {0}")]
    InvalidPath(String),

    /// No object at the given path.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// Underlying filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
