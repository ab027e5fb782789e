use std::io;

use crate::pg::PgError;

/// Central error type for the server core.
#[derive(Debug)]
pub enum ServerError {
    /// Underlying I/O error from the OS or network.
    Io(io::Error),
    /// The work queue rejected an item because it was at capacity.
    QueueFull,
    /// Database error surfaced from the pg driver.
    Db(PgError),
    /// Startup failed before the event loop could run.
    Init(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Io(e) => write!(f, "I/O error: {}", e),
            ServerError::QueueFull => write!(f, "work queue is full"),
            ServerError::Db(e) => write!(f, "database error: {}", e),
            ServerError::Init(msg) => write!(f, "init failed: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Io(e) => Some(e),
            ServerError::Db(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        ServerError::Io(e)
    }
}

impl From<PgError> for ServerError {
    fn from(e: PgError) -> Self {
        ServerError::Db(e)
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
