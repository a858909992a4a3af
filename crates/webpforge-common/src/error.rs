//! Error type shared by every webpforge crate.
//!
//! Variants line up with how failures surface to API clients, so
//! [`Error::http_status`] can map any of them to a response code.

use std::time::Duration;

/// Common error type for webpforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Missing or invalid credentials.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Request or configuration failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// The operation conflicts with the current state of the entity.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The task queue had no free slot.
    #[error("task queue is full")]
    QueueFull,

    /// The worker pool has been stopped and accepts no more work.
    #[error("worker pool is stopped")]
    PoolStopped,

    /// An external tool failed or could not be run.
    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    /// A pipeline phase failed for a reason other than a tool error.
    #[error("{phase} failed: {message}")]
    Pipeline { phase: String, message: String },

    /// The task ran past its deadline.
    #[error("task timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The task was cancelled on request.
    #[error("task cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn pipeline(phase: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Pipeline {
            phase: phase.into(),
            message: message.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for the two ways a task can be stopped from outside: an explicit
    /// cancellation or an expired deadline.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout(_))
    }

    /// HTTP status code for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::Unauthorized(_) => 401,
            Self::Validation(_) => 400,
            Self::Conflict(_) | Self::Cancelled => 409,
            Self::QueueFull | Self::PoolStopped => 503,
            Self::Tool { .. } => 502,
            Self::Timeout(_) => 504,
            Self::Pipeline { .. } | Self::Io(_) | Self::Internal(_) => 500,
        }
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
