//! # AppError
//!
//! Centralized error handling for the United Minds ecosystem.
//! Maps domain-specific failures to actionable error types.

use thiserror::Error;

use crate::models::{ReplyId, RepostId, ThreadId, UserId, VoteTarget};

/// The primary error type for all um-core operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (e.g., Thread, Reply, User)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Validation failure (e.g., bad vote value, empty content, bad page)
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Missing or invalid credentials on a write
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated, but acting on someone else's resource
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Infrastructure failure (e.g., DB down, hashing failure)
    #[error("internal service error: {0}")]
    Internal(String),

    /// Request contradicts stored state (e.g., parent in another thread, duplicate email)
    #[error("conflict: {0}")]
    Conflict(String),
}

impl AppError {
    pub fn invalid_vote_value(value: i64) -> Self {
        Self::ValidationError(format!("invalid vote value {value} (must be 1 or -1)"))
    }

    pub fn thread_not_found(id: ThreadId) -> Self {
        Self::NotFound("Thread".into(), id.to_string())
    }

    pub fn reply_not_found(id: ReplyId) -> Self {
        Self::NotFound("Reply".into(), id.to_string())
    }

    pub fn user_not_found(id: UserId) -> Self {
        Self::NotFound("User".into(), id.to_string())
    }

    /// A vote was cast on a thread or reply that does not exist.
    pub fn target_not_found(target: VoteTarget) -> Self {
        match target {
            VoteTarget::Thread(id) => Self::thread_not_found(id),
            VoteTarget::Reply(id) => Self::reply_not_found(id),
        }
    }

    pub fn repost_not_found(id: RepostId) -> Self {
        Self::NotFound("Repost".into(), id.to_string())
    }

    /// Covers both a missing parent and a parent from another thread.
    pub fn invalid_parent(reason: impl Into<String>) -> Self {
        Self::Conflict(reason.into())
    }
}

/// A specialized Result type for United Minds logic.
pub type Result<T> = std::result::Result<T, AppError>;
