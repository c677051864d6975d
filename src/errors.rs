//! Typed error hierarchy for corkboard.
//!
//! `BoardError` is raised by the persistence layer and the reorder engine.
//! Internal plumbing carries it inside `anyhow::Error`; the API layer
//! recovers it with `downcast_ref` to pick the HTTP status.

use thiserror::Error;

/// Errors from board persistence and the reorder engine.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Board not found")]
    BoardNotFound { id: i64 },

    #[error("Column not found")]
    ColumnNotFound { id: i64 },

    #[error("Card not found")]
    CardNotFound { id: i64 },

    #[error("Label not found")]
    LabelNotFound { id: i64 },

    #[error("Comment not found")]
    CommentNotFound { id: i64 },

    #[error("User not found")]
    UserNotFound,

    #[error("Member not found")]
    MemberNotFound { user_id: i64 },

    #[error("User is not assigned to this card")]
    AssignmentNotFound { card_id: i64, user_id: i64 },

    #[error("Label not attached to card")]
    LabelNotAttached { card_id: i64, label_id: i64 },

    #[error("Access denied to the board")]
    AccessDenied { board_id: i64 },

    #[error("{0}")]
    Forbidden(String),

    #[error("Target position {requested} is outside 0..={max}")]
    InvalidTarget { requested: i32, max: i32 },

    #[error("{0}")]
    BadRequest(String),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl BoardError {
    /// True for the variants that mean "the referenced entity does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::BoardNotFound { .. }
                | Self::ColumnNotFound { .. }
                | Self::CardNotFound { .. }
                | Self::LabelNotFound { .. }
                | Self::CommentNotFound { .. }
                | Self::UserNotFound
                | Self::MemberNotFound { .. }
                | Self::AssignmentNotFound { .. }
                | Self::LabelNotAttached { .. }
        )
    }
}

/// Errors from loading or validating `corkboard.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value '{value}' for {key}: {message}")]
    InvalidValue {
        key: String,
        value: String,
        message: String,
    },
}
