//! Remote store error handling
//!
//! Typed errors for backend operations with classification helpers
//! and recovery suggestions.

use thiserror::Error;

/// Errors that can occur while talking to a bookmark store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Credentials missing, expired or refused
    #[error("Not authorized (HTTP {status}). Sign in again.")]
    Unauthorized { status: u16 },

    /// Backend refused the request as invalid
    #[error("Request rejected by backend (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Row does not exist
    #[error("Bookmark not found")]
    NotFound,

    /// Any other non-success HTTP status
    #[error("Backend returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Network level failure
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body could not be decoded
    #[error("Failed to decode backend response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Backend answered with something unexpected
    #[error("Unexpected backend response: {0}")]
    InvalidResponse(String),

    /// Realtime change feed failure
    #[error("Realtime error: {0}")]
    Realtime(String),

    /// Local SQLite table error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Adapter is not configured correctly
    #[error("Store misconfigured: {0}")]
    Config(String),
}

impl StoreError {
    /// Classify an HTTP status that is not a success
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => StoreError::Unauthorized { status },
            404 => StoreError::NotFound,
            400 | 409 | 422 => StoreError::Rejected { status, message },
            _ => StoreError::Http { status, message },
        }
    }

    /// Check if this error means the row is already gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }

    /// Check if retrying later might succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            StoreError::Transport(_) | StoreError::Realtime(_) => true,
            StoreError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            StoreError::Unauthorized { .. } => {
                Some("Your session may have expired. Run `marks login` with a fresh token.")
            }
            StoreError::Transport(_) | StoreError::Realtime(_) => {
                Some("Check your network connection and the backend URL.")
            }
            StoreError::Config(_) => {
                Some("Check the backend settings with `marks config show`.")
            }
            StoreError::Database(_) => {
                Some("Check that the data directory is writable.")
            }
            StoreError::Http { .. } if self.is_recoverable() => {
                Some("The backend may be busy. Try again shortly.")
            }
            _ => None,
        }
    }

    /// Error text followed by its recovery suggestion, if any
    pub fn describe(&self) -> String {
        match self.recovery_suggestion() {
            Some(hint) => format!("{} {}", self, hint),
            None => self.to_string(),
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
