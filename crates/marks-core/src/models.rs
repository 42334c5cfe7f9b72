//! Data models for marks
//!
//! Defines the bookmark record as stored by the backend, the validated
//! draft used to create one, and the signed-in user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A saved bookmark
///
/// Field names match the columns of the backend `bookmarks` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bookmark {
    /// Unique identifier, assigned by the backend
    pub id: Uuid,
    /// Owner of the bookmark
    pub user_id: Uuid,
    /// The URL
    pub url: String,
    /// Display title
    pub title: String,
    /// When the backend stored this bookmark
    pub created_at: DateTime<Utc>,
}

impl Bookmark {
    /// Check if this bookmark belongs to the given user
    pub fn is_owned_by(&self, owner: Uuid) -> bool {
        self.user_id == owner
    }
}

/// Reasons a bookmark draft is refused before any I/O
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("URL is required")]
    EmptyUrl,

    #[error("Title is required")]
    EmptyTitle,
}

/// A validated bookmark that has not been stored yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBookmark {
    url: String,
    title: String,
}

impl NewBookmark {
    /// Validate a URL and title pair
    ///
    /// Both values are trimmed. Blank values are rejected.
    pub fn new(url: impl AsRef<str>, title: impl AsRef<str>) -> Result<Self, ValidationError> {
        let url = url.as_ref().trim();
        let title = title.as_ref().trim();

        if url.is_empty() {
            return Err(ValidationError::EmptyUrl);
        }
        if title.is_empty() {
            return Err(ValidationError::EmptyTitle);
        }

        Ok(Self {
            url: url.to_string(),
            title: title.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

/// The authenticated user a session belongs to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Opaque user id, used to scope every backend operation
    pub id: Uuid,
    /// Email address, when the identity provider shares one
    #[serde(default)]
    pub email: Option<String>,
}

impl User {
    pub fn new(id: Uuid) -> Self {
        Self { id, email: None }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Email if known, otherwise the id
    pub fn display_name(&self) -> String {
        self.email.clone().unwrap_or_else(|| self.id.to_string())
    }
}
