mod repository;
mod service;

pub use repository::*;
pub use service::*;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};
use crate::user::UserId;

/// Store-assigned note identifier.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct NoteId(pub i64);

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Note as saved on database.
///
/// `favorite_count` always equals the length of `favorited_by`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: NoteId,
    pub content: String,
    pub author: UserId,
    pub favorited_by: Vec<UserId>,
    pub favorite_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// Whether `user` marked this note as favorite.
    pub fn is_favorited_by(&self, user: UserId) -> bool {
        self.favorited_by.contains(&user)
    }
}

/// Validated note content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Content(String);

impl Content {
    /// Maximum number of characters of a note.
    pub const MAX_LENGTH: usize = 10_000;

    /// Check `content` is neither blank nor too long.
    pub fn parse(content: impl Into<String>) -> Result<Self> {
        let content = content.into();

        if content.trim().is_empty() {
            return Err(ServerError::field(
                "content",
                "empty",
                "Content must not be empty.",
            ));
        }
        if content.chars().count() > Self::MAX_LENGTH {
            return Err(ServerError::field(
                "content",
                "length",
                "Content must be at most 10000 characters long.",
            ));
        }

        Ok(Self(content))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
