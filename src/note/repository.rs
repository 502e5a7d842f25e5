//! Note persistence port.

use async_trait::async_trait;

use crate::error::Result;
use crate::note::{Content, Note, NoteId};
use crate::user::UserId;

/// Direction of a favorite toggle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FavoriteChange {
    /// Add the user and increment the counter, only if the user is absent.
    Add,
    /// Remove the user and decrement the counter, only if the user is
    /// present.
    Remove,
}

/// Port for note persistence operations.
///
/// Implementations only enforce field-level constraints. Authorization is
/// checked by callers before any write.
#[async_trait]
pub trait NoteRepository: Send + Sync {
    /// Insert a new note owned by `author`.
    async fn create(&self, content: &Content, author: UserId) -> Result<Note>;

    /// Find a note by ID.
    async fn find_by_id(&self, id: NoteId) -> Result<Option<Note>>;

    /// List every note, oldest first.
    async fn list(&self) -> Result<Vec<Note>>;

    /// List notes written by `author`, newest first.
    async fn list_by_author(&self, author: UserId) -> Result<Vec<Note>>;

    /// List notes marked as favorite by `user`, newest first.
    async fn list_favorited_by(&self, user: UserId) -> Result<Vec<Note>>;

    /// Replace the content of a note. `None` if the note does not exist.
    async fn update_content(
        &self,
        id: NoteId,
        content: &Content,
    ) -> Result<Option<Note>>;

    /// Delete a note. `true` if a note was removed.
    async fn delete(&self, id: NoteId) -> Result<bool>;

    /// Apply `change` for `user` on note `id` as one atomic conditional
    /// update of both the member set and the counter.
    ///
    /// Returns `None`, without writing anything, when the note does not
    /// exist or when the membership of `user` no longer allows `change`.
    async fn apply_favorite(
        &self,
        id: NoteId,
        user: UserId,
        change: FavoriteChange,
    ) -> Result<Option<Note>>;
}
