//! Authorization predicates checked before any write.

use crate::error::{Result, ServerError};
use crate::identity::Identity;
use crate::note::Note;
use crate::user::UserId;

/// Fail with [`ServerError::Unauthenticated`] for anonymous callers.
pub fn require_authenticated(identity: &Identity) -> Result<UserId> {
    identity.user_id().ok_or(ServerError::Unauthenticated)
}

/// Fail with [`ServerError::Forbidden`] when `user` is not the note author.
///
/// A missing note passes: absence is reported by the repository as
/// [`ServerError::NotFound`].
pub fn require_ownership(user: UserId, note: Option<&Note>) -> Result<()> {
    match note {
        Some(note) if note.author != user => Err(ServerError::Forbidden),
        _ => Ok(()),
    }
}
