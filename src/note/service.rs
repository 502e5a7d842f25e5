use std::sync::Arc;

use crate::error::{Result, ServerError};
use crate::guard::{require_authenticated, require_ownership};
use crate::identity::Identity;
use crate::note::{Content, FavoriteChange, Note, NoteId, NoteRepository};
use crate::user::UserId;

/// Number of times a toggle is attempted before giving up with
/// [`ServerError::Conflict`].
pub const MAX_TOGGLE_ATTEMPTS: usize = 5;

/// Queries and guarded mutations on notes.
#[derive(Clone)]
pub struct NoteService {
    repo: Arc<dyn NoteRepository>,
}

impl NoteService {
    /// Create a new [`NoteService`].
    pub fn new(repo: Arc<dyn NoteRepository>) -> Self {
        Self { repo }
    }

    /// Fetch a single note.
    pub async fn find(&self, id: NoteId) -> Result<Note> {
        self.repo.find_by_id(id).await?.ok_or(ServerError::NotFound)
    }

    /// Every note, oldest first.
    pub async fn list(&self) -> Result<Vec<Note>> {
        self.repo.list().await
    }

    pub async fn by_author(&self, author: UserId) -> Result<Vec<Note>> {
        self.repo.list_by_author(author).await
    }

    pub async fn favorites_of(&self, user: UserId) -> Result<Vec<Note>> {
        self.repo.list_favorited_by(user).await
    }

    /// Write a new note owned by the caller.
    pub async fn create(&self, identity: &Identity, content: &str) -> Result<Note> {
        let author = require_authenticated(identity)?;
        let content = Content::parse(content)?;

        let note = self.repo.create(&content, author).await?;
        tracing::info!(note_id = %note.id, %author, "note created");

        Ok(note)
    }

    /// Replace the content of a note written by the caller.
    pub async fn update(
        &self,
        identity: &Identity,
        id: NoteId,
        content: &str,
    ) -> Result<Note> {
        let user = require_authenticated(identity)?;
        let current = self.repo.find_by_id(id).await?;
        require_ownership(user, current.as_ref())?;

        // Content is only checked once the caller is known to own the note.
        let content = Content::parse(content)?;

        let note = self
            .repo
            .update_content(id, &content)
            .await?
            .ok_or(ServerError::NotFound)?;
        tracing::info!(note_id = %id, "note updated");

        Ok(note)
    }

    /// Delete a note written by the caller.
    ///
    /// A store failure while deleting an owned note is logged and reported
    /// as `Ok(false)`.
    pub async fn delete(&self, identity: &Identity, id: NoteId) -> Result<bool> {
        let user = require_authenticated(identity)?;
        let current = self.repo.find_by_id(id).await?;
        require_ownership(user, current.as_ref())?;

        match (current, self.repo.delete(id).await) {
            (_, Ok(true)) => {
                tracing::info!(note_id = %id, "note deleted");
                Ok(true)
            },
            (None, Ok(false)) => Err(ServerError::NotFound),
            // Removed by someone else in between, the note is gone anyway.
            (Some(_), Ok(false)) => Ok(true),
            (None, Err(err)) => Err(err),
            (Some(_), Err(err)) => {
                tracing::error!(note_id = %id, error = %err, "note not deleted");
                Ok(false)
            },
        }
    }

    /// Flip the caller's membership in the favorites of a note.
    ///
    /// The delta is derived from the membership observed on the last read
    /// and applied with a conditional update, so a stale observation never
    /// writes. When the condition no longer holds the note is read again,
    /// at most [`MAX_TOGGLE_ATTEMPTS`] times.
    pub async fn toggle_favorite(
        &self,
        identity: &Identity,
        id: NoteId,
    ) -> Result<Note> {
        let user = require_authenticated(identity)?;

        for attempt in 1..=MAX_TOGGLE_ATTEMPTS {
            let note = self.find(id).await?;
            let change = if note.is_favorited_by(user) {
                FavoriteChange::Remove
            } else {
                FavoriteChange::Add
            };

            if let Some(note) = self.repo.apply_favorite(id, user, change).await?
            {
                tracing::debug!(note_id = %id, %user, ?change, "favorite toggled");
                return Ok(note);
            }

            tracing::debug!(note_id = %id, %user, attempt, "stale toggle, retrying");
        }

        tracing::warn!(note_id = %id, %user, "favorite toggle kept conflicting");
        Err(ServerError::Conflict)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::database::MemoryStore;

    const ALICE: Identity = Identity::User(UserId(1));
    const BOB: Identity = Identity::User(UserId(2));

    fn service() -> NoteService {
        NoteService::new(Arc::new(MemoryStore::new()))
    }

    /// Store whose writes can be made to lose races or fail.
    #[derive(Default)]
    struct Racy {
        inner: MemoryStore,
        /// Conditional updates still to be rejected as stale.
        stale: AtomicUsize,
        /// Membership flips still to be slipped in before a conditional
        /// update, as another session of the same user would.
        interleaved: AtomicUsize,
        attempts: AtomicUsize,
        broken_delete: bool,
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[async_trait]
    impl NoteRepository for Racy {
        async fn create(&self, content: &Content, author: UserId) -> Result<Note> {
            self.inner.create(content, author).await
        }

        async fn find_by_id(&self, id: NoteId) -> Result<Option<Note>> {
            self.inner.find_by_id(id).await
        }

        async fn list(&self) -> Result<Vec<Note>> {
            NoteRepository::list(&self.inner).await
        }

        async fn list_by_author(&self, author: UserId) -> Result<Vec<Note>> {
            self.inner.list_by_author(author).await
        }

        async fn list_favorited_by(&self, user: UserId) -> Result<Vec<Note>> {
            self.inner.list_favorited_by(user).await
        }

        async fn update_content(
            &self,
            id: NoteId,
            content: &Content,
        ) -> Result<Option<Note>> {
            self.inner.update_content(id, content).await
        }

        async fn delete(&self, id: NoteId) -> Result<bool> {
            if self.broken_delete {
                return Err(ServerError::Sql(sqlx::Error::PoolTimedOut));
            }
            self.inner.delete(id).await
        }

        async fn apply_favorite(
            &self,
            id: NoteId,
            user: UserId,
            change: FavoriteChange,
        ) -> Result<Option<Note>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if take(&self.stale) {
                return Ok(None);
            }
            if take(&self.interleaved) {
                self.inner.apply_favorite(id, user, change).await?;
            }
            self.inner.apply_favorite(id, user, change).await
        }
    }

    #[tokio::test]
    async fn test_create() {
        let notes = service();

        let note = notes.create(&ALICE, "hello").await.unwrap();
        assert_eq!(note.author, UserId(1));
        assert_eq!(note.content, "hello");
        assert_eq!(note.favorite_count, 0);

        assert!(matches!(
            notes.create(&ALICE, "   ").await,
            Err(ServerError::Validation(_))
        ));
        assert_eq!(notes.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_anonymous_writes_are_rejected() {
        let notes = service();
        let note = notes.create(&ALICE, "hello").await.unwrap();
        let anonymous = Identity::Anonymous;

        // Reads need no identity.
        assert_eq!(notes.find(note.id).await.unwrap(), note);
        assert_eq!(notes.list().await.unwrap(), vec![note.clone()]);

        assert!(matches!(
            notes.create(&anonymous, "hi").await,
            Err(ServerError::Unauthenticated)
        ));
        assert!(matches!(
            notes.update(&anonymous, note.id, "hi").await,
            Err(ServerError::Unauthenticated)
        ));
        assert!(matches!(
            notes.delete(&anonymous, note.id).await,
            Err(ServerError::Unauthenticated)
        ));
        assert!(matches!(
            notes.toggle_favorite(&anonymous, note.id).await,
            Err(ServerError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn test_non_author_is_forbidden() {
        let notes = service();
        let note = notes.create(&ALICE, "hello").await.unwrap();

        assert!(matches!(
            notes.update(&BOB, note.id, "mine now").await,
            Err(ServerError::Forbidden)
        ));
        // Even with invalid content.
        assert!(matches!(
            notes.update(&BOB, note.id, "").await,
            Err(ServerError::Forbidden)
        ));
        assert!(matches!(
            notes.delete(&BOB, note.id).await,
            Err(ServerError::Forbidden)
        ));
        assert_eq!(notes.find(note.id).await.unwrap().content, "hello");
    }

    #[tokio::test]
    async fn test_update() {
        let notes = service();
        let note = notes.create(&ALICE, "hello").await.unwrap();

        let updated = notes.update(&ALICE, note.id, "bye").await.unwrap();
        assert_eq!(updated.content, "bye");
        assert!(updated.updated_at >= note.updated_at);

        assert!(matches!(
            notes.update(&ALICE, note.id, "").await,
            Err(ServerError::Validation(_))
        ));
        assert!(matches!(
            notes.update(&ALICE, NoteId(42), "bye").await,
            Err(ServerError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_missing_note() {
        let notes = service();

        assert!(matches!(
            notes.delete(&ALICE, NoteId(42)).await,
            Err(ServerError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_toggle_twice_restores_state() {
        let notes = service();
        let note = notes.create(&ALICE, "hello").await.unwrap();

        let on = notes.toggle_favorite(&BOB, note.id).await.unwrap();
        assert_eq!(on.favorited_by, vec![UserId(2)]);
        assert_eq!(on.favorite_count, 1);

        let off = notes.toggle_favorite(&BOB, note.id).await.unwrap();
        assert!(off.favorited_by.is_empty());
        assert_eq!(off.favorite_count, 0);

        assert!(matches!(
            notes.toggle_favorite(&BOB, NoteId(42)).await,
            Err(ServerError::NotFound)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_toggles_keep_count() {
        let notes = service();
        let id = notes.create(&ALICE, "hello").await.unwrap().id;

        // Users 1..=20 each toggle once, odd users toggle a second time.
        let mut handles = Vec::new();
        for user in 1..=20 {
            let notes = notes.clone();
            handles.push(tokio::spawn(async move {
                let identity = Identity::User(UserId(user));
                let times = if user % 2 == 1 { 2 } else { 1 };

                for _ in 0..times {
                    let note = notes.toggle_favorite(&identity, id).await?;
                    assert_eq!(
                        note.favorite_count as usize,
                        note.favorited_by.len()
                    );
                }
                Ok::<_, ServerError>(())
            }));
        }
        for handle in handles {
            // Conflicts are allowed under contention, never a broken count.
            match handle.await.unwrap() {
                Ok(()) | Err(ServerError::Conflict) => {},
                Err(err) => panic!("unexpected error: {err}"),
            }
        }

        let note = notes.find(id).await.unwrap();
        assert_eq!(note.favorite_count as usize, note.favorited_by.len());
        let mut members = note.favorited_by.clone();
        members.sort();
        members.dedup();
        assert_eq!(members.len(), note.favorited_by.len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_double_toggle_while_others_toggle() {
        let notes = service();
        let id = notes.create(&ALICE, "hello").await.unwrap().id;

        let others = {
            let notes = notes.clone();
            tokio::spawn(async move {
                for user in 10..60 {
                    let identity = Identity::User(UserId(user));
                    notes.toggle_favorite(&identity, id).await.unwrap();
                }
            })
        };

        notes.toggle_favorite(&BOB, id).await.unwrap();
        notes.toggle_favorite(&BOB, id).await.unwrap();
        others.await.unwrap();

        let note = notes.find(id).await.unwrap();
        assert!(!note.is_favorited_by(UserId(2)));
        assert_eq!(note.favorite_count, 50);
        assert_eq!(note.favorited_by.len(), 50);
    }

    #[tokio::test]
    async fn test_stale_toggle_is_retried() {
        let store = Arc::new(Racy {
            stale: AtomicUsize::new(MAX_TOGGLE_ATTEMPTS - 1),
            ..Default::default()
        });
        let notes = NoteService::new(store.clone());
        let note = notes.create(&ALICE, "hello").await.unwrap();

        let toggled = notes.toggle_favorite(&BOB, note.id).await.unwrap();
        assert_eq!(toggled.favorited_by, vec![UserId(2)]);
        assert_eq!(toggled.favorite_count, 1);
        assert_eq!(store.attempts.load(Ordering::SeqCst), MAX_TOGGLE_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_retry_reads_the_new_membership() {
        let store = Arc::new(Racy {
            interleaved: AtomicUsize::new(1),
            ..Default::default()
        });
        let notes = NoteService::new(store.clone());
        let note = notes.create(&ALICE, "hello").await.unwrap();

        // Bob is favorited in between the read and the write, so the retry
        // removes him instead of adding him twice.
        let toggled = notes.toggle_favorite(&BOB, note.id).await.unwrap();
        assert!(toggled.favorited_by.is_empty());
        assert_eq!(toggled.favorite_count, 0);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_toggle_gives_up_with_conflict() {
        let store = Arc::new(Racy {
            stale: AtomicUsize::new(usize::MAX),
            ..Default::default()
        });
        let notes = NoteService::new(store.clone());
        let note = notes.create(&ALICE, "hello").await.unwrap();

        assert!(matches!(
            notes.toggle_favorite(&BOB, note.id).await,
            Err(ServerError::Conflict)
        ));
        assert_eq!(store.attempts.load(Ordering::SeqCst), MAX_TOGGLE_ATTEMPTS);

        let note = notes.find(note.id).await.unwrap();
        assert!(note.favorited_by.is_empty());
        assert_eq!(note.favorite_count, 0);
    }

    #[tokio::test]
    async fn test_delete_store_failure() {
        let notes = NoteService::new(Arc::new(Racy {
            broken_delete: true,
            ..Default::default()
        }));
        let note = notes.create(&ALICE, "hello").await.unwrap();

        assert!(!notes.delete(&ALICE, note.id).await.unwrap());
        assert_eq!(notes.find(note.id).await.unwrap(), note);
        // A missing note still reports the store error.
        assert!(matches!(
            notes.delete(&ALICE, NoteId(42)).await,
            Err(ServerError::Sql(_))
        ));
    }

    #[tokio::test]
    async fn test_scenario() {
        let notes = service();

        let note = notes.create(&ALICE, "hello").await.unwrap();
        assert_eq!(note.favorite_count, 0);

        let note = notes.toggle_favorite(&BOB, note.id).await.unwrap();
        assert_eq!(note.favorite_count, 1);
        assert_eq!(note.favorited_by, vec![UserId(2)]);

        let note = notes.toggle_favorite(&BOB, note.id).await.unwrap();
        assert_eq!(note.favorite_count, 0);
        assert!(note.favorited_by.is_empty());

        assert!(matches!(
            notes.delete(&BOB, note.id).await,
            Err(ServerError::Forbidden)
        ));
        assert!(notes.delete(&ALICE, note.id).await.unwrap());
        assert!(matches!(
            notes.find(note.id).await,
            Err(ServerError::NotFound)
        ));
    }
}
