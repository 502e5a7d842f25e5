//! In-memory store, used for development and tests.
//!
//! Every write happens under the write lock, which makes each operation
//! atomic the same way a single SQL statement is.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Result, ServerError};
use crate::note::{Content, FavoriteChange, Note, NoteId, NoteRepository};
use crate::user::{NewUser, User, UserId, UserRepository};

#[derive(Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    notes: BTreeMap<NoteId, Note>,
    user_sequence: i64,
    note_sequence: i64,
}

/// Memory-backed implementation of every repository.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create(&self, user: NewUser) -> Result<User> {
        let mut tables = self.tables.write().await;

        if tables
            .users
            .values()
            .any(|u| u.username == user.username || u.email == user.email)
        {
            return Err(ServerError::DuplicateAccount);
        }

        tables.user_sequence += 1;
        let user = User {
            id: UserId(tables.user_sequence),
            username: user.username,
            email: user.email,
            avatar: user.avatar,
            password: user.password,
            created_at: chrono::Utc::now(),
        };
        tables.users.insert(user.id, user.clone());

        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_by_login(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .find(|u| {
                email == Some(u.email.as_str())
                    || username == Some(u.username.as_str())
            })
            .cloned())
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>> {
        Ok(self
            .tables
            .read()
            .await
            .users
            .values()
            .filter(|u| ids.contains(&u.id))
            .cloned()
            .collect())
    }

    async fn list(&self) -> Result<Vec<User>> {
        Ok(self.tables.read().await.users.values().cloned().collect())
    }
}

#[async_trait]
impl NoteRepository for MemoryStore {
    async fn create(&self, content: &Content, author: UserId) -> Result<Note> {
        let mut tables = self.tables.write().await;

        tables.note_sequence += 1;
        let now = chrono::Utc::now();
        let note = Note {
            id: NoteId(tables.note_sequence),
            content: content.as_str().to_owned(),
            author,
            favorited_by: Vec::new(),
            favorite_count: 0,
            created_at: now,
            updated_at: now,
        };
        tables.notes.insert(note.id, note.clone());

        Ok(note)
    }

    async fn find_by_id(&self, id: NoteId) -> Result<Option<Note>> {
        Ok(self.tables.read().await.notes.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Note>> {
        Ok(self.tables.read().await.notes.values().cloned().collect())
    }

    async fn list_by_author(&self, author: UserId) -> Result<Vec<Note>> {
        Ok(self
            .tables
            .read()
            .await
            .notes
            .values()
            .rev()
            .filter(|n| n.author == author)
            .cloned()
            .collect())
    }

    async fn list_favorited_by(&self, user: UserId) -> Result<Vec<Note>> {
        Ok(self
            .tables
            .read()
            .await
            .notes
            .values()
            .rev()
            .filter(|n| n.is_favorited_by(user))
            .cloned()
            .collect())
    }

    async fn update_content(
        &self,
        id: NoteId,
        content: &Content,
    ) -> Result<Option<Note>> {
        let mut tables = self.tables.write().await;

        Ok(tables.notes.get_mut(&id).map(|note| {
            note.content = content.as_str().to_owned();
            note.updated_at = chrono::Utc::now();
            note.clone()
        }))
    }

    async fn delete(&self, id: NoteId) -> Result<bool> {
        Ok(self.tables.write().await.notes.remove(&id).is_some())
    }

    async fn apply_favorite(
        &self,
        id: NoteId,
        user: UserId,
        change: FavoriteChange,
    ) -> Result<Option<Note>> {
        let mut tables = self.tables.write().await;
        let Some(note) = tables.notes.get_mut(&id) else {
            return Ok(None);
        };

        match change {
            FavoriteChange::Add if !note.is_favorited_by(user) => {
                note.favorited_by.push(user);
                note.favorite_count += 1;
            },
            FavoriteChange::Remove if note.is_favorited_by(user) => {
                note.favorited_by.retain(|member| *member != user);
                note.favorite_count -= 1;
            },
            _ => return Ok(None),
        }
        note.updated_at = chrono::Utc::now();

        Ok(Some(note.clone()))
    }
}
