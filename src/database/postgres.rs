//! PostgreSQL implementation of the repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::{Result, ServerError};
use crate::note::{Content, FavoriteChange, Note, NoteId, NoteRepository};
use crate::user::{NewUser, User, UserId, UserRepository};

const NOTE_COLUMNS: &str = "id, content, author_id, favorited_by, \
                            favorite_count, created_at, updated_at";
const USER_COLUMNS: &str = "id, username, email, password, avatar, created_at";

#[derive(Debug, sqlx::FromRow)]
struct NoteRow {
    id: i64,
    content: String,
    author_id: i64,
    favorited_by: Vec<i64>,
    favorite_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<NoteRow> for Note {
    fn from(row: NoteRow) -> Self {
        Note {
            id: NoteId(row.id),
            content: row.content,
            author: UserId(row.author_id),
            favorited_by: row.favorited_by.into_iter().map(UserId).collect(),
            favorite_count: row.favorite_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    password: String,
    avatar: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId(row.id),
            username: row.username,
            email: row.email,
            password: row.password,
            avatar: row.avatar,
            created_at: row.created_at,
        }
    }
}

/// Repositories backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new [`PgStore`].
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_notes(
        &self,
        filter: &str,
        user: Option<UserId>,
    ) -> Result<Vec<Note>> {
        let sql = format!("SELECT {NOTE_COLUMNS} FROM notes {filter}");
        let mut query = sqlx::query_as::<_, NoteRow>(&sql);
        if let Some(user) = user {
            query = query.bind(user.0);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Note::from).collect())
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn create(&self, user: NewUser) -> Result<User> {
        let query = format!(
            r#"INSERT INTO users (username, email, password, avatar)
                VALUES ($1, $2, $3, $4)
                RETURNING {USER_COLUMNS}"#
        );

        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password)
            .bind(&user.avatar)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    ServerError::DuplicateAccount
                },
                err => ServerError::Sql(err),
            })?;

        Ok(row.into())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");

        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let query =
            format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");

        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    async fn find_by_login(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>> {
        let query = format!(
            r#"SELECT {USER_COLUMNS} FROM users
                WHERE email = $1 OR username = $2
                ORDER BY id
                LIMIT 1"#
        );

        let row = sqlx::query_as::<_, UserRow>(&query)
            .bind(email)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(User::from))
    }

    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1) ORDER BY id"
        );
        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();

        let rows = sqlx::query_as::<_, UserRow>(&query)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    async fn list(&self) -> Result<Vec<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id");

        let rows = sqlx::query_as::<_, UserRow>(&query)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }
}

#[async_trait]
impl NoteRepository for PgStore {
    async fn create(&self, content: &Content, author: UserId) -> Result<Note> {
        let query = format!(
            r#"INSERT INTO notes (content, author_id)
                VALUES ($1, $2)
                RETURNING {NOTE_COLUMNS}"#
        );

        let row = sqlx::query_as::<_, NoteRow>(&query)
            .bind(content.as_str())
            .bind(author.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    async fn find_by_id(&self, id: NoteId) -> Result<Option<Note>> {
        let query = format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = $1");

        let row = sqlx::query_as::<_, NoteRow>(&query)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Note::from))
    }

    async fn list(&self) -> Result<Vec<Note>> {
        self.fetch_notes("ORDER BY id", None).await
    }

    async fn list_by_author(&self, author: UserId) -> Result<Vec<Note>> {
        self.fetch_notes("WHERE author_id = $1 ORDER BY id DESC", Some(author))
            .await
    }

    async fn list_favorited_by(&self, user: UserId) -> Result<Vec<Note>> {
        self.fetch_notes(
            "WHERE $1 = ANY(favorited_by) ORDER BY id DESC",
            Some(user),
        )
        .await
    }

    async fn update_content(
        &self,
        id: NoteId,
        content: &Content,
    ) -> Result<Option<Note>> {
        let query = format!(
            r#"UPDATE notes SET content = $2, updated_at = NOW()
                WHERE id = $1
                RETURNING {NOTE_COLUMNS}"#
        );

        let row = sqlx::query_as::<_, NoteRow>(&query)
            .bind(id.0)
            .bind(content.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Note::from))
    }

    async fn delete(&self, id: NoteId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM notes WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn apply_favorite(
        &self,
        id: NoteId,
        user: UserId,
        change: FavoriteChange,
    ) -> Result<Option<Note>> {
        // The membership condition is evaluated again on the locked row, so
        // a concurrent toggle that committed first makes this one match
        // nothing.
        let query = match change {
            FavoriteChange::Add => format!(
                r#"UPDATE notes
                    SET favorited_by = array_append(favorited_by, $2),
                        favorite_count = favorite_count + 1,
                        updated_at = NOW()
                    WHERE id = $1 AND NOT ($2 = ANY(favorited_by))
                    RETURNING {NOTE_COLUMNS}"#
            ),
            FavoriteChange::Remove => format!(
                r#"UPDATE notes
                    SET favorited_by = array_remove(favorited_by, $2),
                        favorite_count = favorite_count - 1,
                        updated_at = NOW()
                    WHERE id = $1 AND $2 = ANY(favorited_by)
                    RETURNING {NOTE_COLUMNS}"#
            ),
        };

        let row = sqlx::query_as::<_, NoteRow>(&query)
            .bind(id.0)
            .bind(user.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Note::from))
    }
}
