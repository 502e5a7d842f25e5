//! database (db) union structure.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::note::NoteRepository;
use crate::user::UserRepository;

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "notedly";
pub const DEFAULT_POOL_SIZE: u32 = 10;

/// Handle on the store, passed to every operation through the app state.
#[derive(Clone)]
pub struct Database {
    pub notes: Arc<dyn NoteRepository>,
    pub users: Arc<dyn UserRepository>,
    postgres: Option<PgPool>,
}

impl Database {
    /// Init database connections.
    ///
    /// `address` is either `hostname:port` or a full `postgres://` URL, in
    /// which case the credentials and database name are ignored.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        db: &str,
        pool: u32,
    ) -> Result<Self, sqlx::Error> {
        let addr = if address.starts_with("postgres://")
            || address.starts_with("postgresql://")
        {
            address.to_owned()
        } else {
            format!("postgres://{username}:{password}@{address}/{db}")
        };
        let postgres = PgPoolOptions::new()
            .max_connections(pool)
            .connect(&addr)
            .await?;

        tracing::info!(pool_size = pool, "postgres connected");

        Ok(Self::postgres(postgres))
    }

    /// Wrap an existing pool.
    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool.clone()));

        Self {
            notes: store.clone(),
            users: store,
            postgres: Some(pool),
        }
    }

    /// Create a store living in process memory.
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());

        Self {
            notes: store.clone(),
            users: store,
            postgres: None,
        }
    }

    /// PostgreSQL pool, if any.
    pub fn pool(&self) -> Option<&PgPool> {
        self.postgres.as_ref()
    }

    /// Close every connection.
    pub async fn close(&self) {
        if let Some(pool) = &self.postgres {
            pool.close().await;
            tracing::info!("postgres connections closed");
        }
    }
}
