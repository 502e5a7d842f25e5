//! User persistence port.

use async_trait::async_trait;

use crate::error::Result;
use crate::user::{NewUser, User, UserId};

/// Port for account persistence operations.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a new account.
    ///
    /// Fails with [`ServerError::DuplicateAccount`] when the username or the
    /// email is already taken.
    ///
    /// [`ServerError::DuplicateAccount`]: crate::error::ServerError::DuplicateAccount
    async fn create(&self, user: NewUser) -> Result<User>;

    /// Find an account by ID.
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>>;

    /// Find an account by username.
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Find an account matching either the normalized email or the
    /// username.
    async fn find_by_login(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>>;

    /// Fetch every account in `ids`, ordered by ID.
    async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>>;

    /// List every account, ordered by ID.
    async fn list(&self) -> Result<Vec<User>>;
}
