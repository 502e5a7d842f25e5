use std::sync::Arc;

use serde::Deserialize;
use validator::{Validate, ValidateEmail};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{PasswordManager, avatar, normalize_email};
use crate::error::{Result, ServerError};
use crate::guard::require_authenticated;
use crate::identity::Identity;
use crate::token::TokenManager;
use crate::user::{NewUser, User, UserId, UserRepository};

/// Account creation form.
#[derive(Deserialize, Validate, Zeroize, ZeroizeOnDrop)]
pub struct SignUp {
    #[validate(
        length(
            min = 2,
            max = 32,
            message = "Username must be 2 to 32 characters long."
        ),
        custom(
            function = "crate::user::validate_username",
            message = "Username must be alphanumeric."
        )
    )]
    pub username: String,
    pub email: String,
    #[validate(length(
        min = 8,
        max = 255,
        message = "Password must contain at least 8 characters."
    ))]
    pub password: String,
}

/// Sign in form. Either `email` or `username` identifies the account.
#[derive(Deserialize, Validate, Zeroize, ZeroizeOnDrop)]
pub struct SignIn {
    pub username: Option<String>,
    pub email: Option<String>,
    #[validate(length(min = 1, message = "Password is required."))]
    pub password: String,
}

/// Account creation, authentication and lookups.
#[derive(Clone)]
pub struct UserService {
    repo: Arc<dyn UserRepository>,
    pwd: Arc<PasswordManager>,
    token: TokenManager,
}

impl UserService {
    /// Create a new [`UserService`].
    pub fn new(
        repo: Arc<dyn UserRepository>,
        pwd: Arc<PasswordManager>,
        token: TokenManager,
    ) -> Self {
        Self {
            repo,
            pwd,
            token,
        }
    }

    /// Create an account and return a token for it.
    pub async fn sign_up(&self, form: &SignUp) -> Result<String> {
        form.validate()?;

        let email = normalize_email(&form.email);
        if !email.validate_email() {
            return Err(ServerError::field(
                "email",
                "email",
                "Email must be formatted.",
            ));
        }

        let password = self.pwd.hash_password(&form.password).await?;
        let user = self
            .repo
            .create(NewUser {
                username: form.username.clone(),
                avatar: avatar(&email),
                email,
                password,
            })
            .await?;
        tracing::info!(user_id = %user.id, username = %user.username, "user created");

        Ok(self.token.create(user.id)?)
    }

    /// Check credentials and return a token.
    ///
    /// An unknown account and a wrong password fail the same way.
    pub async fn sign_in(&self, form: &SignIn) -> Result<String> {
        form.validate()?;

        let email = form.email.as_deref().map(normalize_email);
        let username = form.username.as_deref().map(str::trim);
        if email.is_none() && username.is_none() {
            return Err(ServerError::field(
                "email",
                "required",
                "Email or username is required.",
            ));
        }

        let Some(user) =
            self.repo.find_by_login(username, email.as_deref()).await?
        else {
            tracing::debug!("sign in with unknown account");
            self.pwd.verify_decoy(&form.password).await?;
            return Err(ServerError::AuthFailed);
        };

        if !self
            .pwd
            .verify_password(&form.password, &user.password)
            .await?
        {
            tracing::debug!(user_id = %user.id, "sign in with wrong password");
            return Err(ServerError::AuthFailed);
        }

        Ok(self.token.create(user.id)?)
    }

    /// Account of the caller.
    pub async fn me(&self, identity: &Identity) -> Result<User> {
        let id = require_authenticated(identity)?;

        self.repo.find_by_id(id).await?.ok_or(ServerError::NotFound)
    }

    pub async fn find_by_id(&self, id: UserId) -> Result<User> {
        self.repo.find_by_id(id).await?.ok_or(ServerError::NotFound)
    }

    pub async fn find_by_username(&self, username: &str) -> Result<User> {
        self.repo
            .find_by_username(username)
            .await?
            .ok_or(ServerError::NotFound)
    }

    pub async fn find_many(&self, ids: &[UserId]) -> Result<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.repo.find_many(ids).await
    }

    pub async fn list(&self) -> Result<Vec<User>> {
        self.repo.list().await
    }

    /// Lifetime of the issued tokens, in seconds.
    pub fn expires_in(&self) -> u64 {
        self.token.expires_in()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::light_params;
    use crate::database::MemoryStore;

    fn service() -> UserService {
        UserService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(PasswordManager::new(Some(light_params())).unwrap()),
            TokenManager::new("notedly", "secret"),
        )
    }

    fn sign_up(username: &str, email: &str) -> SignUp {
        SignUp {
            username: username.into(),
            email: email.into(),
            password: "StRoNg_PaSsWoRd".into(),
        }
    }

    fn sign_in(
        username: Option<&str>,
        email: Option<&str>,
        password: &str,
    ) -> SignIn {
        SignIn {
            username: username.map(Into::into),
            email: email.map(Into::into),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn test_sign_up() {
        let users = service();

        let token = users
            .sign_up(&sign_up("adam", " Adam@Example.com "))
            .await
            .unwrap();
        let id = TokenManager::new("notedly", "secret").decode(&token).unwrap();

        let user = users.me(&Identity::User(id)).await.unwrap();
        assert_eq!(user.username, "adam");
        assert_eq!(user.email, "adam@example.com");
        assert!(user.password.starts_with("$argon2id$"));
        assert!(user.avatar.starts_with("https://www.gravatar.com/avatar/"));
    }

    #[tokio::test]
    async fn test_sign_up_validation() {
        let users = service();

        assert!(matches!(
            users.sign_up(&sign_up("a", "a@example.com")).await,
            Err(ServerError::Validation(_))
        ));
        assert!(matches!(
            users.sign_up(&sign_up("adam scott", "a@example.com")).await,
            Err(ServerError::Validation(_))
        ));
        assert!(matches!(
            users.sign_up(&sign_up("adam", "not-an-email")).await,
            Err(ServerError::Validation(_))
        ));

        let short = SignUp {
            username: "adam".into(),
            email: "adam@example.com".into(),
            password: "short".into(),
        };
        assert!(matches!(
            users.sign_up(&short).await,
            Err(ServerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_account() {
        let users = service();
        users
            .sign_up(&sign_up("adam", "adam@example.com"))
            .await
            .unwrap();

        assert!(matches!(
            users.sign_up(&sign_up("adam", "other@example.com")).await,
            Err(ServerError::DuplicateAccount)
        ));
        // Email is compared once normalized.
        assert!(matches!(
            users.sign_up(&sign_up("eve", "ADAM@example.com")).await,
            Err(ServerError::DuplicateAccount)
        ));
    }

    #[tokio::test]
    async fn test_sign_in() {
        let users = service();
        users
            .sign_up(&sign_up("adam", "adam@example.com"))
            .await
            .unwrap();

        assert!(
            users
                .sign_in(&sign_in(None, Some("ADAM@example.com"), "StRoNg_PaSsWoRd"))
                .await
                .is_ok()
        );
        assert!(
            users
                .sign_in(&sign_in(Some("adam"), None, "StRoNg_PaSsWoRd"))
                .await
                .is_ok()
        );
        assert!(matches!(
            users.sign_in(&sign_in(None, None, "StRoNg_PaSsWoRd")).await,
            Err(ServerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_sign_in_failures_are_identical() {
        let users = service();
        users
            .sign_up(&sign_up("adam", "adam@example.com"))
            .await
            .unwrap();

        let unknown = users
            .sign_in(&sign_in(Some("eve"), None, "StRoNg_PaSsWoRd"))
            .await
            .unwrap_err();
        let wrong = users
            .sign_in(&sign_in(Some("adam"), None, "wrong password"))
            .await
            .unwrap_err();

        assert!(matches!(unknown, ServerError::AuthFailed));
        assert!(matches!(wrong, ServerError::AuthFailed));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn test_me() {
        let users = service();

        assert!(matches!(
            users.me(&Identity::Anonymous).await,
            Err(ServerError::Unauthenticated)
        ));
        // Valid token whose account is gone.
        assert!(matches!(
            users.me(&Identity::User(UserId(99))).await,
            Err(ServerError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_lookups() {
        let users = service();
        users
            .sign_up(&sign_up("adam", "adam@example.com"))
            .await
            .unwrap();
        users
            .sign_up(&sign_up("eve", "eve@example.com"))
            .await
            .unwrap();

        assert_eq!(users.find_by_username("eve").await.unwrap().id, UserId(2));
        assert_eq!(users.find_by_id(UserId(1)).await.unwrap().username, "adam");
        assert!(matches!(
            users.find_by_id(UserId(7)).await,
            Err(ServerError::NotFound)
        ));
        assert!(matches!(
            users.find_by_username("bob").await,
            Err(ServerError::NotFound)
        ));
        assert_eq!(users.list().await.unwrap().len(), 2);
        assert_eq!(
            users.find_many(&[UserId(2), UserId(7)]).await.unwrap().len(),
            1
        );
        assert!(users.find_many(&[]).await.unwrap().is_empty());
    }
}
