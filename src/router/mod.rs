//! HTTP API.

pub mod notes;
pub mod signin;
pub mod signup;
pub mod status;
pub mod users;

use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Serialize;
use validator::Validate;

use crate::error::ServerError;

pub const TOKEN_TYPE: &str = "Bearer";

/// JSON body checked with [`validator`] before reaching the handler.
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate + Send,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;

        Ok(Valid(value))
    }
}

/// Path parameters, with rejections rendered as [`ServerError`].
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ServerError))]
pub struct Path<T>(pub T);

/// Body returned on sign up and sign in.
#[derive(Debug, PartialEq, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token_type: String,
    pub token: String,
    pub expires_in: u64,
}

impl TokenResponse {
    pub fn bearer(token: String, expires_in: u64) -> Self {
        Self {
            token_type: TOKEN_TYPE.to_owned(),
            token,
            expires_in,
        }
    }
}
