//! Error handler for notedly.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sqlx::Error as SQLxError;
use thiserror::Error;
use validator::{ValidationError, ValidationErrors};

use crate::crypto::CryptoError;
use crate::token::TokenError;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error(transparent)]
    Path(#[from] PathRejection),

    #[error("you must be signed in")]
    Unauthenticated,

    #[error("session is invalid")]
    SessionInvalid,

    #[error("you don't have permissions on this resource")]
    Forbidden,

    #[error("resource not found")]
    NotFound,

    #[error("username or email already used")]
    DuplicateAccount,

    #[error("error signing in")]
    AuthFailed,

    #[error("resource was modified concurrently, try again")]
    Conflict,

    #[error("SQL request failed: {0}")]
    Sql(#[from] SQLxError),

    #[error("cryptographic operation failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("token operation failed: {0}")]
    Token(#[from] TokenError),
}

impl ServerError {
    /// Create a validation error on a single field.
    pub fn field(field: &'static str, code: &'static str, message: &str) -> Self {
        let mut errors = ValidationErrors::new();
        errors.add(
            field,
            ValidationError::new(code).with_message(message.to_owned().into()),
        );
        Self::Validation(errors)
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(
        self,
    ) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| issue.code.to_string()),
            })
        })
        .collect()
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were validation errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => {
                response.errors(validation_errors)
            },

            ServerError::Axum(rejection) => response
                .title("Server error during data parsing.")
                .details(&rejection.body_text())
                .status(rejection.status()),

            ServerError::Path(rejection) => response
                .title("Invalid path parameter.")
                .details(&rejection.body_text())
                .status(rejection.status()),

            ServerError::Unauthenticated => response
                .title("Missing 'Authorization' header.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::SessionInvalid => response
                .title("Invalid 'Authorization' header.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::Forbidden => response
                .title("Access denied.")
                .status(StatusCode::FORBIDDEN),

            ServerError::NotFound => response
                .title("Resource not found.")
                .status(StatusCode::NOT_FOUND),

            ServerError::DuplicateAccount => response
                .title("Account already exists.")
                .status(StatusCode::CONFLICT),

            ServerError::AuthFailed => response
                .title("Invalid credentials.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::Conflict => response
                .title("Concurrent modification.")
                .status(StatusCode::CONFLICT),

            ServerError::Sql(err) => {
                tracing::error!(error = %err, "database request failed");
                ResponseError::default()
            },

            ServerError::Crypto(err) => {
                tracing::error!(error = %err, "cryptographic operation failed");
                ResponseError::default()
            },

            ServerError::Token(err) => {
                tracing::error!(error = %err, "token operation failed");
                ResponseError::default()
            },
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_of(err: ServerError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_taxonomy_status_codes() {
        assert_eq!(
            body_of(ServerError::Unauthenticated).await.0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            body_of(ServerError::SessionInvalid).await.0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            body_of(ServerError::Forbidden).await.0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            body_of(ServerError::NotFound).await.0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            body_of(ServerError::DuplicateAccount).await.0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            body_of(ServerError::AuthFailed).await.0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            body_of(ServerError::Conflict).await.0,
            StatusCode::CONFLICT
        );
    }

    #[tokio::test]
    async fn test_validation_lists_fields() {
        let err = ServerError::field("content", "empty", "Content is empty.");
        let (status, body) = body_of(err).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["field"], "content");
        assert_eq!(body["errors"][0]["message"], "Content is empty.");
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let (status, body) =
            body_of(ServerError::Sql(SQLxError::PoolTimedOut)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["title"], "Internal server error.");
        assert_eq!(body["detail"], "");
    }
}
