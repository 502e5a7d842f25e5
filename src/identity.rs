//! Derive caller identity from the bearer credential.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::{Result, ServerError};
use crate::token::TokenManager;
use crate::user::UserId;
use crate::AppState;

const BEARER: &str = "bearer";

/// Who is calling.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Identity {
    #[default]
    Anonymous,
    User(UserId),
}

impl Identity {
    /// ID of the signed in user, if any.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Identity::Anonymous => None,
            Identity::User(id) => Some(*id),
        }
    }
}

/// Turn a raw `Authorization` header value into an [`Identity`].
///
/// No credential means [`Identity::Anonymous`]. A credential that does not
/// verify is a [`ServerError::SessionInvalid`], never an anonymous caller.
/// The `Bearer` scheme is optional and matched case-insensitively.
pub fn resolve(token: &TokenManager, raw: Option<&str>) -> Result<Identity> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return Ok(Identity::Anonymous);
    };
    let credential = match raw.split_once(char::is_whitespace) {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case(BEARER) => {
            rest.trim()
        },
        _ => raw,
    };

    match token.decode(credential) {
        Ok(id) => Ok(Identity::User(id)),
        Err(err) => {
            tracing::debug!(error = %err, "credential rejected");
            Err(ServerError::SessionInvalid)
        },
    }
}

/// Middleware attaching an [`Identity`] to every request.
pub async fn identify(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let raw = match req.headers().get(header::AUTHORIZATION) {
        Some(value) => {
            Some(value.to_str().map_err(|_| ServerError::SessionInvalid)?)
        },
        None => None,
    };

    let identity = resolve(&state.token, raw)?;
    tracing::debug!(?identity, "identity resolved");

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
