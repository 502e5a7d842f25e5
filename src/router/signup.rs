use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

use crate::AppState;
use crate::error::Result;
use crate::router::{TokenResponse, Valid};
use crate::user::SignUp;

/// Handler to create an account.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<SignUp>,
) -> Result<(StatusCode, Json<TokenResponse>)> {
    let token = state.users.sign_up(&body).await?;

    Ok((
        StatusCode::CREATED,
        Json(TokenResponse::bearer(token, state.users.expires_in())),
    ))
}
