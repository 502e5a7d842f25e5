use axum::Json;
use axum::extract::State;

use crate::AppState;
use crate::error::Result;
use crate::router::{TokenResponse, Valid};
use crate::user::SignIn;

/// Handler to sign in with email or username.
pub async fn handler(
    State(state): State<AppState>,
    Valid(body): Valid<SignIn>,
) -> Result<Json<TokenResponse>> {
    let token = state.users.sign_in(&body).await?;

    Ok(Json(TokenResponse::bearer(token, state.users.expires_in())))
}
