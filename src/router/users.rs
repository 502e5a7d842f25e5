//! Users-related HTTP API.

use axum::extract::State;
use axum::routing::get;
use axum::{Extension, Json, Router};

use crate::AppState;
use crate::error::Result;
use crate::identity::Identity;
use crate::note::Note;
use crate::router::Path;
use crate::user::User;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list))
        // `GET /users/@me` goes to `me`. Authorization required.
        .route("/@me", get(me))
        .route("/@me/notes", get(my_notes))
        .route("/@me/favorites", get(my_favorites))
        .route("/{username}", get(find))
        .route("/{username}/notes", get(notes))
        .route("/{username}/favorites", get(favorites))
}

async fn list(State(state): State<AppState>) -> Result<Json<Vec<User>>> {
    Ok(Json(state.users.list().await?))
}

async fn me(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<User>> {
    Ok(Json(state.users.me(&identity).await?))
}

async fn my_notes(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Note>>> {
    let user = state.users.me(&identity).await?;

    Ok(Json(state.notes.by_author(user.id).await?))
}

async fn my_favorites(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<Json<Vec<Note>>> {
    let user = state.users.me(&identity).await?;

    Ok(Json(state.notes.favorites_of(user.id).await?))
}

async fn find(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<User>> {
    Ok(Json(state.users.find_by_username(&username).await?))
}

async fn notes(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Vec<Note>>> {
    let user = state.users.find_by_username(&username).await?;

    Ok(Json(state.notes.by_author(user.id).await?))
}

async fn favorites(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Vec<Note>>> {
    let user = state.users.find_by_username(&username).await?;

    Ok(Json(state.notes.favorites_of(user.id).await?))
}
