//! Notes-related HTTP API.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::identity::Identity;
use crate::note::{Note, NoteId};
use crate::router::{Path, Valid};
use crate::user::User;

/// Note content sent on creation and update.
///
/// Content rules are checked by the note service, after authorization.
#[derive(Debug, Deserialize, Validate)]
pub struct Body {
    content: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct Deleted {
    pub deleted: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        // `GET /notes` goes to `list`, `POST /notes` to `create`.
        .route("/", get(list).post(create))
        .route("/{id}", get(find).patch(update).delete(delete))
        // `POST /notes/{id}/favorite` toggles caller membership.
        .route("/{id}/favorite", post(toggle_favorite))
        .route("/{id}/author", get(author))
        .route("/{id}/favorited-by", get(favorited_by))
}

async fn list(State(state): State<AppState>) -> Result<Json<Vec<Note>>> {
    Ok(Json(state.notes.list().await?))
}

async fn find(
    State(state): State<AppState>,
    Path(id): Path<NoteId>,
) -> Result<Json<Note>> {
    Ok(Json(state.notes.find(id).await?))
}

async fn create(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Valid(body): Valid<Body>,
) -> Result<(StatusCode, Json<Note>)> {
    let note = state.notes.create(&identity, &body.content).await?;

    Ok((StatusCode::CREATED, Json(note)))
}

async fn update(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<NoteId>,
    Valid(body): Valid<Body>,
) -> Result<Json<Note>> {
    Ok(Json(state.notes.update(&identity, id, &body.content).await?))
}

async fn delete(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<NoteId>,
) -> Result<Json<Deleted>> {
    let deleted = state.notes.delete(&identity, id).await?;

    Ok(Json(Deleted { deleted }))
}

async fn toggle_favorite(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<NoteId>,
) -> Result<Json<Note>> {
    Ok(Json(state.notes.toggle_favorite(&identity, id).await?))
}

async fn author(
    State(state): State<AppState>,
    Path(id): Path<NoteId>,
) -> Result<Json<User>> {
    let note = state.notes.find(id).await?;

    Ok(Json(state.users.find_by_id(note.author).await?))
}

async fn favorited_by(
    State(state): State<AppState>,
    Path(id): Path<NoteId>,
) -> Result<Json<Vec<User>>> {
    let note = state.notes.find(id).await?;

    Ok(Json(state.users.find_many(&note.favorited_by).await?))
}
