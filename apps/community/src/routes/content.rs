//! Posts, comments and likes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Comment, Post};
use crate::moderation::{ModerationOutcome, SubmittedItem};
use crate::session::Session;
use crate::state::AppState;
use crate::sync::{LikeChange, LikeWrite};

#[derive(Debug, Deserialize)]
pub struct SubmitPostRequest {
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitCommentRequest {
    pub content: String,
    #[serde(default)]
    pub parent_comment_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct LikeRequest {
    #[serde(default = "default_like_change")]
    pub change: LikeChange,
}

fn default_like_change() -> LikeChange {
    LikeChange::Toggle
}

#[derive(Debug, Serialize)]
pub struct LikeResponse {
    pub liked: bool,
    pub like_count: usize,
}

impl From<LikeWrite> for LikeResponse {
    fn from(write: LikeWrite) -> Self {
        Self {
            liked: write.liked,
            like_count: write.liked_by.len(),
        }
    }
}

/// POST /api/v1/posts
///
/// Screens and, depending on the outcome, publishes a post. Blocked and
/// held-back posts still answer 200; the outcome says what happened.
pub async fn handle_submit_post(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<SubmitPostRequest>,
) -> Result<Json<ModerationOutcome>, AppError> {
    let item = SubmittedItem::post(session.user_id, req.content, req.image_url);
    Ok(Json(state.pipeline.submit(item).await?))
}

/// POST /api/v1/posts/:id/comments
pub async fn handle_submit_comment(
    State(state): State<AppState>,
    session: Session,
    Path(post_id): Path<Uuid>,
    Json(req): Json<SubmitCommentRequest>,
) -> Result<Json<ModerationOutcome>, AppError> {
    let item = SubmittedItem::comment(session.user_id, post_id, req.parent_comment_id, req.content);
    Ok(Json(state.pipeline.submit(item).await?))
}

/// DELETE /api/v1/posts/:id
pub async fn handle_delete_post(
    State(state): State<AppState>,
    session: Session,
    Path(post_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.posts.delete_post(&session, post_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/comments/:id
pub async fn handle_delete_comment(
    State(state): State<AppState>,
    session: Session,
    Path(comment_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.posts.delete_comment(&session, comment_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/posts/:id/like
pub async fn handle_like_post(
    State(state): State<AppState>,
    session: Session,
    Path(post_id): Path<Uuid>,
    Json(req): Json<LikeRequest>,
) -> Result<Json<LikeResponse>, AppError> {
    let write = state.sync.set_like::<Post>(&session, post_id, req.change).await?;
    Ok(Json(write.into()))
}

/// POST /api/v1/comments/:id/like
pub async fn handle_like_comment(
    State(state): State<AppState>,
    session: Session,
    Path(comment_id): Path<Uuid>,
    Json(req): Json<LikeRequest>,
) -> Result<Json<LikeResponse>, AppError> {
    let write = state.sync.set_like::<Comment>(&session, comment_id, req.change).await?;
    Ok(Json(write.into()))
}
