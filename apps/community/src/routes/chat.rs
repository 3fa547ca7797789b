//! Chat rooms and messages.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{ChatMessage, ChatRoom};
use crate::session::Session;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

/// POST /api/v1/chat/rooms
pub async fn handle_create_room(
    State(state): State<AppState>,
    session: Session,
) -> Result<(StatusCode, Json<ChatRoom>), AppError> {
    let room = state.chat.create_room(&session).await?;
    Ok((StatusCode::CREATED, Json(room)))
}

/// DELETE /api/v1/chat/rooms/:id
pub async fn handle_delete_room(
    State(state): State<AppState>,
    session: Session,
    Path(room_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.chat.delete_room(&session, room_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/chat/rooms/:id/claim
pub async fn handle_claim_room(
    State(state): State<AppState>,
    session: Session,
    Path(room_id): Path<Uuid>,
) -> Result<Json<ChatRoom>, AppError> {
    Ok(Json(state.chat.claim_room(&session, room_id).await?))
}

/// POST /api/v1/chat/rooms/:id/release
pub async fn handle_release_room(
    State(state): State<AppState>,
    session: Session,
    Path(room_id): Path<Uuid>,
) -> Result<Json<ChatRoom>, AppError> {
    Ok(Json(state.chat.release_room(&session, room_id).await?))
}

/// POST /api/v1/chat/rooms/:id/close
pub async fn handle_close_room(
    State(state): State<AppState>,
    session: Session,
    Path(room_id): Path<Uuid>,
) -> Result<Json<ChatRoom>, AppError> {
    Ok(Json(state.chat.close_room(&session, room_id).await?))
}

/// POST /api/v1/chat/rooms/:id/messages
pub async fn handle_send_message(
    State(state): State<AppState>,
    session: Session,
    Path(room_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), AppError> {
    let message = state.chat.send_message(&session, room_id, &req.content).await?;
    Ok((StatusCode::CREATED, Json(message)))
}
