use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::Notification;
use crate::session::Session;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct AffectedResponse {
    pub affected: usize,
}

/// POST /api/v1/notifications/:id/read
pub async fn handle_mark_read(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, AppError> {
    Ok(Json(state.notifier.mark_as_read(session.user_id, id).await?))
}

/// POST /api/v1/me/notifications/read-all
pub async fn handle_mark_all_read(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<AffectedResponse>, AppError> {
    let affected = state.notifier.mark_all_as_read(session.user_id).await?;
    Ok(Json(AffectedResponse { affected }))
}

/// DELETE /api/v1/notifications/:id
pub async fn handle_delete_notification(
    State(state): State<AppState>,
    session: Session,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.notifier.delete(session.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/me/notifications/read
pub async fn handle_delete_read(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<AffectedResponse>, AppError> {
    let affected = state.notifier.delete_all_read(session.user_id).await?;
    Ok(Json(AffectedResponse { affected }))
}
