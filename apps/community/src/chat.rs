//! Support chat rooms between a student and counselors.
//!
//! A student has at most one active room; closed rooms stay as history.
//! New rooms sit in the public pool
//! (`counselor_id == None`) until a counselor claims them.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{ChatMessage, ChatRoom, NotificationKind, Role, RoomStatus};
use crate::notifications::{NewNotification, NotificationDispatcher};
use crate::session::Session;
use crate::store::{Filter, Patch, Query, Store, StoreError, StoreExt};

/// Longest accepted chat message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Clone)]
pub struct ChatService {
    store: Arc<dyn Store>,
    notifier: NotificationDispatcher,
}

impl ChatService {
    pub fn new(store: Arc<dyn Store>, notifier: NotificationDispatcher) -> Self {
        Self { store, notifier }
    }

    async fn room(&self, room_id: Uuid) -> Result<ChatRoom, AppError> {
        Ok(self.store.fetch_by_id(room_id).await?)
    }

    /// Opens the student's room and alerts every counselor. Fails while the
    /// student still has an active room.
    pub async fn create_room(&self, session: &Session) -> Result<ChatRoom, AppError> {
        if session.role != Role::Student {
            return Err(AppError::Forbidden);
        }
        let existing: Vec<ChatRoom> = self
            .store
            .fetch_all(&Query::of::<ChatRoom>().filter(
                Filter::all()
                    .eq("student_id", session.user_id)
                    .eq("status", RoomStatus::Active),
            ))
            .await?;
        if !existing.is_empty() {
            return Err(AppError::Conflict("student already has a chat room".to_string()));
        }

        let room = match self.store.create(ChatRoom::open_for(session.user_id)).await {
            Ok(room) => room,
            Err(StoreError::UniqueViolation(_)) => {
                return Err(AppError::Conflict("student already has a chat room".to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        info!(room_id = %room.id, student_id = %session.user_id, "chat room created");

        let notification = NewNotification::new(
            NotificationKind::ChatRequest,
            "New chat request",
            "A student is waiting for a counselor.",
        )
        .link(format!("/counselor/chat/{}", room.id))
        .data(json!({ "room_id": room.id, "student_id": session.user_id }));
        if let Err(e) = self.notifier.notify_role(Role::Counselor, &notification).await {
            error!(error = %e, room_id = %room.id, "failed to notify counselors of chat request");
        }
        Ok(room)
    }

    /// Removes a room and its messages. Owner or admin only.
    pub async fn delete_room(&self, session: &Session, room_id: Uuid) -> Result<(), AppError> {
        let room = self.room(room_id).await?;
        if room.student_id != session.user_id && session.role != Role::Admin {
            return Err(AppError::Forbidden);
        }
        let messages: Vec<ChatMessage> = self
            .store
            .delete_where(&Filter::all().eq("room_id", room_id))
            .await?;
        self.store.delete_where::<ChatRoom>(&Filter::by_id(room_id)).await?;
        info!(room_id = %room_id, messages = messages.len(), "chat room deleted");
        Ok(())
    }

    /// Assigns an unassigned room to the calling counselor. Claiming a room
    /// already held by the caller is a no-op.
    pub async fn claim_room(&self, session: &Session, room_id: Uuid) -> Result<ChatRoom, AppError> {
        if session.role != Role::Counselor {
            return Err(AppError::Forbidden);
        }
        let room = self.room(room_id).await?;
        match room.counselor_id {
            Some(c) if c == session.user_id => return Ok(room),
            Some(_) => return Err(AppError::Conflict("room is already assigned".to_string())),
            None => {}
        }

        // Only succeeds while the room is still in the pool.
        let mut claimed: Vec<ChatRoom> = self
            .store
            .update_where(
                &Filter::by_id(room_id).is_null("counselor_id"),
                &Patch::new().set("counselor_id", session.user_id),
            )
            .await?;
        let room = claimed
            .pop()
            .ok_or_else(|| AppError::Conflict("room is already assigned".to_string()))?;
        info!(room_id = %room_id, counselor_id = %session.user_id, "chat room claimed");

        let notification = NewNotification::new(
            NotificationKind::ChatAssigned,
            "A counselor joined your chat",
            "A counselor has picked up your conversation.",
        )
        .link("/chat")
        .data(json!({ "room_id": room.id, "counselor_id": session.user_id }));
        if let Err(e) = self.notifier.notify(room.student_id, &notification).await {
            error!(error = %e, room_id = %room.id, "failed to notify student of assignment");
        }
        Ok(room)
    }

    /// Returns a room to the public pool.
    pub async fn release_room(&self, session: &Session, room_id: Uuid) -> Result<ChatRoom, AppError> {
        let room = self.room(room_id).await?;
        let assigned_to_caller = room.counselor_id == Some(session.user_id);
        if !assigned_to_caller && session.role != Role::Admin {
            return Err(AppError::Forbidden);
        }
        let room: ChatRoom = self
            .store
            .update_by_id(room_id, &Patch::new().set("counselor_id", Option::<Uuid>::None))
            .await?;
        info!(room_id = %room_id, "chat room released to pool");
        Ok(room)
    }

    pub async fn close_room(&self, session: &Session, room_id: Uuid) -> Result<ChatRoom, AppError> {
        let room = self.room(room_id).await?;
        if !can_participate(session, &room) {
            return Err(AppError::Forbidden);
        }
        Ok(self
            .store
            .update_by_id(room_id, &Patch::new().set("status", RoomStatus::Closed))
            .await?)
    }

    /// Appends a message and moves the room's `last_message_at` forward.
    pub async fn send_message(&self, session: &Session, room_id: Uuid, text: &str) -> Result<ChatMessage, AppError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("message cannot be empty".to_string()));
        }
        if text.chars().count() > MAX_MESSAGE_CHARS {
            return Err(AppError::Validation(format!(
                "message exceeds {MAX_MESSAGE_CHARS} characters"
            )));
        }

        let room = self.room(room_id).await?;
        if !can_participate(session, &room) {
            return Err(AppError::Forbidden);
        }
        if room.status == RoomStatus::Closed {
            return Err(AppError::Conflict("room is closed".to_string()));
        }

        let message = self
            .store
            .create(ChatMessage::new(room_id, session.user_id, text.to_string()))
            .await?;
        // Conditional so a slower concurrent send cannot move it backwards.
        self.store
            .update_where::<ChatRoom>(
                &Filter::by_id(room_id).before("last_message_at", message.created_at),
                &Patch::new().set("last_message_at", message.created_at),
            )
            .await?;
        Ok(message)
    }
}

/// Student owner, the assigned counselor (any counselor while unassigned),
/// or an admin.
fn can_participate(session: &Session, room: &ChatRoom) -> bool {
    match session.role {
        Role::Admin => true,
        Role::Student => room.student_id == session.user_id,
        Role::Counselor => room.counselor_id.map_or(true, |c| c == session.user_id),
    }
}
