pub mod chat;
pub mod content;
pub mod health;
pub mod notifications;
pub mod streams;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Posts and comments
        .route("/api/v1/posts", post(content::handle_submit_post))
        .route("/api/v1/posts/:id", delete(content::handle_delete_post))
        .route("/api/v1/posts/:id/comments", post(content::handle_submit_comment))
        .route("/api/v1/posts/:id/like", post(content::handle_like_post))
        .route("/api/v1/comments/:id", delete(content::handle_delete_comment))
        .route("/api/v1/comments/:id/like", post(content::handle_like_comment))
        // Chat
        .route("/api/v1/chat/rooms", post(chat::handle_create_room))
        .route("/api/v1/chat/rooms/:id", delete(chat::handle_delete_room))
        .route("/api/v1/chat/rooms/:id/claim", post(chat::handle_claim_room))
        .route("/api/v1/chat/rooms/:id/release", post(chat::handle_release_room))
        .route("/api/v1/chat/rooms/:id/close", post(chat::handle_close_room))
        .route("/api/v1/chat/rooms/:id/messages", post(chat::handle_send_message))
        // Notifications
        .route("/api/v1/notifications/:id", delete(notifications::handle_delete_notification))
        .route("/api/v1/notifications/:id/read", post(notifications::handle_mark_read))
        .route("/api/v1/me/notifications/read-all", post(notifications::handle_mark_all_read))
        .route("/api/v1/me/notifications/read", delete(notifications::handle_delete_read))
        // Live views
        .route("/api/v1/streams/posts", get(streams::handle_post_feed))
        .route("/api/v1/streams/posts/:id/comments", get(streams::handle_comment_thread))
        .route("/api/v1/streams/chat/room", get(streams::handle_student_room))
        .route("/api/v1/streams/chat/rooms", get(streams::handle_room_list))
        .route("/api/v1/streams/chat/rooms/:id/messages", get(streams::handle_chat_thread))
        .route("/api/v1/streams/notifications", get(streams::handle_notification_feed))
        .with_state(state)
}
