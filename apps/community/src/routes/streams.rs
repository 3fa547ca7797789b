//! Server-Sent-Event streams of live views.
//!
//! Each stream owns its `LiveView`; when the client disconnects the stream
//! is dropped and the view's feed subscription with it.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use serde::Serialize;
use tokio_stream::{wrappers::WatchStream, Stream, StreamExt};
use uuid::Uuid;

use crate::errors::AppError;
use crate::notifications::unread_count;
use crate::session::Session;
use crate::state::AppState;
use crate::sync::{
    ChatThread, CommentThread, LiveView, NotificationFeed, PostFeed, RoomList, StudentRoom, ViewSource,
};

#[derive(Serialize)]
struct SnapshotEvent<'a, T> {
    view: &'static str,
    seq: u64,
    loaded: bool,
    items: &'a [T],
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unread_count: Option<usize>,
}

type Summary<T> = fn(&[T]) -> Option<usize>;

fn live_stream<S>(
    view: LiveView<S>,
    summary: Summary<S::Item>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>>
where
    S: ViewSource,
    S::Item: Serialize,
{
    let name = view.source().name();
    let updates = WatchStream::new(view.watch());
    let events = updates.map(move |snapshot| {
        // Held by the stream so the view lives as long as the client.
        let _view = &view;
        Event::default().event(name).json_data(SnapshotEvent {
            view: name,
            seq: snapshot.seq,
            loaded: snapshot.loaded,
            items: snapshot.items.as_slice(),
            error: snapshot.last_error.as_ref().map(|e| e.to_string()),
            unread_count: summary(snapshot.items.as_slice()),
        })
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

fn no_summary<T>(_: &[T]) -> Option<usize> {
    None
}

/// GET /api/v1/streams/posts
pub async fn handle_post_feed(
    State(state): State<AppState>,
    session: Session,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let view = state.sync.subscribe(PostFeed, session).await?;
    Ok(live_stream(view, no_summary))
}

/// GET /api/v1/streams/posts/:id/comments
pub async fn handle_comment_thread(
    State(state): State<AppState>,
    session: Session,
    Path(post_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let view = state.sync.subscribe(CommentThread::new(post_id), session).await?;
    Ok(live_stream(view, no_summary))
}

/// GET /api/v1/streams/chat/room
pub async fn handle_student_room(
    State(state): State<AppState>,
    session: Session,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let view = state.sync.subscribe(StudentRoom, session).await?;
    Ok(live_stream(view, no_summary))
}

/// GET /api/v1/streams/chat/rooms
pub async fn handle_room_list(
    State(state): State<AppState>,
    session: Session,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let view = state.sync.subscribe(RoomList, session).await?;
    Ok(live_stream(view, no_summary))
}

/// GET /api/v1/streams/chat/rooms/:id/messages
pub async fn handle_chat_thread(
    State(state): State<AppState>,
    session: Session,
    Path(room_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let view = state.sync.subscribe(ChatThread::new(room_id), session).await?;
    Ok(live_stream(view, no_summary))
}

/// GET /api/v1/streams/notifications
pub async fn handle_notification_feed(
    State(state): State<AppState>,
    session: Session,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let view = state.sync.subscribe(NotificationFeed, session).await?;
    Ok(live_stream(view, |items| Some(unread_count(items))))
}
