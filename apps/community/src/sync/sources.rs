//! The live views the community ships.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::comments::{annotate, build_tree, CommentNode};
use crate::models::{ChatMessage, ChatRoom, Comment, Notification, Post, RoomStatus, UserProfile};
use crate::notifications::FEED_LIMIT;
use crate::posts::PostView;
use crate::session::Session;
use crate::store::{Direction, EventKind, Filter, Query, Resource, Store, StoreExt, Topic};

use super::engine::{LikeableView, ViewSource, Visibility};
use super::SyncError;

/// Profiles of the given users, keyed by id.
async fn load_authors(
    store: &dyn Store,
    ids: impl IntoIterator<Item = Uuid>,
) -> Result<HashMap<Uuid, UserProfile>, SyncError> {
    let mut ids: Vec<Uuid> = ids.into_iter().collect();
    ids.sort();
    ids.dedup();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let users: Vec<UserProfile> = store
        .fetch_all(&Query::of::<UserProfile>().filter(Filter::all().in_list("id", ids)))
        .await?;
    Ok(users.into_iter().map(|u| (u.id, u)).collect())
}

fn room_visibility(session: &Session) -> Visibility<ChatRoom> {
    let scope = session.room_scope();
    Arc::new(move |room| scope.permits(room))
}

/// Public post feed, newest first.
#[derive(Debug, Clone, Default)]
pub struct PostFeed;

#[async_trait]
impl ViewSource for PostFeed {
    type Item = PostView;

    fn name(&self) -> &'static str {
        "post_feed"
    }

    fn topics(&self, _session: &Session) -> Vec<Topic> {
        vec![Topic::new(Resource::Posts)]
    }

    async fn fetch(&self, store: &dyn Store, session: &Session) -> Result<Vec<PostView>, SyncError> {
        let posts: Vec<Post> = store
            .fetch_all(&Query::of::<Post>().order_by("created_at", Direction::Desc))
            .await?;
        let authors = load_authors(store, posts.iter().map(|p| p.author_id)).await?;
        Ok(posts
            .into_iter()
            .map(|p| {
                let author = authors.get(&p.author_id).cloned();
                PostView::new(p, author, session.user_id)
            })
            .collect())
    }
}

impl LikeableView for PostFeed {
    type Record = Post;

    fn patch_like(items: &mut Vec<PostView>, id: Uuid, user: Uuid, liked: bool, viewer: Uuid) {
        if let Some(view) = items.iter_mut().find(|v| v.post.id == id) {
            view.apply_like(user, liked, viewer);
        }
    }
}

/// Comment tree of one post.
#[derive(Debug, Clone)]
pub struct CommentThread {
    pub post_id: Uuid,
}

impl CommentThread {
    pub fn new(post_id: Uuid) -> Self {
        Self { post_id }
    }
}

#[async_trait]
impl ViewSource for CommentThread {
    type Item = CommentNode;

    fn name(&self) -> &'static str {
        "comment_thread"
    }

    fn topics(&self, _session: &Session) -> Vec<Topic> {
        vec![Topic::new(Resource::Comments).filter(Filter::all().eq("post_id", self.post_id))]
    }

    async fn fetch(&self, store: &dyn Store, session: &Session) -> Result<Vec<CommentNode>, SyncError> {
        let comments: Vec<Comment> = store
            .fetch_all(
                &Query::of::<Comment>()
                    .filter(Filter::all().eq("post_id", self.post_id))
                    .order_by("created_at", Direction::Asc),
            )
            .await?;
        let authors = load_authors(store, comments.iter().map(|c| c.author_id)).await?;
        Ok(build_tree(annotate(comments, &authors, session.user_id)))
    }
}

impl LikeableView for CommentThread {
    type Record = Comment;

    fn patch_like(items: &mut Vec<CommentNode>, id: Uuid, user: Uuid, liked: bool, viewer: Uuid) {
        if let Some(view) = items.iter_mut().find_map(|node| node.find_mut(id)) {
            view.apply_like(user, liked, viewer);
        }
    }
}

/// The student's current room: the newest one, active or just closed.
#[derive(Debug, Clone, Default)]
pub struct StudentRoom;

#[async_trait]
impl ViewSource for StudentRoom {
    type Item = ChatRoom;

    fn name(&self) -> &'static str {
        "student_room"
    }

    fn topics(&self, session: &Session) -> Vec<Topic> {
        vec![Topic::new(Resource::ChatRooms).filter(Filter::all().eq("student_id", session.user_id))]
    }

    async fn fetch(&self, store: &dyn Store, session: &Session) -> Result<Vec<ChatRoom>, SyncError> {
        Ok(store
            .fetch_all(
                &Query::of::<ChatRoom>()
                    .filter(Filter::all().eq("student_id", session.user_id))
                    .order_by("created_at", Direction::Desc)
                    .limit(1),
            )
            .await?)
    }

    fn visibility(&self, session: &Session) -> Visibility<ChatRoom> {
        room_visibility(session)
    }
}

/// Active rooms the session may see, most recent conversation first.
#[derive(Debug, Clone, Default)]
pub struct RoomList;

#[async_trait]
impl ViewSource for RoomList {
    type Item = ChatRoom;

    fn name(&self) -> &'static str {
        "room_list"
    }

    fn topics(&self, _session: &Session) -> Vec<Topic> {
        vec![
            Topic::new(Resource::ChatRooms),
            Topic::new(Resource::ChatMessages).only(EventKind::Insert),
        ]
    }

    async fn fetch(&self, store: &dyn Store, _session: &Session) -> Result<Vec<ChatRoom>, SyncError> {
        Ok(store
            .fetch_all(
                &Query::of::<ChatRoom>()
                    .filter(Filter::all().eq("status", RoomStatus::Active))
                    .order_by("last_message_at", Direction::Desc),
            )
            .await?)
    }

    fn visibility(&self, session: &Session) -> Visibility<ChatRoom> {
        room_visibility(session)
    }
}

/// Messages of one room, oldest first.
#[derive(Debug, Clone)]
pub struct ChatThread {
    pub room_id: Uuid,
}

impl ChatThread {
    pub fn new(room_id: Uuid) -> Self {
        Self { room_id }
    }
}

#[async_trait]
impl ViewSource for ChatThread {
    type Item = ChatMessage;

    fn name(&self) -> &'static str {
        "chat_thread"
    }

    fn topics(&self, _session: &Session) -> Vec<Topic> {
        vec![Topic::new(Resource::ChatMessages).filter(Filter::all().eq("room_id", self.room_id))]
    }

    async fn fetch(&self, store: &dyn Store, session: &Session) -> Result<Vec<ChatMessage>, SyncError> {
        let room: ChatRoom = store.fetch_by_id(self.room_id).await?;
        if !session.room_scope().permits(&room) {
            return Err(SyncError::NotVisible(Resource::ChatRooms));
        }
        Ok(store
            .fetch_all(
                &Query::of::<ChatMessage>()
                    .filter(Filter::all().eq("room_id", self.room_id))
                    .order_by("created_at", Direction::Asc),
            )
            .await?)
    }
}

/// Latest notifications of the user in session.
#[derive(Debug, Clone, Default)]
pub struct NotificationFeed;

#[async_trait]
impl ViewSource for NotificationFeed {
    type Item = Notification;

    fn name(&self) -> &'static str {
        "notification_feed"
    }

    fn topics(&self, session: &Session) -> Vec<Topic> {
        vec![Topic::new(Resource::Notifications).filter(Filter::all().eq("user_id", session.user_id))]
    }

    async fn fetch(&self, store: &dyn Store, session: &Session) -> Result<Vec<Notification>, SyncError> {
        Ok(store
            .fetch_all(
                &Query::of::<Notification>()
                    .filter(Filter::all().eq("user_id", session.user_id))
                    .order_by("created_at", Direction::Desc)
                    .limit(FEED_LIMIT),
            )
            .await?)
    }
}
