//! Post views and content removal.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{Comment, LikeSet, Post, UserProfile};
use crate::session::Session;
use crate::store::{Filter, Record, Store, StoreExt};

/// A row with a `liked_by` column.
pub trait Likeable: Record {
    fn liked_by(&self) -> &LikeSet;
    fn liked_by_mut(&mut self) -> &mut LikeSet;

    /// Adds or removes `user`. Both directions are idempotent.
    fn set_liked(&mut self, user: Uuid, liked: bool) {
        let next = if liked {
            self.liked_by().with(user)
        } else {
            self.liked_by().without(user)
        };
        *self.liked_by_mut() = next;
    }
}

impl Likeable for Post {
    fn liked_by(&self) -> &LikeSet {
        &self.liked_by
    }

    fn liked_by_mut(&mut self) -> &mut LikeSet {
        &mut self.liked_by
    }
}

impl Likeable for Comment {
    fn liked_by(&self) -> &LikeSet {
        &self.liked_by
    }

    fn liked_by_mut(&mut self) -> &mut LikeSet {
        &mut self.liked_by
    }
}

/// A post in the public feed, as one viewer sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostView {
    #[serde(flatten)]
    pub post: Post,
    pub author: Option<UserProfile>,
    pub like_count: usize,
    pub liked_by_me: bool,
}

impl PostView {
    pub fn new(post: Post, author: Option<UserProfile>, viewer: Uuid) -> Self {
        Self {
            like_count: post.liked_by.len(),
            liked_by_me: post.liked_by.contains(&viewer),
            post,
            author,
        }
    }

    pub fn apply_like(&mut self, user: Uuid, liked: bool, viewer: Uuid) {
        self.post.set_liked(user, liked);
        self.like_count = self.post.liked_by.len();
        self.liked_by_me = self.post.liked_by.contains(&viewer);
    }
}

#[derive(Clone)]
pub struct PostService {
    store: Arc<dyn Store>,
}

impl PostService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Deletes a post together with all its comments.
    pub async fn delete_post(&self, session: &Session, post_id: Uuid) -> Result<(), AppError> {
        let post: Post = self.store.fetch_by_id(post_id).await?;
        if post.author_id != session.user_id && !session.can_moderate() {
            return Err(AppError::Forbidden);
        }

        let comments: Vec<Comment> = self
            .store
            .delete_where(&Filter::all().eq("post_id", post_id))
            .await?;
        self.store.delete_where::<Post>(&Filter::by_id(post_id)).await?;
        info!(post_id = %post_id, comments = comments.len(), by = %session.user_id, "post deleted");
        Ok(())
    }

    /// Deletes a comment. A top-level comment takes its replies with it.
    pub async fn delete_comment(&self, session: &Session, comment_id: Uuid) -> Result<(), AppError> {
        let comment: Comment = self.store.fetch_by_id(comment_id).await?;
        if comment.author_id != session.user_id && !session.can_moderate() {
            return Err(AppError::Forbidden);
        }

        let replies: Vec<Comment> = if comment.parent_comment_id.is_none() {
            self.store
                .delete_where(&Filter::all().eq("parent_comment_id", comment_id))
                .await?
        } else {
            Vec::new()
        };
        self.store.delete_where::<Comment>(&Filter::by_id(comment_id)).await?;
        info!(comment_id = %comment_id, replies = replies.len(), by = %session.user_id, "comment deleted");
        Ok(())
    }
}
