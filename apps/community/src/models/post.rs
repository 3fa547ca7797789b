use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::FlagLevel;

/// Set of user ids that liked a post or comment.
///
/// Keeps first-like order and never holds the same id twice, so
/// `len()` is always the like count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Uuid>", into = "Vec<Uuid>")]
pub struct LikeSet(Vec<Uuid>);

impl LikeSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn contains(&self, user_id: &Uuid) -> bool {
        self.0.contains(user_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[Uuid] {
        &self.0
    }

    /// Returns the set with `user_id` added. Adding a present id is a no-op.
    pub fn with(&self, user_id: Uuid) -> Self {
        let mut next = self.clone();
        if !next.0.contains(&user_id) {
            next.0.push(user_id);
        }
        next
    }

    /// Returns the set with `user_id` removed. Removing an absent id is a no-op.
    pub fn without(&self, user_id: Uuid) -> Self {
        Self(self.0.iter().copied().filter(|id| *id != user_id).collect())
    }
}

impl From<Vec<Uuid>> for LikeSet {
    fn from(ids: Vec<Uuid>) -> Self {
        let mut set = LikeSet::new();
        for id in ids {
            set = set.with(id);
        }
        set
    }
}

impl From<LikeSet> for Vec<Uuid> {
    fn from(set: LikeSet) -> Self {
        set.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub image_url: Option<String>,
    pub flag_level: FlagLevel,
    pub liked_by: LikeSet,
    pub created_at: DateTime<Utc>,
}

impl Post {
    pub fn new(author_id: Uuid, content: String, image_url: Option<String>, flag_level: FlagLevel) -> Self {
        Self {
            id: Uuid::new_v4(),
            author_id,
            content,
            image_url,
            flag_level,
            liked_by: LikeSet::new(),
            created_at: Utc::now(),
        }
    }
}

/// A comment on a post. `parent_comment_id` always points at a top-level
/// comment, so threads are exactly two levels deep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_id: Uuid,
    pub parent_comment_id: Option<Uuid>,
    pub content: String,
    pub flag_level: FlagLevel,
    pub liked_by: LikeSet,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(
        post_id: Uuid,
        author_id: Uuid,
        parent_comment_id: Option<Uuid>,
        content: String,
        flag_level: FlagLevel,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            post_id,
            author_id,
            parent_comment_id,
            content,
            flag_level,
            liked_by: LikeSet::new(),
            created_at: Utc::now(),
        }
    }
}
