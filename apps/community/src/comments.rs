//! Builds the two-level comment tree of a post.
//!
//! Input is the flat, author-joined comment list of one post in
//! `created_at` ascending order. Top-level comments and replies keep that
//! order. A reply whose parent is not a top-level comment in the list is
//! dropped, never promoted.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::models::{Comment, UserProfile};
use crate::posts::Likeable;

/// A comment as one viewer sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentView {
    #[serde(flatten)]
    pub comment: Comment,
    pub author: Option<UserProfile>,
    pub like_count: usize,
    pub liked_by_me: bool,
}

impl CommentView {
    pub fn new(comment: Comment, author: Option<UserProfile>, viewer: Uuid) -> Self {
        Self {
            like_count: comment.liked_by.len(),
            liked_by_me: comment.liked_by.contains(&viewer),
            comment,
            author,
        }
    }

    pub fn id(&self) -> Uuid {
        self.comment.id
    }

    /// Sets `user`'s like and refreshes the derived fields.
    pub fn apply_like(&mut self, user: Uuid, liked: bool, viewer: Uuid) {
        self.comment.set_liked(user, liked);
        self.like_count = self.comment.liked_by.len();
        self.liked_by_me = self.comment.liked_by.contains(&viewer);
    }
}

/// A top-level comment and its direct replies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: CommentView,
    pub replies: Vec<CommentView>,
}

impl CommentNode {
    /// Finds a comment at either level.
    pub fn find_mut(&mut self, id: Uuid) -> Option<&mut CommentView> {
        if self.comment.id() == id {
            return Some(&mut self.comment);
        }
        self.replies.iter_mut().find(|r| r.id() == id)
    }
}

/// Joins authors and per-viewer like state onto raw comments.
pub fn annotate(comments: Vec<Comment>, authors: &HashMap<Uuid, UserProfile>, viewer: Uuid) -> Vec<CommentView> {
    comments
        .into_iter()
        .map(|c| {
            let author = authors.get(&c.author_id).cloned();
            CommentView::new(c, author, viewer)
        })
        .collect()
}

pub fn build_tree(flat: Vec<CommentView>) -> Vec<CommentNode> {
    let mut tops = Vec::new();
    let mut replies: HashMap<Uuid, Vec<CommentView>> = HashMap::new();

    for view in flat {
        match view.comment.parent_comment_id {
            None => tops.push(view),
            Some(parent) => replies.entry(parent).or_default().push(view),
        }
    }

    let nodes: Vec<CommentNode> = tops
        .into_iter()
        .map(|top| CommentNode {
            replies: replies.remove(&top.id()).unwrap_or_default(),
            comment: top,
        })
        .collect();

    let orphans: usize = replies.values().map(Vec::len).sum();
    if orphans > 0 {
        debug!(orphans, "dropped replies without a top-level parent");
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FlagLevel, Role};

    fn comment(post: Uuid, parent: Option<Uuid>, text: &str) -> Comment {
        Comment::new(post, Uuid::new_v4(), parent, text.to_string(), FlagLevel::Normal)
    }

    fn views(comments: Vec<Comment>) -> Vec<CommentView> {
        annotate(comments, &HashMap::new(), Uuid::new_v4())
    }

    #[test]
    fn test_tree_round_trips_input_order() {
        let post = Uuid::new_v4();
        let a = comment(post, None, "a");
        let b = comment(post, None, "b");
        let a1 = comment(post, Some(a.id), "a1");
        let b1 = comment(post, Some(b.id), "b1");
        let a2 = comment(post, Some(a.id), "a2");
        let flat = views(vec![a.clone(), b.clone(), a1.clone(), b1.clone(), a2.clone()]);

        let tree = build_tree(flat);
        let shape: Vec<(String, Vec<String>)> = tree
            .iter()
            .map(|n| {
                (
                    n.comment.comment.content.clone(),
                    n.replies.iter().map(|r| r.comment.content.clone()).collect(),
                )
            })
            .collect();
        assert_eq!(
            shape,
            vec![
                ("a".to_string(), vec!["a1".to_string(), "a2".to_string()]),
                ("b".to_string(), vec!["b1".to_string()]),
            ]
        );

        let mut flattened: Vec<Uuid> = Vec::new();
        for node in &tree {
            flattened.push(node.comment.id());
            flattened.extend(node.replies.iter().map(CommentView::id));
        }
        let mut expected = vec![a.id, b.id, a1.id, b1.id, a2.id];
        expected.sort();
        flattened.sort();
        assert_eq!(flattened, expected);
    }

    #[test]
    fn test_orphan_replies_are_dropped() {
        let post = Uuid::new_v4();
        let top = comment(post, None, "top");
        let orphan = comment(post, Some(Uuid::new_v4()), "orphan");
        let tree = build_tree(views(vec![top, orphan]));
        assert_eq!(tree.len(), 1);
        assert!(tree[0].replies.is_empty());
    }

    #[test]
    fn test_annotate_joins_author_and_like_state() {
        let viewer = Uuid::new_v4();
        let mut c = comment(Uuid::new_v4(), None, "hi");
        c.liked_by = c.liked_by.with(viewer).with(Uuid::new_v4());
        let author = UserProfile {
            id: c.author_id,
            full_name: "Sam".to_string(),
            role: Role::Student,
        };
        let authors = HashMap::from([(author.id, author.clone())]);

        let view = annotate(vec![c], &authors, viewer).remove(0);
        assert_eq!(view.author, Some(author));
        assert_eq!(view.like_count, 2);
        assert!(view.liked_by_me);
    }
}
