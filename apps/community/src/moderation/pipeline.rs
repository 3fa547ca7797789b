//! Submission pipeline: validate, classify, decide, then write to exactly
//! one partition (or none).
//!
//! ```text
//! Submitted -> Classifying -> Blocked | Rejected | Quarantined | Published
//! ```
//!
//! Terminal states accept no further transitions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classifier::{Category, Classifier, ClassifierError, Verdict};
use crate::errors::AppError;
use crate::models::{
    Comment, ContentType, FlagLevel, FlaggedContentRecord, ModerationAction, NotificationKind,
    PendingContentRecord, PendingStatus, Post, Role,
};
use crate::notifications::{NewNotification, NotificationDispatcher};
use crate::store::{Store, StoreError, StoreExt};

use super::decision::{decide, Decision};
use super::messages::{message_for, ModerationMessage};

/// Longest accepted submission, in characters.
pub const MAX_CONTENT_CHARS: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubmissionTarget {
    Post,
    Comment {
        post_id: Uuid,
        /// Must be a top-level comment on the same post.
        parent_comment_id: Option<Uuid>,
    },
}

impl SubmissionTarget {
    pub fn content_type(&self) -> ContentType {
        match self {
            SubmissionTarget::Post => ContentType::Post,
            SubmissionTarget::Comment { .. } => ContentType::Comment,
        }
    }
}

/// A post or comment as the author sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedItem {
    pub author_id: Uuid,
    pub text: String,
    /// Reference to an already uploaded image. Posts only.
    pub image_url: Option<String>,
    pub target: SubmissionTarget,
}

impl SubmittedItem {
    pub fn post(author_id: Uuid, text: impl Into<String>, image_url: Option<String>) -> Self {
        Self {
            author_id,
            text: text.into(),
            image_url,
            target: SubmissionTarget::Post,
        }
    }

    pub fn comment(author_id: Uuid, post_id: Uuid, parent_comment_id: Option<Uuid>, text: impl Into<String>) -> Self {
        Self {
            author_id,
            text: text.into(),
            image_url: None,
            target: SubmissionTarget::Comment {
                post_id,
                parent_comment_id,
            },
        }
    }

    /// Drops surrounding whitespace. The trimmed text is what gets screened
    /// and stored.
    fn normalized(mut self) -> Self {
        let trimmed = self.text.trim();
        if trimmed.len() != self.text.len() {
            self.text = trimmed.to_string();
        }
        self
    }

    fn image_url(&self) -> Option<String> {
        self.image_url.clone().filter(|url| !url.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationState {
    Submitted,
    Classifying,
    Blocked,
    Rejected,
    Quarantined,
    Published,
}

impl ModerationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ModerationState::Blocked
                | ModerationState::Rejected
                | ModerationState::Quarantined
                | ModerationState::Published
        )
    }

    /// Terminal state reached for a moderation action.
    pub fn for_action(action: ModerationAction) -> Self {
        match action {
            ModerationAction::Block => ModerationState::Blocked,
            ModerationAction::Reject => ModerationState::Rejected,
            ModerationAction::Pending => ModerationState::Quarantined,
            ModerationAction::Allow | ModerationAction::FlagMild => ModerationState::Published,
        }
    }

    /// Moves to `next`, or returns `None` if that transition does not exist.
    pub fn advance(self, next: ModerationState) -> Option<ModerationState> {
        let allowed = match (self, next) {
            (ModerationState::Submitted, ModerationState::Classifying) => true,
            (ModerationState::Classifying, next) => next.is_terminal(),
            _ => false,
        };
        allowed.then_some(next)
    }
}

/// Result of one submission, returned to the author.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModerationOutcome {
    pub action: ModerationAction,
    pub flag_level: FlagLevel,
    pub state: ModerationState,
    /// Id of the published post or comment.
    pub published_id: Option<Uuid>,
    pub message: ModerationMessage,
    /// Whether the author's form should be emptied.
    pub clear_form: bool,
    pub category: Option<Category>,
}

pub struct ModerationPipeline {
    store: Arc<dyn Store>,
    classifier: Option<Arc<dyn Classifier>>,
    notifier: NotificationDispatcher,
    classify_timeout: Duration,
}

impl ModerationPipeline {
    /// Without a classifier every submission is held for review.
    pub fn new(
        store: Arc<dyn Store>,
        classifier: Option<Arc<dyn Classifier>>,
        notifier: NotificationDispatcher,
        classify_timeout: Duration,
    ) -> Self {
        if classifier.is_none() {
            warn!("no content classifier configured; all submissions will be held for counselor review");
        }
        Self {
            store,
            classifier,
            notifier,
            classify_timeout,
        }
    }

    pub async fn submit(&self, item: SubmittedItem) -> Result<ModerationOutcome, AppError> {
        let item = item.normalized();
        self.validate(&item).await?;

        let mut state = ModerationState::Submitted;
        state = transition(state, ModerationState::Classifying)?;

        let verdict = self.classify(&item.text).await;
        let decision = decide(verdict.as_ref());
        state = transition(state, ModerationState::for_action(decision.action))?;

        info!(
            author_id = %item.author_id,
            content_type = item.target.content_type().as_str(),
            action = decision.action.as_str(),
            category = decision.audit.category_str(),
            "submission moderated"
        );

        let published_id = match decision.action {
            ModerationAction::Block => None,
            ModerationAction::Reject => {
                self.reject(&item, &decision).await?;
                None
            }
            ModerationAction::Pending => {
                self.quarantine(&item, &decision).await?;
                None
            }
            ModerationAction::Allow | ModerationAction::FlagMild => Some(self.publish(&item, &decision).await?),
        };

        Ok(ModerationOutcome {
            action: decision.action,
            flag_level: decision.flag_level,
            state,
            published_id,
            message: message_for(decision.action),
            clear_form: decision.action != ModerationAction::Block,
            category: decision.audit.category,
        })
    }

    async fn validate(&self, item: &SubmittedItem) -> Result<(), AppError> {
        let text = item.text.as_str();
        if text.is_empty() && item.image_url().is_none() {
            return Err(AppError::Validation("content cannot be empty".to_string()));
        }
        if text.chars().count() > MAX_CONTENT_CHARS {
            return Err(AppError::Validation(format!(
                "content exceeds {MAX_CONTENT_CHARS} characters"
            )));
        }

        let SubmissionTarget::Comment {
            post_id,
            parent_comment_id,
        } = item.target
        else {
            return Ok(());
        };

        if item.image_url().is_some() {
            return Err(AppError::Validation("comments cannot carry images".to_string()));
        }
        if text.is_empty() {
            return Err(AppError::Validation("comment cannot be empty".to_string()));
        }
        match self.store.fetch_by_id::<Post>(post_id).await {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => return Err(AppError::Validation("post does not exist".to_string())),
            Err(e) => return Err(e.into()),
        }
        if let Some(parent_id) = parent_comment_id {
            let parent = match self.store.fetch_by_id::<Comment>(parent_id).await {
                Ok(parent) => parent,
                Err(StoreError::NotFound(_)) => {
                    return Err(AppError::Validation("parent comment does not exist".to_string()))
                }
                Err(e) => return Err(e.into()),
            };
            if parent.post_id != post_id {
                return Err(AppError::Validation("parent comment belongs to another post".to_string()));
            }
            if parent.parent_comment_id.is_some() {
                return Err(AppError::Validation("replies cannot be nested".to_string()));
            }
        }
        Ok(())
    }

    /// `None` on any failure, including the timeout.
    async fn classify(&self, text: &str) -> Option<Verdict> {
        let classifier = self.classifier.as_ref()?;
        let result = match tokio::time::timeout(self.classify_timeout, classifier.classify(text)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifierError::Timeout(self.classify_timeout)),
        };
        match result {
            Ok(verdict) => Some(verdict),
            Err(e) => {
                warn!(error = %e, "classification failed; holding submission for review");
                None
            }
        }
    }

    async fn reject(&self, item: &SubmittedItem, decision: &Decision) -> Result<(), AppError> {
        let record = self.store.create(flagged_record(item, decision, None)).await?;
        let content_type = item.target.content_type();
        let notification = NewNotification::new(
            NotificationKind::ContentRejected,
            "Content needs immediate attention",
            format!(
                "A {} was held back from the community: {}",
                content_type.as_str(),
                decision.audit.category.map_or("Unknown", Category::label)
            ),
        )
        .link("/counselor/flagged")
        .data(json!({
            "flagged_content_id": record.id,
            "user_id": item.author_id,
            "category": decision.audit.category_str(),
            "flag_level": decision.flag_level,
        }));
        self.alert_counselors(&notification).await;
        Ok(())
    }

    async fn quarantine(&self, item: &SubmittedItem, decision: &Decision) -> Result<(), AppError> {
        let (post_id, parent_comment_id) = match item.target {
            SubmissionTarget::Post => (None, None),
            SubmissionTarget::Comment {
                post_id,
                parent_comment_id,
            } => (Some(post_id), parent_comment_id),
        };
        let record = self
            .store
            .create(PendingContentRecord {
                id: Uuid::new_v4(),
                user_id: item.author_id,
                content_type: item.target.content_type(),
                content: item.text.clone(),
                image_url: item.image_url(),
                post_id,
                parent_comment_id,
                pending_reason: decision.audit.reasoning.clone(),
                status: PendingStatus::Pending,
                created_at: Utc::now(),
            })
            .await?;
        debug!(pending_id = %record.id, "submission quarantined");
        Ok(())
    }

    async fn publish(&self, item: &SubmittedItem, decision: &Decision) -> Result<Uuid, AppError> {
        let (content_id, link) = match item.target {
            SubmissionTarget::Post => {
                let post = Post::new(item.author_id, item.text.clone(), item.image_url(), decision.flag_level);
                let post = self.store.create(post).await?;
                (post.id, format!("/community/posts/{}", post.id))
            }
            SubmissionTarget::Comment {
                post_id,
                parent_comment_id,
            } => {
                let comment = Comment::new(
                    post_id,
                    item.author_id,
                    parent_comment_id,
                    item.text.clone(),
                    decision.flag_level,
                );
                let comment = self.store.create(comment).await?;
                (comment.id, format!("/community/posts/{post_id}"))
            }
        };

        if decision.action == ModerationAction::FlagMild {
            let record = self
                .store
                .create(flagged_record(item, decision, Some(content_id)))
                .await?;
            let notification = NewNotification::new(
                NotificationKind::ContentFlagged,
                "Content flagged for follow-up",
                format!(
                    "A published {} may need a counselor's attention: {}",
                    item.target.content_type().as_str(),
                    decision.audit.category.map_or("Unknown", Category::label)
                ),
            )
            .link(link)
            .data(json!({
                "flagged_content_id": record.id,
                "content_id": content_id,
                "user_id": item.author_id,
                "category": decision.audit.category_str(),
                "flag_level": decision.flag_level,
            }));
            self.alert_counselors(&notification).await;
        }
        Ok(content_id)
    }

    /// The audit record is already written, so a failed fan-out is logged
    /// and does not fail the submission.
    async fn alert_counselors(&self, notification: &NewNotification) {
        if let Err(e) = self.notifier.notify_role(Role::Counselor, notification).await {
            error!(error = %e, kind = ?notification.kind, "failed to notify counselors");
        }
    }
}

fn transition(from: ModerationState, to: ModerationState) -> Result<ModerationState, AppError> {
    from.advance(to).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("invalid moderation transition {from:?} -> {to:?}"))
    })
}

fn flagged_record(item: &SubmittedItem, decision: &Decision, content_id: Option<Uuid>) -> FlaggedContentRecord {
    FlaggedContentRecord {
        id: Uuid::new_v4(),
        user_id: item.author_id,
        content_type: item.target.content_type(),
        content_id,
        content: item.text.clone(),
        flag_level: decision.flag_level,
        category: decision.audit.category.unwrap_or(Category::Unknown),
        keywords: decision.audit.keywords.clone(),
        reasoning: decision.audit.reasoning.clone(),
        is_resolved: false,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn pipeline(store: Arc<MemoryStore>) -> ModerationPipeline {
        ModerationPipeline::new(
            store.clone(),
            None,
            NotificationDispatcher::new(store),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_terminal_states_do_not_advance() {
        let classifying = ModerationState::Submitted.advance(ModerationState::Classifying).unwrap();
        let published = classifying.advance(ModerationState::Published).unwrap();
        assert!(published.advance(ModerationState::Rejected).is_none());
        assert!(ModerationState::Submitted.advance(ModerationState::Published).is_none());
    }

    #[tokio::test]
    async fn test_empty_submission_is_rejected_before_classification() {
        let store = Arc::new(MemoryStore::new());
        let err = pipeline(store)
            .submit(SubmittedItem::post(Uuid::new_v4(), "   ", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_oversized_submission_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let text = "a".repeat(MAX_CONTENT_CHARS + 1);
        let err = pipeline(store)
            .submit(SubmittedItem::post(Uuid::new_v4(), text, None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_nested_reply_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let author = Uuid::new_v4();
        let post = store.create(Post::new(author, "p".into(), None, FlagLevel::Normal)).await.unwrap();
        let top = store
            .create(Comment::new(post.id, author, None, "top".into(), FlagLevel::Normal))
            .await
            .unwrap();
        let reply = store
            .create(Comment::new(post.id, author, Some(top.id), "reply".into(), FlagLevel::Normal))
            .await
            .unwrap();

        let err = pipeline(store)
            .submit(SubmittedItem::comment(author, post.id, Some(reply.id), "deeper"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_without_classifier_everything_is_pending() {
        let store = Arc::new(MemoryStore::new());
        let outcome = pipeline(store.clone())
            .submit(SubmittedItem::post(Uuid::new_v4(), "\n  hello \t", Some("https://img/1.png".into())))
            .await
            .unwrap();
        assert_eq!(outcome.action, ModerationAction::Pending);
        assert_eq!(outcome.state, ModerationState::Quarantined);
        assert!(outcome.clear_form);

        let pending: Vec<PendingContentRecord> = store
            .fetch_all(&crate::store::Query::of::<PendingContentRecord>())
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].image_url.as_deref(), Some("https://img/1.png"));
        assert_eq!(pending[0].content, "hello");
        let posts: Vec<Post> = store.fetch_all(&crate::store::Query::of::<Post>()).await.unwrap();
        assert!(posts.is_empty());
    }
}
