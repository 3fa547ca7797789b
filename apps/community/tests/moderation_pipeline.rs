mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use community::classifier::{Category, Classifier, ClassifierError, Verdict};
use community::models::{
    Comment, ContentType, FlagLevel, FlaggedContentRecord, ModerationAction, Notification,
    NotificationKind, PendingContentRecord, PendingStatus, Post, Role,
};
use community::moderation::{ModerationPipeline, ModerationState, SubmittedItem};
use community::notifications::NotificationDispatcher;
use community::store::{MemoryStore, Query, StoreExt};

use common::seed_user;

enum Script {
    Answer(Category),
    Fail,
    Hang,
}

struct ScriptedClassifier(Script);

#[async_trait]
impl Classifier for ScriptedClassifier {
    async fn request_verdict(&self, _text: &str) -> Result<Verdict, ClassifierError> {
        match &self.0 {
            Script::Answer(category) => Ok(Verdict {
                category: *category,
                confidence: 0.93,
                reasoning: "scripted".to_string(),
                keywords: vec!["scripted".to_string()],
            }),
            Script::Fail => Err(ClassifierError::Api {
                status: 503,
                message: "overloaded".to_string(),
            }),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ClassifierError::EmptyContent)
            }
        }
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    pipeline: ModerationPipeline,
    counselors: Vec<Uuid>,
    student: Uuid,
}

async fn fixture(script: Script) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let mut counselors = Vec::new();
    for name in ["Counselor A", "Counselor B"] {
        counselors.push(seed_user(store.as_ref(), Role::Counselor, name).await.id);
    }
    let student = seed_user(store.as_ref(), Role::Student, "Student").await.id;
    let pipeline = ModerationPipeline::new(
        store.clone(),
        Some(Arc::new(ScriptedClassifier(script))),
        NotificationDispatcher::new(store.clone()),
        Duration::from_millis(200),
    );
    Fixture {
        store,
        pipeline,
        counselors,
        student,
    }
}

impl Fixture {
    async fn posts(&self) -> Vec<Post> {
        self.store.fetch_all(&Query::of::<Post>()).await.unwrap()
    }

    async fn flagged(&self) -> Vec<FlaggedContentRecord> {
        self.store.fetch_all(&Query::of::<FlaggedContentRecord>()).await.unwrap()
    }

    async fn pending(&self) -> Vec<PendingContentRecord> {
        self.store.fetch_all(&Query::of::<PendingContentRecord>()).await.unwrap()
    }

    async fn notifications(&self) -> Vec<Notification> {
        self.store.fetch_all(&Query::of::<Notification>()).await.unwrap()
    }
}

#[tokio::test]
async fn test_suicide_post_is_rejected_and_counselors_alerted() {
    let fx = fixture(Script::Answer(Category::Suicide)).await;

    let outcome = fx
        .pipeline
        .submit(SubmittedItem::post(fx.student, "I don't want to be here anymore", None))
        .await
        .unwrap();

    assert_eq!(outcome.action, ModerationAction::Reject);
    assert_eq!(outcome.flag_level, FlagLevel::Immediate);
    assert_eq!(outcome.state, ModerationState::Rejected);
    assert!(outcome.clear_form);
    assert!(outcome.message.show_chat_suggestion);
    assert!(outcome.published_id.is_none());

    assert!(fx.posts().await.is_empty());
    let flagged = fx.flagged().await;
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].content_id, None);
    assert_eq!(flagged[0].category, Category::Suicide);
    assert_eq!(flagged[0].flag_level, FlagLevel::Immediate);
    assert!(!flagged[0].is_resolved);

    let notifications = fx.notifications().await;
    assert_eq!(notifications.len(), fx.counselors.len());
    for counselor in &fx.counselors {
        assert!(notifications
            .iter()
            .any(|n| n.user_id == *counselor && n.kind == NotificationKind::ContentRejected));
    }
}

#[tokio::test]
async fn test_aggressive_post_is_blocked_without_writes() {
    let fx = fixture(Script::Answer(Category::Aggressive)).await;

    let outcome = fx
        .pipeline
        .submit(SubmittedItem::post(fx.student, "threatening text", None))
        .await
        .unwrap();

    assert_eq!(outcome.action, ModerationAction::Block);
    assert_eq!(outcome.state, ModerationState::Blocked);
    assert!(!outcome.clear_form);
    assert!(fx.posts().await.is_empty());
    assert!(fx.flagged().await.is_empty());
    assert!(fx.pending().await.is_empty());
    assert!(fx.notifications().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_classifier_timeout_quarantines_submission() {
    let fx = fixture(Script::Hang).await;

    let outcome = fx
        .pipeline
        .submit(SubmittedItem::post(fx.student, "hello", Some("https://cdn/img.png".to_string())))
        .await
        .unwrap();

    assert_eq!(outcome.action, ModerationAction::Pending);
    assert_eq!(outcome.flag_level, FlagLevel::PendingReview);
    assert_eq!(outcome.state, ModerationState::Quarantined);
    assert!(outcome.clear_form);

    assert!(fx.posts().await.is_empty());
    let pending = fx.pending().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, PendingStatus::Pending);
    assert_eq!(pending[0].content, "hello");
    assert_eq!(pending[0].image_url.as_deref(), Some("https://cdn/img.png"));
}

#[tokio::test]
async fn test_classifier_error_quarantines_comment_with_targets() {
    let fx = fixture(Script::Fail).await;
    let post = fx
        .store
        .create(Post::new(fx.student, "post".into(), None, FlagLevel::Normal))
        .await
        .unwrap();
    let parent = fx
        .store
        .create(Comment::new(post.id, fx.student, None, "top".into(), FlagLevel::Normal))
        .await
        .unwrap();

    let outcome = fx
        .pipeline
        .submit(SubmittedItem::comment(fx.student, post.id, Some(parent.id), "reply"))
        .await
        .unwrap();

    assert_eq!(outcome.action, ModerationAction::Pending);
    let pending = fx.pending().await;
    assert_eq!(pending[0].content_type, ContentType::Comment);
    assert_eq!(pending[0].post_id, Some(post.id));
    assert_eq!(pending[0].parent_comment_id, Some(parent.id));
}

#[tokio::test]
async fn test_mild_post_is_published_and_flagged() {
    let fx = fixture(Script::Answer(Category::MildNegative)).await;

    let outcome = fx
        .pipeline
        .submit(SubmittedItem::post(fx.student, "  rough week\n", None))
        .await
        .unwrap();

    assert_eq!(outcome.action, ModerationAction::FlagMild);
    assert_eq!(outcome.state, ModerationState::Published);
    let posts = fx.posts().await;
    assert_eq!(posts.len(), 1);
    assert_eq!(Some(posts[0].id), outcome.published_id);
    assert_eq!(posts[0].flag_level, FlagLevel::Mild);
    assert_eq!(posts[0].content, "rough week");

    let flagged = fx.flagged().await;
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].content_id, outcome.published_id);
    assert_eq!(flagged[0].content, "rough week");
    let notifications = fx.notifications().await;
    assert_eq!(notifications.len(), fx.counselors.len());
    assert!(notifications.iter().all(|n| n.kind == NotificationKind::ContentFlagged));
}

#[tokio::test]
async fn test_safe_comment_is_published() {
    let fx = fixture(Script::Answer(Category::Safe)).await;
    let post = fx
        .store
        .create(Post::new(fx.student, "post".into(), None, FlagLevel::Normal))
        .await
        .unwrap();

    let outcome = fx
        .pipeline
        .submit(SubmittedItem::comment(fx.student, post.id, None, " nice "))
        .await
        .unwrap();

    assert_eq!(outcome.action, ModerationAction::Allow);
    let comments: Vec<Comment> = fx.store.fetch_all(&Query::of::<Comment>()).await.unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(Some(comments[0].id), outcome.published_id);
    assert_eq!(comments[0].content, "nice");
    assert!(fx.flagged().await.is_empty());
    assert!(fx.notifications().await.is_empty());
}
