//! Change feed boundary.
//!
//! A subscription covers a set of topics (resource + filter + event mask) and
//! owns exactly one underlying connection. Events are forwarded by a task the
//! subscription owns; dropping or closing the subscription aborts that task,
//! which is what releases the connection.
//!
//! Events identify the changed row and carry only its routing columns, never
//! the body. Consumers that need the row re-fetch it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::{Filter, Resource, Row};

/// Buffered events per subscription before the forwarder waits on the consumer.
pub const SUBSCRIPTION_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

/// Columns an event carries besides `id`: everything topics filter on.
pub const EVENT_COLUMNS: &[&str] = &[
    "id",
    "post_id",
    "parent_comment_id",
    "author_id",
    "student_id",
    "counselor_id",
    "room_id",
    "sender_id",
    "user_id",
    "status",
    "is_read",
];

fn keep_event_columns(row: &mut Value) {
    if let Value::Object(fields) = row {
        fields.retain(|column, _| EVENT_COLUMNS.contains(&column.as_str()));
    }
}

/// Identity and routing columns of a changed row.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangedRow {
    resource: Resource,
    id: Uuid,
    columns: Value,
}

impl ChangedRow {
    pub fn from_row(row: &Row) -> Result<Self, serde_json::Error> {
        let mut columns = row.to_json()?;
        keep_event_columns(&mut columns);
        Ok(Self {
            resource: row.resource(),
            id: row.id(),
            columns,
        })
    }

    /// Builds the event row from a JSON object, ignoring any column outside
    /// [`EVENT_COLUMNS`].
    pub fn from_json(resource: Resource, mut columns: Value) -> Result<Self, FeedError> {
        let id = columns
            .get("id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| FeedError::Malformed(format!("{resource} change without an id")))?;
        keep_event_columns(&mut columns);
        Ok(Self { resource, id, columns })
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn column(&self, name: &str) -> Option<&Value> {
        self.columns.get(name)
    }

    pub fn columns(&self) -> &Value {
        &self.columns
    }
}

/// A row-level change. `Delete` identifies the row as it was before removal.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert(ChangedRow),
    Update(ChangedRow),
    Delete(ChangedRow),
}

impl ChangeEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChangeEvent::Insert(_) => EventKind::Insert,
            ChangeEvent::Update(_) => EventKind::Update,
            ChangeEvent::Delete(_) => EventKind::Delete,
        }
    }

    pub fn row(&self) -> &ChangedRow {
        match self {
            ChangeEvent::Insert(row) | ChangeEvent::Update(row) | ChangeEvent::Delete(row) => row,
        }
    }

    pub fn resource(&self) -> Resource {
        self.row().resource()
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FeedError {
    /// Events were dropped; consumers must re-fetch to catch up.
    #[error("change feed lagged, {0} events skipped")]
    Lagged(u64),

    /// The connection dropped and was re-established; events may be missing.
    #[error("change feed interrupted: {0}")]
    Interrupted(String),

    #[error("change feed unavailable: {0}")]
    Unavailable(String),

    #[error("malformed change payload: {0}")]
    Malformed(String),
}

/// What one subscription listens to. Filters may only name [`EVENT_COLUMNS`].
#[derive(Debug, Clone, PartialEq)]
pub struct Topic {
    pub resource: Resource,
    pub filter: Filter,
    pub events: Vec<EventKind>,
}

impl Topic {
    /// Every event on every row of `resource`.
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            filter: Filter::all(),
            events: vec![EventKind::Insert, EventKind::Update, EventKind::Delete],
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn only(mut self, kind: EventKind) -> Self {
        self.events = vec![kind];
        self
    }

    pub fn matches(&self, event: &ChangeEvent) -> bool {
        event.resource() == self.resource
            && self.events.contains(&event.kind())
            && self.filter.matches_json(event.row().columns())
    }
}

/// Live count of open subscriptions on a feed.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionCounter(Arc<AtomicUsize>);

impl SubscriptionCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn acquire(&self) -> CounterGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        CounterGuard(self.0.clone())
    }
}

struct CounterGuard(Arc<AtomicUsize>);

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Handle on an open subscription.
pub struct Subscription {
    id: Uuid,
    topics: Vec<Topic>,
    events: mpsc::Receiver<Result<ChangeEvent, FeedError>>,
    forwarder: JoinHandle<()>,
    _active: CounterGuard,
}

impl Subscription {
    /// Wraps a forwarding task that pushes matching events into `events`.
    pub fn new(
        topics: Vec<Topic>,
        events: mpsc::Receiver<Result<ChangeEvent, FeedError>>,
        forwarder: JoinHandle<()>,
        counter: &SubscriptionCounter,
    ) -> Self {
        let id = Uuid::new_v4();
        debug!(subscription = %id, topics = topics.len(), "change feed subscription opened");
        Self {
            id,
            topics,
            events,
            forwarder,
            _active: counter.acquire(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    /// Next event in arrival order. `None` once the feed has shut down.
    pub async fn next(&mut self) -> Option<Result<ChangeEvent, FeedError>> {
        self.events.recv().await
    }

    /// Closes the subscription. Dropping it has the same effect.
    pub fn close(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.forwarder.abort();
        debug!(subscription = %self.id, "change feed subscription closed");
    }
}

/// Source of row-level change notifications.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Opens one subscription covering all `topics`. Events that happen after
    /// this returns are guaranteed to be delivered (or reported as lag).
    async fn open(&self, topics: Vec<Topic>) -> Result<Subscription, FeedError>;

    fn active_subscriptions(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatRoom, FlagLevel, Notification, NotificationKind, Post};
    use chrono::Utc;

    fn notification_for(user_id: Uuid) -> ChangedRow {
        ChangedRow::from_row(&Row::Notification(Notification {
            id: Uuid::new_v4(),
            user_id,
            kind: NotificationKind::System,
            title: "t".into(),
            message: "m".into(),
            link: None,
            data: None,
            is_read: false,
            created_at: Utc::now(),
        }))
        .unwrap()
    }

    #[test]
    fn test_topic_matches_resource_filter_and_kind() {
        let user = Uuid::new_v4();
        let topic = Topic::new(Resource::Notifications)
            .filter(Filter::all().eq("user_id", user))
            .only(EventKind::Insert);

        assert!(topic.matches(&ChangeEvent::Insert(notification_for(user))));
        assert!(!topic.matches(&ChangeEvent::Update(notification_for(user))));
        assert!(!topic.matches(&ChangeEvent::Insert(notification_for(Uuid::new_v4()))));
        let room = ChangedRow::from_row(&Row::ChatRoom(ChatRoom::open_for(user))).unwrap();
        assert!(!topic.matches(&ChangeEvent::Insert(room)));
    }

    #[test]
    fn test_changed_row_drops_body_columns() {
        let author = Uuid::new_v4();
        let post = Post::new(author, "ệ".repeat(5000), Some("https://img".into()), FlagLevel::Normal);
        let changed = ChangedRow::from_row(&Row::Post(post.clone())).unwrap();

        assert_eq!(changed.id(), post.id);
        assert_eq!(changed.resource(), Resource::Posts);
        assert_eq!(changed.column("author_id"), Some(&serde_json::json!(author)));
        assert!(changed.column("content").is_none());
        assert!(changed.column("liked_by").is_none());
        assert!(changed.columns().to_string().len() < 256);
    }

    #[test]
    fn test_changed_row_from_json_requires_id() {
        let err = ChangedRow::from_json(Resource::Posts, serde_json::json!({ "author_id": Uuid::nil() }));
        assert!(matches!(err, Err(FeedError::Malformed(_))));
    }
}
