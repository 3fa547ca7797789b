//! In-process store with a broadcast change feed.
//!
//! Rows are kept per table in insertion order. Every committed write is
//! published on a tokio broadcast channel; each subscription filters that
//! channel in its own forwarding task.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, warn};

use super::feed::{SubscriptionCounter, SUBSCRIPTION_BUFFER};
use super::{
    compare_values, ChangeEvent, ChangeFeed, ChangedRow, Direction, FeedError, Filter, Patch, Query,
    Resource, Row, Store, StoreError, Subscription, Topic,
};

/// Capacity of the shared event channel before slow subscribers lag.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A unique index besides `id`, optionally partial like its Postgres twin.
struct UniqueIndex {
    column: &'static str,
    /// Only rows where this column holds this value take part.
    only_when: Option<(&'static str, &'static str)>,
}

impl UniqueIndex {
    fn covers(&self, row: &serde_json::Value) -> bool {
        if row.get(self.column).map_or(true, serde_json::Value::is_null) {
            return false;
        }
        match self.only_when {
            Some((column, expected)) => row.get(column).and_then(|v| v.as_str()) == Some(expected),
            None => true,
        }
    }
}

fn unique_indexes(resource: Resource) -> &'static [UniqueIndex] {
    match resource {
        Resource::ChatRooms => &[UniqueIndex {
            column: "student_id",
            only_when: Some(("status", "active")),
        }],
        _ => &[],
    }
}

pub struct MemoryStore {
    tables: RwLock<HashMap<Resource, Vec<Row>>>,
    events: broadcast::Sender<ChangeEvent>,
    subscriptions: SubscriptionCounter,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tables: RwLock::new(HashMap::new()),
            events,
            subscriptions: SubscriptionCounter::default(),
        }
    }

    fn publish(&self, event: ChangeEvent) {
        // No receivers is fine: nobody is watching this table right now.
        let _ = self.events.send(event);
    }

    /// Checks `candidate` against every row of `existing` except the one at
    /// `replacing`.
    fn check_unique(existing: &[Row], candidate: &Row, replacing: Option<usize>) -> Result<(), StoreError> {
        let resource = candidate.resource();
        let others = || existing.iter().enumerate().filter(move |(i, _)| Some(*i) != replacing).map(|(_, r)| r);
        if replacing.is_none() && others().any(|r| r.id() == candidate.id()) {
            return Err(StoreError::UniqueViolation(format!("{resource}.id")));
        }
        let indexes = unique_indexes(resource);
        if indexes.is_empty() {
            return Ok(());
        }
        let candidate_json = candidate.to_json()?;
        for index in indexes.iter().filter(|index| index.covers(&candidate_json)) {
            for row in others() {
                let json = row.to_json()?;
                if index.covers(&json) && json.get(index.column) == candidate_json.get(index.column) {
                    return Err(StoreError::UniqueViolation(format!("{resource}.{}", index.column)));
                }
            }
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert(&self, row: Row) -> Result<Row, StoreError> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(row.resource()).or_default();
        Self::check_unique(table, &row, None)?;
        let changed = ChangedRow::from_row(&row)?;
        table.push(row.clone());
        drop(tables);

        self.publish(ChangeEvent::Insert(changed));
        Ok(row)
    }

    async fn update(&self, resource: Resource, filter: &Filter, patch: &Patch) -> Result<Vec<Row>, StoreError> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(resource).or_default();

        // Build every replacement first so a bad patch leaves the table untouched.
        let mut replacements = Vec::new();
        for (index, row) in table.iter().enumerate() {
            let mut json = row.to_json()?;
            if !filter.matches_json(&json) {
                continue;
            }
            patch.apply_to(&mut json);
            let replacement = Row::from_json(resource, json)?;
            Self::check_unique(table.as_slice(), &replacement, Some(index))?;
            let changed = ChangedRow::from_row(&replacement)?;
            replacements.push((index, replacement, changed));
        }

        let mut updated = Vec::with_capacity(replacements.len());
        let mut events = Vec::with_capacity(replacements.len());
        for (index, row, changed) in replacements {
            table[index] = row.clone();
            updated.push(row);
            events.push(changed);
        }
        drop(tables);

        for changed in events {
            self.publish(ChangeEvent::Update(changed));
        }
        Ok(updated)
    }

    async fn delete(&self, resource: Resource, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(resource).or_default();

        let mut events = Vec::new();
        for row in table.iter().filter(|row| filter.matches(row)) {
            events.push(ChangedRow::from_row(row)?);
        }
        let (deleted, kept): (Vec<Row>, Vec<Row>) = table.drain(..).partition(|row| filter.matches(row));
        *table = kept;
        drop(tables);

        for changed in events {
            self.publish(ChangeEvent::Delete(changed));
        }
        Ok(deleted)
    }

    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let tables = self.tables.read().await;
        let Some(table) = tables.get(&query.resource) else {
            return Ok(Vec::new());
        };

        let mut matched = Vec::new();
        for row in table {
            let json = row.to_json()?;
            if query.filter.matches_json(&json) {
                matched.push((json, row.clone()));
            }
        }
        drop(tables);

        if let Some(order) = &query.order {
            matched.sort_by(|(a, _), (b, _)| {
                let a = a.get(order.column).unwrap_or(&serde_json::Value::Null);
                let b = b.get(order.column).unwrap_or(&serde_json::Value::Null);
                match order.direction {
                    Direction::Asc => compare_values(a, b),
                    Direction::Desc => compare_values(b, a),
                }
            });
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matched.into_iter().take(limit).map(|(_, row)| row).collect())
    }
}

#[async_trait]
impl ChangeFeed for MemoryStore {
    async fn open(&self, topics: Vec<Topic>) -> Result<Subscription, FeedError> {
        // Subscribe before spawning so nothing committed after `open` is missed.
        let mut source = self.events.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let wanted = topics.clone();

        let forwarder = tokio::spawn(async move {
            loop {
                let item = match source.recv().await {
                    Ok(event) if wanted.iter().any(|t| t.matches(&event)) => Ok(event),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "in-memory change feed subscriber lagged");
                        Err(FeedError::Lagged(skipped))
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if tx.send(item).await.is_err() {
                    break;
                }
            }
            debug!("in-memory change feed forwarder stopped");
        });

        Ok(Subscription::new(topics, rx, forwarder, &self.subscriptions))
    }

    fn active_subscriptions(&self) -> usize {
        self.subscriptions.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatRoom, FlagLevel, Post, RoomStatus};
    use crate::store::{EventKind, StoreExt};
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_select_orders_and_limits() {
        let store = MemoryStore::new();
        let author = Uuid::new_v4();
        let mut first = Post::new(author, "first".into(), None, FlagLevel::Normal);
        let mut second = Post::new(author, "second".into(), None, FlagLevel::Normal);
        first.created_at = "2024-01-01T00:00:00Z".parse().unwrap();
        second.created_at = "2024-01-02T00:00:00Z".parse().unwrap();
        store.create(first.clone()).await.unwrap();
        store.create(second.clone()).await.unwrap();

        let posts: Vec<Post> = store
            .fetch_all(&Query::of::<Post>().order_by("created_at", Direction::Desc).limit(1))
            .await
            .unwrap();
        assert_eq!(posts, vec![second]);
    }

    #[tokio::test]
    async fn test_single_requires_exactly_one_row() {
        let store = MemoryStore::new();
        let err = store.single(&Query::of::<Post>()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(Resource::Posts)));
    }

    #[tokio::test]
    async fn test_chat_room_unique_per_student_while_active() {
        let store = MemoryStore::new();
        let student = Uuid::new_v4();
        let first = store.create(ChatRoom::open_for(student)).await.unwrap();
        let err = store.create(ChatRoom::open_for(student)).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));

        store
            .update_by_id::<ChatRoom>(first.id, &Patch::new().set("status", RoomStatus::Closed))
            .await
            .unwrap();
        let second = store.create(ChatRoom::open_for(student)).await.unwrap();

        // Reopening the old room would make two active rooms.
        let err = store
            .update_by_id::<ChatRoom>(first.id, &Patch::new().set("status", RoomStatus::Active))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
        let active: Vec<ChatRoom> = store
            .fetch_all(&Query::of::<ChatRoom>().filter(Filter::all().eq("status", RoomStatus::Active)))
            .await
            .unwrap();
        assert_eq!(active, vec![second]);
    }

    #[tokio::test]
    async fn test_update_applies_patch_and_returns_rows() {
        let store = MemoryStore::new();
        let post = store
            .create(Post::new(Uuid::new_v4(), "hi".into(), None, FlagLevel::Normal))
            .await
            .unwrap();
        let updated: Post = store
            .update_by_id(post.id, &Patch::new().set("flag_level", FlagLevel::Mild))
            .await
            .unwrap();
        assert_eq!(updated.flag_level, FlagLevel::Mild);
        assert_eq!(updated.content, "hi");
    }

    #[tokio::test]
    async fn test_subscription_receives_only_matching_events() {
        let store = MemoryStore::new();
        let student = Uuid::new_v4();
        let mut sub = store
            .open(vec![Topic::new(Resource::ChatRooms)
                .filter(Filter::all().eq("student_id", student))
                .only(EventKind::Insert)])
            .await
            .unwrap();

        store.create(ChatRoom::open_for(Uuid::new_v4())).await.unwrap();
        let mine = store.create(ChatRoom::open_for(student)).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), sub.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.kind(), EventKind::Insert);
        assert_eq!(event.row().id(), mine.id);
        assert!(event.row().column("last_message_at").is_none());
    }

    #[tokio::test]
    async fn test_dropping_subscription_releases_it() {
        let store = MemoryStore::new();
        let sub = store.open(vec![Topic::new(Resource::Posts)]).await.unwrap();
        assert_eq!(store.active_subscriptions(), 1);
        sub.close();
        assert_eq!(store.active_subscriptions(), 0);
    }
}
