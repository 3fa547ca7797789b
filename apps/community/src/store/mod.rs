//! Store boundary — row-level CRUD over typed rows, plus the change feed.
//!
//! Rows cross the boundary as the `Row` enum; callers work with concrete
//! models through `StoreExt`. Filters are exact-match column predicates so
//! that the same `Filter` can drive both a query and a feed subscription.

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    ChatMessage, ChatRoom, Comment, FlaggedContentRecord, Notification, PendingContentRecord,
    Post, UserProfile,
};

pub mod feed;
pub mod memory;
pub mod postgres;

pub use feed::{ChangeEvent, ChangeFeed, ChangedRow, EventKind, FeedError, Subscription, Topic};
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// A table (store partition).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Users,
    Posts,
    Comments,
    ChatRooms,
    ChatMessages,
    Notifications,
    FlaggedContent,
    PendingContent,
}

impl Resource {
    pub const ALL: [Resource; 8] = [
        Resource::Users,
        Resource::Posts,
        Resource::Comments,
        Resource::ChatRooms,
        Resource::ChatMessages,
        Resource::Notifications,
        Resource::FlaggedContent,
        Resource::PendingContent,
    ];

    pub fn table(self) -> &'static str {
        match self {
            Resource::Users => "users",
            Resource::Posts => "posts",
            Resource::Comments => "comments",
            Resource::ChatRooms => "chat_rooms",
            Resource::ChatMessages => "chat_messages",
            Resource::Notifications => "notifications",
            Resource::FlaggedContent => "flagged_content",
            Resource::PendingContent => "pending_content",
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        Resource::ALL.into_iter().find(|r| r.table() == table)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no matching row in {0}")]
    NotFound(Resource),

    #[error("expected exactly one row in {resource}, found {count}")]
    MultipleRows { resource: Resource, count: usize },

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("row does not belong to {expected}")]
    RowMismatch { expected: Resource },

    #[error("invalid column name: {0}")]
    InvalidColumn(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A typed row of any table.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    User(UserProfile),
    Post(Post),
    Comment(Comment),
    ChatRoom(ChatRoom),
    ChatMessage(ChatMessage),
    Notification(Notification),
    FlaggedContent(FlaggedContentRecord),
    PendingContent(PendingContentRecord),
}

impl Row {
    pub fn resource(&self) -> Resource {
        match self {
            Row::User(_) => Resource::Users,
            Row::Post(_) => Resource::Posts,
            Row::Comment(_) => Resource::Comments,
            Row::ChatRoom(_) => Resource::ChatRooms,
            Row::ChatMessage(_) => Resource::ChatMessages,
            Row::Notification(_) => Resource::Notifications,
            Row::FlaggedContent(_) => Resource::FlaggedContent,
            Row::PendingContent(_) => Resource::PendingContent,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Row::User(r) => r.id,
            Row::Post(r) => r.id,
            Row::Comment(r) => r.id,
            Row::ChatRoom(r) => r.id,
            Row::ChatMessage(r) => r.id,
            Row::Notification(r) => r.id,
            Row::FlaggedContent(r) => r.id,
            Row::PendingContent(r) => r.id,
        }
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        match self {
            Row::User(r) => serde_json::to_value(r),
            Row::Post(r) => serde_json::to_value(r),
            Row::Comment(r) => serde_json::to_value(r),
            Row::ChatRoom(r) => serde_json::to_value(r),
            Row::ChatMessage(r) => serde_json::to_value(r),
            Row::Notification(r) => serde_json::to_value(r),
            Row::FlaggedContent(r) => serde_json::to_value(r),
            Row::PendingContent(r) => serde_json::to_value(r),
        }
    }

    pub fn from_json(resource: Resource, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match resource {
            Resource::Users => Row::User(serde_json::from_value(value)?),
            Resource::Posts => Row::Post(serde_json::from_value(value)?),
            Resource::Comments => Row::Comment(serde_json::from_value(value)?),
            Resource::ChatRooms => Row::ChatRoom(serde_json::from_value(value)?),
            Resource::ChatMessages => Row::ChatMessage(serde_json::from_value(value)?),
            Resource::Notifications => Row::Notification(serde_json::from_value(value)?),
            Resource::FlaggedContent => Row::FlaggedContent(serde_json::from_value(value)?),
            Resource::PendingContent => Row::PendingContent(serde_json::from_value(value)?),
        })
    }
}

/// A model that lives in exactly one table.
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const RESOURCE: Resource;

    fn id(&self) -> Uuid;
    fn into_row(self) -> Row;
    fn from_row(row: Row) -> Option<Self>;
}

macro_rules! impl_record {
    ($model:ty, $resource:ident, $variant:ident) => {
        impl Record for $model {
            const RESOURCE: Resource = Resource::$resource;

            fn id(&self) -> Uuid {
                self.id
            }

            fn into_row(self) -> Row {
                Row::$variant(self)
            }

            fn from_row(row: Row) -> Option<Self> {
                match row {
                    Row::$variant(r) => Some(r),
                    _ => None,
                }
            }
        }
    };
}

impl_record!(UserProfile, Users, User);
impl_record!(Post, Posts, Post);
impl_record!(Comment, Comments, Comment);
impl_record!(ChatRoom, ChatRooms, ChatRoom);
impl_record!(ChatMessage, ChatMessages, ChatMessage);
impl_record!(Notification, Notifications, Notification);
impl_record!(FlaggedContentRecord, FlaggedContent, FlaggedContent);
impl_record!(PendingContentRecord, PendingContent, PendingContent);

// Ids, flags and enums always serialize; a failure would only come from a
// non-string map key, which no column value has.
fn to_column_value(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(&'static str, Value),
    IsNull(&'static str),
    In(&'static str, Vec<Value>),
    /// Column strictly less than the value; timestamps compare as instants.
    Before(&'static str, Value),
}

impl Predicate {
    pub fn column(&self) -> &'static str {
        match self {
            Predicate::Eq(c, _) | Predicate::IsNull(c) | Predicate::In(c, _) | Predicate::Before(c, _) => c,
        }
    }

    fn matches(&self, row: &Value) -> bool {
        let field = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Predicate::Eq(_, value) => field == value,
            Predicate::IsNull(_) => field.is_null(),
            Predicate::In(_, values) => values.contains(field),
            Predicate::Before(_, value) => {
                !field.is_null() && compare_values(field, value) == Ordering::Less
            }
        }
    }
}

/// Conjunction of exact-match column predicates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    /// Matches every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: Uuid) -> Self {
        Self::all().eq("id", id)
    }

    pub fn eq(mut self, column: &'static str, value: impl Serialize) -> Self {
        self.predicates.push(Predicate::Eq(column, to_column_value(value)));
        self
    }

    pub fn is_null(mut self, column: &'static str) -> Self {
        self.predicates.push(Predicate::IsNull(column));
        self
    }

    pub fn in_list<T: Serialize>(mut self, column: &'static str, values: impl IntoIterator<Item = T>) -> Self {
        let values = values.into_iter().map(to_column_value).collect();
        self.predicates.push(Predicate::In(column, values));
        self
    }

    /// Rows whose `column` is earlier than `value`. Lets a write only move a
    /// column forward.
    pub fn before(mut self, column: &'static str, value: impl Serialize) -> Self {
        self.predicates.push(Predicate::Before(column, to_column_value(value)));
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn matches_json(&self, row: &Value) -> bool {
        self.predicates.iter().all(|p| p.matches(row))
    }

    pub fn matches(&self, row: &Row) -> bool {
        if self.predicates.is_empty() {
            return true;
        }
        match row.to_json() {
            Ok(value) => self.matches_json(&value),
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: &'static str,
    pub direction: Direction,
}

/// `select … where … order … limit`.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub resource: Resource,
    pub filter: Filter,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(resource: Resource) -> Self {
        Self {
            resource,
            filter: Filter::all(),
            order: None,
            limit: None,
        }
    }

    pub fn of<R: Record>() -> Self {
        Self::new(R::RESOURCE)
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, column: &'static str, direction: Direction) -> Self {
        self.order = Some(Order { column, direction });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Partial update: the columns to overwrite and their new values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    columns: Map<String, Value>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: &'static str, value: impl Serialize) -> Self {
        self.columns.insert(column.to_string(), to_column_value(value));
        self
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn as_json(&self) -> Value {
        Value::Object(self.columns.clone())
    }

    /// Applies the patch to a row in its JSON form.
    pub fn apply_to(&self, row: &mut Value) {
        if let Value::Object(fields) = row {
            for (column, value) in &self.columns {
                fields.insert(column.clone(), value.clone());
            }
        }
    }
}

/// Compares two column values for ordering. Timestamps are compared as
/// instants rather than as strings.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => {
            match (x.parse::<DateTime<Utc>>(), y.parse::<DateTime<Utc>>()) {
                (Ok(tx), Ok(ty)) => tx.cmp(&ty),
                _ => x.cmp(y),
            }
        }
        _ => Ordering::Equal,
    }
}

/// Row-level CRUD against the shared store.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert(&self, row: Row) -> Result<Row, StoreError>;

    /// Overwrites the patched columns of every row matching `filter` and
    /// returns the updated rows.
    async fn update(&self, resource: Resource, filter: &Filter, patch: &Patch) -> Result<Vec<Row>, StoreError>;

    /// Deletes every row matching `filter` and returns the deleted rows.
    async fn delete(&self, resource: Resource, filter: &Filter) -> Result<Vec<Row>, StoreError>;

    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError>;

    /// Exactly one row or an error.
    async fn single(&self, query: &Query) -> Result<Row, StoreError> {
        let mut rows = self.select(query).await?;
        match rows.len() {
            0 => Err(StoreError::NotFound(query.resource)),
            1 => Ok(rows.remove(0)),
            count => Err(StoreError::MultipleRows {
                resource: query.resource,
                count,
            }),
        }
    }
}

fn downcast<R: Record>(row: Row) -> Result<R, StoreError> {
    R::from_row(row).ok_or(StoreError::RowMismatch {
        expected: R::RESOURCE,
    })
}

fn downcast_all<R: Record>(rows: Vec<Row>) -> Result<Vec<R>, StoreError> {
    rows.into_iter().map(downcast).collect()
}

/// Typed access on top of `Store`.
#[async_trait]
pub trait StoreExt: Store {
    async fn fetch_all<R: Record>(&self, query: &Query) -> Result<Vec<R>, StoreError> {
        debug_assert_eq!(query.resource, R::RESOURCE);
        downcast_all(self.select(query).await?)
    }

    async fn fetch_one<R: Record>(&self, query: &Query) -> Result<R, StoreError> {
        downcast(self.single(query).await?)
    }

    async fn fetch_by_id<R: Record>(&self, id: Uuid) -> Result<R, StoreError> {
        self.fetch_one(&Query::of::<R>().filter(Filter::by_id(id))).await
    }

    async fn create<R: Record>(&self, record: R) -> Result<R, StoreError> {
        downcast(self.insert(record.into_row()).await?)
    }

    async fn update_where<R: Record>(&self, filter: &Filter, patch: &Patch) -> Result<Vec<R>, StoreError> {
        downcast_all(self.update(R::RESOURCE, filter, patch).await?)
    }

    /// Updates one row by id; `NotFound` when the row is gone.
    async fn update_by_id<R: Record>(&self, id: Uuid, patch: &Patch) -> Result<R, StoreError> {
        let mut rows: Vec<R> = self.update_where(&Filter::by_id(id), patch).await?;
        if rows.is_empty() {
            return Err(StoreError::NotFound(R::RESOURCE));
        }
        Ok(rows.remove(0))
    }

    async fn delete_where<R: Record>(&self, filter: &Filter) -> Result<Vec<R>, StoreError> {
        downcast_all(self.delete(R::RESOURCE, filter).await?)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}
