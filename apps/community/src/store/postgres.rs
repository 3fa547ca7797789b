//! Postgres store.
//!
//! Rows travel as JSON: reads use `to_jsonb(t)`, writes go through
//! `jsonb_populate_record` so column types come from the table definition.
//! The change feed rides on `LISTEN/NOTIFY`; the triggers installed by
//! `migrations/0001_community.sql` publish every row change on one channel.
//! A NOTIFY payload over 8000 bytes aborts the writing transaction, so the
//! triggers publish only the row's id and routing columns.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use sqlx::postgres::{PgListener, PgPool};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::feed::{SubscriptionCounter, SUBSCRIPTION_BUFFER};
use super::{
    ChangeEvent, ChangeFeed, ChangedRow, Direction, FeedError, Filter, Patch, Predicate, Query,
    Resource, Row, Store, StoreError, Subscription, Topic,
};

/// NOTIFY channel the row-change triggers publish on.
pub const CHANGE_CHANNEL: &str = "community_row_changes";

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    subscriptions: SubscriptionCounter,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            subscriptions: SubscriptionCounter::default(),
        }
    }
}

fn quote(column: &str) -> Result<String, StoreError> {
    let valid = !column.is_empty() && column.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid {
        return Err(StoreError::InvalidColumn(column.to_string()));
    }
    Ok(format!("\"{column}\""))
}

/// Renders `filter` as a WHERE clause over alias `t` of `table`, binding
/// values from `$first`.
fn where_clause(table: &str, filter: &Filter, first: usize) -> Result<(String, Vec<Value>), StoreError> {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();
    for predicate in filter.predicates() {
        let column = quote(predicate.column())?;
        match predicate {
            Predicate::Eq(_, Value::Null) | Predicate::IsNull(_) => {
                clauses.push(format!("t.{column} IS NULL"));
            }
            Predicate::Eq(_, value) => {
                binds.push(value.clone());
                clauses.push(format!("to_jsonb(t.{column}) = ${}", first + binds.len() - 1));
            }
            Predicate::In(_, values) => {
                binds.push(Value::Array(values.clone()));
                clauses.push(format!(
                    "${} @> jsonb_build_array(to_jsonb(t.{column}))",
                    first + binds.len() - 1
                ));
            }
            Predicate::Before(name, value) => {
                // Cast through the table's own column type so timestamps compare as instants.
                binds.push(value.clone());
                clauses.push(format!(
                    "t.{column} < (jsonb_populate_record(NULL::{table}, jsonb_build_object('{name}', ${}))).{column}",
                    first + binds.len() - 1
                ));
            }
        }
    }
    if clauses.is_empty() {
        return Ok((String::new(), binds));
    }
    Ok((format!(" WHERE {}", clauses.join(" AND ")), binds))
}

fn map_db_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            let constraint = db.constraint().unwrap_or("unknown").to_string();
            return StoreError::UniqueViolation(constraint);
        }
    }
    StoreError::Database(err)
}

fn decode_rows(resource: Resource, values: Vec<Value>) -> Result<Vec<Row>, StoreError> {
    values
        .into_iter()
        .map(|v| Row::from_json(resource, v).map_err(StoreError::from))
        .collect()
}

#[async_trait]
impl Store for PgStore {
    async fn insert(&self, row: Row) -> Result<Row, StoreError> {
        let resource = row.resource();
        let table = quote(resource.table())?;
        let sql = format!(
            "INSERT INTO {table} AS t SELECT * FROM jsonb_populate_record(NULL::{table}, $1) RETURNING to_jsonb(t)"
        );
        let value: Value = sqlx::query_scalar(&sql)
            .bind(row.to_json()?)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(Row::from_json(resource, value)?)
    }

    async fn update(&self, resource: Resource, filter: &Filter, patch: &Patch) -> Result<Vec<Row>, StoreError> {
        if patch.is_empty() {
            return self.select(&Query::new(resource).filter(filter.clone())).await;
        }
        let table = quote(resource.table())?;
        let assignments = patch
            .columns()
            .map(|c| quote(c).map(|q| format!("{q} = p.{q}")))
            .collect::<Result<Vec<_>, _>>()?
            .join(", ");
        let (where_sql, binds) = where_clause(&table, filter, 2)?;
        let sql = format!(
            "UPDATE {table} AS t SET {assignments} FROM jsonb_populate_record(NULL::{table}, $1) AS p{where_sql} RETURNING to_jsonb(t)"
        );

        let mut query = sqlx::query_scalar::<_, Value>(&sql).bind(patch.as_json());
        for value in binds {
            query = query.bind(value);
        }
        let values = query.fetch_all(&self.pool).await.map_err(map_db_error)?;
        decode_rows(resource, values)
    }

    async fn delete(&self, resource: Resource, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        let table = quote(resource.table())?;
        let (where_sql, binds) = where_clause(&table, filter, 1)?;
        let sql = format!("DELETE FROM {table} AS t{where_sql} RETURNING to_jsonb(t)");

        let mut query = sqlx::query_scalar::<_, Value>(&sql);
        for value in binds {
            query = query.bind(value);
        }
        let values = query.fetch_all(&self.pool).await.map_err(map_db_error)?;
        decode_rows(resource, values)
    }

    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let table = quote(query.resource.table())?;
        let (where_sql, binds) = where_clause(&table, &query.filter, 1)?;
        let mut sql = format!("SELECT to_jsonb(t) FROM {table} AS t{where_sql}");
        if let Some(order) = &query.order {
            let direction = match order.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            sql.push_str(&format!(" ORDER BY t.{} {direction}", quote(order.column)?));
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut db_query = sqlx::query_scalar::<_, Value>(&sql);
        for value in binds {
            db_query = db_query.bind(value);
        }
        let values = db_query.fetch_all(&self.pool).await.map_err(map_db_error)?;
        decode_rows(query.resource, values)
    }
}

/// Payload published by the `community_notify_row_change` trigger.
#[derive(Debug, Deserialize)]
struct RawChange {
    table: String,
    op: String,
    row: Value,
}

fn parse_change(payload: &str) -> Result<Option<ChangeEvent>, FeedError> {
    let raw: RawChange = serde_json::from_str(payload).map_err(|e| FeedError::Malformed(e.to_string()))?;
    let Some(resource) = Resource::from_table(&raw.table) else {
        return Ok(None);
    };
    let row = ChangedRow::from_json(resource, raw.row)?;
    let event = match raw.op.as_str() {
        "INSERT" => ChangeEvent::Insert(row),
        "UPDATE" => ChangeEvent::Update(row),
        "DELETE" => ChangeEvent::Delete(row),
        other => return Err(FeedError::Malformed(format!("unknown operation {other}"))),
    };
    Ok(Some(event))
}

#[async_trait]
impl ChangeFeed for PgStore {
    async fn open(&self, topics: Vec<Topic>) -> Result<Subscription, FeedError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| FeedError::Unavailable(e.to_string()))?;
        listener
            .listen(CHANGE_CHANNEL)
            .await
            .map_err(|e| FeedError::Unavailable(e.to_string()))?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let wanted = topics.clone();

        let forwarder = tokio::spawn(async move {
            loop {
                let item = match listener.try_recv().await {
                    Ok(Some(notification)) => match parse_change(notification.payload()) {
                        Ok(Some(event)) if wanted.iter().any(|t| t.matches(&event)) => Ok(event),
                        Ok(_) => continue,
                        Err(e) => {
                            warn!(error = %e, "dropping unreadable change notification");
                            Err(e)
                        }
                    },
                    // Connection lost; the listener reconnects on the next call.
                    Ok(None) => Err(FeedError::Interrupted("listener connection lost".into())),
                    Err(e) => {
                        error!(error = %e, "change feed listener failed");
                        let _ = tx.send(Err(FeedError::Unavailable(e.to_string()))).await;
                        break;
                    }
                };
                if tx.send(item).await.is_err() {
                    break;
                }
            }
            debug!("postgres change feed forwarder stopped");
        });

        Ok(Subscription::new(topics, rx, forwarder, &self.subscriptions))
    }

    fn active_subscriptions(&self) -> usize {
        self.subscriptions.get()
    }
}
