//! Notification dispatch and per-user notification operations.
//!
//! Notifications are only ever created here. Delivery is the user's
//! notification feed view (`sync::sources::NotificationFeed`); the view-side
//! operations with optimistic updates live in `feed`.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{Notification, NotificationKind, Role, UserProfile};
use crate::store::{Direction, Filter, Patch, Query, Resource, Store, StoreError, StoreExt};

pub mod feed;

/// Latest notifications shown in a feed.
pub const FEED_LIMIT: usize = 50;

/// Content of a notification before it is addressed to a user.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
    pub data: Option<Value>,
}

impl NewNotification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            link: None,
            data: None,
        }
    }

    pub fn link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    fn addressed_to(&self, user_id: Uuid) -> Notification {
        Notification {
            id: Uuid::new_v4(),
            user_id,
            kind: self.kind,
            title: self.title.clone(),
            message: self.message.clone(),
            link: self.link.clone(),
            data: self.data.clone(),
            is_read: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn Store>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Appends one notification for `user_id`.
    pub async fn notify(&self, user_id: Uuid, notification: &NewNotification) -> Result<Notification, StoreError> {
        let created = self.store.create(notification.addressed_to(user_id)).await?;
        debug!(user_id = %user_id, kind = ?created.kind, "notification created");
        Ok(created)
    }

    /// Sends `notification` to every user holding `role`. Returns how many
    /// were sent.
    pub async fn notify_role(&self, role: Role, notification: &NewNotification) -> Result<usize, StoreError> {
        let recipients: Vec<UserProfile> = self
            .store
            .fetch_all(&Query::of::<UserProfile>().filter(Filter::all().eq("role", role)))
            .await?;

        for user in &recipients {
            self.store.create(notification.addressed_to(user.id)).await?;
        }
        info!(role = %role, sent = recipients.len(), kind = ?notification.kind, "notifications fanned out");
        Ok(recipients.len())
    }

    /// Latest notifications of one user, newest first.
    pub async fn recent(&self, user_id: Uuid) -> Result<Vec<Notification>, StoreError> {
        self.store
            .fetch_all(
                &Query::of::<Notification>()
                    .filter(owned_by(user_id))
                    .order_by("created_at", Direction::Desc)
                    .limit(FEED_LIMIT),
            )
            .await
    }

    /// Marks one notification as read. Read notifications stay read.
    pub async fn mark_as_read(&self, user_id: Uuid, id: Uuid) -> Result<Notification, StoreError> {
        let filter = owned_by(user_id).eq("id", id);
        let mut updated: Vec<Notification> = self
            .store
            .update_where(&filter, &Patch::new().set("is_read", true))
            .await?;
        updated.pop().ok_or(StoreError::NotFound(Resource::Notifications))
    }

    /// Marks every unread notification of the user as read; returns how many changed.
    pub async fn mark_all_as_read(&self, user_id: Uuid) -> Result<usize, StoreError> {
        let filter = owned_by(user_id).eq("is_read", false);
        let updated: Vec<Notification> = self
            .store
            .update_where(&filter, &Patch::new().set("is_read", true))
            .await?;
        Ok(updated.len())
    }

    /// Removes one notification and returns it as it was.
    pub async fn delete(&self, user_id: Uuid, id: Uuid) -> Result<Notification, StoreError> {
        let mut deleted: Vec<Notification> = self.store.delete_where(&owned_by(user_id).eq("id", id)).await?;
        deleted.pop().ok_or(StoreError::NotFound(Resource::Notifications))
    }

    pub async fn delete_all_read(&self, user_id: Uuid) -> Result<usize, StoreError> {
        let deleted: Vec<Notification> = self
            .store
            .delete_where(&owned_by(user_id).eq("is_read", true))
            .await?;
        Ok(deleted.len())
    }
}

fn owned_by(user_id: Uuid) -> Filter {
    Filter::all().eq("user_id", user_id)
}

/// Number of unread notifications in a feed.
pub fn unread_count(items: &[Notification]) -> usize {
    items.iter().filter(|n| !n.is_read).count()
}
