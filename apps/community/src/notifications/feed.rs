//! Notification operations on a live notification feed. Each one patches
//! the local view at once and is reconciled by the change event it causes.

use uuid::Uuid;

use crate::models::Notification;
use crate::sync::{LiveView, NotificationFeed, SyncError};

use super::{unread_count, NotificationDispatcher};

impl LiveView<NotificationFeed> {
    pub fn unread_count(&self) -> usize {
        unread_count(&self.snapshot().items)
    }

    fn dispatcher(&self) -> NotificationDispatcher {
        NotificationDispatcher::new(self.store_handle())
    }

    pub async fn mark_as_read(&self, id: Uuid) -> Result<Notification, SyncError> {
        let user = self.session().user_id;
        let dispatcher = self.dispatcher();
        self.mutate(
            move |items| {
                if let Some(n) = items.iter_mut().find(|n| n.id == id) {
                    n.is_read = true;
                }
            },
            async move { dispatcher.mark_as_read(user, id).await.map_err(SyncError::from) },
        )
        .await
    }

    /// Marks everything read. Locally only the notifications visible right
    /// now are patched; ones arriving meanwhile wait for the re-fetch.
    pub async fn mark_all_as_read(&self) -> Result<usize, SyncError> {
        let user = self.session().user_id;
        let dispatcher = self.dispatcher();
        let visible: Vec<Uuid> = self
            .snapshot()
            .items
            .iter()
            .filter(|n| !n.is_read)
            .map(|n| n.id)
            .collect();
        self.mutate(
            move |items| {
                items
                    .iter_mut()
                    .filter(|n| visible.contains(&n.id))
                    .for_each(|n| n.is_read = true)
            },
            async move { dispatcher.mark_all_as_read(user).await.map_err(SyncError::from) },
        )
        .await
    }

    /// Removes one notification. The unread counter drops only if it was
    /// unread, since it is derived from the items.
    pub async fn delete(&self, id: Uuid) -> Result<Notification, SyncError> {
        let user = self.session().user_id;
        let dispatcher = self.dispatcher();
        self.mutate(
            move |items| items.retain(|n| n.id != id),
            async move { dispatcher.delete(user, id).await.map_err(SyncError::from) },
        )
        .await
    }

    pub async fn delete_all_read(&self) -> Result<usize, SyncError> {
        let user = self.session().user_id;
        let dispatcher = self.dispatcher();
        self.mutate(
            |items| items.retain(|n| !n.is_read),
            async move { dispatcher.delete_all_read(user).await.map_err(SyncError::from) },
        )
        .await
    }
}
