//! Real-time synchronization layer.
//!
//! A `LiveView` keeps one consumer's materialized view of the store current:
//! it owns exactly one change-feed subscription, re-fetches on every
//! matching event, filters the result by the session's visibility policy and
//! publishes whole snapshots through a `watch` channel.

use thiserror::Error;
use uuid::Uuid;

use crate::store::{FeedError, Resource, StoreError};

pub mod engine;
pub mod sources;
pub mod toggle;
pub mod view;

pub use engine::{LikeableView, LiveView, SyncEngine, ViewSource, Visibility};
pub use sources::{ChatThread, CommentThread, NotificationFeed, PostFeed, RoomList, StudentRoom};
pub use toggle::{LikeChange, LikeWrite, ToggleGuard, ToggleKey};
pub use view::{MaterializedView, Snapshot};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("a like on {resource} {id} is already in flight")]
    ToggleInFlight { resource: Resource, id: Uuid },

    #[error("{0} is not visible to this session")]
    NotVisible(Resource),
}
