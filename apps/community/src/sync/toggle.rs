//! Like/unlike writes and the in-flight guard that keeps them from racing.
//!
//! `liked_by` is updated by single-row read-modify-write. Two toggles by the
//! same caller on the same row would race each other, so the second one is
//! refused while the first is in flight.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::models::LikeSet;
use crate::posts::Likeable;
use crate::store::{Patch, Resource, Store, StoreExt};

use super::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ToggleKey {
    pub resource: Resource,
    pub id: Uuid,
    pub caller: Uuid,
}

#[derive(Debug, Clone, Default)]
pub struct ToggleGuard {
    in_flight: Arc<Mutex<HashSet<ToggleKey>>>,
}

impl ToggleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with `ToggleInFlight` if the same key is already held.
    pub fn try_acquire(&self, key: ToggleKey) -> Result<TogglePermit, SyncError> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(key) {
            return Err(SyncError::ToggleInFlight {
                resource: key.resource,
                id: key.id,
            });
        }
        Ok(TogglePermit {
            key,
            in_flight: self.in_flight.clone(),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Releases its key on drop.
#[derive(Debug)]
pub struct TogglePermit {
    key: ToggleKey,
    in_flight: Arc<Mutex<HashSet<ToggleKey>>>,
}

impl Drop for TogglePermit {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// What the caller wants done with their like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LikeChange {
    Like,
    Unlike,
    /// Like if absent, unlike if present.
    Toggle,
}

impl LikeChange {
    /// Whether the caller likes the row afterwards.
    pub fn resolve(self, currently_liked: bool) -> bool {
        match self {
            LikeChange::Like => true,
            LikeChange::Unlike => false,
            LikeChange::Toggle => !currently_liked,
        }
    }
}

/// Result of a like write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeWrite {
    pub liked: bool,
    pub liked_by: LikeSet,
    /// False when the set already had the wanted state.
    pub written: bool,
}

/// Reads the current set, applies the change and writes it back if it
/// differs. The caller must hold a permit for the row.
pub async fn write_like<R: Likeable>(
    store: &dyn Store,
    _permit: &TogglePermit,
    id: Uuid,
    user: Uuid,
    change: LikeChange,
) -> Result<LikeWrite, SyncError> {
    let current: R = store.fetch_by_id(id).await?;
    let liked = change.resolve(current.liked_by().contains(&user));

    let mut next = current.clone();
    next.set_liked(user, liked);
    if next.liked_by() == current.liked_by() {
        return Ok(LikeWrite {
            liked,
            liked_by: current.liked_by().clone(),
            written: false,
        });
    }

    store
        .update_by_id::<R>(id, &Patch::new().set("liked_by", next.liked_by()))
        .await?;
    debug!(resource = %R::RESOURCE, id = %id, user = %user, liked, "like written");
    Ok(LikeWrite {
        liked,
        liked_by: next.liked_by().clone(),
        written: true,
    })
}
