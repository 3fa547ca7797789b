#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};
use uuid::Uuid;

use community::models::{Role, UserProfile};
use community::store::{
    ChangeFeed, FeedError, Filter, MemoryStore, Patch, Query, Resource, Row, Store, StoreError,
    StoreExt, Subscription, Topic,
};
use community::sync::{LiveView, Snapshot, ViewSource};

pub async fn seed_user(store: &dyn Store, role: Role, name: &str) -> UserProfile {
    store
        .create(UserProfile {
            id: Uuid::new_v4(),
            full_name: name.to_string(),
            role,
        })
        .await
        .unwrap()
}

/// Waits until the view publishes a snapshot matching `pred`.
pub async fn wait_for<S: ViewSource>(
    view: &LiveView<S>,
    pred: impl Fn(&Snapshot<S::Item>) -> bool,
) -> Snapshot<S::Item> {
    let mut rx = view.watch();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if pred(&snapshot) {
                return snapshot;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .expect("timed out waiting for the view")
}

/// Memory store that can hold writes or finished reads at a gate, or fail
/// reads on demand.
#[derive(Clone)]
pub struct ControlledStore {
    pub inner: Arc<MemoryStore>,
    gate_updates: Arc<AtomicBool>,
    gate_selects: Arc<AtomicBool>,
    fail_selects: Arc<AtomicBool>,
    pub update_entered: Arc<Notify>,
    pub release_update: Arc<Semaphore>,
    /// Signalled when a gated read has its rows and is being held.
    pub select_held: Arc<Notify>,
    pub release_select: Arc<Semaphore>,
    released_selects: Arc<AtomicUsize>,
}

impl ControlledStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryStore::new()),
            gate_updates: Arc::new(AtomicBool::new(false)),
            gate_selects: Arc::new(AtomicBool::new(false)),
            fail_selects: Arc::new(AtomicBool::new(false)),
            update_entered: Arc::new(Notify::new()),
            release_update: Arc::new(Semaphore::new(0)),
            select_held: Arc::new(Notify::new()),
            release_select: Arc::new(Semaphore::new(0)),
            released_selects: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn gate_updates(&self, on: bool) {
        self.gate_updates.store(on, Ordering::SeqCst);
    }

    /// Reads started while on take their rows at once but return them only
    /// once `release_select` grants a permit.
    pub fn gate_selects(&self, on: bool) {
        self.gate_selects.store(on, Ordering::SeqCst);
    }

    /// Gated reads that have been let through so far.
    pub fn released_selects(&self) -> usize {
        self.released_selects.load(Ordering::SeqCst)
    }

    pub fn fail_selects(&self, on: bool) {
        self.fail_selects.store(on, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for ControlledStore {
    async fn insert(&self, row: Row) -> Result<Row, StoreError> {
        self.inner.insert(row).await
    }

    async fn update(&self, resource: Resource, filter: &Filter, patch: &Patch) -> Result<Vec<Row>, StoreError> {
        if self.gate_updates.load(Ordering::SeqCst) {
            self.update_entered.notify_one();
            self.release_update.acquire().await.unwrap().forget();
        }
        self.inner.update(resource, filter, patch).await
    }

    async fn delete(&self, resource: Resource, filter: &Filter) -> Result<Vec<Row>, StoreError> {
        self.inner.delete(resource, filter).await
    }

    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        if self.fail_selects.load(Ordering::SeqCst) {
            return Err(StoreError::InvalidColumn("simulated outage".to_string()));
        }
        let gated = self.gate_selects.load(Ordering::SeqCst);
        let rows = self.inner.select(query).await;
        if gated {
            self.select_held.notify_one();
            self.release_select.acquire().await.unwrap().forget();
            self.released_selects.fetch_add(1, Ordering::SeqCst);
        }
        rows
    }
}

#[async_trait]
impl ChangeFeed for ControlledStore {
    async fn open(&self, topics: Vec<Topic>) -> Result<Subscription, FeedError> {
        self.inner.open(topics).await
    }

    fn active_subscriptions(&self) -> usize {
        self.inner.active_subscriptions()
    }
}
