//! Live views over the change feed.
//!
//! `SyncEngine::subscribe` opens one feed subscription per view and does the
//! initial fetch. A background task then re-fetches on every matching event,
//! reopens the feed with backoff when it closes, and publishes snapshots
//! through the view's `watch` channel. Like writes go through a
//! `ToggleGuard` so one caller never has two in flight on the same row.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::{JoinHandle, JoinSet};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::posts::Likeable;
use crate::session::Session;
use crate::store::{ChangeFeed, Record, Store, StoreExt, Subscription, Topic};

use super::toggle::{write_like, LikeChange, LikeWrite, ToggleGuard, ToggleKey};
use super::view::{MaterializedView, Snapshot};
use super::SyncError;

const RECONNECT_BACKOFF_START: Duration = Duration::from_millis(250);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(10);

/// Per-item visibility check, resolved once per subscription.
pub type Visibility<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Describes one kind of materialized view: what to listen to and how to
/// rebuild the item list.
#[async_trait]
pub trait ViewSource: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    /// Change-feed topics whose events make the view stale.
    fn topics(&self, session: &Session) -> Vec<Topic>;

    async fn fetch(&self, store: &dyn Store, session: &Session) -> Result<Vec<Self::Item>, SyncError>;

    fn visibility(&self, _session: &Session) -> Visibility<Self::Item> {
        Arc::new(|_| true)
    }
}

/// A view whose items carry like state for rows of `Record`.
pub trait LikeableView: ViewSource {
    type Record: Likeable;

    /// Sets `user`'s like on row `id` inside the item list.
    fn patch_like(items: &mut Vec<Self::Item>, id: Uuid, user: Uuid, liked: bool, viewer: Uuid);
}

/// Opens live views and performs guarded like writes.
#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn Store>,
    feed: Arc<dyn ChangeFeed>,
    toggles: ToggleGuard,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn Store>, feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            store,
            feed,
            toggles: ToggleGuard::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn active_subscriptions(&self) -> usize {
        self.feed.active_subscriptions()
    }

    /// Opens the feed subscription, performs the initial fetch and starts
    /// the task that keeps the view current.
    pub async fn subscribe<S: ViewSource>(&self, source: S, session: Session) -> Result<LiveView<S>, SyncError> {
        let source = Arc::new(source);
        let topics = source.topics(&session);
        let subscription = self.feed.open(topics.clone()).await?;
        let visibility = source.visibility(&session);
        let view = Arc::new(MaterializedView::new());

        let ctx = ViewContext {
            source: source.clone(),
            store: self.store.clone(),
            session,
            visibility,
            view: view.clone(),
        };

        let ticket = view.begin_fetch();
        view.complete(ticket, ctx.fetch().await);

        info!(view = source.name(), user_id = %session.user_id, role = %session.role, "live view opened");
        let task = tokio::spawn(run_view(ctx, self.feed.clone(), topics, subscription));

        Ok(LiveView {
            source,
            session,
            store: self.store.clone(),
            toggles: self.toggles.clone(),
            view,
            task: Some(task),
        })
    }

    /// Like write without a local view.
    pub async fn set_like<R: Likeable>(&self, session: &Session, id: Uuid, change: LikeChange) -> Result<LikeWrite, SyncError> {
        let permit = self.toggles.try_acquire(ToggleKey {
            resource: R::RESOURCE,
            id,
            caller: session.user_id,
        })?;
        write_like::<R>(self.store.as_ref(), &permit, id, session.user_id, change).await
    }
}

struct ViewContext<S: ViewSource> {
    source: Arc<S>,
    store: Arc<dyn Store>,
    session: Session,
    visibility: Visibility<S::Item>,
    view: Arc<MaterializedView<S::Item>>,
}

impl<S: ViewSource> Clone for ViewContext<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            store: self.store.clone(),
            session: self.session,
            visibility: self.visibility.clone(),
            view: self.view.clone(),
        }
    }
}

impl<S: ViewSource> ViewContext<S> {
    async fn fetch(&self) -> Result<Vec<S::Item>, SyncError> {
        let mut items = self.source.fetch(self.store.as_ref(), &self.session).await?;
        items.retain(|item| (self.visibility)(item));
        Ok(items)
    }

    /// Takes a ticket now, so fetches are ordered by when they were asked
    /// for, and runs the fetch in the background.
    fn spawn_refetch(&self, refetches: &mut JoinSet<()>) {
        let ticket = self.view.begin_fetch();
        let ctx = self.clone();
        refetches.spawn(async move {
            let result = ctx.fetch().await;
            ctx.view.complete(ticket, result);
        });
    }
}

async fn run_view<S: ViewSource>(
    ctx: ViewContext<S>,
    feed: Arc<dyn ChangeFeed>,
    topics: Vec<Topic>,
    mut subscription: Subscription,
) {
    let name = ctx.source.name();
    let mut refetches = JoinSet::new();

    loop {
        tokio::select! {
            event = subscription.next() => match event {
                Some(Ok(event)) => {
                    trace!(view = name, resource = %event.resource(), kind = ?event.kind(), "change event");
                    ctx.spawn_refetch(&mut refetches);
                }
                Some(Err(e)) => {
                    warn!(view = name, error = %e, "change feed error; re-fetching");
                    ctx.spawn_refetch(&mut refetches);
                }
                None => {
                    warn!(view = name, "change feed closed; reconnecting");
                    subscription = reconnect(&ctx, feed.as_ref(), &topics).await;
                    ctx.spawn_refetch(&mut refetches);
                }
            },
            Some(joined) = refetches.join_next(), if !refetches.is_empty() => {
                if let Err(e) = joined {
                    warn!(view = name, error = %e, "refetch task failed");
                }
            }
        }
    }
}

async fn reconnect<S: ViewSource>(ctx: &ViewContext<S>, feed: &dyn ChangeFeed, topics: &[Topic]) -> Subscription {
    let mut backoff = RECONNECT_BACKOFF_START;
    loop {
        tokio::time::sleep(backoff).await;
        match feed.open(topics.to_vec()).await {
            Ok(subscription) => {
                info!(view = ctx.source.name(), "change feed reconnected");
                return subscription;
            }
            Err(e) => {
                warn!(view = ctx.source.name(), error = %e, ?backoff, "change feed reconnect failed");
                ctx.view.record_error(e.into());
                backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
            }
        }
    }
}

/// One consumer's live, session-filtered view. Dropping it stops the
/// background task, which closes the feed subscription.
pub struct LiveView<S: ViewSource> {
    source: Arc<S>,
    session: Session,
    store: Arc<dyn Store>,
    toggles: ToggleGuard,
    view: Arc<MaterializedView<S::Item>>,
    task: Option<JoinHandle<()>>,
}

impl<S: ViewSource> LiveView<S> {
    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn snapshot(&self) -> Snapshot<S::Item> {
        self.view.snapshot()
    }

    /// Receives every new snapshot.
    pub fn watch(&self) -> watch::Receiver<Snapshot<S::Item>> {
        self.view.watch()
    }

    pub(crate) fn store_handle(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Fetches now instead of waiting for the next event and returns the
    /// resulting snapshot. A failure is recorded on the snapshot.
    pub async fn refresh(&self) -> Snapshot<S::Item> {
        let ctx = ViewContext {
            source: self.source.clone(),
            store: self.store.clone(),
            session: self.session,
            visibility: self.source.visibility(&self.session),
            view: self.view.clone(),
        };
        let ticket = self.view.begin_fetch();
        self.view.complete(ticket, ctx.fetch().await);
        self.view.snapshot()
    }

    /// Applies `patch` locally, runs `write`, then commits or withdraws the
    /// patch depending on the outcome.
    pub(crate) async fn mutate<T, F>(
        &self,
        patch: impl Fn(&mut Vec<S::Item>) + Send + Sync + 'static,
        write: F,
    ) -> Result<T, SyncError>
    where
        F: std::future::Future<Output = Result<T, SyncError>>,
    {
        let patch_id = self.view.apply_optimistic(patch);
        match write.await {
            Ok(value) => {
                self.view.commit(patch_id);
                Ok(value)
            }
            Err(e) => {
                self.view.rollback(patch_id);
                Err(e)
            }
        }
    }

    /// Stops the view and waits until its feed subscription is released.
    pub async fn close(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        debug!(view = self.source.name(), "live view closed");
    }
}

impl<S: LikeableView> LiveView<S> {
    /// Guarded like write with an optimistic local patch.
    pub async fn set_like(&self, id: Uuid, change: LikeChange) -> Result<LikeWrite, SyncError> {
        let viewer = self.session.user_id;
        let permit = self.toggles.try_acquire(ToggleKey {
            resource: <S::Record as Record>::RESOURCE,
            id,
            caller: viewer,
        })?;

        let current: S::Record = self.store.fetch_by_id(id).await?;
        let liked = change.resolve(current.liked_by().contains(&viewer));
        let pinned = if liked { LikeChange::Like } else { LikeChange::Unlike };

        self.mutate(
            move |items| S::patch_like(items, id, viewer, liked, viewer),
            write_like::<S::Record>(self.store.as_ref(), &permit, id, viewer, pinned),
        )
        .await
    }
}

impl<S: ViewSource> Drop for LiveView<S> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
