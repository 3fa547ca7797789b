mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use community::models::{ChatRoom, Comment, FlagLevel, Notification, NotificationKind, Post, Role};
use community::notifications::{NewNotification, NotificationDispatcher};
use community::session::Session;
use community::store::{Patch, Query, Resource, Store, StoreExt, Topic};
use community::sync::{
    CommentThread, LikeChange, NotificationFeed, PostFeed, RoomList, StudentRoom, SyncEngine, SyncError,
    ViewSource,
};

use common::{seed_user, wait_for, ControlledStore};

fn engine(store: &ControlledStore) -> SyncEngine {
    SyncEngine::new(Arc::new(store.clone()), Arc::new(store.clone()))
}

/// Post ids, read with exactly one select per fetch.
struct PostIds;

#[async_trait]
impl ViewSource for PostIds {
    type Item = Uuid;

    fn name(&self) -> &'static str {
        "post_ids"
    }

    fn topics(&self, _session: &Session) -> Vec<Topic> {
        vec![Topic::new(Resource::Posts)]
    }

    async fn fetch(&self, store: &dyn Store, _session: &Session) -> Result<Vec<Uuid>, SyncError> {
        let posts: Vec<Post> = store.fetch_all(&Query::of::<Post>()).await?;
        Ok(posts.into_iter().map(|p| p.id).collect())
    }
}

#[tokio::test]
async fn test_counselor_sees_pool_and_own_rooms_only() {
    let store = ControlledStore::new();
    let sync = engine(&store);
    let me = Uuid::new_v4();
    let other = Uuid::new_v4();

    let pooled = store.inner.create(ChatRoom::open_for(Uuid::new_v4())).await.unwrap();
    let mut mine = ChatRoom::open_for(Uuid::new_v4());
    mine.counselor_id = Some(me);
    let mine = store.inner.create(mine).await.unwrap();
    let mut theirs = ChatRoom::open_for(Uuid::new_v4());
    theirs.counselor_id = Some(other);
    store.inner.create(theirs).await.unwrap();

    let view = sync.subscribe(RoomList, Session::counselor(me)).await.unwrap();
    let mut ids: Vec<Uuid> = view.snapshot().items.iter().map(|r| r.id).collect();
    ids.sort();
    let mut expected = vec![pooled.id, mine.id];
    expected.sort();
    assert_eq!(ids, expected);

    // Another counselor takes the pooled room; it leaves this view.
    store
        .inner
        .update_by_id::<ChatRoom>(pooled.id, &Patch::new().set("counselor_id", other))
        .await
        .unwrap();
    let snapshot = wait_for(&view, |s| s.items.len() == 1).await;
    assert_eq!(snapshot.items[0].id, mine.id);

    let admin = sync.subscribe(RoomList, Session::admin(Uuid::new_v4())).await.unwrap();
    assert_eq!(admin.snapshot().items.len(), 3);
}

#[tokio::test]
async fn test_student_room_view_follows_inserts() {
    let store = ControlledStore::new();
    let sync = engine(&store);
    let student = Uuid::new_v4();

    let view = sync.subscribe(StudentRoom, Session::student(student)).await.unwrap();
    assert!(view.snapshot().loaded);
    assert!(view.snapshot().items.is_empty());

    store.inner.create(ChatRoom::open_for(Uuid::new_v4())).await.unwrap();
    let room = store.inner.create(ChatRoom::open_for(student)).await.unwrap();
    let snapshot = wait_for(&view, |s| !s.items.is_empty()).await;
    assert_eq!(snapshot.items.as_slice(), &[room]);
}

#[tokio::test]
async fn test_like_twice_counts_once() {
    let store = ControlledStore::new();
    let sync = engine(&store);
    let author = seed_user(&store, Role::Student, "Author").await;
    let viewer = Uuid::new_v4();
    let post = store
        .inner
        .create(Post::new(author.id, "hello".into(), None, FlagLevel::Normal))
        .await
        .unwrap();

    let view = sync.subscribe(PostFeed, Session::student(viewer)).await.unwrap();
    assert_eq!(view.snapshot().items[0].author.as_ref().map(|a| a.full_name.as_str()), Some("Author"));

    let first = view.set_like(post.id, LikeChange::Like).await.unwrap();
    let second = view.set_like(post.id, LikeChange::Like).await.unwrap();
    assert!(first.written);
    assert!(!second.written);

    let snapshot = wait_for(&view, |s| s.items[0].like_count == 1).await;
    assert!(snapshot.items[0].liked_by_me);
    let stored: Post = store.inner.fetch_by_id(post.id).await.unwrap();
    assert_eq!(stored.liked_by.as_slice(), &[viewer]);
}

#[tokio::test]
async fn test_rapid_double_like_is_rejected() {
    let store = ControlledStore::new();
    let sync = engine(&store);
    let viewer = Session::student(Uuid::new_v4());
    let post = store
        .inner
        .create(Post::new(Uuid::new_v4(), "hello".into(), None, FlagLevel::Normal))
        .await
        .unwrap();
    let view = sync.subscribe(PostFeed, viewer).await.unwrap();

    store.gate_updates(true);
    let background = sync.clone();
    let first = tokio::spawn(async move { background.set_like::<Post>(&viewer, post.id, LikeChange::Toggle).await });
    store.update_entered.notified().await;

    let second = view.set_like(post.id, LikeChange::Toggle).await;
    assert!(matches!(second, Err(SyncError::ToggleInFlight { .. })));

    store.release_update.add_permits(1);
    let first = first.await.unwrap().unwrap();
    assert!(first.liked);
    store.gate_updates(false);

    let snapshot = wait_for(&view, |s| s.items[0].like_count == 1).await;
    assert!(snapshot.items[0].liked_by_me);
}

#[tokio::test]
async fn test_comment_like_patches_reply_in_tree() {
    let store = ControlledStore::new();
    let sync = engine(&store);
    let viewer = Uuid::new_v4();
    let post = store
        .inner
        .create(Post::new(Uuid::new_v4(), "hello".into(), None, FlagLevel::Normal))
        .await
        .unwrap();
    let top = store
        .inner
        .create(Comment::new(post.id, Uuid::new_v4(), None, "top".into(), FlagLevel::Normal))
        .await
        .unwrap();
    let reply = store
        .inner
        .create(Comment::new(post.id, Uuid::new_v4(), Some(top.id), "reply".into(), FlagLevel::Normal))
        .await
        .unwrap();

    let view = sync.subscribe(CommentThread::new(post.id), Session::student(viewer)).await.unwrap();
    assert_eq!(view.snapshot().items[0].replies.len(), 1);

    view.set_like(reply.id, LikeChange::Like).await.unwrap();
    let snapshot = wait_for(&view, |s| s.items[0].replies[0].like_count == 1).await;
    assert!(snapshot.items[0].replies[0].liked_by_me);
    assert_eq!(snapshot.items[0].comment.like_count, 0);
}

#[tokio::test]
async fn test_late_refetch_does_not_overwrite_newer_snapshot() {
    let store = ControlledStore::new();
    let sync = engine(&store);
    let view = sync.subscribe(PostIds, Session::student(Uuid::new_v4())).await.unwrap();
    assert!(view.snapshot().items.is_empty());

    // The first event's refetch reads [first] and is held before returning.
    store.gate_selects(true);
    let first = store
        .inner
        .create(Post::new(Uuid::new_v4(), "first".into(), None, FlagLevel::Normal))
        .await
        .unwrap();
    store.select_held.notified().await;
    store.gate_selects(false);

    // The second event's refetch overtakes it.
    let second = store
        .inner
        .create(Post::new(Uuid::new_v4(), "second".into(), None, FlagLevel::Normal))
        .await
        .unwrap();
    let newer = wait_for(&view, |s| s.items.len() == 2).await;

    store.release_select.add_permits(1);
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.released_selects() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
    tokio::task::yield_now().await;

    let snapshot = view.snapshot();
    assert_eq!(snapshot.seq, newer.seq);
    let mut ids = snapshot.items.to_vec();
    ids.sort();
    let mut expected = vec![first.id, second.id];
    expected.sort();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_failed_refetch_keeps_last_snapshot() {
    let store = ControlledStore::new();
    let sync = engine(&store);
    store
        .inner
        .create(Post::new(Uuid::new_v4(), "first".into(), None, FlagLevel::Normal))
        .await
        .unwrap();
    let view = sync.subscribe(PostFeed, Session::student(Uuid::new_v4())).await.unwrap();
    assert_eq!(view.snapshot().items.len(), 1);

    store.fail_selects(true);
    store
        .inner
        .create(Post::new(Uuid::new_v4(), "second".into(), None, FlagLevel::Normal))
        .await
        .unwrap();
    let snapshot = wait_for(&view, |s| s.last_error.is_some()).await;
    assert_eq!(snapshot.items.len(), 1);
    assert!(snapshot.loaded);

    store.fail_selects(false);
    let snapshot = view.refresh().await;
    assert!(snapshot.last_error.is_none());
    assert_eq!(snapshot.items.len(), 2);
}

#[tokio::test]
async fn test_teardown_releases_subscription() {
    let store = ControlledStore::new();
    let sync = engine(&store);

    let closed = sync.subscribe(PostFeed, Session::student(Uuid::new_v4())).await.unwrap();
    let dropped = sync.subscribe(RoomList, Session::admin(Uuid::new_v4())).await.unwrap();
    assert_eq!(sync.active_subscriptions(), 2);

    closed.close().await;
    assert_eq!(sync.active_subscriptions(), 1);

    drop(dropped);
    tokio::time::timeout(Duration::from_secs(5), async {
        while sync.active_subscriptions() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_notification_feed_counts_and_deletes() {
    let store = ControlledStore::new();
    let sync = engine(&store);
    let user = Uuid::new_v4();
    let dispatcher = NotificationDispatcher::new(Arc::new(store.clone()));
    let note = NewNotification::new(NotificationKind::System, "Hello", "Welcome aboard");
    let read = dispatcher.notify(user, &note).await.unwrap();
    let unread = dispatcher.notify(user, &note).await.unwrap();
    dispatcher.notify(Uuid::new_v4(), &note).await.unwrap();
    dispatcher.mark_as_read(user, read.id).await.unwrap();

    let feed = sync.subscribe(NotificationFeed, Session::student(user)).await.unwrap();
    assert_eq!(feed.snapshot().items.len(), 2);
    assert_eq!(feed.unread_count(), 1);

    feed.delete(read.id).await.unwrap();
    assert_eq!(feed.unread_count(), 1);
    feed.delete(unread.id).await.unwrap();
    assert_eq!(feed.unread_count(), 0);

    dispatcher.notify(user, &note).await.unwrap();
    wait_for(&feed, |s| s.items.len() == 1).await;
    feed.mark_all_as_read().await.unwrap();
    assert_eq!(feed.unread_count(), 0);
    feed.delete_all_read().await.unwrap();
    wait_for(&feed, |s| s.items.is_empty()).await;

    let remaining: Vec<Notification> = store.inner.fetch_all(&Query::of::<Notification>()).await.unwrap();
    assert_eq!(remaining.len(), 1);
}

#[tokio::test]
async fn test_mark_all_read_leaves_late_arrivals_unread() {
    let store = ControlledStore::new();
    let sync = engine(&store);
    let user = Uuid::new_v4();
    let dispatcher = NotificationDispatcher::new(Arc::new(store.clone()));
    let note = NewNotification::new(NotificationKind::System, "Hello", "Welcome aboard");
    let early = dispatcher.notify(user, &note).await.unwrap();

    let feed = Arc::new(sync.subscribe(NotificationFeed, Session::student(user)).await.unwrap());
    assert_eq!(feed.unread_count(), 1);

    store.gate_updates(true);
    let background = feed.clone();
    let marking = tokio::spawn(async move { background.mark_all_as_read().await });
    store.update_entered.notified().await;
    store.gate_updates(false);
    assert_eq!(feed.unread_count(), 0);

    let late = dispatcher.notify(user, &note).await.unwrap();
    let snapshot = wait_for(feed.as_ref(), |s| s.items.len() == 2).await;
    let is_read = |id: Uuid| snapshot.items.iter().find(|n| n.id == id).map(|n| n.is_read);
    assert_eq!(is_read(early.id), Some(true));
    assert_eq!(is_read(late.id), Some(false));

    store.release_update.add_permits(1);
    marking.await.unwrap().unwrap();
    wait_for(feed.as_ref(), |s| s.items.len() == 2 && s.items.iter().all(|n| n.is_read)).await;
}
