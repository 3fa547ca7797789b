use std::sync::Arc;

use axum::extract::FromRef;

use crate::chat::ChatService;
use crate::config::Config;
use crate::moderation::ModerationPipeline;
use crate::notifications::NotificationDispatcher;
use crate::posts::PostService;
use crate::store::{ChangeFeed, Store};
use crate::sync::SyncEngine;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sync: SyncEngine,
    pub pipeline: Arc<ModerationPipeline>,
    pub notifier: NotificationDispatcher,
    pub chat: ChatService,
    pub posts: PostService,
    pub config: Config,
}

impl AppState {
    /// Wires every service onto one store and its change feed.
    pub fn new(
        store: Arc<dyn Store>,
        feed: Arc<dyn ChangeFeed>,
        classifier: Option<Arc<dyn crate::classifier::Classifier>>,
        config: Config,
    ) -> Self {
        let notifier = NotificationDispatcher::new(store.clone());
        let pipeline = ModerationPipeline::new(
            store.clone(),
            classifier,
            notifier.clone(),
            config.classifier_timeout,
        );
        Self {
            sync: SyncEngine::new(store.clone(), feed),
            pipeline: Arc::new(pipeline),
            chat: ChatService::new(store.clone(), notifier.clone()),
            posts: PostService::new(store.clone()),
            notifier,
            store,
            config,
        }
    }
}

/// Lets extractors such as `Session` reach the store.
impl FromRef<AppState> for Arc<dyn Store> {
    fn from_ref(state: &AppState) -> Self {
        state.store.clone()
    }
}
