use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use community::classifier::{Classifier, ClassifierError, LlmClassifier};
use community::config::Config;
use community::db::{create_pool, run_migrations};
use community::routes::build_router;
use community::state::AppState;
use community::store::{ChangeFeed, MemoryStore, PgStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("community={0},community_api={0},tower_http={0}", &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting community API v{}", env!("CARGO_PKG_VERSION"));

    let (store, feed): (Arc<dyn Store>, Arc<dyn ChangeFeed>) = match &config.database_url {
        Some(url) => {
            let pool = create_pool(url, config.database_max_connections).await?;
            run_migrations(&pool).await?;
            let store = Arc::new(PgStore::new(pool));
            (store.clone() as Arc<dyn Store>, store as Arc<dyn ChangeFeed>)
        }
        None => {
            warn!("DATABASE_URL not set; using the in-memory store, data is lost on restart");
            let store = Arc::new(MemoryStore::new());
            (store.clone() as Arc<dyn Store>, store as Arc<dyn ChangeFeed>)
        }
    };

    let classifier: Option<Arc<dyn Classifier>> = match LlmClassifier::new(config.classifier_settings()) {
        Ok(client) => {
            info!("Classifier initialized (model: {})", client.model());
            Some(Arc::new(client))
        }
        Err(ClassifierError::NotConfigured) => None,
        Err(e) => return Err(e.into()),
    };

    let state = AppState::new(store, feed, classifier, config.clone());

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
