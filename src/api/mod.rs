// HTTP API server module

use anyhow::Result;
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::time::Instant;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};

pub mod handlers;
pub mod reasoning;
pub mod schema_cleaner;
pub mod streaming;
pub mod translator;
pub mod upstream;

use crate::auth::OauthCache;
use upstream::UpstreamClient;

static SERVER_HANDLE: OnceCell<RwLock<Option<oneshot::Sender<()>>>> = OnceCell::new();

#[derive(Clone)]
pub struct AppState {
    pub cache: OauthCache,
    pub upstream: UpstreamClient,
    pub started_at: Instant,
}

pub async fn start_server() -> Result<()> {
    let config = crate::config::get_config();
    let addr = format!("0.0.0.0:{}", config.port);

    let state = AppState {
        cache: OauthCache::new(config.client_id.clone(), config.client_secret.clone()),
        upstream: UpstreamClient::new(),
        started_at: Instant::now(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(handlers::root))
        .route("/metrics", get(handlers::metrics))
        .route("/v1/models", get(handlers::models))
        .route("/models", get(handlers::models))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/chat/completions", post(handlers::chat_completions))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("API server listening on {}", addr);

    let (tx, rx) = oneshot::channel::<()>();

    SERVER_HANDLE
        .get_or_init(|| RwLock::new(None))
        .write()
        .replace(tx);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            rx.await.ok();
        })
        .await?;

    Ok(())
}

pub async fn stop_server() -> Result<()> {
    if let Some(lock) = SERVER_HANDLE.get() {
        if let Some(tx) = lock.write().take() {
            let _ = tx.send(());
            tracing::info!("API server stopped");
        }
    }
    Ok(())
}

pub fn is_server_running() -> bool {
    SERVER_HANDLE
        .get()
        .map(|lock| lock.read().is_some())
        .unwrap_or(false)
}
