use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::signal;

use crate::search::{ArchiveEntry, RetrievalError, SearchError, SearchResponse, SearchService};

#[derive(Clone)]
pub struct SharedState {
    service: Arc<SearchService>,
}

impl SharedState {
    pub fn new(service: Arc<SearchService>) -> Self {
        Self { service }
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/search", get(search))
        .route("/archive", get(archive))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(Arc::new(state))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::warn!("shutting down");
}

async fn start_app(service: SearchService, addr: &str) -> anyhow::Result<()> {
    let app = router(SharedState::new(Arc::new(service)));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn start_daemon(service: SearchService, addr: &str) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { start_app(service, addr).await })
}

#[derive(Debug)]
struct HttpError(SearchError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        log::error!("{self:?}");

        let status = match &self.0 {
            SearchError::Retrieval(RetrievalError::Embedding(_))
            | SearchError::Retrieval(RetrievalError::Index(_)) => StatusCode::SERVICE_UNAVAILABLE,
            SearchError::Archive(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<SearchError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "online", "system": "Ventiko Engine"}))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, HttpError> {
    log::info!("received query: {:?}", params.query);

    let service = state.service.clone();
    let response = tokio::task::block_in_place(move || service.search(&params.query))?;

    Ok(Json(response))
}

async fn archive(
    State(state): State<Arc<SharedState>>,
) -> Result<Json<Vec<ArchiveEntry>>, HttpError> {
    let service = state.service.clone();
    let mut entries = tokio::task::block_in_place(move || service.archive().entries())?;
    entries.reverse();

    Ok(Json(entries))
}
