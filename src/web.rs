use crate::{
    app::App,
    semantic::{BuildPhase, ErrorKind, SearchError, SearchRequest, SearchResponse},
};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    app: App,
}

pub fn router(app: App) -> Router {
    let shared_state = Arc::new(SharedState { app });

    Router::new()
        .route("/health", get(health))
        .route("/search", post(search))
        .route("/rebuild", post(rebuild))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(shared_state)
}

/// Serve until Ctrl+C or SIGTERM. The index is built in the background once the
/// listener is up; until then searches answer 503.
pub async fn serve(app: App, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("listening on {addr}");

    if let Some(build) = app.spawn_rebuild() {
        tokio::spawn(async move {
            match build.await {
                Ok(Ok(())) => log::info!("embeddings ready"),
                Ok(Err(err)) => log::error!("failed to load data / embeddings: {err}"),
                Err(err) => log::error!("index build task failed: {err}"),
            }
        });
    }

    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("http server closed");
    Ok(())
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
        _ = ctrl_c => log::warn!("received Ctrl+C, shutting down"),
        _ = terminate => log::warn!("received SIGTERM, shutting down"),
    }
}

#[derive(Debug)]
struct HttpError(SearchError);

impl HttpError {
    fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorKind::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::UpstreamFailure => StatusCode::BAD_GATEWAY,
            ErrorKind::DimensionMismatch | ErrorKind::EmbeddingCountMismatch => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// Tell axum how to convert `SearchError` into a response.
impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("{self:?}");
        }

        (
            status,
            Json(json!({"error": self.0.to_string(), "kind": self.0.kind()})),
        )
            .into_response()
    }
}

impl From<SearchError> for HttpError {
    fn from(err: SearchError) -> Self {
        Self(err)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub ready: bool,
    pub indexed: usize,
    pub phase: BuildPhase,
}

async fn health(State(state): State<Arc<SharedState>>) -> Json<HealthResponse> {
    let readiness = state.app.search().readiness();

    Json(HealthResponse {
        status: "ok".to_string(),
        ready: readiness.ready,
        indexed: readiness.indexed,
        phase: state.app.build_phase(),
    })
}

/// The body is read leniently: a missing content type, malformed JSON or a
/// non-object all count as an empty request, so the readiness gate still answers
/// first and validation errors keep the `{error, kind}` shape.
async fn search(
    State(state): State<Arc<SharedState>>,
    body: Bytes,
) -> Result<Json<SearchResponse>, HttpError> {
    let payload = serde_json::from_slice::<SearchRequest>(&body).unwrap_or_else(|err| {
        log::debug!("unreadable search body ({err}), treating as empty");
        SearchRequest::default()
    });
    log::debug!("payload: {payload:?}");

    Ok(Json(state.app.search().search(payload).await?))
}

async fn rebuild(State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    log::info!("index rebuild requested");

    // builder logs its own failures
    match state.app.spawn_rebuild() {
        Some(_) => (StatusCode::ACCEPTED, Json(json!({"status": "rebuilding"}))),
        None => {
            log::info!("rebuild already in progress, request merged");
            (StatusCode::CONFLICT, Json(json!({"status": "already_rebuilding"})))
        }
    }
}
