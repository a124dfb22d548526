use crate::app::{App, AppError, IndexStatus};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::BTreeMap, fmt::Debug, path::PathBuf, sync::Arc};
use tokio::signal;

#[derive(Clone)]
struct SharedState {
    app: Arc<App>,
}

pub fn router(app: Arc<App>) -> Router {
    let image_folder = app.config().image_folder_path();
    let body_limit = app.config().max_upload_bytes;
    let shared_state = Arc::new(SharedState { app });

    Router::new()
        .nest_service(
            "/api/file",
            tower_http::services::ServeDir::new(image_folder),
        )
        .route("/api/initialize", post(initialize))
        .route("/api/search", post(search))
        .route("/api/upload", post(upload))
        .route("/api/status", get(status))
        .layer(DefaultBodyLimit::max(body_limit))
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

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down");
}

async fn start_app(app: Arc<App>) -> anyhow::Result<()> {
    let listen = app.config().listen.clone();

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!("listening on {listen}");

    axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Serve the HTTP API until interrupted.
///
/// The caller keeps its own handle on `app` so the last reference is
/// dropped outside the runtime.
pub fn start_daemon(app: Arc<App>) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_app(app))
}

#[derive(Debug)]
struct HttpError(AppError);

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            AppError::Validation(_) | AppError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            AppError::NotInitialized => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ExternalService { .. } => {
                tracing::error!("{self:?}");
                StatusCode::BAD_GATEWAY
            }
            AppError::IO(_) | AppError::Other(_) => {
                tracing::error!("{self:?}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<AppError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

/// Bodies axum cannot decode are reported like any other bad request.
fn invalid_json(rejection: JsonRejection) -> HttpError {
    AppError::Validation(format!("invalid request body: {}", rejection.body_text())).into()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitializeRequest {
    pub image_folder: Option<PathBuf>,
    /// Image name (without extension) to tag
    pub tags: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InitializeResponse {
    pub status: String,
    pub message: String,
    pub entries: usize,
    pub dangling: Vec<PathBuf>,
}

async fn initialize(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<InitializeRequest>, JsonRejection>,
) -> Result<Json<InitializeResponse>, HttpError> {
    let Json(payload) = payload.map_err(invalid_json)?;
    tracing::debug!("payload: {payload:?}");

    let (Some(image_folder), Some(tags)) = (payload.image_folder, payload.tags) else {
        return Err(AppError::Validation(
            "image_folder and tags are required".to_string(),
        )
        .into());
    };

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let summary = app.initialize(&image_folder, tags)?;

        Ok(Json(InitializeResponse {
            status: "success".to_string(),
            message: format!(
                "Index initialized with {} entries from {}",
                summary.entries,
                summary.image_folder.display()
            ),
            entries: summary.entries,
            dangling: summary.dangling,
        }))
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub top_k: Option<usize>,
}

#[derive(Serialize, Deserialize)]
pub struct SearchResult {
    pub tag: String,
    pub image_path: PathBuf,
    /// Base64 PNG, null when the image could not be read
    pub image_data: Option<String>,
    pub score: f32,
}

impl Debug for SearchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SearchResult {{ tag: {:?}, image_path: {:?}, image_data: [REDUCTED], score: {} }}", self.tag, self.image_path, self.score)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub reformulated_query: String,
    pub results: Vec<SearchResult>,
}

async fn search(
    State(state): State<Arc<SharedState>>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<SearchResponse>, HttpError> {
    let Json(payload) = payload.map_err(invalid_json)?;
    tracing::debug!("payload: {payload:?}");

    let Some(query) = payload.query else {
        return Err(AppError::Validation("query is required".to_string()).into());
    };

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let outcome = app.retrieve(&query, payload.top_k)?;

        let results = outcome
            .results
            .into_iter()
            .map(|result| SearchResult {
                image_data: result.image_bytes.map(|bytes| STANDARD.encode(bytes)),
                tag: result.tag,
                image_path: result.image_ref,
                score: result.score,
            })
            .collect();

        Ok(Json(SearchResponse {
            query: outcome.query,
            reformulated_query: outcome.reformulated_query,
            results,
        }))
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    pub filename: String,
    pub tag: String,
    pub image_path: PathBuf,
}

async fn upload(
    State(state): State<Arc<SharedState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, HttpError> {
    let mut tag = None;
    let mut file: Option<(Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::Validation(format!("malformed multipart body: {err}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("tag") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| AppError::Validation(format!("unreadable tag: {err}")))?;
                tag = Some(text);
            }
            Some("file") | Some("image") => {
                let filename = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::Validation(format!("unreadable file: {err}")))?;
                file = Some((filename, bytes.to_vec()));
            }
            other => {
                tracing::debug!("ignoring multipart field {other:?}");
            }
        }
    }

    let Some((filename, bytes)) = file else {
        return Err(AppError::Validation("no image file provided".to_string()).into());
    };
    let Some(tag) = tag else {
        return Err(AppError::Validation("tag is required".to_string()).into());
    };

    tracing::debug!(filename = ?filename, tag = %tag, size = bytes.len(), "upload received");

    let app = state.app.clone();

    tokio::task::block_in_place(move || {
        let ingested = app.ingest(&tag, filename.as_deref(), &bytes)?;

        Ok(Json(UploadResponse {
            status: "success".to_string(),
            filename: ingested.filename,
            tag: ingested.tag,
            image_path: ingested.image_path,
        }))
    })
}

async fn status(State(state): State<Arc<SharedState>>) -> Json<IndexStatus> {
    Json(state.app.status())
}
