//! HTTP surface of the gateway.
//!
//! | Method | Path                             | Response                        |
//! |--------|----------------------------------|---------------------------------|
//! | GET    | `/`                              | liveness message                |
//! | GET    | `/health`                        | model status, device, library   |
//! | POST   | `/synthesize`                    | JSON with base64 WAV            |
//! | POST   | `/synthesize_with_voice`         | `audio/wav` attachment          |
//! | GET    | `/download_audio/{base64_audio}` | `audio/wav` attachment          |
//! | GET    | `/ui`                            | browser client                  |
//!
//! Every error response has the body `{"detail": "<message>"}`.

use std::{collections::HashMap, net::SocketAddr};

use anyhow::{Context, Result};
use axum::{
    extract::{
        multipart::{Field, MultipartError, MultipartRejection},
        rejection::{JsonRejection, PathRejection},
        DefaultBodyLimit, Multipart, Path, Query, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::{net::TcpListener, signal};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    error::GatewayError,
    gateway::{Gateway, HealthReport, SynthesisRequest, SynthesisResponse, VoiceUpload},
    params::GenerationParams,
};

// ─────────────────────────────────────────────────────────────────────────────
// Error responses
// ─────────────────────────────────────────────────────────────────────────────

/// Largest accepted request body (reference clips included).
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

const WAV_DISPOSITION: &str = "attachment; filename=synthesized_speech.wav";

static UI_PAGE: &str = include_str!("../ui/index.html");

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

/// An error on its way to becoming an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        warn!("Rejected JSON body: {}", rejection.body_text());
        Self {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        warn!("Rejected path: {}", rejection.body_text());
        Self::bad_request(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        warn!("Rejected multipart request: {}", rejection.body_text());
        Self::bad_request(GatewayError::Multipart(rejection.body_text()).to_string())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        warn!("Rejected multipart body: {}", err.body_text());
        Self {
            status: err.status(),
            detail: GatewayError::Multipart(err.body_text()).to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { detail: self.detail })).into_response()
    }
}

fn wav_response(bytes: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "audio/wav"),
            (header::CONTENT_DISPOSITION, WAV_DISPOSITION),
        ],
        bytes,
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct RootResponse {
    message: &'static str,
    status: &'static str,
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Speech gateway is running!",
        status: "healthy",
    })
}

async fn health(State(gateway): State<Gateway>) -> Json<HealthReport> {
    Json(gateway.health())
}

async fn ui() -> Html<&'static str> {
    Html(UI_PAGE)
}

async fn synthesize(
    State(gateway): State<Gateway>,
    body: Result<Json<SynthesisRequest>, JsonRejection>,
) -> Result<Json<SynthesisResponse>, ApiError> {
    let Json(request) = body?;
    Ok(Json(gateway.synthesize(request).await?))
}

async fn read_text(field: Field<'_>) -> Result<String, ApiError> {
    Ok(field.text().await?)
}

/// Text and parameters may come from the query string, the form, or both;
/// form fields win.
async fn synthesize_with_voice(
    State(gateway): State<Gateway>,
    Query(query): Query<HashMap<String, String>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mut multipart = multipart?;
    let mut params = GenerationParams::default();
    let mut text = query.get("text").cloned().unwrap_or_default();
    for (name, value) in &query {
        params.set_from_str(name, value)?;
    }

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "voice_file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await?.to_vec();
                upload = Some(VoiceUpload { filename, data });
            }
            "text" => text = read_text(field).await?,
            _ => {
                let value = read_text(field).await?;
                params.set_from_str(&name, &value)?;
            }
        }
    }

    let wav = gateway.synthesize_with_voice(text, params, upload).await?;
    Ok(wav_response(wav))
}

async fn download_audio(
    State(gateway): State<Gateway>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path(encoded) = path?;
    Ok(wav_response(gateway.download_audio(&encoded)?))
}

// ─────────────────────────────────────────────────────────────────────────────
// Router and serving
// ─────────────────────────────────────────────────────────────────────────────

/// Routes without middleware.
pub fn router(gateway: Gateway) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/ui", get(ui))
        .route("/synthesize", post(synthesize))
        .route("/synthesize_with_voice", post(synthesize_with_voice))
        // Standard base64 may contain '/', so capture the rest of the path.
        .route("/download_audio/{*base64_audio}", get(download_audio))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(gateway)
}

/// [`router`] with request tracing and, optionally, permissive CORS.
pub fn app(gateway: Gateway, cors: bool) -> Router {
    let app = router(gateway).layer(TraceLayer::new_for_http());
    if cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Serve `app` on `addr` until SIGINT or SIGTERM.
pub async fn serve(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %listener.local_addr()?, "Speech gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {e}");
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
    info!("Shutdown signal received");
}
