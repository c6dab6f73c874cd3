//! Coordinate capture server.
//! Accepts a single `POST /submit`, writes the body verbatim to the coords
//! file and then stops listening. Everything else is either a static file
//! from the serving directory (GET/HEAD) or a bare 404.
//!
//! Lifecycle: LISTENING -> PERSISTED -> SHUTTING_DOWN -> TERMINATED.
//! Unmatched or rejected requests leave the server in LISTENING.

use anyhow::{Context, Result};
use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Request, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

use crate::config::{DEFAULT_COORDS_PATH, MAX_SUBMISSION_BYTES, SUBMIT_ROUTE};

#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub addr: SocketAddr,
    /// Where the submission body is written.
    pub output: PathBuf,
    /// Directory GET requests are served from.
    pub static_root: PathBuf,
}

impl CaptureSettings {
    /// All interfaces on `port`, coords file and static files in the working directory.
    pub fn new(port: u16) -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            output: PathBuf::from(DEFAULT_COORDS_PATH),
            static_root: PathBuf::from("."),
        }
    }
}

struct CaptureState {
    output: PathBuf,
    static_root: PathBuf,
    /// Set once a submission has been accepted; never cleared after a successful write.
    submitted: AtomicBool,
    shutdown: Notify,
}

/// A bound listener plus the state its handlers share.
pub struct CaptureServer {
    listener: TcpListener,
    state: Arc<CaptureState>,
}

impl CaptureServer {
    pub async fn bind(settings: CaptureSettings) -> Result<Self> {
        let listener = TcpListener::bind(settings.addr)
            .await
            .with_context(|| format!("Failed to bind capture server on {}", settings.addr))?;

        let state = Arc::new(CaptureState {
            output: settings.output,
            static_root: settings.static_root,
            submitted: AtomicBool::new(false),
            shutdown: Notify::new(),
        });

        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read capture server address")
    }

    /// Serves until one submission has been persisted, then drains and returns.
    pub async fn serve(self) -> Result<()> {
        let addr = self.local_addr()?;
        let app = router(self.state.clone());
        let state = self.state;

        info!("capture server listening on http://{}", addr);

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                state.shutdown.notified().await;
                info!("submission persisted, shutting down");
            })
            .await
            .context("Capture server failed")?;

        info!("capture server stopped");
        Ok(())
    }
}

fn router(state: Arc<CaptureState>) -> Router {
    Router::new()
        .route(SUBMIT_ROUTE, post(submit).fallback(unmatched))
        .fallback(unmatched)
        .layer(DefaultBodyLimit::max(MAX_SUBMISSION_BYTES))
        .with_state(state)
}

fn declared_length(headers: &HeaderMap) -> Result<u64, &'static str> {
    let value = headers
        .get(header::CONTENT_LENGTH)
        .ok_or("missing Content-Length")?;
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or("malformed Content-Length")
}

async fn submit(State(state): State<Arc<CaptureState>>, request: Request) -> Response {
    let length = match declared_length(request.headers()) {
        Ok(length) => length,
        Err(reason) => {
            warn!("rejecting submission: {}", reason);
            return (StatusCode::BAD_REQUEST, reason).into_response();
        }
    };

    // Answer before reading: a body this large would be refused once buffered anyway.
    if length > MAX_SUBMISSION_BYTES as u64 {
        warn!(declared = length, "rejecting submission over {} bytes", MAX_SUBMISSION_BYTES);
        return (StatusCode::PAYLOAD_TOO_LARGE, "submission too large").into_response();
    }

    // Waits for all `length` bytes; a peer that gives up early gets a 400.
    let body = match Bytes::from_request(request, &()).await {
        Ok(body) => body,
        Err(rejection) => {
            warn!(declared = length, "failed to read submission body: {}", rejection);
            return rejection.into_response();
        }
    };

    if state
        .submitted
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        warn!("submission already accepted, ignoring another one");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    if let Err(e) = tokio::fs::write(&state.output, &body).await {
        error!("failed to write {}: {}", state.output.display(), e);
        state.submitted.store(false, Ordering::SeqCst);
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    info!(bytes = body.len(), "wrote submission to {}", state.output.display());

    // Only wakes the serve loop; it stops accepting and lets this response finish.
    state.shutdown.notify_one();

    (StatusCode::OK, "OK").into_response()
}

async fn unmatched(State(state): State<Arc<CaptureState>>, request: Request) -> Response {
    if request.method() == Method::GET || request.method() == Method::HEAD {
        return match ServeDir::new(&state.static_root).oneshot(request).await {
            Ok(response) => response.into_response(),
            Err(never) => match never {},
        };
    }

    warn!(method = %request.method(), path = %request.uri().path(), "no handler, answering 404");
    StatusCode::NOT_FOUND.into_response()
}
