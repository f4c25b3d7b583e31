//! HTTP control surface for the agent.
//!
//! Exposes the orchestrator's operations to the web front end. Every
//! operation that touches the device blocks, so handlers hand them to
//! `spawn_blocking`.
//!
//! ```text
//! Browser UI ──HTTP──▶ axum router ──spawn_blocking──▶ Orchestrator
//! ```

use crate::core::pipeline::PipelineReport;
use crate::error::AgentError;
use crate::orchestrator::{ArtifactStatus, Orchestrator, RealtimeToggle};
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub host: IpAddr,
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    /// Bind on localhost.
    pub fn new(port: u16) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
        }
    }

    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<PipelineReport>,
}

#[derive(Debug, Deserialize)]
pub struct CollectRequest {
    pub step: Option<i64>,
    /// Overrides the configured capture duration
    pub seconds: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectResponse {
    pub status: String,
    pub step: usize,
    pub records: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccuracyResponse {
    pub accuracy: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PowerOffResponse {
    pub status: String,
    pub powered_off: bool,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type SharedOrchestrator = Arc<Orchestrator>;

fn status_for(err: &AgentError) -> StatusCode {
    match err {
        AgentError::InvalidJob(_) => StatusCode::BAD_REQUEST,
        AgentError::AlreadyRunning(_) | AgentError::NotRunning(_) => StatusCode::CONFLICT,
        AgentError::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        AgentError::DeviceError(_)
        | AgentError::TimedOutExhausted { .. }
        | AgentError::SinkWriteFailure(_)
        | AgentError::Model(_)
        | AgentError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: AgentError) -> ApiError {
    tracing::warn!(code = err.code(), error = %err, "request failed");
    (
        status_for(&err),
        Json(ErrorResponse {
            error: err.to_string(),
            code: err.code().to_string(),
        }),
    )
}

fn error_response(status: StatusCode, error: impl Into<String>, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

/// Run a blocking orchestrator call off the async executor.
async fn blocking<T, F>(orchestrator: &SharedOrchestrator, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Orchestrator) -> Result<T, AgentError> + Send + 'static,
{
    let orchestrator = orchestrator.clone();
    tokio::task::spawn_blocking(move || op(&orchestrator))
        .await
        .map_err(|e| {
            tracing::error!("Blocking task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), "TASK_FAILED")
        })?
        .map_err(api_error)
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /api/realtime
///
/// Starts the pipeline when stopped and stops it when running.
async fn realtime_toggle(
    State(orchestrator): State<SharedOrchestrator>,
) -> Result<Json<StatusResponse>, ApiError> {
    let toggle = blocking(&orchestrator, |o| o.toggle_realtime()).await?;
    Ok(Json(match toggle {
        RealtimeToggle::Started => StatusResponse {
            status: "started".to_string(),
            report: None,
        },
        RealtimeToggle::Stopped(report) => StatusResponse {
            status: "stopped".to_string(),
            report: Some(report),
        },
    }))
}

/// POST /api/realtime/start
async fn realtime_start(
    State(orchestrator): State<SharedOrchestrator>,
) -> Result<Json<StatusResponse>, ApiError> {
    blocking(&orchestrator, |o| o.start_pipeline()).await?;
    Ok(Json(StatusResponse {
        status: "started".to_string(),
        report: None,
    }))
}

/// POST /api/realtime/stop
async fn realtime_stop(
    State(orchestrator): State<SharedOrchestrator>,
) -> Result<Json<StatusResponse>, ApiError> {
    let report = blocking(&orchestrator, |o| o.stop_pipeline()).await?;
    Ok(Json(StatusResponse {
        status: "stopped".to_string(),
        report: Some(report),
    }))
}

/// POST /api/collect-data
///
/// Runs one supervised capture job for `step`. Step 0 starts a new dataset.
async fn collect_data(
    State(orchestrator): State<SharedOrchestrator>,
    Json(request): Json<CollectRequest>,
) -> Result<Json<CollectResponse>, ApiError> {
    let step = request
        .step
        .and_then(|s| usize::try_from(s).ok())
        .filter(|s| *s < crate::core::LABEL_COUNT)
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "Invalid step", "INVALID_JOB"))?;
    let duration = request.seconds.map(std::time::Duration::from_secs);

    let records = blocking(&orchestrator, move |o| o.run_capture_job(step, duration)).await?;
    Ok(Json(CollectResponse {
        status: "completed".to_string(),
        step,
        records,
    }))
}

/// POST /api/reconnect
///
/// 408 when the device does not answer within the probe timeout.
async fn reconnect(
    State(orchestrator): State<SharedOrchestrator>,
) -> Result<Json<StatusResponse>, ApiError> {
    let reachable = blocking(&orchestrator, |o| Ok(o.probe_connectivity(None))).await?;
    if reachable {
        Ok(Json(StatusResponse {
            status: "reconnected".to_string(),
            report: None,
        }))
    } else {
        Err(error_response(
            StatusCode::REQUEST_TIMEOUT,
            "Device did not respond",
            "DEVICE_UNREACHABLE",
        ))
    }
}

/// POST /api/get-accuracy
async fn get_accuracy(
    State(orchestrator): State<SharedOrchestrator>,
) -> Result<Json<AccuracyResponse>, ApiError> {
    let accuracy = blocking(&orchestrator, |o| o.last_accuracy()).await?;
    accuracy
        .map(|accuracy| Json(AccuracyResponse { accuracy }))
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "Accuracy not found", "NOT_FOUND"))
}

/// GET /api/check
async fn check(State(orchestrator): State<SharedOrchestrator>) -> Json<ArtifactStatus> {
    Json(orchestrator.check_artifacts())
}

/// POST /api/power-off
async fn power_off(
    State(orchestrator): State<SharedOrchestrator>,
) -> Result<Json<PowerOffResponse>, ApiError> {
    let powered_off = blocking(&orchestrator, |o| Ok(o.power_off_device(None))).await?;
    Ok(Json(PowerOffResponse {
        status: "success".to_string(),
        powered_off,
    }))
}

/// POST /api/reset-dataset
async fn reset_dataset(
    State(orchestrator): State<SharedOrchestrator>,
) -> Result<Json<StatusResponse>, ApiError> {
    blocking(&orchestrator, |o| o.reset_dataset()).await?;
    Ok(Json(StatusResponse {
        status: "reset".to_string(),
        report: None,
    }))
}

fn is_local_origin(origin: &HeaderValue) -> bool {
    origin.to_str().map_or(false, |origin| {
        ["http://localhost", "http://127.0.0.1"].iter().any(|base| {
            origin
                .strip_prefix(base)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
        })
    })
}

/// Build the router over a shared orchestrator.
pub fn router(orchestrator: SharedOrchestrator) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/realtime", post(realtime_toggle))
        .route("/api/realtime/start", post(realtime_start))
        .route("/api/realtime/stop", post(realtime_stop))
        .route("/api/collect-data", post(collect_data))
        .route("/api/reconnect", post(reconnect))
        .route("/api/get-accuracy", post(get_accuracy))
        .route("/api/check", get(check))
        .route("/api/power-off", post(power_off))
        .route("/api/reset-dataset", post(reset_dataset))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
                    is_local_origin(origin)
                }))
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(orchestrator)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
    orchestrator: SharedOrchestrator,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(orchestrator);

    let addr = SocketAddr::new(config.host, config.port);
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Control server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
