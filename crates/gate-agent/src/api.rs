//! HTTP API for health monitoring and cluster management

use crate::{AgentError, AppState, Result};
use axum::{
    extract::{Query, Request, State},
    http::header::AUTHORIZATION,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use gate_cluster::{
    ClusterHealthReport, ClusterResources, ClusterStatus, ConnectionPhase, PerformanceMetrics,
};
use gate_core::config::{validate_history_hours, validate_interval};
use chrono::{DateTime, Utc};
use gate_monitor::{
    AlertReport, HealthSnapshot, HistoricalData, InferenceTestResult, StatusReport, SystemMetrics,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const INFERENCE_TEST_PROMPT: &str = "Hello, how are you?";
const INFERENCE_TEST_MAX_TOKENS: u32 = 10;

const MAX_PROMPT_CHARS: usize = 8192;
const MAX_GENERATION_TOKENS: u32 = 2048;
const DEFAULT_GENERATION_TOKENS: u32 = 100;

/// Build the API router
pub fn create_router(state: AppState) -> Router {
    let mutating = Router::new()
        .route("/api/v1/generate", post(generate_handler))
        .route("/api/v1/model/health-check", post(health_check_handler))
        .route("/api/v1/model/monitoring/start", post(start_monitoring_handler))
        .route("/api/v1/model/monitoring/stop", post(stop_monitoring_handler))
        .route("/api/v1/cluster/reconnect", post(reconnect_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(liveness_handler))
        .route("/api/v1/stats", get(usage_stats_handler))
        .route("/api/v1/model/status", get(model_status_handler))
        .route("/api/v1/model/metrics/system", get(system_metrics_handler))
        .route("/api/v1/model/alerts", get(alerts_handler))
        .route("/api/v1/model/history", get(history_handler))
        .route("/api/v1/cluster/status", get(cluster_status_handler))
        .route("/api/v1/cluster/resources", get(cluster_resources_handler))
        .route("/api/v1/cluster/health", get(cluster_health_handler))
        .route("/api/v1/cluster/metrics", get(cluster_metrics_handler))
        .merge(mutating)
        .with_state(state)
}

/// Reject requests without the configured bearer token
async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    if let Some(expected) = state.config.server.api_key.as_deref() {
        let provided = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));

        if provided != Some(expected) {
            return Err(AgentError::Unauthorized);
        }
    }

    Ok(next.run(request).await)
}

async fn liveness_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs_f64(),
        "monitoring": state.monitor.is_monitoring().await,
        "cluster_connected": state.cluster.phase() == ConnectionPhase::Connected,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    prompt: String,
    #[serde(default = "default_generation_tokens")]
    max_tokens: u32,
}

fn default_generation_tokens() -> u32 {
    DEFAULT_GENERATION_TOKENS
}

impl GenerateRequest {
    fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(AgentError::InvalidRequest("Prompt must not be empty".to_string()));
        }
        if self.prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(AgentError::InvalidRequest(format!(
                "Prompt exceeds {} characters",
                MAX_PROMPT_CHARS
            )));
        }
        if !(1..=MAX_GENERATION_TOKENS).contains(&self.max_tokens) {
            return Err(AgentError::InvalidRequest(format!(
                "max_tokens must be between 1 and {}",
                MAX_GENERATION_TOKENS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    text: String,
    tokens_generated: u64,
    generation_time: f64,
    tokens_per_second: f64,
    engine: String,
}

/// Forward a completion to the engine and feed the outcome into the
/// metrics window
async fn generate_handler(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>> {
    request.validate()?;
    debug!(prompt_len = request.prompt.len(), max_tokens = request.max_tokens, "Generating");

    let started = Instant::now();
    let result = state.engine.generate(&request.prompt, request.max_tokens).await;
    let generation_time = started.elapsed().as_secs_f64();

    // An empty completion counts against the engine
    let (success, tokens) = match &result {
        Ok(generation) => (!generation.text.is_empty(), generation.tokens_generated),
        Err(_) => (false, 0),
    };
    let monitor = Arc::clone(&state.monitor);
    tokio::spawn(async move {
        monitor.record_request(generation_time, success, tokens);
    });

    let generation = result?;
    Ok(Json(GenerateResponse {
        tokens_per_second: if generation_time > 0.0 {
            generation.tokens_generated as f64 / generation_time
        } else {
            0.0
        },
        text: generation.text,
        tokens_generated: generation.tokens_generated,
        generation_time,
        engine: state.engine.name().to_string(),
    }))
}

#[derive(Debug, Serialize)]
struct UsageStats {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    error_rate: f64,
    total_tokens_generated: u64,
    /// Over the current window
    average_response_time: f64,
    tokens_per_second: f64,
    uptime_seconds: f64,
    checks_performed: u64,
    last_check: Option<DateTime<Utc>>,
}

async fn usage_stats_handler(State(state): State<AppState>) -> Json<UsageStats> {
    let checker = state.monitor.checker();
    let stats = checker.window().stats();
    let checks_performed = checker.checks_performed();

    Json(UsageStats {
        total_requests: stats.request_count,
        successful_requests: stats.request_count - stats.error_count,
        failed_requests: stats.error_count,
        error_rate: stats.error_rate,
        total_tokens_generated: stats.total_tokens,
        average_response_time: stats.percentiles.avg,
        tokens_per_second: stats.throughput_tokens_per_second,
        uptime_seconds: state.started_at.elapsed().as_secs_f64(),
        checks_performed,
        last_check: (checks_performed > 0).then(|| checker.current().timestamp),
    })
}

async fn system_metrics_handler(State(state): State<AppState>) -> Json<SystemMetrics> {
    Json(state.system.system_metrics())
}

async fn model_status_handler(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.monitor.status_report())
}

async fn alerts_handler(State(state): State<AppState>) -> Json<AlertReport> {
    Json(state.monitor.current_alerts())
}

#[derive(Debug, Default, Deserialize)]
struct HealthCheckParams {
    #[serde(default)]
    include_inference_test: bool,
}

#[derive(Debug, Serialize)]
struct HealthCheckResponse {
    health: HealthSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    inference_test: Option<InferenceTestResult>,
}

async fn health_check_handler(
    State(state): State<AppState>,
    Query(params): Query<HealthCheckParams>,
) -> Json<HealthCheckResponse> {
    let engine = state.engine.as_ref();

    // Run the self-test first so its sample is part of this evaluation
    let inference_test = if params.include_inference_test {
        Some(
            state
                .monitor
                .test_inference(engine, INFERENCE_TEST_PROMPT, INFERENCE_TEST_MAX_TOKENS)
                .await,
        )
    } else {
        None
    };

    let snapshot = state.monitor.run_health_check(engine).await;

    Json(HealthCheckResponse {
        health: HealthSnapshot::clone(&snapshot),
        inference_test,
    })
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    hours: Option<u32>,
}

async fn history_handler(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoricalData>> {
    let hours = params
        .hours
        .unwrap_or(state.config.monitoring.default_history_hours);
    validate_history_hours(hours)?;

    Ok(Json(state.monitor.get_historical_data(hours)))
}

#[derive(Debug, Deserialize)]
struct MonitoringParams {
    interval: Option<u64>,
}

async fn start_monitoring_handler(
    State(state): State<AppState>,
    Query(params): Query<MonitoringParams>,
) -> Result<Json<Value>> {
    let interval = match params.interval {
        Some(seconds) => {
            validate_interval(seconds)?;
            Duration::from_secs(seconds)
        }
        None => state.monitor.default_interval(),
    };

    let started = state
        .monitor
        .start_monitoring(state.engine.clone(), Some(interval))
        .await;

    let (interval, started_at) = state
        .monitor
        .scheduler()
        .current_schedule()
        .await
        .map(|(interval, started_at)| (interval.as_secs(), Some(started_at)))
        .unwrap_or((interval.as_secs(), None));

    if started {
        info!(interval_seconds = interval, "Monitoring started via API");
    }

    Ok(Json(json!({
        "started": started,
        "status": if started { "started" } else { "already_running" },
        "interval_seconds": interval,
        "started_at": started_at,
    })))
}

async fn stop_monitoring_handler(State(state): State<AppState>) -> Json<Value> {
    let was_running = state.monitor.is_monitoring().await;
    state.monitor.stop_monitoring().await;

    Json(json!({
        "status": if was_running { "stopped" } else { "not_running" },
    }))
}

async fn cluster_status_handler(State(state): State<AppState>) -> Result<Json<ClusterStatus>> {
    Ok(Json(state.cluster.get_cluster_status().await?))
}

async fn cluster_resources_handler(
    State(state): State<AppState>,
) -> Result<Json<ClusterResources>> {
    Ok(Json(state.cluster.get_cluster_resources().await?))
}

async fn cluster_health_handler(State(state): State<AppState>) -> Json<ClusterHealthReport> {
    Json(state.cluster.monitor_cluster_health().await)
}

async fn cluster_metrics_handler(
    State(state): State<AppState>,
) -> Result<Json<PerformanceMetrics>> {
    Ok(Json(state.cluster.performance_metrics().await?))
}

async fn reconnect_handler(State(state): State<AppState>) -> Result<Json<Value>> {
    info!("Cluster reconnect requested via API");

    if !state.cluster.reconnect().await {
        return Err(AgentError::Unavailable(
            "Failed to reconnect to the cluster".to_string(),
        ));
    }

    let connection = state.cluster.state();
    Ok(Json(json!({
        "status": "connected",
        "connection_attempts": connection.attempt_count,
        "connect_time_seconds": connection.connect_time.map(|t| t.as_secs_f64()),
    })))
}
