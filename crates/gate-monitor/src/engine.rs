//! Inference engine clients

use crate::health::ResourceReadings;
use crate::{MonitorError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use url::Url;

/// Accelerator readings reported by the engine host
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AcceleratorReading {
    pub memory_percent: Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub utilization_percent: Option<f64>,
}

impl From<AcceleratorReading> for ResourceReadings {
    fn from(reading: AcceleratorReading) -> Self {
        Self {
            memory_percent: None,
            accelerator_memory_percent: reading.memory_percent,
            accelerator_temperature: reading.temperature_celsius,
            accelerator_utilization: reading.utilization_percent,
        }
    }
}

/// What the engine reports about itself
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Model loaded and ready to serve
    pub initialized: bool,
    pub active_requests: u64,
    pub uptime_seconds: f64,
    pub total_tokens_generated: u64,
    pub accelerator: Option<AcceleratorReading>,
}

impl EngineStatus {
    pub fn ready() -> Self {
        Self {
            initialized: true,
            ..Default::default()
        }
    }

    pub fn loading() -> Self {
        Self::default()
    }
}

/// Output of a single generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub tokens_generated: u64,
}

/// The inference engine as seen by the monitor
#[async_trait]
pub trait EngineProbe: Send + Sync {
    /// Query the engine's self-reported state
    async fn probe(&self) -> Result<EngineStatus>;

    /// Run a short generation, used by inline self-tests
    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<Generation>;

    /// Engine name for logging
    fn name(&self) -> &str {
        "engine"
    }
}

const METRIC_RUNNING: &str = "vllm:num_requests_running";
const METRIC_GENERATION_TOKENS: &str = "vllm:generation_tokens_total";
const METRIC_PROCESS_START: &str = "process_start_time_seconds";
/// KV-cache usage on the accelerator, 0-1
const METRIC_GPU_CACHE_USAGE: &str = "vllm:gpu_cache_usage_perc";

/// Client for an OpenAI-compatible vLLM server
pub struct VllmEngine {
    endpoint: Url,
    model: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    text: String,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    completion_tokens: u64,
}

impl VllmEngine {
    pub fn new(endpoint: Url, model: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        info!("Creating vLLM client for endpoint: {}", endpoint);

        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| {
                MonitorError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            endpoint,
            model: model.into(),
            client,
        })
    }

    pub fn from_config(config: &gate_core::EngineConfig) -> Result<Self> {
        Self::new(
            config.endpoint.clone(),
            config.model.clone(),
            config.request_timeout(),
        )
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.endpoint
            .join(path)
            .map_err(|e| MonitorError::Configuration(format!("Invalid engine URL: {}", e)))
    }

    /// `GET /health`: 200 once the model is loaded
    async fn check_health(&self) -> Result<bool> {
        let url = self.url("health")?;
        debug!("Checking vLLM health at: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MonitorError::Connection(format!("Failed to connect to vLLM server: {}", e)))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::SERVICE_UNAVAILABLE => Ok(false),
            status => Err(MonitorError::Probe(format!("Health check failed: {}", status))),
        }
    }

    /// `GET /metrics` in Prometheus text format
    async fn fetch_metrics(&self) -> Result<String> {
        let url = self.url("metrics")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MonitorError::Connection(format!("Failed to fetch metrics: {}", e)))?;

        if !response.status().is_success() {
            return Err(MonitorError::InvalidResponse(format!(
                "Metrics request failed: {}",
                response.status()
            )));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl EngineProbe for VllmEngine {
    async fn probe(&self) -> Result<EngineStatus> {
        if !self.check_health().await? {
            return Ok(EngineStatus::loading());
        }

        match self.fetch_metrics().await {
            Ok(body) => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or_default();
                Ok(status_from_metrics(&body, now))
            }
            Err(e) => {
                warn!(error = %e, "vLLM metrics unavailable, reporting health only");
                Ok(EngineStatus::ready())
            }
        }
    }

    async fn generate(&self, prompt: &str, max_tokens: u32) -> Result<Generation> {
        let url = self.url("v1/completions")?;
        debug!("Sending completion request to vLLM");

        let request = CompletionRequest {
            model: &self.model,
            prompt,
            max_tokens,
            temperature: 0.0,
        };

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| MonitorError::Connection(format!("Completion request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(MonitorError::Engine(format!(
                "Completion failed: {} - {}",
                status, error_text
            )));
        }

        let completion: CompletionResponse = response.json().await.map_err(|e| {
            MonitorError::InvalidResponse(format!("Invalid completion response: {}", e))
        })?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.text)
            .unwrap_or_default();

        Ok(Generation {
            text,
            tokens_generated: completion.usage.map(|u| u.completion_tokens).unwrap_or(0),
        })
    }

    fn name(&self) -> &str {
        "vllm"
    }
}

/// Status of a ready engine from its `/metrics` body, `now` in Unix seconds
fn status_from_metrics(body: &str, now: f64) -> EngineStatus {
    let mut status = EngineStatus::ready();
    status.active_requests = prometheus_value(body, METRIC_RUNNING).unwrap_or_default() as u64;
    status.total_tokens_generated =
        prometheus_value(body, METRIC_GENERATION_TOKENS).unwrap_or_default() as u64;
    if let Some(started) = prometheus_value(body, METRIC_PROCESS_START) {
        status.uptime_seconds = (now - started).max(0.0);
    }

    // The engine preallocates most accelerator memory for its KV cache, so
    // cache usage is the memory pressure that matters
    if let Some(usage) = prometheus_max(body, METRIC_GPU_CACHE_USAGE) {
        status.accelerator = Some(AcceleratorReading {
            memory_percent: Some(usage * 100.0),
            ..Default::default()
        });
    }

    status
}

/// Sum every sample of `metric` in a Prometheus text exposition
fn prometheus_value(body: &str, metric: &str) -> Option<f64> {
    prometheus_samples(body, metric).reduce(|a, b| a + b)
}

/// Largest sample of a gauge reported per model or per device
fn prometheus_max(body: &str, metric: &str) -> Option<f64> {
    prometheus_samples(body, metric).reduce(f64::max)
}

fn prometheus_samples<'a>(body: &'a str, metric: &'a str) -> impl Iterator<Item = f64> + 'a {
    body.lines().filter_map(move |line| prometheus_sample(line, metric))
}

fn prometheus_sample(line: &str, metric: &str) -> Option<f64> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let rest = line.strip_prefix(metric)?;
    let value_part = if rest.starts_with('{') {
        &rest[rest.rfind('}')? + 1..]
    } else if rest.starts_with(char::is_whitespace) {
        rest
    } else {
        // A longer metric name sharing this prefix
        return None;
    };

    value_part
        .split_whitespace()
        .next()
        .and_then(|v| v.parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const METRICS: &str = r#"
# HELP vllm:num_requests_running Number of requests currently running on GPU.
# TYPE vllm:num_requests_running gauge
vllm:num_requests_running{model_name="llama-3.2-3b-instruct"} 3.0
vllm:num_requests_running_total 99.0
# TYPE vllm:generation_tokens_total counter
vllm:generation_tokens_total{model_name="a"} 1200.0
vllm:generation_tokens_total{model_name="b"} 34.0
process_start_time_seconds 1.7e9
vllm:gpu_cache_usage_perc{model_name="a"} 0.42
vllm:gpu_cache_usage_perc{model_name="b"} 0.99
"#;

    /// Serve fixed bodies by request path over plain HTTP/1.1
    async fn serve(routes: Vec<(&'static str, u16, &'static str)>) -> Url {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

                let (status, body) = routes
                    .iter()
                    .find(|(route, _, _)| *route == path)
                    .map(|(_, status, body)| (*status, *body))
                    .unwrap_or((404, ""));
                let reason = match status {
                    200 => "OK",
                    503 => "Service Unavailable",
                    _ => "Not Found",
                };
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        format!("http://{}", addr).parse().unwrap()
    }

    fn engine_at(endpoint: Url) -> VllmEngine {
        VllmEngine::new(endpoint, "test-model", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_prometheus_value() {
        assert_eq!(prometheus_value(METRICS, METRIC_RUNNING), Some(3.0));
        assert_eq!(prometheus_value(METRICS, METRIC_GENERATION_TOKENS), Some(1234.0));
        assert_eq!(prometheus_value(METRICS, METRIC_PROCESS_START), Some(1.7e9));
        assert_eq!(prometheus_value(METRICS, "vllm:missing"), None);
    }

    #[test]
    fn test_status_from_metrics() {
        let status = status_from_metrics(METRICS, 1.7e9 + 60.0);
        assert!(status.initialized);
        assert_eq!(status.active_requests, 3);
        assert_eq!(status.total_tokens_generated, 1234);
        assert_eq!(status.uptime_seconds, 60.0);

        let accelerator = status.accelerator.unwrap();
        assert!((accelerator.memory_percent.unwrap() - 99.0).abs() < 1e-9);
        assert_eq!(accelerator.temperature_celsius, None);

        assert_eq!(status_from_metrics("", 0.0).accelerator, None);
    }

    #[tokio::test]
    async fn test_vllm_status_reads_accelerator_memory() {
        use crate::alerts::{MetricKind, Severity};
        use crate::{HealthChecker, HealthState, HistoryStore, MetricsWindow, StaticResources};

        let endpoint = serve(vec![("/health", 200, ""), ("/metrics", 200, METRICS)]).await;
        let engine = engine_at(endpoint);

        let status = engine.probe().await.unwrap();
        assert!(status.initialized);
        assert_eq!(status.active_requests, 3);
        assert!(status.accelerator.unwrap().memory_percent.unwrap() > 98.0);

        // 99% KV-cache usage is past the default critical threshold of 98%
        let checker = HealthChecker::new(
            MetricsWindow::new(10),
            HistoryStore::new(10),
            Default::default(),
            std::sync::Arc::new(StaticResources::default()),
        );
        let snapshot = checker.perform_health_check(&engine).await;
        assert_eq!(snapshot.status, HealthState::Unhealthy);
        assert!(snapshot.alerts.iter().any(|alert| {
            alert.metric_type == MetricKind::AcceleratorMemory && alert.severity == Severity::Critical
        }));
    }

    #[tokio::test]
    async fn test_vllm_status_loading_on_503() {
        let endpoint = serve(vec![("/health", 503, "")]).await;
        let status = engine_at(endpoint).probe().await.unwrap();
        assert!(!status.initialized);
        assert!(status.accelerator.is_none());
    }

    #[tokio::test]
    async fn test_vllm_status_without_metrics_is_ready() {
        let endpoint = serve(vec![("/health", 200, "")]).await;
        let status = engine_at(endpoint).probe().await.unwrap();
        assert_eq!(status, EngineStatus::ready());
    }

    #[test]
    fn test_engine_urls() {
        let engine = VllmEngine::new(
            "http://localhost:8001".parse().unwrap(),
            "test-model",
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(engine.url("health").unwrap().as_str(), "http://localhost:8001/health");
        assert_eq!(
            engine.url("v1/completions").unwrap().as_str(),
            "http://localhost:8001/v1/completions"
        );
        assert_eq!(engine.name(), "vllm");
    }

    #[test]
    fn test_completion_request_shape() {
        let request = CompletionRequest {
            model: "test-model",
            prompt: "Hello",
            max_tokens: 10,
            temperature: 0.0,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["max_tokens"], 10);
    }

    #[test]
    fn test_accelerator_into_readings() {
        let readings: ResourceReadings = AcceleratorReading {
            memory_percent: Some(50.0),
            temperature_celsius: Some(70.0),
            utilization_percent: None,
        }
        .into();
        assert_eq!(readings.accelerator_memory_percent, Some(50.0));
        assert_eq!(readings.accelerator_temperature, Some(70.0));
        assert_eq!(readings.memory_percent, None);
    }

    #[tokio::test]
    async fn test_unreachable_engine_fails_probe() {
        let engine = VllmEngine::new(
            "http://127.0.0.1:1".parse().unwrap(),
            "test-model",
            Duration::from_secs(1),
        )
        .unwrap();

        let err = engine.probe().await.unwrap_err();
        assert!(err.is_retryable());
    }
}
