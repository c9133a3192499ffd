//! Wire and in-process data model: requests, responses, live metrics,
//! benchmark status, and the events that flow over the event bus.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One sampled request, built by a `Sampler` and consumed by exactly one
/// Request Executor call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRequest {
    pub model: String,
    #[serde(flatten)]
    pub kind: RequestKind,
    pub num_prefill_tokens: Option<u32>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub additional_params: HashMap<String, Value>,
}

/// Selects which of the three request shapes this `UserRequest` carries.
/// Mirrors the `UserChatRequest` / `UserImageChatRequest` /
/// `UserEmbeddingRequest` split recovered from the Python source's
/// `genai_bench/protocol.py`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestKind {
    Chat { prompt: String },
    ImageChat { prompt: String, image_content: Vec<String> },
    Embedding { prompt: String },
}

/// Immutable outcome of a single request, built once by the Request
/// Executor and consumed once by the Metrics Collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub status_code: i32,
    pub start_time: f64,
    pub end_time: f64,
    pub time_at_first_token: Option<f64>,
    pub tokens_received: u32,
    pub num_prefill_tokens: Option<u32>,
    pub generated_text: String,
    pub finish_reason: Option<String>,
    pub error_message: Option<String>,
}

impl UserResponse {
    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    /// HTTP status class bucket used by the Metrics Collector's error
    /// counters: "2xx", "4xx", "5xx", or "other" (transport errors report
    /// status_code -1 and land here).
    pub fn status_class(&self) -> &'static str {
        match self.status_code {
            200..=299 => "2xx",
            400..=499 => "4xx",
            500..=599 => "5xx",
            _ => "other",
        }
    }
}

/// mean/min/max/p50/p90/p95/p99 over the current contents of a sliding
/// window. Empty windows report all-zero.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Stats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Snapshot of every sliding window the Metrics Collector tracks, taken
/// atomically with respect to concurrent appenders.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LiveMetrics {
    pub ttft: Stats,
    pub input_throughput: Stats,
    pub output_throughput: Stats,
    pub output_latency: Stats,
    pub e2e_latency: Stats,
}

/// Mutable singleton describing benchmark-run progress. Only the
/// Scheduler mutates it; the Dashboard Facade reads and broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkStatus {
    pub status: RunStatus,
    pub current_scenario: Option<String>,
    pub current_iteration: usize,
    pub total_scenarios: usize,
    pub total_iterations: usize,
    pub current_concurrency: Option<usize>,
    pub progress_percentage: f64,
    pub start_time: Option<f64>,
    pub estimated_end_time: Option<f64>,
    pub error_message: Option<String>,
}

impl Default for BenchmarkStatus {
    fn default() -> Self {
        Self {
            status: RunStatus::Idle,
            current_scenario: None,
            current_iteration: 0,
            total_scenarios: 0,
            total_iterations: 0,
            current_concurrency: None,
            progress_percentage: 0.0,
            start_time: None,
            estimated_end_time: None,
            error_message: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Idle,
    Initializing,
    Running,
    Completed,
    Failed,
}

/// Completed-run summary appended to `historical_data` by the Scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalEntry {
    pub scenario: String,
    pub concurrency: usize,
    pub total_requests: u64,
    pub run_time: f64,
    pub rps: f64,
    pub latency_proxy_name: String,
    pub latency_proxy_value: f64,
    pub metrics: LiveMetrics,
    pub timestamp: f64,
}

/// One broadcastable event. `data` carries the event-type-specific
/// payload as a JSON value so `StreamEvent` has one concrete shape on the
/// wire regardless of which producer emitted it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamEvent {
    pub event_type: EventType,
    pub timestamp: f64,
    pub data: Value,
}

impl StreamEvent {
    pub fn new(event_type: EventType, timestamp: f64, data: Value) -> Self {
        Self { event_type, timestamp, data }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Status,
    Metrics,
    Histogram,
    Scatter,
    RpsVsLatency,
    Progress,
    Log,
    TaskCreated,
    RunStarted,
    RequestProcessed,
    PanelsReset,
    MetricsReset,
    Heartbeat,
    HistoricalData,
    CurrentParameters,
    ParameterUpdateConfirmed,
    ParameterUpdateError,
    BenchmarkStartRequested,
}
