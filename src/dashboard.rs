//! Dashboard Facade (C8): the only API surface producers (Scheduler,
//! Metrics Collector) call. Builds the corresponding `StreamEvent`,
//! updates the relevant ring buffer via the Event Bus, and exposes
//! `add_log_message` directly — no mock UI-layout object standing in for
//! a logger, per the REDESIGN FLAGS guidance.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde_json::json;

use crate::event_bus::EventBus;
use crate::protocol::{BenchmarkStatus, EventType, HistoricalEntry, LiveMetrics, RunStatus};

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("clock before epoch").as_secs_f64()
}

/// Partial update applied to `BenchmarkStatus`; mirrors the source's
/// `update_benchmark_status(**kwargs)` call shape with concrete optional
/// fields instead of duck-typed keyword arguments.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub status: Option<RunStatus>,
    pub current_scenario: Option<String>,
    pub current_iteration: Option<usize>,
    pub total_scenarios: Option<usize>,
    pub total_iterations: Option<usize>,
    pub current_concurrency: Option<usize>,
    pub progress_percentage: Option<f64>,
    pub start_time: Option<f64>,
    pub estimated_end_time: Option<f64>,
    pub error_message: Option<String>,
}

/// The four metrics `update_scatter_plot_panel` expects, in the order
/// the original source unpacks them: ttft, output_latency,
/// input_throughput, output_throughput.
#[derive(Debug, Clone, Copy)]
pub struct ScatterPoint {
    pub ttft: f64,
    pub output_latency: f64,
    pub input_throughput: f64,
    pub output_throughput: f64,
}

pub trait DashboardFacade: Send + Sync {
    fn update_benchmark_status(&self, update: StatusUpdate);
    fn update_metrics_panels(&self, live: &LiveMetrics);
    fn update_histogram_panel(&self, ttft_samples: &[f64], output_latency_samples: &[f64]);
    fn update_scatter_plot_panel(&self, point: ScatterPoint);
    fn update_rps_vs_latency_plot(&self, rps: f64, latency: f64);
    fn update_iteration_rps_vs_latency(
        &self,
        concurrency: usize,
        live: &LiveMetrics,
        run_time: f64,
        total_requests: u64,
    );
    fn update_benchmark_progress_bars(&self, progress_increment: f64);
    fn start_run(&self, run_time: f64, start_time: f64, max_requests: u64);
    fn handle_single_request(&self, live: &LiveMetrics, total_requests: u64, error_code: Option<i32>);
    fn reset_plot_metrics(&self);
    fn reset_panels(&self);
    fn reset_run_tracking(&self);
    fn add_log_message(&self, message: &str, level: &str);
    fn add_historical_data(&self, entry: HistoricalEntry);
    fn current_status(&self) -> BenchmarkStatus;
}

/// Bookkeeping the source keeps alongside the dashboard for the current
/// run: `start_time`/`run_time`/`max_requests_per_run`, cleared by
/// `reset_run_tracking` without emitting an event.
#[derive(Debug, Default)]
struct RunTracking {
    run_time: Option<f64>,
    start_time: Option<f64>,
    max_requests_per_run: Option<u64>,
}

/// The real implementation: every method builds a `StreamEvent` and
/// publishes it on the Event Bus, plus mutates `BenchmarkStatus` for
/// `update_benchmark_status`.
pub struct StreamingDashboard {
    bus: Arc<EventBus>,
    status: RwLock<BenchmarkStatus>,
    run_tracking: RwLock<RunTracking>,
}

impl StreamingDashboard {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus, status: RwLock::new(BenchmarkStatus::default()), run_tracking: RwLock::new(RunTracking::default()) }
    }
}

impl DashboardFacade for StreamingDashboard {
    fn update_benchmark_status(&self, update: StatusUpdate) {
        {
            let mut status = self.status.write();
            if let Some(v) = update.status {
                status.status = v;
            }
            if update.current_scenario.is_some() {
                status.current_scenario = update.current_scenario.clone();
            }
            if let Some(v) = update.current_iteration {
                status.current_iteration = v;
            }
            if let Some(v) = update.total_scenarios {
                status.total_scenarios = v;
            }
            if let Some(v) = update.total_iterations {
                status.total_iterations = v;
            }
            if update.current_concurrency.is_some() {
                status.current_concurrency = update.current_concurrency;
            }
            if let Some(v) = update.progress_percentage {
                status.progress_percentage = v;
            }
            if update.start_time.is_some() {
                status.start_time = update.start_time;
            }
            if update.estimated_end_time.is_some() {
                status.estimated_end_time = update.estimated_end_time;
            }
            if update.error_message.is_some() {
                status.error_message = update.error_message.clone();
            }
        }
        let snapshot = self.status.read().clone();
        self.bus.publish(EventType::Status, json!(snapshot));
    }

    fn update_metrics_panels(&self, live: &LiveMetrics) {
        self.bus.publish(EventType::Metrics, json!(live));
    }

    fn update_histogram_panel(&self, ttft_samples: &[f64], output_latency_samples: &[f64]) {
        let ttft_hist = histogram(ttft_samples);
        let latency_hist = histogram(output_latency_samples);
        self.bus.publish(
            EventType::Histogram,
            json!({"ttft_histogram": ttft_hist, "output_latency_histogram": latency_hist}),
        );
    }

    fn update_scatter_plot_panel(&self, point: ScatterPoint) {
        self.bus.publish(
            EventType::Scatter,
            json!({
                "ttft": point.ttft,
                "output_latency": point.output_latency,
                "input_throughput": point.input_throughput,
                "output_throughput": point.output_throughput,
            }),
        );
    }

    fn update_rps_vs_latency_plot(&self, rps: f64, latency: f64) {
        if latency <= 0.0 {
            return;
        }
        self.bus.publish(EventType::RpsVsLatency, json!({"rps": rps, "e2e_latency": latency}));
    }

    fn update_iteration_rps_vs_latency(
        &self,
        concurrency: usize,
        live: &LiveMetrics,
        run_time: f64,
        total_requests: u64,
    ) {
        if run_time <= 0.0 {
            return;
        }
        let rps = total_requests as f64 / run_time;
        let (proxy_name, proxy_value) = latency_proxy(live);
        if proxy_value > 0.0 {
            self.bus.publish(
                EventType::RpsVsLatency,
                json!({
                    "rps": rps,
                    "e2e_latency": proxy_value,
                    "concurrency": concurrency,
                    "latency_proxy": proxy_name,
                }),
            );
        }
    }

    fn update_benchmark_progress_bars(&self, progress_increment: f64) {
        self.bus.publish(EventType::Progress, json!({"progress_increment": progress_increment}));
    }

    fn start_run(&self, run_time: f64, start_time: f64, max_requests: u64) {
        *self.run_tracking.write() = RunTracking {
            run_time: Some(run_time),
            start_time: Some(start_time),
            max_requests_per_run: Some(max_requests),
        };
        self.bus.publish(
            EventType::RunStarted,
            json!({"run_time": run_time, "start_time": start_time, "max_requests": max_requests}),
        );
    }

    fn handle_single_request(&self, live: &LiveMetrics, total_requests: u64, error_code: Option<i32>) {
        if error_code.is_none() {
            self.update_metrics_panels(live);
        }
        self.bus.publish(
            EventType::RequestProcessed,
            json!({"total_requests": total_requests, "error_code": error_code}),
        );
    }

    fn reset_plot_metrics(&self) {
        self.bus.publish(EventType::MetricsReset, json!({}));
    }

    fn reset_panels(&self) {
        self.bus.publish(EventType::PanelsReset, json!({}));
    }

    fn reset_run_tracking(&self) {
        *self.run_tracking.write() = RunTracking::default();
    }

    fn add_log_message(&self, message: &str, level: &str) {
        match level {
            "ERROR" => tracing::error!("{message}"),
            "WARN" | "WARNING" => tracing::warn!("{message}"),
            "DEBUG" => tracing::debug!("{message}"),
            _ => tracing::info!("{message}"),
        }
        self.bus.publish(EventType::Log, json!({"message": message, "level": level, "timestamp": now_secs()}));
    }

    fn add_historical_data(&self, entry: HistoricalEntry) {
        self.bus.add_historical_data(entry);
    }

    fn current_status(&self) -> BenchmarkStatus {
        self.status.read().clone()
    }
}

/// Latency-proxy selection per the deterministic preference order: a
/// concrete chain, not attribute-probing on a duck-typed aggregate.
fn latency_proxy(live: &LiveMetrics) -> (&'static str, f64) {
    if live.ttft.mean > 0.0 {
        ("ttft.mean", live.ttft.mean)
    } else if live.output_latency.mean > 0.0 {
        ("output_latency.mean", live.output_latency.mean)
    } else {
        ("e2e_latency.mean", live.e2e_latency.mean)
    }
}

/// 10 fixed-count bins over the given values, matching the source's
/// `_create_histogram_data`. Returns empty bins/counts for no data.
fn histogram(values: &[f64]) -> serde_json::Value {
    let values: Vec<f64> = values.iter().copied().filter(|v| v.is_finite() && *v != 0.0).collect();
    if values.is_empty() {
        return json!({"bins": [], "counts": []});
    }
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mean = values.iter().sum::<f64>() / values.len() as f64;

    const BINS: usize = 10;
    let width = ((max - min) / BINS as f64).max(f64::EPSILON);
    let mut counts = vec![0u64; BINS];
    for v in &values {
        let mut idx = ((v - min) / width) as usize;
        if idx >= BINS {
            idx = BINS - 1;
        }
        counts[idx] += 1;
    }
    let bins: Vec<f64> = (0..=BINS).map(|i| min + width * i as f64).collect();

    json!({"bins": bins, "counts": counts, "min": min, "max": max, "mean": mean})
}

/// Silently drops everything except a debug log. Used in tests and
/// headless runs where no dashboard transport is active — replaces the
/// source's "silently drop when no event loop active" behavior uniformly
/// rather than special-casing shutdown.
pub struct NullDashboard {
    status: RwLock<BenchmarkStatus>,
}

impl Default for NullDashboard {
    fn default() -> Self {
        Self::new()
    }
}

impl NullDashboard {
    pub fn new() -> Self {
        Self { status: RwLock::new(BenchmarkStatus::default()) }
    }
}

impl DashboardFacade for NullDashboard {
    fn update_benchmark_status(&self, update: StatusUpdate) {
        tracing::debug!("null dashboard: status update dropped");
        if let Some(v) = update.status {
            self.status.write().status = v;
        }
    }
    fn update_metrics_panels(&self, _live: &LiveMetrics) {}
    fn update_histogram_panel(&self, _ttft_samples: &[f64], _output_latency_samples: &[f64]) {}
    fn update_scatter_plot_panel(&self, _point: ScatterPoint) {}
    fn update_rps_vs_latency_plot(&self, _rps: f64, _latency: f64) {}
    fn update_iteration_rps_vs_latency(
        &self,
        _concurrency: usize,
        _live: &LiveMetrics,
        _run_time: f64,
        _total_requests: u64,
    ) {
    }
    fn update_benchmark_progress_bars(&self, _progress_increment: f64) {}
    fn start_run(&self, _run_time: f64, _start_time: f64, _max_requests: u64) {}
    fn handle_single_request(&self, _live: &LiveMetrics, _total_requests: u64, _error_code: Option<i32>) {}
    fn reset_plot_metrics(&self) {}
    fn reset_panels(&self) {}
    fn reset_run_tracking(&self) {}
    fn add_log_message(&self, message: &str, level: &str) {
        match level {
            "ERROR" => tracing::error!("{message}"),
            "WARN" | "WARNING" => tracing::warn!("{message}"),
            _ => tracing::debug!("{message}"),
        }
    }
    fn add_historical_data(&self, _entry: HistoricalEntry) {}
    fn current_status(&self) -> BenchmarkStatus {
        self.status.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metrics(ttft_mean: f64) -> LiveMetrics {
        let mut live = LiveMetrics::default();
        live.ttft.mean = ttft_mean;
        live
    }

    #[test]
    fn latency_proxy_prefers_ttft_then_output_then_e2e() {
        let mut live = LiveMetrics::default();
        live.e2e_latency.mean = 0.5;
        assert_eq!(latency_proxy(&live), ("e2e_latency.mean", 0.5));

        live.output_latency.mean = 0.3;
        assert_eq!(latency_proxy(&live), ("output_latency.mean", 0.3));

        live.ttft.mean = 0.2;
        assert_eq!(latency_proxy(&live), ("ttft.mean", 0.2));
    }

    #[test]
    fn update_benchmark_status_is_cumulative_not_reset() {
        let bus = Arc::new(EventBus::new());
        let dashboard = StreamingDashboard::new(bus);
        dashboard.update_benchmark_status(StatusUpdate {
            current_scenario: Some("D(1,1)".to_string()),
            ..Default::default()
        });
        dashboard.update_benchmark_status(StatusUpdate {
            current_iteration: Some(3),
            ..Default::default()
        });
        let status = dashboard.current_status();
        assert_eq!(status.current_scenario.as_deref(), Some("D(1,1)"));
        assert_eq!(status.current_iteration, 3);
    }

    #[test]
    fn rps_vs_latency_skipped_when_latency_not_positive() {
        let bus = Arc::new(EventBus::new());
        let dashboard = StreamingDashboard::new(bus.clone());
        dashboard.update_rps_vs_latency_plot(10.0, 0.0);
        assert!(bus.complete_history().metrics_history.is_empty());
    }

    #[test]
    fn handle_single_request_skips_metrics_on_error() {
        let bus = Arc::new(EventBus::new());
        let dashboard = StreamingDashboard::new(bus.clone());
        dashboard.handle_single_request(&sample_metrics(0.1), 1, Some(500));
        assert!(bus.complete_history().metrics_history.is_empty());
        dashboard.handle_single_request(&sample_metrics(0.1), 2, None);
        assert_eq!(bus.complete_history().metrics_history.len(), 1);
    }

    #[test]
    fn scheduler_iteration_rps_point_matches_ttft_proxy() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let dashboard = StreamingDashboard::new(bus);

        let mut live = LiveMetrics::default();
        live.ttft.mean = 0.2;
        dashboard.update_iteration_rps_vs_latency(4, &live, 10.0, 100);

        let event = rx.try_recv().expect("rps_vs_latency event should have been published");
        assert_eq!(event.event_type, EventType::RpsVsLatency);
        assert!((event.data["rps"].as_f64().unwrap() - 10.0).abs() < 1e-9);
        assert!((event.data["e2e_latency"].as_f64().unwrap() - 0.2).abs() < 1e-9);
        assert_eq!(event.data["latency_proxy"], "ttft.mean");
    }

    #[test]
    fn update_histogram_panel_buckets_the_full_sample_list_not_just_summary_stats() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let dashboard = StreamingDashboard::new(bus);

        let samples: Vec<f64> = (1..=20).map(|i| i as f64 * 0.1).collect();
        dashboard.update_histogram_panel(&samples, &[]);

        let event = rx.try_recv().expect("histogram event should have been published");
        assert_eq!(event.event_type, EventType::Histogram);
        let counts = event.data["ttft_histogram"]["counts"].as_array().unwrap();
        assert_eq!(counts.len(), 10);
        let total: u64 = counts.iter().map(|c| c.as_u64().unwrap()).sum();
        assert_eq!(total, samples.len() as u64);
        assert_eq!(event.data["output_latency_histogram"]["counts"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn reset_run_tracking_clears_without_emitting_event() {
        let bus = Arc::new(EventBus::new());
        let dashboard = StreamingDashboard::new(bus.clone());
        dashboard.start_run(10.0, 0.0, 100);
        let before = bus.complete_history().status_history.len();
        dashboard.reset_run_tracking();
        let after = bus.complete_history().status_history.len();
        assert_eq!(before, after);
    }
}
