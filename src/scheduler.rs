//! Scheduler (C5): iterates `scenarios × concurrency_levels`, driving
//! the Worker Pool per cell and snapshotting aggregates at cell
//! boundaries.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;

use crate::dashboard::{DashboardFacade, StatusUpdate};
use crate::executor::RequestExecutor;
use crate::metrics::MetricsCollector;
use crate::protocol::{HistoricalEntry, RunStatus};
use crate::sampler::RequestSampler;
use crate::worker_pool::{RunController, RunOutcome, RunParams};

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("clock before epoch").as_secs_f64()
}

pub struct SchedulerConfig {
    pub scenarios: Vec<String>,
    pub concurrency_levels: Vec<usize>,
    pub max_requests_per_run: u64,
    pub max_time_per_run: Duration,
}

pub struct Scheduler {
    config: SchedulerConfig,
    controller: RunController,
    metrics: Arc<MetricsCollector>,
    dashboard: Arc<dyn DashboardFacade>,
    sampler: Arc<dyn RequestSampler>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        executor: Arc<RequestExecutor>,
        metrics: Arc<MetricsCollector>,
        dashboard: Arc<dyn DashboardFacade>,
        sampler: Arc<dyn RequestSampler>,
    ) -> Self {
        let controller = RunController::new(Arc::clone(&executor), Arc::clone(&metrics), Arc::clone(&dashboard));
        Self { config, controller, metrics, dashboard, sampler }
    }

    /// Runs every (scenario, concurrency) cell in sequence. Returns an
    /// error only for scheduler-level failures (e.g. no cells to run is
    /// not an error, a sampler that can never terminate a run would be).
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> anyhow::Result<()> {
        let total_scenarios = self.config.scenarios.len();
        let total_iterations = total_scenarios * self.config.concurrency_levels.len();
        let mut completed_cells = 0usize;

        self.dashboard.update_benchmark_status(StatusUpdate {
            status: Some(RunStatus::Initializing),
            total_scenarios: Some(total_scenarios),
            total_iterations: Some(total_iterations),
            start_time: Some(now_secs()),
            ..Default::default()
        });

        for (scenario_idx, scenario) in self.config.scenarios.iter().enumerate() {
            for &concurrency in &self.config.concurrency_levels {
                if *cancel.borrow() {
                    self.dashboard.update_benchmark_status(StatusUpdate {
                        status: Some(RunStatus::Failed),
                        error_message: Some("cancelled".to_string()),
                        ..Default::default()
                    });
                    return Ok(());
                }

                self.metrics.reset();
                self.dashboard.reset_plot_metrics();
                self.dashboard.reset_panels();

                let run_name = format!("{scenario}-c{concurrency}");
                self.dashboard.add_log_message(&format!("starting run {run_name}"), "INFO");

                self.dashboard.update_benchmark_status(StatusUpdate {
                    status: Some(RunStatus::Running),
                    current_scenario: Some(scenario.clone()),
                    current_iteration: Some(scenario_idx * self.config.concurrency_levels.len() + 1),
                    current_concurrency: Some(concurrency),
                    progress_percentage: Some(
                        completed_cells as f64 / total_iterations.max(1) as f64 * 100.0,
                    ),
                    ..Default::default()
                });

                let run_start = now_secs();
                let started = Instant::now();
                self.dashboard.start_run(
                    self.config.max_time_per_run.as_secs_f64(),
                    run_start,
                    self.config.max_requests_per_run,
                );

                let params = RunParams {
                    concurrency,
                    max_requests: self.config.max_requests_per_run,
                    max_duration: self.config.max_time_per_run,
                };

                let outcome = self
                    .controller
                    .run_cell(params, Arc::clone(&self.sampler), scenario, cancel.clone())
                    .await;

                let run_time = started.elapsed().as_secs_f64();
                let total_requests = self.metrics.total_requests();
                let live = self.metrics.snapshot();

                self.dashboard.update_iteration_rps_vs_latency(
                    concurrency,
                    &live,
                    run_time,
                    total_requests,
                );

                let (proxy_name, proxy_value) = select_latency_proxy(&live);
                self.dashboard.add_historical_data(HistoricalEntry {
                    scenario: scenario.clone(),
                    concurrency,
                    total_requests,
                    run_time,
                    rps: if run_time > 0.0 { total_requests as f64 / run_time } else { 0.0 },
                    latency_proxy_name: proxy_name.to_string(),
                    latency_proxy_value: proxy_value,
                    metrics: live,
                    timestamp: now_secs(),
                });

                completed_cells += 1;
                self.dashboard.update_benchmark_progress_bars(
                    1.0 / total_iterations.max(1) as f64 * 100.0,
                );

                if matches!(outcome, RunOutcome::Cancelled) {
                    self.dashboard.update_benchmark_status(StatusUpdate {
                        status: Some(RunStatus::Failed),
                        error_message: Some("cancelled".to_string()),
                        ..Default::default()
                    });
                    return Ok(());
                }
            }
        }

        self.dashboard.update_benchmark_status(StatusUpdate {
            status: Some(RunStatus::Completed),
            progress_percentage: Some(100.0),
            estimated_end_time: Some(now_secs()),
            ..Default::default()
        });

        Ok(())
    }
}

/// Mirrors `dashboard::latency_proxy` but operates on the Scheduler's own
/// snapshot for the historical-entry record; kept as a free function
/// since the Scheduler does not hold a `StreamingDashboard` concretely
/// (only the trait object).
fn select_latency_proxy(live: &crate::protocol::LiveMetrics) -> (&'static str, f64) {
    if live.ttft.mean > 0.0 {
        ("ttft.mean", live.ttft.mean)
    } else if live.output_latency.mean > 0.0 {
        ("output_latency.mean", live.output_latency.mean)
    } else {
        ("e2e_latency.mean", live.e2e_latency.mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthProvider;
    use crate::dashboard::NullDashboard;
    use crate::executor::ExecutorConfig;
    use crate::sampler::{PlainPromptAdapter, UniformScenarioSampler};

    #[tokio::test]
    async fn zero_max_requests_completes_all_cells_immediately() {
        let auth = Arc::new(StaticAuthProvider::new(Some("t".to_string())));
        let adapter = Arc::new(PlainPromptAdapter);
        let executor = Arc::new(RequestExecutor::new(ExecutorConfig {
            host: "http://127.0.0.1:0".to_string(),
            enable_streaming: false,
            auth,
            adapter,
        }));
        let metrics = Arc::new(MetricsCollector::new());
        let dashboard: Arc<dyn DashboardFacade> = Arc::new(NullDashboard::new());
        let sampler: Arc<dyn RequestSampler> = Arc::new(UniformScenarioSampler::new("m".to_string()));

        let scheduler = Scheduler::new(
            SchedulerConfig {
                scenarios: vec!["D(1,1)".to_string()],
                concurrency_levels: vec![1, 2],
                max_requests_per_run: 0,
                max_time_per_run: Duration::from_secs(1),
            },
            executor,
            Arc::clone(&metrics),
            dashboard,
            sampler,
        );

        let (_tx, rx) = watch::channel(false);
        scheduler.run(rx).await.unwrap();
        assert_eq!(metrics.total_requests(), 0);
    }
}
