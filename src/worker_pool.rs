//! Worker Pool / Run Controller (C4): holds exactly `N` requests in
//! flight against one (scenario, concurrency) pairing, terminating on
//! predicates and reporting each completion to the Dashboard Facade.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::sync::watch;

use crate::dashboard::DashboardFacade;
use crate::executor::RequestExecutor;
use crate::metrics::MetricsCollector;
use crate::sampler::RequestSampler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Done,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct RunParams {
    pub concurrency: usize,
    pub max_requests: u64,
    pub max_duration: Duration,
}

/// Drives one run: launches exactly `concurrency` requests at start,
/// tail-launches a replacement the instant each one completes, and stops
/// admitting new work once a termination predicate trips. Waits for
/// in-flight requests to drain before returning.
pub struct RunController {
    executor: Arc<RequestExecutor>,
    metrics: Arc<MetricsCollector>,
    dashboard: Arc<dyn DashboardFacade>,
}

impl RunController {
    pub fn new(
        executor: Arc<RequestExecutor>,
        metrics: Arc<MetricsCollector>,
        dashboard: Arc<dyn DashboardFacade>,
    ) -> Self {
        Self { executor, metrics, dashboard }
    }

    pub async fn run_cell(
        &self,
        params: RunParams,
        sampler: Arc<dyn RequestSampler>,
        scenario: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> RunOutcome {
        if params.max_requests == 0 {
            return RunOutcome::Done;
        }

        let started = Instant::now();
        let completed = AtomicU64::new(0);
        let mut in_flight = FuturesUnordered::new();

        let cancel_for_launch = cancel.clone();
        let launch = move |in_flight: &mut FuturesUnordered<_>| {
            let req = sampler.sample(scenario);
            let executor = Arc::clone(&self.executor);
            let request_cancel = cancel_for_launch.clone();
            in_flight.push(async move { executor.execute(&req, request_cancel).await });
        };

        for _ in 0..params.concurrency {
            launch(&mut in_flight);
        }

        let mut outcome = RunOutcome::Done;

        loop {
            if *cancel.borrow() {
                outcome = RunOutcome::Cancelled;
                break;
            }
            if started.elapsed() >= params.max_duration {
                break;
            }
            if completed.load(Ordering::Relaxed) >= params.max_requests {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.changed() => {
                    if *cancel.borrow() {
                        outcome = RunOutcome::Cancelled;
                        break;
                    }
                }
                maybe_response = in_flight.next(), if !in_flight.is_empty() => {
                    let Some(response) = maybe_response else { break };
                    let live = self.metrics.record(&response);
                    let total = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    let error_code = if response.is_success() { None } else { Some(response.status_code) };
                    self.dashboard.handle_single_request(&live, total, error_code);
                    if error_code.is_none() {
                        self.dashboard.update_histogram_panel(
                            &self.metrics.ttft_samples(),
                            &self.metrics.output_latency_samples(),
                        );
                    }

                    if total < params.max_requests && !*cancel.borrow() {
                        launch(&mut in_flight);
                    }
                }
            }
        }

        // Drain: let whatever is already in flight finish or be
        // effectively abandoned by dropping the future set.
        while let Some(response) = in_flight.next().await {
            let live = self.metrics.record(&response);
            let total = completed.fetch_add(1, Ordering::Relaxed) + 1;
            let error_code = if response.is_success() { None } else { Some(response.status_code) };
            self.dashboard.handle_single_request(&live, total, error_code);
            if error_code.is_none() {
                self.dashboard.update_histogram_panel(
                    &self.metrics.ttft_samples(),
                    &self.metrics.output_latency_samples(),
                );
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticAuthProvider;
    use crate::dashboard::NullDashboard;
    use crate::executor::ExecutorConfig;
    use crate::sampler::{PlainPromptAdapter, UniformScenarioSampler};

    fn controller() -> RunController {
        let auth = Arc::new(StaticAuthProvider::new(Some("test-token".to_string())));
        let adapter = Arc::new(PlainPromptAdapter);
        let config = ExecutorConfig {
            host: "http://127.0.0.1:0".to_string(),
            enable_streaming: false,
            auth,
            adapter,
        };
        let executor = Arc::new(RequestExecutor::new(config));
        let metrics = Arc::new(MetricsCollector::new());
        let dashboard: Arc<dyn DashboardFacade> = Arc::new(NullDashboard::new());
        RunController::new(executor, metrics, dashboard)
    }

    #[tokio::test]
    async fn max_requests_zero_completes_immediately() {
        let controller = controller();
        let sampler: Arc<dyn RequestSampler> = Arc::new(UniformScenarioSampler::new("m".to_string()));
        let (_tx, rx) = watch::channel(false);
        let params =
            RunParams { concurrency: 4, max_requests: 0, max_duration: Duration::from_secs(10) };
        let outcome = controller.run_cell(params, sampler, "D(10,10)", rx).await;
        assert_eq!(outcome, RunOutcome::Done);
        assert_eq!(controller.metrics.total_requests(), 0);
    }

    #[tokio::test]
    async fn cancellation_is_observed() {
        let controller = controller();
        let sampler: Arc<dyn RequestSampler> = Arc::new(UniformScenarioSampler::new("m".to_string()));
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let params =
            RunParams { concurrency: 2, max_requests: 1000, max_duration: Duration::from_secs(10) };
        let outcome = controller.run_cell(params, sampler, "D(10,10)", rx).await;
        assert_eq!(outcome, RunOutcome::Cancelled);
    }
}
