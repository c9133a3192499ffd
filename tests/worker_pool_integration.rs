//! Integration tests for the Worker Pool's concurrency bound and
//! serialization behavior, against a real local axum upstream (same
//! "spin up a server on an ephemeral port" technique as
//! `integration_codex_stream.rs`) rather than a mock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::routing::post;
use axum::Router;
use genai_streambench::auth::StaticAuthProvider;
use genai_streambench::dashboard::NullDashboard;
use genai_streambench::executor::{ExecutorConfig, RequestExecutor};
use genai_streambench::metrics::MetricsCollector;
use genai_streambench::sampler::{PlainPromptAdapter, UniformScenarioSampler};
use genai_streambench::worker_pool::{RunController, RunParams};
use tokio::net::TcpListener;
use tokio::sync::watch;

fn skip_if_localhost_bind_unavailable() -> bool {
    if std::net::TcpListener::bind("127.0.0.1:0").is_ok() {
        return false;
    }
    eprintln!("Skipping test: cannot bind localhost sockets in this environment");
    true
}

/// Upstream that sleeps briefly before responding, recording how many
/// requests were in flight at once and the wall-clock span of each.
async fn spawn_slow_upstream(
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    spans: Arc<Mutex<Vec<(Instant, Instant)>>>,
) -> String {
    let app = Router::new().route(
        "/v1/completions",
        post(move || {
            let in_flight = Arc::clone(&in_flight);
            let max_in_flight = Arc::clone(&max_in_flight);
            let spans = Arc::clone(&spans);
            async move {
                let started = Instant::now();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_in_flight.fetch_max(now, Ordering::SeqCst);

                tokio::time::sleep(delay).await;

                in_flight.fetch_sub(1, Ordering::SeqCst);
                spans.lock().unwrap().push((started, Instant::now()));
                "ok response text"
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

fn controller_for(host: &str) -> (RunController, Arc<MetricsCollector>) {
    let auth = Arc::new(StaticAuthProvider::new(None));
    let adapter = Arc::new(PlainPromptAdapter);
    let config = ExecutorConfig {
        host: host.to_string(),
        enable_streaming: false,
        auth,
        adapter,
    };
    let executor = Arc::new(RequestExecutor::new(config));
    let metrics = Arc::new(MetricsCollector::new());
    let dashboard = Arc::new(NullDashboard::new());
    (RunController::new(executor, metrics.clone(), dashboard), metrics)
}

#[tokio::test]
async fn in_flight_never_exceeds_configured_concurrency() {
    if skip_if_localhost_bind_unavailable() {
        return;
    }

    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let spans = Arc::new(Mutex::new(Vec::new()));
    let host =
        spawn_slow_upstream(Duration::from_millis(30), in_flight, Arc::clone(&max_in_flight), spans)
            .await;

    let (controller, metrics) = controller_for(&host);
    let sampler = Arc::new(UniformScenarioSampler::new("m".to_string()));
    let (_tx, rx) = watch::channel(false);
    let params = RunParams { concurrency: 4, max_requests: 20, max_duration: Duration::from_secs(5) };

    controller.run_cell(params, sampler, "D(5,5)", rx).await;

    // Admission stops once 20 complete, but whatever was already in
    // flight at that instant is still drained rather than discarded, so
    // the final count can run up to `concurrency - 1` over the target.
    let total = metrics.total_requests();
    assert!(total >= 20 && total < 20 + 4, "expected 20..23 completed requests, got {total}");
    assert!(
        max_in_flight.load(Ordering::SeqCst) <= 4,
        "observed {} concurrent requests, expected at most 4",
        max_in_flight.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn concurrency_one_serializes_requests() {
    if skip_if_localhost_bind_unavailable() {
        return;
    }

    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let spans = Arc::new(Mutex::new(Vec::new()));
    let host = spawn_slow_upstream(
        Duration::from_millis(20),
        in_flight,
        Arc::clone(&max_in_flight),
        Arc::clone(&spans),
    )
    .await;

    let (controller, metrics) = controller_for(&host);
    let sampler = Arc::new(UniformScenarioSampler::new("m".to_string()));
    let (_tx, rx) = watch::channel(false);
    let params = RunParams { concurrency: 1, max_requests: 5, max_duration: Duration::from_secs(5) };

    controller.run_cell(params, sampler, "D(5,5)", rx).await;

    assert_eq!(metrics.total_requests(), 5);
    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);

    let mut recorded = spans.lock().unwrap().clone();
    recorded.sort_by_key(|(start, _)| *start);
    for pair in recorded.windows(2) {
        let (_, prev_end) = pair[0];
        let (next_start, _) = pair[1];
        assert!(
            next_start >= prev_end,
            "next request started before the previous one finished"
        );
    }
}

#[tokio::test]
async fn cancellation_aborts_in_flight_requests_against_a_hung_upstream() {
    if skip_if_localhost_bind_unavailable() {
        return;
    }

    // Long enough that the test would time out waiting for a natural
    // completion if cancellation were not actually aborting the read.
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));
    let spans = Arc::new(Mutex::new(Vec::new()));
    let host =
        spawn_slow_upstream(Duration::from_secs(30), in_flight, max_in_flight, spans).await;

    let (controller, metrics) = controller_for(&host);
    let sampler = Arc::new(UniformScenarioSampler::new("m".to_string()));
    let (tx, rx) = watch::channel(false);
    let params = RunParams { concurrency: 4, max_requests: 1000, max_duration: Duration::from_secs(60) };

    let run = tokio::spawn(async move { controller.run_cell(params, sampler, "D(5,5)", rx).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    tx.send(true).unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("run_cell should abort promptly once cancelled, not wait out the 30s upstream")
        .unwrap();

    assert_eq!(outcome, genai_streambench::worker_pool::RunOutcome::Cancelled);
    assert!(metrics.error_counters().counts.get("other").copied().unwrap_or(0) > 0);
}
