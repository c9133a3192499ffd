use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genai_streambench::config::BenchConfig;
use genai_streambench::dashboard::{DashboardFacade, StreamingDashboard};
use genai_streambench::event_bus::EventBus;
use genai_streambench::executor::{ExecutorConfig, RequestExecutor};
use genai_streambench::metrics::MetricsCollector;
use genai_streambench::sampler::{OpenAiChatAdapter, UniformScenarioSampler};
use genai_streambench::scheduler::{Scheduler, SchedulerConfig};
use genai_streambench::server::{self, ServerState};
use genai_streambench::terminal_dashboard;

#[derive(Parser)]
#[command(name = "genai-streambench")]
#[command(about = "Load-generation and measurement harness for generative inference endpoints", long_about = None)]
struct Cli {
    /// Path to the benchmark config file (JSON).
    #[arg(short, long, env = "GENAI_STREAMBENCH_CONFIG", default_value = "~/.genai-streambench/config.json")]
    config: String,

    /// Server host override.
    #[arg(long)]
    host: Option<String>,

    /// Server port override.
    #[arg(short, long)]
    port: Option<u16>,

    /// Disable SSE streaming parsing (plain-prompt mode).
    #[arg(long)]
    no_streaming: bool,

    /// Render a terminal dashboard instead of (in addition to) the web one.
    #[arg(long)]
    terminal_dashboard: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genai_streambench=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let config_path = PathBuf::from(shellexpand::tilde(&cli.config).to_string());
    let bench_config = BenchConfig::load_or_default(&config_path)?;
    tracing::info!(path = %config_path.display(), "loaded benchmark config");

    let mut file = bench_config.file;
    if let Some(host) = cli.host {
        file.host = host;
    }
    if let Some(port) = cli.port {
        file.port = port;
    }
    if cli.no_streaming {
        file.enable_streaming = false;
    }

    let auth_provider = file.auth.build_provider()?;
    let adapter = Arc::new(OpenAiChatAdapter);
    let executor_config = ExecutorConfig {
        host: file.url.clone(),
        enable_streaming: file.enable_streaming,
        auth: auth_provider,
        adapter,
    };
    let executor = Arc::new(RequestExecutor::new(executor_config));
    let metrics = Arc::new(MetricsCollector::new());
    let bus = Arc::new(EventBus::new());

    let dashboard: Arc<dyn DashboardFacade> = Arc::new(StreamingDashboard::new(Arc::clone(&bus)));

    if cli.terminal_dashboard {
        let terminal = Arc::new(terminal_dashboard::TerminalDashboard::new());
        let terminal_for_thread = Arc::clone(&terminal);
        std::thread::spawn(move || {
            if let Err(err) = terminal_for_thread.run() {
                tracing::error!("terminal dashboard exited with error: {err}");
            }
        });
    }

    let sampler = Arc::new(UniformScenarioSampler::new(file.model.clone()));

    let scheduler = Scheduler::new(
        SchedulerConfig {
            scenarios: file.traffic_scenario.clone(),
            concurrency_levels: file.num_concurrency.clone(),
            max_requests_per_run: file.max_requests_per_run,
            max_time_per_run: Duration::from_secs(file.max_time_per_run),
        },
        Arc::clone(&executor),
        Arc::clone(&metrics),
        Arc::clone(&dashboard),
        sampler,
    );

    let (cancel_tx, cancel_rx) = watch::channel(false);

    let server_state = ServerState {
        bus: Arc::clone(&bus),
        dashboard: Arc::clone(&dashboard),
        host: file.host.clone(),
        port: file.port,
    };
    let app = server::build_router(server_state);

    let addr = SocketAddr::from((file.host.parse::<std::net::IpAddr>()?, file.port));
    tracing::info!(%addr, "genai-streambench listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let scheduler_handle = tokio::spawn(async move { scheduler.run(cancel_rx).await });

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested, draining");
            let _ = cancel_tx.send(true);
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    if let Ok(Err(err)) = scheduler_handle.await {
        tracing::error!("scheduler exited with error: {err}");
        std::process::exit(2);
    }

    Ok(())
}
