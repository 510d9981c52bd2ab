//! Payment saga service entry point.

use saga::SagaConfig;
use service::stdio::{StdoutCommandDispatcher, stdin_events};
use service::{Config, LogFormat, ServiceError};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    // Commands own stdout; logs go to stderr.
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    let saga_config = SagaConfig::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics exporter
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(config.metrics_addr)
        .install()
        .map_err(|e| ServiceError::Metrics(e.to_string()))?;
    tracing::info!(addr = %config.metrics_addr, "metrics exporter listening");

    // 3. Wire the orchestrator and start the workers
    let (orchestrator, runtime) = service::start(StdoutCommandDispatcher::stdout(), &saga_config);
    let recovered = orchestrator.recover_deadlines().await?;
    tracing::info!(
        recovered,
        workers = runtime.worker_count(),
        deadline_secs = saga_config.deadline.as_secs(),
        "payment saga service started"
    );

    // 4. Feed stdin until it closes or a signal arrives
    tokio::select! {
        result = runtime.run(stdin_events()) => {
            let submitted = result?;
            tracing::info!(submitted, "stdin closed");
            if !config.exit_on_eof {
                // Pending deadlines keep firing until we are told to stop.
                shutdown_signal().await;
            }
        }
        () = shutdown_signal() => {}
    }

    // 5. Drain in-flight inputs
    let stats = runtime.shutdown().await;
    tracing::info!(
        handled = stats.handled,
        failed = stats.failed,
        "service shut down gracefully"
    );
    Ok(())
}
