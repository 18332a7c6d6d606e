//! `fulfillment <stage>`: runs one pipeline stage per process.
//!
//! The stage is taken from the first argument, or from `STAGE` when no
//! argument is given.

use anyhow::Context;
use fulfillment_core::event_bus::EventBus;
use fulfillment_core::observability::MetricsSink;
use fulfillment_redpanda::RedpandaEventBus;
use fulfillment_runtime::{MetricsServer, PrometheusSink};
use fulfillment_stages::admin::{self, AdminState};
use fulfillment_stages::{Config, Stage, StageRuntime};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fulfillment=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let stage: Stage = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("STAGE").ok())
        .context("usage: fulfillment <stage>")?
        .parse()?;

    let config = Config::from_env()?;
    info!(
        stage = %stage,
        broker = %config.kafka.broker,
        address = %config.bind_address(),
        "Configuration loaded"
    );

    let bus: Arc<dyn EventBus> = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&config.kafka.broker)
            .build()
            .context("Failed to connect to the broker")?,
    );

    let mut metrics_server = MetricsServer::new();
    metrics_server.start()?;
    let metrics: Arc<dyn MetricsSink> = Arc::new(PrometheusSink);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let runtime = StageRuntime::start(stage, &config, bus, metrics, shutdown_rx.clone());
    info!(stage = %stage, consumers = runtime.consumer_count(), "Stage started");

    let app = admin::router(AdminState {
        stage,
        shutdown: shutdown_tx.clone(),
        metrics: metrics_server.handle().cloned(),
        intake: runtime.intake(),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;
    info!(address = %config.bind_address(), "Admin server listening");

    let signals = tokio::spawn(shutdown_signal(shutdown_tx.clone()));

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            // Err means every sender is gone, which is a shutdown as well.
            let _ = server_shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("Admin server failed")?;

    // The server also stops when a signal arrives; make sure consumers see it.
    shutdown_tx.send_replace(true);
    signals.abort();

    let summaries = runtime
        .join(Duration::from_secs(config.server.shutdown_timeout))
        .await;
    for summary in &summaries {
        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            read_errors = summary.read_errors,
            "Consumer summary"
        );
    }

    info!(stage = %stage, "Shutdown complete");
    Ok(())
}

/// Flip `shutdown` on Ctrl+C (SIGINT) or SIGTERM.
async fn shutdown_signal(shutdown: Arc<watch::Sender<bool>>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal, shutting down gracefully..."),
        () = terminate => info!("Received SIGTERM signal, shutting down gracefully..."),
    }
    shutdown.send_replace(true);
}
