//! relay-persistence service entry point.
//!
//! Connects the database cluster, migrates, starts the telemetry writers
//! and serves the health surface until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use relay_persistence::api;
use relay_persistence::app_state::AppState;
use relay_persistence::config::AppConfig;
use relay_persistence::persistence::cluster::Cluster;
use relay_persistence::persistence::models::{RequestLogEntry, UsageRecord};
use relay_persistence::persistence::repository::Repository;
use relay_persistence::telemetry::plugin::{PluginSet, RequestLogWriter, UsageStatsWriter};
use relay_persistence::telemetry::writer::BatchSink;

const PRUNE_PERIOD: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::from_env().context("loading configuration")?;
    tracing::info!(addr = %config.listen_addr, "starting relay-persistence");

    let cluster = Arc::new(
        Cluster::connect(&config.cluster)
            .await
            .context("connecting database cluster")?,
    );
    let repository = Arc::new(Repository::new(Arc::clone(&cluster)));

    if config.auto_migrate {
        repository.migrate().await.context("applying migrations")?;
    }

    // Writers
    let usage_sink: Arc<dyn BatchSink<UsageRecord>> = Arc::clone(&repository) as _;
    let log_sink: Arc<dyn BatchSink<RequestLogEntry>> = Arc::clone(&repository) as _;
    let usage_writer = Arc::new(UsageStatsWriter::start(usage_sink, config.usage_writer));
    let log_writer = Arc::new(RequestLogWriter::start(log_sink, config.request_log_writer));

    let plugins = PluginSet::new();
    usage_writer.register_into(&plugins);
    log_writer.register_into(&plugins);

    let pruner = tokio::spawn(prune_loop(
        Arc::clone(&repository),
        config.request_log_retention_days,
    ));

    let app = Router::new()
        .merge(api::build_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState::new(Arc::clone(&repository)));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;

    // Orderly shutdown: writers first so their final flush still has pools.
    pruner.abort();
    usage_writer.close().await;
    log_writer.close().await;
    cluster.close().await;
    tracing::info!("shutdown complete");

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

async fn prune_loop(repository: Arc<Repository>, retention_days: u64) {
    let mut ticker = tokio::time::interval(PRUNE_PERIOD);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match repository.prune(retention_days).await {
            Ok(report) => tracing::info!(
                request_logs = report.request_logs,
                cache_entries = report.cache_entries,
                "pruned expired rows"
            ),
            Err(err) => tracing::warn!(error = %err, "prune failed"),
        }
    }
}
