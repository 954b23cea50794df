//! CLI entry point for history-refresh.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use history_refresh::config::Config;
use history_refresh::{
    Crawler, Database, Publisher, SqliteHistoryStore, StreamClient, Worker, telemetry,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    args.apply_overrides(&mut config);
    config.validate()?;

    telemetry::init_tracing(&config.log.level, config.log.format)?;
    debug!(?args, "CLI arguments parsed");

    let db = Database::with_options(&config.database.path, config.database_options())
        .await
        .with_context(|| {
            format!(
                "failed to open database {}",
                config.database.path.display()
            )
        })?;
    let stream = StreamClient::new(db.clone()).with_wake_interval(config.wake_interval());
    let store = SqliteHistoryStore::new(db.clone());

    let shutdown = CancellationToken::new();
    spawn_shutdown_listener(shutdown.clone());

    let result = run_command(&args.command, &config, stream, store, shutdown).await;
    db.close().await;
    result
}

async fn run_command(
    command: &Command,
    config: &Config,
    stream: StreamClient,
    store: SqliteHistoryStore,
    shutdown: CancellationToken,
) -> Result<()> {
    match command {
        Command::Work { .. } => {
            let crawler = Crawler::new(&config.crawl_options())?;
            let worker_config = config.worker_config();
            let span = info_span!(
                "worker",
                consumer = %worker_config.consumer,
                group = %worker_config.group,
                pid = std::process::id()
            );
            let worker =
                Worker::new(stream, Arc::new(store), crawler, worker_config).with_span(span);
            info!(consumer = %worker.config().consumer, "new consumer");
            let report = worker.run(shutdown).await;
            info!(
                persisted = report.persisted,
                degraded = report.degraded,
                skipped = report.skipped,
                abandoned = report.abandoned,
                "worker finished"
            );
        }
        Command::Publish { interval } => {
            let publisher =
                Publisher::new(stream, Arc::new(store), &config.stream.name, &config.stream.group)
                    .with_create_stream(config.stream.create_stream)
                    .with_span(info_span!(
                        "publisher",
                        stream = %config.stream.name,
                        pid = std::process::id()
                    ));
            match interval {
                Some(secs) => {
                    let total = publisher.run(Duration::from_secs(*secs), shutdown).await;
                    info!(published = total.published, failed = total.failed, "publisher stopped");
                }
                None => {
                    let report = publisher.publish().await?;
                    println!(
                        "listed {} published {} failed {}",
                        report.listed, report.published, report.failed
                    );
                }
            }
        }
        Command::Pending => {
            let pending = stream
                .pending(&config.stream.name, &config.stream.group)
                .await?;
            if pending.is_empty() {
                println!("no pending entries");
            }
            for entry in pending {
                println!(
                    "{}\t{}\tdeliveries={}\tidle={}ms",
                    entry.entry_id,
                    entry.consumer,
                    entry.delivery_count,
                    entry.idle.as_millis()
                );
            }
        }
        Command::Add { url, source_type } => {
            let id = store.insert(url, source_type).await?;
            println!("{id}");
        }
    }
    Ok(())
}

fn spawn_shutdown_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received, finishing in-flight work");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM, only ctrl-c stops the process");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
