use std::sync::Arc;

use secrecy::ExposeSecret;
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use ticket_intake::api::{AdminState, admin_routes};
use ticket_intake::config::{IntakeConfig, SourceConfig};
use ticket_intake::pipeline::drainer::{Drainer, DrainerConfig};
use ticket_intake::pipeline::puller::Puller;
use ticket_intake::pipeline::rules::RelevanceFilter;
use ticket_intake::pipeline::worker::Worker;
use ticket_intake::services::{
    HttpClassifier, HttpDelivery, HttpResponseGenerator, HttpUserDirectory,
};
use ticket_intake::source::{LibSqlTicketSource, TicketSource};
use ticket_intake::store::{CursorStore, DurableQueue, FileArtifactStore, Ledger};

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = IntakeConfig::from_env()?;

    // Console plus a daily rolling file. The guard flushes the file writer on exit.
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "ticket_intake.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(config.blocking_threads.max(1))
        .build()?;
    runtime.block_on(run(config))
}

async fn run(config: IntakeConfig) -> anyhow::Result<()> {
    eprintln!("📬 Ticket Intake v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Environment: {}", config.environment);
    eprintln!("   Source timezone: {}", config.source_timezone);
    eprintln!("   Queue: {}", config.queue_file.display());
    eprintln!("   Output: {}", config.output_dir.display());
    eprintln!("   Admin API: http://0.0.0.0:{}/health\n", config.api_port);

    // ── Stores ──────────────────────────────────────────────────────────
    let queue = Arc::new(DurableQueue::open(&config.queue_file).await?);
    let dead_letters = Arc::new(DurableQueue::open(&config.dead_letter_file).await?);
    let ledger = Arc::new(Ledger::open(&config.ledger_file).await?);
    let artifacts = Arc::new(FileArtifactStore::new(&config.output_dir));

    // ── Collaborators ───────────────────────────────────────────────────
    let services = &config.services;
    let mut worker = Worker::new(
        Arc::new(HttpUserDirectory::new(services)?),
        Arc::new(HttpClassifier::new(services)?),
        Arc::new(HttpResponseGenerator::new(services)?),
        artifacts,
        RelevanceFilter::new(&config.relevance_keywords)?,
    );
    if services.delivery_enabled {
        worker = worker.with_delivery(Arc::new(HttpDelivery::new(services)?));
        eprintln!("   Delivery: enabled");
    } else {
        eprintln!("   Delivery: disabled");
    }
    let worker = Arc::new(worker);

    // ── Source ──────────────────────────────────────────────────────────
    let source: Arc<dyn TicketSource> = match &config.source {
        SourceConfig::Local { path } => {
            eprintln!("   Source: {}", path.display());
            Arc::new(
                LibSqlTicketSource::new_local(path, config.source_query.clone())
                    .await?
                    .with_timezone(config.source_timezone),
            )
        }
        SourceConfig::Remote { url, auth_token } => {
            eprintln!("   Source: {}", url);
            Arc::new(
                LibSqlTicketSource::new_remote(
                    url,
                    auth_token.expose_secret(),
                    config.source_query.clone(),
                )
                .await?
                .with_timezone(config.source_timezone),
            )
        }
    };

    // ── Loops ───────────────────────────────────────────────────────────
    let puller = Arc::new(
        Puller::new(
            source,
            Arc::clone(&queue),
            CursorStore::new(&config.cursor_file),
            config.poll_interval,
            config.pull_lookback,
        )
        .await
        .with_timezone(config.source_timezone),
    );
    let drainer = Arc::new(Drainer::new(
        Arc::clone(&queue),
        Arc::clone(&ledger),
        Arc::clone(&dead_letters),
        Arc::clone(&worker),
        DrainerConfig {
            max_concurrent: config.max_concurrent_emails,
            idle_interval: config.queue_check_interval,
            max_attempts: config.max_attempts,
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let puller_handle = puller.spawn(shutdown_rx.clone());
    let drainer_handle = drainer.spawn(shutdown_rx.clone());

    // ── Admin API ───────────────────────────────────────────────────────
    let app = admin_routes(AdminState {
        worker,
        queue,
        dead_letters,
        ledger,
        environment: config.environment,
        poll_interval: config.poll_interval,
        max_concurrent: config.max_concurrent_emails,
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.api_port)).await?;
    tracing::info!(port = config.api_port, "Admin API started");
    let mut api_shutdown = shutdown_rx;
    let server = tokio::spawn(async move {
        let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = api_shutdown.wait_for(|stop| *stop).await;
        });
        if let Err(e) = serve.await {
            tracing::error!(error = %e, "Admin API stopped with error");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    for (name, handle) in [("puller", puller_handle), ("drainer", drainer_handle), ("api", server)] {
        if let Err(e) = handle.await {
            tracing::error!(task = name, error = %e, "Task ended abnormally");
        }
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
