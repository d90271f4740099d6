use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use formrelay::audit::AuditLog;
use formrelay::config::Config;
use formrelay::intake::Intake;
use formrelay::queue::{PgQueue, Queue};
use formrelay::shutdown;
use formrelay::status::{self, PgStatusStore, StatusStore};
use formrelay::worker::{self, Worker};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!("Starting formrelay");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Migrations applied");

    let queue: Arc<dyn Queue> =
        Arc::new(PgQueue::connect(pool.clone(), config.queue.topic.clone(), config.queue.lease).await?);
    let statuses: Arc<dyn StatusStore> = Arc::new(PgStatusStore::new(pool.clone()));

    // A sink that cannot be built is fatal: no partial service.
    let sink = formrelay::sink::build(&config.sink).await?;

    let worker = Arc::new(
        Worker::new(queue.clone(), sink, statuses.clone())
            .with_policy(config.worker.retry)
            .with_attempt_timeout(config.worker.attempt_timeout)
            .with_status_ttl(config.status_ttl),
    );

    let mut intake = Intake::new(queue);
    if let Some(path) = &config.audit_log {
        let log = AuditLog::open(path).await?;
        tracing::info!("Audit log at {}", path.display());
        intake = intake.with_audit_log(Arc::new(log));
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let pool_handle = worker::run_pool(worker, stop_rx.clone(), config.worker.count)?;
    let purge = status::spawn_purge(statuses.clone(), config.status_purge_interval, stop_rx);

    let addr = SocketAddr::new(config.host, config.port);
    let app = formrelay::build_app(config, intake, statuses);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown::signal())
    .await?;

    let _ = stop_tx.send(true);
    let _ = purge.await;
    tokio::task::spawn_blocking(move || {
        if pool_handle.join().is_err() {
            tracing::error!("Worker pool thread panicked");
        }
    })
    .await?;

    pool.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}
