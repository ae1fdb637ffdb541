//! Delivery worker entry-point: drains the job queue into the SMTP relay.
//!
//! Runs until SIGINT or SIGTERM, then finishes in-flight jobs before exiting.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use backend::domain::delivery::{DeliveryWorker, WorkerConfig};
use backend::outbound::mailer::{RelayConfig, SmtpRelayMailer};
use backend::outbound::persistence::{
    DbPool, DieselBillingRepository, DieselEventRepository, PoolConfig,
};
use backend::outbound::queue::RedisJobQueue;
use backend::server::config::AppConfig;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let config = AppConfig::from_env().map_err(std::io::Error::other)?;

    let pool = DbPool::new(PoolConfig::new(&config.database_url))
        .await
        .map_err(std::io::Error::other)?;
    let queue = RedisJobQueue::connect(&config.redis_url, "mail:jobs")
        .await
        .map_err(std::io::Error::other)?;
    let mailer = SmtpRelayMailer::new(&RelayConfig {
        host: config.relay_host.clone(),
        port: config.relay_port,
    })
    .map_err(std::io::Error::other)?;

    let worker = DeliveryWorker::new(
        Arc::new(queue),
        Arc::new(mailer),
        Arc::new(DieselEventRepository::new(pool.clone())),
        Arc::new(DieselBillingRepository::new(pool)),
        WorkerConfig::default(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received; draining");
        let _ = shutdown_tx.send(true);
    });

    worker.run(shutdown_rx).await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
