use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing::{info, warn};

use wallet_orchestrator::api::create_router;
use wallet_orchestrator::app::{
    AppState, ProvisioningSettings, SchedulerConfig, ServiceDependencies, WalletService,
    WorkerConfig, spawn_worker_pool,
};
use wallet_orchestrator::config::AppConfig;
use wallet_orchestrator::domain::Notifier;
use wallet_orchestrator::infra::observability::{init_metrics, init_tracing};
use wallet_orchestrator::infra::{
    HttpWalletConfig, HttpWalletService, LogNotifier, PostgresClient, WebhookNotifier,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;
    init_tracing(config.log_format);

    let metrics = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Metrics recorder not installed");
            None
        }
    };

    let db = Arc::new(PostgresClient::with_defaults(&config.database_url).await?);
    db.run_migrations().await?;

    let wallet_service = Arc::new(HttpWalletService::new(HttpWalletConfig {
        base_url: config.wallet.service_url.clone(),
        ..Default::default()
    })?);

    let notifier: Arc<dyn Notifier> = match &config.notification_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.as_str(), Duration::from_secs(10))?),
        None => Arc::new(LogNotifier),
    };

    let service = Arc::new(WalletService::new(ServiceDependencies {
        wallets: db.clone(),
        jobs: db,
        wallet_service,
        notifier,
        provisioning: ProvisioningSettings {
            network: config.wallet.network,
            required_signers: config.wallet.required_signers,
            total_signers: config.wallet.total_signers,
            currency: Some(config.wallet.default_currency.clone()),
            ..Default::default()
        },
        scheduler: SchedulerConfig {
            stale_after: config.workers.stale_after,
            max_reclaims: config.workers.max_reclaims,
        },
    }));

    let (workers, shutdown_tx) = spawn_worker_pool(
        service.scheduler(),
        WorkerConfig {
            poll_interval: config.workers.poll_interval,
            batch_size: config.workers.batch_size,
            worker_count: config.workers.count,
            enabled: config.workers.count > 0,
        },
    );

    let mut state = AppState::new(service);
    if let Some(handle) = metrics {
        state = state.with_metrics(handle);
    }
    let router = create_router(Arc::new(state));

    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, network = %config.wallet.network, "Server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Stopping workers");
    shutdown_tx.send(true).ok();
    for worker in workers {
        if let Err(e) = worker.await {
            warn!(error = %e, "Worker task ended abnormally");
        }
    }
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
}
