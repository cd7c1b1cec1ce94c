//! Migration Worker Binary
//!
//! Runs the consumer dispatcher on a shared broker connection and the data
//! worker on a dedicated one, until interrupted.

use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

use migrator_core::config::ConfigManager;
use migrator_core::logging;
use migrator_core::messaging::{BrokerClient, MessagingService, RabbitMqMessagingService};
use migrator_core::system::{MigrationContext, MigrationSystem};

async fn connect(
    settings: &migrator_core::config::BrokerConfig,
    name: &str,
) -> anyhow::Result<Arc<BrokerClient>> {
    let broker = BrokerClient::new(settings, name);
    broker
        .connect(settings.connect_max_retries, settings.connect_delay())
        .await
        .with_context(|| format!("connecting {name} to the message broker"))?;
    broker.start_supervisor();
    Ok(broker)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let manager = ConfigManager::load().context("loading migrator configuration")?;
    let settings = manager.config().clone();
    logging::init_with(&settings.logging);

    info!(environment = %manager.environment(), "Starting migration worker");

    let shared = connect(&settings.broker, "migrator-dispatcher").await?;
    let dedicated = connect(&settings.broker, "migrator-data-worker").await?;

    let shared_messaging: Arc<dyn MessagingService> =
        Arc::new(RabbitMqMessagingService::new(Arc::clone(&shared)));
    let data_messaging: Arc<dyn MessagingService> =
        Arc::new(RabbitMqMessagingService::new(Arc::clone(&dedicated)));

    let context = Arc::new(
        MigrationContext::from_settings(settings, shared_messaging)
            .context("building migration context")?,
    );
    let system = MigrationSystem::new(context, data_messaging);

    match system.initialize_all_queues_from_datastore().await {
        Ok(summary) => info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Queue topology initialized"
        ),
        Err(e) => warn!(error = %e, "Could not enumerate configurations; starting with existing queues"),
    }

    system.start().await.context("starting consumers")?;
    info!("✅ Migration worker ready");

    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    system.stop().await;
    shared.close().await;
    dedicated.close().await;
    info!("Migration worker stopped");

    Ok(())
}
