use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use omnipet_chains::{ChainRegistry, MessagingAdapter, NoopConnector};
use omnipet_coordinator::{
    CoordinatorConfig, CoordinatorService, InProcessClient, MirrorStore,
};
use omnipet_travel::{TravelController, TravelPolicy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "omnipet_coordinator=info".into()),
        )
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = CoordinatorConfig::load()?;
    let identity = config.identity()?;

    info!("Starting omnipet-coordinator");
    info!("Coordinator identity: {}", identity);
    info!("Mirror db: {}", config.mirror_db_path);
    info!("Poll interval: {}s", config.poll_interval_secs);

    // Local runner: an in-process controller with the built-in chain set.
    // Production deployments swap the client for an RPC-backed one.
    let adapter = Arc::new(MessagingAdapter::new(
        ChainRegistry::with_builtin_chains(),
        Arc::new(NoopConnector),
    ));
    let controller = Arc::new(Mutex::new(TravelController::new(
        TravelPolicy::default(),
        identity,
        identity,
        adapter,
    )));
    let client = Arc::new(InProcessClient::new(controller, identity));
    let mirror = MirrorStore::open(&config.mirror_db_path)?;

    let service = CoordinatorService::new(client, mirror, config);

    tokio::select! {
        result = service.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down coordinator...");
        }
    }

    Ok(())
}
