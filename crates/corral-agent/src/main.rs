use corral_agent::config::AgentConfig;
use corral_agent::features::instance_lifecycle::repo::FileEventStore;
use corral_agent::runtime::SimulatedRuntime;
use corral_agent::NodeAgent;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("corral_agent=info,info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = AgentConfig::from_env();
    info!(
        node_id = %config.node_id,
        data_dir = %config.data_dir.display(),
        max_prepare_retries = config.lifecycle.max_prepare_retries,
        "Starting Corral Node Agent"
    );

    let store = Arc::new(FileEventStore::open(&config.data_dir).await?);
    let agent = NodeAgent::new(
        config.node_id,
        store,
        Arc::new(SimulatedRuntime::new()),
        config.lifecycle,
    );

    let resumed = agent.recover().await?;
    info!(resumed, "Node agent ready");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down node agent");
    Ok(())
}
