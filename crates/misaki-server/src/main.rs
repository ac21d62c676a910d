use clap::Parser;
use misaki_client::BrokerQueue;
use misaki_server::{create_router, AppState, ServerConfig, TriggerProducer};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "misaki-serve")]
#[command(about = "HTTP trigger for misaki commands", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "misaki.yaml")]
    config: String,

    /// Listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Broker address
    #[arg(short, long)]
    broker: Option<String>,

    /// Queue name
    #[arg(short, long)]
    queue: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let mut config = ServerConfig::from_file(&args.config)?;

    // Override with CLI args
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(broker) = args.broker {
        config.queue.broker_address = broker;
    }
    if let Some(queue) = args.queue {
        config.queue.name = queue;
    }
    config.validate()?;

    let registry = config.registry()?;
    for name in registry.duplicates() {
        tracing::warn!("Command {} is defined more than once; the first definition wins", name);
    }

    let queue = Arc::new(BrokerQueue::from_config(&config.queue)?);
    let state = AppState {
        producer: Arc::new(TriggerProducer::new(queue)),
        registry: Arc::new(registry),
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    tracing::info!("Trigger server listening on {}", config.server.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Received shutdown signal");
        })
        .await?;

    Ok(())
}
