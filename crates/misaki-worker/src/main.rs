use clap::Parser;
use misaki_client::BrokerQueue;
use misaki_worker::{
    CommandExecutor, DispatchLoop, ExecutorConfig, OsProcessRunner, SlackNotifier,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "misaki-exec")]
#[command(about = "Runs commands received from the misaki queue", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "misaki.yaml")]
    config: String,

    /// Broker address
    #[arg(short, long)]
    broker: Option<String>,

    /// Queue name
    #[arg(short, long)]
    queue: Option<String>,

    /// Incoming webhook for results
    #[arg(long)]
    webhook_url: Option<String>,
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
    let mut config = ExecutorConfig::from_file(&args.config)?;

    // Override with CLI args
    if let Some(broker) = args.broker {
        config.queue.broker_address = broker;
    }
    if let Some(queue) = args.queue {
        config.queue.name = queue;
    }
    if let Some(webhook_url) = args.webhook_url {
        config.notifier.webhook_url = webhook_url;
    }
    config.validate()?;

    let registry = config.registry()?;
    for name in registry.duplicates() {
        tracing::warn!("Command {} is defined more than once; the first definition wins", name);
    }
    tracing::info!("Loaded {} commands", registry.len());

    let queue = Arc::new(BrokerQueue::from_config(&config.queue)?);
    let notifier = Arc::new(SlackNotifier::new(config.notifier.webhook_url.clone())?);
    let executor = CommandExecutor::new(Arc::new(registry), Arc::new(OsProcessRunner));

    let shutdown = CancellationToken::new();
    let dispatch = DispatchLoop::new(queue, executor, notifier, config.backoff()?)
        .with_wait_time(config.queue.wait_time())
        .with_chat_filter(config.chat_filter())
        .with_shutdown(shutdown.clone());

    // Handle shutdown signals
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal");
        shutdown.cancel();
    });

    dispatch.run().await;

    Ok(())
}
