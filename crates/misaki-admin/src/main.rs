use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Table};
use misaki_client::{BrokerQueue, QueueService};
use misaki_core::{Command, Job};

#[derive(Parser, Debug)]
#[command(name = "misaki-admin")]
#[command(about = "misaki admin CLI", long_about = None)]
struct Args {
    /// Trigger server URL
    #[arg(short, long, default_value = "http://127.0.0.1:8080", env = "MISAKI_SERVER")]
    server: String,

    /// Broker address
    #[arg(short, long, default_value = "127.0.0.1:7878", env = "MISAKI_BROKER")]
    broker: String,

    /// Broker monitoring URL
    #[arg(long, default_value = "http://127.0.0.1:9091")]
    monitor: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    format: Format,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Table,
    Json,
    Yaml,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the commands the server knows
    Commands,

    /// Ask the server to queue a command
    Trigger {
        /// Command name
        name: String,
    },

    /// Put a job on the queue directly, bypassing the server
    Enqueue {
        /// Command name
        name: String,

        /// Queue name
        #[arg(short, long, default_value = "misaki")]
        queue: String,
    },

    /// Show visible and in-flight messages per queue
    Queues,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let client = reqwest::Client::new();

    match args.command {
        Commands::Commands => {
            let url = format!("{}/commands", args.server.trim_end_matches('/'));
            let commands: Vec<Command> = client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            match args.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&commands)?),
                Format::Yaml => println!("{}", serde_yaml::to_string(&commands)?),
                Format::Table => println!("{}", commands_table(&commands)),
            }
        }

        Commands::Trigger { name } => {
            let url = trigger_url(&args.server, &name)?;
            let response = client.post(url).send().await?;

            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                anyhow::bail!("Server answered {}: {}", status, body);
            }
            println!("Queued {}", name);
        }

        Commands::Enqueue { name, queue } => {
            let queue = BrokerQueue::new(&args.broker, queue);
            queue.enqueue(&Job::new(name.as_str()).to_json()?).await?;
            println!("Enqueued {} on {}", name, queue.queue_name());
        }

        Commands::Queues => {
            let url = format!("{}/health", args.monitor.trim_end_matches('/'));
            let response: serde_json::Value = client
                .get(&url)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            match args.format {
                Format::Json => println!("{}", serde_json::to_string_pretty(&response)?),
                Format::Yaml => println!("{}", serde_yaml::to_string(&response)?),
                Format::Table => println!("{}", queues_table(&response)),
            }
        }
    }

    Ok(())
}

/// `{server}/request/{name}` with the name percent-encoded as one segment
fn trigger_url(server: &str, name: &str) -> anyhow::Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(server)?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("{} cannot carry a path", server))?
        .pop_if_empty()
        .push("request")
        .push(name);
    Ok(url)
}

fn commands_table(commands: &[Command]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Name", "Memo", "Programs", "Output"]);
    for command in commands {
        let programs = command
            .steps
            .iter()
            .map(|step| step.join(" "))
            .collect::<Vec<_>>()
            .join("\n");
        table.add_row(vec![
            command.name.as_str(),
            command.memo.as_str(),
            programs.as_str(),
            if command.capture_output { "yes" } else { "no" },
        ]);
    }
    table
}

fn queues_table(health: &serde_json::Value) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Queue", "Visible", "In Flight"]);
    if let Some(queues) = health["queues"].as_object() {
        for (name, depth) in queues {
            table.add_row(vec![
                name.clone(),
                depth["visible"].as_u64().unwrap_or(0).to_string(),
                depth["in_flight"].as_u64().unwrap_or(0).to_string(),
            ]);
        }
    }
    table
}
