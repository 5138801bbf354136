//! CLI for topicbroker
//!
//! Subcommands:
//! - `broker`: run a broker node until ctrl-c
//! - `resolver`: run a resolver service until ctrl-c
//! - `client publish|request`: one-shot messages through the configured resolvers

use clap::{Parser, Subcommand};
use topicbroker::broker::Broker;
use topicbroker::client::{Client, MessageHandler};
use topicbroker::config::{Settings, load_config_from};
use topicbroker::resolver::Resolver;
use topicbroker::transport::MessageLimits;
use topicbroker::utils::logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "topicbroker")]
struct Cli {
    /// Config file; defaults to `config/default.{toml,yaml,json}` when present
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a broker node
    Broker,
    /// Start a resolver service
    Resolver,
    /// Send one message through the broker fabric
    Client {
        #[command(subcommand)]
        action: ClientAction,
    },
}

#[derive(Subcommand)]
enum ClientAction {
    /// Publish an async message
    Publish { topic: String, payload: String },
    /// Send a sync request and print every response
    Request { topic: String, payload: String },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = match load_config_from(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    logging::init(&settings.logging.level);

    let result = match cli.command {
        Command::Broker => run_broker(settings).await,
        Command::Resolver => run_resolver(settings).await,
        Command::Client { action } => run_client(settings, action).await,
    };
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run_broker(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let broker = Broker::new(
        settings.node.name,
        settings.broker,
        settings.transport,
        MessageLimits::from(&settings.limits),
    )?;
    broker.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping broker.");
    broker.stop().await?;
    Ok(())
}

async fn run_resolver(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let resolver = Resolver::new(
        settings.node.name,
        settings.resolver,
        settings.transport,
        MessageLimits::from(&settings.limits),
    )?;
    resolver.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping resolver.");
    resolver.stop().await?;
    Ok(())
}

async fn run_client(
    settings: Settings,
    action: ClientAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new(
        settings.node.name,
        settings.client,
        settings.transport,
        MessageLimits::from(&settings.limits),
        MessageHandler::new(),
    )?;
    client.start().await?;

    let result = match action {
        ClientAction::Publish { topic, payload } => {
            client.async_message(&topic, &payload).await
        }
        ClientAction::Request { topic, payload } => {
            client.sync_request(&topic, &payload).await.map(|responses| {
                for response in responses {
                    println!("{}: {}", response.origin(), response.payload());
                }
            })
        }
    };

    client.stop().await?;
    Ok(result?)
}
