//! Agent router command-line entry point

use agent_router::config::{
    watcher::DEFAULT_DEBOUNCE, ConfigStore, ConfigWatcher, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH,
};
use agent_router::observability::{init_default_logging, init_logging, metrics::metrics, LogFormat};
use agent_router::routing::RoutingPipeline;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn, Level};

/// Route requests to A2A agents
#[derive(Parser)]
#[command(name = "agent-router")]
#[command(about = "Routes requests to remote A2A agents")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = CONFIG_PATH_ENV, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route a single request and print the JSON response
    Route {
        /// Request text
        text: String,
    },
    /// Route one request per stdin line, reloading config on change
    Repl,
    /// Validate configuration
    Config {
        /// Print the parsed configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, LogFormat::Compact, false),
        _ => init_logging(Level::TRACE, LogFormat::Compact, true),
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "Starting agent router"
    );

    let store = match ConfigStore::open(&cli.config) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Route { text } => route_once(store, &text).await,
        Commands::Repl => run_repl(store).await,
        Commands::Config { show } => handle_config_command(&store, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

async fn route_once(store: Arc<ConfigStore>, text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = RoutingPipeline::from_store(store)?;
    let response = pipeline.run_with_timeout(text).await;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn run_repl(store: Arc<ConfigStore>) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = RoutingPipeline::from_store(Arc::clone(&store))?;

    // Keep serving the last good config if the watcher cannot start
    let _watcher = match ConfigWatcher::spawn(store, DEFAULT_DEBOUNCE) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!(error = %e, "Config hot reload disabled");
            None
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("Reading requests from stdin, one per line");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received interrupt, shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                if let Some(agent_key) = text.strip_prefix("/reset ") {
                    pipeline.reset_thread(agent_key.trim());
                    continue;
                }
                let response = pipeline.run_with_timeout(text).await;
                println!("{}", serde_json::to_string(&response)?);
            }
        }
    }

    info!(
        metrics = %serde_json::to_string(&metrics().snapshot())?,
        "Router shutdown complete"
    );
    Ok(())
}

fn handle_config_command(store: &ConfigStore, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = store.current();
    if show {
        println!("{}", serde_yaml::to_string(&snapshot.to_config())?);
    }

    info!(
        agents = snapshot.agents.len(),
        "Configuration validation complete"
    );
    Ok(())
}
