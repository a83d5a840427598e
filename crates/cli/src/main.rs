//! Adaptive coordinator CLI
//!
//! A command-line tool for inspecting the committed topology, switch
//! history, agent health and circuit breakers, and for submitting
//! workloads and operations to the coordinator daemon.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use commands::{inspect, workloads};

/// Adaptive coordinator CLI
#[derive(Parser, Debug)]
#[command(name = "topoctl")]
#[command(author, version, about = "CLI for the adaptive coordination controller", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via TOPOCTL_API_URL env var)
    #[arg(long, env = "TOPOCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format (defaults to the config file setting, then table)
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the committed topology and component summary
    Status,

    /// Show topology switch history
    Switches {
        /// Show only the most recent switches
        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },

    /// Show performance summary and recent snapshots
    Performance {
        /// Snapshots to list
        #[arg(long, short, default_value_t = 20)]
        limit: usize,

        /// Snapshots averaged into the summary (defaults to --limit)
        #[arg(long, short)]
        window: Option<usize>,
    },

    /// Show agent health
    Agents,

    /// Show circuit breaker state per dependency
    Breakers,

    /// Recommend a topology for a workload without switching
    Recommend(WorkloadArgs),

    /// Submit a workload; the coordinator may switch topology
    Submit(WorkloadArgs),

    /// Dispatch one operation through its domain pipeline
    Dispatch {
        /// Operation ID
        id: String,

        /// Operation category (search, crud, inquiry_processing, analytics,
        /// media_processing, generic)
        category: String,

        /// JSON payload passed to the pipeline
        #[arg(long, short)]
        payload: Option<String>,
    },

    /// Manage the CLI configuration file
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Workload description flags
#[derive(Args, Debug, Clone, PartialEq)]
pub struct WorkloadArgs {
    /// Operation category (search, crud, inquiry_processing, analytics,
    /// media_processing, generic)
    pub category: String,

    /// Expected number of results
    #[arg(long)]
    pub expected_results: Option<u64>,

    /// Urgency (low, normal, high, critical)
    #[arg(long)]
    pub urgency: Option<String>,

    /// Geographic or tenant partition
    #[arg(long)]
    pub partition_key: Option<String>,

    /// Require strong consistency
    #[arg(long)]
    pub strong_consistency: bool,

    /// Work must be processed in order
    #[arg(long)]
    pub sequential: bool,
}

impl WorkloadArgs {
    fn descriptor(&self) -> client::WorkloadDescriptor {
        client::WorkloadDescriptor {
            category: self.category.clone(),
            expected_results: self.expected_results,
            urgency: self.urgency.clone(),
            partition_key: self.partition_key.clone(),
            strong_consistency: self.strong_consistency.then_some(true),
            sequential: self.sequential.then_some(true),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Store defaults in the configuration file
    Set {
        /// API endpoint URL
        #[arg(long)]
        api_url: Option<String>,

        /// Default output format
        #[arg(long)]
        format: Option<output::OutputFormat>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run(Cli::parse()).await {
        output::print_error(&format!("{:#}", e));
        if let Some(api) = e.downcast_ref::<client::ApiError>() {
            if api.kind.as_deref() == Some("dependency_unavailable") {
                output::print_info("A dependency breaker is open; see `topoctl breakers`");
            } else if api.status == 504 {
                output::print_info("The operation exceeded the daemon's dispatch timeout");
            }
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut file_config = config::Config::load()?;
    let format = cli.format.unwrap_or_else(|| {
        file_config
            .default_format
            .as_deref()
            .and_then(|f| f.parse().ok())
            .unwrap_or_default()
    });
    let api_url = file_config.resolve_api_url(cli.api_url.as_deref());

    if let Commands::Config(config_cmd) = &cli.command {
        match config_cmd {
            ConfigCommands::Show => {
                output::print_info(&format!(
                    "Config file: {}",
                    config::Config::config_path()?.display()
                ));
                println!("API URL:                {}", api_url);
                println!("Format:                 {:?}", format);
            }
            ConfigCommands::Set { api_url, format } => {
                if let Some(url) = api_url {
                    url::Url::parse(url).map_err(|e| anyhow::anyhow!("Invalid API URL: {}", e))?;
                    file_config.api_url = Some(url.clone());
                }
                if let Some(format) = format {
                    file_config.default_format = Some(format!("{:?}", format).to_lowercase());
                }
                let path = file_config.save()?;
                output::print_success(&format!("Configuration saved to {}", path.display()));
            }
        }
        return Ok(());
    }

    // Initialize client
    let client = client::ApiClient::new(&api_url)?;

    // Execute command
    match cli.command {
        Commands::Status => inspect::show_status(&client, format).await?,
        Commands::Switches { limit } => inspect::show_switches(&client, limit, format).await?,
        Commands::Performance { limit, window } => {
            inspect::show_performance(&client, limit, window, format).await?
        }
        Commands::Agents => inspect::show_agents(&client, format).await?,
        Commands::Breakers => inspect::show_breakers(&client, format).await?,
        Commands::Recommend(args) => {
            workloads::recommend(&client, &args.descriptor(), format).await?
        }
        Commands::Submit(args) => workloads::submit(&client, &args.descriptor(), format).await?,
        Commands::Dispatch {
            id,
            category,
            payload,
        } => {
            let request = client::OperationRequest {
                id,
                category,
                payload: workloads::parse_payload(payload.as_deref())?,
            };
            workloads::dispatch(&client, &request, format).await?
        }
        Commands::Config(_) => {}
    }

    Ok(())
}
