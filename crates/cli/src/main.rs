mod chat_commands;
mod config_commands;
mod server_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    mcpbox_agents::catalog::{self, ModelCategory},
    mcpbox_config::McpboxConfig,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use server_commands::LaunchArgs;

#[derive(Parser)]
#[command(name = "mcpbox", about = "mcpbox: run MCP tool servers in a sandbox and chat with them")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Read this config file instead of discovering one.
    #[arg(long, global = true, env = "MCPBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Sandbox backend override (host, memory).
    #[arg(long, global = true)]
    sandbox: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server and stream its output until Ctrl-C.
    Run {
        #[command(flatten)]
        launch: LaunchArgs,
    },
    /// List the tools the server exposes.
    Tools {
        #[command(flatten)]
        launch: LaunchArgs,
        /// Print the raw tool list as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Call one tool and print its result.
    Call {
        /// Tool name.
        name: String,
        /// Arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
        #[command(flatten)]
        launch: LaunchArgs,
    },
    /// Chat with the configured model, letting it call the server's tools.
    Chat {
        #[command(flatten)]
        launch: LaunchArgs,
        /// Chat without starting a server.
        #[arg(long)]
        no_tools: bool,
    },
    /// List known models.
    Models {
        #[arg(long)]
        category: Option<ModelCategory>,
        /// Only models that fit on modest hardware.
        #[arg(long)]
        low_resource: bool,
        #[arg(long)]
        json: bool,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<McpboxConfig> {
    let mut config = match cli.config {
        Some(ref path) => mcpbox_config::load_config(path)?,
        None => mcpbox_config::discover_and_load(),
    };
    if let Some(ref backend) = cli.sandbox {
        config.sandbox.backend = backend.clone();
    }
    Ok(config)
}

fn list_models(
    category: Option<ModelCategory>,
    low_resource: bool,
    json: bool,
) -> anyhow::Result<()> {
    let models: Vec<_> = catalog::AVAILABLE_MODELS
        .iter()
        .filter(|m| category.is_none_or(|c| m.category == c))
        .filter(|m| !low_resource || m.low_resource)
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }
    println!("{:<42} {:>8}  {:<7} DESCRIPTION", "ID", "SIZE", "CLASS");
    for m in models {
        println!("{:<42} {:>8}  {:<7} {}", m.id, m.size, m.category, m.description);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "mcpbox starting");

    match cli.command {
        Commands::Run { ref launch } => server_commands::run(&load_config(&cli)?, launch).await,
        Commands::Tools { ref launch, json } => {
            server_commands::list_tools(&load_config(&cli)?, launch, json).await
        },
        Commands::Call {
            ref name,
            ref args,
            ref launch,
        } => server_commands::call_tool(&load_config(&cli)?, launch, name, args).await,
        Commands::Chat {
            ref launch,
            no_tools,
        } => chat_commands::chat(&load_config(&cli)?, launch, no_tools).await,
        Commands::Models {
            category,
            low_resource,
            json,
        } => list_models(category, low_resource, json),
        Commands::Config { ref action } => {
            config_commands::handle_config(action, &load_config(&cli)?, cli.config.as_deref())
        },
    }
}
