//! Toolmesh - multi-transport MCP tool runtime
//!
#![doc = "Main entry point for the toolmesh binary."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use toolmesh::cli::{Cli, Commands};
use toolmesh::commands;
use toolmesh::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose, cli.json_logs);

    let config = Config::load(&cli.config)?;
    let manager = commands::build_manager(config)?;

    // Cache maintenance needs no server connections.
    if let Commands::Cache { command } = &cli.command {
        return commands::maintain_cache(manager.cache(), *command).await;
    }

    manager.initialize().await;
    manager.spawn_cache_maintenance().await;

    let result = match cli.command {
        Commands::Servers => commands::list_servers(&manager).await,
        Commands::Tools { json } => commands::list_tools(&manager, json).await,
        Commands::Call { name, args } => {
            commands::call_tool(manager.clone(), &name, args.as_deref()).await
        }
        Commands::Batch { file } => commands::run_batch(manager.clone(), &file).await,
        Commands::Resources => commands::list_resources(&manager).await,
        Commands::Read { uri } => commands::read_resource(&manager, &uri).await,
        Commands::Prompts => commands::list_prompts(&manager).await,
        Commands::Prompt { name, args } => commands::get_prompt(&manager, &name, &args).await,
        Commands::Cache { .. } => Ok(()),
    };

    manager.shutdown().await;
    result
}

fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "toolmesh=debug" } else { "toolmesh=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
