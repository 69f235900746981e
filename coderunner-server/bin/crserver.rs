use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use coderunner_core::config::OrchestratorConfig;
use coderunner_core::orchestrator::Orchestrator;
use coderunner_core::registry::LanguageRegistry;
use coderunner_server::{config, route, state::AppState, Config, ServerResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Arguments for the crserver command
#[derive(Debug, Parser)]
#[command(name = "crserver", author)]
struct CrserverArgs {
    /// Port number to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Maximum number of concurrent executions
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Allowed CORS origin, `*` for any
    #[arg(long)]
    cors_origin: Option<String>,

    /// Host directory backing per-execution work directories
    #[arg(short = 'w', long = "workspace")]
    workspace_dir: Option<PathBuf>,
}

//--------------------------------------------------------------------------------------------------
// Functions: Main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
pub async fn main() -> ServerResult<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Parse command line arguments
    let args = CrserverArgs::parse();

    // Load orchestrator settings, flags overriding the environment
    let mut core_config = OrchestratorConfig::from_env()?;
    if let Some(max_concurrent) = args.max_concurrent {
        core_config = core_config.with_max_concurrent(max_concurrent)?;
    }
    if let Some(workspace_dir) = args.workspace_dir {
        core_config = core_config.with_workspace_dir(workspace_dir);
    }

    // Load server settings the same way
    let mut server_config = Config::from_env()?;
    if let Some(port) = args.port {
        server_config = server_config.with_port(port);
    }
    if let Some(cors_origin) = args.cors_origin {
        server_config = server_config.with_cors_origin(cors_origin);
    }

    // Connect the orchestrator to the container engine
    let registry = LanguageRegistry::with_defaults()?;
    let orchestrator = Arc::new(Orchestrator::new(core_config, registry)?);
    tracing::info!(
        "registry initialized with languages: {}",
        orchestrator.registry().list().join(", ")
    );

    // Build application
    let cors = config::cors_layer(server_config.get_cors_origin())?;
    let server_config = Arc::new(server_config);
    let state = AppState::new(orchestrator, server_config.clone());
    let app = route::create_router(state).layer(cors);

    // Start server
    tracing::info!("Starting server on {}", server_config.get_addr());
    println!(
        "{} Server listening on {}",
        console::style("✓").green(),
        console::style(server_config.get_addr()).yellow()
    );

    let listener = tokio::net::TcpListener::bind(server_config.get_addr()).await?;

    axum::serve(listener, app).await?;

    Ok(())
}
