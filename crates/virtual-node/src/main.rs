use anyhow::Result;
use clap::Parser;
use marketplace::Marketplace;
use marketplace::MarketplaceClient;
use utils::logging;
use utils::version;
use virtual_node::app::ApplicationBuilder;
use virtual_node::config::CheckConnectionArgs;
use virtual_node::config::Cli;
use virtual_node::config::Commands;
use virtual_node::config::DaemonArgs;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    let log_dir = std::env::var_os(logging::LOG_PATH_ENV_VAR).map(std::path::PathBuf::from);
    let _guard = logging::init(log_dir.as_deref());

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(*daemon_args).await,
        Commands::CheckConnection(args) => run_check_connection(args).await,
    }
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    tracing::info!(
        node = %daemon_args.node_name,
        "Starting virtual node daemon {}",
        &**version::VERSION
    );

    let app = ApplicationBuilder::new(daemon_args).build().await?;

    app.run().await?;
    app.shutdown().await?;

    Ok(())
}

async fn run_check_connection(args: CheckConnectionArgs) -> Result<()> {
    let client = MarketplaceClient::new(args.marketplace.marketplace_config())
        .map_err(|e| anyhow::anyhow!("Failed to create marketplace client: {e:?}"))?;
    client
        .test_connection()
        .await
        .map_err(|e| anyhow::anyhow!("Marketplace connection test failed: {e:?}"))?;
    tracing::info!(url = %args.marketplace.marketplace_url, "Marketplace credentials are valid");
    Ok(())
}
