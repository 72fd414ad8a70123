use clap::Parser;
use clap::Subcommand;
use utils::version;

use crate::config::daemon::CheckConnectionArgs;
use crate::config::daemon::DaemonArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the virtual node daemon
    Daemon(Box<DaemonArgs>),
    /// Verify the marketplace API key and exit
    #[command(name = "check-connection")]
    CheckConnection(CheckConnectionArgs),
}
