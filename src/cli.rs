use clap::{Parser, Subcommand};

use crate::commands;
use crate::constants::DEFAULT_PORT;

#[derive(Parser)]
#[command(name = "finchart")]
#[command(about = "Local stock charting backend", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the chart server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Show cache database status
    Status,
}

pub async fn run() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port } => {
            commands::serve::run(port).await;
        }
        Commands::Status => {
            commands::status::run().await;
        }
    }
}
