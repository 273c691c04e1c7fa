use clap::Parser;
use tracing::{error, info};

mod config;
mod db;
mod document;
mod error;
mod pipeline;
mod project;
mod reflect;
mod schema;
mod util;

use crate::config::{AppConfig, CliArgs};
use crate::util::logging::init_tracing;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_tracing(args.log_json);

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let generated_at = chrono::Local::now().naive_local();

    match pipeline::run(&config, generated_at).await {
        Ok(path) => {
            info!("Table specification written to {}", path.display());
            Ok(())
        }
        Err(e) => {
            error!("{}", e);
            Err(e.into())
        }
    }
}
