mod app;
mod cli;
mod credentials;
mod server;
mod telemetry;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use crate::app::App;
use crate::cli::Args;
use crate::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let args = Args::parse();
    init_telemetry(&args)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Tableau webhook relay");

    let result = run_application(args).await;

    // An error here exits with status 1
    if let Err(ref e) = result {
        error!("Relay stopped: {:#}", e);
    } else {
        info!("Shutdown complete");
    }

    result
}

async fn run_application(args: Args) -> Result<()> {
    let app = App::build(&args)?;
    app.run().await
}
