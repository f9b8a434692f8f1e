//! Command-line argument parsing

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tableau-webhook-relay",
    about = "Tableau Server webhook relay",
    version,
    long_about = "Registers webhooks on Tableau Server, listens for their events over HTTPS \
                  and posts a message about each one to a Slack channel. The webhooks are \
                  deleted again on shutdown."
)]
pub struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "RELAY_CONFIG",
        default_value = "config/relay.toml"
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        env = "LOG_LEVEL",
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Enable JSON log format
    #[arg(long, env = "JSON_LOGS")]
    pub json_logs: bool,

    /// Fail instead of prompting for missing credentials
    #[arg(long, env = "RELAY_NO_PROMPT")]
    pub no_prompt: bool,
}
