//! Log output for the relay
//!
//! The relay's own crates log at `--log-level`; dependencies only report
//! warnings unless `RUST_LOG` says otherwise. JSON lines carry the fields
//! of the per-event span so every line of one dispatch can be grouped.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::Args;

const RELAY_TARGETS: &[&str] = &[
    "tableau_webhook_relay",
    "relay_core",
    "relay_platform",
    "relay_webhook",
    "tower_http",
];

pub fn init_telemetry(args: &Args) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(&args.log_level))
            .context("Invalid log level")?,
    };
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if args.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };

    installed.context("Failed to install log subscriber")
}

fn default_directives(level: &str) -> String {
    RELAY_TARGETS
        .iter()
        .fold(String::from("warn"), |mut directives, target| {
            directives.push_str(&format!(",{}={}", target, level));
            directives
        })
}
