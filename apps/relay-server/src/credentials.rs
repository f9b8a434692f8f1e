//! Credential resolution
//!
//! Each secret comes from the configuration file if set there, otherwise
//! from its environment variable, otherwise from an interactive prompt.

use anyhow::{bail, Context, Result};
use relay_core::RelayConfig;
use std::fmt;

pub const PAT_NAME_VAR: &str = "TS_PAT_NAME";
pub const PAT_SECRET_VAR: &str = "TS_PAT_SECRET";
pub const SLACK_TOKEN_VAR: &str = "SLACK_TOKEN";

/// Asks the operator for a value that is not configured anywhere else
pub trait SecretPrompt {
    fn prompt(&self, label: &str, hidden: bool) -> Result<String>;
}

/// Terminal prompt
pub struct InquirePrompt;

impl SecretPrompt for InquirePrompt {
    fn prompt(&self, label: &str, hidden: bool) -> Result<String> {
        let answer = if hidden {
            inquire::Password::new(label)
                .without_confirmation()
                .prompt()
        } else {
            inquire::Text::new(label).prompt()
        };
        answer.with_context(|| format!("Failed to read '{}' from the terminal", label))
    }
}

/// Used with `--no-prompt`; missing credentials become an error
pub struct NoPrompt;

impl SecretPrompt for NoPrompt {
    fn prompt(&self, label: &str, _hidden: bool) -> Result<String> {
        bail!("{} is not configured and prompting is disabled", label)
    }
}

/// Credentials for both external services
pub struct Credentials {
    pub pat_name: String,
    pub pat_secret: String,
    pub slack_token: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("pat_name", &self.pat_name)
            .field("pat_secret", &"[REDACTED]")
            .field("slack_token", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    /// Resolve every credential using the process environment
    pub fn resolve(config: &RelayConfig, prompt: &dyn SecretPrompt) -> Result<Self> {
        Self::resolve_with(config, prompt, |var| std::env::var(var).ok())
    }

    fn resolve_with(
        config: &RelayConfig,
        prompt: &dyn SecretPrompt,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            pat_name: resolve_value(
                config.tableau.pat_name.as_deref(),
                env(PAT_NAME_VAR),
                "Tableau personal access token name:",
                false,
                prompt,
            )?,
            pat_secret: resolve_value(
                config.tableau.pat_secret.as_deref(),
                env(PAT_SECRET_VAR),
                "Tableau personal access token secret:",
                true,
                prompt,
            )?,
            slack_token: resolve_value(
                config.slack.token.as_deref(),
                env(SLACK_TOKEN_VAR),
                "Slack bot token:",
                true,
                prompt,
            )?,
        })
    }
}

fn resolve_value(
    explicit: Option<&str>,
    from_env: Option<String>,
    label: &str,
    hidden: bool,
    prompt: &dyn SecretPrompt,
) -> Result<String> {
    if let Some(value) = explicit.filter(|v| !v.trim().is_empty()) {
        return Ok(value.to_string());
    }
    if let Some(value) = from_env.filter(|v| !v.trim().is_empty()) {
        return Ok(value);
    }

    let value = prompt.prompt(label, hidden)?;
    if value.trim().is_empty() {
        bail!("{} must not be empty", label.trim_end_matches(':'));
    }
    Ok(value)
}
