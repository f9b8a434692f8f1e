//! Error taxonomy shared by every relay component

use thiserror::Error;

/// Relay errors
///
/// Only `Auth`, `Registration` and `Config` raised during startup terminate
/// the process. Every per-event failure is contained to that event.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Subscription registration failed: {0}")]
    Registration(String),

    #[error("Malformed event envelope: {0}")]
    Parse(String),

    #[error("Enrichment failed: {0}")]
    Enrichment(String),

    #[error("Forwarding to chat failed: {0}")]
    Forward(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Whether this error aborts startup when raised before listening
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            RelayError::Auth(_) | RelayError::Registration(_) | RelayError::Config(_)
        )
    }
}

impl From<config::ConfigError> for RelayError {
    fn from(err: config::ConfigError) -> Self {
        RelayError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
