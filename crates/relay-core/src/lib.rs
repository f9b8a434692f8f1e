//! Core types, errors and configuration for the Tableau webhook relay

pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;
