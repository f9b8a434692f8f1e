//! Event relay core
//!
//! This crate provides the parts of the relay between the two external
//! services:
//! - Webhook registration and cleanup on the analytics platform
//! - The inbound listener that accepts event notifications
//! - Enrichment of each event and forwarding to the chat channel
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_webhook::{create_listener_router, DispatchSettings, Dispatcher, ListenerState};
//! use tokio_util::task::TaskTracker;
//!
//! let dispatcher = Arc::new(Dispatcher::new(
//!     sessions,
//!     chat,
//!     DispatchSettings::new("https://tableau.example.com", "temp"),
//! ));
//! let state = ListenerState::new("/tableau-hook", dispatcher, TaskTracker::new());
//! let router = create_listener_router(state);
//! ```

pub mod dispatcher;
pub mod listener;
pub mod message;
pub mod preview;
pub mod registrar;

pub use dispatcher::*;
pub use listener::*;
pub use message::{deletion_message, rewrite_origin, update_message};
pub use preview::PreviewImage;
pub use registrar::*;
