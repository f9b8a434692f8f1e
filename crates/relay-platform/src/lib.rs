//! # Relay platform clients
//!
//! Clients for the two services the relay talks to: the Tableau Server REST
//! API and the Slack Web API. Both sit behind traits so the relay core can
//! be driven by fakes in tests.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relay_platform::{PlatformClient, TableauClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = TableauClient::builder()
//!         .server("https://tableau.example.com")
//!         .personal_access_token("relay", "secret")
//!         .build()?;
//!
//!     let session = client.sign_in().await?;
//!     let webhooks = client.list_webhooks(&session).await?;
//!     println!("{} webhooks registered", webhooks.len());
//!     client.sign_out(&session).await?;
//!
//!     Ok(())
//! }
//! ```

mod error;
mod session;
mod slack;
mod tableau;

pub use error::{ChatError, PlatformError, Result};
pub use session::{SessionLease, SessionManager};
pub use slack::{ChatClient, SlackClient};
pub use tableau::{
    OwnerRef, PlatformClient, RemoteWebhook, ResourceItem, Session, TableauClient,
    TableauClientBuilder, UserItem,
};
