//! Event enrichment and forwarding
//!
//! For each event the dispatcher looks the resource up on the platform
//! (skipped for deletions, which can no longer be looked up), formats a
//! message and forwards it to the chat channel. Failures end the dispatch of
//! that event only; nothing is retried.

use async_trait::async_trait;
use relay_core::{InboundEvent, RelayError, Result};
use relay_platform::{ChatClient, PlatformError, Session, SessionManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

use crate::message::{deletion_message, rewrite_origin, update_message};
use crate::preview::PreviewImage;

/// Receives parsed events from the listener
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: InboundEvent) -> DispatchOutcome;
}

/// How the dispatch of one event ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Message posted, with the preview image attached or not
    Forwarded { with_image: bool },
    /// Resource lookup failed; nothing was posted
    EnrichmentFailed,
    /// Chat service rejected the message
    ForwardFailed,
}

/// Metadata fetched for a resource that still exists
#[derive(Debug)]
pub struct EnrichedResource {
    pub owner_name: String,
    pub web_page_url: String,
    pub preview_image: Option<PreviewImage>,
}

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Externally reachable server base URL used in links
    pub server_url: String,
    /// Directory preview images are written to
    pub temp_dir: PathBuf,
}

impl DispatchSettings {
    pub fn new(server_url: &str, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            server_url: server_url.to_string(),
            temp_dir: temp_dir.into(),
        }
    }
}

pub struct Dispatcher {
    sessions: Arc<SessionManager>,
    chat: Arc<dyn ChatClient>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        sessions: Arc<SessionManager>,
        chat: Arc<dyn ChatClient>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            sessions,
            chat,
            settings,
        }
    }

    /// Look up owner, link and preview image for the event's resource
    ///
    /// The session is released before returning, whatever the outcome.
    pub async fn enrich(&self, event: &InboundEvent) -> Result<EnrichedResource> {
        let lease = self
            .sessions
            .acquire()
            .await
            .map_err(|e| RelayError::Enrichment(format!("signing in: {}", e)))?;

        let result = self.fetch(lease.session(), event).await;
        self.sessions.release(lease).await;

        result
    }

    async fn fetch(&self, session: &Session, event: &InboundEvent) -> Result<EnrichedResource> {
        let client = self.sessions.client();

        let resource = client
            .get_resource(session, event.resource_type, &event.resource_id)
            .await
            .map_err(|e| lookup_failed("resource", e))?;
        let owner = client
            .get_user(session, &resource.owner.id)
            .await
            .map_err(|e| lookup_failed("owner", e))?;
        let web_page_url = rewrite_origin(&resource.webpage_url, &self.settings.server_url);

        let preview_image = if event.resource_type.has_preview() {
            let bytes = client
                .preview_image(session, &event.resource_id)
                .await
                .map_err(|e| lookup_failed("preview image", e))?;
            let image = PreviewImage::write(&self.settings.temp_dir, &event.resource_id, &bytes)
                .await
                .map_err(|e| RelayError::Enrichment(format!("writing preview image: {}", e)))?;
            Some(image)
        } else {
            None
        };

        Ok(EnrichedResource {
            owner_name: owner.display_name().to_string(),
            web_page_url,
            preview_image,
        })
    }

    async fn forward(&self, text: &str, resource: Option<&EnrichedResource>) -> Result<bool> {
        let image = resource.and_then(|r| r.preview_image.as_ref());

        let sent = match image {
            Some(image) => self.chat.upload_file(image.path(), text).await,
            None => self.chat.post_message(text).await,
        };

        sent.map(|()| image.is_some())
            .map_err(|e| RelayError::Forward(e.to_string()))
    }
}

fn lookup_failed(what: &str, err: PlatformError) -> RelayError {
    RelayError::Enrichment(format!("fetching {}: {}", what, err))
}

#[async_trait]
impl EventHandler for Dispatcher {
    #[instrument(
        skip(self, event),
        fields(
            event_type = %event.event_type,
            resource_id = %event.resource_id,
            site_id = %event.site_id,
        )
    )]
    async fn handle(&self, event: InboundEvent) -> DispatchOutcome {
        info!(resource = %event.resource_name, "Handling event");

        let (text, resource) = if event.is_deletion() {
            debug!("Resource deleted, skipping enrichment");
            (deletion_message(&event), None)
        } else {
            match self.enrich(&event).await {
                Ok(resource) => (update_message(&event, &resource), Some(resource)),
                Err(e) => {
                    error!(error = %e, "Failed to get metadata from Tableau Server, dropping event");
                    return DispatchOutcome::EnrichmentFailed;
                }
            }
        };

        match self.forward(&text, resource.as_ref()).await {
            Ok(with_image) => {
                info!(with_image, "Posted to Slack");
                DispatchOutcome::Forwarded { with_image }
            }
            Err(e) => {
                error!(error = %e, "Failed to post to Slack");
                DispatchOutcome::ForwardFailed
            }
        }
        // `resource` drops here, removing any preview image
    }
}
