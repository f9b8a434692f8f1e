//! Webhook registration on the analytics platform

use relay_core::{RelayError, Result, WebhookSubscription};
use relay_platform::{PlatformClient, Session};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of a best-effort deregistration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeregistrationReport {
    /// Names of subscriptions deleted on the platform
    pub deleted: Vec<String>,
    /// Names of subscriptions left on the platform after a failed delete
    pub failed: Vec<String>,
}

impl DeregistrationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Creates and deletes the relay's webhook subscriptions
pub struct Registrar {
    client: Arc<dyn PlatformClient>,
}

impl Registrar {
    pub fn new(client: Arc<dyn PlatformClient>) -> Self {
        Self { client }
    }

    /// Create every subscription, replacing same-named ones left on the platform
    ///
    /// If any create fails, the subscriptions created by this call are
    /// deleted again and the error is returned.
    pub async fn register_all(
        &self,
        session: &Session,
        subscriptions: Vec<WebhookSubscription>,
    ) -> Result<Vec<WebhookSubscription>> {
        self.remove_duplicates(session, &subscriptions).await?;

        info!(count = subscriptions.len(), "Creating webhooks on Tableau Server");
        let mut registered: Vec<WebhookSubscription> = Vec::with_capacity(subscriptions.len());

        for subscription in subscriptions {
            let created = self.client.create_webhook(session, &subscription).await;
            let failure = match created {
                Ok(remote) if !remote.id.is_empty() => {
                    info!(name = %subscription.name, id = %remote.id, "Webhook created");
                    registered.push(subscription.with_remote_id(&remote.id));
                    continue;
                }
                Ok(_) => "platform returned an empty webhook id".to_string(),
                Err(e) => e.to_string(),
            };

            error!(name = %subscription.name, error = %failure, "Failed to create webhook");
            if !registered.is_empty() {
                self.deregister_all(session, &registered).await;
            }
            return Err(RelayError::Registration(format!(
                "creating webhook '{}': {}",
                subscription.name, failure
            )));
        }

        Ok(registered)
    }

    /// Delete every registered subscription, logging failures
    pub async fn deregister_all(
        &self,
        session: &Session,
        subscriptions: &[WebhookSubscription],
    ) -> DeregistrationReport {
        let mut report = DeregistrationReport::default();

        for subscription in subscriptions {
            let Some(id) = subscription.registered_id() else {
                debug!(name = %subscription.name, "Skipping webhook that was never created");
                continue;
            };

            match self.client.delete_webhook(session, id).await {
                Ok(()) => {
                    info!(name = %subscription.name, id = %id, "Webhook deleted");
                    report.deleted.push(subscription.name.clone());
                }
                Err(e) => {
                    warn!(
                        name = %subscription.name,
                        id = %id,
                        error = %e,
                        "Failed to delete webhook, leaving it on the server"
                    );
                    report.failed.push(subscription.name.clone());
                }
            }
        }

        report
    }

    /// Delete existing webhooks whose names collide with the requested set
    async fn remove_duplicates(
        &self,
        session: &Session,
        subscriptions: &[WebhookSubscription],
    ) -> Result<()> {
        let wanted: HashSet<&str> = subscriptions.iter().map(|s| s.name.as_str()).collect();

        let existing = self
            .client
            .list_webhooks(session)
            .await
            .map_err(|e| RelayError::Registration(format!("listing webhooks: {}", e)))?;

        for webhook in existing.iter().filter(|w| wanted.contains(w.name.as_str())) {
            info!(name = %webhook.name, id = %webhook.id, "Deleting existing webhook, it will be recreated");
            if let Err(e) = self.client.delete_webhook(session, &webhook.id).await {
                warn!(name = %webhook.name, error = %e, "Failed to delete existing webhook");
            }
        }

        Ok(())
    }
}
