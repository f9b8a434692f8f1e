//! In-memory stand-ins for the platform and chat services
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use relay_core::{EventType, InboundEvent, ResourceType, WebhookSubscription};
use relay_platform::{
    ChatClient, ChatError, OwnerRef, PlatformClient, PlatformError, RemoteWebhook, ResourceItem,
    Result, Session, SessionManager, UserItem,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SERVER_URL: &str = "https://tableau.example.com";
pub const CALLBACK_URL: &str = "https://relay.example.com/tableau-hook";

/// Platform fake keeping webhooks in memory and recording every call
#[derive(Default)]
pub struct FakePlatform {
    pub webhooks: Mutex<Vec<RemoteWebhook>>,
    pub calls: Mutex<Vec<String>>,
    next_id: AtomicUsize,
    pub fail_create_for: Mutex<Option<String>>,
    pub fail_delete: AtomicBool,
    pub fail_resource: AtomicBool,
    pub fail_preview: AtomicBool,
    /// How long a resource lookup takes
    pub resource_delay: Mutex<Duration>,
    /// Only the newest sign-in is accepted
    valid_token: Mutex<Option<String>>,
}

impl FakePlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_webhooks(names: &[&str]) -> Arc<Self> {
        let platform = Self::new();
        for name in names {
            let id = platform.next_webhook_id();
            platform.webhooks.lock().unwrap().push(RemoteWebhook {
                id,
                name: name.to_string(),
            });
        }
        platform
    }

    fn next_webhook_id(&self) -> String {
        format!("wh-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    /// Number of recorded calls starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn webhook_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .webhooks
            .lock()
            .unwrap()
            .iter()
            .map(|w| w.name.clone())
            .collect();
        names.sort();
        names
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn sign_in(&self) -> Result<Session> {
        self.record("sign_in");
        let token = format!("tok-{}", self.count("sign_in"));
        *self.valid_token.lock().unwrap() = Some(token.clone());
        Ok(Session::new(&token, "site-1", "relay-user"))
    }

    async fn sign_out(&self, _session: &Session) -> Result<()> {
        self.record("sign_out");
        Ok(())
    }

    async fn list_webhooks(&self, _session: &Session) -> Result<Vec<RemoteWebhook>> {
        self.record("list_webhooks");
        Ok(self.webhooks.lock().unwrap().clone())
    }

    async fn create_webhook(
        &self,
        _session: &Session,
        subscription: &WebhookSubscription,
    ) -> Result<RemoteWebhook> {
        self.record(format!("create_webhook:{}", subscription.name));
        if self.fail_create_for.lock().unwrap().as_deref() == Some(subscription.name.as_str()) {
            return Err(PlatformError::Api {
                status: 400,
                message: "invalid event".to_string(),
            });
        }

        let webhook = RemoteWebhook {
            id: self.next_webhook_id(),
            name: subscription.name.clone(),
        };
        self.webhooks.lock().unwrap().push(webhook.clone());
        Ok(webhook)
    }

    async fn delete_webhook(&self, _session: &Session, webhook_id: &str) -> Result<()> {
        self.record(format!("delete_webhook:{}", webhook_id));
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(PlatformError::Api {
                status: 500,
                message: "internal error".to_string(),
            });
        }

        let mut webhooks = self.webhooks.lock().unwrap();
        let before = webhooks.len();
        webhooks.retain(|w| w.id != webhook_id);
        if webhooks.len() == before {
            return Err(PlatformError::NotFound(webhook_id.to_string()));
        }
        Ok(())
    }

    async fn get_resource(
        &self,
        session: &Session,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<ResourceItem> {
        self.record(format!("get_resource:{}", resource_id));
        let delay = *self.resource_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.valid_token.lock().unwrap().as_deref() != Some(session.token()) {
            return Err(PlatformError::Auth("session invalidated".to_string()));
        }
        if self.fail_resource.load(Ordering::SeqCst) {
            return Err(PlatformError::Api {
                status: 503,
                message: "service unavailable".to_string(),
            });
        }

        Ok(ResourceItem {
            id: resource_id.to_string(),
            name: "Sales".to_string(),
            webpage_url: format!(
                "https://internal-host/#/site/x/{}s/42",
                resource_type.as_str()
            ),
            owner: OwnerRef {
                id: "owner-1".to_string(),
            },
        })
    }

    async fn get_user(&self, _session: &Session, user_id: &str) -> Result<UserItem> {
        self.record(format!("get_user:{}", user_id));
        Ok(UserItem {
            id: user_id.to_string(),
            name: "jdoe".to_string(),
            full_name: Some("Jane Doe".to_string()),
        })
    }

    async fn preview_image(&self, _session: &Session, workbook_id: &str) -> Result<Vec<u8>> {
        self.record(format!("preview_image:{}", workbook_id));
        if self.fail_preview.load(Ordering::SeqCst) {
            return Err(PlatformError::Api {
                status: 500,
                message: "render failed".to_string(),
            });
        }
        Ok(b"\x89PNG\r\n".to_vec())
    }
}

/// Upload as seen by the chat fake
#[derive(Debug, Clone)]
pub struct Upload {
    pub path: PathBuf,
    pub caption: String,
    pub existed: bool,
}

/// Chat fake recording posts and uploads
#[derive(Default)]
pub struct RecordingChat {
    pub posts: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<Upload>>,
    pub fail: AtomicBool,
}

impl RecordingChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn result(&self) -> std::result::Result<(), ChatError> {
        if self.fail.load(Ordering::SeqCst) {
            Err(ChatError::Api("channel_not_found".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ChatClient for RecordingChat {
    async fn post_message(&self, text: &str) -> std::result::Result<(), ChatError> {
        self.posts.lock().unwrap().push(text.to_string());
        self.result()
    }

    async fn upload_file(&self, file: &Path, caption: &str) -> std::result::Result<(), ChatError> {
        self.uploads.lock().unwrap().push(Upload {
            path: file.to_path_buf(),
            caption: caption.to_string(),
            existed: file.exists(),
        });
        self.result()
    }

    async fn ensure_membership(&self) -> std::result::Result<(), ChatError> {
        Ok(())
    }
}

pub fn sessions(platform: Arc<FakePlatform>) -> Arc<SessionManager> {
    sessions_with_max_age(platform, Duration::from_secs(600))
}

pub fn sessions_with_max_age(platform: Arc<FakePlatform>, max_age: Duration) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(platform, max_age))
}

pub fn subscriptions(names: &[&str]) -> Vec<WebhookSubscription> {
    names
        .iter()
        .map(|name| WebhookSubscription::new(name, "workbook-created", CALLBACK_URL))
        .collect()
}

pub fn event(resource_type: ResourceType, event_type: EventType) -> InboundEvent {
    InboundEvent {
        resource_name: "Sales".to_string(),
        resource_type,
        resource_id: "abc123".to_string(),
        site_id: "site-1".to_string(),
        event_type,
        created_at: Utc::now(),
    }
}

/// Files currently present in `dir`
pub fn files_in(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    }
}
