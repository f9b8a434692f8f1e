//! Relay lifecycle: register, listen, deregister

use anyhow::{Context, Result};
use relay_core::{CallbackUrl, LifecycleState, RelayConfig, RelayError, WebhookSubscription};
use relay_platform::{ChatClient, PlatformClient, SessionManager, SlackClient, TableauClient};
use relay_webhook::{
    create_listener_router, DeregistrationReport, DispatchSettings, Dispatcher, ListenerState,
    Registrar,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::cli::Args;
use crate::credentials::{Credentials, InquirePrompt, NoPrompt, SecretPrompt};
use crate::server::{Server, ShutdownSignal};

/// Main application
pub struct App {
    config: RelayConfig,
    callback: CallbackUrl,
    sessions: Arc<SessionManager>,
    registrar: Registrar,
    chat: Arc<dyn ChatClient>,
    state: LifecycleState,
}

impl App {
    /// Load configuration and credentials and build both service clients
    pub fn build(args: &Args) -> Result<Self> {
        let config = RelayConfig::load(Some(&args.config)).context("Invalid configuration")?;

        let prompt: Box<dyn SecretPrompt> = if args.no_prompt {
            Box::new(NoPrompt)
        } else {
            Box::new(InquirePrompt)
        };
        let credentials = Credentials::resolve(&config, prompt.as_ref())?;

        let platform = TableauClient::builder()
            .server(config.tableau.server.as_str())
            .site(config.tableau.site_content_url())
            .api_version(config.tableau.api_version.as_str())
            .personal_access_token(credentials.pat_name, credentials.pat_secret)
            .timeout(config.tableau.request_timeout())
            .ca_bundle(config.tableau.ssl_certificates.clone())
            .build()
            .context("Failed to create Tableau Server client")?;

        let chat = SlackClient::with_api_base(
            credentials.slack_token,
            &config.slack.channel,
            config.slack.request_timeout(),
            &config.slack.api_base,
        )
        .context("Failed to create Slack client")?;

        Self::new(config, Arc::new(platform), Arc::new(chat))
    }

    pub fn new(
        config: RelayConfig,
        platform: Arc<dyn PlatformClient>,
        chat: Arc<dyn ChatClient>,
    ) -> Result<Self> {
        let callback = config.webhooks.callback()?;
        let sessions = Arc::new(SessionManager::new(
            platform.clone(),
            config.tableau.session_max_age(),
        ));

        Ok(Self {
            config,
            callback,
            sessions,
            registrar: Registrar::new(platform),
            chat,
            state: LifecycleState::Idle,
        })
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Run until interrupted
    ///
    /// Signals are taken over before registration, so an interrupt at any
    /// later point still ends in deregistration.
    pub async fn run(self) -> Result<()> {
        let mut signals = ShutdownSignal::install().context("Failed to install signal handlers")?;
        let stop = CancellationToken::new();

        let trigger = stop.clone();
        tokio::spawn(async move {
            signals.recv().await;
            trigger.cancel();
        });

        self.run_until(stop).await
    }

    /// Register, serve until `stop` is cancelled, then deregister
    pub async fn run_until(mut self, stop: CancellationToken) -> Result<()> {
        let subscriptions = self.start().await?;

        let tracker = TaskTracker::new();
        let dispatcher = Arc::new(Dispatcher::new(
            self.sessions.clone(),
            self.chat.clone(),
            DispatchSettings::new(&self.config.tableau.server, &self.config.listener.temp_dir),
        ));
        let router = create_listener_router(ListenerState::new(
            &self.callback.path,
            dispatcher,
            tracker.clone(),
        ));

        let port = self.config.listener.bind_port(&self.callback);
        let server = tokio::select! {
            biased;
            _ = stop.cancelled() => None,
            server = Server::new(&self.config.listener, port) => Some(server),
        };
        let served = match server {
            None => {
                info!("Shutdown requested before the listener started");
                Ok(())
            }
            Some(Ok(server)) => {
                let stop = stop.clone();
                server.run(router, async move { stop.cancelled().await }).await
            }
            Some(Err(e)) => Err(e),
        };
        if let Err(ref e) = served {
            error!(error = %format!("{:#}", e), "Listener stopped with an error");
        }

        self.stop(&tracker, &subscriptions).await;
        served
    }

    /// Register every webhook; any failure here is fatal
    pub async fn start(&mut self) -> Result<Vec<WebhookSubscription>> {
        self.log_banner();
        self.advance(LifecycleState::Registering);

        let subscriptions = match self.register().await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                self.advance(LifecycleState::Terminated);
                return Err(e);
            }
        };

        if self.config.slack.join_channel {
            if let Err(e) = self.chat.ensure_membership().await {
                warn!(error = %e, channel = %self.config.slack.channel, "Could not join Slack channel");
            }
        }

        self.advance(LifecycleState::Listening);
        Ok(subscriptions)
    }

    /// Let in-flight dispatches finish, then delete the webhooks
    ///
    /// Never fails: every problem is logged and shutdown carries on.
    pub async fn stop(
        &mut self,
        tracker: &TaskTracker,
        subscriptions: &[WebhookSubscription],
    ) -> Option<DeregistrationReport> {
        self.advance(LifecycleState::ShuttingDown);
        drain(tracker, self.config.listener.shutdown_grace()).await;

        let report = match self.sessions.acquire().await {
            Ok(lease) => {
                info!("Deleting webhooks from Tableau Server");
                let report = self.registrar.deregister_all(&lease, subscriptions).await;
                self.sessions.release(lease).await;
                if !report.is_complete() {
                    warn!(failed = ?report.failed, "Some webhooks were left on Tableau Server");
                }
                Some(report)
            }
            Err(e) => {
                error!(error = %e, "Failed to sign in to Tableau Server, webhooks were not deleted");
                None
            }
        };

        self.advance(LifecycleState::Terminated);
        report
    }

    async fn register(&self) -> Result<Vec<WebhookSubscription>> {
        let lease = self
            .sessions
            .acquire()
            .await
            .map_err(|e| RelayError::Auth(e.to_string()))
            .context("Failed to sign in to Tableau Server")?;

        let registered = self
            .registrar
            .register_all(&lease, self.config.webhooks.subscriptions())
            .await;
        // Nothing holds a session while the relay sits idle
        self.sessions.release(lease).await;

        let registered = registered.context("Failed to register webhooks")?;
        info!(count = registered.len(), "Webhooks registered");
        Ok(registered)
    }

    fn advance(&mut self, next: LifecycleState) {
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "Unexpected lifecycle transition");
        }
        info!(from = %self.state, to = %next, "Lifecycle transition");
        self.state = next;
    }

    fn log_banner(&self) {
        info!(
            server = %self.config.tableau.server,
            site = %self.config.tableau.site,
            callback = %self.callback.url,
            subscriptions = self.config.webhooks.subscriptions.len(),
            channel = %self.config.slack.channel,
            "Starting Tableau webhook relay"
        );
    }
}

async fn drain(tracker: &TaskTracker, grace: Duration) {
    tracker.close();
    if tracker.is_empty() {
        return;
    }

    info!(in_flight = tracker.len(), "Waiting for in-flight events");
    if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
        warn!(in_flight = tracker.len(), "Gave up waiting for in-flight events");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_core::ResourceType;
    use relay_platform::{
        ChatError, OwnerRef, PlatformError, RemoteWebhook, ResourceItem, Session, UserItem,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    const CONFIG: &str = r#"
        [tableau]
        server = "https://tableau.example.com"
        pat_name = "relay"
        pat_secret = "s3cret"

        [webhooks]
        url = "https://relay.example.com/tableau-hook"

        [listener]
        ssl_cert = "certs/relay.pem"
        ssl_key = "certs/relay.key"
        shutdown_grace_secs = 5

        [slack]
        token = "xoxb-123"
        channel = "C0123456"
    "#;

    #[derive(Default)]
    struct FakePlatform {
        webhooks: Mutex<Vec<RemoteWebhook>>,
        next_id: AtomicUsize,
        sign_ins: AtomicUsize,
        sign_outs: AtomicUsize,
        refuse_sign_in: AtomicBool,
    }

    impl FakePlatform {
        fn names(&self) -> Vec<String> {
            self.webhooks.lock().unwrap().iter().map(|w| w.name.clone()).collect()
        }
    }

    #[async_trait]
    impl PlatformClient for FakePlatform {
        async fn sign_in(&self) -> relay_platform::Result<Session> {
            if self.refuse_sign_in.load(Ordering::SeqCst) {
                return Err(PlatformError::Auth("invalid token".to_string()));
            }
            let n = self.sign_ins.fetch_add(1, Ordering::SeqCst);
            Ok(Session::new(&format!("tok-{}", n), "site-1", "user-1"))
        }

        async fn sign_out(&self, _session: &Session) -> relay_platform::Result<()> {
            self.sign_outs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn list_webhooks(&self, _session: &Session) -> relay_platform::Result<Vec<RemoteWebhook>> {
            Ok(self.webhooks.lock().unwrap().clone())
        }

        async fn create_webhook(
            &self,
            _session: &Session,
            subscription: &WebhookSubscription,
        ) -> relay_platform::Result<RemoteWebhook> {
            let webhook = RemoteWebhook {
                id: format!("wh-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
                name: subscription.name.clone(),
            };
            self.webhooks.lock().unwrap().push(webhook.clone());
            Ok(webhook)
        }

        async fn delete_webhook(&self, _session: &Session, webhook_id: &str) -> relay_platform::Result<()> {
            self.webhooks.lock().unwrap().retain(|w| w.id != webhook_id);
            Ok(())
        }

        async fn get_resource(
            &self,
            _session: &Session,
            _resource_type: ResourceType,
            resource_id: &str,
        ) -> relay_platform::Result<ResourceItem> {
            Ok(ResourceItem {
                id: resource_id.to_string(),
                name: "Sales".to_string(),
                webpage_url: "https://internal/#/workbooks/1".to_string(),
                owner: OwnerRef { id: "owner-1".to_string() },
            })
        }

        async fn get_user(&self, _session: &Session, user_id: &str) -> relay_platform::Result<UserItem> {
            Ok(UserItem {
                id: user_id.to_string(),
                name: "jdoe".to_string(),
                full_name: None,
            })
        }

        async fn preview_image(&self, _session: &Session, _workbook_id: &str) -> relay_platform::Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct QuietChat {
        joins: AtomicUsize,
    }

    #[async_trait]
    impl ChatClient for QuietChat {
        async fn post_message(&self, _text: &str) -> std::result::Result<(), ChatError> {
            Ok(())
        }

        async fn upload_file(&self, _file: &std::path::Path, _caption: &str) -> std::result::Result<(), ChatError> {
            Ok(())
        }

        async fn ensure_membership(&self) -> std::result::Result<(), ChatError> {
            self.joins.fetch_add(1, Ordering::SeqCst);
            Err(ChatError::Api("missing_scope".to_string()))
        }
    }

    fn app() -> (App, Arc<FakePlatform>, Arc<QuietChat>) {
        let platform = Arc::new(FakePlatform::default());
        let chat = Arc::new(QuietChat::default());
        let config = RelayConfig::from_toml_str(CONFIG).unwrap();
        let app = App::new(config, platform.clone(), chat.clone()).unwrap();
        (app, platform, chat)
    }

    #[tokio::test]
    async fn test_start_registers_and_signs_out() {
        let (mut app, platform, chat) = app();

        let subscriptions = app.start().await.unwrap();

        assert_eq!(app.state(), LifecycleState::Listening);
        assert_eq!(subscriptions.len(), 8);
        assert!(subscriptions.iter().all(WebhookSubscription::is_registered));
        assert_eq!(platform.names().len(), 8);
        assert_eq!(platform.sign_ins.load(Ordering::SeqCst), 1);
        assert_eq!(platform.sign_outs.load(Ordering::SeqCst), 1);
        // A failed channel join does not stop startup
        assert_eq!(chat.joins.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_sign_in_failure_is_fatal() {
        let (mut app, platform, _) = app();
        platform.refuse_sign_in.store(true, Ordering::SeqCst);

        let err = app.start().await.unwrap_err();

        assert_eq!(app.state(), LifecycleState::Terminated);
        assert!(format!("{:#}", err).contains("sign in"));
        assert!(platform.names().is_empty());
    }

    #[tokio::test]
    async fn test_stop_deregisters_after_in_flight_events() {
        let (mut app, platform, _) = app();
        let subscriptions = app.start().await.unwrap();

        let tracker = TaskTracker::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        tracker.spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let report = app.stop(&tracker, &subscriptions).await.unwrap();

        assert!(finished.load(Ordering::SeqCst));
        assert!(report.is_complete());
        assert_eq!(report.deleted.len(), 8);
        assert!(platform.names().is_empty());
        assert_eq!(app.state(), LifecycleState::Terminated);
        assert_eq!(
            platform.sign_ins.load(Ordering::SeqCst),
            platform.sign_outs.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_stop_without_session_leaves_webhooks() {
        let (mut app, platform, _) = app();
        let subscriptions = app.start().await.unwrap();
        platform.refuse_sign_in.store(true, Ordering::SeqCst);

        let report = app.stop(&TaskTracker::new(), &subscriptions).await;

        assert!(report.is_none());
        assert_eq!(platform.names().len(), 8);
        assert_eq!(app.state(), LifecycleState::Terminated);
    }

    #[tokio::test]
    async fn test_shutdown_before_listening_still_deregisters() {
        let (app, platform, _) = app();
        let stop = CancellationToken::new();
        stop.cancel();

        app.run_until(stop).await.unwrap();

        assert!(platform.names().is_empty());
        assert_eq!(
            platform.sign_ins.load(Ordering::SeqCst),
            platform.sign_outs.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_listener_failure_still_deregisters() {
        let (app, platform, _) = app();

        // The configured certificate does not exist
        let err = app.run_until(CancellationToken::new()).await.unwrap_err();

        assert!(format!("{:#}", err).contains("certificate"));
        assert!(platform.names().is_empty());
    }
}
