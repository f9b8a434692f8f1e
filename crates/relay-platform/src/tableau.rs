//! Tableau Server REST client
//!
//! Speaks the JSON flavour of the REST API. Every call except sign-in takes
//! an explicit [`Session`]; the client itself holds no authentication state.

use async_trait::async_trait;
use relay_core::{ResourceType, WebhookSubscription};
use reqwest::{header, Certificate, Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};
use url::Url;

use crate::error::{PlatformError, Result};

const AUTH_HEADER: &str = "X-Tableau-Auth";

/// Authenticated context returned by sign-in
#[derive(Clone)]
pub struct Session {
    token: String,
    site_id: String,
    user_id: String,
    opened_at: Instant,
}

impl Session {
    pub fn new(token: &str, site_id: &str, user_id: &str) -> Self {
        Self {
            token: token.to_string(),
            site_id: site_id.to_string(),
            user_id: user_id.to_string(),
            opened_at: Instant::now(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn age(&self) -> Duration {
        self.opened_at.elapsed()
    }

    pub fn is_expired(&self, max_age: Duration) -> bool {
        self.age() >= max_age
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"[REDACTED]")
            .field("site_id", &self.site_id)
            .field("user_id", &self.user_id)
            .field("age", &self.age())
            .finish()
    }
}

/// Webhook as known to the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteWebhook {
    pub id: String,
    pub name: String,
}

/// Workbook or datasource metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub webpage_url: String,
    pub owner: OwnerRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl UserItem {
    /// Full name when the platform knows one, otherwise the user name
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.name)
    }
}

/// Operations the relay needs from the analytics platform
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn sign_in(&self) -> Result<Session>;

    async fn sign_out(&self, session: &Session) -> Result<()>;

    async fn list_webhooks(&self, session: &Session) -> Result<Vec<RemoteWebhook>>;

    async fn create_webhook(
        &self,
        session: &Session,
        subscription: &WebhookSubscription,
    ) -> Result<RemoteWebhook>;

    async fn delete_webhook(&self, session: &Session, webhook_id: &str) -> Result<()>;

    async fn get_resource(
        &self,
        session: &Session,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<ResourceItem>;

    async fn get_user(&self, session: &Session, user_id: &str) -> Result<UserItem>;

    /// Rendered PNG thumbnail of a workbook
    async fn preview_image(&self, session: &Session, workbook_id: &str) -> Result<Vec<u8>>;
}

// ===== Wire formats =====

#[derive(Deserialize)]
struct SignInEnvelope {
    credentials: SignInCredentials,
}

#[derive(Deserialize)]
struct SignInCredentials {
    token: String,
    site: IdRef,
    user: IdRef,
}

#[derive(Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Deserialize)]
struct WebhookListEnvelope {
    #[serde(default)]
    webhooks: WebhookList,
}

#[derive(Deserialize, Default)]
struct WebhookList {
    #[serde(default)]
    webhook: Vec<RemoteWebhook>,
}

#[derive(Deserialize)]
struct WebhookEnvelope {
    webhook: RemoteWebhook,
}

#[derive(Deserialize)]
struct UserEnvelope {
    user: UserItem,
}

/// Builder for creating a TableauClient
#[derive(Default)]
pub struct TableauClientBuilder {
    server: Option<String>,
    site_content_url: String,
    api_version: Option<String>,
    pat_name: Option<String>,
    pat_secret: Option<String>,
    timeout: Option<Duration>,
    ca_bundle: Option<PathBuf>,
}

impl TableauClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base URL of the server, e.g. `https://tableau.example.com`
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Site content URL; empty for the default site
    pub fn site(mut self, content_url: impl Into<String>) -> Self {
        self.site_content_url = content_url.into();
        self
    }

    pub fn api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Personal access token used for every sign-in
    pub fn personal_access_token(mut self, name: impl Into<String>, secret: impl Into<String>) -> Self {
        self.pat_name = Some(name.into());
        self.pat_secret = Some(secret.into());
        self
    }

    /// Bound on every request, connect included
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// PEM bundle trusted in addition to the system roots
    pub fn ca_bundle(mut self, path: Option<PathBuf>) -> Self {
        self.ca_bundle = path;
        self
    }

    pub fn build(self) -> Result<TableauClient> {
        let server = self
            .server
            .ok_or_else(|| PlatformError::Config("server URL is required".to_string()))?;
        let api_version = self.api_version.unwrap_or_else(|| "3.8".to_string());
        let base_url = Url::parse(&format!(
            "{}/api/{}/",
            server.trim_end_matches('/'),
            api_version
        ))?;

        let pat_name = self
            .pat_name
            .ok_or_else(|| PlatformError::Config("token name is required".to_string()))?;
        let pat_secret = self
            .pat_secret
            .ok_or_else(|| PlatformError::Config("token secret is required".to_string()))?;

        let timeout = self.timeout.unwrap_or(Duration::from_secs(30));

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let mut builder = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(format!("tableau-webhook-relay/{}", env!("CARGO_PKG_VERSION")))
            .default_headers(headers);

        if let Some(path) = self.ca_bundle {
            let pem = std::fs::read(&path).map_err(|e| {
                PlatformError::Config(format!("cannot read CA bundle {}: {}", path.display(), e))
            })?;
            builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
        }

        Ok(TableauClient {
            http: builder.build()?,
            base_url,
            site_content_url: self.site_content_url,
            pat_name,
            pat_secret: Secret::new(pat_secret),
        })
    }
}

/// Client for the Tableau Server REST API
pub struct TableauClient {
    http: Client,
    base_url: Url,
    site_content_url: String,
    pat_name: String,
    pat_secret: Secret<String>,
}

impl fmt::Debug for TableauClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableauClient")
            .field("base_url", &self.base_url)
            .field("site", &self.site_content_url)
            .field("pat_name", &self.pat_name)
            .field("pat_secret", &"[REDACTED]")
            .finish()
    }
}

impl TableauClient {
    pub fn builder() -> TableauClientBuilder {
        TableauClientBuilder::new()
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn token_name(&self) -> &str {
        &self.pat_name
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(PlatformError::Url)
    }

    fn site_url(&self, session: &Session, path: &str) -> Result<Url> {
        self.url(&format!("sites/{}/{}", session.site_id(), path))
    }

    fn authed(&self, request: RequestBuilder, session: &Session) -> RequestBuilder {
        request.header(AUTH_HEADER, session.token())
    }

    async fn check(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED => Err(PlatformError::Auth(body)),
            StatusCode::NOT_FOUND => Err(PlatformError::NotFound(body)),
            _ => Err(PlatformError::Api {
                status: status.as_u16(),
                message: body,
            }),
        }
    }

    async fn json<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let response = self.check(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl PlatformClient for TableauClient {
    #[instrument(skip(self), fields(token_name = %self.pat_name))]
    async fn sign_in(&self) -> Result<Session> {
        let body = json!({
            "credentials": {
                "personalAccessTokenName": self.pat_name,
                "personalAccessTokenSecret": self.pat_secret.expose_secret(),
                "site": { "contentUrl": self.site_content_url },
            }
        });

        let response = self
            .http
            .post(self.url("auth/signin")?)
            .json(&body)
            .send()
            .await?;

        let envelope: SignInEnvelope = self.json(response).await.map_err(|e| match e {
            PlatformError::Api { status, message } if status == 400 || status == 403 => {
                PlatformError::Auth(message)
            }
            other => other,
        })?;

        debug!(site_id = %envelope.credentials.site.id, "Signed in");
        Ok(Session::new(
            &envelope.credentials.token,
            &envelope.credentials.site.id,
            &envelope.credentials.user.id,
        ))
    }

    #[instrument(skip(self, session))]
    async fn sign_out(&self, session: &Session) -> Result<()> {
        let request = self.http.post(self.url("auth/signout")?);
        let response = self.authed(request, session).send().await?;
        self.check(response).await?;
        Ok(())
    }

    #[instrument(skip(self, session))]
    async fn list_webhooks(&self, session: &Session) -> Result<Vec<RemoteWebhook>> {
        let request = self.http.get(self.site_url(session, "webhooks")?);
        let response = self.authed(request, session).send().await?;
        let envelope: WebhookListEnvelope = self.json(response).await?;
        Ok(envelope.webhooks.webhook)
    }

    #[instrument(skip(self, session, subscription), fields(name = %subscription.name))]
    async fn create_webhook(
        &self,
        session: &Session,
        subscription: &WebhookSubscription,
    ) -> Result<RemoteWebhook> {
        let source_event = format!("webhook-source-event-{}", subscription.event_name);
        let body = json!({
            "webhook": {
                "name": subscription.name,
                "webhook-source": { source_event: {} },
                "webhook-destination": {
                    "webhook-destination-http": {
                        "method": "POST",
                        "url": subscription.callback_url,
                    }
                },
            }
        });

        let request = self.http.post(self.site_url(session, "webhooks")?).json(&body);
        let response = self.authed(request, session).send().await?;
        let envelope: WebhookEnvelope = self.json(response).await?;
        Ok(envelope.webhook)
    }

    #[instrument(skip(self, session))]
    async fn delete_webhook(&self, session: &Session, webhook_id: &str) -> Result<()> {
        let request = self
            .http
            .delete(self.site_url(session, &format!("webhooks/{}", webhook_id))?);
        let response = self.authed(request, session).send().await?;
        self.check(response).await?;
        Ok(())
    }

    #[instrument(skip(self, session))]
    async fn get_resource(
        &self,
        session: &Session,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> Result<ResourceItem> {
        let collection = match resource_type {
            ResourceType::Workbook => "workbooks",
            ResourceType::Datasource => "datasources",
        };
        let request = self
            .http
            .get(self.site_url(session, &format!("{}/{}", collection, resource_id))?);
        let response = self.authed(request, session).send().await?;

        // The item is wrapped under its singular type name
        let mut envelope: serde_json::Map<String, serde_json::Value> = self.json(response).await?;
        let item = envelope.remove(resource_type.as_str()).ok_or_else(|| {
            PlatformError::NotFound(format!("{} {}", resource_type.as_str(), resource_id))
        })?;
        Ok(serde_json::from_value(item)?)
    }

    #[instrument(skip(self, session))]
    async fn get_user(&self, session: &Session, user_id: &str) -> Result<UserItem> {
        let request = self
            .http
            .get(self.site_url(session, &format!("users/{}", user_id))?);
        let response = self.authed(request, session).send().await?;
        let envelope: UserEnvelope = self.json(response).await?;
        Ok(envelope.user)
    }

    #[instrument(skip(self, session))]
    async fn preview_image(&self, session: &Session, workbook_id: &str) -> Result<Vec<u8>> {
        let request = self.http.get(
            self.site_url(session, &format!("workbooks/{}/previewImage", workbook_id))?,
        );
        let response = self.authed(request, session).send().await?;
        let response = self.check(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> TableauClient {
        TableauClient::builder()
            .server(server.uri())
            .site("marketing")
            .personal_access_token("relay", "s3cret")
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    fn session() -> Session {
        Session::new("tok-1", "site-1", "user-1")
    }

    #[test]
    fn test_builder_requires_token() {
        let result = TableauClient::builder().server("https://tableau.example.com").build();
        assert!(matches!(result, Err(PlatformError::Config(_))));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let client = TableauClient::builder()
            .server("https://tableau.example.com")
            .personal_access_token("relay", "s3cret")
            .build()
            .unwrap();
        assert_eq!(client.base_url().as_str(), "https://tableau.example.com/api/3.8/");
        assert!(!format!("{:?}", client).contains("s3cret"));
        assert!(!format!("{:?}", session()).contains("tok-1"));
    }

    #[tokio::test]
    async fn test_sign_in() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/3.8/auth/signin"))
            .and(body_partial_json(json!({
                "credentials": {
                    "personalAccessTokenName": "relay",
                    "personalAccessTokenSecret": "s3cret",
                    "site": { "contentUrl": "marketing" }
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "credentials": {
                    "site": { "id": "site-1", "contentUrl": "marketing" },
                    "user": { "id": "user-1" },
                    "token": "tok-1"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let session = client(&server).sign_in().await.unwrap();
        assert_eq!(session.token(), "tok-1");
        assert_eq!(session.site_id(), "site-1");
        assert_eq!(session.user_id(), "user-1");
    }

    #[tokio::test]
    async fn test_sign_in_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/3.8/auth/signin"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
            .mount(&server)
            .await;

        let err = client(&server).sign_in().await.unwrap_err();
        assert!(matches!(err, PlatformError::Auth(_)));
    }

    #[tokio::test]
    async fn test_list_webhooks_empty_collection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/3.8/sites/site-1/webhooks"))
            .and(header(AUTH_HEADER, "tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "webhooks": {} })))
            .mount(&server)
            .await;

        let webhooks = client(&server).list_webhooks(&session()).await.unwrap();
        assert!(webhooks.is_empty());
    }

    #[tokio::test]
    async fn test_create_and_delete_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/3.8/sites/site-1/webhooks"))
            .and(body_partial_json(json!({
                "webhook": {
                    "name": "tswts-workbook-created",
                    "webhook-source": { "webhook-source-event-workbook-created": {} },
                    "webhook-destination": {
                        "webhook-destination-http": {
                            "method": "POST",
                            "url": "https://relay.example.com/hook"
                        }
                    }
                }
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "webhook": { "id": "wh-1", "name": "tswts-workbook-created" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/3.8/sites/site-1/webhooks/wh-1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let subscription = WebhookSubscription::new(
            "tswts-workbook-created",
            "workbook-created",
            "https://relay.example.com/hook",
        );
        let created = client.create_webhook(&session(), &subscription).await.unwrap();
        assert_eq!(created.id, "wh-1");

        client.delete_webhook(&session(), "wh-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_workbook_and_owner() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/3.8/sites/site-1/workbooks/abc123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "workbook": {
                    "id": "abc123",
                    "name": "Sales",
                    "webpageUrl": "https://internal-host/#/site/marketing/workbooks/42",
                    "owner": { "id": "owner-1" }
                }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/3.8/sites/site-1/users/owner-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user": { "id": "owner-1", "name": "jdoe", "fullName": "Jane Doe" }
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        let workbook = client
            .get_resource(&session(), ResourceType::Workbook, "abc123")
            .await
            .unwrap();
        assert_eq!(workbook.owner.id, "owner-1");
        assert_eq!(workbook.webpage_url, "https://internal-host/#/site/marketing/workbooks/42");

        let owner = client.get_user(&session(), "owner-1").await.unwrap();
        assert_eq!(owner.display_name(), "Jane Doe");
    }

    #[tokio::test]
    async fn test_get_missing_datasource() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/3.8/sites/site-1/datasources/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
            .mount(&server)
            .await;

        let err = client(&server)
            .get_resource(&session(), ResourceType::Datasource, "gone")
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_preview_image_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/3.8/sites/site-1/workbooks/abc123/previewImage"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, b'P', b'N', b'G']))
            .mount(&server)
            .await;

        let image = client(&server).preview_image(&session(), "abc123").await.unwrap();
        assert_eq!(image, vec![0x89, b'P', b'N', b'G']);
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/3.8/sites/site-1/users/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let client = TableauClient::builder()
            .server(server.uri())
            .personal_access_token("relay", "s3cret")
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();

        let err = client.get_user(&session(), "slow").await.unwrap_err();
        assert!(matches!(err, PlatformError::Timeout));
    }

    #[test]
    fn test_user_display_name_fallback() {
        let user = UserItem {
            id: "u".into(),
            name: "jdoe".into(),
            full_name: Some(String::new()),
        };
        assert_eq!(user.display_name(), "jdoe");
    }
}
