//! Slack Web API client
//!
//! Scoped to the single channel the relay posts to.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, instrument, trace};

use crate::error::ChatError;

const SLACK_API_BASE: &str = "https://slack.com/api";

/// Operations the relay needs from the chat service
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Post a plain text message
    async fn post_message(&self, text: &str) -> Result<(), ChatError>;

    /// Upload a file with the text as its caption
    async fn upload_file(&self, file: &Path, caption: &str) -> Result<(), ChatError>;

    /// Join the channel if the bot is not a member yet
    async fn ensure_membership(&self) -> Result<(), ChatError>;
}

#[derive(Debug, Deserialize)]
struct UploadUrlResponse {
    upload_url: String,
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct ConversationInfoResponse {
    channel: ChannelInfo,
}

#[derive(Debug, Deserialize)]
struct ChannelInfo {
    #[serde(default)]
    is_member: bool,
}

/// HTTP client for the Slack Web API
pub struct SlackClient {
    client: Client,
    bot_token: Secret<String>,
    channel: String,
    api_base: String,
}

impl fmt::Debug for SlackClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackClient")
            .field("channel", &self.channel)
            .field("api_base", &self.api_base)
            .field("bot_token", &"[REDACTED]")
            .finish()
    }
}

impl SlackClient {
    /// Create a new Slack client for the given channel
    pub fn new(bot_token: String, channel: &str, timeout: Duration) -> Result<Self, ChatError> {
        Self::with_api_base(bot_token, channel, timeout, SLACK_API_BASE)
    }

    /// Create a client against a non-default API base URL
    pub fn with_api_base(
        bot_token: String,
        channel: &str,
        timeout: Duration,
        api_base: &str,
    ) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            bot_token: Secret::new(bot_token),
            channel: channel.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(
            "Authorization",
            format!("Bearer {}", self.bot_token.expose_secret()),
        )
    }

    /// Send a Web API call and unwrap Slack's `ok` envelope
    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ChatError> {
        let response = self.authed(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let value: Value = serde_json::from_str(&body).map_err(|e| ChatError::Parse {
            body: body.clone(),
            error: e,
        })?;

        if !value.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            let reason = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            error!(error = %reason, status = %status, "Slack API error");
            return Err(ChatError::Api(reason));
        }

        serde_json::from_value(value).map_err(|e| ChatError::Parse { body, error: e })
    }
}

#[async_trait]
impl ChatClient for SlackClient {
    #[instrument(skip(self, text), fields(channel = %self.channel))]
    async fn post_message(&self, text: &str) -> Result<(), ChatError> {
        trace!("Posting message to Slack");

        let request = self
            .client
            .post(self.endpoint("chat.postMessage"))
            .header("Content-Type", "application/json; charset=utf-8")
            .json(&json!({ "channel": self.channel, "text": text }));

        let _: Value = self.call(request).await?;
        debug!("Message posted");
        Ok(())
    }

    #[instrument(skip(self, caption), fields(channel = %self.channel))]
    async fn upload_file(&self, file: &Path, caption: &str) -> Result<(), ChatError> {
        let bytes = tokio::fs::read(file).await?;
        let filename = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "preview.png".to_string());

        let request = self
            .client
            .post(self.endpoint("files.getUploadURLExternal"))
            .form(&[("filename", filename.clone()), ("length", bytes.len().to_string())]);
        let target: UploadUrlResponse = self.call(request).await?;

        trace!(file_id = %target.file_id, "Uploading file content");
        let response = self.client.post(&target.upload_url).body(bytes).send().await?;
        if !response.status().is_success() {
            return Err(ChatError::Api(format!(
                "file upload returned {}",
                response.status()
            )));
        }

        let request = self
            .client
            .post(self.endpoint("files.completeUploadExternal"))
            .header("Content-Type", "application/json; charset=utf-8")
            .json(&json!({
                "files": [{ "id": target.file_id, "title": filename }],
                "channel_id": self.channel,
                "initial_comment": caption,
            }));
        let _: Value = self.call(request).await?;

        debug!("File shared");
        Ok(())
    }

    #[instrument(skip(self), fields(channel = %self.channel))]
    async fn ensure_membership(&self) -> Result<(), ChatError> {
        let request = self
            .client
            .get(self.endpoint("conversations.info"))
            .query(&[("channel", self.channel.as_str())]);
        let info: ConversationInfoResponse = self.call(request).await?;

        if info.channel.is_member {
            debug!("Already a member of the channel");
            return Ok(());
        }

        let request = self
            .client
            .post(self.endpoint("conversations.join"))
            .header("Content-Type", "application/json; charset=utf-8")
            .json(&json!({ "channel": self.channel }));
        let _: Value = self.call(request).await?;

        info!("Joined Slack channel");
        Ok(())
    }
}
