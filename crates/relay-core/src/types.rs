use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RelayError;

/// A webhook subscription registered on the analytics platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSubscription {
    /// Subscription name, unique per relay
    pub name: String,
    /// Platform event name, e.g. `workbook-created`
    pub event_name: String,
    /// URL the platform POSTs notifications to
    pub callback_url: String,
    /// Identifier assigned by the platform once created
    #[serde(default)]
    pub remote_id: Option<String>,
}

impl WebhookSubscription {
    pub fn new(name: &str, event_name: &str, callback_url: &str) -> Self {
        Self {
            name: name.to_string(),
            event_name: event_name.to_string(),
            callback_url: callback_url.to_string(),
            remote_id: None,
        }
    }

    pub fn with_remote_id(mut self, remote_id: &str) -> Self {
        self.remote_id = Some(remote_id.to_string());
        self
    }

    /// Returns the remote id only when it is set and non-empty
    pub fn registered_id(&self) -> Option<&str> {
        self.remote_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn is_registered(&self) -> bool {
        self.registered_id().is_some()
    }
}

/// Kind of platform resource an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Workbook,
    Datasource,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workbook => "workbook",
            Self::Datasource => "datasource",
        }
    }

    /// Title-cased name used in chat messages
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Workbook => "Workbook",
            Self::Datasource => "Datasource",
        }
    }

    /// Whether the platform can render a preview image for this resource
    pub fn has_preview(&self) -> bool {
        matches!(self, Self::Workbook)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ResourceType {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "workbook" => Ok(Self::Workbook),
            "datasource" => Ok(Self::Datasource),
            other => Err(RelayError::Parse(format!("unknown resource type '{}'", other))),
        }
    }
}

impl<'de> Deserialize<'de> for ResourceType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Event names sent by the platform in the `event_type` field
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    WorkbookCreated,
    WorkbookUpdated,
    WorkbookDeleted,
    WorkbookRefreshStarted,
    WorkbookRefreshSucceeded,
    WorkbookRefreshFailed,
    DatasourceCreated,
    DatasourceUpdated,
    DatasourceDeleted,
    DatasourceRefreshStarted,
    DatasourceRefreshSucceeded,
    DatasourceRefreshFailed,
    /// Any event name this relay has no dedicated handling for
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::WorkbookCreated => "WorkbookCreated",
            Self::WorkbookUpdated => "WorkbookUpdated",
            Self::WorkbookDeleted => "WorkbookDeleted",
            Self::WorkbookRefreshStarted => "WorkbookRefreshStarted",
            Self::WorkbookRefreshSucceeded => "WorkbookRefreshSucceeded",
            Self::WorkbookRefreshFailed => "WorkbookRefreshFailed",
            Self::DatasourceCreated => "DatasourceCreated",
            Self::DatasourceUpdated => "DatasourceUpdated",
            Self::DatasourceDeleted => "DatasourceDeleted",
            Self::DatasourceRefreshStarted => "DatasourceRefreshStarted",
            Self::DatasourceRefreshSucceeded => "DatasourceRefreshSucceeded",
            Self::DatasourceRefreshFailed => "DatasourceRefreshFailed",
            Self::Other(name) => name,
        }
    }

    /// Deleted resources can no longer be looked up on the platform
    pub fn is_deletion(&self) -> bool {
        matches!(self, Self::WorkbookDeleted | Self::DatasourceDeleted)
    }

    pub fn is_refresh_failure(&self) -> bool {
        matches!(self, Self::WorkbookRefreshFailed | Self::DatasourceRefreshFailed)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "WorkbookCreated" => Self::WorkbookCreated,
            "WorkbookUpdated" => Self::WorkbookUpdated,
            "WorkbookDeleted" => Self::WorkbookDeleted,
            "WorkbookRefreshStarted" => Self::WorkbookRefreshStarted,
            "WorkbookRefreshSucceeded" => Self::WorkbookRefreshSucceeded,
            "WorkbookRefreshFailed" => Self::WorkbookRefreshFailed,
            "DatasourceCreated" => Self::DatasourceCreated,
            "DatasourceUpdated" => Self::DatasourceUpdated,
            "DatasourceDeleted" => Self::DatasourceDeleted,
            "DatasourceRefreshStarted" => Self::DatasourceRefreshStarted,
            "DatasourceRefreshSucceeded" => Self::DatasourceRefreshSucceeded,
            "DatasourceRefreshFailed" => Self::DatasourceRefreshFailed,
            other => Self::Other(other.to_string()),
        }
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(EventType::from(raw.as_str()))
    }
}

/// Event notification received from the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub resource_name: String,
    #[serde(rename = "resource")]
    pub resource_type: ResourceType,
    #[serde(rename = "resource_luid")]
    pub resource_id: String,
    #[serde(rename = "site_luid")]
    pub site_id: String,
    pub event_type: EventType,
    pub created_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Parse the raw request body of a webhook call
    pub fn from_slice(body: &[u8]) -> Result<Self, RelayError> {
        serde_json::from_slice(body).map_err(|e| RelayError::Parse(e.to_string()))
    }

    pub fn is_deletion(&self) -> bool {
        self.event_type.is_deletion()
    }
}

/// Process lifecycle of the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Registering,
    Listening,
    ShuttingDown,
    Terminated,
}

impl LifecycleState {
    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Idle, Registering)
                | (Registering, Listening)
                | (Registering, Terminated)
                | (Listening, ShuttingDown)
                | (ShuttingDown, Terminated)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Terminated)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Registering => "registering",
            Self::Listening => "listening",
            Self::ShuttingDown => "shutting_down",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}
