//! API models

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hypermedia link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
}

/// Controller base resource, answered by every poll
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerBase {
    #[serde(default)]
    pub config: ControllerConfig,
    #[serde(rename = "_links", default)]
    pub links: ControllerLinks,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub polling: Polling,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Polling {
    /// Sleep between polls, formatted as `HH:MM:SS`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerLinks {
    #[serde(rename = "deploymentBase", default, skip_serializing_if = "Option::is_none")]
    pub deployment_base: Option<Link>,
    #[serde(rename = "cancelAction", default, skip_serializing_if = "Option::is_none")]
    pub cancel_action: Option<Link>,
    #[serde(rename = "configData", default, skip_serializing_if = "Option::is_none")]
    pub config_data: Option<Link>,
}

impl ControllerBase {
    /// Poll interval advertised by the server
    pub fn sleep_interval(&self) -> Option<Duration> {
        self.config.polling.sleep.as_deref().and_then(parse_sleep)
    }

    /// Action id of a pending deployment, if any
    pub fn deployment_action_id(&self) -> Option<String> {
        self.links
            .deployment_base
            .as_ref()
            .and_then(|link| action_id_from_href(&link.href))
    }

    /// Action id of a pending cancellation, if any
    pub fn cancel_action_id(&self) -> Option<String> {
        self.links
            .cancel_action
            .as_ref()
            .and_then(|link| action_id_from_href(&link.href))
    }

    /// Whether the server asks for the device's config data
    pub fn config_data_requested(&self) -> bool {
        self.links.config_data.is_some()
    }
}

/// Parse a `HH:MM:SS` sleep string
pub fn parse_sleep(value: &str) -> Option<Duration> {
    let mut parts = value.trim().split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: u64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return None;
    }
    Some(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
}

/// Last path segment of a link, ignoring the query string
pub fn action_id_from_href(href: &str) -> Option<String> {
    let path = href.split('?').next().unwrap_or(href).trim_end_matches('/');
    path.rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// Provisioning type of a deployment phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningType {
    Skip,
    #[default]
    Attempt,
    Forced,
}

/// Deployment action announced by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentDescriptor {
    pub id: String,
    pub deployment: Deployment,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(default)]
    pub download: ProvisioningType,
    #[serde(default)]
    pub update: ProvisioningType,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
}

impl DeploymentDescriptor {
    pub fn action_id(&self) -> &str {
        &self.id
    }

    pub fn download_type(&self) -> ProvisioningType {
        self.deployment.download
    }

    pub fn update_type(&self) -> ProvisioningType {
        self.deployment.update
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.deployment.chunks
    }
}

/// Software module inside a deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Module type
    pub part: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub metadata: Vec<MetadataEntry>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub filename: String,
    pub hashes: Hashes,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "_links", default)]
    pub links: ArtifactLinks,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hashes {
    pub md5: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<Link>,
    #[serde(rename = "download-http", default, skip_serializing_if = "Option::is_none")]
    pub download_http: Option<Link>,
}

impl Artifact {
    /// Download URL, preferring the https link
    pub fn download_url(&self) -> Option<&str> {
        self.links
            .download
            .as_ref()
            .or(self.links.download_http.as_ref())
            .map(|link| link.href.as_str())
    }
}

/// Cancellation announced by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelDescriptor {
    pub id: String,
    #[serde(rename = "cancelAction")]
    pub cancel_action: CancelAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelAction {
    #[serde(rename = "stopId")]
    pub stop_id: String,
}

impl CancelDescriptor {
    pub fn action_id(&self) -> &str {
        &self.id
    }

    pub fn stop_id(&self) -> &str {
        &self.cancel_action.stop_id
    }
}

/// Execution state reported in feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Execution {
    Closed,
    Proceeding,
    Canceled,
    Scheduled,
    Rejected,
    Resumed,
    Downloaded,
    Download,
}

impl Execution {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Execution::Closed)
    }
}

/// Outcome reported in feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Finished {
    Success,
    Failure,
    None,
}

/// Progress as completed (`cnt`) over total (`of`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub cnt: u32,
    pub of: u32,
}

/// Feedback body for deployment and cancel actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFeedback {
    pub id: String,
    pub time: String,
    pub status: FeedbackStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackStatus {
    pub execution: Execution,
    pub result: FeedbackResult,
    #[serde(default)]
    pub details: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackResult {
    pub finished: Finished,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
}

/// Config data update mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigDataMode {
    #[default]
    Merge,
    Replace,
    Remove,
}

/// Device attributes pushed to the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigData {
    pub mode: ConfigDataMode,
    pub data: BTreeMap<String, String>,
}

/// Timestamp format used by feedback bodies
pub fn ddi_timestamp(time: DateTime<Utc>) -> String {
    time.format("%Y%m%dT%H%M%S").to_string()
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "errorCode", default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
