//! Settings file management

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::options::{ClientOptions, LifecycleOptions};
use crate::deploy::downloader;
use crate::http::{AuthToken, HttpOptions};
use crate::logs::LogLevel;
use crate::utils::CooldownOptions;
use crate::workers::{actions, feedback, poller};

/// Floor for poll periods and backoff bases read from the file
const MIN_INTERVAL_SECS: u64 = 1;

/// Client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Daily-rolling log file directory
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Controller server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Root of the artifact folders, defaults to the settings directory
    #[serde(default)]
    pub storage_root: Option<PathBuf>,

    /// Attributes pushed when the server requests config data
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Timing of the client
    #[serde(default)]
    pub client: ClientSettings,

    /// Program that installs the downloaded artifacts
    #[serde(default)]
    pub update_command: UpdateCommandSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_dir: None,
            server: ServerSettings::default(),
            storage_root: None,
            attributes: BTreeMap::new(),
            client: ClientSettings::default(),
            update_command: UpdateCommandSettings::default(),
        }
    }
}

impl Settings {
    pub fn http_options(&self) -> HttpOptions {
        let auth = match (self.server.auth.kind, self.server.auth.token.clone()) {
            (AuthKind::Target, Some(token)) => AuthToken::Target(token),
            (AuthKind::Gateway, Some(token)) => AuthToken::Gateway(token),
            _ => AuthToken::None,
        };
        HttpOptions {
            server_url: self.server.url.clone(),
            tenant: self.server.tenant.clone(),
            controller_id: self.server.controller_id.clone(),
            auth,
            request_timeout: Duration::from_secs(self.server.request_timeout_secs),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        let client = &self.client;
        let interval = |secs: u64| Duration::from_secs(secs.max(MIN_INTERVAL_SECS));
        ClientOptions {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(client.max_shutdown_delay_secs),
            },
            connection: poller::Options {
                default_poll_interval: interval(client.default_poll_interval_secs),
                backoff: CooldownOptions {
                    base_delay: interval(client.backoff_base_secs),
                    max_delay: interval(client.backoff_max_secs),
                    multiplier: 2.0,
                },
                timeout_backoff: interval(client.timeout_backoff_secs),
            },
            feedback: feedback::Options {
                retry: CooldownOptions {
                    base_delay: Duration::from_secs(client.feedback_retry_base_secs),
                    max_delay: Duration::from_secs(client.feedback_retry_max_secs),
                    multiplier: 2.0,
                },
                max_attempts: client.feedback_max_attempts,
            },
            download: downloader::Options {
                progress_interval: Duration::from_millis(client.download_progress_interval_ms),
                ..Default::default()
            },
            actions: actions::Options {
                deployment_poll_interval: interval(client.deployment_poll_interval_secs),
            },
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    #[default]
    None,
    Target,
    Gateway,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default)]
    pub kind: AuthKind,

    #[serde(default)]
    pub token: Option<String>,
}

/// Controller server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_url")]
    pub url: String,

    #[serde(default = "default_tenant")]
    pub tenant: String,

    #[serde(default = "default_controller_id")]
    pub controller_id: String,

    #[serde(default)]
    pub auth: AuthSettings,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_server_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_tenant() -> String {
    "DEFAULT".to_string()
}

fn default_controller_id() -> String {
    "ddi-agent".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            tenant: default_tenant(),
            controller_id: default_controller_id(),
            auth: AuthSettings::default(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Client timing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_poll_interval")]
    pub default_poll_interval_secs: u64,

    #[serde(default = "default_deployment_poll_interval")]
    pub deployment_poll_interval_secs: u64,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,

    #[serde(default = "default_timeout_backoff")]
    pub timeout_backoff_secs: u64,

    #[serde(default = "default_feedback_retry_base")]
    pub feedback_retry_base_secs: u64,

    #[serde(default = "default_feedback_retry_max")]
    pub feedback_retry_max_secs: u64,

    #[serde(default = "default_feedback_max_attempts")]
    pub feedback_max_attempts: u32,

    #[serde(default = "default_download_progress_interval")]
    pub download_progress_interval_ms: u64,

    #[serde(default = "default_max_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,
}

fn default_poll_interval() -> u64 {
    30
}

fn default_deployment_poll_interval() -> u64 {
    10
}

fn default_backoff_base() -> u64 {
    1
}

fn default_backoff_max() -> u64 {
    60
}

fn default_timeout_backoff() -> u64 {
    300
}

fn default_feedback_retry_base() -> u64 {
    1
}

fn default_feedback_retry_max() -> u64 {
    60
}

fn default_feedback_max_attempts() -> u32 {
    300
}

fn default_download_progress_interval() -> u64 {
    1000
}

fn default_max_shutdown_delay() -> u64 {
    30
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            default_poll_interval_secs: default_poll_interval(),
            deployment_poll_interval_secs: default_deployment_poll_interval(),
            backoff_base_secs: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
            timeout_backoff_secs: default_timeout_backoff(),
            feedback_retry_base_secs: default_feedback_retry_base(),
            feedback_retry_max_secs: default_feedback_retry_max(),
            feedback_max_attempts: default_feedback_max_attempts(),
            download_progress_interval_ms: default_download_progress_interval(),
            max_shutdown_delay_secs: default_max_shutdown_delay(),
        }
    }
}

/// External installer program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateCommandSettings {
    #[serde(default = "default_update_program")]
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Whether a running deployment may be cancelled
    #[serde(default = "default_true")]
    pub cancellable: bool,
}

fn default_update_program() -> String {
    "/usr/local/bin/ddi-install".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for UpdateCommandSettings {
    fn default() -> Self {
        Self {
            program: default_update_program(),
            args: Vec::new(),
            cancellable: true,
        }
    }
}
