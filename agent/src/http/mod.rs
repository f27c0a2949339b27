//! Transport boundary of the controller protocol
//!
//! The orchestration core only talks to [`DdiTransport`]. [`client::HttpClient`]
//! implements it over reqwest.

pub mod client;
pub mod controller;

use async_trait::async_trait;
use futures::stream::BoxStream;
use http::StatusCode;

use ddi_models::{ActionFeedback, CancelDescriptor, ConfigData, ControllerBase, DeploymentDescriptor};

use crate::errors::AgentError;

pub use client::{AuthToken, HttpClient, HttpOptions};

/// Artifact bytes as they arrive
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, AgentError>>;

/// Result of a conditional GET
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched<T> {
    Changed { value: T, etag: Option<String> },
    Unchanged,
}

#[async_trait]
pub trait DdiTransport: Send + Sync {
    /// Poll the controller base resource
    async fn check_actions(&self, etag: Option<&str>) -> Result<Fetched<ControllerBase>, AgentError>;

    async fn fetch_deployment(
        &self,
        action_id: &str,
        etag: Option<&str>,
    ) -> Result<Fetched<DeploymentDescriptor>, AgentError>;

    async fn fetch_cancel(&self, action_id: &str) -> Result<CancelDescriptor, AgentError>;

    async fn post_deployment_feedback(&self, feedback: &ActionFeedback) -> Result<StatusCode, AgentError>;

    async fn post_cancel_feedback(&self, feedback: &ActionFeedback) -> Result<StatusCode, AgentError>;

    async fn put_config_data(&self, data: &ConfigData) -> Result<StatusCode, AgentError>;

    async fn download_artifact(&self, url: &str) -> Result<ByteStream, AgentError>;
}
