//! Controller resources of the DDI API

use async_trait::async_trait;
use http::{Method, StatusCode};

use ddi_models::{ActionFeedback, CancelDescriptor, ConfigData, ControllerBase, DeploymentDescriptor};

use super::{ByteStream, DdiTransport, Fetched};
use crate::errors::AgentError;
use crate::http::client::HttpClient;

#[async_trait]
impl DdiTransport for HttpClient {
    async fn check_actions(&self, etag: Option<&str>) -> Result<Fetched<ControllerBase>, AgentError> {
        self.get_json("", etag).await
    }

    async fn fetch_deployment(
        &self,
        action_id: &str,
        etag: Option<&str>,
    ) -> Result<Fetched<DeploymentDescriptor>, AgentError> {
        let path = format!("/deploymentBase/{}", action_id);
        self.get_json(&path, etag).await
    }

    async fn fetch_cancel(&self, action_id: &str) -> Result<CancelDescriptor, AgentError> {
        let path = format!("/cancelAction/{}", action_id);
        match self.get_json(&path, None).await? {
            Fetched::Changed { value, .. } => Ok(value),
            Fetched::Unchanged => Err(AgentError::Transport(format!(
                "unexpected 304 for cancel action {}",
                action_id
            ))),
        }
    }

    async fn post_deployment_feedback(&self, feedback: &ActionFeedback) -> Result<StatusCode, AgentError> {
        let path = format!("/deploymentBase/{}/feedback", feedback.id);
        self.send_json(Method::POST, &path, feedback).await
    }

    async fn post_cancel_feedback(&self, feedback: &ActionFeedback) -> Result<StatusCode, AgentError> {
        let path = format!("/cancelAction/{}/feedback", feedback.id);
        self.send_json(Method::POST, &path, feedback).await
    }

    async fn put_config_data(&self, data: &ConfigData) -> Result<StatusCode, AgentError> {
        self.send_json(Method::PUT, "/configData", data).await
    }

    async fn download_artifact(&self, url: &str) -> Result<ByteStream, AgentError> {
        self.stream(url).await
    }
}
