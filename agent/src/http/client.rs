//! HTTP client implementation

use std::time::Duration;

use futures::StreamExt;
use http::{Method, StatusCode};
use reqwest::{header, Client, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};
use url::Url;

use super::{ByteStream, Fetched};
use crate::errors::AgentError;

/// Credential sent with every controller request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthToken {
    Target(String),
    Gateway(String),
    None,
}

impl AuthToken {
    fn header_value(&self) -> Option<String> {
        match self {
            AuthToken::Target(token) => Some(format!("TargetToken {}", token)),
            AuthToken::Gateway(token) => Some(format!("GatewayToken {}", token)),
            AuthToken::None => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub server_url: String,
    pub tenant: String,
    pub controller_id: String,
    pub auth: AuthToken,
    /// Total timeout for controller requests; artifact downloads only get a connect timeout
    pub request_timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            tenant: "DEFAULT".to_string(),
            controller_id: "ddi-agent".to_string(),
            auth: AuthToken::None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP client for the controller API
pub struct HttpClient {
    client: Client,
    download_client: Client,
    base_url: String,
    auth_header: Option<String>,
}

impl HttpClient {
    pub fn new(options: &HttpOptions) -> Result<Self, AgentError> {
        let server = Url::parse(&options.server_url)?;
        let client = Client::builder().timeout(options.request_timeout).build()?;
        let download_client = Client::builder()
            .connect_timeout(options.request_timeout)
            .build()?;

        Ok(Self {
            client,
            download_client,
            base_url: format!(
                "{}/{}/controller/v1/{}",
                server.as_str().trim_end_matches('/'),
                options.tenant,
                options.controller_id
            ),
            auth_header: options.auth.header_value(),
        })
    }

    /// Controller resource root, `{server}/{tenant}/controller/v1/{controllerId}`
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_header {
            Some(value) => request.header(header::AUTHORIZATION, value),
            None => request,
        }
    }

    /// Conditional GET; 304 maps to [`Fetched::Unchanged`]
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        etag: Option<&str>,
    ) -> Result<Fetched<T>, AgentError> {
        let url = self.url(path);
        debug!("GET {}", url);

        let mut request = self
            .authorize(self.client.get(&url))
            .header(header::ACCEPT, "application/hal+json");
        if let Some(etag) = etag {
            request = request.header(header::IF_NONE_MATCH, etag);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(Fetched::Unchanged);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("HTTP GET failed: {} - {}", status, body);
            return Err(AgentError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let value = response.json().await?;
        Ok(Fetched::Changed { value, etag })
    }

    /// Send a JSON body and hand back the status, whatever it is
    pub async fn send_json<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<StatusCode, AgentError> {
        let url = self.url(path);
        debug!("{} {}", method, url);

        let response = self
            .authorize(self.client.request(method.clone(), &url))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!("HTTP {} answered {} - {}", method, status, body);
        }
        Ok(status)
    }

    /// Stream an absolute URL through the download client
    pub async fn stream(&self, url: &str) -> Result<ByteStream, AgentError> {
        debug!("GET {} (stream)", url);

        let response = self
            .authorize(self.download_client.get(url))
            .header(header::ACCEPT, "application/octet-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Artifact download failed: {} - {}", status, body);
            return Err(AgentError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(AgentError::from))
            .boxed())
    }
}
