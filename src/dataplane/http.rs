//! HTTP data-plane client.
//!
//! Full reloads write the rendered document to disk and poke the proxy's
//! reload endpoint. Dynamic updates POST the backend list, which the proxy
//! applies in memory.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use url::Url;

use crate::config::schema::DataPlaneConfig;
use crate::dataplane::{renderer, DataPlane};
use crate::error::{ControllerError, Result};
use crate::model::{Backend, Configuration};

pub struct HttpDataPlane {
    client: Client<HttpConnector, Body>,
    endpoint: Url,
    backends_path: String,
    reload_path: String,
    output_path: Option<PathBuf>,
    test_command: Vec<String>,
    timeout: Duration,
}

impl HttpDataPlane {
    pub fn new(config: &DataPlaneConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            ControllerError::PublishFailure(format!("invalid data plane endpoint {}: {}", config.endpoint, e))
        })?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self {
            client,
            endpoint,
            backends_path: config.backends_path.clone(),
            reload_path: config.reload_path.clone(),
            output_path: config.output_path.as_ref().map(PathBuf::from),
            test_command: config.test_command.clone(),
            timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    async fn post(&self, path: &str, body: Vec<u8>) -> Result<StatusCode> {
        let url = self
            .endpoint
            .join(path)
            .map_err(|e| ControllerError::PublishFailure(format!("invalid path {}: {}", path, e)))?;
        let req = Request::builder()
            .method(Method::POST)
            .uri(url.as_str())
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .map_err(|e| ControllerError::PublishFailure(e.to_string()))?;

        let resp = tokio::time::timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| {
                ControllerError::PublishFailure(format!("{} timed out after {:?}", url, self.timeout))
            })?
            .map_err(|e| ControllerError::PublishFailure(format!("{}: {}", url, e)))?;
        Ok(resp.status())
    }

    async fn write_output(&self, rendered: &[u8]) -> Result<()> {
        let Some(path) = &self.output_path else {
            return Ok(());
        };
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, rendered).await?;
        tokio::fs::rename(&tmp, path).await?;
        tracing::debug!(path = %path.display(), bytes = rendered.len(), "Rendered configuration written");
        Ok(())
    }
}

#[async_trait]
impl DataPlane for HttpDataPlane {
    async fn publish_full(&self, config: &Configuration) -> Result<()> {
        let rendered = self.render_and_syntax_check(config).await?;
        self.write_output(&rendered)
            .await
            .map_err(|e| ControllerError::PublishFailure(e.to_string()))?;

        let status = self.post(&self.reload_path, rendered).await?;
        if !status.is_success() {
            return Err(ControllerError::PublishFailure(format!(
                "reload returned {}",
                status
            )));
        }
        tracing::info!(checksum = ?config.checksum, "Data plane reloaded");
        Ok(())
    }

    async fn apply_dynamic_backends(&self, backends: &[Backend]) -> Result<()> {
        let body = serde_json::to_vec(backends)
            .map_err(|e| ControllerError::PublishFailure(e.to_string()))?;
        let status = self.post(&self.backends_path, body).await?;
        if status != StatusCode::CREATED {
            return Err(ControllerError::PublishFailure(format!(
                "unexpected status {} posting backends",
                status
            )));
        }
        Ok(())
    }

    async fn render_and_syntax_check(&self, config: &Configuration) -> Result<Vec<u8>> {
        renderer::check_structure(config)?;
        let rendered = renderer::render(config)?;
        renderer::run_test_command(&self.test_command, &rendered, self.timeout).await?;
        Ok(rendered)
    }
}
