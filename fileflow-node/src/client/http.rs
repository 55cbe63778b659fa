//! `reqwest` implementation of [`ControlPlane`].

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use super::ControlPlane;
use super::error::{ClientError, ClientResult};
use super::models::{
    NextWorkRequest, Node, NodeSettings, ProcessingStatus, RegisterRequest, StatusUpdate,
    WorkItem,
};
use super::version::Version;

/// Header carrying the optional node access token.
pub const ACCESS_TOKEN_HEADER: &str = "x-token";

/// Control-plane client speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    base_url: Url,
    access_token: Option<String>,
}

impl HttpControlPlane {
    /// Create a client for `base_url`. A trailing slash is added so relative
    /// endpoint paths resolve below any path prefix.
    pub fn new(base_url: &str, client: reqwest::Client) -> ClientResult<Self> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| ClientError::invalid_url(base_url, e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            access_token: None,
        })
    }

    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token.filter(|t| !t.is_empty());
        self
    }

    fn endpoint(&self, path: &str) -> ClientResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::invalid_url(self.base_url.as_str(), e.to_string()))
    }

    /// Endpoint with a trailing, percent-encoded path segment.
    fn endpoint_with_segment(&self, path: &str, segment: &str) -> ClientResult<Url> {
        let mut url = self.endpoint(path)?;
        url.path_segments_mut()
            .map_err(|_| ClientError::invalid_url(self.base_url.as_str(), "cannot be a base"))?
            .pop_if_empty()
            .push(segment);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.access_token {
            Some(token) => builder.header(ACCESS_TOKEN_HEADER, token),
            None => builder,
        }
    }

    async fn send(
        &self,
        operation: &'static str,
        builder: RequestBuilder,
    ) -> ClientResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|source| ClientError::Transport { operation, source })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status {
            operation,
            status: status.as_u16(),
            body,
        })
    }

    async fn json<T: DeserializeOwned>(
        operation: &'static str,
        response: Response,
    ) -> ClientResult<T> {
        let bytes = response
            .bytes()
            .await
            .map_err(|source| ClientError::Transport { operation, source })?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::decode(operation, e))
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    async fn register(&self, request: &RegisterRequest) -> ClientResult<Node> {
        let url = self.endpoint("remote/node/register")?;
        debug!(url = %url, address = %request.address, "Registering node");
        let response = self
            .send("register", self.request(Method::POST, url).json(request))
            .await?;
        Self::json("register", response).await
    }

    async fn get_by_address(&self, address: &str) -> ClientResult<Node> {
        let url = self.endpoint_with_segment("remote/node/by-address/", address)?;
        let response = self
            .send("get node by address", self.request(Method::GET, url))
            .await?;
        Self::json("get node by address", response).await
    }

    async fn get_server_node(&self) -> ClientResult<Node> {
        let url = self.endpoint("remote/node/server")?;
        let response = self
            .send("get server node", self.request(Method::GET, url))
            .await?;
        Self::json("get server node", response).await
    }

    async fn get_version(&self) -> ClientResult<Version> {
        let url = self.endpoint("remote/system/version")?;
        let response = self.send("get version", self.request(Method::GET, url)).await?;
        let text = response
            .text()
            .await
            .map_err(|source| ClientError::Transport {
                operation: "get version",
                source,
            })?;
        text.parse()
    }

    async fn clear_workers(&self, node_uid: Uuid) -> ClientResult<()> {
        let url = self.endpoint_with_segment("remote/work/clear/", &node_uid.to_string())?;
        self.send("clear workers", self.request(Method::POST, url))
            .await?;
        Ok(())
    }

    async fn get_next(&self, request: &NextWorkRequest) -> ClientResult<Option<WorkItem>> {
        let url = self.endpoint("remote/work/next")?;
        let response = self
            .send("get next work", self.request(Method::POST, url).json(request))
            .await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| ClientError::Transport {
                operation: "get next work",
                source,
            })?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice::<Option<WorkItem>>(&bytes)
            .map_err(|e| ClientError::decode("get next work", e))
    }

    async fn update_job_status(
        &self,
        library_file_uid: Uuid,
        status: ProcessingStatus,
    ) -> ClientResult<()> {
        let url = self.endpoint(&format!("remote/work/{library_file_uid}/status"))?;
        self.send(
            "update job status",
            self.request(Method::POST, url).json(&StatusUpdate { status }),
        )
        .await?;
        Ok(())
    }

    async fn append_log(&self, library_file_uid: Uuid, log: &str) -> ClientResult<()> {
        let url = self.endpoint(&format!("remote/work/{library_file_uid}/log"))?;
        self.send(
            "append job log",
            self.request(Method::POST, url)
                .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(log.to_string()),
        )
        .await?;
        Ok(())
    }

    async fn get_update_binary(&self) -> ClientResult<Bytes> {
        let url = self.endpoint("remote/system/node-update")?;
        let response = self
            .send("download update", self.request(Method::GET, url))
            .await?;
        response
            .bytes()
            .await
            .map_err(|source| ClientError::Transport {
                operation: "download update",
                source,
            })
    }

    async fn get_settings(&self) -> ClientResult<NodeSettings> {
        let url = self.endpoint("remote/system/settings")?;
        let response = self
            .send("get settings", self.request(Method::GET, url))
            .await?;
        Self::json("get settings", response).await
    }
}
