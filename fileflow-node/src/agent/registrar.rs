//! Startup registration with the control plane.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::state::NodeState;
use crate::client::{
    ClientError, ClientResult, ControlPlane, HttpControlPlane, Node, RegisterRequest, Version,
    discover,
};
use crate::config::{NodeConfig, NodeConfigStore};
use crate::{Error, Result};

/// Delay between failed registration attempts.
pub const REGISTRATION_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// A successful registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub base_url: String,
    pub node: Node,
    pub client: Arc<HttpControlPlane>,
}

/// Registers this node, discovering the control plane on first start.
pub struct Registrar {
    config: NodeConfig,
    store: NodeConfigStore,
    state: Arc<NodeState>,
    http: reqwest::Client,
    retry_interval: Duration,
}

impl Registrar {
    pub fn new(
        config: NodeConfig,
        store: NodeConfigStore,
        state: Arc<NodeState>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            config,
            store,
            state,
            http,
            retry_interval: REGISTRATION_RETRY_INTERVAL,
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Configuration including any server URL learned by registering.
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Registration payload describing this node.
    pub fn request(&self) -> RegisterRequest {
        RegisterRequest {
            address: self.config.node_name.clone(),
            temp_path: self.config.temp_path.to_string_lossy().into_owned(),
            flow_runners: self.config.flow_runners,
            enabled: self.config.enabled,
            mappings: self.config.mappings.clone(),
            version: Version::current().to_string(),
            operating_system: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
        }
    }

    fn connect(&self, base_url: &str) -> ClientResult<HttpControlPlane> {
        Ok(HttpControlPlane::new(base_url, self.http.clone())?
            .with_access_token(self.config.access_token.clone()))
    }

    /// Register until it succeeds. Returns `None` if shutdown was requested first.
    pub async fn register(&mut self) -> Option<Registration> {
        let shutdown = self.state.shutdown_token();
        loop {
            match self.register_once().await {
                Ok(registration) => return Some(registration),
                Err(e) => warn!(
                    error = %e,
                    retry_in_secs = self.retry_interval.as_secs(),
                    "Registration failed"
                ),
            }

            tokio::select! {
                _ = shutdown.cancelled() => return None,
                _ = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }

    /// One registration attempt, including discovery when no URL is known.
    pub async fn register_once(&mut self) -> Result<Registration> {
        let request = self.request();
        let internal = self.config.internal;

        let (base_url, (client, node)) = match self.config.server_url.clone() {
            Some(url) => {
                let client = self.connect(&url)?;
                let node = register_with(&client, &request, internal).await?;
                (client.base_url().to_string(), (client, node))
            }
            None => {
                let address = self
                    .config
                    .server_address
                    .clone()
                    .ok_or_else(|| Error::config("no control plane address configured"))?;
                discover(&address, |url| {
                    let client = self.connect(&url);
                    let request = request.clone();
                    async move {
                        let client = client?;
                        let node = register_with(&client, &request, internal).await?;
                        Ok::<_, ClientError>((client, node))
                    }
                })
                .await?
            }
        };

        info!(
            node = %node.name,
            node_uid = %node.uid,
            server = %base_url,
            "Registered with control plane"
        );
        self.persist_url(&base_url).await;
        if !node.temp_path.trim().is_empty() {
            self.state.set_temp_path(Path::new(&node.temp_path));
        }
        self.state.set_registered(true);

        Ok(Registration {
            base_url,
            node,
            client: Arc::new(client),
        })
    }

    async fn persist_url(&mut self, base_url: &str) {
        if self.config.server_url.as_deref() == Some(base_url) {
            return;
        }
        self.config.server_url = Some(base_url.to_string());
        if let Err(e) = self.store.save(&self.config).await {
            warn!(error = %e, "Failed to persist control plane URL");
        }
    }
}

async fn register_with(
    client: &HttpControlPlane,
    request: &RegisterRequest,
    internal: bool,
) -> ClientResult<Node> {
    if internal {
        client.get_server_node().await
    } else {
        client.register(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_http_client;
    use tempfile::TempDir;

    fn registrar(temp_dir: &TempDir, config: NodeConfig) -> Registrar {
        Registrar::new(
            config,
            NodeConfigStore::in_dir(temp_dir.path()),
            Arc::new(NodeState::new()),
            test_http_client(),
        )
    }

    #[test]
    fn test_request_describes_node() {
        let temp_dir = TempDir::new().unwrap();
        let config = NodeConfig {
            node_name: "render-box".to_string(),
            flow_runners: 3,
            ..Default::default()
        };
        let request = registrar(&temp_dir, config).request();

        assert_eq!(request.address, "render-box");
        assert_eq!(request.flow_runners, 3);
        assert_eq!(request.operating_system, std::env::consts::OS);
        assert_eq!(request.version, Version::current().to_string());
    }

    #[tokio::test]
    async fn test_missing_address_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut registrar = registrar(&temp_dir, NodeConfig::default());
        assert!(matches!(
            registrar.register_once().await,
            Err(Error::Configuration(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_stops_on_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let state = Arc::new(NodeState::new());
        let mut registrar = Registrar::new(
            NodeConfig::default(),
            NodeConfigStore::in_dir(temp_dir.path()),
            state.clone(),
            test_http_client(),
        );

        let shutdown = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            state.request_shutdown();
        });

        assert!(registrar.register().await.is_none());
        shutdown.await.unwrap();
    }
}
