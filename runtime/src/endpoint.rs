//! Network endpoint resolution.
//!
//! Endpoints are owned by the host network service; the agent only looks
//! them up by name. `EndpointStore` reads them from the JSON file that the
//! network service maintains and never writes to it.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use uvmagent_core::error::{AgentError, Result};
use uvmagent_core::network::NetworkEndpoint;

/// Looks up network endpoints by name.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    /// Resolve `name`, failing with `EndpointNotFound` if it does not exist.
    async fn endpoint_by_name(&self, name: &str) -> Result<NetworkEndpoint>;
}

/// File-backed endpoint table, re-read on every lookup.
#[derive(Debug)]
pub struct EndpointStore {
    /// Path to the JSON file.
    path: PathBuf,
}

/// On-disk layout of the endpoints file.
#[derive(Debug, serde::Deserialize, Default)]
struct EndpointsFile {
    #[serde(default)]
    endpoints: HashMap<String, NetworkEndpoint>,
}

impl EndpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All endpoints keyed by name. A missing file has none.
    pub async fn load(&self) -> Result<HashMap<String, NetworkEndpoint>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(AgentError::Other(format!(
                    "failed to read endpoints file {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let file: EndpointsFile = serde_json::from_str(&data).map_err(|e| {
            AgentError::SerializationError(format!(
                "invalid endpoints file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(file.endpoints)
    }
}

#[async_trait]
impl EndpointResolver for EndpointStore {
    async fn endpoint_by_name(&self, name: &str) -> Result<NetworkEndpoint> {
        self.load()
            .await?
            .remove(name)
            .ok_or_else(|| AgentError::EndpointNotFound {
                name: name.to_string(),
            })
    }
}
