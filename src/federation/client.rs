use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AtlasError, Result};
use crate::model::Node;

/// Response body of a peer's `/api/all`.
#[derive(Debug, Deserialize)]
pub struct NodeDump {
    #[serde(default)]
    pub data: Option<HashMap<String, Vec<Node>>>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl NodeDump {
    /// Nodes keyed by the answering peer's own source hostnames.
    pub fn into_nodes(self) -> Result<HashMap<String, Vec<Node>>> {
        match self.error {
            Some(err) if !err.is_null() => Err(AtlasError::Federation(format!(
                "remote reported error: {}",
                err
            ))),
            _ => Ok(self.data.unwrap_or_default()),
        }
    }
}

/// Retrieves full node dumps from peer maps.
#[async_trait]
pub trait PeerClient: Send + Sync + std::fmt::Debug {
    async fn fetch_all(&self, peer: &str, timeout: Duration)
        -> Result<HashMap<String, Vec<Node>>>;
}

#[derive(Clone, Debug, Default)]
pub struct HttpPeerClient {
    client: reqwest::Client,
}

impl HttpPeerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dump_url(peer: &str) -> String {
        format!("{}/api/all", peer.trim_end_matches('/'))
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn fetch_all(
        &self,
        peer: &str,
        timeout: Duration,
    ) -> Result<HashMap<String, Vec<Node>>> {
        let dump: NodeDump = self
            .client
            .get(Self::dump_url(peer))
            .timeout(timeout)
            .send()
            .await?
            .json()
            .await?;
        dump.into_nodes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_url() {
        assert_eq!(
            HttpPeerClient::dump_url("http://map.example.org/"),
            "http://map.example.org/api/all"
        );
        assert_eq!(
            HttpPeerClient::dump_url("http://map.example.org/atlas"),
            "http://map.example.org/atlas/api/all"
        );
    }

    #[test]
    fn test_decode_dump() {
        let dump: NodeDump = serde_json::from_str(
            r#"{"data": {"local": [{"Addr": "fc00::1", "OwnerName": "a",
                "Latitude": 1.0, "Longitude": 2.0, "Status": 0}]}, "error": null}"#,
        )
        .unwrap();
        let nodes = dump.into_nodes().unwrap();
        assert_eq!(nodes["local"].len(), 1);
    }

    #[test]
    fn test_remote_error() {
        let dump: NodeDump =
            serde_json::from_str(r#"{"data": null, "error": "database locked"}"#).unwrap();
        assert!(matches!(dump.into_nodes(), Err(AtlasError::Federation(_))));
    }
}
