//! Bulk import of nodes from a JSON file
use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::model::{Node, LOCAL_SOURCE_ID};
use crate::store::NodeStore;

/// Parse a JSON array of nodes. Cache fields are discarded so that every
/// node is imported as local.
pub fn parse_nodes(json: &str) -> Result<Vec<Node>> {
    let mut nodes: Vec<Node> = serde_json::from_str(json)?;
    for node in nodes.iter_mut() {
        node.source_id = LOCAL_SOURCE_ID;
        node.retrieve_time = 0;
    }
    Ok(nodes)
}

pub async fn import_file(store: &dyn NodeStore, path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)?;
    let nodes = parse_nodes(&contents)?;
    store.add_nodes(&nodes).await?;
    info!("Imported {} nodes from {}", nodes.len(), path.display());
    Ok(nodes.len())
}
