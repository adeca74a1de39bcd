use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{body::Body, http::Request, Router};
use tower::ServiceExt;

use meshmap::api;
use meshmap::atlas::Atlas;
use meshmap::federation::{NodeDump, PeerClient};
use meshmap::model::{Address, Node};
use meshmap::notify::LogNotifier;
use meshmap::settings::Settings;
use meshmap::store::{MemoryStore, NodeStore, NodeTables};
use meshmap::AtlasError;

/// Answers peer fetches by routing them into in-process maps.
#[derive(Debug, Default)]
struct InProcessPeers {
    maps: HashMap<String, Router>,
}

#[async_trait]
impl PeerClient for InProcessPeers {
    async fn fetch_all(
        &self,
        peer: &str,
        _timeout: Duration,
    ) -> meshmap::Result<HashMap<String, Vec<Node>>> {
        let app = self
            .maps
            .get(peer)
            .ok_or_else(|| AtlasError::Federation(format!("{} unreachable", peer)))?;
        let response = app
            .clone()
            .oneshot(Request::get("/api/all").body(Body::empty()).unwrap())
            .await
            .map_err(|e| AtlasError::Federation(e.to_string()))?;
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| AtlasError::Federation(e.to_string()))?;
        let dump: NodeDump = serde_json::from_slice(&bytes)?;
        dump.into_nodes()
    }
}

async fn map_with_nodes(settings: Settings, addrs: &[&str]) -> (Arc<MemoryStore>, Arc<Atlas>) {
    let store = Arc::new(MemoryStore::new());
    for addr in addrs {
        let mut node = Node::new(Address::parse(addr).unwrap(), 1.0, 2.0);
        node.owner_name = format!("owner of {}", addr);
        node.owner_email = "secret@example.org".to_string();
        store.add_node(&node).await.unwrap();
    }
    let atlas = Arc::new(Atlas::new(settings, store.clone(), Arc::new(LogNotifier)));
    (store, atlas)
}

#[tokio::test]
async fn test_parent_caches_child_maps() {
    // leaf <- middle <- parent
    let (_, leaf) = map_with_nodes(Settings::default(), &["fc00::1", "fc00::2"]).await;
    let leaf_app = api::api(leaf);

    let (middle_store, middle) = map_with_nodes(
        Settings {
            child_maps: vec!["http://leaf.example.org".to_string()],
            ..Settings::default()
        },
        &["fc00::10"],
    )
    .await;
    let mut middle_peers = InProcessPeers::default();
    middle_peers
        .maps
        .insert("http://leaf.example.org".to_string(), leaf_app);
    let middle = Arc::new(Atlas::with_peer_client(
        middle.settings().as_ref().clone(),
        middle_store.clone(),
        Arc::new(LogNotifier),
        Arc::new(middle_peers),
    ));
    middle.heartbeat_tasks().await;
    assert_eq!(middle_store.count_nodes(NodeTables::Cached).await.unwrap(), 2);

    let parent_store = Arc::new(MemoryStore::new());
    let mut parent_peers = InProcessPeers::default();
    parent_peers
        .maps
        .insert("http://middle.example.org/".to_string(), api::api(middle));
    let parent = Atlas::with_peer_client(
        Settings {
            child_maps: vec![
                "http://middle.example.org/".to_string(),
                "http://offline.example.org".to_string(),
            ],
            ..Settings::default()
        },
        parent_store.clone(),
        Arc::new(LogNotifier),
        Arc::new(parent_peers),
    );

    let report = parent.refresh_cache().await.unwrap();
    assert_eq!(report.peers_ok, 1);
    assert_eq!(report.peers_failed, 1);
    assert_eq!(report.nodes_cached, 3);

    // The middle map's own nodes are attributed to it, the leaf's to the leaf
    let sources = parent_store.source_to_id().await.unwrap();
    let own = parent_store
        .get_node(&Address::parse("fc00::10").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(own.source_id, sources["http://middle.example.org/"]);
    let leaf_node = parent_store
        .get_node(&Address::parse("fc00::1").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(leaf_node.source_id, sources["http://leaf.example.org"]);
    assert!(leaf_node.owner_email.is_empty());
    assert_eq!(leaf_node.owner_name, "owner of fc00::1");

    // A second refresh rebuilds rather than duplicates
    parent.refresh_cache().await.unwrap();
    assert_eq!(parent_store.count_nodes(NodeTables::Cached).await.unwrap(), 3);
    assert_eq!(parent_store.dump_child_maps().await.unwrap().len(), 2);
}
