//! Federation cache: mirrors the nodes of peer maps ("child maps") into
//! the local cache table, attributing each to a local source ID.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument};

pub mod client;

pub use client::{HttpPeerClient, NodeDump, PeerClient};

use crate::error::Result;
use crate::model::{Node, LOCAL_SOURCE};
use crate::store::{NodeStore, NodeTables};

/// Summary of one refresh cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub peers_ok: usize,
    pub peers_failed: usize,
    pub nodes_cached: usize,
}

/// Hostname to source ID, shared by the fetch tasks of one cycle.
/// Checking for and allocating a new ID happen under the same lock.
type SourceTable = Arc<Mutex<HashMap<String, i64>>>;

#[derive(Clone, Debug)]
pub struct FederationCache {
    store: Arc<dyn NodeStore>,
    client: Arc<dyn PeerClient>,
}

impl FederationCache {
    pub fn new(store: Arc<dyn NodeStore>, client: Arc<dyn PeerClient>) -> Self {
        Self { store, client }
    }

    /// Replace the cache with a fresh dump from every peer. A peer that
    /// fails is logged and left out.
    #[instrument(skip(self, peers), fields(peers = peers.len()), level = "debug")]
    pub async fn refresh(&self, peers: &[String], timeout: Duration) -> Result<RefreshReport> {
        if peers.is_empty() {
            return Ok(RefreshReport::default());
        }

        self.store.clear_cache().await?;

        let sources: SourceTable = Arc::new(Mutex::new(self.store.source_to_id().await?));
        let collected: Arc<Mutex<Vec<Node>>> = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::with_capacity(peers.len());
        for peer in peers {
            let peer = peer.clone();
            let store = self.store.clone();
            let client = self.client.clone();
            let sources = sources.clone();
            let collected = collected.clone();
            handles.push(tokio::spawn(async move {
                match fetch_peer(&peer, timeout, store, client, sources).await {
                    Ok(nodes) => {
                        debug!("Retrieved {} nodes from {}", nodes.len(), peer);
                        collected.lock().await.extend(nodes);
                        true
                    }
                    Err(e) => {
                        error!("Caching {:?} produced: {}", peer, e);
                        false
                    }
                }
            }));
        }

        let mut report = RefreshReport::default();
        for handle in handles {
            match handle.await {
                Ok(true) => report.peers_ok += 1,
                Ok(false) => report.peers_failed += 1,
                Err(e) => {
                    error!("Peer fetch task failed: {}", e);
                    report.peers_failed += 1;
                }
            }
        }

        let nodes = std::mem::take(&mut *collected.lock().await);
        self.store
            .cache_nodes(&nodes, Utc::now().timestamp())
            .await?;
        // Echoes of our own nodes and duplicates are not stored
        report.nodes_cached = self.store.count_nodes(NodeTables::Cached).await?;
        info!(
            "Map cache refreshed: {} nodes from {} peers ({} failed)",
            report.nodes_cached, report.peers_ok, report.peers_failed
        );
        Ok(report)
    }

    /// Group nodes by the hostname of the map they came from.
    pub async fn cache_format_nodes(&self, nodes: Vec<Node>) -> Result<BTreeMap<String, Vec<Node>>> {
        let id_to_source = self.store.id_to_source().await?;
        Ok(group_by_source(nodes, &id_to_source))
    }
}

/// Group nodes under their source hostname, keeping input order within
/// each group. Unknown source IDs group under the empty hostname.
pub fn group_by_source(
    nodes: Vec<Node>,
    id_to_source: &HashMap<i64, String>,
) -> BTreeMap<String, Vec<Node>> {
    let mut grouped: BTreeMap<String, Vec<Node>> = BTreeMap::new();
    for node in nodes {
        let hostname = id_to_source.get(&node.source_id).cloned().unwrap_or_default();
        grouped.entry(hostname).or_default().push(node);
    }
    grouped
}

/// Fetch one peer's dump and tag every node with a local source ID.
async fn fetch_peer(
    peer: &str,
    timeout: Duration,
    store: Arc<dyn NodeStore>,
    client: Arc<dyn PeerClient>,
    sources: SourceTable,
) -> Result<Vec<Node>> {
    let dump = client.fetch_all(peer, timeout).await?;

    let mut nodes = Vec::new();
    for (source, remote_nodes) in dump {
        // "local" is relative to whichever map answered
        let hostname = if source == LOCAL_SOURCE {
            peer.to_string()
        } else {
            source
        };
        let id = resolve_source(&hostname, &store, &sources).await?;
        nodes.extend(remote_nodes.into_iter().map(|mut node| {
            node.source_id = id;
            node
        }));
    }
    Ok(nodes)
}

async fn resolve_source(
    hostname: &str,
    store: &Arc<dyn NodeStore>,
    sources: &SourceTable,
) -> Result<i64> {
    let mut sources = sources.lock().await;
    if let Some(id) = sources.get(hostname) {
        return Ok(*id);
    }
    let id = store.add_map_source(hostname, "").await?;
    sources.insert(hostname.to_string(), id);
    debug!("Discovered new source map {:?}, ID {}", hostname, id);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AtlasError;
    use crate::model::{Address, LOCAL_SOURCE_ID};
    use crate::store::{MemoryStore, NodeTables};
    use async_trait::async_trait;

    /// Serves canned dumps; peers missing from the table fail.
    #[derive(Debug, Default)]
    struct CannedPeers {
        dumps: HashMap<String, HashMap<String, Vec<Node>>>,
    }

    impl CannedPeers {
        fn with(mut self, peer: &str, source: &str, addrs: &[&str]) -> Self {
            let nodes = addrs.iter().map(|a| node(a, 0)).collect();
            self.dumps
                .entry(peer.to_string())
                .or_default()
                .insert(source.to_string(), nodes);
            self
        }
    }

    #[async_trait]
    impl PeerClient for CannedPeers {
        async fn fetch_all(
            &self,
            peer: &str,
            _timeout: Duration,
        ) -> Result<HashMap<String, Vec<Node>>> {
            tokio::task::yield_now().await;
            self.dumps
                .get(peer)
                .cloned()
                .ok_or_else(|| AtlasError::Federation(format!("{} unreachable", peer)))
        }
    }

    fn node(addr: &str, source_id: i64) -> Node {
        let mut node = Node::new(Address::parse(addr).unwrap(), 0.0, 0.0);
        node.source_id = source_id;
        node
    }

    #[test]
    fn test_group_by_source() {
        let mut names = HashMap::new();
        names.insert(LOCAL_SOURCE_ID, "local".to_string());
        names.insert(1, "http://a.example.org".to_string());

        let grouped = group_by_source(
            vec![node("fc00::1", 0), node("fc00::2", 1), node("fc00::3", 0), node("fc00::4", 9)],
            &names,
        );
        assert_eq!(grouped["local"].len(), 2);
        assert_eq!(grouped["local"][1].addr, Address::parse("fc00::3").unwrap());
        assert_eq!(grouped["http://a.example.org"].len(), 1);
        assert_eq!(grouped[""].len(), 1);
    }

    #[tokio::test]
    async fn test_local_is_rewritten_to_peer() {
        let store = Arc::new(MemoryStore::new());
        let peers = CannedPeers::default()
            .with("http://a.example.org/", "local", &["fc00::1", "fc00::2"])
            .with("http://a.example.org/", "http://c.example.org", &["fc00::3"]);
        let cache = FederationCache::new(store.clone(), Arc::new(peers));

        let report = cache
            .refresh(&["http://a.example.org/".to_string()], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(report.nodes_cached, 3);

        let sources = store.source_to_id().await.unwrap();
        assert!(sources.contains_key("http://a.example.org/"));
        assert!(sources.contains_key("http://c.example.org"));
        assert!(!sources.contains_key(""));

        let cached = store.get_node(&Address::parse("fc00::1").unwrap()).await.unwrap().unwrap();
        assert_eq!(cached.source_id, sources["http://a.example.org/"]);
        assert!(cached.retrieve_time > 0);
    }

    #[tokio::test]
    async fn test_failed_peer_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let peers = CannedPeers::default()
            .with("http://a", "local", &["fc00::1"])
            .with("http://b", "local", &["fc00::2"]);
        let cache = FederationCache::new(store.clone(), Arc::new(peers));

        let report = cache
            .refresh(
                &["http://a".to_string(), "http://down".to_string(), "http://b".to_string()],
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(report.peers_ok, 2);
        assert_eq!(report.peers_failed, 1);
        assert_eq!(store.count_nodes(NodeTables::Cached).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_refresh_replaces_previous_cache() {
        let store = Arc::new(MemoryStore::new());
        store
            .cache_nodes(&[node("fc00::9", 1)], 1)
            .await
            .unwrap();
        let peers = CannedPeers::default().with("http://a", "local", &["fc00::1"]);
        let cache = FederationCache::new(store.clone(), Arc::new(peers));
        cache.refresh(&["http://a".to_string()], Duration::from_secs(1)).await.unwrap();

        assert!(store.get_node(&Address::parse("fc00::9").unwrap()).await.unwrap().is_none());
        assert_eq!(store.count_nodes(NodeTables::Cached).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_own_nodes_echoed_back_stay_local() {
        // A child that also caches us reports our node among its own
        let store = Arc::new(MemoryStore::new());
        let mut own = node("fc00::1", LOCAL_SOURCE_ID);
        own.owner_email = "owner@example.org".to_string();
        store.add_node(&own).await.unwrap();
        let peers = CannedPeers::default()
            .with("http://child", "local", &["fc00::2"])
            .with("http://child", "http://parent", &["fc00::1"]);
        let cache = FederationCache::new(store.clone(), Arc::new(peers));

        let report = cache
            .refresh(&["http://child".to_string()], Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(report.nodes_cached, 1);
        assert_eq!(store.count_nodes(NodeTables::Cached).await.unwrap(), 1);

        let all = store.dump_nodes().await.unwrap();
        assert_eq!(all.len(), 2);
        let mine = store.get_node(&own.addr).await.unwrap().unwrap();
        assert!(!mine.is_cached());
        assert_eq!(mine.owner_email, "owner@example.org");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_shared_source_allocated_once() {
        // every peer reports the same third-party map
        for _ in 0..50 {
            let store = Arc::new(MemoryStore::new());
            let mut peers = CannedPeers::default();
            let mut names = Vec::new();
            for i in 0..8 {
                let peer = format!("http://peer{}.example.org", i);
                let addr = format!("fc00::{:x}", i + 1);
                let shared = format!("fc01::{:x}", i + 1);
                peers = peers
                    .with(&peer, "local", &[addr.as_str()])
                    .with(&peer, "http://shared.example.org", &[shared.as_str()]);
                names.push(peer);
            }
            let cache = FederationCache::new(store.clone(), Arc::new(peers));
            cache.refresh(&names, Duration::from_secs(1)).await.unwrap();

            // local + 8 peers + shared
            let maps = store.dump_child_maps().await.unwrap();
            assert_eq!(maps.len(), 9);
            let sources = store.source_to_id().await.unwrap();
            assert_eq!(sources.len(), 10);
            assert_eq!(store.count_nodes(NodeTables::Cached).await.unwrap(), 16);
        }
    }
}
