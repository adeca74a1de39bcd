//! In-process store. All tables sit behind one lock, so every operation
//! (including queue promotion) is atomic with respect to the others.
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::{MapSource, NodeStore, NodeTables, QueueEntry};
use crate::error::{AtlasError, Result};
use crate::model::{Address, Node, LOCAL_SOURCE, LOCAL_SOURCE_ID};

#[derive(Debug)]
struct LocalRow {
    node: Node,
    updated: i64,
}

#[derive(Debug)]
struct CaptchaRow {
    solution: String,
    expiration: i64,
}

#[derive(Debug, Default)]
struct Tables {
    nodes: BTreeMap<Address, LocalRow>,
    queue: HashMap<i64, QueueEntry>,
    cached: BTreeMap<Address, Node>,
    map_sources: Vec<MapSource>,
    captcha: HashMap<String, CaptchaRow>,
}

impl Tables {
    fn insert_local(&mut self, node: &Node, now: i64) -> Result<()> {
        if self.nodes.contains_key(&node.addr) {
            return Err(storage_error!("node {} already exists", node.addr));
        }
        let mut node = node.clone();
        node.source_id = LOCAL_SOURCE_ID;
        node.retrieve_time = 0;
        // An address lives in exactly one node table; local wins
        if self.cached.remove(&node.addr).is_some() {
            debug!("Local node {} replaces its cached copy", node.addr);
        }
        self.nodes.insert(node.addr, LocalRow { node, updated: now });
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|e| AtlasError::Storage(format!("Failed to acquire table lock: {}", e)))
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn add_node(&self, node: &Node) -> Result<()> {
        let now = Utc::now().timestamp();
        self.lock()?.insert_local(node, now)
    }

    async fn add_nodes(&self, nodes: &[Node]) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tables = self.lock()?;
        for node in nodes {
            tables.insert_local(node, now)?;
        }
        Ok(())
    }

    async fn update_node(&self, node: &Node) -> Result<bool> {
        let now = Utc::now().timestamp();
        let mut tables = self.lock()?;
        match tables.nodes.get_mut(&node.addr) {
            Some(row) => {
                // The owner's email is not editable through an update
                let owner_email = std::mem::take(&mut row.node.owner_email);
                row.node = Node {
                    owner_email,
                    source_id: LOCAL_SOURCE_ID,
                    retrieve_time: 0,
                    ..node.clone()
                };
                row.updated = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_node(&self, addr: &Address) -> Result<bool> {
        Ok(self.lock()?.nodes.remove(addr).is_some())
    }

    async fn get_node(&self, addr: &Address) -> Result<Option<Node>> {
        let tables = self.lock()?;
        if let Some(row) = tables.nodes.get(addr) {
            return Ok(Some(row.node.clone()));
        }
        Ok(tables.cached.get(addr).cloned())
    }

    async fn dump_nodes(&self) -> Result<Vec<Node>> {
        let tables = self.lock()?;
        let local = tables.nodes.values().map(|row| row.node.public());
        let cached = tables.cached.values().cloned();
        Ok(local.chain(cached).collect())
    }

    async fn dump_local(&self) -> Result<Vec<Node>> {
        let tables = self.lock()?;
        Ok(tables.nodes.values().map(|row| row.node.public()).collect())
    }

    async fn dump_changes(&self, since: i64) -> Result<Vec<Node>> {
        let tables = self.lock()?;
        let local = tables
            .nodes
            .values()
            .filter(|row| row.updated >= since)
            .map(|row| row.node.public());
        let cached = tables
            .cached
            .values()
            .filter(|node| node.retrieve_time >= since)
            .cloned();
        Ok(local.chain(cached).collect())
    }

    async fn count_nodes(&self, which: NodeTables) -> Result<usize> {
        let tables = self.lock()?;
        Ok(match which {
            NodeTables::Local => tables.nodes.len(),
            NodeTables::Cached => tables.cached.len(),
            NodeTables::Queued => tables.queue.len(),
            NodeTables::LocalAndCached => tables.nodes.len() + tables.cached.len(),
        })
    }

    async fn queue_node(&self, entry: QueueEntry) -> Result<()> {
        let mut tables = self.lock()?;
        if tables.queue.contains_key(&entry.id) {
            return Err(storage_error!("queue id {} already in use", entry.id));
        }
        // A newer submission for the same address supersedes older ones
        let addr = entry.node.addr;
        tables.queue.retain(|id, queued| {
            let superseded = queued.node.addr == addr;
            if superseded {
                debug!("Queue entry {} for {} superseded", id, addr);
            }
            !superseded
        });
        tables.queue.insert(entry.id, entry);
        Ok(())
    }

    async fn get_queued(&self, id: i64) -> Result<Option<QueueEntry>> {
        Ok(self.lock()?.queue.get(&id).cloned())
    }

    async fn promote_queued(&self, id: i64) -> Result<Option<Node>> {
        let now = Utc::now().timestamp();
        let mut tables = self.lock()?;
        let node = match tables.queue.get(&id) {
            Some(entry) => entry.node.clone(),
            None => return Ok(None),
        };
        if tables.nodes.contains_key(&node.addr) {
            return Err(validation_error!("address already registered"));
        }
        // Insert first: a failed insert leaves the queue row untouched
        tables.insert_local(&node, now)?;
        tables.queue.remove(&id);
        Ok(Some(node))
    }

    async fn delete_expired_from_queue(&self, now: i64) -> Result<usize> {
        let mut tables = self.lock()?;
        let before = tables.queue.len();
        tables.queue.retain(|_, entry| entry.expiration > now);
        Ok(before - tables.queue.len())
    }

    async fn unsent_queue_entries(&self) -> Result<Vec<(i64, String)>> {
        let tables = self.lock()?;
        Ok(tables
            .queue
            .values()
            .filter(|entry| !entry.email_sent)
            .map(|entry| (entry.id, entry.node.owner_email.clone()))
            .collect())
    }

    async fn mark_email_sent(&self, id: i64) -> Result<()> {
        match self.lock()?.queue.get_mut(&id) {
            Some(entry) => {
                entry.email_sent = true;
                Ok(())
            }
            None => Err(storage_error!("queue id {} not found", id)),
        }
    }

    async fn clear_cache(&self) -> Result<()> {
        self.lock()?.cached.clear();
        Ok(())
    }

    async fn cache_nodes(&self, nodes: &[Node], retrieved: i64) -> Result<()> {
        let mut tables = self.lock()?;
        for node in nodes {
            if tables.nodes.contains_key(&node.addr) {
                debug!("Skipping cached copy of local node {}", node.addr);
                continue;
            }
            if tables.cached.contains_key(&node.addr) {
                debug!("Skipping duplicate cached node {}", node.addr);
                continue;
            }
            // The cache table keeps only public, presentable fields
            let mut cached = Node::new(node.addr, node.latitude, node.longitude);
            cached.owner_name = node.owner_name.clone();
            cached.details = node.details.clone();
            cached.status = node.status;
            cached.source_id = node.source_id;
            cached.retrieve_time = if node.retrieve_time == 0 {
                retrieved
            } else {
                node.retrieve_time
            };
            tables.cached.insert(cached.addr, cached);
        }
        Ok(())
    }

    async fn source_to_id(&self) -> Result<HashMap<String, i64>> {
        let tables = self.lock()?;
        let mut map: HashMap<String, i64> = tables
            .map_sources
            .iter()
            .map(|source| (source.hostname.clone(), source.id))
            .collect();
        map.insert(LOCAL_SOURCE.to_string(), LOCAL_SOURCE_ID);
        Ok(map)
    }

    async fn id_to_source(&self) -> Result<HashMap<i64, String>> {
        let tables = self.lock()?;
        let mut map: HashMap<i64, String> = tables
            .map_sources
            .iter()
            .map(|source| (source.id, source.hostname.clone()))
            .collect();
        map.insert(LOCAL_SOURCE_ID, LOCAL_SOURCE.to_string());
        Ok(map)
    }

    async fn add_map_source(&self, hostname: &str, name: &str) -> Result<i64> {
        let mut tables = self.lock()?;
        if tables.map_sources.iter().any(|s| s.hostname == hostname) {
            return Err(storage_error!("map source {} already exists", hostname));
        }
        let id = tables.map_sources.iter().map(|s| s.id).max().unwrap_or(LOCAL_SOURCE_ID) + 1;
        tables.map_sources.push(MapSource {
            id,
            hostname: hostname.to_string(),
            name: name.to_string(),
        });
        Ok(id)
    }

    async fn dump_child_maps(&self) -> Result<Vec<MapSource>> {
        Ok(self.lock()?.map_sources.clone())
    }

    async fn insert_captcha(&self, id: &str, solution: &str, expiration: i64) -> Result<()> {
        self.lock()?.captcha.insert(
            id.to_string(),
            CaptchaRow {
                solution: solution.to_string(),
                expiration,
            },
        );
        Ok(())
    }

    async fn take_captcha(&self, id: &str, now: i64) -> Result<Option<String>> {
        let mut tables = self.lock()?;
        match tables.captcha.get(id) {
            Some(row) if row.expiration > now => {
                Ok(tables.captcha.remove(id).map(|row| row.solution))
            }
            _ => Ok(None),
        }
    }

    async fn peek_captcha(&self, id: &str, now: i64) -> Result<Option<String>> {
        let tables = self.lock()?;
        Ok(tables
            .captcha
            .get(id)
            .filter(|row| row.expiration > now)
            .map(|row| row.solution.clone()))
    }

    async fn delete_expired_captcha(&self, now: i64) -> Result<usize> {
        let mut tables = self.lock()?;
        let before = tables.captcha.len();
        tables.captcha.retain(|_, row| row.expiration > now);
        Ok(before - tables.captcha.len())
    }
}
