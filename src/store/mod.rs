//! Persistence gateway over the node, queue, cache, map-source and
//! CAPTCHA tables
use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Address, Node};

pub mod memory;

pub use memory::MemoryStore;

/// A node waiting in the verification queue.
#[derive(Clone, Debug, PartialEq)]
pub struct QueueEntry {
    /// Random positive 63-bit confirmation ID
    pub id: i64,
    pub node: Node,
    /// Unix seconds after which the entry is swept
    pub expiration: i64,
    pub email_sent: bool,
}

/// A peer map known to this instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MapSource {
    #[serde(rename = "ID")]
    pub id: i64,
    pub hostname: String,
    pub name: String,
}

/// Which tables a node count covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeTables {
    Local,
    Cached,
    Queued,
    LocalAndCached,
}

#[async_trait]
pub trait NodeStore: Send + Sync + std::fmt::Debug {
    /// Insert a node into the local table, stamped with the current time.
    async fn add_node(&self, node: &Node) -> Result<()>;
    async fn add_nodes(&self, nodes: &[Node]) -> Result<()>;
    /// Replace the local node with the same address. Returns false if
    /// there was none.
    async fn update_node(&self, node: &Node) -> Result<bool>;
    /// Returns false if there was no local node with that address.
    async fn delete_node(&self, addr: &Address) -> Result<bool>;
    /// Look a node up in the local table, then the cache. Cached nodes
    /// carry no email address.
    async fn get_node(&self, addr: &Address) -> Result<Option<Node>>;

    /// Every local and cached node, without email addresses.
    async fn dump_nodes(&self) -> Result<Vec<Node>>;
    async fn dump_local(&self) -> Result<Vec<Node>>;
    /// Local nodes updated, or cached nodes retrieved, at or after `since`.
    async fn dump_changes(&self, since: i64) -> Result<Vec<Node>>;
    async fn count_nodes(&self, tables: NodeTables) -> Result<usize>;

    /// Queue a submission. Older entries for the same address are dropped.
    async fn queue_node(&self, entry: QueueEntry) -> Result<()>;
    async fn get_queued(&self, id: i64) -> Result<Option<QueueEntry>>;
    /// Move a queued node into the local table as one step. Returns None
    /// if the ID is unknown, and a validation error if the address is
    /// already local. On failure the queue entry is left in place.
    async fn promote_queued(&self, id: i64) -> Result<Option<Node>>;
    async fn delete_expired_from_queue(&self, now: i64) -> Result<usize>;
    /// `(id, email)` of queue entries whose notice was never sent.
    async fn unsent_queue_entries(&self) -> Result<Vec<(i64, String)>>;
    async fn mark_email_sent(&self, id: i64) -> Result<()>;

    async fn clear_cache(&self) -> Result<()>;
    /// Insert peer nodes. Addresses already local or already cached are
    /// skipped.
    async fn cache_nodes(&self, nodes: &[Node], retrieved: i64) -> Result<()>;

    /// Hostname to ID, including "local" as 0.
    async fn source_to_id(&self) -> Result<HashMap<String, i64>>;
    /// ID to hostname, including 0 as "local".
    async fn id_to_source(&self) -> Result<HashMap<i64, String>>;
    /// Record a new peer map and return its newly allocated ID.
    async fn add_map_source(&self, hostname: &str, name: &str) -> Result<i64>;
    async fn dump_child_maps(&self) -> Result<Vec<MapSource>>;

    async fn insert_captcha(&self, id: &str, solution: &str, expiration: i64) -> Result<()>;
    /// Remove and return the solution if the challenge exists and has
    /// not expired.
    async fn take_captcha(&self, id: &str, now: i64) -> Result<Option<String>>;
    /// The solution of a live challenge, leaving it in place for rendering.
    async fn peek_captcha(&self, id: &str, now: i64) -> Result<Option<String>>;
    async fn delete_expired_captcha(&self, now: i64) -> Result<usize>;
}
