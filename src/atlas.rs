//! The shared application core handed to the web layer and the heartbeat.
use std::sync::{Arc, RwLock};

use tracing::{debug, error, info};

use crate::federation::{FederationCache, HttpPeerClient, PeerClient, RefreshReport};
use crate::gate::{CaptchaGate, TokenTable};
use crate::network::{self, Network, Pair};
use crate::notify::Notifier;
use crate::queue::VerificationQueue;
use crate::settings::Settings;
use crate::store::NodeStore;

#[derive(Debug)]
pub struct Atlas {
    settings: RwLock<Arc<Settings>>,
    pub store: Arc<dyn NodeStore>,
    pub notifier: Arc<dyn Notifier>,
    pub tokens: TokenTable,
    pub captcha: CaptchaGate,
    pub queue: VerificationQueue,
    pub federation: FederationCache,
    network: Option<Arc<dyn Network>>,
    known_peers: RwLock<Vec<Pair>>,
}

impl Atlas {
    pub fn new(settings: Settings, store: Arc<dyn NodeStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_peer_client(settings, store, notifier, Arc::new(HttpPeerClient::new()))
    }

    pub fn with_peer_client(
        settings: Settings,
        store: Arc<dyn NodeStore>,
        notifier: Arc<dyn Notifier>,
        client: Arc<dyn PeerClient>,
    ) -> Self {
        Self {
            settings: RwLock::new(Arc::new(settings)),
            tokens: TokenTable::new(),
            captcha: CaptchaGate::new(store.clone()),
            queue: VerificationQueue::new(store.clone(), notifier.clone()),
            federation: FederationCache::new(store.clone(), client),
            store,
            notifier,
            network: None,
            known_peers: RwLock::new(Vec::new()),
        }
    }

    pub fn with_network(mut self, network: Arc<dyn Network>) -> Self {
        self.network = Some(network);
        self
    }

    /// Snapshot of the current settings. A reload does not affect
    /// snapshots already taken.
    pub fn settings(&self) -> Arc<Settings> {
        self.settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn replace_settings(&self, settings: Settings) {
        let mut current = self
            .settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = Arc::new(settings);
    }

    pub fn read_only(&self) -> bool {
        self.settings().database.read_only
    }

    pub fn has_network(&self) -> bool {
        self.network.is_some()
    }

    /// Links between local nodes, as of the last heartbeat.
    pub fn known_peers(&self) -> Vec<Pair> {
        self.known_peers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub async fn refresh_cache(&self) -> crate::error::Result<RefreshReport> {
        let settings = self.settings();
        self.federation
            .refresh(&settings.child_maps, settings.peer_fetch_timeout())
            .await
    }

    async fn refresh_peers(&self, network: &dyn Network) -> crate::error::Result<()> {
        let settings = self.settings();
        let addrs: Vec<_> = self
            .store
            .dump_local()
            .await?
            .into_iter()
            .map(|node| node.addr)
            .collect();
        let pairs = network::known_pairs(network, &settings, &addrs).await?;
        *self
            .known_peers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = pairs;
        Ok(())
    }

    /// One round of periodic maintenance. A failing step is logged and
    /// does not stop the steps after it.
    pub async fn heartbeat_tasks(&self) {
        debug!("Heartbeat");
        let settings = self.settings();

        if let Err(e) = self.queue.delete_expired().await {
            error!("Could not remove expired queue entries: {}", e);
        }

        if !settings.child_maps.is_empty() {
            if let Err(e) = self.refresh_cache().await {
                error!("Could not refresh map cache: {}", e);
            }
        }

        if let Some(network) = &self.network {
            if let Err(e) = self.refresh_peers(network.as_ref()).await {
                error!("Error listing peers: {}", e);
            }
        }

        if let Err(e) = self.captcha.sweep_expired().await {
            error!("Could not remove expired CAPTCHAs: {}", e);
        }
        let swept = self.tokens.sweep_expired();
        if swept > 0 {
            debug!("Removed {} stale tokens", swept);
        }

        if settings.smtp.is_some() {
            match self.queue.resend_verification_emails(&settings).await {
                Ok(0) => {}
                Ok(sent) => info!("Resent {} verification emails", sent),
                Err(e) => error!("Could not resend verification emails: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Address, Node};
    use crate::notify::LogNotifier;
    use crate::store::{MemoryStore, QueueEntry};

    fn atlas(settings: Settings) -> (Arc<MemoryStore>, Atlas) {
        let store = Arc::new(MemoryStore::new());
        let atlas = Atlas::new(settings, store.clone(), Arc::new(LogNotifier));
        (store, atlas)
    }

    #[test]
    fn test_replace_settings_keeps_old_snapshots() {
        let (_, atlas) = atlas(Settings::default());
        let before = atlas.settings();
        atlas.replace_settings(Settings {
            name: "reloaded".to_string(),
            ..Settings::default()
        });
        assert_eq!(before.name, "meshmap");
        assert_eq!(atlas.settings().name, "reloaded");
    }

    #[tokio::test]
    async fn test_heartbeat_expires_queue_and_resends() {
        let settings = Settings {
            smtp: Some(Default::default()),
            ..Settings::default()
        };
        let (store, atlas) = atlas(settings);
        let node = Node::new(Address::parse("fc00::1").unwrap(), 0.0, 0.0);
        store
            .queue_node(QueueEntry {
                id: 1,
                node: node.clone(),
                expiration: 0,
                email_sent: false,
            })
            .await
            .unwrap();
        store
            .queue_node(QueueEntry {
                id: 2,
                node: Node::new(Address::parse("fc00::2").unwrap(), 0.0, 0.0),
                expiration: i64::MAX,
                email_sent: false,
            })
            .await
            .unwrap();

        atlas.heartbeat_tasks().await;

        assert!(store.get_queued(1).await.unwrap().is_none());
        assert!(store.get_queued(2).await.unwrap().unwrap().email_sent);
    }
}
