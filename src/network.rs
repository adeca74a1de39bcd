//! Peering data from the mesh network's own routing layer. The concrete
//! oracle is supplied by the embedding application.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::model::Address;
use crate::settings::Settings;

/// The addresses directly connected to `source`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peers {
    pub source: Address,
    pub destinations: Vec<Address>,
}

/// An undirected link between two nodes, lesser address first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pair {
    #[serde(rename = "A")]
    pub a: Address,
    #[serde(rename = "B")]
    pub b: Address,
}

#[async_trait]
pub trait Network: Send + Sync + std::fmt::Debug {
    /// Open whatever admin connection the oracle needs.
    async fn connect(&self, settings: &Settings) -> Result<()>;

    async fn peers_of(&self, addr: &Address) -> Result<Option<Peers>>;

    /// Peers of every address, in the order given.
    async fn peers_of_all(&self, addrs: &[Address]) -> Result<Vec<Option<Peers>>> {
        let mut all = Vec::with_capacity(addrs.len());
        for addr in addrs {
            all.push(self.peers_of(addr).await?);
        }
        Ok(all)
    }
}

/// Reduce peer lists to unique links. Each link is seen from both ends,
/// so only the direction from the lesser address is kept.
pub fn flatten_peers(peers: &[Option<Peers>]) -> Vec<Pair> {
    let mut pairs: Vec<Pair> = peers
        .iter()
        .flatten()
        .flat_map(|p| {
            p.destinations
                .iter()
                .filter(|d| p.source < **d)
                .map(|d| Pair { a: p.source, b: *d })
        })
        .collect();
    pairs.sort();
    pairs.dedup();
    pairs
}

/// Ask the oracle for the peers of every address and flatten the result.
pub async fn known_pairs(
    network: &dyn Network,
    settings: &Settings,
    addrs: &[Address],
) -> Result<Vec<Pair>> {
    network.connect(settings).await?;
    let peers = network.peers_of_all(addrs).await?;
    let pairs = flatten_peers(&peers);
    info!("Peering data refreshed: {} links", pairs.len());
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[derive(Debug)]
    struct Table(HashMap<Address, Vec<Address>>);

    #[async_trait]
    impl Network for Table {
        async fn connect(&self, _settings: &Settings) -> Result<()> {
            Ok(())
        }

        async fn peers_of(&self, addr: &Address) -> Result<Option<Peers>> {
            Ok(self.0.get(addr).map(|d| Peers {
                source: *addr,
                destinations: d.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn test_links_are_reported_once() {
        let (a, b, c) = (addr("fc00::1"), addr("fc00::2"), addr("fc00::3"));
        let mut links = HashMap::new();
        links.insert(a, vec![b, c]);
        links.insert(b, vec![a]);
        links.insert(c, vec![a]);
        let network = Table(links);

        let pairs = known_pairs(&network, &Settings::default(), &[a, b, c, addr("fc00::4")])
            .await
            .unwrap();
        assert_eq!(pairs, vec![Pair { a, b }, Pair { a, b: c }]);
    }

    #[test]
    fn test_one_sided_link_from_greater_is_dropped() {
        let peers = vec![Some(Peers {
            source: addr("fc00::2"),
            destinations: vec![addr("fc00::1")],
        })];
        assert!(flatten_peers(&peers).is_empty());
    }
}
