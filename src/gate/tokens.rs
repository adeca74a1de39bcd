//! Short-lived, single-use tokens bound to the requesting address
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use crate::model::Address;

/// How long a token stays valid after issue.
pub const TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Debug)]
struct IssuedToken {
    address: Address,
    issued: Instant,
}

/// In-memory token table. Tokens are lost on restart.
#[derive(Debug)]
pub struct TokenTable {
    active: DashMap<u32, IssuedToken>,
    ttl: Duration,
}

impl Default for TokenTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenTable {
    pub fn new() -> Self {
        Self::with_ttl(TOKEN_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            active: DashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Issue a fresh random token for `address`.
    pub fn issue(&self, address: Address) -> u32 {
        let issued = IssuedToken {
            address,
            issued: Instant::now(),
        };
        loop {
            let token = OsRng.next_u32();
            if let dashmap::Entry::Vacant(slot) = self.active.entry(token) {
                slot.insert(issued);
                return token;
            }
        }
    }

    /// Consume a token. It is removed whether or not the check passes.
    pub fn consume(&self, address: &Address, token: u32) -> bool {
        self.consume_at(address, token, Instant::now())
    }

    /// Consume a token as of `now`.
    pub fn consume_at(&self, address: &Address, token: u32, now: Instant) -> bool {
        let Some((_, issued)) = self.active.remove(&token) else {
            return false;
        };
        if now.saturating_duration_since(issued.issued) > self.ttl {
            debug!("Token for {} expired", issued.address);
            return false;
        }
        issued.address == *address
    }

    /// Drop tokens that can no longer be consumed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.active.len();
        self.active
            .retain(|_, issued| now.saturating_duration_since(issued.issued) <= self.ttl);
        before.saturating_sub(self.active.len())
    }
}
