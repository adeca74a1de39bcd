//! Verification queue: newly submitted nodes wait here until their owner
//! follows the emailed confirmation link, or until they expire.
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{AtlasError, Result};
use crate::gate::Caller;
use crate::model::{Address, Node};
use crate::notify::{Notifier, VERIFICATION_TEMPLATE};
use crate::settings::{Settings, VerifySettings};
use crate::store::{NodeStore, QueueEntry};

/// Result of submitting a node for registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    /// Inserted straight into the live table.
    Registered,
    /// Queued, and the confirmation email went out.
    QueuedEmailed(i64),
    /// Queued, but the email failed; the heartbeat will resend it.
    QueuedEmailPending(i64),
}

impl Registration {
    pub fn message(&self) -> &'static str {
        match self {
            Registration::Registered => "node registered",
            Registration::QueuedEmailed(_) => "verification email sent",
            Registration::QueuedEmailPending(_) => "verification email will be resent",
        }
    }
}

/// Result of following a confirmation link.
#[derive(Debug)]
pub enum VerifyOutcome {
    /// Moved into the live table.
    Verified(Address),
    /// No such queue entry: wrong, already used, or expired.
    InvalidId,
    /// A verification check failed. The entry stays queued.
    Rejected(AtlasError),
}

/// Random positive 63-bit ID from the OS random source.
pub fn new_verification_id() -> i64 {
    loop {
        let id = (OsRng.next_u64() >> 1) as i64;
        if id > 0 {
            return id;
        }
    }
}

/// Registration-time checks, run before a node may enter the queue.
pub fn verify_registrant(node: &Node, verify: &VerifySettings) -> Result<()> {
    if let Some(netmask) = &verify.netmask {
        if !netmask.contains(&node.addr) {
            return Err(policy_error!(
                "verify: Node address not within configured netmask: {}",
                netmask
            ));
        }
    }
    Ok(())
}

/// Verification-time checks against the request following the link.
pub fn verify_request(node: &Node, remote: &Address, verify: &VerifySettings) -> Result<()> {
    if verify.from_node && node.addr != *remote {
        return Err(policy_error!(
            "verify: remote address does not match Node address"
        ));
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct VerificationQueue {
    store: Arc<dyn NodeStore>,
    notifier: Arc<dyn Notifier>,
}

impl VerificationQueue {
    pub fn new(store: Arc<dyn NodeStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub async fn queue_node(
        &self,
        id: i64,
        email_sent: bool,
        grace: Duration,
        node: &Node,
    ) -> Result<()> {
        let expiration = Utc::now().timestamp() + grace.as_secs() as i64;
        self.store
            .queue_node(QueueEntry {
                id,
                node: node.clone(),
                expiration,
                email_sent,
            })
            .await
    }

    /// Accept a new node: insert it directly when verification is off
    /// or the caller is an admin, otherwise queue it and email its owner.
    #[instrument(skip(self, node, settings), fields(addr = %node.addr), level = "debug")]
    pub async fn register(
        &self,
        node: Node,
        caller: &Caller,
        settings: &Settings,
    ) -> Result<Registration> {
        verify_registrant(&node, &settings.verify)?;

        // A cached copy gives way to a local registration
        if let Some(existing) = self.store.get_node(&node.addr).await? {
            if !existing.is_cached() {
                return Err(validation_error!("address already registered"));
            }
        }

        let smtp = settings
            .smtp
            .as_ref()
            .ok_or_else(|| AtlasError::Notify("SMTP disabled in the configuration".to_string()))?;

        if smtp.verify_disabled || caller.is_admin {
            self.store.add_node(&node).await?;
            info!("Node {} registered", node.addr);
            return Ok(Registration::Registered);
        }

        let id = new_verification_id();
        self.queue_node(id, false, settings.verification_expiration(), &node)
            .await?;

        match self
            .send_verification_email(id, &node.owner_email, settings)
            .await
        {
            Ok(()) => {
                // The email is out either way; a stale flag only means one
                // extra resend from the heartbeat
                if let Err(e) = self.store.mark_email_sent(id).await {
                    warn!("Could not set email sent for {}: {}", id, e);
                }
                info!("Node {} entered, waiting for verification", node.addr);
                Ok(Registration::QueuedEmailed(id))
            }
            Err(e) => {
                error!("Could not send verification email for {}: {}", node.addr, e);
                info!(
                    "Node {} entered, verification email will be resent",
                    node.addr
                );
                Ok(Registration::QueuedEmailPending(id))
            }
        }
    }

    pub async fn send_verification_email(
        &self,
        id: i64,
        recipient: &str,
        settings: &Settings,
    ) -> Result<()> {
        let data = json!({
            "Subject": format!("{} Node Registration", settings.name),
            "From": settings.smtp.as_ref().map(|s| s.email_address.clone()).unwrap_or_default(),
            "Link": settings.public_link(),
            "VerificationID": id,
            "FromNode": settings.verify.from_node,
        });
        self.notifier
            .send(VERIFICATION_TEMPLATE, recipient, data)
            .await?;
        debug!("Sent verification email for {}", id);
        Ok(())
    }

    /// Promote the queued node with `id` into the live table if the
    /// verification checks pass.
    #[instrument(skip(self, verify), level = "debug")]
    pub async fn verify_queued_node(
        &self,
        id: i64,
        remote: &Address,
        verify: &VerifySettings,
    ) -> Result<VerifyOutcome> {
        let entry = match self.store.get_queued(id).await? {
            Some(entry) => entry,
            None => {
                info!("{} attempted to verify invalid ID", remote);
                return Ok(VerifyOutcome::InvalidId);
            }
        };

        if let Err(e) = verify_request(&entry.node, remote, verify) {
            return Ok(VerifyOutcome::Rejected(e));
        }

        // The entry may have been swept between the read and the move
        match self.store.promote_queued(id).await {
            Ok(Some(node)) => {
                info!("Node {} verified", node.addr);
                Ok(VerifyOutcome::Verified(node.addr))
            }
            Ok(None) => Ok(VerifyOutcome::InvalidId),
            Err(e @ AtlasError::Validation(_)) => Ok(VerifyOutcome::Rejected(e)),
            Err(e) => Err(e),
        }
    }

    /// Drop queue entries whose grace period has passed. The submitter is
    /// not told.
    pub async fn delete_expired(&self) -> Result<usize> {
        let removed = self
            .store
            .delete_expired_from_queue(Utc::now().timestamp())
            .await?;
        if removed > 0 {
            debug!("Removed {} expired queue entries", removed);
        }
        Ok(removed)
    }

    /// Retry every unsent confirmation email. Returns how many went out
    /// this pass; failures stay marked unsent.
    pub async fn resend_verification_emails(&self, settings: &Settings) -> Result<usize> {
        let unsent = self.store.unsent_queue_entries().await?;
        let mut sent = 0;
        for (id, email) in unsent {
            if let Err(e) = self.send_verification_email(id, &email, settings).await {
                warn!("Could not send verification email to {:?}: {}", email, e);
                continue;
            }
            match self.store.mark_email_sent(id).await {
                Ok(()) => sent += 1,
                Err(e) => warn!("Could not set email sent for {}: {}", id, e),
            }
        }
        Ok(sent)
    }
}
