//! Outgoing email notices. The mail transport itself lives outside this
//! crate; anything that can deliver a templated message implements
//! [`Notifier`].
use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::error::Result;

pub const VERIFICATION_TEMPLATE: &str = "verification.txt";
pub const MESSAGE_TEMPLATE: &str = "message.txt";

#[async_trait]
pub trait Notifier: Send + Sync + std::fmt::Debug {
    /// Deliver `template` rendered with `data` to `recipient`. Failures
    /// are retryable.
    async fn send(&self, template: &str, recipient: &str, data: Value) -> Result<()>;
}

/// Template fields that grant access when known, and so never reach a log.
const SECRET_FIELDS: &[&str] = &["VerificationID"];

/// Writes notices to the log instead of delivering them.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, template: &str, recipient: &str, data: Value) -> Result<()> {
        let data = redact(data);
        info!(template, recipient, data = %data, "Notice");
        Ok(())
    }
}

/// Replace secret template fields with a placeholder.
pub fn redact(mut data: Value) -> Value {
    if let Some(fields) = data.as_object_mut() {
        for key in SECRET_FIELDS {
            if let Some(value) = fields.get_mut(*key) {
                *value = Value::String("[redacted]".to_string());
            }
        }
    }
    data
}
