use std::sync::Arc;

use tracing::{debug, info, warn};

use tandem_core::notify::PushMessage;
use tandem_core::ProgressionError;
use tandem_store::Store;

use crate::gateway::NotificationGateway;

/// What happened to one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Recipient has no delivery address on file.
    NoAddress,
}

/// Resolves recipients to delivery addresses and hands messages to the
/// gateway.
#[derive(Clone)]
pub struct Notifier {
    store: Store,
    gateway: Arc<dyn NotificationGateway>,
}

impl Notifier {
    pub fn new(store: Store, gateway: Arc<dyn NotificationGateway>) -> Self {
        Self { store, gateway }
    }

    /// Deliver one message. A missing account or address is logged and
    /// reported as `NoAddress`; only transport failures are errors.
    pub async fn send(&self, message: PushMessage) -> Result<Delivery, ProgressionError> {
        let address = match self.store.accounts().find(&message.recipient) {
            Ok(Some(profile)) => profile.push_token,
            Ok(None) => None,
            Err(e) => {
                warn!(
                    account_id = %message.recipient,
                    error = %e,
                    "delivery address lookup failed"
                );
                None
            }
        };
        let Some(address) = address.filter(|a| !a.is_empty()) else {
            info!(
                account_id = %message.recipient,
                kind = message.kind.type_tag(),
                "no delivery address, message dropped"
            );
            return Ok(Delivery::NoAddress);
        };

        if let Err(e) = self.gateway.deliver(&address, &message).await {
            debug!(
                account_id = %message.recipient,
                gateway = self.gateway.name(),
                retryable = e.is_retryable(),
                "gateway rejected message"
            );
            return Err(ProgressionError::TransientDelivery(format!(
                "{} via {}: {e}",
                message.kind.type_tag(),
                self.gateway.name()
            )));
        }
        Ok(Delivery::Sent)
    }

    /// Deliver and log any failure. Used by trigger handlers, whose writes
    /// stand regardless of delivery.
    pub async fn send_logged(&self, message: PushMessage) -> Option<Delivery> {
        let recipient = message.recipient.clone();
        let kind = message.kind.type_tag();
        match self.send(message).await {
            Ok(delivery) => Some(delivery),
            Err(e) => {
                warn!(account_id = %recipient, kind, error = %e, "push delivery failed");
                None
            }
        }
    }
}
