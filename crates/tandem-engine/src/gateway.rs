//! Push delivery transports.
//!
//! The gateway only sees a resolved delivery address and the message; the
//! notifier does the account lookup.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use tandem_core::notify::PushMessage;
use tandem_settings::{GatewayKind, NotificationSettings};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("relay rejected message {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("gateway misconfigured: {0}")]
    Config(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::Network(_) => true,
            Self::Config(_) => false,
        }
    }
}

/// External push transport.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    fn name(&self) -> &str;
    async fn deliver(&self, address: &str, message: &PushMessage) -> Result<(), GatewayError>;
}

/// Build the configured gateway.
pub fn gateway_from_settings(
    settings: &NotificationSettings,
) -> Result<Arc<dyn NotificationGateway>, GatewayError> {
    match settings.gateway {
        GatewayKind::Log => Ok(Arc::new(LogGateway)),
        GatewayKind::Http => {
            let url = settings.relay_url.clone().ok_or_else(|| {
                GatewayError::Config("relayUrl is required for the http gateway".into())
            })?;
            Ok(Arc::new(HttpPushGateway::new(
                url,
                settings.relay_token.clone(),
                Duration::from_millis(settings.timeout_ms),
            )))
        }
    }
}

/// Logs each message instead of delivering it.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogGateway;

#[async_trait]
impl NotificationGateway for LogGateway {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, _address: &str, message: &PushMessage) -> Result<(), GatewayError> {
        info!(
            account_id = %message.recipient,
            kind = message.kind.type_tag(),
            title = %message.title,
            body = %message.body,
            "push message"
        );
        Ok(())
    }
}

/// POSTs each message as JSON to a push relay.
pub struct HttpPushGateway {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpPushGateway {
    pub fn new(url: String, token: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Tandem/1.0")
            .build()
            .unwrap_or_default();
        Self { client, url, token }
    }
}

/// Relay request body.
pub fn relay_payload(address: &str, message: &PushMessage) -> serde_json::Value {
    serde_json::json!({
        "to": address,
        "title": message.title,
        "body": message.body,
        "data": message.data,
    })
}

#[async_trait]
impl NotificationGateway for HttpPushGateway {
    fn name(&self) -> &str {
        "http"
    }

    async fn deliver(&self, address: &str, message: &PushMessage) -> Result<(), GatewayError> {
        let mut request = self.client.post(&self.url).json(&relay_payload(address, message));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        debug!(account_id = %message.recipient, kind = message.kind.type_tag(), "push relayed");
        Ok(())
    }
}

/// Keeps every delivered message in memory; optionally fails every call.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<(String, PushMessage)>>,
    failing: Mutex<bool>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    /// Delivered (address, message) pairs, oldest first.
    pub fn sent(&self) -> Vec<(String, PushMessage)> {
        self.sent.lock().clone()
    }

    pub fn messages(&self) -> Vec<PushMessage> {
        self.sent.lock().iter().map(|(_, m)| m.clone()).collect()
    }
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, address: &str, message: &PushMessage) -> Result<(), GatewayError> {
        if *self.failing.lock() {
            return Err(GatewayError::Network("recording gateway set to fail".into()));
        }
        self.sent.lock().push((address.to_string(), message.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::ids::{AccountId, PartnershipId};

    fn reminder() -> PushMessage {
        PushMessage::reminder(AccountId::from_raw("s"), "Pat", &PartnershipId::from_raw("p-s"))
    }

    #[test]
    fn payload_shape() {
        let payload = relay_payload("device-token", &reminder());
        assert_eq!(payload["to"], "device-token");
        assert_eq!(payload["title"], "Friendly nudge");
        assert_eq!(payload["data"]["type"], "reminder");
        assert_eq!(payload["data"]["partnershipId"], "p-s");
    }

    #[test]
    fn retryable_classification() {
        assert!(GatewayError::Network("reset".into()).is_retryable());
        assert!(GatewayError::Rejected { status: 503, body: String::new() }.is_retryable());
        assert!(!GatewayError::Rejected { status: 400, body: String::new() }.is_retryable());
        assert!(!GatewayError::Config("x".into()).is_retryable());
    }

    #[test]
    fn http_gateway_requires_url() {
        let settings = NotificationSettings {
            gateway: GatewayKind::Http,
            ..NotificationSettings::default()
        };
        assert!(matches!(gateway_from_settings(&settings), Err(GatewayError::Config(_))));
        assert_eq!(
            gateway_from_settings(&NotificationSettings::default()).unwrap().name(),
            "log"
        );
    }

    #[tokio::test]
    async fn recording_gateway_records_and_fails() {
        let gateway = RecordingGateway::new();
        gateway.deliver("tok", &reminder()).await.unwrap();
        assert_eq!(gateway.sent()[0].0, "tok");

        gateway.set_failing(true);
        assert!(gateway.deliver("tok", &reminder()).await.is_err());
        assert_eq!(gateway.messages().len(), 1);
    }

    #[tokio::test]
    async fn unreachable_relay_is_a_network_error() {
        let gateway = HttpPushGateway::new(
            "http://127.0.0.1:1/push".into(),
            Some("secret".into()),
            Duration::from_millis(500),
        );
        let err = gateway.deliver("tok", &reminder()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Network(_)));
    }
}
