//! Structured push messages the scheduler emits.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{AccountId, PartnershipId, SubtopicId};

/// The five message kinds the gateway understands.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationKind {
    NewPairingRequest,
    PairingAccepted,
    PartnerCompleted {
        #[serde(rename = "recipientCompleted")]
        recipient_completed: bool,
    },
    NewUnitAvailable,
    Reminder,
}

impl NotificationKind {
    /// Type tag carried in the push payload.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::NewPairingRequest => "new_pairing_request",
            Self::PairingAccepted => "pairing_accepted",
            Self::PartnerCompleted { .. } => "partner_completed",
            Self::NewUnitAvailable => "new_unit_available",
            Self::Reminder => "reminder",
        }
    }
}

/// A message addressed to one account. The notifier resolves the delivery
/// address; the gateway only sees the resolved token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    pub recipient: AccountId,
    pub title: String,
    pub body: String,
    pub kind: NotificationKind,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl PushMessage {
    fn new(recipient: AccountId, kind: NotificationKind, title: &str, body: String) -> Self {
        let mut data = BTreeMap::new();
        data.insert("type".to_string(), kind.type_tag().to_string());
        if let NotificationKind::PartnerCompleted { recipient_completed } = kind {
            data.insert("recipientCompleted".to_string(), recipient_completed.to_string());
        }
        Self {
            recipient,
            title: title.to_string(),
            body,
            kind,
            data,
        }
    }

    fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.data.insert(key.to_string(), value.to_string());
        self
    }

    pub fn new_pairing_request(
        recipient: AccountId,
        requester_name: &str,
        request_id: &str,
    ) -> Self {
        Self::new(
            recipient,
            NotificationKind::NewPairingRequest,
            "New partner request",
            format!("{requester_name} wants to connect with you."),
        )
        .with("requestId", request_id)
    }

    pub fn pairing_accepted(
        recipient: AccountId,
        partner_name: &str,
        partnership: &PartnershipId,
    ) -> Self {
        Self::new(
            recipient,
            NotificationKind::PairingAccepted,
            "You're connected",
            format!("{partner_name} accepted your request. Your first topic is ready."),
        )
        .with("partnershipId", partnership)
    }

    /// `recipient_completed` picks between "review now" and "complete to review".
    pub fn partner_completed(
        recipient: AccountId,
        partner_name: &str,
        partnership: &PartnershipId,
        subtopic: SubtopicId,
        recipient_completed: bool,
    ) -> Self {
        let body = if recipient_completed {
            format!("{partner_name} finished today's topic too. You can review their answers now.")
        } else {
            format!("{partner_name} finished today's topic. Complete it to review their answers.")
        };
        Self::new(
            recipient,
            NotificationKind::PartnerCompleted { recipient_completed },
            "Your partner completed today's topic",
            body,
        )
        .with("partnershipId", partnership)
        .with("subtopicId", subtopic)
    }

    pub fn new_unit_available(
        recipient: AccountId,
        partnership: &PartnershipId,
        subtopic_name: &str,
    ) -> Self {
        Self::new(
            recipient,
            NotificationKind::NewUnitAvailable,
            "A new topic is ready",
            format!("Today's topic: {subtopic_name}"),
        )
        .with("partnershipId", partnership)
    }

    pub fn reminder(recipient: AccountId, sender_name: &str, partnership: &PartnershipId) -> Self {
        Self::new(
            recipient,
            NotificationKind::Reminder,
            "Friendly nudge",
            format!("{sender_name} is waiting for you to finish today's topic."),
        )
        .with("partnershipId", partnership)
    }
}
