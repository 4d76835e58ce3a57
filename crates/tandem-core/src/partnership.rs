use serde::{Deserialize, Serialize};

use crate::errors::ProgressionError;
use crate::ids::{AccountId, PartnershipId};

/// Which side of a partnership an account sits on.
///
/// Same-role pairs are not representable by the key scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerRole {
    Primary,
    Secondary,
}

impl PartnerRole {
    /// Parse a profile role label. Accepts the historical labels the
    /// profile subsystem still stores for older accounts.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "primary" | "male" => Some(Self::Primary),
            "secondary" | "female" => Some(Self::Secondary),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for PartnerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An account together with the role it plays in a pairing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partner {
    pub account_id: AccountId,
    pub role: PartnerRole,
}

impl Partner {
    pub fn new(account_id: AccountId, role: PartnerRole) -> Self {
        Self { account_id, role }
    }

    /// Build from a raw profile label, failing on unset or unknown labels.
    pub fn from_label(
        account_id: AccountId,
        label: Option<&str>,
    ) -> Result<Self, ProgressionError> {
        let role = label.and_then(PartnerRole::from_label).ok_or_else(|| {
            ProgressionError::InvalidState(format!(
                "account {account_id} has unrecognized role label {label:?}"
            ))
        })?;
        Ok(Self { account_id, role })
    }
}

/// The two accounts of a partnership, ordered by role.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartnerPair {
    pub primary: AccountId,
    pub secondary: AccountId,
}

impl PartnerPair {
    /// Order two partners by role. Rejects same-role pairs and an account
    /// paired with itself.
    pub fn from_partners(a: &Partner, b: &Partner) -> Result<Self, ProgressionError> {
        if a.account_id == b.account_id {
            return Err(ProgressionError::InvalidState(format!(
                "account {} cannot partner with itself",
                a.account_id
            )));
        }
        match (a.role, b.role) {
            (PartnerRole::Primary, PartnerRole::Secondary) => Ok(Self {
                primary: a.account_id.clone(),
                secondary: b.account_id.clone(),
            }),
            (PartnerRole::Secondary, PartnerRole::Primary) => Ok(Self {
                primary: b.account_id.clone(),
                secondary: a.account_id.clone(),
            }),
            (role, _) => Err(ProgressionError::InvalidState(format!(
                "accounts {} and {} both have role {role}",
                a.account_id, b.account_id
            ))),
        }
    }

    /// Canonical key: `primaryId-secondaryId`.
    pub fn key(&self) -> PartnershipId {
        PartnershipId::from_raw(format!("{}-{}", self.primary, self.secondary))
    }

    pub fn contains(&self, account: &AccountId) -> bool {
        &self.primary == account || &self.secondary == account
    }

    /// The other member, or `None` if `account` is not in the pair.
    pub fn partner_of(&self, account: &AccountId) -> Option<&AccountId> {
        if &self.primary == account {
            Some(&self.secondary)
        } else if &self.secondary == account {
            Some(&self.primary)
        } else {
            None
        }
    }

    pub fn members(&self) -> [&AccountId; 2] {
        [&self.primary, &self.secondary]
    }
}

/// Derive the order-independent partnership key for two partners.
///
/// Swapping the arguments yields the same key.
pub fn derive_partnership_key(a: &Partner, b: &Partner) -> Result<PartnershipId, ProgressionError> {
    PartnerPair::from_partners(a, b).map(|pair| pair.key())
}
