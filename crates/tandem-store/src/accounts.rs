use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tandem_core::ids::{AccountId, TopicId};
use tandem_core::partnership::Partner;
use tandem_core::ProgressionError;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Local view of an account as the profile subsystem publishes it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProfile {
    pub id: AccountId,
    pub display_name: String,
    #[serde(default)]
    pub role_label: Option<String>,
    /// Ranked topic preferences, most preferred first.
    #[serde(default)]
    pub topic_ranking: Vec<TopicId>,
    /// Delivery address for push messages.
    #[serde(default)]
    pub push_token: Option<String>,
}

impl AccountProfile {
    /// The account as a pairing participant; fails on an unset or unknown
    /// role label.
    pub fn partner(&self) -> Result<Partner, ProgressionError> {
        Partner::from_label(self.id.clone(), self.role_label.as_deref())
    }
}

pub struct AccountRepo {
    db: Database,
}

impl AccountRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or fully replace a profile.
    #[instrument(skip(self, profile, now), fields(account_id = %profile.id))]
    pub fn upsert(&self, profile: &AccountProfile, now: DateTime<Utc>) -> Result<(), StoreError> {
        let ranking = serde_json::to_string(&profile.topic_ranking)?;
        let now = row_helpers::format_time(now);
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO accounts
                    (id, display_name, role_label, topic_ranking, push_token,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    role_label = excluded.role_label,
                    topic_ranking = excluded.topic_ranking,
                    push_token = excluded.push_token,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    profile.id.as_str(),
                    profile.display_name,
                    profile.role_label,
                    ranking,
                    profile.push_token,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(account_id = %id))]
    pub fn find(&self, id: &AccountId) -> Result<Option<AccountProfile>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, display_name, role_label, topic_ranking, push_token
                 FROM accounts WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_profile(row).map(Some),
                None => Ok(None),
            }
        })
    }

    pub fn get(&self, id: &AccountId) -> Result<AccountProfile, StoreError> {
        self.find(id)?
            .ok_or_else(|| StoreError::NotFound(format!("account {id}")))
    }

    /// Replace the delivery address; `None` clears it.
    #[instrument(skip(self, token, now), fields(account_id = %id))]
    pub fn set_push_token(
        &self,
        id: &AccountId,
        token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE accounts SET push_token = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![token, row_helpers::format_time(now), id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("account {id}")));
            }
            Ok(())
        })
    }
}

fn row_to_profile(row: &rusqlite::Row<'_>) -> Result<AccountProfile, StoreError> {
    let id: String = row_helpers::get(row, 0, "accounts", "id")?;
    let ranking: String = row_helpers::get(row, 3, "accounts", "topic_ranking")?;
    Ok(AccountProfile {
        id: AccountId::from_raw(id),
        display_name: row_helpers::get(row, 1, "accounts", "display_name")?,
        role_label: row_helpers::get_opt(row, 2, "accounts", "role_label")?,
        topic_ranking: row_helpers::parse_json(&ranking, "accounts", "topic_ranking")?,
        push_token: row_helpers::get_opt(row, 4, "accounts", "push_token")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::partnership::PartnerRole;

    fn profile(id: &str, role: Option<&str>) -> AccountProfile {
        AccountProfile {
            id: AccountId::from_raw(id),
            display_name: format!("User {id}"),
            role_label: role.map(str::to_string),
            topic_ranking: vec![TopicId(3), TopicId(1)],
            push_token: Some(format!("token-{id}")),
        }
    }

    #[test]
    fn upsert_then_get() {
        let repo = AccountRepo::new(Database::in_memory().unwrap());
        repo.upsert(&profile("a", Some("primary")), Utc::now()).unwrap();
        let loaded = repo.get(&AccountId::from_raw("a")).unwrap();
        assert_eq!(loaded, profile("a", Some("primary")));
    }

    #[test]
    fn upsert_replaces() {
        let repo = AccountRepo::new(Database::in_memory().unwrap());
        repo.upsert(&profile("a", Some("primary")), Utc::now()).unwrap();
        let mut changed = profile("a", Some("female"));
        changed.topic_ranking = vec![];
        repo.upsert(&changed, Utc::now()).unwrap();
        let loaded = repo.get(&AccountId::from_raw("a")).unwrap();
        assert_eq!(loaded.role_label.as_deref(), Some("female"));
        assert!(loaded.topic_ranking.is_empty());
    }

    #[test]
    fn missing_account_not_found() {
        let repo = AccountRepo::new(Database::in_memory().unwrap());
        assert!(repo.find(&AccountId::from_raw("ghost")).unwrap().is_none());
        assert!(matches!(
            repo.get(&AccountId::from_raw("ghost")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn push_token_cleared() {
        let repo = AccountRepo::new(Database::in_memory().unwrap());
        let id = AccountId::from_raw("a");
        repo.upsert(&profile("a", None), Utc::now()).unwrap();
        repo.set_push_token(&id, None, Utc::now()).unwrap();
        assert!(repo.get(&id).unwrap().push_token.is_none());
        assert!(repo.set_push_token(&AccountId::from_raw("b"), None, Utc::now()).is_err());
    }

    #[test]
    fn partner_from_role_label() {
        assert_eq!(profile("a", Some("male")).partner().unwrap().role, PartnerRole::Primary);
        assert!(matches!(
            profile("a", None).partner(),
            Err(ProgressionError::InvalidState(_))
        ));
    }

    #[test]
    fn profile_json_defaults() {
        let parsed: AccountProfile =
            serde_json::from_str(r#"{"id": "a", "displayName": "Ann"}"#).unwrap();
        assert!(parsed.role_label.is_none());
        assert!(parsed.topic_ranking.is_empty());
    }
}
