use chrono::{DateTime, Utc};
use tracing::instrument;

use tandem_core::ids::{AccountId, PartnershipId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Last reminder each account sent within each partnership.
pub struct ReminderRepo {
    db: Database,
}

impl ReminderRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(account_id = %account, partnership_id = %partnership))]
    pub fn last_sent(
        &self,
        account: &AccountId,
        partnership: &PartnershipId,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT last_sent_at FROM reminder_log
                 WHERE account_id = ?1 AND partnership_id = ?2",
            )?;
            let mut rows = stmt.query([account.as_str(), partnership.as_str()])?;
            match rows.next()? {
                Some(row) => {
                    let raw: String = row_helpers::get(row, 0, "reminder_log", "last_sent_at")?;
                    row_helpers::parse_time(&raw, "reminder_log", "last_sent_at").map(Some)
                }
                None => Ok(None),
            }
        })
    }

    /// Overwrite the last-sent time. Concurrent senders: last write wins.
    #[instrument(skip(self), fields(account_id = %account, partnership_id = %partnership))]
    pub fn record(
        &self,
        account: &AccountId,
        partnership: &PartnershipId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reminder_log (account_id, partnership_id, last_sent_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(account_id, partnership_id)
                 DO UPDATE SET last_sent_at = excluded.last_sent_at",
                rusqlite::params![
                    account.as_str(),
                    partnership.as_str(),
                    row_helpers::format_time(at)
                ],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn record_overwrites_last_sent() {
        let repo = ReminderRepo::new(Database::in_memory().unwrap());
        let account = AccountId::from_raw("p");
        let pid = PartnershipId::from_raw("p-s");
        assert!(repo.last_sent(&account, &pid).unwrap().is_none());

        let first = Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap();
        repo.record(&account, &pid, first).unwrap();
        assert_eq!(repo.last_sent(&account, &pid).unwrap(), Some(first));

        let later = first + Duration::hours(5);
        repo.record(&account, &pid, later).unwrap();
        assert_eq!(repo.last_sent(&account, &pid).unwrap(), Some(later));
    }

    #[test]
    fn scoped_per_partnership() {
        let repo = ReminderRepo::new(Database::in_memory().unwrap());
        let account = AccountId::from_raw("p");
        repo.record(&account, &PartnershipId::from_raw("p-s"), Utc::now()).unwrap();
        assert!(repo
            .last_sent(&account, &PartnershipId::from_raw("p-t"))
            .unwrap()
            .is_none());
    }
}
