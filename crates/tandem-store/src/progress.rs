use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, instrument};

use tandem_core::ids::{AccountId, PartnershipId, SubtopicId, TopicId};
use tandem_core::partnership::PartnerPair;
use tandem_core::progress::PartnershipProgress;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Per-partnership progression state.
///
/// The completed set lives in its own table keyed by (partnership,
/// subtopic), which makes appends idempotent unions.
pub struct ProgressRepo {
    db: Database,
}

impl ProgressRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert `progress` unless a document already exists for its key.
    ///
    /// Returns the stored document (the existing one when another creator
    /// got there first) and whether this call created it.
    #[instrument(skip_all, fields(partnership_id = %progress.partnership_id))]
    pub fn create_if_absent(
        &self,
        progress: &PartnershipProgress,
    ) -> Result<(PartnershipProgress, bool), StoreError> {
        let order = serde_json::to_string(&progress.combined_topic_order)?;
        self.db.with_tx(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO partnership_progress
                    (partnership_id, primary_account, secondary_account, combined_topic_order,
                     current_round, is_complete, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    progress.partnership_id.as_str(),
                    progress.partners.primary.as_str(),
                    progress.partners.secondary.as_str(),
                    order,
                    progress.current_round,
                    progress.is_complete,
                    row_helpers::format_time(progress.created_at),
                    row_helpers::format_time(progress.updated_at),
                ],
            )? == 1;
            if inserted {
                let id = &progress.partnership_id;
                for subtopic in &progress.completed_subtopics {
                    insert_completed(conn, id, *subtopic, progress.created_at)?;
                }
            } else {
                debug!("progress already exists, reusing");
            }
            let stored = load(conn, &progress.partnership_id)?.ok_or_else(|| {
                StoreError::NotFound(format!("progress {}", progress.partnership_id))
            })?;
            Ok((stored, inserted))
        })
    }

    #[instrument(skip(self), fields(partnership_id = %id))]
    pub fn find(&self, id: &PartnershipId) -> Result<Option<PartnershipProgress>, StoreError> {
        self.db.with_conn(|conn| load(conn, id))
    }

    pub fn get(&self, id: &PartnershipId) -> Result<PartnershipProgress, StoreError> {
        self.find(id)?
            .ok_or_else(|| StoreError::NotFound(format!("progress {id}")))
    }

    /// Add `subtopic` to the completed set. Returns false when it was
    /// already present.
    #[instrument(skip(self, now), fields(partnership_id = %id, subtopic_id = %subtopic))]
    pub fn append_completed(
        &self,
        id: &PartnershipId,
        subtopic: SubtopicId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.db.with_tx(|conn| {
            let inserted = insert_completed(conn, id, subtopic, now)?;
            if inserted {
                touch(conn, id, now)?;
            }
            Ok(inserted)
        })
    }

    /// Compare-and-set `current_round` from `from_round` to the next round.
    /// Returns false when the stored round moved on or the partnership is
    /// complete.
    #[instrument(skip(self, now), fields(partnership_id = %id))]
    pub fn advance_round(
        &self,
        id: &PartnershipId,
        from_round: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE partnership_progress SET current_round = ?1, updated_at = ?2
                 WHERE partnership_id = ?3 AND current_round = ?4 AND is_complete = 0",
                rusqlite::params![
                    from_round + 1,
                    row_helpers::format_time(now),
                    id.as_str(),
                    from_round
                ],
            )?;
            Ok(changed == 1)
        })
    }

    /// Set the terminal flag. Returns false when it was already set.
    #[instrument(skip(self, now), fields(partnership_id = %id))]
    pub fn mark_complete(
        &self,
        id: &PartnershipId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE partnership_progress SET is_complete = 1, updated_at = ?1
                 WHERE partnership_id = ?2 AND is_complete = 0",
                rusqlite::params![row_helpers::format_time(now), id.as_str()],
            )?;
            Ok(changed == 1)
        })
    }

    /// Keys of every partnership that still has work left.
    #[instrument(skip(self))]
    pub fn list_incomplete(&self) -> Result<Vec<PartnershipId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT partnership_id FROM partnership_progress
                 WHERE is_complete = 0 ORDER BY partnership_id",
            )?;
            let mut rows = stmt.query([])?;
            let mut ids = Vec::new();
            while let Some(row) = rows.next()? {
                let id: String =
                    row_helpers::get(row, 0, "partnership_progress", "partnership_id")?;
                ids.push(PartnershipId::from_raw(id));
            }
            Ok(ids)
        })
    }

    /// Progress documents the account belongs to.
    #[instrument(skip(self), fields(account_id = %account))]
    pub fn list_for_account(
        &self,
        account: &AccountId,
    ) -> Result<Vec<PartnershipProgress>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT partnership_id FROM partnership_progress
                 WHERE primary_account = ?1 OR secondary_account = ?1
                 ORDER BY created_at",
            )?;
            let ids: Vec<String> = stmt
                .query_map([account.as_str()], |row| row.get(0))?
                .collect::<Result<_, _>>()?;
            let mut results = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(progress) = load(conn, &PartnershipId::from_raw(id))? {
                    results.push(progress);
                }
            }
            Ok(results)
        })
    }
}

fn insert_completed(
    conn: &Connection,
    id: &PartnershipId,
    subtopic: SubtopicId,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO progress_completed_subtopics
            (partnership_id, subtopic_id, completed_at)
         VALUES (?1, ?2, ?3)",
        rusqlite::params![id.as_str(), subtopic.0, row_helpers::format_time(now)],
    )?;
    Ok(inserted == 1)
}

fn touch(conn: &Connection, id: &PartnershipId, now: DateTime<Utc>) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE partnership_progress SET updated_at = ?1 WHERE partnership_id = ?2",
        rusqlite::params![row_helpers::format_time(now), id.as_str()],
    )?;
    Ok(())
}

fn load(conn: &Connection, id: &PartnershipId) -> Result<Option<PartnershipProgress>, StoreError> {
    const T: &str = "partnership_progress";
    let mut stmt = conn.prepare(
        "SELECT partnership_id, primary_account, secondary_account, combined_topic_order,
                current_round, is_complete, created_at, updated_at
         FROM partnership_progress WHERE partnership_id = ?1",
    )?;
    let mut rows = stmt.query([id.as_str()])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };

    let partnership_id: String = row_helpers::get(row, 0, T, "partnership_id")?;
    let primary: String = row_helpers::get(row, 1, T, "primary_account")?;
    let secondary: String = row_helpers::get(row, 2, T, "secondary_account")?;
    let order: String = row_helpers::get(row, 3, T, "combined_topic_order")?;
    let created_at: String = row_helpers::get(row, 6, T, "created_at")?;
    let updated_at: String = row_helpers::get(row, 7, T, "updated_at")?;
    let combined_topic_order: Vec<TopicId> =
        row_helpers::parse_json(&order, T, "combined_topic_order")?;

    let mut progress = PartnershipProgress {
        partnership_id: PartnershipId::from_raw(partnership_id),
        partners: PartnerPair {
            primary: AccountId::from_raw(primary),
            secondary: AccountId::from_raw(secondary),
        },
        combined_topic_order,
        current_round: row_helpers::get(row, 4, T, "current_round")?,
        completed_subtopics: BTreeSet::new(),
        is_complete: row_helpers::get(row, 5, T, "is_complete")?,
        created_at: row_helpers::parse_time(&created_at, T, "created_at")?,
        updated_at: row_helpers::parse_time(&updated_at, T, "updated_at")?,
    };
    drop(rows);

    let mut stmt = conn.prepare(
        "SELECT subtopic_id FROM progress_completed_subtopics WHERE partnership_id = ?1",
    )?;
    let mut rows = stmt.query([id.as_str()])?;
    while let Some(row) = rows.next()? {
        let subtopic: i64 =
            row_helpers::get(row, 0, "progress_completed_subtopics", "subtopic_id")?;
        progress.completed_subtopics.insert(SubtopicId(subtopic));
    }
    Ok(Some(progress))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress() -> PartnershipProgress {
        let partners = PartnerPair {
            primary: AccountId::from_raw("p"),
            secondary: AccountId::from_raw("s"),
        };
        PartnershipProgress::start(partners, vec![TopicId(2), TopicId(1)], Utc::now())
    }

    #[test]
    fn create_if_absent_reuses_existing() {
        let repo = ProgressRepo::new(Database::in_memory().unwrap());
        let first = progress();
        let (stored, created) = repo.create_if_absent(&first).unwrap();
        assert!(created);
        assert_eq!(stored.combined_topic_order, vec![TopicId(2), TopicId(1)]);

        let mut second = progress();
        second.combined_topic_order = vec![TopicId(1), TopicId(2)];
        let (stored, created) = repo.create_if_absent(&second).unwrap();
        assert!(!created);
        assert_eq!(stored.combined_topic_order, vec![TopicId(2), TopicId(1)]);
    }

    #[test]
    fn append_completed_is_a_set_union() {
        let repo = ProgressRepo::new(Database::in_memory().unwrap());
        let p = progress();
        repo.create_if_absent(&p).unwrap();

        assert!(repo.append_completed(&p.partnership_id, SubtopicId(11), Utc::now()).unwrap());
        assert!(!repo.append_completed(&p.partnership_id, SubtopicId(11), Utc::now()).unwrap());
        assert!(repo.append_completed(&p.partnership_id, SubtopicId(21), Utc::now()).unwrap());

        let stored = repo.get(&p.partnership_id).unwrap();
        assert_eq!(
            stored.completed_subtopics.into_iter().collect::<Vec<_>>(),
            vec![SubtopicId(11), SubtopicId(21)]
        );
    }

    #[test]
    fn append_to_missing_progress_fails() {
        let repo = ProgressRepo::new(Database::in_memory().unwrap());
        assert!(repo
            .append_completed(&PartnershipId::from_raw("x-y"), SubtopicId(1), Utc::now())
            .is_err());
    }

    #[test]
    fn advance_round_compare_and_set() {
        let repo = ProgressRepo::new(Database::in_memory().unwrap());
        let p = progress();
        repo.create_if_absent(&p).unwrap();

        assert!(repo.advance_round(&p.partnership_id, 1, Utc::now()).unwrap());
        assert!(!repo.advance_round(&p.partnership_id, 1, Utc::now()).unwrap());
        assert_eq!(repo.get(&p.partnership_id).unwrap().current_round, 2);
    }

    #[test]
    fn complete_partnerships_leave_incomplete_list() {
        let repo = ProgressRepo::new(Database::in_memory().unwrap());
        let p = progress();
        repo.create_if_absent(&p).unwrap();
        assert_eq!(repo.list_incomplete().unwrap(), vec![p.partnership_id.clone()]);

        assert!(repo.mark_complete(&p.partnership_id, Utc::now()).unwrap());
        assert!(!repo.mark_complete(&p.partnership_id, Utc::now()).unwrap());
        assert!(repo.list_incomplete().unwrap().is_empty());
        assert!(!repo.advance_round(&p.partnership_id, 1, Utc::now()).unwrap());
    }

    #[test]
    fn list_for_account_finds_either_member() {
        let repo = ProgressRepo::new(Database::in_memory().unwrap());
        repo.create_if_absent(&progress()).unwrap();
        assert_eq!(repo.list_for_account(&AccountId::from_raw("s")).unwrap().len(), 1);
        assert!(repo.list_for_account(&AccountId::from_raw("q")).unwrap().is_empty());
    }

    #[test]
    fn missing_progress() {
        let repo = ProgressRepo::new(Database::in_memory().unwrap());
        assert!(repo.find(&PartnershipId::from_raw("x-y")).unwrap().is_none());
        assert!(matches!(repo.get(&PartnershipId::from_raw("x-y")), Err(StoreError::NotFound(_))));
    }
}
