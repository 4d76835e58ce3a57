use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use tracing::{debug, instrument};

use tandem_core::assignment::DailySubtopicAssignment;
use tandem_core::ids::{AccountId, PartnershipId, SubtopicId};

use crate::changes::{self, ChangeOp, Collection};
use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const SELECT: &str = "SELECT partnership_id, date, subtopic_id, user_completion, both_completed,
        both_completed_at, next_scheduled_date, created_at, updated_at
 FROM daily_assignments";

/// Document id used in the change feed: `partnership/date`.
pub fn document_id(partnership: &PartnershipId, date: NaiveDate) -> String {
    format!("{partnership}/{}", row_helpers::format_date(date))
}

/// Daily units, one per (partnership, date).
pub struct AssignmentRepo {
    db: Database,
}

impl AssignmentRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert unless the (partnership, date) slot is taken. Returns whether
    /// this call created it.
    #[instrument(
        skip_all,
        fields(partnership_id = %assignment.partnership_id, date = %assignment.date)
    )]
    pub fn create_if_absent(
        &self,
        assignment: &DailySubtopicAssignment,
    ) -> Result<bool, StoreError> {
        let completion = serde_json::to_string(&assignment.user_completion)?;
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO daily_assignments
                    (partnership_id, date, subtopic_id, user_completion, both_completed,
                     both_completed_at, next_scheduled_date, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    assignment.partnership_id.as_str(),
                    row_helpers::format_date(assignment.date),
                    assignment.subtopic_id.0,
                    completion,
                    assignment.both_completed,
                    assignment.both_completed_at.map(row_helpers::format_time),
                    assignment.next_scheduled_date.map(row_helpers::format_date),
                    row_helpers::format_time(assignment.created_at),
                    row_helpers::format_time(assignment.updated_at),
                ],
            )?;
            if inserted == 0 {
                debug!("assignment slot already taken");
            }
            Ok(inserted == 1)
        })
    }

    #[instrument(skip(self), fields(partnership_id = %partnership))]
    pub fn get(
        &self,
        partnership: &PartnershipId,
        date: NaiveDate,
    ) -> Result<Option<DailySubtopicAssignment>, StoreError> {
        self.db.with_conn(|conn| load(conn, partnership, date))
    }

    /// The assignment still waiting on at least one partner, if any.
    #[instrument(skip(self), fields(partnership_id = %partnership))]
    pub fn open_for(
        &self,
        partnership: &PartnershipId,
    ) -> Result<Option<DailySubtopicAssignment>, StoreError> {
        self.query_one(
            &format!(
                "{SELECT} WHERE partnership_id = ?1 AND both_completed = 0
                 ORDER BY date DESC LIMIT 1"
            ),
            partnership,
        )
    }

    /// Most recent assignment by date, open or not.
    #[instrument(skip(self), fields(partnership_id = %partnership))]
    pub fn latest_for(
        &self,
        partnership: &PartnershipId,
    ) -> Result<Option<DailySubtopicAssignment>, StoreError> {
        self.query_one(
            &format!("{SELECT} WHERE partnership_id = ?1 ORDER BY date DESC LIMIT 1"),
            partnership,
        )
    }

    /// History, newest first.
    #[instrument(skip(self), fields(partnership_id = %partnership))]
    pub fn list_for(
        &self,
        partnership: &PartnershipId,
        limit: u32,
    ) -> Result<Vec<DailySubtopicAssignment>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT} WHERE partnership_id = ?1 ORDER BY date DESC LIMIT ?2"
            ))?;
            let mut rows = stmt.query(rusqlite::params![partnership.as_str(), limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_assignment(row)?);
            }
            Ok(results)
        })
    }

    /// Record that `account` finished the unit at `now`.
    ///
    /// Repeating a completion is a no-op that returns the stored document.
    /// A write to an assignment both partners already finished is a
    /// conflict. Each effective write publishes a before/after change.
    #[instrument(skip(self, now), fields(partnership_id = %partnership, account_id = %account))]
    pub fn record_completion(
        &self,
        partnership: &PartnershipId,
        date: NaiveDate,
        account: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<DailySubtopicAssignment, StoreError> {
        self.db.with_tx(|conn| {
            let before = load(conn, partnership, date)?.ok_or_else(|| {
                StoreError::NotFound(format!("assignment {}", document_id(partnership, date)))
            })?;
            if before.both_completed {
                return Err(StoreError::Conflict(format!(
                    "assignment {} is already completed by both partners",
                    document_id(partnership, date)
                )));
            }
            if before.has_completed(account) {
                debug!("completion already recorded");
                return Ok(before);
            }

            let mut after = before.clone();
            after.user_completion.insert(account.clone(), now);
            after.updated_at = now;
            conn.execute(
                "UPDATE daily_assignments SET user_completion = ?1, updated_at = ?2
                 WHERE partnership_id = ?3 AND date = ?4",
                rusqlite::params![
                    serde_json::to_string(&after.user_completion)?,
                    row_helpers::format_time(now),
                    partnership.as_str(),
                    row_helpers::format_date(date),
                ],
            )?;
            changes::append(
                conn,
                Collection::DailyAssignments,
                &document_id(partnership, date),
                ChangeOp::Update,
                Some(&before),
                &after,
                now,
            )?;
            Ok(after)
        })
    }

    /// Flip `both_completed` exactly once. Returns true only for the call
    /// that performed the transition.
    #[instrument(skip(self, at), fields(partnership_id = %partnership, date = %date))]
    pub fn mark_both_completed(
        &self,
        partnership: &PartnershipId,
        date: NaiveDate,
        at: DateTime<Utc>,
        next_scheduled_date: NaiveDate,
    ) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE daily_assignments
                 SET both_completed = 1, both_completed_at = ?1,
                     next_scheduled_date = ?2, updated_at = ?1
                 WHERE partnership_id = ?3 AND date = ?4 AND both_completed = 0",
                rusqlite::params![
                    row_helpers::format_time(at),
                    row_helpers::format_date(next_scheduled_date),
                    partnership.as_str(),
                    row_helpers::format_date(date),
                ],
            )?;
            Ok(changed == 1)
        })
    }

    fn query_one(
        &self,
        sql: &str,
        partnership: &PartnershipId,
    ) -> Result<Option<DailySubtopicAssignment>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([partnership.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_assignment(row).map(Some),
                None => Ok(None),
            }
        })
    }
}

fn load(
    conn: &Connection,
    partnership: &PartnershipId,
    date: NaiveDate,
) -> Result<Option<DailySubtopicAssignment>, StoreError> {
    let mut stmt = conn.prepare(&format!("{SELECT} WHERE partnership_id = ?1 AND date = ?2"))?;
    let mut rows =
        stmt.query(rusqlite::params![partnership.as_str(), row_helpers::format_date(date)])?;
    match rows.next()? {
        Some(row) => row_to_assignment(row).map(Some),
        None => Ok(None),
    }
}

fn row_to_assignment(row: &rusqlite::Row<'_>) -> Result<DailySubtopicAssignment, StoreError> {
    const T: &str = "daily_assignments";
    let partnership_id: String = row_helpers::get(row, 0, T, "partnership_id")?;
    let date: String = row_helpers::get(row, 1, T, "date")?;
    let completion: String = row_helpers::get(row, 3, T, "user_completion")?;
    let both_completed_at: Option<String> = row_helpers::get_opt(row, 5, T, "both_completed_at")?;
    let next_date: Option<String> = row_helpers::get_opt(row, 6, T, "next_scheduled_date")?;
    let created_at: String = row_helpers::get(row, 7, T, "created_at")?;
    let updated_at: String = row_helpers::get(row, 8, T, "updated_at")?;
    let user_completion: BTreeMap<AccountId, DateTime<Utc>> =
        row_helpers::parse_json(&completion, T, "user_completion")?;

    Ok(DailySubtopicAssignment {
        partnership_id: PartnershipId::from_raw(partnership_id),
        date: row_helpers::parse_date(&date, T, "date")?,
        subtopic_id: SubtopicId(row_helpers::get(row, 2, T, "subtopic_id")?),
        user_completion,
        both_completed: row_helpers::get(row, 4, T, "both_completed")?,
        both_completed_at: both_completed_at
            .map(|raw| row_helpers::parse_time(&raw, T, "both_completed_at"))
            .transpose()?,
        next_scheduled_date: next_date
            .map(|raw| row_helpers::parse_date(&raw, T, "next_scheduled_date"))
            .transpose()?,
        created_at: row_helpers::parse_time(&created_at, T, "created_at")?,
        updated_at: row_helpers::parse_time(&updated_at, T, "updated_at")?,
    })
}
