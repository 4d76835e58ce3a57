//! Durable per-document change log.
//!
//! Every write that downstream handlers react to appends one row here in
//! the same transaction, carrying the document before and after the write.
//! Rows stay pending until acknowledged, so a crash between handling and
//! acknowledging means the change is delivered again.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    PairingRequests,
    DailyAssignments,
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PairingRequests => write!(f, "pairing_requests"),
            Self::DailyAssignments => write!(f, "daily_assignments"),
        }
    }
}

impl std::str::FromStr for Collection {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pairing_requests" => Ok(Self::PairingRequests),
            "daily_assignments" => Ok(Self::DailyAssignments),
            other => Err(format!("unknown collection: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Create,
    Update,
}

impl std::fmt::Display for ChangeOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
        }
    }
}

impl std::str::FromStr for ChangeOp {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            other => Err(format!("unknown change op: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChange {
    pub seq: i64,
    pub collection: Collection,
    pub document_id: String,
    pub operation: ChangeOp,
    pub before: Option<Value>,
    pub after: Value,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl DocumentChange {
    /// Decode the before/after snapshots into a typed document.
    pub fn snapshots<T: serde::de::DeserializeOwned>(&self) -> Result<(Option<T>, T), StoreError> {
        let before = self.before.clone().map(serde_json::from_value).transpose()?;
        let after = serde_json::from_value(self.after.clone())?;
        Ok((before, after))
    }
}

/// Append a change row on an already-held connection so it commits with
/// the write it describes.
pub(crate) fn append<T: Serialize>(
    conn: &Connection,
    collection: Collection,
    document_id: &str,
    operation: ChangeOp,
    before: Option<&T>,
    after: &T,
    now: DateTime<Utc>,
) -> Result<i64, StoreError> {
    let before_json = before.map(serde_json::to_string).transpose()?;
    let after_json = serde_json::to_string(after)?;
    conn.execute(
        "INSERT INTO document_changes
            (collection, document_id, operation, before_json, after_json, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            collection.to_string(),
            document_id,
            operation.to_string(),
            before_json,
            after_json,
            row_helpers::format_time(now),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub struct ChangeFeedRepo {
    db: Database,
}

impl ChangeFeedRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Oldest unacknowledged changes, in sequence order.
    #[instrument(skip(self))]
    pub fn pending(&self, limit: u32) -> Result<Vec<DocumentChange>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT seq, collection, document_id, operation,
                        before_json, after_json, attempts, created_at
                 FROM document_changes WHERE acked_at IS NULL
                 ORDER BY seq ASC LIMIT ?1",
            )?;
            let mut rows = stmt.query([limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_change(row)?);
            }
            Ok(results)
        })
    }

    /// Count a delivery attempt before handing the change to a handler.
    #[instrument(skip(self))]
    pub fn mark_attempt(&self, seq: i64) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE document_changes SET attempts = attempts + 1 WHERE seq = ?1",
                [seq],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self, now))]
    pub fn ack(&self, seq: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE document_changes SET acked_at = ?1 WHERE seq = ?2 AND acked_at IS NULL",
                rusqlite::params![row_helpers::format_time(now), seq],
            )?;
            if changed == 0 {
                tracing::debug!(seq, "change already acknowledged");
            }
            Ok(())
        })
    }

    pub fn pending_count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM document_changes WHERE acked_at IS NULL",
                [],
                |row| row.get(0),
            )?)
        })
    }
}

fn row_to_change(row: &rusqlite::Row<'_>) -> Result<DocumentChange, StoreError> {
    const T: &str = "document_changes";
    let collection: String = row_helpers::get(row, 1, T, "collection")?;
    let operation: String = row_helpers::get(row, 3, T, "operation")?;
    let before: Option<String> = row_helpers::get_opt(row, 4, T, "before_json")?;
    let after: String = row_helpers::get(row, 5, T, "after_json")?;
    let created_at: String = row_helpers::get(row, 7, T, "created_at")?;

    Ok(DocumentChange {
        seq: row_helpers::get(row, 0, T, "seq")?,
        collection: row_helpers::parse_enum(&collection, T, "collection")?,
        document_id: row_helpers::get(row, 2, T, "document_id")?,
        operation: row_helpers::parse_enum(&operation, T, "operation")?,
        before: before
            .map(|raw| row_helpers::parse_json(&raw, T, "before_json"))
            .transpose()?,
        after: row_helpers::parse_json(&after, T, "after_json")?,
        attempts: row_helpers::get(row, 6, T, "attempts")?,
        created_at: row_helpers::parse_time(&created_at, T, "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn append_doc(db: &Database, id: &str, before: Option<Value>, after: Value) -> i64 {
        db.with_conn(|conn| {
            append(
                conn,
                Collection::PairingRequests,
                id,
                if before.is_some() { ChangeOp::Update } else { ChangeOp::Create },
                before.as_ref(),
                &after,
                Utc::now(),
            )
        })
        .unwrap()
    }

    #[test]
    fn pending_in_sequence_order() {
        let db = Database::in_memory().unwrap();
        let repo = ChangeFeedRepo::new(db.clone());
        let first = append_doc(&db, "r1", None, json!({"status": "pending"}));
        let second = append_doc(
            &db,
            "r1",
            Some(json!({"status": "pending"})),
            json!({"status": "accepted"}),
        );

        let pending = repo.pending(10).unwrap();
        assert_eq!(pending.iter().map(|c| c.seq).collect::<Vec<_>>(), vec![first, second]);
        assert_eq!(pending[0].operation, ChangeOp::Create);
        assert!(pending[0].before.is_none());
        assert_eq!(pending[1].before, Some(json!({"status": "pending"})));
        assert_eq!(pending[1].after["status"], "accepted");
    }

    #[test]
    fn unacked_changes_are_redelivered() {
        let db = Database::in_memory().unwrap();
        let repo = ChangeFeedRepo::new(db.clone());
        let seq = append_doc(&db, "r1", None, json!({}));

        repo.mark_attempt(seq).unwrap();
        repo.mark_attempt(seq).unwrap();
        let pending = repo.pending(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 2);

        repo.ack(seq, Utc::now()).unwrap();
        repo.ack(seq, Utc::now()).unwrap();
        assert!(repo.pending(10).unwrap().is_empty());
        assert_eq!(repo.pending_count().unwrap(), 0);
    }

    #[test]
    fn limit_respected() {
        let db = Database::in_memory().unwrap();
        let repo = ChangeFeedRepo::new(db.clone());
        for i in 0..5 {
            append_doc(&db, &format!("r{i}"), None, json!({}));
        }
        assert_eq!(repo.pending(2).unwrap().len(), 2);
        assert_eq!(repo.pending_count().unwrap(), 5);
    }

    #[test]
    fn collection_names_round_trip_through_text() {
        for c in [Collection::PairingRequests, Collection::DailyAssignments] {
            assert_eq!(c.to_string().parse::<Collection>().unwrap(), c);
        }
        assert!("sessions".parse::<Collection>().is_err());
    }
}
