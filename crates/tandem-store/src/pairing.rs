use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tandem_core::ids::{AccountId, PairingRequestId};

use crate::changes::{self, ChangeOp, Collection};
use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingStatus {
    Pending,
    Accepted,
    Declined,
}

impl std::fmt::Display for PairingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Declined => write!(f, "declined"),
        }
    }
}

impl std::str::FromStr for PairingStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            other => Err(format!("unknown pairing status: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingRequest {
    pub id: PairingRequestId,
    pub from_account: AccountId,
    pub to_account: AccountId,
    pub status: PairingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct PairingRepo {
    db: Database,
}

impl PairingRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a pending request and publish it to the change feed.
    #[instrument(skip(self, now), fields(account_id = %from, to = %to))]
    pub fn create(
        &self,
        from: &AccountId,
        to: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<PairingRequest, StoreError> {
        if from == to {
            return Err(StoreError::Conflict(format!("account {from} cannot pair with itself")));
        }
        let request = PairingRequest {
            id: PairingRequestId::new(),
            from_account: from.clone(),
            to_account: to.clone(),
            status: PairingStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.db.with_tx(|conn| {
            let stamp = row_helpers::format_time(now);
            conn.execute(
                "INSERT INTO pairing_requests
                    (id, from_account, to_account, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 'pending', ?4, ?4)",
                rusqlite::params![request.id.as_str(), from.as_str(), to.as_str(), stamp],
            )?;
            changes::append(
                conn,
                Collection::PairingRequests,
                request.id.as_str(),
                ChangeOp::Create,
                None,
                &request,
                now,
            )?;
            Ok(())
        })?;
        Ok(request)
    }

    #[instrument(skip(self), fields(request_id = %id))]
    pub fn get(&self, id: &PairingRequestId) -> Result<PairingRequest, StoreError> {
        self.db.with_conn(|conn| load(conn, id))
    }

    /// Move a pending request to `status`. Returns the updated request;
    /// responding to a request that is no longer pending is a conflict.
    #[instrument(skip(self, now), fields(request_id = %id, status = %status))]
    pub fn respond(
        &self,
        id: &PairingRequestId,
        status: PairingStatus,
        now: DateTime<Utc>,
    ) -> Result<PairingRequest, StoreError> {
        if status == PairingStatus::Pending {
            return Err(StoreError::Conflict("cannot respond with pending".into()));
        }
        self.db.with_tx(|conn| {
            let before = load(conn, id)?;
            if before.status != PairingStatus::Pending {
                return Err(StoreError::Conflict(format!(
                    "pairing request {id} already {}",
                    before.status
                )));
            }
            conn.execute(
                "UPDATE pairing_requests SET status = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![status.to_string(), row_helpers::format_time(now), id.as_str()],
            )?;
            let after = PairingRequest {
                status,
                updated_at: now,
                ..before.clone()
            };
            changes::append(
                conn,
                Collection::PairingRequests,
                id.as_str(),
                ChangeOp::Update,
                Some(&before),
                &after,
                now,
            )?;
            Ok(after)
        })
    }

    /// Pending requests addressed to `to`, oldest first.
    #[instrument(skip(self), fields(account_id = %to))]
    pub fn pending_for(&self, to: &AccountId) -> Result<Vec<PairingRequest>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, from_account, to_account, status, created_at, updated_at
                 FROM pairing_requests WHERE to_account = ?1 AND status = 'pending'
                 ORDER BY created_at ASC",
            )?;
            let mut rows = stmt.query([to.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_request(row)?);
            }
            Ok(results)
        })
    }
}

fn load(conn: &rusqlite::Connection, id: &PairingRequestId) -> Result<PairingRequest, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, from_account, to_account, status, created_at, updated_at
         FROM pairing_requests WHERE id = ?1",
    )?;
    let mut rows = stmt.query([id.as_str()])?;
    match rows.next()? {
        Some(row) => row_to_request(row),
        None => Err(StoreError::NotFound(format!("pairing request {id}"))),
    }
}

fn row_to_request(row: &rusqlite::Row<'_>) -> Result<PairingRequest, StoreError> {
    const T: &str = "pairing_requests";
    let id: String = row_helpers::get(row, 0, T, "id")?;
    let from: String = row_helpers::get(row, 1, T, "from_account")?;
    let to: String = row_helpers::get(row, 2, T, "to_account")?;
    let status: String = row_helpers::get(row, 3, T, "status")?;
    let created_at: String = row_helpers::get(row, 4, T, "created_at")?;
    let updated_at: String = row_helpers::get(row, 5, T, "updated_at")?;
    Ok(PairingRequest {
        id: PairingRequestId::from_raw(id),
        from_account: AccountId::from_raw(from),
        to_account: AccountId::from_raw(to),
        status: row_helpers::parse_enum(&status, T, "status")?,
        created_at: row_helpers::parse_time(&created_at, T, "created_at")?,
        updated_at: row_helpers::parse_time(&updated_at, T, "updated_at")?,
    })
}
