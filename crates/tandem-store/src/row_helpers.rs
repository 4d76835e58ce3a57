use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Get an optional column value.
pub fn get_opt<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a JSON text column into `T`, returning CorruptRow on parse failure.
pub fn parse_json<T: DeserializeOwned>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON: {e}"),
    })
}

/// Parse a string into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Parse an RFC 3339 timestamp column.
pub fn parse_time(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp {raw}: {e}"),
        })
}

/// Parse a `YYYY-MM-DD` date column.
pub fn parse_date(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<NaiveDate, StoreError> {
    raw.parse().map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid date {raw}: {e}"),
    })
}

pub fn format_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

pub fn format_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pairing::PairingStatus;
    use chrono::TimeZone;

    #[test]
    fn parse_enum_success() {
        let status: PairingStatus = parse_enum("accepted", "pairing_requests", "status").unwrap();
        assert_eq!(status, PairingStatus::Accepted);
    }

    #[test]
    fn parse_enum_failure() {
        let result: Result<PairingStatus, _> = parse_enum("INVALID", "pairing_requests", "status");
        assert!(matches!(
            result,
            Err(StoreError::CorruptRow { table: "pairing_requests", column: "status", .. })
        ));
    }

    #[test]
    fn parse_json_typed() {
        let ids: Vec<i64> = parse_json("[3,1,2]", "accounts", "topic_ranking").unwrap();
        assert_eq!(ids, vec![3, 1, 2]);
        let bad: Result<Vec<i64>, _> = parse_json("not json", "accounts", "topic_ranking");
        assert!(matches!(bad, Err(StoreError::CorruptRow { column: "topic_ranking", .. })));
    }

    #[test]
    fn time_and_date_text_forms() {
        let t = Utc.with_ymd_and_hms(2025, 3, 10, 11, 59, 0).unwrap();
        assert_eq!(parse_time(&format_time(t), "t", "c").unwrap(), t);

        let d = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        assert_eq!(format_date(d), "2025-03-10");
        assert_eq!(parse_date("2025-03-10", "t", "c").unwrap(), d);
        assert!(parse_date("10/03/2025", "t", "c").is_err());
    }
}
