//! Pieces shared by the relational backends.

use jiff::Timestamp;
use snip_core::{Record, StorageError, UserId};

/// Column list matching [`UrlRow`].
pub(crate) const URL_COLUMNS: &str = "url, url_id, user_id, added, is_deleted";

/// One row of the `urls` table.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UrlRow {
    pub url: String,
    pub url_id: String,
    pub user_id: i64,
    pub added: i64,
    pub is_deleted: bool,
}

impl UrlRow {
    /// Converts the row into a [`Record`] read at `now`.
    pub fn into_record(self, now: Timestamp) -> Result<Record, StorageError> {
        let user_id = UserId::try_from(self.user_id).map_err(|e| {
            StorageError::InvalidData(format!("invalid user_id '{}': {e}", self.user_id))
        })?;
        let added = Timestamp::from_second(self.added).map_err(|e| {
            StorageError::InvalidData(format!("invalid added timestamp '{}': {e}", self.added))
        })?;

        Ok(Record {
            url: self.url,
            url_id: self.url_id,
            user_id,
            added,
            requested_at: now,
            is_deleted: self.is_deleted,
        })
    }
}

/// Resolves a point lookup into the contract's `NotFound` / `Deleted` split.
pub(crate) fn lookup_result(url_id: &str, row: Option<UrlRow>) -> Result<Record, StorageError> {
    match row {
        None => Err(StorageError::NotFound(url_id.to_string())),
        Some(row) if row.is_deleted => Err(StorageError::Deleted(url_id.to_string())),
        Some(row) => row.into_record(Timestamp::now()),
    }
}

/// Converts every row, reporting an empty set as `NotFound`.
pub(crate) fn user_records(user_id: UserId, rows: Vec<UrlRow>) -> Result<Vec<Record>, StorageError> {
    if rows.is_empty() {
        return Err(StorageError::NotFound(format!("no urls for user {user_id}")));
    }

    let now = Timestamp::now();
    rows.into_iter().map(|row| row.into_record(now)).collect()
}

pub(crate) fn count_to_u64(count: i64) -> u64 {
    u64::try_from(count).unwrap_or_default()
}

pub(crate) fn now_unix_seconds() -> i64 {
    Timestamp::now().as_second()
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
}

pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Configuration(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(is_deleted: bool) -> UrlRow {
        UrlRow {
            url: "https://example.com/a".to_string(),
            url_id: "abc123".to_string(),
            user_id: 7,
            added: 1_700_000_000,
            is_deleted,
        }
    }

    #[test]
    fn lookup_distinguishes_missing_from_deleted() {
        assert_eq!(
            lookup_result("abc123", None).unwrap_err(),
            StorageError::NotFound("abc123".to_string())
        );
        assert_eq!(
            lookup_result("abc123", Some(row(true))).unwrap_err(),
            StorageError::Deleted("abc123".to_string())
        );

        let record = lookup_result("abc123", Some(row(false))).unwrap();
        assert_eq!(record.user_id, 7);
        assert_eq!(record.added.as_second(), 1_700_000_000);
    }

    #[test]
    fn negative_user_id_is_invalid() {
        let mut bad = row(false);
        bad.user_id = -1;
        let err = bad.into_record(Timestamp::now()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidData(_)));
    }

    #[test]
    fn empty_user_listing_is_not_found() {
        let err = user_records(7, Vec::new()).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
