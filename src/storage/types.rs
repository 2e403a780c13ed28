use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use std::path::PathBuf;
use thiserror::Error;

use crate::model::{
    Assignment, AssignmentDates, ResourceCategory, SrsStage, SubjectType,
};
use crate::schema::SchemaError;

// ============================================================================
// Error Types
// ============================================================================

/// Store failures. Any of these means the local cache can no longer be
/// trusted; callers decide whether that is fatal.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Read-only open of a store that was never created
    #[error("No store exists at {0}")]
    Missing(PathBuf),

    /// Write attempted through a read-only handle
    #[error("Store is open read-only")]
    ReadOnly,

    /// Another process holds the database lock
    #[error("Another process has the store locked. Please close it and try again.")]
    Locked,

    /// The on-disk layout was created from a different schema declaration
    #[error("Store schema {found} does not match expected {expected}")]
    SchemaMismatch { expected: String, found: String },

    #[error("Invalid schema declaration: {0}")]
    Schema(#[from] SchemaError),

    /// Merge was handed an item belonging to another category
    #[error("Cannot merge {found} item into {expected}")]
    CategoryMismatch {
        expected: ResourceCategory,
        found: ResourceCategory,
    },

    /// A stored row could not be turned back into a domain record
    #[error("Corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    #[error("Payload encoding failed: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Classify a sqlx error, separating lock contention from everything else.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5) and SQLITE_LOCKED (6)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
        {
            return StoreError::Locked;
        }

        StoreError::Database(err)
    }

    pub(crate) fn corrupt(table: &'static str, reason: impl Into<String>) -> Self {
        StoreError::Corrupt {
            table,
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Access Mode and Ledger
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn is_read_only(&self) -> bool {
        matches!(self, AccessMode::ReadOnly)
    }
}

/// Ledger row for one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub category: ResourceCategory,
    /// Incremental cursor sent as `updated_after` on the next fetch
    pub last_update_at: DateTime<Utc>,
    /// Wall-clock time of the last committed merge
    pub fetched_at: DateTime<Utc>,
}

/// Result of comparing the search index against the subjects table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConsistencyReport {
    pub subjects_count: i64,
    pub indexed_count: i64,
    /// Index rows with no subject behind them
    pub orphaned_entries: i64,
    /// Subjects missing from the index
    pub missing_entries: i64,
    pub is_consistent: bool,
}

// ============================================================================
// Time Encoding
// ============================================================================

/// Unix microseconds, used for columns that take part in range queries.
///
/// Microseconds match the precision of the RFC 3339 text the service sends,
/// so a stored instant compares and decodes exactly as it arrived.
pub(crate) fn encode_micros(value: Option<DateTime<Utc>>) -> Option<i64> {
    value.map(|d| d.timestamp_micros())
}

pub(crate) fn decode_micros(value: Option<i64>) -> Option<DateTime<Utc>> {
    value.and_then(|micros| Utc.timestamp_micros(micros).single())
}

/// RFC 3339 with microseconds, used where a timestamp must round-trip exactly.
pub(crate) fn encode_instant(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_instant(
    table: &'static str,
    value: &str,
) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(table, format!("bad timestamp {value:?}: {e}")))
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for assignment queries.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AssignmentRow {
    pub subject_id: i64,
    pub subject_type: String,
    pub level: i64,
    pub srs_stage: i64,
    pub unlocked_at: Option<i64>,
    pub started_at: Option<i64>,
    pub passed_at: Option<i64>,
    pub burned_at: Option<i64>,
    pub available_at: Option<i64>,
    pub resurrected_at: Option<i64>,
}

/// Column list matching [`AssignmentRow`].
pub(crate) const ASSIGNMENT_COLUMNS: &str = "subject_id, subject_type, level, srs_stage, \
     unlocked_at, started_at, passed_at, burned_at, available_at, resurrected_at";

impl AssignmentRow {
    pub(crate) fn into_assignment(self) -> Result<Assignment, StoreError> {
        let subject_type: SubjectType = self
            .subject_type
            .parse()
            .map_err(|e: String| StoreError::corrupt("assignments", e))?;
        let stage = u8::try_from(self.srs_stage)
            .ok()
            .and_then(SrsStage::new)
            .ok_or_else(|| {
                StoreError::corrupt("assignments", format!("srs stage {}", self.srs_stage))
            })?;
        let level = u32::try_from(self.level)
            .map_err(|_| StoreError::corrupt("assignments", format!("level {}", self.level)))?;

        Ok(Assignment::new(
            self.subject_id,
            subject_type,
            level,
            stage,
            AssignmentDates {
                unlocked_at: decode_micros(self.unlocked_at),
                started_at: decode_micros(self.started_at),
                passed_at: decode_micros(self.passed_at),
                burned_at: decode_micros(self.burned_at),
                available_at: decode_micros(self.available_at),
                resurrected_at: decode_micros(self.resurrected_at),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_round_trips_with_microseconds() {
        let instant = Utc.timestamp_opt(1_700_000_000, 123_456_000).unwrap();
        let encoded = encode_instant(instant);
        assert_eq!(encoded, "2023-11-14T22:13:20.123456Z");
        assert_eq!(decode_instant("t", &encoded).unwrap(), instant);
    }

    #[test]
    fn test_decode_instant_rejects_garbage() {
        assert!(matches!(
            decode_instant("sync_ledger", "yesterday"),
            Err(StoreError::Corrupt { table: "sync_ledger", .. })
        ));
    }

    #[test]
    fn test_assignment_row_rejects_bad_stage() {
        let row = AssignmentRow {
            subject_id: 1,
            subject_type: "kanji".into(),
            level: 1,
            srs_stage: 12,
            unlocked_at: None,
            started_at: None,
            passed_at: None,
            burned_at: None,
            available_at: None,
            resurrected_at: None,
        };
        assert!(row.into_assignment().is_err());
    }

    #[test]
    fn test_micros_keep_sub_second_precision() {
        let instant = Utc.timestamp_opt(1_700_000_000, 700_001_000).unwrap();
        let encoded = encode_micros(Some(instant));
        assert_eq!(encoded, Some(1_700_000_000_700_001));
        assert_eq!(decode_micros(encoded), Some(instant));
        assert_eq!(decode_micros(None), None);
    }
}
