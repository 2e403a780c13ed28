use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use super::search::index_subject;
use super::store::Store;
use super::types::{
    decode_instant, decode_micros, encode_instant, encode_micros, LedgerEntry, StoreError,
};
use crate::model::{
    Assignment, ResourceCategory, ResourceItem, ResourcePayload, ReviewStatistics,
    StandaloneResource, StudyMaterials, Subject,
};

/// Row id of the single user profile row.
const USER_ROW_ID: i64 = 0;

impl Store {
    // ========================================================================
    // Ledger
    // ========================================================================

    /// Ledger row for `category`, or `None` if it was never synced.
    pub async fn ledger_entry(
        &self,
        category: ResourceCategory,
    ) -> Result<Option<LedgerEntry>, StoreError> {
        let row: Option<(String, i64)> = sqlx::query_as(
            "SELECT last_update_at, fetched_at FROM sync_ledger WHERE category = ?",
        )
        .bind(category.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from_sqlx)?;

        row.map(|(last_update_at, fetched_at)| {
            Ok(LedgerEntry {
                category,
                last_update_at: decode_instant("sync_ledger", &last_update_at)?,
                fetched_at: decode_micros(Some(fetched_at)).ok_or_else(|| {
                    StoreError::corrupt("sync_ledger", format!("fetched_at {fetched_at}"))
                })?,
            })
        })
        .transpose()
    }

    // ========================================================================
    // Merge Operations
    // ========================================================================

    /// Upsert a fetched collection and advance its ledger row, atomically.
    ///
    /// Each item replaces any stored row with the same id. The ledger cursor
    /// becomes the collection's `data_updated_at` (falling back to the newest
    /// item) when items arrived, or `now` for an empty delta. Nothing is
    /// written if any statement fails.
    ///
    /// Returns the number of items merged.
    pub(crate) async fn merge_collection(
        &self,
        category: ResourceCategory,
        items: &[ResourceItem],
        collection_updated_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        self.ensure_writable()?;
        if let Some(item) = items.iter().find(|i| i.category() != category) {
            return Err(StoreError::CategoryMismatch {
                expected: category,
                found: item.category(),
            });
        }

        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;

        for item in items {
            match &item.payload {
                ResourcePayload::Assignment(assignment) => {
                    upsert_assignment(&mut *tx, item, assignment).await?
                }
                ResourcePayload::Subject(subject) => upsert_subject(&mut *tx, item, subject).await?,
                ResourcePayload::StudyMaterials(materials) => {
                    upsert_study_materials(&mut *tx, item, materials).await?
                }
                ResourcePayload::ReviewStatistics(stats) => {
                    upsert_review_statistics(&mut *tx, item, stats).await?
                }
            }
        }

        if !items.is_empty()
            && matches!(
                category,
                ResourceCategory::Assignments | ResourceCategory::Subjects
            )
        {
            backfill_assignment_levels(&mut *tx).await?;
        }

        let cursor = if items.is_empty() {
            now
        } else {
            collection_updated_at
                .or_else(|| items.iter().map(|i| i.data_updated_at).max())
                .unwrap_or(now)
        };
        write_ledger(&mut *tx, category, cursor, now).await?;

        tx.commit().await.map_err(StoreError::from_sqlx)?;

        tracing::debug!(
            category = %category,
            items = items.len(),
            cursor = %cursor,
            "Merged collection"
        );
        Ok(items.len())
    }

    /// Replace the user profile and advance the user ledger row, atomically.
    pub(crate) async fn merge_user(
        &self,
        resource: &StandaloneResource,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let payload = serde_json::to_string(&resource.user)?;

        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO user_profile
                (id, category, source_url, data_updated_at, username, level, payload)
            VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(USER_ROW_ID)
        .bind(ResourceCategory::User.as_str())
        .bind(&resource.source_url)
        .bind(encode_instant(resource.data_updated_at))
        .bind(&resource.user.username)
        .bind(resource.user.level)
        .bind(&payload)
        .execute(&mut *tx)
        .await?;

        write_ledger(&mut *tx, ResourceCategory::User, resource.data_updated_at, now).await?;
        tx.commit().await.map_err(StoreError::from_sqlx)?;

        tracing::debug!(
            username = %resource.user.username,
            level = resource.user.level,
            "Merged user"
        );
        Ok(())
    }
}

// ============================================================================
// Statement Helpers
// ============================================================================

async fn write_ledger(
    conn: &mut SqliteConnection,
    category: ResourceCategory,
    cursor: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO sync_ledger (category, last_update_at, fetched_at)
        VALUES (?, ?, ?)
        ON CONFLICT(category) DO UPDATE SET
            last_update_at = excluded.last_update_at,
            fetched_at = excluded.fetched_at
    "#,
    )
    .bind(category.as_str())
    .bind(encode_instant(cursor))
    .bind(now.timestamp_micros())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn upsert_assignment(
    conn: &mut SqliteConnection,
    item: &ResourceItem,
    assignment: &Assignment,
) -> Result<(), StoreError> {
    let payload = serde_json::to_string(assignment)?;
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO assignments
            (id, category, source_url, data_updated_at, subject_id, subject_type, level,
             srs_stage, unlocked_at, started_at, passed_at, burned_at, available_at,
             resurrected_at, passed, resurrected, payload)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
    "#,
    )
    .bind(item.id)
    .bind(ResourceCategory::Assignments.as_str())
    .bind(&item.source_url)
    .bind(encode_instant(item.data_updated_at))
    .bind(assignment.subject_id)
    .bind(assignment.subject_type.as_str())
    .bind(assignment.level)
    .bind(assignment.srs_stage.value())
    .bind(encode_micros(assignment.unlocked_at))
    .bind(encode_micros(assignment.started_at))
    .bind(encode_micros(assignment.passed_at))
    .bind(encode_micros(assignment.burned_at))
    .bind(encode_micros(assignment.available_at))
    .bind(encode_micros(assignment.resurrected_at))
    .bind(assignment.is_passed)
    .bind(assignment.is_resurrected)
    .bind(&payload)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn upsert_subject(
    conn: &mut SqliteConnection,
    item: &ResourceItem,
    subject: &Subject,
) -> Result<(), StoreError> {
    let payload = serde_json::to_string(subject)?;
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO subjects
            (id, category, source_url, data_updated_at, subject_type, level, slug, characters, payload)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    "#,
    )
    .bind(item.id)
    .bind(ResourceCategory::Subjects.as_str())
    .bind(&item.source_url)
    .bind(encode_instant(item.data_updated_at))
    .bind(subject.kind.as_str())
    .bind(subject.level)
    .bind(&subject.slug)
    .bind(&subject.characters)
    .bind(&payload)
    .execute(&mut *conn)
    .await?;

    index_subject(conn, item.id, subject).await
}

async fn upsert_study_materials(
    conn: &mut SqliteConnection,
    item: &ResourceItem,
    materials: &StudyMaterials,
) -> Result<(), StoreError> {
    let payload = serde_json::to_string(materials)?;
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO study_materials
            (id, category, source_url, data_updated_at, subject_id, payload)
        VALUES (?, ?, ?, ?, ?, ?)
    "#,
    )
    .bind(item.id)
    .bind(ResourceCategory::StudyMaterials.as_str())
    .bind(&item.source_url)
    .bind(encode_instant(item.data_updated_at))
    .bind(materials.subject_id)
    .bind(&payload)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn upsert_review_statistics(
    conn: &mut SqliteConnection,
    item: &ResourceItem,
    stats: &ReviewStatistics,
) -> Result<(), StoreError> {
    let payload = serde_json::to_string(stats)?;
    sqlx::query(
        r#"
        INSERT OR REPLACE INTO review_statistics
            (id, category, source_url, data_updated_at, subject_id, payload)
        VALUES (?, ?, ?, ?, ?, ?)
    "#,
    )
    .bind(item.id)
    .bind(ResourceCategory::ReviewStatistics.as_str())
    .bind(&item.source_url)
    .bind(encode_instant(item.data_updated_at))
    .bind(stats.subject_id)
    .bind(&payload)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Assignments arrive without a level; the owning subject's level wins
/// whenever both are stored, whichever category synced first.
async fn backfill_assignment_levels(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE assignments
        SET level = (SELECT s.level FROM subjects s WHERE s.id = assignments.subject_id)
        WHERE EXISTS (
            SELECT 1 FROM subjects s
            WHERE s.id = assignments.subject_id AND s.level != assignments.level
        )
    "#,
    )
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() > 0 {
        tracing::debug!(rows = result.rows_affected(), "Backfilled assignment levels");
    }
    Ok(())
}
