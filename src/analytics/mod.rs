//! Read-only views over the store.
//!
//! Every operation is a pure function of the current snapshot (and of `now`
//! where time matters). Queries share the store's single connection with the
//! sync engine, so a read issued after a merge committed always observes it.

mod graph;
mod levels;
mod progression;
mod queue;
mod search;
mod srs;

use thiserror::Error;

use crate::error::ErrorKind;
use crate::model::{
    Assignment, ResourceCategory, ReviewStatistics, StudyMaterials, Subject, User,
};
use crate::storage::{AssignmentRow, Store, StoreError, ASSIGNMENT_COLUMNS};

pub use graph::SubjectGraph;
pub use levels::{LevelDurationStats, LevelSpan, LevelTimeline};
pub use progression::{LevelProgression, ProgressCount};
pub use queue::StudyQueue;
pub use search::SearchHit;
pub use srs::{ItemCounts, SrsDistribution, TimelineEntry, TimelineFilter};

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Invalid search query: {0}")]
    InvalidQuery(String),
}

impl AnalyticsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalyticsError::Store(_) => ErrorKind::Storage,
            AnalyticsError::InvalidQuery(_) => ErrorKind::Decode,
        }
    }
}

impl From<sqlx::Error> for AnalyticsError {
    fn from(err: sqlx::Error) -> Self {
        AnalyticsError::Store(StoreError::from_sqlx(err))
    }
}

/// Query layer over a [`Store`]. Never writes.
#[derive(Clone)]
pub struct Analytics {
    store: Store,
}

impl Analytics {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// True once at least one merge of `category` has committed.
    pub async fn has_category(&self, category: ResourceCategory) -> Result<bool, AnalyticsError> {
        Ok(self.store.ledger_entry(category).await?.is_some())
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub async fn user(&self) -> Result<Option<User>, AnalyticsError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT payload FROM user_profile LIMIT 1")
            .fetch_optional(&self.store.pool)
            .await?;
        row.map(|(payload,)| decode_payload("user_profile", &payload))
            .transpose()
    }

    pub async fn subject(&self, id: i64) -> Result<Option<Subject>, AnalyticsError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT payload FROM subjects WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.store.pool)
            .await?;
        row.map(|(payload,)| decode_payload("subjects", &payload))
            .transpose()
    }

    /// Subjects at `level`, ordered by id.
    pub async fn subjects_at_level(
        &self,
        level: u32,
    ) -> Result<Vec<(i64, Subject)>, AnalyticsError> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, payload FROM subjects WHERE level = ? ORDER BY id")
                .bind(level)
                .fetch_all(&self.store.pool)
                .await?;
        rows.into_iter()
            .map(|(id, payload)| Ok((id, decode_payload("subjects", &payload)?)))
            .collect()
    }

    pub async fn assignment_for_subject(
        &self,
        subject_id: i64,
    ) -> Result<Option<Assignment>, AnalyticsError> {
        let row: Option<AssignmentRow> = sqlx::query_as(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM assignments WHERE subject_id = ?"
        ))
        .bind(subject_id)
        .fetch_optional(&self.store.pool)
        .await?;
        Ok(row.map(AssignmentRow::into_assignment).transpose()?)
    }

    pub async fn study_materials_for_subject(
        &self,
        subject_id: i64,
    ) -> Result<Option<StudyMaterials>, AnalyticsError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT payload FROM study_materials WHERE subject_id = ?")
                .bind(subject_id)
                .fetch_optional(&self.store.pool)
                .await?;
        row.map(|(payload,)| decode_payload("study_materials", &payload))
            .transpose()
    }

    pub async fn review_statistics_for_subject(
        &self,
        subject_id: i64,
    ) -> Result<Option<ReviewStatistics>, AnalyticsError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT payload FROM review_statistics WHERE subject_id = ?")
                .bind(subject_id)
                .fetch_optional(&self.store.pool)
                .await?;
        row.map(|(payload,)| decode_payload("review_statistics", &payload))
            .transpose()
    }

    // ========================================================================
    // Shared Loaders
    // ========================================================================

    pub(crate) async fn all_assignments(&self) -> Result<Vec<Assignment>, AnalyticsError> {
        let rows: Vec<AssignmentRow> =
            sqlx::query_as(&format!("SELECT {ASSIGNMENT_COLUMNS} FROM assignments"))
                .fetch_all(&self.store.pool)
                .await?;
        rows.into_iter()
            .map(|row| row.into_assignment().map_err(AnalyticsError::from))
            .collect()
    }

    pub(crate) async fn all_subjects(&self) -> Result<Vec<(i64, Subject)>, AnalyticsError> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, payload FROM subjects ORDER BY id")
                .fetch_all(&self.store.pool)
                .await?;
        rows.into_iter()
            .map(|(id, payload)| Ok((id, decode_payload("subjects", &payload)?)))
            .collect()
    }
}

fn decode_payload<T: serde::de::DeserializeOwned>(
    table: &'static str,
    payload: &str,
) -> Result<T, AnalyticsError> {
    serde_json::from_str(payload)
        .map_err(|e| AnalyticsError::Store(StoreError::corrupt(table, e.to_string())))
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::model::{AssignmentDates, SubjectType};

    #[tokio::test]
    async fn test_has_category_follows_ledger() {
        let store = Store::open_in_memory().await.unwrap();
        let analytics = Analytics::new(store.clone());
        assert!(!analytics.has_category(ResourceCategory::Subjects).await.unwrap());

        merge(&store, ResourceCategory::Subjects, vec![]).await;
        assert!(analytics.has_category(ResourceCategory::Subjects).await.unwrap());
        assert!(!analytics.has_category(ResourceCategory::User).await.unwrap());
    }

    #[tokio::test]
    async fn test_lookups_return_stored_records() {
        let store = Store::open_in_memory().await.unwrap();
        let analytics = Analytics::new(store.clone());
        merge(
            &store,
            ResourceCategory::Subjects,
            vec![subject_item(
                3,
                subject(SubjectType::Kanji, 4, Some("山"), &["Mountain"], &["さん"], &[]),
            )],
        )
        .await;
        merge(
            &store,
            ResourceCategory::Assignments,
            vec![assignment_item(
                30,
                3,
                SubjectType::Kanji,
                2,
                AssignmentDates {
                    unlocked_at: Some(at(10)),
                    started_at: Some(at(20)),
                    ..Default::default()
                },
            )],
        )
        .await;
        merge_user(&store, 4).await;

        let subject = analytics.subject(3).await.unwrap().unwrap();
        assert_eq!(subject.primary_meaning(), Some("Mountain"));
        assert!(analytics.subject(99).await.unwrap().is_none());

        let assignment = analytics.assignment_for_subject(3).await.unwrap().unwrap();
        assert_eq!(assignment.level, 4, "level is taken from the subject");
        assert_eq!(assignment.srs_stage.value(), 2);

        assert_eq!(analytics.subjects_at_level(4).await.unwrap().len(), 1);
        assert!(analytics.study_materials_for_subject(3).await.unwrap().is_none());
        assert!(analytics.review_statistics_for_subject(3).await.unwrap().is_none());
        assert_eq!(analytics.user().await.unwrap().unwrap().level, 4);
    }
}
