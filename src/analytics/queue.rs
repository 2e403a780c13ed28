use chrono::{DateTime, Duration, Utc};

use super::{Analytics, AnalyticsError};
use crate::storage::decode_micros;

/// Pending work at a given instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudyQueue {
    pub lessons_available: u32,
    /// Reviews due at or before `now`
    pub reviews_available: u32,
    /// Reviews becoming due in `(now, now + 1h]`
    pub reviews_available_next_hour: u32,
    /// Reviews becoming due in `(now, now + 24h]`
    pub reviews_available_next_day: u32,
    /// Earliest review strictly after `now`
    pub next_review_date: Option<DateTime<Utc>>,
}

/// Lessons, due reviews, reviews within an hour and a day, next review instant.
type QueueCounts = (i64, i64, i64, i64, Option<i64>);

impl Analytics {
    pub async fn study_queue(&self, now: DateTime<Utc>) -> Result<StudyQueue, AnalyticsError> {
        let now_micros = now.timestamp_micros();
        let hour = (now + Duration::hours(1)).timestamp_micros();
        let day = (now + Duration::hours(24)).timestamp_micros();

        let (lessons, reviews, next_hour, next_day, next_review): QueueCounts =
            sqlx::query_as(
                r#"
            SELECT
                COALESCE(SUM(CASE WHEN srs_stage = 0 AND unlocked_at IS NOT NULL
                                   AND started_at IS NULL THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN available_at <= ?1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN available_at > ?1 AND available_at <= ?2 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN available_at > ?1 AND available_at <= ?3 THEN 1 ELSE 0 END), 0),
                MIN(CASE WHEN available_at > ?1 THEN available_at END)
            FROM assignments
        "#,
            )
            .bind(now_micros)
            .bind(hour)
            .bind(day)
            .fetch_one(&self.store.pool)
            .await?;

        let queue = StudyQueue {
            lessons_available: lessons as u32,
            reviews_available: reviews as u32,
            reviews_available_next_hour: next_hour as u32,
            reviews_available_next_day: next_day as u32,
            next_review_date: decode_micros(next_review),
        };

        tracing::debug!(
            lessons = queue.lessons_available,
            reviews = queue.reviews_available,
            "Computed study queue"
        );
        Ok(queue)
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::model::{AssignmentDates, ResourceCategory, SubjectType};
    use crate::storage::Store;
    use pretty_assertions::assert_eq;

    fn scheduled(id: i64, stage: u8, available: Option<i64>) -> crate::model::ResourceItem {
        assignment_item(
            id,
            id + 100,
            SubjectType::Kanji,
            stage,
            AssignmentDates {
                unlocked_at: Some(at(1)),
                started_at: (stage > 0).then(|| at(2)),
                available_at: available.map(at),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_study_queue_counts() {
        let store = Store::open_in_memory().await.unwrap();
        let now = 100_000;
        merge(
            &store,
            ResourceCategory::Assignments,
            vec![
                scheduled(1, 0, None),               // lesson
                scheduled(2, 0, None),               // lesson
                scheduled(3, 1, Some(now)),          // due exactly now
                scheduled(4, 2, Some(now - 50)),     // overdue
                scheduled(5, 3, Some(now + 1)),      // next hour
                scheduled(6, 3, Some(now + 3600)),   // next hour boundary
                scheduled(7, 4, Some(now + 3601)),   // next day only
                scheduled(8, 5, Some(now + 86_400)), // next day boundary
                scheduled(9, 6, Some(now + 86_401)), // beyond a day
                scheduled(10, 9, None),              // burned
            ],
        )
        .await;

        let queue = Analytics::new(store).study_queue(at(now)).await.unwrap();
        assert_eq!(
            queue,
            StudyQueue {
                lessons_available: 2,
                reviews_available: 2,
                reviews_available_next_hour: 2,
                reviews_available_next_day: 4,
                next_review_date: Some(at(now + 1)),
            }
        );
    }

    #[tokio::test]
    async fn test_review_due_exactly_now_is_available() {
        let store = Store::open_in_memory().await.unwrap();
        merge(
            &store,
            ResourceCategory::Assignments,
            vec![scheduled(1, 1, Some(5_000))],
        )
        .await;

        let analytics = Analytics::new(store);
        let before = analytics.study_queue(at(4_999)).await.unwrap();
        assert_eq!(before.reviews_available, 0);
        assert_eq!(before.next_review_date, Some(at(5_000)));

        let exact = analytics.study_queue(at(5_000)).await.unwrap();
        assert_eq!(exact.reviews_available, 1);
        assert_eq!(exact.next_review_date, None);
    }

    #[tokio::test]
    async fn test_sub_second_review_is_not_due_early() {
        let store = Store::open_in_memory().await.unwrap();
        let available = at_micros(100_000_700_000);
        let mut item = scheduled(1, 1, None);
        if let crate::model::ResourcePayload::Assignment(assignment) = &mut item.payload {
            assignment.available_at = Some(available);
        }
        merge(&store, ResourceCategory::Assignments, vec![item]).await;

        let analytics = Analytics::new(store);
        let stored = analytics.assignment_for_subject(101).await.unwrap().unwrap();
        assert_eq!(stored.available_at, Some(available));

        let early = analytics.study_queue(at_micros(100_000_200_000)).await.unwrap();
        assert_eq!(early.reviews_available, 0);
        assert_eq!(early.reviews_available_next_hour, 1);
        assert_eq!(early.next_review_date, Some(available));

        let due = analytics.study_queue(available).await.unwrap();
        assert_eq!(due.reviews_available, 1);
        assert_eq!(due.next_review_date, None);
    }

    #[tokio::test]
    async fn test_empty_store_has_empty_queue() {
        let store = Store::open_in_memory().await.unwrap();
        let queue = Analytics::new(store).study_queue(at(1)).await.unwrap();
        assert_eq!(queue, StudyQueue::default());
    }
}
