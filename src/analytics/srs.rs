use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::{Analytics, AnalyticsError};
use crate::model::{SrsBucket, SrsStage, SubjectType};
use crate::storage::decode_micros;

/// Counts split by subject type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemCounts {
    pub radicals: u32,
    pub kanji: u32,
    pub vocabulary: u32,
}

impl ItemCounts {
    pub fn total(&self) -> u32 {
        self.radicals + self.kanji + self.vocabulary
    }

    pub fn get(&self, kind: SubjectType) -> u32 {
        match kind {
            SubjectType::Radical => self.radicals,
            SubjectType::Kanji => self.kanji,
            SubjectType::Vocabulary => self.vocabulary,
        }
    }

    fn add(&mut self, kind: SubjectType, count: u32) {
        match kind {
            SubjectType::Radical => self.radicals += count,
            SubjectType::Kanji => self.kanji += count,
            SubjectType::Vocabulary => self.vocabulary += count,
        }
    }
}

/// Started assignments per SRS bucket. Unlearned (stage 0) assignments
/// belong to no bucket and are not counted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SrsDistribution {
    buckets: BTreeMap<SrsBucket, ItemCounts>,
}

impl SrsDistribution {
    pub fn get(&self, bucket: SrsBucket) -> ItemCounts {
        self.buckets.get(&bucket).copied().unwrap_or_default()
    }

    /// Every bucket in schedule order, including empty ones.
    pub fn iter(&self) -> impl Iterator<Item = (SrsBucket, ItemCounts)> + '_ {
        SrsBucket::ALL.into_iter().map(|bucket| (bucket, self.get(bucket)))
    }

    pub fn total(&self) -> u32 {
        self.buckets.values().map(ItemCounts::total).sum()
    }
}

/// Optional restrictions applied before grouping a review timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimelineFilter {
    pub level: Option<u32>,
    pub bucket: Option<SrsBucket>,
}

/// Reviews becoming available at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineEntry {
    pub available_at: DateTime<Utc>,
    pub counts: ItemCounts,
}

fn parse_kind(value: &str) -> Result<SubjectType, AnalyticsError> {
    value.parse().map_err(|e: String| {
        AnalyticsError::Store(crate::storage::StoreError::corrupt("assignments", e))
    })
}

impl Analytics {
    pub async fn srs_distribution(&self) -> Result<SrsDistribution, AnalyticsError> {
        let rows: Vec<(i64, String, i64)> = sqlx::query_as(
            r#"
            SELECT srs_stage, subject_type, COUNT(*)
            FROM assignments
            WHERE srs_stage > 0
            GROUP BY srs_stage, subject_type
        "#,
        )
        .fetch_all(&self.store.pool)
        .await?;

        let mut distribution = SrsDistribution::default();
        for (stage, kind, count) in rows {
            let Some(bucket) = u8::try_from(stage)
                .ok()
                .and_then(SrsStage::new)
                .and_then(|s| s.bucket())
            else {
                tracing::warn!(stage = stage, "Skipping assignments with out-of-range stage");
                continue;
            };
            distribution
                .buckets
                .entry(bucket)
                .or_default()
                .add(parse_kind(&kind)?, count as u32);
        }
        Ok(distribution)
    }

    /// Scheduled reviews grouped by exact `available_at`, ascending.
    ///
    /// Per-timestamp granularity is kept so callers can bucket by day or
    /// accumulate without losing information.
    pub async fn review_timeline(
        &self,
        filter: TimelineFilter,
    ) -> Result<Vec<TimelineEntry>, AnalyticsError> {
        let (stage_min, stage_max) = match filter.bucket {
            Some(bucket) => {
                let stages = bucket.stages();
                (Some(*stages.start()), Some(*stages.end()))
            }
            None => (None, None),
        };

        let rows: Vec<(i64, String, i64)> = sqlx::query_as(
            r#"
            SELECT available_at, subject_type, COUNT(*)
            FROM assignments
            WHERE available_at IS NOT NULL
              AND (?1 IS NULL OR level = ?1)
              AND (?2 IS NULL OR srs_stage BETWEEN ?2 AND ?3)
            GROUP BY available_at, subject_type
            ORDER BY available_at
        "#,
        )
        .bind(filter.level)
        .bind(stage_min)
        .bind(stage_max)
        .fetch_all(&self.store.pool)
        .await?;

        let mut timeline: Vec<TimelineEntry> = Vec::new();
        for (micros, kind, count) in rows {
            let available_at = decode_micros(Some(micros)).ok_or_else(|| {
                AnalyticsError::Store(crate::storage::StoreError::corrupt(
                    "assignments",
                    format!("available_at {micros}"),
                ))
            })?;
            let kind = parse_kind(&kind)?;
            match timeline.last_mut() {
                Some(entry) if entry.available_at == available_at => {
                    entry.counts.add(kind, count as u32)
                }
                _ => {
                    let mut counts = ItemCounts::default();
                    counts.add(kind, count as u32);
                    timeline.push(TimelineEntry {
                        available_at,
                        counts,
                    });
                }
            }
        }
        Ok(timeline)
    }
}
