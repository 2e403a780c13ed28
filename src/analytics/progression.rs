use super::{Analytics, AnalyticsError};

/// Passed vs. total subjects of one type at one level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressCount {
    pub total: usize,
    pub progress: usize,
    /// Every subject at the level, ascending
    pub subject_ids: Vec<i64>,
    /// Subjects whose assignment is passed, ascending
    pub passed_subject_ids: Vec<i64>,
}

impl ProgressCount {
    fn push(&mut self, subject_id: i64, passed: bool) {
        self.total += 1;
        self.subject_ids.push(subject_id);
        if passed {
            self.progress += 1;
            self.passed_subject_ids.push(subject_id);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelProgression {
    pub level: u32,
    pub radicals: ProgressCount,
    pub kanji: ProgressCount,
}

impl Analytics {
    /// Radical and kanji progress at `level`.
    ///
    /// `total` counts subjects whether or not they have an assignment yet;
    /// a subject without an assignment is not passed.
    pub async fn level_progression(&self, level: u32) -> Result<LevelProgression, AnalyticsError> {
        let rows: Vec<(i64, String, bool)> = sqlx::query_as(
            r#"
            SELECT s.id, s.subject_type, COALESCE(a.passed, 0)
            FROM subjects s
            LEFT JOIN assignments a ON a.subject_id = s.id
            WHERE s.level = ? AND s.subject_type IN ('radical', 'kanji')
            ORDER BY s.id
        "#,
        )
        .bind(level)
        .fetch_all(&self.store.pool)
        .await?;

        let mut progression = LevelProgression {
            level,
            ..Default::default()
        };
        for (id, kind, passed) in rows {
            match kind.as_str() {
                "radical" => progression.radicals.push(id, passed),
                _ => progression.kanji.push(id, passed),
            }
        }
        Ok(progression)
    }

    /// Progress at the stored user's level, or `None` before the user synced.
    pub async fn current_level_progression(
        &self,
    ) -> Result<Option<LevelProgression>, AnalyticsError> {
        match self.user().await? {
            Some(user) => Ok(Some(self.level_progression(user.level).await?)),
            None => Ok(None),
        }
    }
}
