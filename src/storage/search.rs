use sqlx::SqliteConnection;

use super::store::Store;
use super::types::{SearchConsistencyReport, StoreError};
use crate::model::Subject;

// ============================================================================
// Search Documents
// ============================================================================

const KATAKANA_START: u32 = 0x30A1;
const KATAKANA_END: u32 = 0x30F6;
const KATAKANA_TO_HIRAGANA: u32 = 0x60;

/// Fold katakana to hiragana so readings match regardless of script.
///
/// Applied to indexed text and to queries alike; everything else passes
/// through untouched (case and diacritics are folded by the tokenizer).
pub fn fold_kana(text: &str) -> String {
    text.chars()
        .map(|c| {
            let code = c as u32;
            if (KATAKANA_START..=KATAKANA_END).contains(&code) {
                char::from_u32(code - KATAKANA_TO_HIRAGANA).unwrap_or(c)
            } else {
                c
            }
        })
        .collect()
}

/// Text columns indexed for one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SearchDocument {
    pub characters: String,
    pub meaning: String,
    pub reading: String,
}

impl SearchDocument {
    pub(crate) fn from_subject(subject: &Subject) -> Self {
        let meaning = subject
            .meanings
            .iter()
            .map(|m| m.meaning.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let reading = subject
            .readings
            .iter()
            .map(|r| r.reading.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            characters: fold_kana(subject.characters.as_deref().unwrap_or_default()),
            meaning,
            reading: fold_kana(&reading),
        }
    }
}

/// Replace the index row for a subject. Runs on the caller's connection so it
/// joins the surrounding merge transaction.
pub(crate) async fn index_subject(
    conn: &mut SqliteConnection,
    subject_id: i64,
    subject: &Subject,
) -> Result<(), StoreError> {
    let doc = SearchDocument::from_subject(subject);

    sqlx::query("DELETE FROM subject_search WHERE rowid = ?")
        .bind(subject_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        "INSERT INTO subject_search (rowid, characters, meaning, reading) VALUES (?, ?, ?, ?)",
    )
    .bind(subject_id)
    .bind(&doc.characters)
    .bind(&doc.meaning)
    .bind(&doc.reading)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

impl Store {
    // ========================================================================
    // Search Index Maintenance
    // ========================================================================

    /// Compare the search index with the subjects table.
    pub async fn check_search_consistency(&self) -> Result<SearchConsistencyReport, StoreError> {
        let (subjects_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subjects")
            .fetch_one(&self.pool)
            .await?;

        let (indexed_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subject_search")
            .fetch_one(&self.pool)
            .await?;

        let (orphaned,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM subject_search LEFT JOIN subjects ON subject_search.rowid = subjects.id WHERE subjects.id IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        let (missing,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM subjects LEFT JOIN subject_search ON subjects.id = subject_search.rowid WHERE subject_search.rowid IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        let is_consistent = orphaned == 0 && missing == 0 && subjects_count == indexed_count;

        tracing::debug!(
            subjects = subjects_count,
            indexed = indexed_count,
            orphaned = orphaned,
            missing = missing,
            is_consistent = is_consistent,
            "Search index consistency check"
        );

        Ok(SearchConsistencyReport {
            subjects_count,
            indexed_count,
            orphaned_entries: orphaned,
            missing_entries: missing,
            is_consistent,
        })
    }

    /// Drop and repopulate the search index from stored subject payloads.
    ///
    /// Returns the number of subjects indexed.
    pub async fn rebuild_search_index(&self) -> Result<usize, StoreError> {
        self.ensure_writable()?;

        let mut tx = self.pool.begin().await.map_err(StoreError::from_sqlx)?;
        sqlx::query("DELETE FROM subject_search")
            .execute(&mut *tx)
            .await?;

        let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, payload FROM subjects")
            .fetch_all(&mut *tx)
            .await?;
        for (id, payload) in &rows {
            let subject: Subject = serde_json::from_str(payload)
                .map_err(|e| StoreError::corrupt("subjects", e.to_string()))?;
            index_subject(&mut *tx, *id, &subject).await?;
        }
        tx.commit().await.map_err(StoreError::from_sqlx)?;

        tracing::info!(count = rows.len(), "Rebuilt subject search index");
        Ok(rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Meaning, Reading, SubjectType};
    use chrono::Utc;

    #[test]
    fn test_fold_kana_converts_katakana_only() {
        assert_eq!(fold_kana("ハ"), "は");
        assert_eq!(fold_kana("カタカナ and かな"), "かたかな and かな");
        assert_eq!(fold_kana("山"), "山");
        assert_eq!(fold_kana("ー"), "ー");
    }

    #[test]
    fn test_document_joins_meanings_and_readings() {
        let subject = Subject {
            kind: SubjectType::Kanji,
            level: 1,
            created_at: Utc::now(),
            slug: "工".into(),
            characters: Some("工".into()),
            meanings: vec![
                Meaning {
                    meaning: "Construction".into(),
                    primary: true,
                    accepted_answer: true,
                },
                Meaning {
                    meaning: "Industry".into(),
                    primary: false,
                    accepted_answer: true,
                },
            ],
            readings: vec![Reading {
                reading: "コウ".into(),
                primary: true,
                accepted_answer: true,
                kind: Some("onyomi".into()),
            }],
            component_subject_ids: vec![],
            amalgamation_subject_ids: vec![],
            document_url: "https://example.com/kanji/工".into(),
        };

        let doc = SearchDocument::from_subject(&subject);
        assert_eq!(doc.characters, "工");
        assert_eq!(doc.meaning, "Construction, Industry");
        assert_eq!(doc.reading, "こう");
    }
}
