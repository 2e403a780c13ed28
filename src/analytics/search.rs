use super::{decode_payload, Analytics, AnalyticsError};
use crate::model::Subject;
use crate::storage::fold_kana;

// ============================================================================
// Query Validation
// ============================================================================

const MAX_QUERY_LENGTH: usize = 256;
const MAX_WILDCARDS: usize = 3;
const MAX_TOKENS: usize = 10;

/// Upper bound on `limit`, whatever the caller asks for.
const MAX_RESULTS: u32 = 500;

/// Reject queries whose expansion would be expensive.
fn validate_query(query: &str) -> Result<(), AnalyticsError> {
    if query.len() > MAX_QUERY_LENGTH {
        return Err(AnalyticsError::InvalidQuery(format!(
            "exceeds maximum length of {MAX_QUERY_LENGTH} bytes"
        )));
    }
    if query.matches('*').count() > MAX_WILDCARDS {
        return Err(AnalyticsError::InvalidQuery(format!(
            "too many wildcards (max {MAX_WILDCARDS})"
        )));
    }
    if query.split_whitespace().count() > MAX_TOKENS {
        return Err(AnalyticsError::InvalidQuery(format!(
            "too many terms (max {MAX_TOKENS})"
        )));
    }
    Ok(())
}

/// Translate user input into an FTS5 expression.
///
/// Every whitespace-separated term becomes a quoted phrase, so operators
/// and column filters in the input are matched literally. A trailing `*`
/// turns the term into a prefix query. Terms are implicitly ANDed. Terms
/// without a letter or digit yield no tokens and are dropped. Returns `None`
/// when nothing searchable remains.
fn build_match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = fold_kana(query)
        .split_whitespace()
        .filter_map(|raw| {
            let prefix = raw.ends_with('*');
            let term: String = raw.chars().filter(|c| *c != '"' && *c != '*').collect();
            if !term.chars().any(char::is_alphanumeric) {
                return None;
            }
            Some(if prefix {
                format!("\"{term}\" *")
            } else {
                format!("\"{term}\"")
            })
        })
        .collect();

    (!terms.is_empty()).then(|| terms.join(" "))
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub subject_id: i64,
    pub subject: Subject,
}

impl Analytics {
    /// Full-text subject search over characters, readings and meanings.
    ///
    /// Character matches weigh most, then readings, then meanings; shorter
    /// documents win among equal matches and ties fall back to ascending
    /// subject id. Matching ignores case and diacritics, and katakana is
    /// folded to hiragana on both sides.
    pub async fn search_subjects(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<SearchHit>, AnalyticsError> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        validate_query(query)?;

        let Some(expression) = build_match_expression(query) else {
            return Ok(Vec::new());
        };
        tracing::debug!(query = %query, expression = %expression, "Searching subjects");

        let rows: Vec<(i64, String)> = sqlx::query_as(
            r#"
            SELECT s.id, s.payload
            FROM subject_search
            INNER JOIN subjects s ON s.id = subject_search.rowid
            WHERE subject_search MATCH ?
            ORDER BY subject_search.rank, s.id
            LIMIT ?
        "#,
        )
        .bind(&expression)
        .bind(limit.min(MAX_RESULTS))
        .fetch_all(&self.store.pool)
        .await?;

        rows.into_iter()
            .map(|(subject_id, payload)| {
                Ok(SearchHit {
                    subject_id,
                    subject: decode_payload("subjects", &payload)?,
                })
            })
            .collect()
    }
}
