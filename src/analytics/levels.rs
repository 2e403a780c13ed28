//! Level start/end dates and the projected end of the current level.
//!
//! Kanji gate level-up, so a level ends when its last kanji is passed. For
//! completed levels that date is observed. For the current level it is
//! estimated from the SRS schedule: every kanji gets the earliest instant it
//! could possibly reach guru, and the level's projected end is the latest of
//! those. A kanji that is still locked behind unpassed radicals can only be
//! estimated as "its slowest radical passes, then the kanji is learned from
//! scratch", which makes the projection a lower bound; the span is flagged so
//! callers can weigh it against the historical average.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use super::graph::SubjectGraph;
use super::{Analytics, AnalyticsError};
use crate::model::{minimum_time_to_guru, Assignment, Subject, SubjectType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelSpan {
    pub level: u32,
    /// Earliest unlock among the level's subjects
    pub start: DateTime<Utc>,
    /// Observed (completed levels) or projected (current level) end
    pub end: Option<DateTime<Utc>>,
    pub projected: bool,
    /// The projection had to go through at least one locked kanji
    pub end_date_based_on_locked_item: bool,
}

impl LevelSpan {
    pub fn duration(&self) -> Option<Duration> {
        self.end.map(|end| end - self.start)
    }
}

/// Duration statistics over completed levels.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelDurationStats {
    pub count: usize,
    pub mean: Duration,
    /// Population variance, in seconds squared
    pub variance: f64,
}

impl LevelDurationStats {
    fn from_durations(durations: &[Duration]) -> Option<Self> {
        if durations.is_empty() {
            return None;
        }
        let secs: Vec<f64> = durations.iter().map(|d| d.num_seconds() as f64).collect();
        let count = secs.len();
        let mean = secs.iter().sum::<f64>() / count as f64;
        let variance = secs.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / count as f64;
        Some(Self {
            count,
            mean: Duration::seconds(mean.round() as i64),
            variance,
        })
    }

    pub fn standard_deviation(&self) -> Duration {
        Duration::seconds(self.variance.sqrt().round() as i64)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelTimeline {
    /// One span per started level, ascending
    pub levels: Vec<LevelSpan>,
    pub average: Option<LevelDurationStats>,
}

impl LevelTimeline {
    pub fn current(&self) -> Option<&LevelSpan> {
        self.levels.iter().rev().find(|span| span.projected)
    }
}

impl Analytics {
    /// Spans for every started level up to the user's current one.
    ///
    /// Without a stored user the highest level with an unlocked assignment
    /// is taken as current.
    pub async fn level_timeline(
        &self,
        now: DateTime<Utc>,
    ) -> Result<LevelTimeline, AnalyticsError> {
        let subjects = self.all_subjects().await?;
        let assignments = self.all_assignments().await?;
        let current_level = match self.user().await? {
            Some(user) => Some(user.level),
            None => assignments
                .iter()
                .filter(|a| a.is_unlocked())
                .map(|a| a.level)
                .max(),
        };

        let Some(current_level) = current_level else {
            return Ok(LevelTimeline::default());
        };
        let timeline = build_timeline(current_level, &subjects, &assignments, now);

        tracing::debug!(
            current_level = current_level,
            levels = timeline.levels.len(),
            "Computed level timeline"
        );
        Ok(timeline)
    }
}

pub(crate) fn build_timeline(
    current_level: u32,
    subjects: &[(i64, Subject)],
    assignments: &[Assignment],
    now: DateTime<Utc>,
) -> LevelTimeline {
    let by_subject: HashMap<i64, &Assignment> =
        assignments.iter().map(|a| (a.subject_id, a)).collect();
    let subject_levels: HashMap<i64, (u32, SubjectType)> = subjects
        .iter()
        .map(|(id, s)| (*id, (s.level, s.kind)))
        .collect();
    let graph = SubjectGraph::from_subjects(subjects.iter().map(|(id, s)| (*id, s)));

    let level_of = |a: &Assignment| {
        subject_levels
            .get(&a.subject_id)
            .map(|(level, kind)| (*level, *kind))
            .unwrap_or((a.level, a.subject_type))
    };

    let mut levels = Vec::new();
    for level in 1..=current_level {
        let start = assignments
            .iter()
            .filter(|a| level_of(*a).0 == level)
            .filter_map(|a| a.unlocked_at)
            .min();
        let Some(start) = start else {
            continue;
        };

        if level < current_level {
            let end = assignments
                .iter()
                .filter(|a| level_of(*a) == (level, SubjectType::Kanji))
                .filter_map(|a| a.passed_at)
                .max();
            levels.push(LevelSpan {
                level,
                start,
                end,
                projected: false,
                end_date_based_on_locked_item: false,
            });
        } else {
            let kanji: Vec<i64> = subjects
                .iter()
                .filter(|(_, s)| s.level == level && s.kind == SubjectType::Kanji)
                .map(|(id, _)| *id)
                .collect();
            let projection = project_level_end(&kanji, &graph, &by_subject, now);
            levels.push(LevelSpan {
                level,
                start,
                end: projection.map(|(end, _)| end),
                projected: true,
                end_date_based_on_locked_item: projection.is_some_and(|(_, locked)| locked),
            });
        }
    }

    let durations: Vec<Duration> = levels
        .iter()
        .filter(|span| !span.projected)
        .filter_map(LevelSpan::duration)
        .filter(|d| *d >= Duration::zero())
        .collect();

    LevelTimeline {
        average: LevelDurationStats::from_durations(&durations),
        levels,
    }
}

/// Latest earliest-guru estimate over the level's kanji, and whether any of
/// them was locked. `None` when the level has no kanji.
fn project_level_end(
    kanji: &[i64],
    graph: &SubjectGraph,
    by_subject: &HashMap<i64, &Assignment>,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, bool)> {
    let mut end: Option<DateTime<Utc>> = None;
    let mut based_on_locked = false;

    for id in kanji {
        let estimate = match by_subject.get(id) {
            Some(assignment) if assignment.is_unlocked() => earliest_guru(assignment, now),
            _ => {
                based_on_locked = true;
                let dependencies_passed = graph
                    .components(*id)
                    .iter()
                    .map(|component| dependency_passed_at(*component, by_subject, now))
                    .max()
                    .unwrap_or(now)
                    .max(now);
                dependencies_passed + minimum_time_to_guru()
            }
        };
        end = end.max(Some(estimate));
    }

    end.map(|end| (end, based_on_locked))
}

/// Earliest instant an unlocked assignment can be (or was) passed.
fn earliest_guru(assignment: &Assignment, now: DateTime<Utc>) -> DateTime<Utc> {
    if assignment.is_passed {
        return assignment.passed_at.unwrap_or(now);
    }
    if assignment.started_at.is_none() {
        // Lesson not taken yet: the whole apprentice ladder is still ahead
        return now + minimum_time_to_guru();
    }
    let next_review = assignment.available_at.map_or(now, |at| at.max(now));
    next_review + assignment.srs_stage.minimum_time_to_guru_after_review()
}

fn dependency_passed_at(
    subject_id: i64,
    by_subject: &HashMap<i64, &Assignment>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    match by_subject.get(&subject_id) {
        Some(assignment) if assignment.is_unlocked() || assignment.is_passed => {
            earliest_guru(assignment, now)
        }
        // A locked prerequisite has to unlock and climb the ladder itself
        _ => now + minimum_time_to_guru(),
    }
}
