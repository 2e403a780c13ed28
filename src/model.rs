//! Domain records mirrored from the remote service.
//!
//! Records are plain values: once decoded they are never mutated, only
//! replaced wholesale when a newer copy is merged into the store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

// ============================================================================
// Resource Categories
// ============================================================================

/// A remote resource collection with its own table and ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceCategory {
    Assignments,
    Subjects,
    StudyMaterials,
    ReviewStatistics,
    User,
}

impl ResourceCategory {
    pub const ALL: [ResourceCategory; 5] = [
        ResourceCategory::Assignments,
        ResourceCategory::Subjects,
        ResourceCategory::StudyMaterials,
        ResourceCategory::ReviewStatistics,
        ResourceCategory::User,
    ];

    /// Storage and ledger key.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceCategory::Assignments => "assignments",
            ResourceCategory::Subjects => "subjects",
            ResourceCategory::StudyMaterials => "study_materials",
            ResourceCategory::ReviewStatistics => "review_statistics",
            ResourceCategory::User => "user",
        }
    }

    /// Standalone categories are a single object rather than a paginated collection.
    pub fn is_standalone(&self) -> bool {
        matches!(self, ResourceCategory::User)
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceCategory {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ResourceCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == value)
            .ok_or_else(|| format!("invalid resource category: {value}"))
    }
}

// ============================================================================
// Subjects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    Radical,
    Kanji,
    #[serde(alias = "kana_vocabulary")]
    Vocabulary,
}

impl SubjectType {
    pub const ALL: [SubjectType; 3] = [
        SubjectType::Radical,
        SubjectType::Kanji,
        SubjectType::Vocabulary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectType::Radical => "radical",
            SubjectType::Kanji => "kanji",
            SubjectType::Vocabulary => "vocabulary",
        }
    }
}

impl fmt::Display for SubjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubjectType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "radical" => Ok(SubjectType::Radical),
            "kanji" => Ok(SubjectType::Kanji),
            "vocabulary" | "kana_vocabulary" => Ok(SubjectType::Vocabulary),
            _ => Err(format!("invalid subject type: {value}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meaning {
    pub meaning: String,
    pub primary: bool,
    #[serde(default = "default_true")]
    pub accepted_answer: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub reading: String,
    pub primary: bool,
    #[serde(default = "default_true")]
    pub accepted_answer: bool,
    /// `onyomi`, `kunyomi` or `nanori` for kanji; absent for vocabulary.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

fn default_true() -> bool {
    true
}

/// A learnable item. The [`SubjectType`] tag selects the variant; radicals
/// carry no readings and may have no characters (image-only radicals).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub kind: SubjectType,
    pub level: u32,
    pub created_at: DateTime<Utc>,
    pub slug: String,
    pub characters: Option<String>,
    pub meanings: Vec<Meaning>,
    #[serde(default)]
    pub readings: Vec<Reading>,
    /// Prerequisites: radicals for a kanji, kanji for a vocabulary word.
    #[serde(default)]
    pub component_subject_ids: Vec<i64>,
    /// Subjects this one is a component of.
    #[serde(default)]
    pub amalgamation_subject_ids: Vec<i64>,
    pub document_url: String,
}

impl Subject {
    pub fn primary_meaning(&self) -> Option<&str> {
        self.meanings
            .iter()
            .find(|m| m.primary)
            .or_else(|| self.meanings.first())
            .map(|m| m.meaning.as_str())
    }

    pub fn primary_reading(&self) -> Option<&str> {
        self.readings
            .iter()
            .find(|r| r.primary)
            .or_else(|| self.readings.first())
            .map(|r| r.reading.as_str())
    }
}

// ============================================================================
// SRS
// ============================================================================

/// Position of an assignment in the spaced-repetition schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SrsStage(u8);

impl SrsStage {
    pub const UNLEARNED: SrsStage = SrsStage(0);
    pub const APPRENTICE_1: SrsStage = SrsStage(1);
    /// The guru threshold: assignments at or above it count as passed.
    pub const GURU: SrsStage = SrsStage(5);
    pub const BURNED: SrsStage = SrsStage(9);

    pub fn new(stage: u8) -> Option<Self> {
        (stage <= Self::BURNED.0).then_some(SrsStage(stage))
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn is_passed(&self) -> bool {
        *self >= Self::GURU
    }

    pub fn bucket(&self) -> Option<SrsBucket> {
        SrsBucket::from_stage(*self)
    }

    /// Shortest time an assignment dwells at this stage before its next review.
    pub fn interval(&self) -> Option<Duration> {
        SRS_INTERVAL_HOURS
            .get(self.0 as usize)
            .copied()
            .flatten()
            .map(Duration::hours)
    }

    /// Minimum time from a review being available at this stage until the
    /// assignment can reach guru, assuming every answer is correct.
    pub fn minimum_time_to_guru_after_review(&self) -> Duration {
        (self.0 + 1..Self::GURU.0)
            .filter_map(|s| SrsStage(s).interval())
            .fold(Duration::zero(), |acc, d| acc + d)
    }
}

impl TryFrom<u8> for SrsStage {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        SrsStage::new(value).ok_or_else(|| format!("srs stage out of range: {value}"))
    }
}

impl From<SrsStage> for u8 {
    fn from(stage: SrsStage) -> u8 {
        stage.0
    }
}

/// Review intervals in hours, indexed by stage. Unlearned and burned items
/// are never scheduled.
const SRS_INTERVAL_HOURS: [Option<i64>; 10] = [
    None,
    Some(4),
    Some(8),
    Some(23),
    Some(47),
    Some(167),
    Some(335),
    Some(719),
    Some(2879),
    None,
];

/// Lower bound on the time from starting a lesson to reaching guru: the sum
/// of the dwell times of the apprentice stages.
pub fn minimum_time_to_guru() -> Duration {
    (SrsStage::APPRENTICE_1.0..SrsStage::GURU.0)
        .filter_map(|s| SrsStage(s).interval())
        .fold(Duration::zero(), |acc, d| acc + d)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SrsBucket {
    Apprentice,
    Guru,
    Master,
    Enlightened,
    Burned,
}

impl SrsBucket {
    pub const ALL: [SrsBucket; 5] = [
        SrsBucket::Apprentice,
        SrsBucket::Guru,
        SrsBucket::Master,
        SrsBucket::Enlightened,
        SrsBucket::Burned,
    ];

    pub fn stages(&self) -> RangeInclusive<u8> {
        match self {
            SrsBucket::Apprentice => 1..=4,
            SrsBucket::Guru => 5..=6,
            SrsBucket::Master => 7..=7,
            SrsBucket::Enlightened => 8..=8,
            SrsBucket::Burned => 9..=9,
        }
    }

    /// `None` for unlearned (stage 0) assignments.
    pub fn from_stage(stage: SrsStage) -> Option<Self> {
        SrsBucket::ALL
            .into_iter()
            .find(|b| b.stages().contains(&stage.value()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SrsBucket::Apprentice => "apprentice",
            SrsBucket::Guru => "guru",
            SrsBucket::Master => "master",
            SrsBucket::Enlightened => "enlightened",
            SrsBucket::Burned => "burned",
        }
    }
}

impl fmt::Display for SrsBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SrsBucket {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        SrsBucket::ALL
            .into_iter()
            .find(|b| b.as_str() == value)
            .ok_or_else(|| format!("invalid srs bucket: {value}"))
    }
}

// ============================================================================
// Assignments
// ============================================================================

/// A user's progress record for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub subject_id: i64,
    pub subject_type: SubjectType,
    pub level: u32,
    pub srs_stage: SrsStage,
    pub unlocked_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub passed_at: Option<DateTime<Utc>>,
    pub burned_at: Option<DateTime<Utc>>,
    pub available_at: Option<DateTime<Utc>>,
    pub resurrected_at: Option<DateTime<Utc>>,
    pub is_passed: bool,
    pub is_resurrected: bool,
}

/// Timestamps of an assignment, grouped so [`Assignment::new`] stays readable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignmentDates {
    pub unlocked_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub passed_at: Option<DateTime<Utc>>,
    pub burned_at: Option<DateTime<Utc>>,
    pub available_at: Option<DateTime<Utc>>,
    pub resurrected_at: Option<DateTime<Utc>>,
}

impl Assignment {
    /// Build an assignment, deriving the passed and resurrected flags.
    ///
    /// An assignment is passed once it reaches guru. A resurrected assignment
    /// keeps its earlier `passed_at` and stays passed at a lower stage.
    pub fn new(
        subject_id: i64,
        subject_type: SubjectType,
        level: u32,
        srs_stage: SrsStage,
        dates: AssignmentDates,
    ) -> Self {
        let is_resurrected = dates.resurrected_at.is_some();
        let is_passed = srs_stage.is_passed() || (is_resurrected && dates.passed_at.is_some());
        Self {
            subject_id,
            subject_type,
            level,
            srs_stage,
            unlocked_at: dates.unlocked_at,
            started_at: dates.started_at,
            passed_at: dates.passed_at,
            burned_at: dates.burned_at,
            available_at: dates.available_at,
            resurrected_at: dates.resurrected_at,
            is_passed,
            is_resurrected,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked_at.is_some()
    }

    /// Unlocked but the lesson has not been taken yet.
    pub fn is_lesson(&self) -> bool {
        self.srs_stage == SrsStage::UNLEARNED
            && self.unlocked_at.is_some()
            && self.started_at.is_none()
    }
}

// ============================================================================
// Study Materials, Review Statistics, User
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyMaterials {
    pub subject_id: i64,
    pub subject_type: SubjectType,
    pub meaning_note: Option<String>,
    pub reading_note: Option<String>,
    #[serde(default)]
    pub meaning_synonyms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewStatistics {
    pub subject_id: i64,
    pub subject_type: SubjectType,
    pub meaning_correct: u32,
    pub meaning_incorrect: u32,
    pub meaning_max_streak: u32,
    pub meaning_current_streak: u32,
    pub reading_correct: u32,
    pub reading_incorrect: u32,
    pub reading_max_streak: u32,
    pub reading_current_streak: u32,
    pub percentage_correct: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub active: bool,
    #[serde(rename = "type")]
    pub kind: String,
    pub max_level_granted: u32,
    pub period_ends_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub level: u32,
    pub profile_url: String,
    pub started_at: DateTime<Utc>,
    pub subscription: Subscription,
    pub current_vacation_started_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Resource Envelopes
// ============================================================================

/// Payload of a collection item, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourcePayload {
    Assignment(Assignment),
    Subject(Subject),
    StudyMaterials(StudyMaterials),
    ReviewStatistics(ReviewStatistics),
}

impl ResourcePayload {
    pub fn category(&self) -> ResourceCategory {
        match self {
            ResourcePayload::Assignment(_) => ResourceCategory::Assignments,
            ResourcePayload::Subject(_) => ResourceCategory::Subjects,
            ResourcePayload::StudyMaterials(_) => ResourceCategory::StudyMaterials,
            ResourcePayload::ReviewStatistics(_) => ResourceCategory::ReviewStatistics,
        }
    }
}

/// One item of a remote collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceItem {
    pub id: i64,
    pub source_url: String,
    pub data_updated_at: DateTime<Utc>,
    pub payload: ResourcePayload,
}

impl ResourceItem {
    pub fn category(&self) -> ResourceCategory {
        self.payload.category()
    }
}

/// A single-object resource (the user profile).
#[derive(Debug, Clone, PartialEq)]
pub struct StandaloneResource {
    pub source_url: String,
    pub data_updated_at: DateTime<Utc>,
    pub user: User,
}
