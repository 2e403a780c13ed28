//! JSON envelopes of the remote API and their conversion into domain records.
//!
//! Collections arrive as
//! `{"object":"collection","data_updated_at":..,"pages":{"next_url":..},"data":[..]}`
//! where every element is a resource envelope
//! `{"id":..,"object":"kanji","url":..,"data_updated_at":..,"data":{..}}`.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{CollectionPage, FetchError};
use crate::model::{
    Assignment, AssignmentDates, Meaning, Reading, ResourceCategory, ResourceItem, ResourcePayload,
    ReviewStatistics, SrsStage, StandaloneResource, StudyMaterials, Subject, SubjectType, User,
};

#[derive(Debug, Deserialize)]
struct CollectionEnvelope {
    #[serde(default)]
    pages: Option<Pages>,
    data_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    data: Vec<ResourceEnvelope>,
}

#[derive(Debug, Deserialize)]
struct Pages {
    next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResourceEnvelope {
    id: i64,
    object: String,
    url: String,
    data_updated_at: DateTime<Utc>,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StandaloneEnvelope {
    object: String,
    url: String,
    data_updated_at: DateTime<Utc>,
    data: User,
}

#[derive(Debug, Deserialize)]
struct AssignmentData {
    subject_id: i64,
    subject_type: SubjectType,
    srs_stage: SrsStage,
    unlocked_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    passed_at: Option<DateTime<Utc>>,
    burned_at: Option<DateTime<Utc>>,
    available_at: Option<DateTime<Utc>>,
    resurrected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SubjectData {
    level: u32,
    created_at: DateTime<Utc>,
    slug: String,
    characters: Option<String>,
    meanings: Vec<Meaning>,
    #[serde(default)]
    auxiliary_meanings: Vec<AuxiliaryMeaning>,
    #[serde(default)]
    readings: Vec<Reading>,
    #[serde(default)]
    component_subject_ids: Vec<i64>,
    #[serde(default)]
    amalgamation_subject_ids: Vec<i64>,
    document_url: String,
}

#[derive(Debug, Deserialize)]
struct AuxiliaryMeaning {
    meaning: String,
    #[serde(rename = "type")]
    kind: String,
}

impl SubjectData {
    /// Whitelisted auxiliary meanings are accepted answers and searchable,
    /// blacklisted ones are dropped.
    fn into_subject(self, kind: SubjectType) -> Subject {
        let mut meanings = self.meanings;
        meanings.extend(
            self.auxiliary_meanings
                .into_iter()
                .filter(|aux| aux.kind == "whitelist")
                .map(|aux| Meaning {
                    meaning: aux.meaning,
                    primary: false,
                    accepted_answer: true,
                }),
        );

        Subject {
            kind,
            level: self.level,
            created_at: self.created_at,
            slug: self.slug,
            characters: self.characters,
            meanings,
            readings: self.readings,
            component_subject_ids: self.component_subject_ids,
            amalgamation_subject_ids: self.amalgamation_subject_ids,
            document_url: self.document_url,
        }
    }
}

/// Category that an `object` tag belongs to.
fn object_category(object: &str) -> Option<ResourceCategory> {
    match object {
        "assignment" => Some(ResourceCategory::Assignments),
        "radical" | "kanji" | "vocabulary" | "kana_vocabulary" => Some(ResourceCategory::Subjects),
        "study_material" => Some(ResourceCategory::StudyMaterials),
        "review_statistic" => Some(ResourceCategory::ReviewStatistics),
        "user" => Some(ResourceCategory::User),
        _ => None,
    }
}

fn decode_payload(envelope: &ResourceEnvelope) -> Result<ResourcePayload, FetchError> {
    let data = envelope.data.clone();
    let payload = match envelope.object.as_str() {
        "assignment" => {
            let a: AssignmentData = serde_json::from_value(data)?;
            // Level is not part of the assignment record; the store fills it in
            // from the subject when one is known.
            ResourcePayload::Assignment(Assignment::new(
                a.subject_id,
                a.subject_type,
                0,
                a.srs_stage,
                AssignmentDates {
                    unlocked_at: a.unlocked_at,
                    started_at: a.started_at,
                    passed_at: a.passed_at,
                    burned_at: a.burned_at,
                    available_at: a.available_at,
                    resurrected_at: a.resurrected_at,
                },
            ))
        }
        "radical" | "kanji" | "vocabulary" | "kana_vocabulary" => {
            let kind: SubjectType = envelope
                .object
                .parse()
                .map_err(FetchError::Decode)?;
            let s: SubjectData = serde_json::from_value(data)?;
            ResourcePayload::Subject(s.into_subject(kind))
        }
        "study_material" => {
            ResourcePayload::StudyMaterials(serde_json::from_value::<StudyMaterials>(data)?)
        }
        "review_statistic" => {
            ResourcePayload::ReviewStatistics(serde_json::from_value::<ReviewStatistics>(data)?)
        }
        other => {
            return Err(FetchError::Decode(format!("unknown object type: {other}")));
        }
    };
    Ok(payload)
}

/// Decode one collection page, rejecting items that belong to another category.
pub fn decode_collection(
    category: ResourceCategory,
    body: &[u8],
) -> Result<CollectionPage, FetchError> {
    let envelope: CollectionEnvelope = serde_json::from_slice(body)?;

    let mut items = Vec::with_capacity(envelope.data.len());
    for resource in &envelope.data {
        match object_category(&resource.object) {
            Some(found) if found == category => {}
            Some(found) => {
                return Err(FetchError::Decode(format!(
                    "expected {category} but item {} is {found}",
                    resource.id
                )));
            }
            None => {
                return Err(FetchError::Decode(format!(
                    "unknown object type: {}",
                    resource.object
                )));
            }
        }

        items.push(ResourceItem {
            id: resource.id,
            source_url: resource.url.clone(),
            data_updated_at: resource.data_updated_at,
            payload: decode_payload(resource)?,
        });
    }

    Ok(CollectionPage {
        items,
        data_updated_at: envelope.data_updated_at,
        next_url: envelope.pages.and_then(|p| p.next_url),
    })
}

/// Decode the standalone user resource.
pub fn decode_user(body: &[u8]) -> Result<StandaloneResource, FetchError> {
    let envelope: StandaloneEnvelope = serde_json::from_slice(body)?;
    if envelope.object != "user" {
        return Err(FetchError::Decode(format!(
            "expected user but got {}",
            envelope.object
        )));
    }
    Ok(StandaloneResource {
        source_url: envelope.url,
        data_updated_at: envelope.data_updated_at,
        user: envelope.data,
    })
}
