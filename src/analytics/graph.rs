use std::collections::HashMap;

use super::{Analytics, AnalyticsError};
use crate::model::Subject;

/// Prerequisite graph over subjects.
///
/// An edge runs from a subject to each of its `component_subject_ids`
/// (kanji to radicals, vocabulary to kanji). The service guarantees the
/// graph is acyclic; edges pointing at unknown subjects are kept so that a
/// partially synced store still answers `components` faithfully.
#[derive(Debug, Clone, Default)]
pub struct SubjectGraph {
    components: HashMap<i64, Vec<i64>>,
    dependents: HashMap<i64, Vec<i64>>,
}

impl SubjectGraph {
    pub fn from_subjects<'a>(subjects: impl IntoIterator<Item = (i64, &'a Subject)>) -> Self {
        let mut graph = SubjectGraph::default();
        for (id, subject) in subjects {
            let mut components = subject.component_subject_ids.clone();
            components.sort_unstable();
            components.dedup();
            for component in &components {
                graph.dependents.entry(*component).or_default().push(id);
            }
            graph.components.insert(id, components);
        }
        for dependents in graph.dependents.values_mut() {
            dependents.sort_unstable();
            dependents.dedup();
        }
        graph
    }

    /// Direct prerequisites of `id`, ascending.
    pub fn components(&self, id: i64) -> &[i64] {
        self.components.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Subjects that list `id` as a prerequisite, ascending.
    pub fn dependents(&self, id: i64) -> &[i64] {
        self.dependents.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains(&self, id: i64) -> bool {
        self.components.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl Analytics {
    /// Build the prerequisite graph over every stored subject.
    pub async fn subject_graph(&self) -> Result<SubjectGraph, AnalyticsError> {
        let subjects = self.all_subjects().await?;
        Ok(SubjectGraph::from_subjects(
            subjects.iter().map(|(id, subject)| (*id, subject)),
        ))
    }
}
