//! Change notifications fired after a committed merge.

use tokio::sync::broadcast;

use crate::model::ResourceCategory;

/// One event per category whose merge committed. Carries no diff; listeners
/// re-query the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeEvent {
    AssignmentsChanged,
    SubjectsChanged,
    StudyMaterialsChanged,
    ReviewStatisticsChanged,
    UserChanged,
}

impl ChangeEvent {
    pub fn for_category(category: ResourceCategory) -> Self {
        match category {
            ResourceCategory::Assignments => ChangeEvent::AssignmentsChanged,
            ResourceCategory::Subjects => ChangeEvent::SubjectsChanged,
            ResourceCategory::StudyMaterials => ChangeEvent::StudyMaterialsChanged,
            ResourceCategory::ReviewStatistics => ChangeEvent::ReviewStatisticsChanged,
            ResourceCategory::User => ChangeEvent::UserChanged,
        }
    }

    pub fn category(&self) -> ResourceCategory {
        match self {
            ChangeEvent::AssignmentsChanged => ResourceCategory::Assignments,
            ChangeEvent::SubjectsChanged => ResourceCategory::Subjects,
            ChangeEvent::StudyMaterialsChanged => ResourceCategory::StudyMaterials,
            ChangeEvent::ReviewStatisticsChanged => ResourceCategory::ReviewStatistics,
            ChangeEvent::UserChanged => ResourceCategory::User,
        }
    }
}

/// Broadcast bus for [`ChangeEvent`]s.
///
/// Subscribing registers a listener; dropping the receiver unregisters it.
/// Slow listeners that fall more than `capacity` events behind observe
/// `RecvError::Lagged` and skip ahead.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: ChangeEvent) {
        tracing::trace!(event = ?event, "Emitting change event");
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_category_round_trip() {
        for category in ResourceCategory::ALL {
            assert_eq!(ChangeEvent::for_category(category).category(), category);
        }
    }

    #[tokio::test]
    async fn test_dropping_receiver_unregisters() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(ChangeEvent::SubjectsChanged);
        assert_eq!(rx.recv().await.unwrap(), ChangeEvent::SubjectsChanged);

        drop(rx);
        assert_eq!(bus.subscriber_count(), 0);
        bus.emit(ChangeEvent::UserChanged);
    }
}
