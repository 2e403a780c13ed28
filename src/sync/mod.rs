//! Incremental synchronisation of remote collections into the store.
//!
//! Each update reads the category's ledger row, skips the fetch entirely when
//! the last successful merge is younger than the caller's minimum interval,
//! otherwise pages through the remote delta (`updated_after` = ledger cursor)
//! and merges the whole delta in one transaction. A change event is broadcast
//! only after the merge commits; a failed update leaves the store and ledger
//! exactly as they were.
//!
//! Fetches run on a spawned task and never hold the store connection, so
//! analytics queries keep running while pages download.

mod error;
mod events;
mod progress;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::{broadcast, watch};

use crate::api::{PageRequest, ResourceFetcher};
use crate::model::{ResourceCategory, ResourceItem};
use crate::storage::{LedgerEntry, Store};

pub use error::SyncError;
pub use events::{ChangeEvent, EventBus};
pub use progress::ProgressHandle;

use progress::CancelSignal;

/// Result of a successful update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Throttled: the ledger is younger than the minimum interval, nothing fetched
    NoData,
    /// Fetched and merged `items` resources (zero for an empty delta)
    Updated { items: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Hard cap on pages followed per update
    pub max_pages: usize,
    /// Buffered events per subscriber before it lags
    pub event_capacity: usize,
    /// Categories fetched concurrently by [`SyncEngine::update_all`]
    pub concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_pages: 1000,
            event_capacity: 64,
            concurrency: 5,
        }
    }
}

/// Drives category updates against one store.
///
/// Cheap to clone; clones share the store, fetcher and event bus. At most
/// one update per category should be in flight at a time; overlapping
/// updates of the same category both merge, last commit wins.
#[derive(Clone)]
pub struct SyncEngine {
    store: Store,
    fetcher: Arc<dyn ResourceFetcher>,
    events: EventBus,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(store: Store, fetcher: Arc<dyn ResourceFetcher>, config: SyncConfig) -> Self {
        Self {
            store,
            fetcher,
            events: EventBus::with_capacity(config.event_capacity),
            config,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Spawned Updates
    // ========================================================================
    //
    // Each spawns onto the current tokio runtime and must be called from
    // within one. The completion callback runs on the spawned task after the
    // store connection has been released, so it may query the store.

    pub fn update_assignments<F>(&self, min_interval: Duration, completion: F) -> ProgressHandle
    where
        F: FnOnce(Result<SyncOutcome, SyncError>) + Send + 'static,
    {
        self.spawn_update(ResourceCategory::Assignments, min_interval, completion)
    }

    pub fn update_subjects<F>(&self, min_interval: Duration, completion: F) -> ProgressHandle
    where
        F: FnOnce(Result<SyncOutcome, SyncError>) + Send + 'static,
    {
        self.spawn_update(ResourceCategory::Subjects, min_interval, completion)
    }

    pub fn update_study_materials<F>(&self, min_interval: Duration, completion: F) -> ProgressHandle
    where
        F: FnOnce(Result<SyncOutcome, SyncError>) + Send + 'static,
    {
        self.spawn_update(ResourceCategory::StudyMaterials, min_interval, completion)
    }

    pub fn update_review_statistics<F>(
        &self,
        min_interval: Duration,
        completion: F,
    ) -> ProgressHandle
    where
        F: FnOnce(Result<SyncOutcome, SyncError>) + Send + 'static,
    {
        self.spawn_update(ResourceCategory::ReviewStatistics, min_interval, completion)
    }

    pub fn update_user<F>(&self, min_interval: Duration, completion: F) -> ProgressHandle
    where
        F: FnOnce(Result<SyncOutcome, SyncError>) + Send + 'static,
    {
        self.spawn_update(ResourceCategory::User, min_interval, completion)
    }

    fn spawn_update<F>(
        &self,
        category: ResourceCategory,
        min_interval: Duration,
        completion: F,
    ) -> ProgressHandle
    where
        F: FnOnce(Result<SyncOutcome, SyncError>) + Send + 'static,
    {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let engine = self.clone();
        let task = tokio::spawn(async move {
            let result = engine
                .run(category, min_interval, CancelSignal::new(cancel_rx))
                .await;
            completion(result);
        });
        ProgressHandle::new(category, cancel_tx, task)
    }

    // ========================================================================
    // Awaitable Updates
    // ========================================================================

    /// Update one category and wait for the result.
    pub async fn update(
        &self,
        category: ResourceCategory,
        min_interval: Duration,
    ) -> Result<SyncOutcome, SyncError> {
        self.run(category, min_interval, CancelSignal::never()).await
    }

    /// Update every category, fetching up to `concurrency` at once.
    ///
    /// Results are returned in [`ResourceCategory::ALL`] order. One category
    /// failing does not stop the others.
    pub async fn update_all(
        &self,
        min_interval: Duration,
    ) -> Vec<(ResourceCategory, Result<SyncOutcome, SyncError>)> {
        let mut results: Vec<_> = stream::iter(ResourceCategory::ALL)
            .map(|category| async move { (category, self.update(category, min_interval).await) })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        results.sort_by_key(|(category, _)| *category);
        results
    }

    // ========================================================================
    // Update Pipeline
    // ========================================================================

    async fn run(
        &self,
        category: ResourceCategory,
        min_interval: Duration,
        mut cancel: CancelSignal,
    ) -> Result<SyncOutcome, SyncError> {
        let ledger = self.store.ledger_entry(category).await?;
        if let Some(entry) = &ledger {
            if is_throttled(entry, min_interval, Utc::now()) {
                tracing::debug!(
                    category = %category,
                    fetched_at = %entry.fetched_at,
                    "Skipping update, ledger is fresh"
                );
                return Ok(SyncOutcome::NoData);
            }
        }

        let items = if category.is_standalone() {
            self.sync_user(&mut cancel).await?
        } else {
            let cursor = ledger.map(|entry| entry.last_update_at);
            self.sync_collection(category, cursor, &mut cancel).await?
        };

        self.events.emit(ChangeEvent::for_category(category));
        tracing::info!(category = %category, items = items, "Update committed");
        Ok(SyncOutcome::Updated { items })
    }

    async fn sync_user(&self, cancel: &mut CancelSignal) -> Result<usize, SyncError> {
        let category = ResourceCategory::User;
        let resource = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(category)),
            resource = self.fetcher.fetch_user() => resource?,
        };
        if cancel.is_cancelled() {
            return Err(cancelled(category));
        }

        self.store.merge_user(&resource, Utc::now()).await?;
        Ok(1)
    }

    async fn sync_collection(
        &self,
        category: ResourceCategory,
        cursor: Option<DateTime<Utc>>,
        cancel: &mut CancelSignal,
    ) -> Result<usize, SyncError> {
        let mut items: Vec<ResourceItem> = Vec::new();
        let mut collection_updated_at: Option<DateTime<Utc>> = None;
        let mut request = PageRequest::First {
            updated_after: cursor,
        };
        let mut pages = 0usize;

        loop {
            if pages >= self.config.max_pages {
                return Err(SyncError::TooManyPages {
                    category,
                    limit: self.config.max_pages,
                });
            }

            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(category)),
                page = self.fetcher.fetch_collection(category, &request) => page?,
            };
            pages += 1;

            tracing::debug!(
                category = %category,
                page = pages,
                items = page.items.len(),
                "Fetched page"
            );

            collection_updated_at = collection_updated_at.max(page.data_updated_at);
            items.extend(page.items);

            match page.next_url {
                Some(next) => request = PageRequest::Next(next),
                None => break,
            }
        }

        // Last chance to back out; once the merge starts it commits atomically.
        if cancel.is_cancelled() {
            return Err(cancelled(category));
        }

        let merged = self
            .store
            .merge_collection(category, &items, collection_updated_at, Utc::now())
            .await?;
        Ok(merged)
    }
}

fn cancelled(category: ResourceCategory) -> SyncError {
    tracing::info!(category = %category, "Update cancelled before merge");
    SyncError::Cancelled(category)
}

/// True when the last merge is younger than `min_interval`. A ledger stamped
/// in the future (clock moved backwards) counts as fresh.
fn is_throttled(entry: &LedgerEntry, min_interval: Duration, now: DateTime<Utc>) -> bool {
    if min_interval.is_zero() {
        return false;
    }
    match (now - entry.fetched_at).to_std() {
        Ok(elapsed) => elapsed < min_interval,
        Err(_) => true,
    }
}
