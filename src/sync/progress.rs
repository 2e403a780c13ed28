use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::model::ResourceCategory;

/// Handle to one in-flight category update.
///
/// Dropping the handle detaches the update; it still runs to completion and
/// invokes its callback.
#[derive(Debug)]
pub struct ProgressHandle {
    category: ResourceCategory,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ProgressHandle {
    pub(crate) fn new(
        category: ResourceCategory,
        cancel: watch::Sender<bool>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            category,
            cancel,
            task,
        }
    }

    pub fn category(&self) -> ResourceCategory {
        self.category
    }

    /// Request cancellation. Only honoured while pages are still being
    /// fetched; a merge that already started commits normally.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait until the update (including its completion callback) has run.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            tracing::error!(category = %self.category, error = %e, "Sync task aborted");
        }
    }
}

/// Receiving side of a [`ProgressHandle`]'s cancel flag.
#[derive(Debug)]
pub(crate) struct CancelSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancelSignal {
    pub(crate) fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    /// A signal that never fires, for awaited updates with no handle.
    pub(crate) fn never() -> Self {
        Self { rx: None }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested; pending forever otherwise.
    pub(crate) async fn cancelled(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            // Err means the handle was dropped without cancelling
            if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}
