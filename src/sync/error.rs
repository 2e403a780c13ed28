use thiserror::Error;

use crate::api::FetchError;
use crate::error::ErrorKind;
use crate::model::ResourceCategory;
use crate::storage::StoreError;

/// Failure of one category update. Nothing was committed when this is returned.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Update of {0} was cancelled")]
    Cancelled(ResourceCategory),
    /// The remote kept returning `next_url` past the configured page cap
    #[error("Pagination of {category} exceeded {limit} pages")]
    TooManyPages {
        category: ResourceCategory,
        limit: usize,
    },
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Fetch(e) => e.kind(),
            SyncError::Store(_) => ErrorKind::Storage,
            SyncError::Cancelled(_) => ErrorKind::Cancelled,
            SyncError::TooManyPages { .. } => ErrorKind::Decode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_pass_through() {
        assert_eq!(
            SyncError::from(FetchError::InvalidCredential).kind(),
            ErrorKind::InvalidCredential
        );
        assert_eq!(
            SyncError::from(FetchError::NotFound("x".into())).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(SyncError::from(FetchError::Timeout).kind(), ErrorKind::Network);
        assert_eq!(SyncError::from(StoreError::ReadOnly).kind(), ErrorKind::Storage);
        assert_eq!(
            SyncError::Cancelled(ResourceCategory::Subjects).kind(),
            ErrorKind::Cancelled
        );
    }
}
