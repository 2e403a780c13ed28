//! Local cache, sync engine and study analytics for a spaced-repetition
//! kanji service.
//!
//! [`sync::SyncEngine`] pulls resource collections into a [`storage::Store`]
//! incrementally; [`analytics::Analytics`] answers study questions from the
//! stored snapshot without touching the network.

pub mod analytics;
pub mod api;
pub mod config;
pub mod error;
pub mod model;
pub mod schema;
pub mod storage;
pub mod sync;

pub use analytics::{Analytics, AnalyticsError};
pub use api::{FetchError, HttpFetcher, ResourceFetcher};
pub use config::{Config, ConfigError};
pub use error::ErrorKind;
pub use model::ResourceCategory;
pub use storage::{AccessMode, Store, StoreError};
pub use sync::{SyncConfig, SyncEngine, SyncError, SyncOutcome};
