mod resources;
mod search;
mod store;
mod types;

pub use search::fold_kana;
pub use store::Store;
pub use types::{AccessMode, LedgerEntry, SearchConsistencyReport, StoreError};

pub(crate) use types::{decode_micros, AssignmentRow, ASSIGNMENT_COLUMNS};
