//! Table declarations for the local resource store.
//!
//! Every resource category gets its own table keyed by the remote `id`, with
//! the columns the analytics queries filter on broken out of the JSON payload.
//! Timestamps used in range queries are unix microseconds; `data_updated_at` keeps
//! the source's RFC 3339 text so ledger cursors round-trip exactly.

use super::{Column, ColumnType, Index, Schema, Table, VirtualTable};

pub const ASSIGNMENTS: &str = "assignments";
pub const SUBJECTS: &str = "subjects";
pub const STUDY_MATERIALS: &str = "study_materials";
pub const REVIEW_STATISTICS: &str = "review_statistics";
pub const USER_PROFILE: &str = "user_profile";
pub const SYNC_LEDGER: &str = "sync_ledger";
pub const STORE_METADATA: &str = "store_metadata";
pub const SUBJECT_SEARCH: &str = "subject_search";

/// BM25 weights: exact character hits outrank reading hits, which outrank meaning hits.
pub const CHARACTERS_RANK: f64 = 10.0;
pub const READING_RANK: f64 = 5.0;

/// Columns shared by every resource table.
fn resource_table(name: &str) -> Table {
    Table::new(name)
        .column(Column::new("id", ColumnType::Integer).not_null().primary_key())
        .column(Column::new("category", ColumnType::Text).not_null())
        .column(Column::new("source_url", ColumnType::Text).not_null())
        .column(Column::new("data_updated_at", ColumnType::Text).not_null())
}

fn assignments() -> Table {
    resource_table(ASSIGNMENTS)
        .column(Column::new("subject_id", ColumnType::Integer).not_null())
        .column(Column::new("subject_type", ColumnType::Text).not_null())
        .column(Column::new("level", ColumnType::Integer).not_null())
        .column(Column::new("srs_stage", ColumnType::Integer).not_null())
        .column(Column::new("unlocked_at", ColumnType::Integer))
        .column(Column::new("started_at", ColumnType::Integer))
        .column(Column::new("passed_at", ColumnType::Integer))
        .column(Column::new("burned_at", ColumnType::Integer))
        .column(Column::new("available_at", ColumnType::Integer))
        .column(Column::new("resurrected_at", ColumnType::Integer))
        .column(Column::new("passed", ColumnType::Integer).not_null())
        .column(Column::new("resurrected", ColumnType::Integer).not_null())
        .column(Column::new("payload", ColumnType::Text).not_null())
        .index(Index::unique("idx_assignments_subject", ["subject_id"]))
        .index(Index::new("idx_assignments_available", ["available_at"]))
        .index(Index::new("idx_assignments_level_type", ["level", "subject_type"]))
        .index(Index::new("idx_assignments_stage", ["srs_stage"]))
}

fn subjects() -> Table {
    resource_table(SUBJECTS)
        .column(Column::new("subject_type", ColumnType::Text).not_null())
        .column(Column::new("level", ColumnType::Integer).not_null())
        .column(Column::new("slug", ColumnType::Text).not_null())
        .column(Column::new("characters", ColumnType::Text))
        .column(Column::new("payload", ColumnType::Text).not_null())
        .index(Index::new("idx_subjects_level_type", ["level", "subject_type"]))
}

fn keyed_by_subject(name: &str) -> Table {
    let index = format!("idx_{name}_subject");
    resource_table(name)
        .column(Column::new("subject_id", ColumnType::Integer).not_null())
        .column(Column::new("payload", ColumnType::Text).not_null())
        .index(Index::unique(index, ["subject_id"]))
}

fn user_profile() -> Table {
    resource_table(USER_PROFILE)
        .column(Column::new("username", ColumnType::Text).not_null())
        .column(Column::new("level", ColumnType::Integer).not_null())
        .column(Column::new("payload", ColumnType::Text).not_null())
}

fn sync_ledger() -> Table {
    Table::new(SYNC_LEDGER)
        .column(Column::new("category", ColumnType::Text).not_null().primary_key())
        .column(Column::new("last_update_at", ColumnType::Text).not_null())
        .column(Column::new("fetched_at", ColumnType::Integer).not_null())
}

fn store_metadata() -> Table {
    Table::new(STORE_METADATA)
        .column(Column::new("key", ColumnType::Text).not_null().primary_key())
        .column(Column::new("value", ColumnType::Text).not_null())
}

fn subject_search() -> VirtualTable {
    VirtualTable::new(SUBJECT_SEARCH)
        .column(Column::new("characters", ColumnType::Text).rank(CHARACTERS_RANK))
        .column(Column::new("meaning", ColumnType::Text))
        .column(Column::new("reading", ColumnType::Text).rank(READING_RANK))
}

/// The full store layout, in creation order.
pub fn store_schema() -> Schema {
    Schema::new()
        .table(assignments())
        .table(subjects())
        .table(keyed_by_subject(STUDY_MATERIALS))
        .table(keyed_by_subject(REVIEW_STATISTICS))
        .table(user_profile())
        .table(sync_ledger())
        .table(store_metadata())
        .virtual_table(subject_search())
}
