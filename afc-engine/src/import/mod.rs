//! Import/Dedup Engine
//!
//! Turns raw contact rows into leads: normalize identity fields, match
//! against existing leads (and earlier rows of the same file), then create,
//! update or skip. New leads get their initial lifecycle state here, so the
//! lead-created hook leaves them alone.

pub mod batch;
pub mod engine;
pub mod matcher;
pub mod normalize;
pub mod row;

pub use engine::ImportEngine;
pub use normalize::{normalize_email, normalize_phone};

use afc_common::model::Lead;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What to do with a row that matches an existing lead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ImportMode {
    /// Matches are skipped
    #[default]
    InsertOnly,
    /// Matches are updated in place
    Upsert,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub rows: Vec<Map<String, Value>>,
    #[serde(default)]
    pub mode: ImportMode,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRow {
    /// 1-based position in the request
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub skipped_rows: Vec<SkippedRow>,
    /// Sample of would-be lead records (dry run only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<Vec<Lead>>,
    /// Set when a batch failed to commit; counts cover committed batches only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImportReport {
    fn skip(&mut self, row: usize, reason: impl Into<String>) {
        self.skipped += 1;
        self.skipped_rows.push(SkippedRow {
            row,
            reason: reason.into(),
        });
    }
}
