use std::collections::BTreeMap;

use serde::Serialize;

use crate::cli::IngestStrategy;
use crate::commands::ingest::{AggregateResult, StoreMetrics};

#[derive(Debug, Clone, Serialize)]
pub struct IngestPaths {
    pub cache_root: String,
    pub manifest_dir: String,
    pub input_path: String,
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub document_id: i64,
    pub document_guid: String,
    pub set_id: Option<String>,
    pub version_number: Option<i64>,
    pub title: Option<String>,
    pub source_sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub db_schema_version: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub strategy: IngestStrategy,
    pub skipped_phases: Vec<String>,
    pub paths: IngestPaths,
    pub document: DocumentSummary,
    pub result: AggregateResult,
    pub store_operations: StoreMetrics,
    pub table_counts: BTreeMap<String, i64>,
}
