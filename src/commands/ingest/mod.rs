use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use rusqlite::{Connection, params};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::cli::{IngestArgs, IngestStrategy};
use crate::extract::*;
use crate::markup::{MarkupNode, parse_document};
use crate::model::{DocumentSummary, IngestPaths, IngestRunManifest};
use crate::util::{
    ensure_directory, now_utc_string, sha256_file, utc_compact_string, write_json_pretty,
};

const DB_SCHEMA_VERSION: &str = "0.1.0";

mod cancel;
mod context;
mod db_setup;
mod discovery;
mod entities;
mod graph;
mod orchestrator;
mod outcome;
mod phases;
mod remap;
mod run;
mod store;
mod strategy;
#[cfg(test)]
mod tests;
mod writer;

pub use run::run;
pub(crate) use db_setup::{schema_version, table_counts};
pub(crate) use outcome::AggregateResult;
pub(crate) use store::StoreMetrics;

use cancel::*;
use context::*;
use db_setup::*;
use discovery::*;
use entities::*;
use graph::*;
use orchestrator::*;
use phases::*;
use remap::*;
use store::*;
use strategy::*;
use writer::*;
