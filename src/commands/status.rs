use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::ingest::{schema_version, table_counts};

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| args.cache_root.join("labelgraph.sqlite"));

    info!(cache_root = %args.cache_root.display(), "status requested");

    if !db_path.exists() {
        warn!(path = %db_path.display(), "database file missing");
        return Ok(());
    }

    let connection = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;

    let version = schema_version(&connection)?;
    info!(
        path = %db_path.display(),
        db_schema_version = %version.unwrap_or_default(),
        "database status"
    );

    for (table, count) in table_counts(&connection)? {
        info!(table = %table, rows = count, "table row count");
    }

    Ok(())
}
