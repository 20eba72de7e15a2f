use super::*;

pub(crate) fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys")?;
    Ok(())
}

pub(crate) fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS documents (
          document_id INTEGER PRIMARY KEY AUTOINCREMENT,
          document_guid TEXT NOT NULL UNIQUE,
          set_id TEXT,
          version_number INTEGER,
          title TEXT,
          source_sha256 TEXT,
          ingested_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sections (
          section_id INTEGER PRIMARY KEY AUTOINCREMENT,
          document_id INTEGER NOT NULL,
          section_guid TEXT,
          link_id TEXT,
          section_code TEXT,
          code_system TEXT,
          display_name TEXT,
          title TEXT,
          effective_date TEXT,
          nesting_level INTEGER NOT NULL DEFAULT 0,
          FOREIGN KEY(document_id) REFERENCES documents(document_id)
        );

        CREATE TABLE IF NOT EXISTS section_hierarchy (
          hierarchy_id INTEGER PRIMARY KEY AUTOINCREMENT,
          document_id INTEGER NOT NULL,
          parent_section_id INTEGER NOT NULL,
          child_section_id INTEGER NOT NULL,
          sequence_number INTEGER NOT NULL,
          FOREIGN KEY(document_id) REFERENCES documents(document_id),
          FOREIGN KEY(parent_section_id) REFERENCES sections(section_id),
          FOREIGN KEY(child_section_id) REFERENCES sections(section_id)
        );

        CREATE TABLE IF NOT EXISTS section_references (
          reference_id INTEGER PRIMARY KEY AUTOINCREMENT,
          section_id INTEGER NOT NULL,
          sequence_number INTEGER NOT NULL,
          target TEXT NOT NULL,
          label TEXT,
          target_section_id INTEGER,
          FOREIGN KEY(section_id) REFERENCES sections(section_id),
          FOREIGN KEY(target_section_id) REFERENCES sections(section_id)
        );

        CREATE TABLE IF NOT EXISTS section_media (
          media_id INTEGER PRIMARY KEY AUTOINCREMENT,
          section_id INTEGER NOT NULL,
          media_ref TEXT NOT NULL,
          file_name TEXT,
          media_type TEXT,
          alt_text TEXT,
          FOREIGN KEY(section_id) REFERENCES sections(section_id)
        );

        CREATE TABLE IF NOT EXISTS section_content (
          content_id INTEGER PRIMARY KEY AUTOINCREMENT,
          section_id INTEGER NOT NULL,
          sequence_number INTEGER NOT NULL,
          content_kind TEXT NOT NULL,
          content_text TEXT NOT NULL,
          media_id INTEGER,
          FOREIGN KEY(section_id) REFERENCES sections(section_id),
          FOREIGN KEY(media_id) REFERENCES section_media(media_id)
        );

        CREATE TABLE IF NOT EXISTS section_index (
          index_id INTEGER PRIMARY KEY AUTOINCREMENT,
          section_id INTEGER NOT NULL,
          document_id INTEGER NOT NULL,
          root_section_id INTEGER NOT NULL,
          depth INTEGER NOT NULL,
          outline_number TEXT,
          ancestor_path TEXT NOT NULL,
          FOREIGN KEY(section_id) REFERENCES sections(section_id),
          FOREIGN KEY(document_id) REFERENCES documents(document_id),
          FOREIGN KEY(root_section_id) REFERENCES sections(section_id)
        );

        CREATE TABLE IF NOT EXISTS section_tables (
          table_id INTEGER PRIMARY KEY AUTOINCREMENT,
          section_id INTEGER NOT NULL,
          sequence_number INTEGER NOT NULL,
          caption TEXT,
          row_count INTEGER NOT NULL,
          column_count INTEGER NOT NULL,
          header_text TEXT,
          FOREIGN KEY(section_id) REFERENCES sections(section_id)
        );

        CREATE TABLE IF NOT EXISTS boxed_warnings (
          boxed_warning_id INTEGER PRIMARY KEY AUTOINCREMENT,
          section_id INTEGER NOT NULL,
          warning_text TEXT NOT NULL,
          FOREIGN KEY(section_id) REFERENCES sections(section_id)
        );

        CREATE TABLE IF NOT EXISTS section_highlights (
          highlight_id INTEGER PRIMARY KEY AUTOINCREMENT,
          section_id INTEGER NOT NULL,
          sequence_number INTEGER NOT NULL,
          highlight_text TEXT NOT NULL,
          FOREIGN KEY(section_id) REFERENCES sections(section_id)
        );
        ",
        )
        .context("failed to create schema tables")?;

    ensure_column_exists(connection, "documents", "source_sha256 TEXT")?;
    ensure_column_exists(connection, "sections", "effective_date TEXT")?;
    ensure_column_exists(connection, "section_index", "outline_number TEXT")?;

    connection
        .execute_batch(
            "
        CREATE INDEX IF NOT EXISTS idx_sections_document ON sections(document_id);
        CREATE INDEX IF NOT EXISTS idx_sections_document_guid ON sections(document_id, section_guid);
        CREATE INDEX IF NOT EXISTS idx_hierarchy_document ON section_hierarchy(document_id);
        CREATE INDEX IF NOT EXISTS idx_hierarchy_child ON section_hierarchy(child_section_id);
        CREATE INDEX IF NOT EXISTS idx_references_section ON section_references(section_id);
        CREATE INDEX IF NOT EXISTS idx_media_section ON section_media(section_id);
        CREATE INDEX IF NOT EXISTS idx_content_section ON section_content(section_id);
        CREATE INDEX IF NOT EXISTS idx_index_section ON section_index(section_id);
        CREATE INDEX IF NOT EXISTS idx_index_root ON section_index(document_id, root_section_id);
        CREATE INDEX IF NOT EXISTS idx_tables_section ON section_tables(section_id);
        CREATE INDEX IF NOT EXISTS idx_boxed_warnings_section ON boxed_warnings(section_id);
        CREATE INDEX IF NOT EXISTS idx_highlights_section ON section_highlights(section_id);
        ",
        )
        .context("failed to create schema indexes")?;

    let now = now_utc_string();
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now],
    )?;

    Ok(())
}

fn ensure_column_exists(
    connection: &Connection,
    table_name: &str,
    column_definition: &str,
) -> Result<()> {
    let Some(column_name) = column_definition.split_whitespace().next() else {
        bail!("invalid column definition: {column_definition}");
    };

    let pragma_sql = format!("PRAGMA table_info({table_name})");
    let mut statement = connection
        .prepare(&pragma_sql)
        .with_context(|| format!("failed to inspect schema for table {table_name}"))?;

    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        let existing_name: String = row.get(1)?;
        if existing_name == column_name {
            return Ok(());
        }
    }

    let alter_sql = format!("ALTER TABLE {table_name} ADD COLUMN {column_definition}");
    connection
        .execute(&alter_sql, [])
        .with_context(|| format!("failed to add column {column_name} on {table_name}"))?;

    Ok(())
}

/// Inserts or refreshes the document row and returns its id.
pub(crate) fn upsert_document(
    connection: &Connection,
    header: &DocumentHeader,
    source_sha256: &str,
) -> Result<i64> {
    connection
        .execute(
            "
            INSERT INTO documents(document_guid, set_id, version_number, title, source_sha256, ingested_at)
            VALUES(?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(document_guid) DO UPDATE SET
              set_id=excluded.set_id,
              version_number=excluded.version_number,
              title=excluded.title,
              source_sha256=excluded.source_sha256,
              ingested_at=excluded.ingested_at
            ",
            params![
                &header.document_guid,
                &header.set_id,
                header.version_number,
                &header.title,
                source_sha256,
                now_utc_string()
            ],
        )
        .with_context(|| format!("failed to upsert document {}", header.document_guid))?;

    let document_id = connection
        .query_row(
            "SELECT document_id FROM documents WHERE document_guid = ?1",
            [&header.document_guid],
            |row| row.get(0),
        )
        .with_context(|| format!("failed to load id for document {}", header.document_guid))?;
    Ok(document_id)
}

const COUNTED_TABLES: &[&str] = &[
    "documents",
    "sections",
    "section_hierarchy",
    "section_references",
    "section_media",
    "section_content",
    "section_index",
    "section_tables",
    "boxed_warnings",
    "section_highlights",
];

pub(crate) fn table_counts(connection: &Connection) -> Result<BTreeMap<String, i64>> {
    let mut counts = BTreeMap::new();
    for table in COUNTED_TABLES {
        let count = connection
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .with_context(|| format!("failed to count rows in {table}"))?;
        counts.insert((*table).to_string(), count);
    }
    Ok(counts)
}

pub(crate) fn schema_version(connection: &Connection) -> Result<Option<String>> {
    let mut statement = connection
        .prepare("SELECT value FROM metadata WHERE key = 'db_schema_version'")
        .context("failed to prepare schema version lookup")?;
    let mut rows = statement.query([])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}
