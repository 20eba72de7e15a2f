use std::time::Duration;

use super::*;

pub fn run(args: IngestArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let cache_root = args.cache_root.clone();
    let manifest_dir = cache_root.join("manifests");
    ensure_directory(&manifest_dir)?;

    let run_manifest_path = args.run_manifest_path.clone().unwrap_or_else(|| {
        manifest_dir.join(format!(
            "ingest_run_{}.json",
            utc_compact_string(started_ts)
        ))
    });
    let db_path = args
        .db_path
        .clone()
        .unwrap_or_else(|| cache_root.join("labelgraph.sqlite"));

    info!(
        cache_root = %cache_root.display(),
        input = %args.input.display(),
        run_id = %run_id,
        strategy = args.strategy.as_str(),
        "starting ingest"
    );

    let root = load_document(&args.input)?;
    let source_sha256 = sha256_file(&args.input)?;
    let Some(header) = document_header(&root) else {
        bail!(
            "{} has no document identifier (id/@root)",
            args.input.display()
        );
    };

    let mut connection = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;

    let options = ingest_options(&args);

    let tx = connection
        .transaction()
        .context("failed to begin ingest transaction")?;
    let document_id = upsert_document(&tx, &header, &source_sha256)?;

    let mut store = SqliteStore::new(&tx);
    let mut progress = |milestone: &str| {
        info!(document_id, milestone, "ingest progress");
    };
    let result = ingest(&mut store, &root, document_id, &options, &mut progress)?;
    let store_operations = store.into_metrics();
    info!(
        unit_round_trips = store_operations.round_trips("unit"),
        edge_round_trips = store_operations.round_trips("edge"),
        "section and hierarchy writes finished"
    );

    tx.commit().context("failed to commit ingest transaction")?;

    let table_totals = table_counts(&connection)?;
    let status = if result.success {
        "completed"
    } else {
        "completed_with_errors"
    };

    let manifest = IngestRunManifest {
        manifest_version: 1,
        run_id,
        db_schema_version: DB_SCHEMA_VERSION.to_string(),
        status: status.to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: render_ingest_command(&args),
        strategy: args.strategy,
        skipped_phases: args.skip_phases.clone(),
        paths: IngestPaths {
            cache_root: cache_root.display().to_string(),
            manifest_dir: manifest_dir.display().to_string(),
            input_path: args.input.display().to_string(),
            db_path: db_path.display().to_string(),
        },
        document: DocumentSummary {
            document_id,
            document_guid: header.document_guid.clone(),
            set_id: header.set_id.clone(),
            version_number: header.version_number,
            title: header.title.clone(),
            source_sha256,
        },
        result,
        store_operations,
        table_counts: table_totals,
    };

    write_json_pretty(&run_manifest_path, &manifest)?;
    info!(path = %run_manifest_path.display(), "wrote ingest run manifest");

    if !manifest.result.success {
        bail!(
            "ingest of {} finished with {} error(s); see {}",
            args.input.display(),
            manifest.result.errors.len(),
            run_manifest_path.display()
        );
    }

    info!(
        document_id,
        sections_created = manifest.result.created("unit"),
        sections_existing = manifest.result.existing("unit"),
        warnings = manifest.result.warnings.len(),
        "ingest completed"
    );
    Ok(())
}

fn load_document(path: &Path) -> Result<MarkupNode> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_document(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn ingest_options(args: &IngestArgs) -> IngestOptions {
    let cancel = match args.deadline_secs {
        Some(seconds) => CancellationToken::with_deadline(Duration::from_secs(seconds)),
        None => CancellationToken::new(),
    };

    IngestOptions {
        strategy: args.strategy,
        skip_phases: args.skip_phases.clone(),
        cancel,
    }
}

pub(super) fn render_ingest_command(args: &IngestArgs) -> String {
    let mut command = vec![
        "labelgraph".to_string(),
        "ingest".to_string(),
        "--cache-root".to_string(),
        args.cache_root.display().to_string(),
        "--input".to_string(),
        args.input.display().to_string(),
    ];

    if let Some(path) = &args.db_path {
        command.push("--db-path".to_string());
        command.push(path.display().to_string());
    }
    if let Some(path) = &args.run_manifest_path {
        command.push("--run-manifest-path".to_string());
        command.push(path.display().to_string());
    }
    if args.strategy != IngestStrategy::default() {
        command.push("--strategy".to_string());
        command.push(args.strategy.as_str().to_string());
    }
    for phase in &args.skip_phases {
        command.push("--skip-phase".to_string());
        command.push(phase.clone());
    }
    if let Some(seconds) = args.deadline_secs {
        command.push("--deadline-secs".to_string());
        command.push(seconds.to_string());
    }

    command.join(" ")
}
