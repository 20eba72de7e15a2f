use std::path::PathBuf;

use rusqlite::types::Value;

use super::run::render_ingest_command;
use super::*;

const NESTED_DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<document xmlns="urn:hl7-org:v3">
  <id root="doc-nested"/>
  <setId root="set-nested"/>
  <versionNumber value="3"/>
  <title>Nested label</title>
  <component><structuredBody>
    <component><section ID="root">
      <id root="g-root"/>
      <code code="34067-9" codeSystem="2.16.840.1.113883.6.1" displayName="INDICATIONS"/>
      <title>1 INDICATIONS AND USAGE</title>
      <effectiveTime value="20240115"/>
      <text><paragraph>Root narrative.</paragraph></text>
      <component><section>
        <id root="g-c1"/>
        <title>1.1 Adults</title>
        <text><paragraph>Adult narrative.</paragraph></text>
        <component><section><id root="g-c1-a"/><title>1.1.1 Renal</title><text><paragraph>Renal text.</paragraph></text></section></component>
        <component><section><id root="g-c1-b"/><title>1.1.2 Hepatic</title><text><paragraph>Hepatic text.</paragraph></text></section></component>
      </section></component>
      <component><section>
        <id root="g-c2"/>
        <title>1.2 Children</title>
        <text><paragraph>Pediatric narrative.</paragraph></text>
        <component><section><id root="g-c2-a"/><title>1.2.1 Infants</title><text><paragraph>Infant text.</paragraph></text></section></component>
        <component><section><id root="g-c2-b"/><title>1.2.2 Adolescents</title><text><paragraph>Adolescent text.</paragraph></text></section></component>
      </section></component>
    </section></component>
  </structuredBody></component>
</document>"#;

const RICH_DOCUMENT: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<document xmlns="urn:hl7-org:v3">
  <id root="doc-rich"/>
  <title>Rich label</title>
  <component><structuredBody>
    <component><section ID="bw">
      <id root="g-bw"/>
      <code code="34066-1" displayName="BOXED WARNING SECTION"/>
      <title>WARNING: SERIOUS RISK</title>
      <text><paragraph>Serious risk of harm.</paragraph></text>
    </section></component>
    <component><section ID="sec-1">
      <id root="g-1"/>
      <code code="34067-9"/>
      <title>1 INDICATIONS</title>
      <text>
        <paragraph>See <linkHtml href="#sec-2">Dosage</linkHtml> and <linkHtml href="#missing">elsewhere</linkHtml>.</paragraph>
        <table>
          <caption>Doses</caption>
          <thead><tr><th>Dose</th><th>Frequency</th></tr></thead>
          <tbody><tr><td>5 mg</td><td>daily</td></tr></tbody>
        </table>
        <renderMultiMedia referencedObject="fig1"/>
      </text>
      <component><observationMedia ID="fig1">
        <text>Figure 1</text>
        <value mediaType="image/jpeg"><reference value="fig1.jpg"/></value>
      </observationMedia></component>
      <excerpt><highlight><text><paragraph>Indicated for condition X.</paragraph></text></highlight></excerpt>
      <component><section ID="sec-1-1">
        <id root="g-1-1"/>
        <title>1.1 Adults</title>
        <text><paragraph>Adults only.</paragraph></text>
      </section></component>
    </section></component>
    <component><section ID="sec-2">
      <id root="g-2"/>
      <title>2 DOSAGE</title>
      <text><list><item>Take one tablet.</item><item>Repeat daily.</item></list></text>
    </section></component>
  </structuredBody></component>
</document>"##;

const SHARED_TITLE_DOCUMENT: &str = r#"<document>
  <id root="doc-shared"/>
  <component><structuredBody>
    <component><section>
      <id root="g-p1"/>
      <title>1 INDICATIONS</title>
      <component><section><code code="42229-5"/><title>Overview</title></section></component>
    </section></component>
    <component><section>
      <id root="g-p2"/>
      <title>2 DOSAGE</title>
      <component><section><code code="42229-5"/><title>Overview</title></section></component>
    </section></component>
  </structuredBody></component>
</document>"#;

const KEYLESS_CHILD_DOCUMENT: &str = r#"<document>
  <id root="doc-keyless"/>
  <component><structuredBody>
    <component><section>
      <id root="g-top"/>
      <title>Top</title>
      <component><section>
        <title>Untracked child</title>
        <component><section><id root="g-gc-1"/><title>Grandchild one</title></section></component>
        <component><section><id root="g-gc-2"/><title>Grandchild two</title></section></component>
      </section></component>
    </section></component>
  </structuredBody></component>
</document>"#;

fn open_database() -> Connection {
    let connection = Connection::open_in_memory().expect("in-memory db opens");
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .expect("foreign keys enabled");
    ensure_schema(&connection).expect("schema applies");
    connection
}

fn prepare_document(connection: &Connection, xml: &str) -> (MarkupNode, i64) {
    let root = parse_document(xml).expect("fixture parses");
    let header = document_header(&root).expect("fixture has a document id");
    let document_id = upsert_document(connection, &header, "fixture-sha").expect("document upserts");
    (root, document_id)
}

fn ingest_xml(
    connection: &Connection,
    xml: &str,
    options: &IngestOptions,
) -> (AggregateResult, StoreMetrics) {
    let (root, document_id) = prepare_document(connection, xml);
    let mut store = SqliteStore::new(connection);
    let result = ingest(&mut store, &root, document_id, options, &mut |_: &str| {})
        .expect("ingest runs");
    (result, store.into_metrics())
}

fn staged() -> IngestOptions {
    IngestOptions::default()
}

fn with_strategy(strategy: IngestStrategy) -> IngestOptions {
    IngestOptions {
        strategy,
        ..IngestOptions::default()
    }
}

fn count(connection: &Connection, table: &str) -> i64 {
    connection
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .expect("count query runs")
}

fn section_id(connection: &Connection, guid: &str) -> i64 {
    connection
        .query_row(
            "SELECT section_id FROM sections WHERE section_guid = ?1",
            [guid],
            |row| row.get(0),
        )
        .expect("section exists")
}

/// Sorted rows rendered column by column, for comparing databases whose
/// surrogate ids differ.
fn rows(connection: &Connection, sql: &str) -> Vec<String> {
    let mut statement = connection.prepare(sql).expect("snapshot query prepares");
    let column_count = statement.column_count();
    let mut rendered = statement
        .query_map([], |row| {
            (0..column_count)
                .map(|position| row.get::<_, Value>(position).map(|value| format!("{value:?}")))
                .collect::<rusqlite::Result<Vec<String>>>()
                .map(|columns| columns.join("|"))
        })
        .expect("snapshot query runs")
        .collect::<rusqlite::Result<Vec<String>>>()
        .expect("snapshot rows read");
    rendered.sort();
    rendered
}

fn snapshot(connection: &Connection) -> Vec<String> {
    let queries = [
        "SELECT section_guid, link_id, section_code, title, effective_date, nesting_level FROM sections",
        "SELECT p.section_guid, c.section_guid, h.sequence_number
         FROM section_hierarchy h
         JOIN sections p ON p.section_id = h.parent_section_id
         JOIN sections c ON c.section_id = h.child_section_id",
        "SELECT s.section_guid, r.sequence_number, r.target, r.label, t.section_guid
         FROM section_references r
         JOIN sections s ON s.section_id = r.section_id
         LEFT JOIN sections t ON t.section_id = r.target_section_id",
        "SELECT s.section_guid, m.media_ref, m.file_name, m.media_type, m.alt_text
         FROM section_media m JOIN sections s ON s.section_id = m.section_id",
        "SELECT s.section_guid, c.sequence_number, c.content_kind, c.content_text, m.media_ref
         FROM section_content c
         JOIN sections s ON s.section_id = c.section_id
         LEFT JOIN section_media m ON m.media_id = c.media_id",
        "SELECT s.section_guid, i.depth, i.outline_number, i.ancestor_path, r.section_guid
         FROM section_index i
         JOIN sections s ON s.section_id = i.section_id
         JOIN sections r ON r.section_id = i.root_section_id",
        "SELECT s.section_guid, t.caption, t.row_count, t.column_count, t.header_text
         FROM section_tables t JOIN sections s ON s.section_id = t.section_id",
        "SELECT s.section_guid, b.warning_text
         FROM boxed_warnings b JOIN sections s ON s.section_id = b.section_id",
        "SELECT s.section_guid, h.sequence_number, h.highlight_text
         FROM section_highlights h JOIN sections s ON s.section_id = h.section_id",
    ];

    queries
        .iter()
        .enumerate()
        .flat_map(|(position, sql)| {
            rows(connection, sql)
                .into_iter()
                .map(move |row| format!("{position}:{row}"))
        })
        .collect()
}

fn wide_document(children: usize) -> String {
    let mut xml = String::from(
        r#"<document><id root="doc-wide"/><component><structuredBody><component><section ID="top"><id root="g-top"/><title>Top</title>"#,
    );
    for position in 0..children {
        xml.push_str(&format!(
            r#"<component><section><id root="g-child-{position}"/><title>Child {position}</title><text><paragraph>Body {position}</paragraph></text></section></component>"#
        ));
    }
    xml.push_str("</section></component></structuredBody></component></document>");
    xml
}

struct FailingStore<'c> {
    inner: SqliteStore<'c>,
    fail_kind: &'static str,
}

impl Store for FailingStore<'_> {
    fn query<E: Entity>(&mut self, scope_id: i64) -> Result<Vec<E>> {
        self.inner.query(scope_id)
    }

    fn batch_insert<E: Entity>(&mut self, records: Vec<E>) -> Result<Vec<E>> {
        if E::KIND == self.fail_kind {
            bail!("injected {} insert failure", E::KIND);
        }
        self.inner.batch_insert(records)
    }

    fn savepoint<R>(
        &mut self,
        _name: &str,
        body: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        body(self)
    }
}

fn ingest_with_failing_kind(
    connection: &Connection,
    xml: &str,
    fail_kind: &'static str,
) -> AggregateResult {
    let (root, document_id) = prepare_document(connection, xml);
    let mut store = FailingStore {
        inner: SqliteStore::new(connection),
        fail_kind,
    };
    ingest(&mut store, &root, document_id, &staged(), &mut |_: &str| {})
        .expect("ingest runs")
}

fn failing_content<S: Store>(
    store: &mut S,
    input: &PhaseInput<'_, '_>,
    _context: &AmbientContext,
) -> Result<PhaseOutput> {
    let written = write_deduplicated(
        store,
        input.section_id,
        vec![ContentRecord {
            content_id: None,
            section_id: input.section_id,
            sequence_number: 1,
            content_kind: "paragraph".to_string(),
            content_text: "partial".to_string(),
            media_id: None,
        }],
    )?;

    if input.unit.correlation_key.as_ref().map(CorrelationKey::as_str) == Some("g-c1") {
        bail!("injected content failure");
    }

    Ok(PhaseOutput {
        created: written.iter().filter(|entry| entry.is_new).count(),
        ..PhaseOutput::default()
    })
}

#[test]
fn discover_orders_units_and_sequences_siblings() {
    let root = parse_document(NESTED_DOCUMENT).expect("fixture parses");
    let graph = discover(&root);

    let keys = graph
        .units()
        .map(|(_, unit)| unit.label())
        .collect::<Vec<String>>();
    assert_eq!(
        keys,
        vec!["g-root", "g-c1", "g-c1-a", "g-c1-b", "g-c2", "g-c2-a", "g-c2-b"]
    );

    let edges = graph
        .edges()
        .iter()
        .map(|edge| {
            (
                graph.unit(edge.parent).label(),
                graph.unit(edge.child).label(),
                edge.sequence_number,
            )
        })
        .collect::<Vec<(String, String, u32)>>();
    assert_eq!(edges.len(), 6);
    assert_eq!(edges[0], ("g-root".to_string(), "g-c1".to_string(), 1));
    assert_eq!(edges[1], ("g-c1".to_string(), "g-c1-a".to_string(), 1));
    assert_eq!(edges[2], ("g-c1".to_string(), "g-c1-b".to_string(), 2));
    assert_eq!(edges[3], ("g-root".to_string(), "g-c2".to_string(), 2));

    assert_eq!(graph.unit(UnitIndex(0)).nesting_level, 0);
    assert_eq!(graph.unit(UnitIndex(2)).nesting_level, 2);
    assert_eq!(
        graph.unit(UnitIndex(0)).attributes.effective_date.as_deref(),
        Some("2024-01-15")
    );
    assert_eq!(graph.roots(), vec![UnitIndex(0)]);
}

#[test]
fn discover_is_repeatable_on_the_same_tree() {
    let root = parse_document(RICH_DOCUMENT).expect("fixture parses");

    let render = |graph: &CorrelationGraph<'_>| {
        let units = graph
            .units()
            .map(|(_, unit)| (unit.label(), unit.parent, unit.nesting_level))
            .collect::<Vec<_>>();
        (units, graph.edges().to_vec())
    };

    assert_eq!(render(&discover(&root)), render(&discover(&root)));
}

#[test]
fn discover_detaches_children_of_malformed_sections() {
    let root = parse_document(
        r#"<document><section><text><paragraph>wrapper only</paragraph></text>
        <component><section><id root="g-inner"/><title>Inner</title></section></component>
        </section></document>"#,
    )
    .expect("fixture parses");
    let mut graph = discover(&root);

    assert_eq!(graph.len(), 1);
    assert!(graph.edges().is_empty());
    assert_eq!(graph.roots(), vec![UnitIndex(0)]);
    assert_eq!(graph.unit(UnitIndex(0)).label(), "g-inner");

    let warnings = graph.take_warnings();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].starts_with("skipping section"));
}

#[test]
fn discover_keeps_unidentified_sections_without_a_key() {
    let root = MarkupNode::new("document").with_child(
        MarkupNode::new("section")
            .with_child(MarkupNode::new("id").with_attr("root", "g-a"))
            .with_child(MarkupNode::new("section").with_attr("ID", "b")),
    );
    let mut graph = discover(&root);

    assert_eq!(graph.len(), 2);
    let edge = &graph.edges()[0];
    assert_eq!(edge.parent_key.as_ref().map(CorrelationKey::as_str), Some("g-a"));
    assert_eq!(edge.child_key, None);
    assert_eq!(graph.unit(edge.child).label(), "b");
    assert_eq!(graph.take_warnings().len(), 1);
}

#[test]
fn discover_drops_duplicate_correlation_keys() {
    let root = parse_document(
        r#"<document>
        <section><id root="g-dup"/><title>First</title></section>
        <section><id root="g-dup"/><title>Second</title></section>
        </document>"#,
    )
    .expect("fixture parses");
    let mut graph = discover(&root);

    assert!(graph.unit(UnitIndex(0)).correlation_key.is_some());
    assert!(graph.unit(UnitIndex(1)).correlation_key.is_none());
    assert!(
        graph
            .take_warnings()
            .iter()
            .any(|warning| warning.contains("duplicate section identifier g-dup"))
    );
}

#[test]
fn nested_document_creates_seven_sections_and_six_edges() {
    let connection = open_database();
    let (result, _) = ingest_xml(&connection, NESTED_DOCUMENT, &staged());

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.created("unit"), 7);
    assert_eq!(result.created("edge"), 6);
    assert_eq!(result.created("index"), 7);
    assert_eq!(result.created("content"), 7);
    assert_eq!(count(&connection, "sections"), 7);
    assert_eq!(count(&connection, "section_hierarchy"), 6);
}

#[test]
fn reingesting_unchanged_document_creates_nothing() {
    let connection = open_database();
    let (first, _) = ingest_xml(&connection, RICH_DOCUMENT, &staged());
    assert!(first.success, "errors: {:?}", first.errors);
    let counts_after_first = table_counts(&connection).expect("counts load");

    let (second, _) = ingest_xml(&connection, RICH_DOCUMENT, &staged());
    assert!(second.success, "errors: {:?}", second.errors);
    assert!(
        second.created_counts.values().all(|created| *created == 0),
        "created on second run: {:?}",
        second.created_counts
    );
    assert_eq!(second.existing("unit"), 4);
    assert_eq!(table_counts(&connection).expect("counts load"), counts_after_first);
}

#[test]
fn strategies_persist_identical_snapshots() {
    for fixture in [NESTED_DOCUMENT, RICH_DOCUMENT, KEYLESS_CHILD_DOCUMENT] {
        let snapshots = [
            IngestStrategy::PerUnit,
            IngestStrategy::NestedBatch,
            IngestStrategy::Staged,
        ]
        .into_iter()
        .map(|strategy| {
            let connection = open_database();
            let (result, _) = ingest_xml(&connection, fixture, &with_strategy(strategy));
            assert!(result.success, "{strategy:?} errors: {:?}", result.errors);
            snapshot(&connection)
        })
        .collect::<Vec<Vec<String>>>();

        assert!(!snapshots[0].is_empty());
        assert_eq!(snapshots[0], snapshots[1]);
        assert_eq!(snapshots[1], snapshots[2]);
    }
}

#[test]
fn staged_round_trips_do_not_grow_with_section_count() {
    let measure = |children: usize| {
        let connection = open_database();
        let (result, metrics) = ingest_xml(&connection, &wide_document(children), &staged());
        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(result.created("unit"), children + 1);
        (metrics.round_trips("unit"), metrics.round_trips("edge"))
    };

    let small = measure(1);
    let large = measure(60);
    assert_eq!(small, (2, 2));
    assert_eq!(small, large);
}

#[test]
fn per_unit_and_nested_strategies_split_writes_as_documented() {
    let connection = open_database();
    let (_, per_unit) = ingest_xml(
        &connection,
        NESTED_DOCUMENT,
        &with_strategy(IngestStrategy::PerUnit),
    );
    assert_eq!(per_unit.kind("unit").batch_inserts, 7);
    assert_eq!(per_unit.kind("edge").batch_inserts, 6);

    let connection = open_database();
    let (_, nested) = ingest_xml(
        &connection,
        NESTED_DOCUMENT,
        &with_strategy(IngestStrategy::NestedBatch),
    );
    assert_eq!(nested.kind("unit").batch_inserts, 4);
    assert_eq!(nested.kind("edge").batch_inserts, 3);
}

#[test]
fn persisted_edges_reference_persisted_sections_in_sibling_order() {
    let connection = open_database();
    let (result, _) = ingest_xml(
        &connection,
        NESTED_DOCUMENT,
        &with_strategy(IngestStrategy::NestedBatch),
    );
    assert!(result.success, "errors: {:?}", result.errors);

    let dangling: i64 = connection
        .query_row(
            "SELECT COUNT(*) FROM section_hierarchy h
             LEFT JOIN sections p ON p.section_id = h.parent_section_id
             LEFT JOIN sections c ON c.section_id = h.child_section_id
             WHERE p.section_id IS NULL OR c.section_id IS NULL",
            [],
            |row| row.get(0),
        )
        .expect("dangling query runs");
    assert_eq!(dangling, 0);

    let mut statement = connection
        .prepare(
            "SELECT p.section_guid, c.section_guid, h.sequence_number
             FROM section_hierarchy h
             JOIN sections p ON p.section_id = h.parent_section_id
             JOIN sections c ON c.section_id = h.child_section_id
             ORDER BY p.section_guid, h.sequence_number",
        )
        .expect("edge query prepares");
    let edges = statement
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })
        .expect("edge query runs")
        .collect::<rusqlite::Result<Vec<(String, String, i64)>>>()
        .expect("edge rows read");

    let expected = [
        ("g-c1", "g-c1-a", 1_i64),
        ("g-c1", "g-c1-b", 2),
        ("g-c2", "g-c2-a", 1),
        ("g-c2", "g-c2-b", 2),
        ("g-root", "g-c1", 1),
        ("g-root", "g-c2", 2),
    ]
    .map(|(parent, child, sequence)| (parent.to_string(), child.to_string(), sequence));
    assert_eq!(edges, expected);
}

#[test]
fn missing_correlation_key_drops_dependent_edges_without_failing() {
    let connection = open_database();
    let (result, _) = ingest_xml(&connection, KEYLESS_CHILD_DOCUMENT, &staged());

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.created("unit"), 4);
    assert_eq!(result.created("edge"), 0);
    assert_eq!(
        result
            .warnings
            .iter()
            .filter(|warning| warning.starts_with("dropping hierarchy edge"))
            .count(),
        3
    );
    assert!(
        result
            .warnings
            .iter()
            .any(|warning| warning.contains("Untracked child") && warning.contains("no correlation key"))
    );

    // Keyed sections still get their phases; the untracked one does not.
    assert_eq!(count(&connection, "section_index"), 3);
    let depth: i64 = connection
        .query_row(
            "SELECT depth FROM section_index WHERE section_id = ?1",
            [section_id(&connection, "g-gc-1")],
            |row| row.get(0),
        )
        .expect("index row exists");
    assert_eq!(depth, 0);
}

#[test]
fn phases_populate_auxiliary_tables() {
    let connection = open_database();
    let (result, _) = ingest_xml(&connection, RICH_DOCUMENT, &staged());
    assert!(result.success, "errors: {:?}", result.errors);

    let sec_1 = section_id(&connection, "g-1");
    let sec_2 = section_id(&connection, "g-2");

    let (target, target_section_id): (String, Option<i64>) = connection
        .query_row(
            "SELECT target, target_section_id FROM section_references
             WHERE section_id = ?1 AND sequence_number = 1",
            [sec_1],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("first reference exists");
    assert_eq!(target, "#sec-2");
    assert_eq!(target_section_id, Some(sec_2));
    assert!(
        result
            .warnings
            .iter()
            .any(|warning| warning.contains("reference target #missing not found"))
    );

    let media_id: i64 = connection
        .query_row(
            "SELECT media_id FROM section_media WHERE section_id = ?1 AND media_ref = 'fig1'",
            [sec_1],
            |row| row.get(0),
        )
        .expect("media row exists");
    let (kind, linked_media): (String, Option<i64>) = connection
        .query_row(
            "SELECT content_kind, media_id FROM section_content
             WHERE section_id = ?1 AND sequence_number = 3",
            [sec_1],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("media content row exists");
    assert_eq!(kind, "media");
    assert_eq!(linked_media, Some(media_id));

    let (caption, row_count, column_count): (Option<String>, i64, i64) = connection
        .query_row(
            "SELECT caption, row_count, column_count FROM section_tables WHERE section_id = ?1",
            [sec_1],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .expect("table row exists");
    assert_eq!(caption.as_deref(), Some("Doses"));
    assert_eq!((row_count, column_count), (2, 2));

    let warning_text: String = connection
        .query_row(
            "SELECT warning_text FROM boxed_warnings WHERE section_id = ?1",
            [section_id(&connection, "g-bw")],
            |row| row.get(0),
        )
        .expect("boxed warning exists");
    assert_eq!(warning_text, "Serious risk of harm.");
    assert_eq!(count(&connection, "boxed_warnings"), 1);

    let highlight: String = connection
        .query_row(
            "SELECT highlight_text FROM section_highlights WHERE section_id = ?1",
            [sec_1],
            |row| row.get(0),
        )
        .expect("highlight exists");
    assert_eq!(highlight, "Indicated for condition X.");

    let (depth, outline, path, root_id): (i64, Option<String>, String, i64) = connection
        .query_row(
            "SELECT depth, outline_number, ancestor_path, root_section_id
             FROM section_index WHERE section_id = ?1",
            [section_id(&connection, "g-1-1")],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .expect("index row exists");
    assert_eq!(depth, 1);
    assert_eq!(outline.as_deref(), Some("1.1"));
    assert_eq!(path, "1 INDICATIONS > 1.1 Adults");
    assert_eq!(root_id, sec_1);

    assert_eq!(result.created("table"), 1);
    assert_eq!(result.created("highlight"), 1);
    assert_eq!(result.created("content"), 6);
}

#[test]
fn handler_failure_is_contained_to_its_section() {
    let connection = open_database();
    let (root, document_id) = prepare_document(&connection, NESTED_DOCUMENT);

    let mut phases: Vec<PhaseSpec<SqliteStore<'_>>> = default_phases();
    for phase in &mut phases {
        if phase.name == ContentRecord::KIND {
            phase.handler = failing_content;
        }
    }

    let mut store = SqliteStore::new(&connection);
    let result = ingest_with_phases(
        &mut store,
        &root,
        document_id,
        &staged(),
        phases,
        &mut |_: &str| {},
    )
    .expect("ingest runs");

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0], "content g-c1: injected content failure");
    assert_eq!(result.created("content"), 6);

    let failed_rows: i64 = connection
        .query_row(
            "SELECT COUNT(*) FROM section_content WHERE section_id = ?1",
            [section_id(&connection, "g-c1")],
            |row| row.get(0),
        )
        .expect("content count runs");
    assert_eq!(failed_rows, 0);
    assert_eq!(count(&connection, "section_content"), 6);
    assert_eq!(count(&connection, "section_index"), 7);
}

#[test]
fn section_write_failure_is_fatal_and_skips_everything_after_it() {
    let connection = open_database();
    let result = ingest_with_failing_kind(&connection, RICH_DOCUMENT, SectionRecord::KIND);

    assert!(!result.success);
    assert!(result.errors[0].starts_with("section write failed"));
    assert!(!result.created_counts.contains_key("edge"));
    assert!(!result.created_counts.contains_key("reference"));
    assert_eq!(count(&connection, "sections"), 0);
}

#[test]
fn edge_write_failure_skips_only_edge_dependent_phases() {
    let connection = open_database();
    let result = ingest_with_failing_kind(&connection, RICH_DOCUMENT, HierarchyRecord::KIND);

    assert!(!result.success);
    assert!(
        result
            .errors
            .iter()
            .any(|error| error.starts_with("hierarchy edge write failed"))
    );
    assert!(
        result
            .errors
            .iter()
            .any(|error| error == "index: skipped because hierarchy edges were not written")
    );
    assert_eq!(count(&connection, "section_index"), 0);
    assert_eq!(count(&connection, "section_content"), 6);
    assert_eq!(count(&connection, "boxed_warnings"), 1);
}

#[test]
fn phase_persistence_failure_fails_the_run_but_not_sibling_phases() {
    let connection = open_database();
    let result = ingest_with_failing_kind(&connection, RICH_DOCUMENT, MediaRecord::KIND);

    assert!(!result.success);
    assert_eq!(result.errors.len(), 1, "errors: {:?}", result.errors);
    assert!(result.errors[0].starts_with("media g-1: "));
    assert!(result.errors[0].ends_with("injected media insert failure"));

    assert_eq!(count(&connection, "section_media"), 0);
    assert_eq!(count(&connection, "section_content"), 6);
    assert_eq!(count(&connection, "section_index"), 4);
    assert_eq!(count(&connection, "boxed_warnings"), 1);
}

#[test]
fn sections_sharing_code_and_title_are_never_merged() {
    for strategy in [
        IngestStrategy::PerUnit,
        IngestStrategy::NestedBatch,
        IngestStrategy::Staged,
    ] {
        let connection = open_database();
        let (result, _) =
            ingest_xml(&connection, SHARED_TITLE_DOCUMENT, &with_strategy(strategy));

        assert!(result.success, "{strategy:?} errors: {:?}", result.errors);
        assert_eq!(count(&connection, "sections"), 4, "{strategy:?}");
        assert_eq!(result.created("unit"), 4, "{strategy:?}");
        assert_eq!(result.existing("unit"), 0, "{strategy:?}");
        assert!(
            result.warnings.iter().any(|warning| warning
                == "2 sections share code '42229-5' and title 'Overview' without an identifier; each is stored as a new row"),
            "{strategy:?} warnings: {:?}",
            result.warnings
        );
    }
}

#[test]
fn reference_to_uncorrelated_section_resolves_to_its_row() {
    let connection = open_database();
    let (result, _) = ingest_xml(
        &connection,
        r##"<document><id root="doc-links"/>
        <section ID="a"><id root="g-a"/><title>A</title>
          <text><paragraph>See <linkHtml href="#b">B</linkHtml>.</paragraph></text></section>
        <section ID="b"><title>B</title></section>
        </document>"##,
        &staged(),
    );

    assert!(result.success, "errors: {:?}", result.errors);
    assert!(
        !result
            .warnings
            .iter()
            .any(|warning| warning.contains("reference target"))
    );
    let (target, expected): (Option<i64>, i64) = connection
        .query_row(
            "SELECT r.target_section_id,
                    (SELECT section_id FROM sections WHERE link_id = 'b')
             FROM section_references r",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("reference row exists");
    assert_eq!(target, Some(expected));
}

#[test]
fn cancellation_before_persisting_writes_nothing() {
    let connection = open_database();
    let options = staged();
    options.cancel.cancel();

    let (result, metrics) = ingest_xml(&connection, NESTED_DOCUMENT, &options);
    assert!(!result.success);
    assert_eq!(
        result.errors,
        vec!["ingest cancelled before sections were written".to_string()]
    );
    assert_eq!(metrics.round_trips("unit"), 0);
    assert_eq!(count(&connection, "sections"), 0);
}

#[test]
fn cancellation_between_stages_keeps_sections_and_stops_phases() {
    let connection = open_database();
    let (root, document_id) = prepare_document(&connection, NESTED_DOCUMENT);
    let options = staged();
    let token = options.cancel.clone();
    let mut progress = |milestone: &str| {
        if milestone.starts_with("persisted") {
            token.cancel();
        }
    };

    let mut store = SqliteStore::new(&connection);
    let result = ingest(&mut store, &root, document_id, &options, &mut progress)
        .expect("ingest runs");

    assert!(!result.success);
    assert_eq!(result.created("unit"), 7);
    assert!(
        result
            .errors
            .iter()
            .any(|error| error == "ingest cancelled during reference phase")
    );
    assert_eq!(count(&connection, "section_content"), 0);
}

#[test]
fn skipped_phases_are_not_run_and_unknown_names_warn() {
    let connection = open_database();
    let options = IngestOptions {
        skip_phases: vec!["highlight".to_string(), "bogus".to_string()],
        ..IngestOptions::default()
    };
    let (result, _) = ingest_xml(&connection, RICH_DOCUMENT, &options);

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(count(&connection, "section_highlights"), 0);
    assert_eq!(count(&connection, "section_tables"), 1);
    assert!(
        result
            .warnings
            .iter()
            .any(|warning| warning == "unknown phase bogus requested in skip list")
    );
}

fn ingest_args(workspace: &Path) -> IngestArgs {
    IngestArgs {
        cache_root: workspace.join("cache"),
        input: workspace.join("label.xml"),
        db_path: None,
        run_manifest_path: Some(workspace.join("manifest.json")),
        strategy: IngestStrategy::NestedBatch,
        skip_phases: Vec::new(),
        deadline_secs: None,
    }
}

#[test]
fn run_writes_manifest_and_reruns_idempotently() {
    let workspace = tempfile::tempdir().expect("tempdir created");
    let args = ingest_args(workspace.path());
    fs::write(&args.input, RICH_DOCUMENT).expect("fixture written");

    run(args.clone()).expect("first run succeeds");
    run(args.clone()).expect("second run succeeds");

    let raw = fs::read(workspace.path().join("manifest.json")).expect("manifest written");
    let manifest: serde_json::Value = serde_json::from_slice(&raw).expect("manifest parses");
    assert_eq!(manifest["status"], "completed");
    assert_eq!(manifest["strategy"], "nested-batch");
    assert_eq!(manifest["document"]["document_guid"], "doc-rich");
    assert_eq!(manifest["result"]["created_counts"]["unit"], 0);
    assert_eq!(manifest["result"]["existing_counts"]["unit"], 4);
    assert_eq!(manifest["table_counts"]["sections"], 4);
    assert_eq!(manifest["table_counts"]["documents"], 1);
    assert!(workspace.path().join("cache").join("labelgraph.sqlite").exists());
}

#[test]
fn run_rejects_documents_without_an_identifier() {
    let workspace = tempfile::tempdir().expect("tempdir created");
    let args = ingest_args(workspace.path());
    fs::write(&args.input, "<document><section><id root=\"g\"/></section></document>")
        .expect("fixture written");

    let err = run(args).expect_err("run fails");
    assert!(err.to_string().contains("no document identifier"));
}

#[test]
fn render_ingest_command_lists_non_default_flags() {
    let args = IngestArgs {
        cache_root: PathBuf::from(".cache/labelgraph"),
        input: PathBuf::from("label.xml"),
        db_path: None,
        run_manifest_path: None,
        strategy: IngestStrategy::PerUnit,
        skip_phases: vec!["index".to_string()],
        deadline_secs: Some(30),
    };

    let command = render_ingest_command(&args);
    assert!(command.starts_with("labelgraph ingest --cache-root .cache/labelgraph --input label.xml"));
    assert!(command.contains("--strategy per-unit"));
    assert!(command.contains("--skip-phase index"));
    assert!(command.contains("--deadline-secs 30"));
    assert!(!command.contains("--db-path"));
}
