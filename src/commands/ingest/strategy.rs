use super::*;

#[derive(Debug, Clone, Default)]
pub(crate) struct IngestOptions {
    pub(crate) strategy: IngestStrategy,
    pub(crate) skip_phases: Vec<String>,
    pub(crate) cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PersistOutcome {
    units_written: bool,
    edges_written: bool,
}

impl PersistOutcome {
    fn written() -> Self {
        Self {
            units_written: true,
            edges_written: true,
        }
    }

    fn aborted() -> Self {
        Self {
            units_written: false,
            edges_written: false,
        }
    }
}

/// Ingests every section under `root` into `document_id` and runs the default
/// phase table. Stage failures are reported through the returned result;
/// `Err` is reserved for setup problems.
pub(crate) fn ingest<S: Store>(
    store: &mut S,
    root: &MarkupNode,
    document_id: i64,
    options: &IngestOptions,
    progress: &mut dyn FnMut(&str),
) -> Result<AggregateResult> {
    ingest_with_phases(store, root, document_id, options, default_phases(), progress)
}

pub(crate) fn ingest_with_phases<S: Store>(
    store: &mut S,
    root: &MarkupNode,
    document_id: i64,
    options: &IngestOptions,
    phases: Vec<PhaseSpec<S>>,
    progress: &mut dyn FnMut(&str),
) -> Result<AggregateResult> {
    let env = PhaseEnv {
        document_id,
        outline_numbers: OutlineNumberParser::new()?,
    };
    let mut result = AggregateResult::default();

    let mut graph = discover(root);
    result.warnings.extend(graph.take_warnings());
    progress(&format!(
        "discovered {} sections and {} hierarchy edges",
        graph.len(),
        graph.edges().len()
    ));

    if options.cancel.is_cancelled() {
        result.fatal("ingest cancelled before sections were written".to_string());
        return Ok(result);
    }

    let outcome = match options.strategy {
        IngestStrategy::PerUnit => {
            persist_per_unit(store, &mut graph, document_id, &options.cancel, &mut result)
        }
        IngestStrategy::NestedBatch => {
            persist_nested(store, &mut graph, document_id, &options.cancel, &mut result)
        }
        IngestStrategy::Staged => {
            persist_staged(store, &mut graph, document_id, &options.cancel, &mut result)
        }
    };
    result.warnings.extend(graph.take_warnings());

    if !outcome.units_written {
        return Ok(result);
    }
    progress(&format!(
        "persisted {} sections ({} remapped) using {} strategy",
        graph.persisted_count(),
        graph.remapped_count(),
        options.strategy.as_str()
    ));

    let phases = select_phases(phases, &options.skip_phases, &mut result);
    run_phases(
        store,
        &graph,
        &phases,
        &env,
        outcome.edges_written,
        &options.cancel,
        &mut result,
        progress,
    );

    info!(
        document_id,
        strategy = options.strategy.as_str(),
        success = result.success,
        errors = result.errors.len(),
        warnings = result.warnings.len(),
        "ingest finished"
    );
    Ok(result)
}

fn select_phases<S>(
    phases: Vec<PhaseSpec<S>>,
    skip_phases: &[String],
    result: &mut AggregateResult,
) -> Vec<PhaseSpec<S>> {
    for name in skip_phases {
        if !phases.iter().any(|phase| phase.name == name) {
            result.warn(format!("unknown phase {name} requested in skip list"));
        }
    }

    phases
        .into_iter()
        .filter(|phase| {
            let skipped = skip_phases.iter().any(|name| name == phase.name);
            if skipped {
                info!(phase = phase.name, "phase skipped by request");
            }
            !skipped
        })
        .collect()
}

fn write_unit_batch<S: Store>(
    store: &mut S,
    graph: &mut CorrelationGraph<'_>,
    document_id: i64,
    indices: &[UnitIndex],
    result: &mut AggregateResult,
) -> bool {
    let candidates = section_candidates(graph, document_id, indices);
    match write_deduplicated(store, document_id, candidates) {
        Ok(written) => {
            result.record_written(&written);
            remap_units(graph, indices, &written, result);
            true
        }
        Err(err) => {
            result.fatal(format!("section write failed: {err:#}"));
            false
        }
    }
}

fn write_edge_batch<S: Store>(
    store: &mut S,
    graph: &mut CorrelationGraph<'_>,
    document_id: i64,
    edge_positions: &[usize],
    result: &mut AggregateResult,
) -> bool {
    let candidates = edge_candidates(graph, document_id, edge_positions, result);
    match write_deduplicated(store, document_id, candidates) {
        Ok(written) => {
            result.record_written(&written);
            record_edges(graph, &written);
            true
        }
        Err(err) => {
            result.fatal(format!("hierarchy edge write failed: {err:#}"));
            false
        }
    }
}

fn cancelled(cancel: &CancellationToken, stage: &str, result: &mut AggregateResult) -> bool {
    if cancel.is_cancelled() {
        result.fatal(format!("ingest cancelled while writing {stage}"));
        return true;
    }
    false
}

/// One writer call for every section, then one for every edge.
fn persist_staged<S: Store>(
    store: &mut S,
    graph: &mut CorrelationGraph<'_>,
    document_id: i64,
    cancel: &CancellationToken,
    result: &mut AggregateResult,
) -> PersistOutcome {
    let indices = graph.indices().collect::<Vec<UnitIndex>>();
    if !write_unit_batch(store, graph, document_id, &indices, result) {
        return PersistOutcome::aborted();
    }
    if cancelled(cancel, "hierarchy edges", result) {
        return PersistOutcome::aborted();
    }

    let positions = (0..graph.edges().len()).collect::<Vec<usize>>();
    PersistOutcome {
        units_written: true,
        edges_written: write_edge_batch(store, graph, document_id, &positions, result),
    }
}

/// One writer call per section, each followed by the edge to its parent.
fn persist_per_unit<S: Store>(
    store: &mut S,
    graph: &mut CorrelationGraph<'_>,
    document_id: i64,
    cancel: &CancellationToken,
    result: &mut AggregateResult,
) -> PersistOutcome {
    let mut outcome = PersistOutcome::written();
    let indices = graph.indices().collect::<Vec<UnitIndex>>();

    for index in indices {
        if cancelled(cancel, "sections", result) {
            return PersistOutcome::aborted();
        }
        if !write_unit_batch(store, graph, document_id, &[index], result) {
            return PersistOutcome::aborted();
        }
        if !outcome.edges_written {
            continue;
        }
        for position in graph.edge_positions_for_children(&[index]) {
            if !write_edge_batch(store, graph, document_id, &[position], result) {
                outcome.edges_written = false;
                break;
            }
        }
    }

    outcome
}

/// One writer call per sibling group, starting from the roots and descending
/// one parent at a time.
fn persist_nested<S: Store>(
    store: &mut S,
    graph: &mut CorrelationGraph<'_>,
    document_id: i64,
    cancel: &CancellationToken,
    result: &mut AggregateResult,
) -> PersistOutcome {
    let mut outcome = PersistOutcome::written();
    let roots = graph.roots();
    persist_sibling_group(store, graph, document_id, roots, cancel, result, &mut outcome);
    outcome
}

fn persist_sibling_group<S: Store>(
    store: &mut S,
    graph: &mut CorrelationGraph<'_>,
    document_id: i64,
    group: Vec<UnitIndex>,
    cancel: &CancellationToken,
    result: &mut AggregateResult,
    outcome: &mut PersistOutcome,
) -> bool {
    if group.is_empty() {
        return true;
    }
    if cancelled(cancel, "sections", result)
        || !write_unit_batch(store, graph, document_id, &group, result)
    {
        *outcome = PersistOutcome::aborted();
        return false;
    }

    if outcome.edges_written {
        let positions = graph.edge_positions_for_children(&group);
        if !write_edge_batch(store, graph, document_id, &positions, result) {
            outcome.edges_written = false;
        }
    }

    for member in group {
        let children = graph.children_of(member);
        if !persist_sibling_group(store, graph, document_id, children, cancel, result, outcome) {
            return false;
        }
    }
    true
}
