use super::*;

pub(crate) fn section_candidates(
    graph: &CorrelationGraph<'_>,
    document_id: i64,
    indices: &[UnitIndex],
) -> Vec<SectionRecord> {
    indices
        .iter()
        .map(|index| {
            let unit = graph.unit(*index);
            SectionRecord {
                section_id: None,
                document_id,
                section_guid: unit
                    .correlation_key
                    .as_ref()
                    .map(|key| key.as_str().to_string()),
                link_id: unit.attributes.link_id.clone(),
                section_code: unit.attributes.code.clone(),
                code_system: unit.attributes.code_system.clone(),
                display_name: unit.attributes.display_name.clone(),
                title: unit.attributes.title.clone(),
                effective_date: unit.attributes.effective_date.clone(),
                nesting_level: i64::from(unit.nesting_level),
                shares_composite_key: unit.shares_composite_key,
            }
        })
        .collect()
}

/// Copies server ids from written section records back onto the graph.
/// `indices` must be the slice the candidates were built from; entries are
/// matched through their candidate index, not their position in `written`.
pub(crate) fn remap_units(
    graph: &mut CorrelationGraph<'_>,
    indices: &[UnitIndex],
    written: &[Written<SectionRecord>],
    result: &mut AggregateResult,
) -> usize {
    let mut remapped = 0;

    for entry in written {
        let Some(index) = indices.get(entry.candidate_index).copied() else {
            result.warn(format!(
                "written section at candidate position {} has no discovered unit",
                entry.candidate_index
            ));
            continue;
        };

        let label = graph.unit(index).label();
        let Some(server_id) = entry.record.server_id() else {
            result.warn(format!(
                "section {label} was written without an identifier; dependents skipped"
            ));
            continue;
        };

        if graph.unit(index).correlation_key.is_none() {
            graph.record_server_id(index, server_id);
            result.warn(format!(
                "section {label} persisted as {server_id} but has no correlation key; its edges and phases are skipped"
            ));
            continue;
        }

        if graph.record_server_id(index, server_id) {
            remapped += 1;
        }
    }

    remapped
}

/// Resolves edges through the remap lookup. Unresolved edges are dropped with
/// a warning.
pub(crate) fn edge_candidates(
    graph: &CorrelationGraph<'_>,
    document_id: i64,
    edge_positions: &[usize],
    result: &mut AggregateResult,
) -> Vec<HierarchyRecord> {
    let mut records = Vec::new();

    for position in edge_positions {
        let edge = &graph.edges()[*position];
        let parent = edge.parent_key.as_ref().and_then(|key| graph.resolve(key));
        let child = edge.child_key.as_ref().and_then(|key| graph.resolve(key));

        match (parent, child) {
            (Some(parent_section_id), Some(child_section_id)) => {
                records.push(HierarchyRecord {
                    hierarchy_id: None,
                    document_id,
                    parent_section_id,
                    child_section_id,
                    sequence_number: i64::from(edge.sequence_number),
                });
            }
            _ => {
                result.warn(format!(
                    "dropping hierarchy edge {} -> {} (sequence {}): endpoint not resolved",
                    graph.unit(edge.parent).label(),
                    graph.unit(edge.child).label(),
                    edge.sequence_number
                ));
            }
        }
    }

    records
}

pub(crate) fn record_edges(
    graph: &mut CorrelationGraph<'_>,
    written: &[Written<HierarchyRecord>],
) {
    for entry in written {
        graph.record_materialized_edge(
            entry.record.parent_section_id,
            entry.record.child_section_id,
        );
    }
}
