use super::*;

/// Builds the correlation graph for every `section` under `root` in one
/// document-order pass. Performs no persistence calls.
pub(crate) fn discover(root: &MarkupNode) -> CorrelationGraph<'_> {
    let mut graph = CorrelationGraph::new();
    let mut sibling_counts = HashMap::<Option<UnitIndex>, u32>::new();
    visit(root, None, 0, &mut graph, &mut sibling_counts);
    flag_shared_composite_keys(&mut graph);

    info!(
        units = graph.len(),
        edges = graph.edges().len(),
        "discovered section hierarchy"
    );
    graph
}

fn visit<'doc>(
    node: &'doc MarkupNode,
    parent: Option<UnitIndex>,
    nesting_level: u32,
    graph: &mut CorrelationGraph<'doc>,
    sibling_counts: &mut HashMap<Option<UnitIndex>, u32>,
) {
    for child in node.children() {
        if child.name() != SECTION_ELEMENT {
            visit(child, parent, nesting_level, graph, sibling_counts);
            continue;
        }

        let attributes = section_attributes(child);
        let guid = section_guid(child);

        if guid.is_none() && !attributes.has_identifying_data() {
            graph.warn(format!(
                "skipping section at nesting level {nesting_level}: no identifier, code, or title; nested sections are detached"
            ));
            visit(child, None, nesting_level + 1, graph, sibling_counts);
            continue;
        }

        if guid.is_none() {
            graph.warn(format!(
                "section {} has no id/@root; it will not be correlated",
                attributes
                    .link_id
                    .as_deref()
                    .or(attributes.title.as_deref())
                    .or(attributes.code.as_deref())
                    .unwrap_or("unidentified")
            ));
        }

        let sequence_number = {
            let count = sibling_counts.entry(parent).or_insert(0);
            *count += 1;
            *count
        };

        let index = graph.push_unit(DiscoveredUnit {
            correlation_key: guid.as_deref().and_then(CorrelationKey::parse),
            nesting_level,
            attributes,
            server_id: None,
            parent,
            source: child,
            shares_composite_key: false,
        });

        if let Some(parent_index) = parent {
            let edge = HierarchyEdge {
                parent: parent_index,
                child: index,
                parent_key: graph.unit(parent_index).correlation_key.clone(),
                child_key: graph.unit(index).correlation_key.clone(),
                sequence_number,
            };
            graph.push_edge(edge);
        }

        visit(child, Some(index), nesting_level + 1, graph, sibling_counts);
    }
}

/// Sections that carry neither a GUID nor a link id are matched on code and
/// title. When several such sections share that pair, none of them can be
/// told apart, so each one is written as a new row.
fn flag_shared_composite_keys(graph: &mut CorrelationGraph<'_>) {
    let mut groups = BTreeMap::<(String, String), Vec<UnitIndex>>::new();
    for (index, unit) in graph.units() {
        if unit.correlation_key.is_some() || unit.attributes.link_id.is_some() {
            continue;
        }
        let attributes = &unit.attributes;
        if attributes.code.is_none() && attributes.title.is_none() {
            continue;
        }
        groups
            .entry((
                attributes.code.clone().unwrap_or_default(),
                attributes.title.clone().unwrap_or_default(),
            ))
            .or_default()
            .push(index);
    }

    for ((code, title), members) in groups {
        if members.len() < 2 {
            continue;
        }
        graph.warn(format!(
            "{} sections share code '{code}' and title '{title}' without an identifier; each is stored as a new row",
            members.len()
        ));
        for index in members {
            graph.mark_shared_composite_key(index);
        }
    }
}
