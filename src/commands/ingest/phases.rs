use super::*;

pub(crate) struct PhaseEnv {
    pub(crate) document_id: i64,
    pub(crate) outline_numbers: OutlineNumberParser,
}

pub(crate) struct PhaseInput<'a, 'doc> {
    pub(crate) unit: &'a DiscoveredUnit<'doc>,
    pub(crate) section_id: i64,
    pub(crate) graph: &'a CorrelationGraph<'doc>,
    pub(crate) env: &'a PhaseEnv,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct PhaseOutput {
    pub(crate) created: usize,
    pub(crate) existing: usize,
    pub(crate) warnings: Vec<String>,
}

impl PhaseOutput {
    fn from_written<E>(written: &[Written<E>]) -> Self {
        let created = written.iter().filter(|entry| entry.is_new).count();
        Self {
            created,
            existing: written.len() - created,
            warnings: Vec::new(),
        }
    }
}

pub(crate) type PhasePredicate = fn(&DiscoveredUnit<'_>) -> bool;
pub(crate) type PhaseHandler<S> =
    fn(&mut S, &PhaseInput<'_, '_>, &AmbientContext) -> Result<PhaseOutput>;

/// One entry of the phase table. `name` doubles as the entity kind counted in
/// the aggregate result.
pub(crate) struct PhaseSpec<S> {
    pub(crate) name: &'static str,
    pub(crate) predicate: Option<PhasePredicate>,
    pub(crate) handler: PhaseHandler<S>,
    pub(crate) requires_edges: bool,
}

pub(crate) fn default_phases<S: Store>() -> Vec<PhaseSpec<S>> {
    vec![
        PhaseSpec {
            name: ReferenceRecord::KIND,
            predicate: None,
            handler: write_references::<S>,
            requires_edges: false,
        },
        PhaseSpec {
            name: MediaRecord::KIND,
            predicate: None,
            handler: write_media::<S>,
            requires_edges: false,
        },
        PhaseSpec {
            name: ContentRecord::KIND,
            predicate: None,
            handler: write_content::<S>,
            requires_edges: false,
        },
        PhaseSpec {
            name: IndexRecord::KIND,
            predicate: None,
            handler: write_index::<S>,
            requires_edges: true,
        },
        PhaseSpec {
            name: TableRecord::KIND,
            predicate: Some(has_own_table),
            handler: write_tables::<S>,
            requires_edges: false,
        },
        PhaseSpec {
            name: BoxedWarningRecord::KIND,
            predicate: Some(is_boxed_warning),
            handler: write_boxed_warning::<S>,
            requires_edges: false,
        },
        PhaseSpec {
            name: HighlightRecord::KIND,
            predicate: Some(has_highlight_excerpt),
            handler: write_highlights::<S>,
            requires_edges: false,
        },
    ]
}

fn has_own_table(unit: &DiscoveredUnit<'_>) -> bool {
    unit.source.contains_within("table", SECTION_ELEMENT)
}

fn is_boxed_warning(unit: &DiscoveredUnit<'_>) -> bool {
    unit.source
        .path_attr("code/@code")
        .is_some_and(|code| code.trim() == BOXED_WARNING_CODE)
}

fn has_highlight_excerpt(unit: &DiscoveredUnit<'_>) -> bool {
    has_highlights(unit.source)
}

fn position_number(position: usize) -> i64 {
    position as i64 + 1
}

fn write_references<S: Store>(
    store: &mut S,
    input: &PhaseInput<'_, '_>,
    context: &AmbientContext,
) -> Result<PhaseOutput> {
    let mut warnings = Vec::new();
    let mut candidates = Vec::new();

    for (position, reference) in cross_references(input.unit.source).into_iter().enumerate() {
        let target_section_id = match reference.internal_target() {
            Some(link_id) => match input.graph.find_by_link_id(link_id) {
                Some(target) => {
                    if target.server_id.is_none() {
                        warnings.push(format!(
                            "{}: reference target {} was not persisted",
                            context.describe(),
                            reference.target
                        ));
                    }
                    target.server_id
                }
                None => {
                    warnings.push(format!(
                        "{}: reference target {} not found in document",
                        context.describe(),
                        reference.target
                    ));
                    None
                }
            },
            None => None,
        };

        candidates.push(ReferenceRecord {
            reference_id: None,
            section_id: input.section_id,
            sequence_number: position_number(position),
            target: reference.target,
            label: Some(reference.label).filter(|label| !label.is_empty()),
            target_section_id,
        });
    }

    let written = write_deduplicated(store, input.section_id, candidates)?;
    let mut output = PhaseOutput::from_written(&written);
    output.warnings = warnings;
    Ok(output)
}

fn write_media<S: Store>(
    store: &mut S,
    input: &PhaseInput<'_, '_>,
    _context: &AmbientContext,
) -> Result<PhaseOutput> {
    let candidates = media_items(input.unit.source)
        .into_iter()
        .map(|item| MediaRecord {
            media_id: None,
            section_id: input.section_id,
            media_ref: item.media_ref,
            file_name: item.file_name,
            media_type: item.media_type,
            alt_text: item.alt_text,
        })
        .collect();

    let written = write_deduplicated(store, input.section_id, candidates)?;
    Ok(PhaseOutput::from_written(&written))
}

/// Media rows written by the media phase for the section currently being
/// processed, keyed by media reference and by file name.
fn media_ids_for_current_unit<S: Store>(
    store: &mut S,
    context: &AmbientContext,
) -> Result<HashMap<String, i64>> {
    let Some(current) = context.current_unit.get() else {
        bail!("media lookup requested outside of a section scope");
    };

    let mut media_ids = HashMap::new();
    let stored = store
        .query::<MediaRecord>(current.section_id)
        .map_err(|source| PersistenceError::new("lookup", MediaRecord::TABLE, source))?;
    for media in stored {
        let Some(media_id) = media.media_id else {
            continue;
        };
        if let Some(file_name) = media.file_name {
            media_ids.entry(file_name).or_insert(media_id);
        }
        media_ids.insert(media.media_ref, media_id);
    }
    Ok(media_ids)
}

fn write_content<S: Store>(
    store: &mut S,
    input: &PhaseInput<'_, '_>,
    context: &AmbientContext,
) -> Result<PhaseOutput> {
    let blocks = content_blocks(input.unit.source);
    if blocks.is_empty() {
        return Ok(PhaseOutput::default());
    }

    let needs_media = blocks.iter().any(|block| !block.media_refs.is_empty());
    let media_ids = if needs_media {
        media_ids_for_current_unit(store, context)?
    } else {
        HashMap::new()
    };

    let mut warnings = Vec::new();
    let mut candidates = Vec::with_capacity(blocks.len());
    for (position, block) in blocks.into_iter().enumerate() {
        let media_id = match block.media_refs.first() {
            Some(media_ref) => {
                let resolved = media_ids.get(media_ref).copied();
                if resolved.is_none() {
                    warnings.push(format!(
                        "{}: rendered media {media_ref} has no observationMedia entry",
                        context.describe()
                    ));
                }
                resolved
            }
            None => None,
        };

        candidates.push(ContentRecord {
            content_id: None,
            section_id: input.section_id,
            sequence_number: position_number(position),
            content_kind: block.kind.as_str().to_string(),
            content_text: block.text,
            media_id,
        });
    }

    let written = write_deduplicated(store, input.section_id, candidates)?;
    let mut output = PhaseOutput::from_written(&written);
    output.warnings = warnings;
    Ok(output)
}

fn path_label(unit: &DiscoveredUnit<'_>) -> String {
    unit.attributes
        .title
        .clone()
        .or_else(|| unit.attributes.display_name.clone())
        .or_else(|| unit.attributes.code.clone())
        .unwrap_or_else(|| "unlabeled".to_string())
}

fn write_index<S: Store>(
    store: &mut S,
    input: &PhaseInput<'_, '_>,
    _context: &AmbientContext,
) -> Result<PhaseOutput> {
    let ancestors = input.graph.materialized_ancestors(input.section_id);
    let root_section_id = ancestors.last().copied().unwrap_or(input.section_id);

    let mut labels = ancestors
        .iter()
        .rev()
        .map(|ancestor_id| {
            input
                .graph
                .unit_by_server_id(*ancestor_id)
                .map(path_label)
                .unwrap_or_else(|| format!("section:{ancestor_id}"))
        })
        .collect::<Vec<String>>();
    labels.push(path_label(input.unit));

    let candidate = IndexRecord {
        index_id: None,
        section_id: input.section_id,
        document_id: input.env.document_id,
        root_section_id,
        depth: ancestors.len() as i64,
        outline_number: input
            .unit
            .attributes
            .title
            .as_deref()
            .and_then(|title| input.env.outline_numbers.outline_number(title)),
        ancestor_path: labels.join(" > "),
    };

    let written = write_deduplicated(store, input.section_id, vec![candidate])?;
    Ok(PhaseOutput::from_written(&written))
}

fn write_tables<S: Store>(
    store: &mut S,
    input: &PhaseInput<'_, '_>,
    _context: &AmbientContext,
) -> Result<PhaseOutput> {
    let candidates = table_summaries(input.unit.source)
        .into_iter()
        .enumerate()
        .map(|(position, table)| TableRecord {
            table_id: None,
            section_id: input.section_id,
            sequence_number: position_number(position),
            caption: table.caption,
            row_count: table.row_count,
            column_count: table.column_count,
            header_text: table.header_text,
        })
        .collect();

    let written = write_deduplicated(store, input.section_id, candidates)?;
    Ok(PhaseOutput::from_written(&written))
}

fn write_boxed_warning<S: Store>(
    store: &mut S,
    input: &PhaseInput<'_, '_>,
    context: &AmbientContext,
) -> Result<PhaseOutput> {
    let warning_text = narrative_text(input.unit.source);
    if warning_text.is_empty() {
        return Ok(PhaseOutput {
            warnings: vec![format!(
                "{}: boxed warning section has no narrative text",
                context.describe()
            )],
            ..PhaseOutput::default()
        });
    }

    let candidate = BoxedWarningRecord {
        boxed_warning_id: None,
        section_id: input.section_id,
        warning_text,
    };
    let written = write_deduplicated(store, input.section_id, vec![candidate])?;
    Ok(PhaseOutput::from_written(&written))
}

fn write_highlights<S: Store>(
    store: &mut S,
    input: &PhaseInput<'_, '_>,
    _context: &AmbientContext,
) -> Result<PhaseOutput> {
    let candidates = highlight_texts(input.unit.source)
        .into_iter()
        .enumerate()
        .map(|(position, highlight_text)| HighlightRecord {
            highlight_id: None,
            section_id: input.section_id,
            sequence_number: position_number(position),
            highlight_text,
        })
        .collect();

    let written = write_deduplicated(store, input.section_id, candidates)?;
    Ok(PhaseOutput::from_written(&written))
}
