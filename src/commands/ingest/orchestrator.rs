use super::*;

/// Runs every phase over the resolved units, one phase at a time. Returns
/// false when cancellation stopped the run.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_phases<S: Store>(
    store: &mut S,
    graph: &CorrelationGraph<'_>,
    phases: &[PhaseSpec<S>],
    env: &PhaseEnv,
    edges_written: bool,
    cancel: &CancellationToken,
    result: &mut AggregateResult,
    progress: &mut dyn FnMut(&str),
) -> bool {
    let context = AmbientContext::default();

    for phase in phases {
        if phase.requires_edges && !edges_written {
            result.error(format!(
                "{}: skipped because hierarchy edges were not written",
                phase.name
            ));
            continue;
        }

        let completed = context
            .current_phase
            .scoped(phase.name, || run_phase(store, graph, phase, env, &context, cancel, result));
        if !completed {
            result.fatal(format!("ingest cancelled during {} phase", phase.name));
            return false;
        }

        info!(
            phase = phase.name,
            created = result.created(phase.name),
            existing = result.existing(phase.name),
            "phase complete"
        );
        progress(&format!("phase {} complete", phase.name));
    }

    true
}

fn run_phase<S: Store>(
    store: &mut S,
    graph: &CorrelationGraph<'_>,
    phase: &PhaseSpec<S>,
    env: &PhaseEnv,
    context: &AmbientContext,
    cancel: &CancellationToken,
    result: &mut AggregateResult,
) -> bool {
    for (_, unit, section_id) in graph.resolved_units() {
        if cancel.is_cancelled() {
            return false;
        }
        if phase.predicate.is_some_and(|predicate| !predicate(unit)) {
            continue;
        }

        let label = unit.label();
        let current = CurrentUnit {
            section_id,
            label: label.clone(),
        };
        let input = PhaseInput {
            unit,
            section_id,
            graph,
            env,
        };

        let outcome = context.current_unit.scoped(current, || {
            store.savepoint("phase_unit", |store| {
                (phase.handler)(store, &input, context)
            })
        });

        match outcome {
            Ok(output) => {
                result.add_counts(phase.name, output.created, output.existing);
                for warning in output.warnings {
                    result.warn(warning);
                }
            }
            Err(err) if is_persistence_failure(&err) => {
                result.fatal(format!("{} {label}: {err:#}", phase.name));
            }
            Err(err) => result.error(format!("{} {label}: {err:#}", phase.name)),
        }
    }

    true
}
