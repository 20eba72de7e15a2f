use super::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Written<E> {
    pub(crate) record: E,
    pub(crate) is_new: bool,
    pub(crate) candidate_index: usize,
}

enum Slot<E> {
    Existing(E),
    Inserted(usize),
    SameBatch(usize),
}

/// Writes only the candidates whose natural key is not already stored under
/// `scope_id`: one lookup, then at most one batched insert. The result is in
/// candidate order and every entry carries its position in the input.
pub(crate) fn write_deduplicated<S, E>(
    store: &mut S,
    scope_id: i64,
    candidates: Vec<E>,
) -> Result<Vec<Written<E>>>
where
    S: Store,
    E: Entity,
{
    if candidates.is_empty() {
        return Ok(Vec::new());
    }
    if let Some(stray) = candidates.iter().find(|candidate| candidate.scope_id() != scope_id) {
        bail!(
            "{} candidate scoped to {} cannot be written under {}",
            E::TABLE,
            stray.scope_id(),
            scope_id
        );
    }

    let mut existing_by_key = HashMap::<NaturalKey, E>::new();
    let stored = store
        .query::<E>(scope_id)
        .map_err(|source| PersistenceError::new("lookup", E::TABLE, source))?;
    for record in stored {
        let key = record.natural_key();
        if key.is_keyed() {
            existing_by_key.entry(key).or_insert(record);
        }
    }

    let mut slots = Vec::with_capacity(candidates.len());
    let mut pending = Vec::<E>::new();
    let mut pending_by_key = HashMap::<NaturalKey, usize>::new();

    for candidate in candidates {
        let key = candidate.natural_key();
        if key.is_keyed() {
            if let Some(existing) = existing_by_key.get(&key) {
                slots.push(Slot::Existing(existing.clone()));
                continue;
            }
            if let Some(position) = pending_by_key.get(&key) {
                slots.push(Slot::SameBatch(*position));
                continue;
            }
            pending_by_key.insert(key, pending.len());
        }
        slots.push(Slot::Inserted(pending.len()));
        pending.push(candidate);
    }

    let expected = pending.len();
    let inserted = if pending.is_empty() {
        Vec::new()
    } else {
        store
            .batch_insert(pending)
            .map_err(|source| PersistenceError::new("batched insert", E::TABLE, source))?
    };
    if inserted.len() != expected {
        bail!(
            "batched insert into {} returned {} records for {} candidates",
            E::TABLE,
            inserted.len(),
            expected
        );
    }

    let written = slots
        .into_iter()
        .enumerate()
        .map(|(candidate_index, slot)| match slot {
            Slot::Existing(record) => Written {
                record,
                is_new: false,
                candidate_index,
            },
            Slot::Inserted(position) => Written {
                record: inserted[position].clone(),
                is_new: true,
                candidate_index,
            },
            Slot::SameBatch(position) => Written {
                record: inserted[position].clone(),
                is_new: false,
                candidate_index,
            },
        })
        .collect();

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let connection = Connection::open_in_memory().expect("in-memory db opens");
        ensure_schema(&connection).expect("schema applies");
        connection
            .execute(
                "INSERT INTO documents(document_guid, ingested_at) VALUES('doc-1', 'now')",
                [],
            )
            .expect("document inserts");
        connection
    }

    fn section(guid: Option<&str>, title: Option<&str>) -> SectionRecord {
        SectionRecord {
            section_id: None,
            document_id: 1,
            section_guid: guid.map(str::to_string),
            link_id: None,
            section_code: None,
            code_system: None,
            display_name: None,
            title: title.map(str::to_string),
            effective_date: None,
            nesting_level: 0,
            shares_composite_key: false,
        }
    }

    #[test]
    fn second_write_matches_existing_records() {
        let connection = setup();
        let mut store = SqliteStore::new(&connection);

        let first = write_deduplicated(
            &mut store,
            1,
            vec![section(Some("a"), None), section(Some("b"), None)],
        )
        .expect("first write succeeds");
        assert!(first.iter().all(|entry| entry.is_new));

        let second = write_deduplicated(
            &mut store,
            1,
            vec![
                section(Some("b"), None),
                section(Some("c"), None),
                section(Some("a"), None),
            ],
        )
        .expect("second write succeeds");

        assert_eq!(
            second.iter().map(|entry| entry.is_new).collect::<Vec<_>>(),
            vec![false, true, false]
        );
        assert_eq!(second[0].record.section_id, first[1].record.section_id);
        assert_eq!(second[2].record.section_id, first[0].record.section_id);
        assert_eq!(
            second
                .iter()
                .map(|entry| entry.candidate_index)
                .collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(store.metrics().kind("unit").queries, 2);
        assert_eq!(store.metrics().kind("unit").batch_inserts, 2);
    }

    #[test]
    fn duplicate_keys_within_a_batch_collapse_onto_first() {
        let connection = setup();
        let mut store = SqliteStore::new(&connection);

        let written = write_deduplicated(
            &mut store,
            1,
            vec![section(Some("a"), None), section(Some("a"), None)],
        )
        .expect("write succeeds");

        assert!(written[0].is_new);
        assert!(!written[1].is_new);
        assert_eq!(written[0].record.section_id, written[1].record.section_id);
        assert_eq!(store.metrics().kind("unit").rows_inserted, 1);
    }

    #[test]
    fn unkeyable_records_are_always_inserted() {
        let connection = setup();
        let mut store = SqliteStore::new(&connection);

        let written = write_deduplicated(
            &mut store,
            1,
            vec![section(None, None), section(None, None)],
        )
        .expect("write succeeds");
        assert!(written.iter().all(|entry| entry.is_new));
        assert_ne!(written[0].record.section_id, written[1].record.section_id);

        let again = write_deduplicated(&mut store, 1, vec![section(None, None)])
            .expect("rewrite succeeds");
        assert!(again[0].is_new);
    }

    #[test]
    fn all_existing_candidates_skip_the_insert() {
        let connection = setup();
        let mut store = SqliteStore::new(&connection);

        write_deduplicated(&mut store, 1, vec![section(Some("a"), None)])
            .expect("first write succeeds");
        write_deduplicated(&mut store, 1, vec![section(Some("a"), None)])
            .expect("second write succeeds");

        assert_eq!(store.metrics().kind("unit").batch_inserts, 1);
        assert_eq!(store.metrics().kind("unit").queries, 2);
    }

    #[test]
    fn empty_candidate_list_makes_no_round_trips() {
        let connection = setup();
        let mut store = SqliteStore::new(&connection);

        let written = write_deduplicated::<_, SectionRecord>(&mut store, 1, Vec::new())
            .expect("write succeeds");
        assert!(written.is_empty());
        assert_eq!(store.metrics().round_trips("unit"), 0);
    }
}
