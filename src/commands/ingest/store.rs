use rusqlite::params_from_iter;

use super::*;

/// Persistence seam used by the engine. The unit of work itself (transaction
/// begin and commit) belongs to the caller.
pub(crate) trait Store {
    fn query<E: Entity>(&mut self, scope_id: i64) -> Result<Vec<E>>;

    /// Inserts every record and returns them in input order with server ids set.
    fn batch_insert<E: Entity>(&mut self, records: Vec<E>) -> Result<Vec<E>>;

    /// Runs `body` so that its writes are discarded if it fails.
    fn savepoint<R>(
        &mut self,
        name: &str,
        body: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R>
    where
        Self: Sized;
}

/// A failed round trip to the store. Any error whose chain contains one is
/// fatal to the run, wherever it surfaces.
#[derive(Debug)]
pub(crate) struct PersistenceError {
    operation: &'static str,
    target: String,
    source: anyhow::Error,
}

impl PersistenceError {
    pub(crate) fn new(operation: &'static str, target: &str, source: anyhow::Error) -> Self {
        Self {
            operation,
            target: target.to_string(),
            source,
        }
    }
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on {} failed", self.operation, self.target)
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

pub(crate) fn is_persistence_failure(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<PersistenceError>())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub(crate) struct KindOperations {
    pub(crate) queries: usize,
    pub(crate) batch_inserts: usize,
    pub(crate) rows_inserted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub(crate) struct StoreMetrics {
    pub(crate) by_kind: BTreeMap<String, KindOperations>,
}

impl StoreMetrics {
    pub(crate) fn kind(&self, kind: &str) -> KindOperations {
        self.by_kind.get(kind).copied().unwrap_or_default()
    }

    /// Queries plus batch inserts for one entity kind.
    pub(crate) fn round_trips(&self, kind: &str) -> usize {
        let operations = self.kind(kind);
        operations.queries + operations.batch_inserts
    }

    fn entry(&mut self, kind: &str) -> &mut KindOperations {
        self.by_kind.entry(kind.to_string()).or_default()
    }
}

pub(crate) struct SqliteStore<'c> {
    connection: &'c Connection,
    metrics: StoreMetrics,
}

impl<'c> SqliteStore<'c> {
    pub(crate) fn new(connection: &'c Connection) -> Self {
        Self {
            connection,
            metrics: StoreMetrics::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    pub(crate) fn into_metrics(self) -> StoreMetrics {
        self.metrics
    }
}

impl Store for SqliteStore<'_> {
    fn query<E: Entity>(&mut self, scope_id: i64) -> Result<Vec<E>> {
        self.metrics.entry(E::KIND).queries += 1;

        let sql = format!(
            "SELECT {}, {} FROM {} WHERE {} = ?1 ORDER BY {}",
            E::ID_COLUMN,
            E::COLUMNS.join(", "),
            E::TABLE,
            E::SCOPE_COLUMN,
            E::ID_COLUMN
        );
        let mut statement = self
            .connection
            .prepare_cached(&sql)
            .with_context(|| format!("failed to prepare lookup on {}", E::TABLE))?;
        let rows = statement
            .query_map([scope_id], |row| E::from_row(row))
            .with_context(|| format!("failed to query {}", E::TABLE))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.with_context(|| format!("failed to read row from {}", E::TABLE))?);
        }
        Ok(records)
    }

    fn batch_insert<E: Entity>(&mut self, records: Vec<E>) -> Result<Vec<E>> {
        let operations = self.metrics.entry(E::KIND);
        operations.batch_inserts += 1;
        operations.rows_inserted += records.len();

        let placeholders = (1..=E::COLUMNS.len())
            .map(|position| format!("?{position}"))
            .collect::<Vec<String>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {}({}) VALUES({})",
            E::TABLE,
            E::COLUMNS.join(", "),
            placeholders
        );
        let mut statement = self
            .connection
            .prepare_cached(&sql)
            .with_context(|| format!("failed to prepare insert into {}", E::TABLE))?;

        let mut inserted = Vec::with_capacity(records.len());
        for mut record in records {
            let id = statement
                .insert(params_from_iter(record.values()))
                .with_context(|| format!("failed to insert into {}", E::TABLE))?;
            record.set_server_id(id);
            inserted.push(record);
        }

        Ok(inserted)
    }

    fn savepoint<R>(
        &mut self,
        name: &str,
        body: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        self.connection
            .execute_batch(&format!("SAVEPOINT {name}"))
            .with_context(|| format!("failed to open savepoint {name}"))
            .map_err(|source| PersistenceError::new("savepoint open", name, source))?;

        match body(self) {
            Ok(value) => {
                self.connection
                    .execute_batch(&format!("RELEASE {name}"))
                    .with_context(|| format!("failed to release savepoint {name}"))
                    .map_err(|source| PersistenceError::new("savepoint release", name, source))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self
                    .connection
                    .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))
                {
                    warn!(error = %rollback_err, savepoint = name, "savepoint rollback failed");
                }
                Err(err)
            }
        }
    }
}
