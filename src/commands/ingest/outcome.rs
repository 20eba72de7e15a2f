use super::*;

/// Best-effort summary of one ingestion call. Counts of everything that
/// succeeded are kept even when `success` is false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct AggregateResult {
    pub(crate) created_counts: BTreeMap<String, usize>,
    pub(crate) existing_counts: BTreeMap<String, usize>,
    pub(crate) errors: Vec<String>,
    pub(crate) warnings: Vec<String>,
    pub(crate) success: bool,
}

impl Default for AggregateResult {
    fn default() -> Self {
        Self {
            created_counts: BTreeMap::new(),
            existing_counts: BTreeMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            success: true,
        }
    }
}

impl AggregateResult {
    pub(crate) fn created(&self, kind: &str) -> usize {
        self.created_counts.get(kind).copied().unwrap_or(0)
    }

    pub(crate) fn existing(&self, kind: &str) -> usize {
        self.existing_counts.get(kind).copied().unwrap_or(0)
    }

    pub(crate) fn record_written<E>(&mut self, written: &[Written<E>])
    where
        E: Entity,
    {
        let created = written.iter().filter(|entry| entry.is_new).count();
        self.add_counts(E::KIND, created, written.len() - created);
    }

    pub(crate) fn add_counts(&mut self, kind: &str, created: usize, existing: usize) {
        *self.created_counts.entry(kind.to_string()).or_insert(0) += created;
        *self.existing_counts.entry(kind.to_string()).or_insert(0) += existing;
    }

    pub(crate) fn warn(&mut self, warning: String) {
        warn!(warning = %warning, "ingest warning");
        self.warnings.push(warning);
    }

    /// Non-fatal error: recorded, processing continues.
    pub(crate) fn error(&mut self, error: String) {
        warn!(error = %error, "ingest error");
        self.errors.push(error);
    }

    /// Fatal-class error: the aggregate reports failure.
    pub(crate) fn fatal(&mut self, error: String) {
        error!(error = %error, "ingest stage failed");
        self.errors.push(error);
        self.success = false;
    }
}
