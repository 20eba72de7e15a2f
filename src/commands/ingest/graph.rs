use super::*;

/// Document-supplied section identifier. Never empty once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct CorrelationKey(String);

impl CorrelationKey {
    pub(crate) fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct UnitIndex(pub(crate) usize);

#[derive(Debug, Clone)]
pub(crate) struct DiscoveredUnit<'doc> {
    pub(crate) correlation_key: Option<CorrelationKey>,
    pub(crate) nesting_level: u32,
    pub(crate) attributes: SectionAttributes,
    pub(crate) server_id: Option<i64>,
    pub(crate) parent: Option<UnitIndex>,
    pub(crate) source: &'doc MarkupNode,
    pub(crate) shares_composite_key: bool,
}

impl DiscoveredUnit<'_> {
    /// Label used in log lines and error entries.
    pub(crate) fn label(&self) -> String {
        if let Some(key) = &self.correlation_key {
            return key.to_string();
        }
        self.attributes
            .link_id
            .clone()
            .or_else(|| self.attributes.title.clone())
            .or_else(|| self.attributes.code.clone())
            .unwrap_or_else(|| "unidentified section".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HierarchyEdge {
    pub(crate) parent: UnitIndex,
    pub(crate) child: UnitIndex,
    pub(crate) parent_key: Option<CorrelationKey>,
    pub(crate) child_key: Option<CorrelationKey>,
    pub(crate) sequence_number: u32,
}

#[derive(Debug, Default)]
pub(crate) struct CorrelationGraph<'doc> {
    units: Vec<DiscoveredUnit<'doc>>,
    by_key: HashMap<CorrelationKey, UnitIndex>,
    edges: Vec<HierarchyEdge>,
    remap: HashMap<CorrelationKey, i64>,
    by_server_id: HashMap<i64, UnitIndex>,
    materialized_parents: HashMap<i64, i64>,
    warnings: Vec<String>,
}

impl<'doc> CorrelationGraph<'doc> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends a unit in document order. A key already claimed by an earlier
    /// unit is dropped from the later one.
    pub(crate) fn push_unit(&mut self, mut unit: DiscoveredUnit<'doc>) -> UnitIndex {
        let index = UnitIndex(self.units.len());

        if let Some(key) = unit.correlation_key.take() {
            if self.by_key.contains_key(&key) {
                self.warn(format!(
                    "duplicate section identifier {key}; later occurrence treated as unkeyed"
                ));
            } else {
                self.by_key.insert(key.clone(), index);
                unit.correlation_key = Some(key);
            }
        }

        self.units.push(unit);
        index
    }

    pub(crate) fn mark_shared_composite_key(&mut self, index: UnitIndex) {
        self.units[index.0].shares_composite_key = true;
    }

    pub(crate) fn push_edge(&mut self, edge: HierarchyEdge) {
        self.edges.push(edge);
    }

    pub(crate) fn warn(&mut self, warning: String) {
        warn!(warning = %warning, "discovery warning");
        self.warnings.push(warning);
    }

    pub(crate) fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    pub(crate) fn len(&self) -> usize {
        self.units.len()
    }

    pub(crate) fn unit(&self, index: UnitIndex) -> &DiscoveredUnit<'doc> {
        &self.units[index.0]
    }

    pub(crate) fn indices(&self) -> impl Iterator<Item = UnitIndex> {
        (0..self.units.len()).map(UnitIndex)
    }

    pub(crate) fn units(&self) -> impl Iterator<Item = (UnitIndex, &DiscoveredUnit<'doc>)> {
        self.units
            .iter()
            .enumerate()
            .map(|(position, unit)| (UnitIndex(position), unit))
    }

    pub(crate) fn edges(&self) -> &[HierarchyEdge] {
        &self.edges
    }

    pub(crate) fn roots(&self) -> Vec<UnitIndex> {
        self.units()
            .filter(|(_, unit)| unit.parent.is_none())
            .map(|(index, _)| index)
            .collect()
    }

    pub(crate) fn children_of(&self, parent: UnitIndex) -> Vec<UnitIndex> {
        self.units()
            .filter(|(_, unit)| unit.parent == Some(parent))
            .map(|(index, _)| index)
            .collect()
    }

    pub(crate) fn edge_positions_for_children(&self, children: &[UnitIndex]) -> Vec<usize> {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, edge)| children.contains(&edge.child))
            .map(|(position, _)| position)
            .collect()
    }

    /// Records the server id written for a unit. Only keyed units enter the
    /// remap lookup; the first id recorded for a key wins.
    pub(crate) fn record_server_id(&mut self, index: UnitIndex, server_id: i64) -> bool {
        let unit = &mut self.units[index.0];
        unit.server_id = Some(server_id);
        self.by_server_id.entry(server_id).or_insert(index);

        let Some(key) = unit.correlation_key.clone() else {
            return false;
        };
        match self.remap.get(&key) {
            Some(existing) if *existing != server_id => {
                let warning = format!(
                    "section {key} already mapped to {existing}; ignoring remap to {server_id}"
                );
                self.warn(warning);
                false
            }
            Some(_) => true,
            None => {
                self.remap.insert(key, server_id);
                true
            }
        }
    }

    pub(crate) fn resolve(&self, key: &CorrelationKey) -> Option<i64> {
        self.remap.get(key).copied()
    }

    /// Server id of a unit, provided it is reachable through the remap lookup.
    pub(crate) fn resolved_server_id(&self, index: UnitIndex) -> Option<i64> {
        self.unit(index)
            .correlation_key
            .as_ref()
            .and_then(|key| self.resolve(key))
    }

    pub(crate) fn resolved_units(&self) -> impl Iterator<Item = (UnitIndex, &DiscoveredUnit<'doc>, i64)> {
        self.units().filter_map(|(index, unit)| {
            self.resolved_server_id(index)
                .map(|server_id| (index, unit, server_id))
        })
    }

    /// Units that received a server id, keyed or not.
    pub(crate) fn persisted_count(&self) -> usize {
        self.units
            .iter()
            .filter(|unit| unit.server_id.is_some())
            .count()
    }

    pub(crate) fn remapped_count(&self) -> usize {
        self.remap.len()
    }

    /// The section whose `ID` attribute is `link_id`, persisted or not.
    pub(crate) fn find_by_link_id(&self, link_id: &str) -> Option<&DiscoveredUnit<'doc>> {
        self.units
            .iter()
            .find(|unit| unit.attributes.link_id.as_deref() == Some(link_id))
    }

    pub(crate) fn unit_by_server_id(&self, server_id: i64) -> Option<&DiscoveredUnit<'doc>> {
        self.by_server_id
            .get(&server_id)
            .map(|index| self.unit(*index))
    }

    pub(crate) fn record_materialized_edge(&mut self, parent_server_id: i64, child_server_id: i64) {
        self.materialized_parents
            .insert(child_server_id, parent_server_id);
    }

    /// Ancestors of a persisted section, nearest first, following only edges
    /// that were written.
    pub(crate) fn materialized_ancestors(&self, server_id: i64) -> Vec<i64> {
        let mut ancestors = Vec::new();
        let mut current = server_id;
        while let Some(parent) = self.materialized_parents.get(&current).copied() {
            if parent == server_id || ancestors.contains(&parent) {
                break;
            }
            ancestors.push(parent);
            current = parent;
        }
        ancestors
    }
}
