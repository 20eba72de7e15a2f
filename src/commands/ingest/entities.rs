use rusqlite::Row;
use rusqlite::types::Value;

/// Key used to recognise a record that already exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum NaturalKey {
    Link(String),
    Correlation(String),
    Composite(String),
    Unkeyable,
}

impl NaturalKey {
    pub(crate) fn is_keyed(&self) -> bool {
        !matches!(self, NaturalKey::Unkeyable)
    }

    fn composite(parts: &[&str]) -> Self {
        NaturalKey::Composite(parts.join("\u{1f}"))
    }
}

/// A relational record kind. Column values are bound in `COLUMNS` order and
/// rows are read back as `ID_COLUMN` followed by `COLUMNS`.
pub(crate) trait Entity: Clone + std::fmt::Debug {
    const KIND: &'static str;
    const TABLE: &'static str;
    const ID_COLUMN: &'static str;
    const SCOPE_COLUMN: &'static str;
    const COLUMNS: &'static [&'static str];

    fn server_id(&self) -> Option<i64>;
    fn set_server_id(&mut self, id: i64);
    fn scope_id(&self) -> i64;
    fn natural_key(&self) -> NaturalKey;
    fn values(&self) -> Vec<Value>;
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

fn text(value: &Option<String>) -> Value {
    match value {
        Some(value) => Value::Text(value.clone()),
        None => Value::Null,
    }
}

fn integer(value: Option<i64>) -> Value {
    match value {
        Some(value) => Value::Integer(value),
        None => Value::Null,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SectionRecord {
    pub(crate) section_id: Option<i64>,
    pub(crate) document_id: i64,
    pub(crate) section_guid: Option<String>,
    pub(crate) link_id: Option<String>,
    pub(crate) section_code: Option<String>,
    pub(crate) code_system: Option<String>,
    pub(crate) display_name: Option<String>,
    pub(crate) title: Option<String>,
    pub(crate) effective_date: Option<String>,
    pub(crate) nesting_level: i64,
    /// Set when another section of the same document has the same code and
    /// title, so the composite key cannot tell them apart. Not stored.
    pub(crate) shares_composite_key: bool,
}

impl Entity for SectionRecord {
    const KIND: &'static str = "unit";
    const TABLE: &'static str = "sections";
    const ID_COLUMN: &'static str = "section_id";
    const SCOPE_COLUMN: &'static str = "document_id";
    const COLUMNS: &'static [&'static str] = &[
        "document_id",
        "section_guid",
        "link_id",
        "section_code",
        "code_system",
        "display_name",
        "title",
        "effective_date",
        "nesting_level",
    ];

    fn server_id(&self) -> Option<i64> {
        self.section_id
    }

    fn set_server_id(&mut self, id: i64) {
        self.section_id = Some(id);
    }

    fn scope_id(&self) -> i64 {
        self.document_id
    }

    /// Link id, then section GUID, then code plus title.
    fn natural_key(&self) -> NaturalKey {
        if let Some(link_id) = &self.link_id {
            return NaturalKey::Link(link_id.clone());
        }
        if let Some(guid) = &self.section_guid {
            return NaturalKey::Correlation(guid.clone());
        }
        if self.shares_composite_key {
            return NaturalKey::Unkeyable;
        }
        match (&self.section_code, &self.title) {
            (None, None) => NaturalKey::Unkeyable,
            (code, title) => NaturalKey::composite(&[
                code.as_deref().unwrap_or_default(),
                title.as_deref().unwrap_or_default(),
            ]),
        }
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.document_id),
            text(&self.section_guid),
            text(&self.link_id),
            text(&self.section_code),
            text(&self.code_system),
            text(&self.display_name),
            text(&self.title),
            text(&self.effective_date),
            Value::Integer(self.nesting_level),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            section_id: row.get(0)?,
            document_id: row.get(1)?,
            section_guid: row.get(2)?,
            link_id: row.get(3)?,
            section_code: row.get(4)?,
            code_system: row.get(5)?,
            display_name: row.get(6)?,
            title: row.get(7)?,
            effective_date: row.get(8)?,
            nesting_level: row.get(9)?,
            shares_composite_key: false,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HierarchyRecord {
    pub(crate) hierarchy_id: Option<i64>,
    pub(crate) document_id: i64,
    pub(crate) parent_section_id: i64,
    pub(crate) child_section_id: i64,
    pub(crate) sequence_number: i64,
}

impl Entity for HierarchyRecord {
    const KIND: &'static str = "edge";
    const TABLE: &'static str = "section_hierarchy";
    const ID_COLUMN: &'static str = "hierarchy_id";
    const SCOPE_COLUMN: &'static str = "document_id";
    const COLUMNS: &'static [&'static str] = &[
        "document_id",
        "parent_section_id",
        "child_section_id",
        "sequence_number",
    ];

    fn server_id(&self) -> Option<i64> {
        self.hierarchy_id
    }

    fn set_server_id(&mut self, id: i64) {
        self.hierarchy_id = Some(id);
    }

    fn scope_id(&self) -> i64 {
        self.document_id
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::composite(&[
            &self.parent_section_id.to_string(),
            &self.child_section_id.to_string(),
        ])
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.document_id),
            Value::Integer(self.parent_section_id),
            Value::Integer(self.child_section_id),
            Value::Integer(self.sequence_number),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            hierarchy_id: row.get(0)?,
            document_id: row.get(1)?,
            parent_section_id: row.get(2)?,
            child_section_id: row.get(3)?,
            sequence_number: row.get(4)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReferenceRecord {
    pub(crate) reference_id: Option<i64>,
    pub(crate) section_id: i64,
    pub(crate) sequence_number: i64,
    pub(crate) target: String,
    pub(crate) label: Option<String>,
    pub(crate) target_section_id: Option<i64>,
}

impl Entity for ReferenceRecord {
    const KIND: &'static str = "reference";
    const TABLE: &'static str = "section_references";
    const ID_COLUMN: &'static str = "reference_id";
    const SCOPE_COLUMN: &'static str = "section_id";
    const COLUMNS: &'static [&'static str] = &[
        "section_id",
        "sequence_number",
        "target",
        "label",
        "target_section_id",
    ];

    fn server_id(&self) -> Option<i64> {
        self.reference_id
    }

    fn set_server_id(&mut self, id: i64) {
        self.reference_id = Some(id);
    }

    fn scope_id(&self) -> i64 {
        self.section_id
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::composite(&[
            &self.section_id.to_string(),
            &self.sequence_number.to_string(),
        ])
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.section_id),
            Value::Integer(self.sequence_number),
            Value::Text(self.target.clone()),
            text(&self.label),
            integer(self.target_section_id),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            reference_id: row.get(0)?,
            section_id: row.get(1)?,
            sequence_number: row.get(2)?,
            target: row.get(3)?,
            label: row.get(4)?,
            target_section_id: row.get(5)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MediaRecord {
    pub(crate) media_id: Option<i64>,
    pub(crate) section_id: i64,
    pub(crate) media_ref: String,
    pub(crate) file_name: Option<String>,
    pub(crate) media_type: Option<String>,
    pub(crate) alt_text: Option<String>,
}

impl Entity for MediaRecord {
    const KIND: &'static str = "media";
    const TABLE: &'static str = "section_media";
    const ID_COLUMN: &'static str = "media_id";
    const SCOPE_COLUMN: &'static str = "section_id";
    const COLUMNS: &'static [&'static str] = &[
        "section_id",
        "media_ref",
        "file_name",
        "media_type",
        "alt_text",
    ];

    fn server_id(&self) -> Option<i64> {
        self.media_id
    }

    fn set_server_id(&mut self, id: i64) {
        self.media_id = Some(id);
    }

    fn scope_id(&self) -> i64 {
        self.section_id
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::composite(&[&self.section_id.to_string(), &self.media_ref])
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.section_id),
            Value::Text(self.media_ref.clone()),
            text(&self.file_name),
            text(&self.media_type),
            text(&self.alt_text),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            media_id: row.get(0)?,
            section_id: row.get(1)?,
            media_ref: row.get(2)?,
            file_name: row.get(3)?,
            media_type: row.get(4)?,
            alt_text: row.get(5)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ContentRecord {
    pub(crate) content_id: Option<i64>,
    pub(crate) section_id: i64,
    pub(crate) sequence_number: i64,
    pub(crate) content_kind: String,
    pub(crate) content_text: String,
    pub(crate) media_id: Option<i64>,
}

impl Entity for ContentRecord {
    const KIND: &'static str = "content";
    const TABLE: &'static str = "section_content";
    const ID_COLUMN: &'static str = "content_id";
    const SCOPE_COLUMN: &'static str = "section_id";
    const COLUMNS: &'static [&'static str] = &[
        "section_id",
        "sequence_number",
        "content_kind",
        "content_text",
        "media_id",
    ];

    fn server_id(&self) -> Option<i64> {
        self.content_id
    }

    fn set_server_id(&mut self, id: i64) {
        self.content_id = Some(id);
    }

    fn scope_id(&self) -> i64 {
        self.section_id
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::composite(&[
            &self.section_id.to_string(),
            &self.sequence_number.to_string(),
        ])
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.section_id),
            Value::Integer(self.sequence_number),
            Value::Text(self.content_kind.clone()),
            Value::Text(self.content_text.clone()),
            integer(self.media_id),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            content_id: row.get(0)?,
            section_id: row.get(1)?,
            sequence_number: row.get(2)?,
            content_kind: row.get(3)?,
            content_text: row.get(4)?,
            media_id: row.get(5)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexRecord {
    pub(crate) index_id: Option<i64>,
    pub(crate) section_id: i64,
    pub(crate) document_id: i64,
    pub(crate) root_section_id: i64,
    pub(crate) depth: i64,
    pub(crate) outline_number: Option<String>,
    pub(crate) ancestor_path: String,
}

impl Entity for IndexRecord {
    const KIND: &'static str = "index";
    const TABLE: &'static str = "section_index";
    const ID_COLUMN: &'static str = "index_id";
    const SCOPE_COLUMN: &'static str = "section_id";
    const COLUMNS: &'static [&'static str] = &[
        "section_id",
        "document_id",
        "root_section_id",
        "depth",
        "outline_number",
        "ancestor_path",
    ];

    fn server_id(&self) -> Option<i64> {
        self.index_id
    }

    fn set_server_id(&mut self, id: i64) {
        self.index_id = Some(id);
    }

    fn scope_id(&self) -> i64 {
        self.section_id
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::composite(&[&self.section_id.to_string()])
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.section_id),
            Value::Integer(self.document_id),
            Value::Integer(self.root_section_id),
            Value::Integer(self.depth),
            text(&self.outline_number),
            Value::Text(self.ancestor_path.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            index_id: row.get(0)?,
            section_id: row.get(1)?,
            document_id: row.get(2)?,
            root_section_id: row.get(3)?,
            depth: row.get(4)?,
            outline_number: row.get(5)?,
            ancestor_path: row.get(6)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TableRecord {
    pub(crate) table_id: Option<i64>,
    pub(crate) section_id: i64,
    pub(crate) sequence_number: i64,
    pub(crate) caption: Option<String>,
    pub(crate) row_count: i64,
    pub(crate) column_count: i64,
    pub(crate) header_text: Option<String>,
}

impl Entity for TableRecord {
    const KIND: &'static str = "table";
    const TABLE: &'static str = "section_tables";
    const ID_COLUMN: &'static str = "table_id";
    const SCOPE_COLUMN: &'static str = "section_id";
    const COLUMNS: &'static [&'static str] = &[
        "section_id",
        "sequence_number",
        "caption",
        "row_count",
        "column_count",
        "header_text",
    ];

    fn server_id(&self) -> Option<i64> {
        self.table_id
    }

    fn set_server_id(&mut self, id: i64) {
        self.table_id = Some(id);
    }

    fn scope_id(&self) -> i64 {
        self.section_id
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::composite(&[
            &self.section_id.to_string(),
            &self.sequence_number.to_string(),
        ])
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.section_id),
            Value::Integer(self.sequence_number),
            text(&self.caption),
            Value::Integer(self.row_count),
            Value::Integer(self.column_count),
            text(&self.header_text),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            table_id: row.get(0)?,
            section_id: row.get(1)?,
            sequence_number: row.get(2)?,
            caption: row.get(3)?,
            row_count: row.get(4)?,
            column_count: row.get(5)?,
            header_text: row.get(6)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BoxedWarningRecord {
    pub(crate) boxed_warning_id: Option<i64>,
    pub(crate) section_id: i64,
    pub(crate) warning_text: String,
}

impl Entity for BoxedWarningRecord {
    const KIND: &'static str = "boxed_warning";
    const TABLE: &'static str = "boxed_warnings";
    const ID_COLUMN: &'static str = "boxed_warning_id";
    const SCOPE_COLUMN: &'static str = "section_id";
    const COLUMNS: &'static [&'static str] = &["section_id", "warning_text"];

    fn server_id(&self) -> Option<i64> {
        self.boxed_warning_id
    }

    fn set_server_id(&mut self, id: i64) {
        self.boxed_warning_id = Some(id);
    }

    fn scope_id(&self) -> i64 {
        self.section_id
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::composite(&[&self.section_id.to_string()])
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.section_id),
            Value::Text(self.warning_text.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            boxed_warning_id: row.get(0)?,
            section_id: row.get(1)?,
            warning_text: row.get(2)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HighlightRecord {
    pub(crate) highlight_id: Option<i64>,
    pub(crate) section_id: i64,
    pub(crate) sequence_number: i64,
    pub(crate) highlight_text: String,
}

impl Entity for HighlightRecord {
    const KIND: &'static str = "highlight";
    const TABLE: &'static str = "section_highlights";
    const ID_COLUMN: &'static str = "highlight_id";
    const SCOPE_COLUMN: &'static str = "section_id";
    const COLUMNS: &'static [&'static str] =
        &["section_id", "sequence_number", "highlight_text"];

    fn server_id(&self) -> Option<i64> {
        self.highlight_id
    }

    fn set_server_id(&mut self, id: i64) {
        self.highlight_id = Some(id);
    }

    fn scope_id(&self) -> i64 {
        self.section_id
    }

    fn natural_key(&self) -> NaturalKey {
        NaturalKey::composite(&[
            &self.section_id.to_string(),
            &self.sequence_number.to_string(),
        ])
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.section_id),
            Value::Integer(self.sequence_number),
            Value::Text(self.highlight_text.clone()),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            highlight_id: row.get(0)?,
            section_id: row.get(1)?,
            sequence_number: row.get(2)?,
            highlight_text: row.get(3)?,
        })
    }
}
