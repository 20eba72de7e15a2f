//! Field extraction from labeling markup nodes. Everything here is a pure
//! function of a node; nothing touches persistence.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::Regex;

use crate::markup::MarkupNode;
use crate::util::condense_whitespace;

pub const SECTION_ELEMENT: &str = "section";
pub const BOXED_WARNING_CODE: &str = "34066-1";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionAttributes {
    pub link_id: Option<String>,
    pub code: Option<String>,
    pub code_system: Option<String>,
    pub display_name: Option<String>,
    pub title: Option<String>,
    pub effective_date: Option<String>,
}

impl SectionAttributes {
    pub fn has_identifying_data(&self) -> bool {
        self.link_id.is_some() || self.code.is_some() || self.title.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHeader {
    pub document_guid: String,
    pub set_id: Option<String>,
    pub version_number: Option<i64>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub media_ref: String,
    pub file_name: Option<String>,
    pub media_type: Option<String>,
    pub alt_text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Paragraph,
    List,
    Table,
    Media,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Paragraph => "paragraph",
            ContentKind::List => "list",
            ContentKind::Table => "table",
            ContentKind::Media => "media",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentBlock {
    pub kind: ContentKind,
    pub text: String,
    pub media_refs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossReference {
    pub target: String,
    pub label: String,
}

impl CrossReference {
    /// Returns the link id for `#id` targets inside the same document.
    pub fn internal_target(&self) -> Option<&str> {
        self.target
            .strip_prefix('#')
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub caption: Option<String>,
    pub row_count: i64,
    pub column_count: i64,
    pub header_text: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(condense_whitespace)
        .filter(|value| !value.is_empty())
}

pub fn section_guid(node: &MarkupNode) -> Option<String> {
    non_empty(node.path_attr("id/@root"))
}

pub fn section_attributes(node: &MarkupNode) -> SectionAttributes {
    let title = node
        .child("title")
        .map(MarkupNode::text)
        .filter(|title| !title.is_empty());

    SectionAttributes {
        link_id: non_empty(node.attr("ID")),
        code: non_empty(node.path_attr("code/@code")),
        code_system: non_empty(node.path_attr("code/@codeSystem")),
        display_name: non_empty(node.path_attr("code/@displayName")),
        title,
        effective_date: node
            .path_attr("effectiveTime/@value")
            .and_then(effective_date),
    }
}

/// Normalizes `YYYYMMDD[hhmmss...]` timestamps to an ISO date.
pub fn effective_date(raw: &str) -> Option<String> {
    let digits = raw.trim().get(..8)?;
    NaiveDate::parse_from_str(digits, "%Y%m%d")
        .ok()
        .map(|date| date.format("%Y-%m-%d").to_string())
}

pub fn document_header(root: &MarkupNode) -> Option<DocumentHeader> {
    let document_guid = non_empty(root.path_attr("id/@root"))?;

    Some(DocumentHeader {
        document_guid,
        set_id: non_empty(root.path_attr("setId/@root")),
        version_number: root
            .path_attr("versionNumber/@value")
            .and_then(|value| value.trim().parse::<i64>().ok()),
        title: root
            .child("title")
            .map(MarkupNode::text)
            .filter(|title| !title.is_empty()),
    })
}

pub fn media_items(section: &MarkupNode) -> Vec<MediaItem> {
    section
        .descendants_within(SECTION_ELEMENT)
        .into_iter()
        .filter(|node| node.name() == "observationMedia")
        .filter_map(|node| {
            let file_name = non_empty(node.path_attr("value/reference/@value"));
            let media_ref = non_empty(node.attr("ID")).or_else(|| file_name.clone())?;

            Some(MediaItem {
                media_ref,
                file_name,
                media_type: non_empty(node.path_attr("value/@mediaType")),
                alt_text: node
                    .child("text")
                    .map(MarkupNode::text)
                    .filter(|text| !text.is_empty()),
            })
        })
        .collect()
}

pub fn content_blocks(section: &MarkupNode) -> Vec<ContentBlock> {
    let Some(text) = section.child("text") else {
        return Vec::new();
    };

    let mut blocks = Vec::new();
    for child in text.children() {
        let kind = match child.name() {
            "paragraph" => ContentKind::Paragraph,
            "list" => ContentKind::List,
            "table" => ContentKind::Table,
            "renderMultiMedia" => ContentKind::Media,
            _ => continue,
        };

        let body = match kind {
            ContentKind::List => child
                .children_named("item")
                .map(MarkupNode::text)
                .filter(|item| !item.is_empty())
                .collect::<Vec<String>>()
                .join("\n"),
            _ => child.text(),
        };
        let media_refs = media_references(child);

        if body.is_empty() && media_refs.is_empty() {
            continue;
        }

        blocks.push(ContentBlock {
            kind,
            text: body,
            media_refs,
        });
    }

    blocks
}

fn media_references(node: &MarkupNode) -> Vec<String> {
    let mut refs = Vec::new();
    if node.name() == "renderMultiMedia" {
        refs.extend(non_empty(node.attr("referencedObject")));
    }
    for descendant in node.descendants_within(SECTION_ELEMENT) {
        if descendant.name() == "renderMultiMedia" {
            refs.extend(non_empty(descendant.attr("referencedObject")));
        }
    }
    refs
}

pub fn cross_references(section: &MarkupNode) -> Vec<CrossReference> {
    let Some(text) = section.child("text") else {
        return Vec::new();
    };

    text.descendants_within(SECTION_ELEMENT)
        .into_iter()
        .filter(|node| node.name() == "linkHtml")
        .filter_map(|node| {
            let target = non_empty(node.attr("href"))?;
            Some(CrossReference {
                target,
                label: node.text(),
            })
        })
        .collect()
}

pub fn table_summaries(section: &MarkupNode) -> Vec<TableSummary> {
    section
        .descendants_within(SECTION_ELEMENT)
        .into_iter()
        .filter(|node| node.name() == "table")
        .map(|table| {
            let rows = table
                .descendants_within(SECTION_ELEMENT)
                .into_iter()
                .filter(|node| node.name() == "tr")
                .collect::<Vec<&MarkupNode>>();
            let column_count = rows
                .iter()
                .map(|row| {
                    row.children()
                        .filter(|cell| matches!(cell.name(), "td" | "th"))
                        .count()
                })
                .max()
                .unwrap_or(0);
            let header_text = table
                .child("thead")
                .map(MarkupNode::text)
                .filter(|text| !text.is_empty());

            TableSummary {
                caption: table
                    .child("caption")
                    .map(MarkupNode::text)
                    .filter(|text| !text.is_empty()),
                row_count: rows.len() as i64,
                column_count: column_count as i64,
                header_text,
            }
        })
        .collect()
}

pub fn highlight_texts(section: &MarkupNode) -> Vec<String> {
    section
        .children_named("excerpt")
        .flat_map(|excerpt| excerpt.children_named("highlight"))
        .map(|highlight| {
            highlight
                .child("text")
                .map(MarkupNode::text)
                .unwrap_or_else(|| highlight.text())
        })
        .filter(|text| !text.is_empty())
        .collect()
}

pub fn has_highlights(section: &MarkupNode) -> bool {
    section
        .children_named("excerpt")
        .any(|excerpt| excerpt.child("highlight").is_some())
}

pub fn narrative_text(section: &MarkupNode) -> String {
    section
        .child("text")
        .map(MarkupNode::text)
        .unwrap_or_default()
}

/// Reads leading outline numbers such as `2.3` from section titles.
#[derive(Debug)]
pub struct OutlineNumberParser {
    leading_number: Regex,
}

impl OutlineNumberParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            leading_number: Regex::new(r"^\s*(\d+(?:\.\d+)*)\.?\s+\S")
                .context("failed to compile outline number regex")?,
        })
    }

    pub fn outline_number(&self, title: &str) -> Option<String> {
        self.leading_number
            .captures(title)
            .and_then(|captures| captures.get(1))
            .map(|value| value.as_str().to_string())
    }
}
