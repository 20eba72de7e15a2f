//! Read-only element tree over labeling markup.
//!
//! Parsing keeps mixed content in document order so narrative text can be
//! rebuilt with its inline elements. Names are namespace-local.

use anyhow::{Context, Result, bail};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::util::condense_whitespace;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkupNode {
    name: String,
    attributes: Vec<(String, String)>,
    content: Vec<MarkupContent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkupContent {
    Element(MarkupNode),
    Text(String),
}

impl MarkupNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn children(&self) -> impl Iterator<Item = &MarkupNode> {
        self.content.iter().filter_map(|content| match content {
            MarkupContent::Element(node) => Some(node),
            MarkupContent::Text(_) => None,
        })
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a MarkupNode> {
        self.children().filter(move |child| child.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&MarkupNode> {
        self.children().find(|child| child.name == name)
    }

    /// Follows a `/`-separated chain of child names, taking the first match at
    /// each step.
    pub fn find_path(&self, path: &str) -> Option<&MarkupNode> {
        let mut current = self;
        for step in path.split('/').filter(|step| !step.is_empty()) {
            current = current.child(step)?;
        }
        Some(current)
    }

    /// Resolves `a/b/@attr` style paths. A bare `@attr` reads from this node.
    pub fn path_attr(&self, path: &str) -> Option<&str> {
        let (element_path, attribute) = path.rsplit_once('@')?;
        let element_path = element_path.trim_end_matches('/');
        let node = if element_path.is_empty() {
            self
        } else {
            self.find_path(element_path)?
        };
        node.attr(attribute)
    }

    /// All descendant text, whitespace condensed.
    pub fn text(&self) -> String {
        let mut raw = String::new();
        collect_text(self, &mut raw);
        condense_whitespace(&raw)
    }

    /// Descendants in document order, not descending into elements named
    /// `boundary` (those elements themselves are not yielded either).
    pub fn descendants_within<'a>(&'a self, boundary: &str) -> Vec<&'a MarkupNode> {
        let mut out = Vec::new();
        collect_within(self, boundary, &mut out);
        out
    }

    pub fn contains_within(&self, name: &str, boundary: &str) -> bool {
        self.descendants_within(boundary)
            .iter()
            .any(|node| node.name == name)
    }

    #[cfg(test)]
    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attributes.push((key.to_string(), value.to_string()));
        self
    }

    #[cfg(test)]
    pub fn with_child(mut self, child: MarkupNode) -> Self {
        self.content.push(MarkupContent::Element(child));
        self
    }
}

/// Elements whose text never runs into a neighbour's. Inline markup such as
/// `linkHtml` or `content` is joined without padding.
const BLOCK_ELEMENTS: &[&str] = &[
    "paragraph",
    "list",
    "item",
    "table",
    "caption",
    "thead",
    "tbody",
    "tfoot",
    "tr",
    "td",
    "th",
    "br",
    "text",
    "title",
    "section",
    "component",
    "excerpt",
    "highlight",
];

fn collect_text(node: &MarkupNode, out: &mut String) {
    for content in &node.content {
        match content {
            MarkupContent::Text(text) => {
                out.push_str(text);
            }
            MarkupContent::Element(child) => {
                let block = BLOCK_ELEMENTS.contains(&child.name.as_str());
                if block {
                    out.push(' ');
                }
                collect_text(child, out);
                if block {
                    out.push(' ');
                }
            }
        }
    }
}

fn collect_within<'a>(node: &'a MarkupNode, boundary: &str, out: &mut Vec<&'a MarkupNode>) {
    for child in node.children() {
        if child.name == boundary {
            continue;
        }
        out.push(child);
        collect_within(child, boundary, out);
    }
}

pub fn parse_document(xml: &str) -> Result<MarkupNode> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<MarkupNode> = Vec::new();
    let mut root: Option<MarkupNode> = None;

    loop {
        let position = reader.buffer_position();
        let event = reader
            .read_event()
            .with_context(|| format!("failed to parse markup near byte {position}"))?;

        match event {
            Event::Start(start) => {
                stack.push(element_from_start(&start)?);
            }
            Event::Empty(start) => {
                let node = element_from_start(&start)?;
                attach(&mut stack, &mut root, node)?;
            }
            Event::End(_) => {
                let Some(node) = stack.pop() else {
                    bail!("unbalanced closing tag near byte {position}");
                };
                attach(&mut stack, &mut root, node)?;
            }
            Event::Text(text) => {
                if let Some(parent) = stack.last_mut() {
                    let value = text
                        .unescape()
                        .map(|value| value.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&text).into_owned());
                    parent.content.push(MarkupContent::Text(value));
                }
            }
            Event::CData(data) => {
                if let Some(parent) = stack.last_mut() {
                    let value = String::from_utf8_lossy(&data.into_inner()).into_owned();
                    parent.content.push(MarkupContent::Text(value));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        bail!("markup ended with {} unclosed element(s)", stack.len());
    }

    root.context("markup contains no root element")
}

fn element_from_start(start: &BytesStart<'_>) -> Result<MarkupNode> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut node = MarkupNode::new(&name);

    for attribute in start.attributes() {
        let attribute =
            attribute.with_context(|| format!("malformed attribute on <{name}>"))?;
        let key = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .with_context(|| format!("malformed attribute value {key} on <{name}>"))?
            .into_owned();
        node.attributes.push((key, value));
    }

    Ok(node)
}

fn attach(
    stack: &mut [MarkupNode],
    root: &mut Option<MarkupNode>,
    node: MarkupNode,
) -> Result<()> {
    if let Some(parent) = stack.last_mut() {
        parent.content.push(MarkupContent::Element(node));
        return Ok(());
    }

    if root.is_some() {
        bail!("markup contains more than one root element");
    }
    *root = Some(node);
    Ok(())
}
