use std::ops::Range;
use std::rc::{Rc, Weak};

use log::debug;
use markup5ever_rcdom::{Handle, Node, NodeData};

use crate::dom;
use crate::tooltip::TOOLTIP_MARKER_ATTR;

/// Elements whose text is never rendered as document content.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CharOrigin {
    /// Byte offset of the character in the normalized text
    normalized: usize,
    /// Byte range of the raw character it was produced from
    raw: (usize, usize),
}

/// Normalized text plus a back-reference from every normalized character to the
/// raw characters it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText {
    text: String,
    origins: Vec<CharOrigin>,
}

impl NormalizedText {
    /// Lowercase, collapse whitespace runs to one space, strip everything that is
    /// neither a word character nor a space, then trim.
    pub fn from_raw(raw: &str) -> Self {
        let mut text = String::with_capacity(raw.len());
        let mut origins = Vec::with_capacity(raw.len());
        let mut in_whitespace = false;

        for (raw_start, ch) in raw.char_indices() {
            let raw_range = (raw_start, raw_start + ch.len_utf8());
            for lower in ch.to_lowercase() {
                let kept = if lower.is_whitespace() {
                    if in_whitespace {
                        continue;
                    }
                    in_whitespace = true;
                    Some(' ')
                } else {
                    in_whitespace = false;
                    is_word_char(lower).then_some(lower)
                };

                if let Some(kept) = kept {
                    origins.push(CharOrigin {
                        normalized: text.len(),
                        raw: raw_range,
                    });
                    text.push(kept);
                }
            }
        }

        let leading = text.len() - text.trim_start_matches(' ').len();
        let trailing = text.len() - text.trim_end_matches(' ').len();
        if leading == text.len() {
            return Self {
                text: String::new(),
                origins: Vec::new(),
            };
        }
        text.truncate(text.len() - trailing);
        text.drain(..leading);
        origins.truncate(origins.len() - trailing);
        origins.drain(..leading);
        for origin in &mut origins {
            origin.normalized -= leading;
        }

        Self { text, origins }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Maps a byte range of the normalized text back onto the raw text.
    pub fn raw_range(&self, start: usize, end: usize) -> Option<Range<usize>> {
        if start >= end || end > self.text.len() {
            return None;
        }
        let first_idx = self.origins.partition_point(|o| o.normalized < start);
        let first = self.origins.get(first_idx).filter(|o| o.normalized == start)?;
        let last_idx = self.origins.partition_point(|o| o.normalized < end).checked_sub(1)?;
        let last = self.origins.get(last_idx)?;
        Some(first.raw.0..last.raw.1)
    }
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// The normalization applied to both indexed text and search targets.
pub fn normalize_text(raw: &str) -> String {
    NormalizedText::from_raw(raw).text
}

/// One searchable text node of the content root.
#[derive(Debug, Clone)]
pub struct NormalizedTextSpan {
    pub raw_text: String,
    pub normalized: NormalizedText,
    source_node: Weak<Node>,
    owning_element: Weak<Node>,
}

impl NormalizedTextSpan {
    fn new(node: &Handle, raw_text: String) -> Self {
        let owning_element = dom::parent(node)
            .map(|parent| Rc::downgrade(&parent))
            .unwrap_or_default();
        Self {
            normalized: NormalizedText::from_raw(&raw_text),
            raw_text,
            source_node: Rc::downgrade(node),
            owning_element,
        }
    }

    pub fn normalized_text(&self) -> &str {
        self.normalized.as_str()
    }

    /// The text node, if the viewer has not dropped it since indexing.
    pub fn source_node(&self) -> Option<Handle> {
        self.source_node.upgrade()
    }

    pub fn owning_element(&self) -> Option<Handle> {
        self.owning_element.upgrade()
    }

    pub fn raw_range(&self, start: usize, end: usize) -> Option<Range<usize>> {
        self.normalized.raw_range(start, end)
    }
}

/// Walks the text nodes under `root` in document order.
pub fn build_index(root: &Handle) -> Vec<NormalizedTextSpan> {
    let mut spans = Vec::new();
    visit(root, &mut spans);
    debug!("Indexed {} text spans", spans.len());
    spans
}

fn visit(node: &Handle, spans: &mut Vec<NormalizedTextSpan>) {
    match node.data {
        NodeData::Text { ref contents } => {
            let raw = contents.borrow().to_string();
            if !raw.trim().is_empty() {
                spans.push(NormalizedTextSpan::new(node, raw));
            }
            return;
        }
        NodeData::Element { ref name, .. } => {
            if SKIPPED_ELEMENTS.contains(&name.local.as_ref())
                || dom::attr(node, TOOLTIP_MARKER_ATTR).is_some()
            {
                return;
            }
        }
        _ => {}
    }
    for child in node.children.borrow().iter() {
        visit(child, spans);
    }
}
