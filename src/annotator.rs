//! Wraps matched text in highlight annotations and takes them off again.
//!
//! An annotation is a `<span id="highlight-{id}">` owning the highlighted text.
//! Applying the same id twice replaces the earlier element, and removal puts the
//! text back as a plain text node merged with its neighbours, so the document
//! text is byte-identical to what it was before annotation.

use std::collections::HashMap;
use std::rc::{Rc, Weak};

use log::{debug, warn};
use markup5ever_rcdom::{Handle, Node};

use crate::dom;
use crate::highlight::{HighlightDescriptor, element_id};
use crate::matcher::MatchCandidate;
use crate::tooltip::TooltipManager;

pub const HIGHLIGHT_CLASS: &str = "textmark-highlight";
pub const HOVER_CLASS: &str = "highlight-hover";
pub const FLASH_CLASS: &str = "highlight-flash";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnnotateError {
    #[error("text node is no longer attached to the document")]
    Detached,
    #[error("range boundary is not a text node")]
    NotText,
    #[error("offset {offset} is out of bounds for text of length {len}")]
    OutOfBounds { offset: usize, len: usize },
    #[error("offset {0} does not fall on a character boundary")]
    NotCharBoundary(usize),
    #[error("normalized range {start}..{end} does not map onto the source text")]
    Unmapped { start: usize, end: usize },
    #[error("text under the range changed since it was matched")]
    Stale,
    #[error("range is empty")]
    EmptyRange,
    #[error("range end precedes its start")]
    Unordered,
}

/// How the annotation element was put around the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapStrategy {
    /// Both boundaries share a parent and the range was wrapped in place
    Surround,
    /// The range crossed element boundaries; its contents were extracted into
    /// the wrapper and the wrapper inserted where the range started
    ExtractAndInsert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HighlightState {
    Unapplied,
    Applied,
    Removed,
}

#[derive(Debug, Clone)]
pub enum PointerEvent {
    Enter(Handle),
    Leave(Handle),
    Click(Handle),
}

/// A DOM range between two text positions. Offsets are byte offsets into the
/// text of the boundary nodes.
#[derive(Debug, Clone)]
pub struct TextRange {
    pub start_node: Handle,
    pub start_offset: usize,
    pub end_node: Handle,
    pub end_offset: usize,
    expected_text: Option<String>,
}

impl TextRange {
    pub fn new(start_node: Handle, start_offset: usize, end_node: Handle, end_offset: usize) -> Self {
        Self {
            start_node,
            start_offset,
            end_node,
            end_offset,
            expected_text: None,
        }
    }

    pub fn within(node: &Handle, start_offset: usize, end_offset: usize) -> Self {
        Self::new(node.clone(), start_offset, node.clone(), end_offset)
    }

    /// Builds the range behind a match, translating normalized offsets back to
    /// offsets in the source text node.
    pub fn from_match(candidate: &MatchCandidate<'_>) -> Result<Self, AnnotateError> {
        let node = candidate.span.source_node().ok_or(AnnotateError::Detached)?;
        let raw = candidate
            .span
            .raw_range(candidate.start_offset, candidate.end_offset)
            .ok_or(AnnotateError::Unmapped {
                start: candidate.start_offset,
                end: candidate.end_offset,
            })?;
        let expected = candidate.span.raw_text.get(raw.clone()).map(str::to_string);
        let mut range = Self::within(&node, raw.start, raw.end);
        range.expected_text = expected;
        Ok(range)
    }

    fn is_collapsed_node(&self) -> bool {
        Rc::ptr_eq(&self.start_node, &self.end_node)
    }

    fn check_attached(&self) -> Result<(), AnnotateError> {
        for node in [&self.start_node, &self.end_node] {
            if !dom::is_text(node) {
                return Err(AnnotateError::NotText);
            }
            if !dom::is_attached(node) {
                return Err(AnnotateError::Detached);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), AnnotateError> {
        self.check_attached()?;
        check_offset(&self.start_node, self.start_offset)?;
        check_offset(&self.end_node, self.end_offset)?;

        if self.is_collapsed_node() {
            if self.start_offset >= self.end_offset {
                return Err(AnnotateError::EmptyRange);
            }
        } else {
            if !Rc::ptr_eq(&dom::root_of(&self.start_node), &dom::root_of(&self.end_node)) {
                return Err(AnnotateError::Detached);
            }
            if dom::tree_path(&self.start_node) > dom::tree_path(&self.end_node) {
                return Err(AnnotateError::Unordered);
            }
        }

        if let Some(expected) = &self.expected_text {
            if self.is_collapsed_node() {
                let text = dom::text_of(&self.start_node).unwrap_or_default();
                if text.get(self.start_offset..self.end_offset) != Some(expected.as_str()) {
                    return Err(AnnotateError::Stale);
                }
            }
        }
        Ok(())
    }

    /// Re-points boundaries that sat in text merged by a removal.
    fn remapped(mut self, run: &MergedRun) -> Self {
        if let Some((node, base)) = run.locate(&self.start_node) {
            self.start_node = node;
            self.start_offset += base;
        }
        if let Some((node, base)) = run.locate(&self.end_node) {
            self.end_node = node;
            self.end_offset += base;
        }
        self
    }
}

fn check_offset(node: &Handle, offset: usize) -> Result<(), AnnotateError> {
    let text = dom::text_of(node).ok_or(AnnotateError::NotText)?;
    if offset > text.len() {
        return Err(AnnotateError::OutOfBounds {
            offset,
            len: text.len(),
        });
    }
    if !text.is_char_boundary(offset) {
        return Err(AnnotateError::NotCharBoundary(offset));
    }
    Ok(())
}

/// The text nodes merged back together when an annotation is unwrapped, with
/// the offset each one now starts at inside `head`.
struct MergedRun {
    head: Handle,
    offsets: Vec<(Handle, usize)>,
}

impl MergedRun {
    fn locate(&self, node: &Handle) -> Option<(Handle, usize)> {
        self.offsets
            .iter()
            .find(|(candidate, _)| Rc::ptr_eq(candidate, node))
            .map(|(_, base)| (self.head.clone(), *base))
    }
}

/// Handle to an annotation in the DOM, used by callers to scroll to and flash it.
#[derive(Debug, Clone)]
pub struct AppliedHighlight {
    pub id: String,
    pub element: Handle,
    pub strategy: WrapStrategy,
    pub page: Option<u32>,
}

impl AppliedHighlight {
    pub fn element_id(&self) -> String {
        element_id(&self.id)
    }

    pub fn text(&self) -> String {
        dom::text_content(&self.element)
    }

    pub fn is_attached(&self) -> bool {
        dom::is_attached(&self.element)
    }

    pub fn flash(&self) {
        dom::add_class(&self.element, FLASH_CLASS);
    }

    pub fn clear_flash(&self) {
        dom::remove_class(&self.element, FLASH_CLASS);
    }
}

#[derive(Debug)]
struct Registration {
    element: Weak<Node>,
    document: Weak<Node>,
    explanation: String,
    relevance_percent: u32,
}

#[derive(Debug, Default)]
pub struct HighlightAnnotator {
    registrations: HashMap<String, Registration>,
    states: HashMap<String, HighlightState>,
    tooltips: TooltipManager,
}

impl HighlightAnnotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tooltips(tooltips: TooltipManager) -> Self {
        Self {
            tooltips,
            ..Self::default()
        }
    }

    pub fn apply(
        &mut self,
        candidate: &MatchCandidate<'_>,
        descriptor: &HighlightDescriptor,
    ) -> Result<AppliedHighlight, AnnotateError> {
        let range = TextRange::from_match(candidate)?;
        self.apply_range(range, descriptor)
    }

    /// Annotates an arbitrary range, e.g. a user selection. An existing
    /// annotation with the same id is removed first.
    pub fn apply_range(
        &mut self,
        range: TextRange,
        descriptor: &HighlightDescriptor,
    ) -> Result<AppliedHighlight, AnnotateError> {
        range.check_attached()?;

        let document = dom::root_of(&range.start_node);
        let existing = self
            .registered_element(&descriptor.id)
            .or_else(|| find_annotation(&document, &descriptor.id));
        let range = match existing {
            Some(existing) => {
                debug!("Replacing existing highlight {}", descriptor.id);
                self.forget(&descriptor.id);
                match unwrap_annotation(&existing) {
                    Some(run) => range.remapped(&run),
                    None => range,
                }
            }
            None => range,
        };

        if let Err(e) = range.validate() {
            warn!("Cannot highlight {}: {e}", descriptor.id);
            if self.states.contains_key(&descriptor.id) {
                self.states.insert(descriptor.id.clone(), HighlightState::Removed);
            }
            return Err(e);
        }

        let wrapper = create_wrapper(descriptor);
        let strategy = match surround_contents(&range, &wrapper) {
            Ok(()) => WrapStrategy::Surround,
            Err(PartialSelection) => {
                debug!(
                    "Range for {} crosses element boundaries, extracting",
                    descriptor.id
                );
                extract_and_insert(&range, &wrapper)?;
                WrapStrategy::ExtractAndInsert
            }
        };

        self.registrations.insert(
            descriptor.id.clone(),
            Registration {
                element: Rc::downgrade(&wrapper),
                document: Rc::downgrade(&document),
                explanation: descriptor.explanation.clone(),
                relevance_percent: descriptor.relevance_percent(),
            },
        );
        self.states
            .insert(descriptor.id.clone(), HighlightState::Applied);

        Ok(AppliedHighlight {
            id: descriptor.id.clone(),
            element: wrapper,
            strategy,
            page: descriptor.page,
        })
    }

    /// Takes the annotation off and restores the original text. Removing an id
    /// that was never applied does nothing.
    pub fn remove(&mut self, id: &str) -> bool {
        if !self.registrations.contains_key(id) {
            debug!("Highlight {id} is not applied, nothing to remove");
            return false;
        }
        let element = self.registered_element(id);
        self.forget(id);
        self.states.insert(id.to_string(), HighlightState::Removed);

        match element {
            Some(element) => unwrap_annotation(&element).is_some(),
            None => false,
        }
    }

    /// Removes an annotation found by id under `root`, including ones this
    /// annotator did not create.
    pub fn remove_in(&mut self, root: &Handle, id: &str) -> bool {
        if self.registrations.contains_key(id) {
            return self.remove(id);
        }
        match find_annotation(root, id) {
            Some(element) => {
                self.states.insert(id.to_string(), HighlightState::Removed);
                unwrap_annotation(&element).is_some()
            }
            None => false,
        }
    }

    /// The live element registered for `id`, wherever it now lives.
    fn registered_element(&self, id: &str) -> Option<Handle> {
        let registration = self.registrations.get(id)?;
        registration
            .element
            .upgrade()
            .filter(dom::is_attached)
            .or_else(|| {
                let document = registration.document.upgrade()?;
                find_annotation(&document, id)
            })
    }

    fn forget(&mut self, id: &str) {
        self.registrations.remove(id);
        self.tooltips.dismiss_for(id);
    }

    pub fn state(&self, id: &str) -> HighlightState {
        self.states
            .get(id)
            .copied()
            .unwrap_or(HighlightState::Unapplied)
    }

    /// Number of highlights with live interaction handlers.
    pub fn active_count(&self) -> usize {
        self.registrations.len()
    }

    pub fn tooltips(&self) -> &TooltipManager {
        &self.tooltips
    }

    /// Routes a pointer event to the highlight under `target`. Returns true when
    /// the event changed anything.
    pub fn dispatch(&mut self, event: &PointerEvent) -> bool {
        match event {
            PointerEvent::Enter(target) => match self.highlight_at(target) {
                Some((_, element)) => {
                    dom::add_class(&element, HOVER_CLASS);
                    true
                }
                None => false,
            },
            PointerEvent::Leave(target) => match self.highlight_at(target) {
                Some((_, element)) => {
                    dom::remove_class(&element, HOVER_CLASS);
                    true
                }
                None => false,
            },
            PointerEvent::Click(target) => match self.highlight_at(target) {
                Some((id, element)) => {
                    let Some(registration) = self.registrations.get(&id) else {
                        return false;
                    };
                    let container = dom::body_of(&element);
                    let explanation = registration.explanation.clone();
                    let percent = registration.relevance_percent;
                    self.tooltips.show(&container, &id, &explanation, percent);
                    true
                }
                None => self.tooltips.handle_outside_click(target),
            },
        }
    }

    /// Expires the tooltip once its timeout has passed.
    pub fn tick(&mut self) -> bool {
        self.tooltips.update()
    }

    fn highlight_at(&self, target: &Handle) -> Option<(String, Handle)> {
        dom::ancestors_inclusive(target).find_map(|node| {
            if !dom::has_class(&node, HIGHLIGHT_CLASS) {
                return None;
            }
            let id = dom::attr(&node, "data-highlight-id")?;
            self.registrations.contains_key(&id).then_some((id, node))
        })
    }
}

/// An annotation element for `id` under `root`. Elements that merely share
/// the id but are not annotations are ignored.
fn find_annotation(root: &Handle, id: &str) -> Option<Handle> {
    let wanted = element_id(id);
    dom::find_first(root, &|node| {
        dom::attr(node, "id").as_deref() == Some(wanted.as_str())
            && dom::has_class(node, HIGHLIGHT_CLASS)
            && dom::attr(node, "data-highlight-id").as_deref() == Some(id)
    })
}

fn create_wrapper(descriptor: &HighlightDescriptor) -> Handle {
    let class = format!("{HIGHLIGHT_CLASS} {}", descriptor.color.class_name());
    let relevance = descriptor.relevance_percent().to_string();
    let style = descriptor.color.inline_style();
    let wrapper_id = descriptor.element_id();
    let mut attrs = vec![
        ("id", wrapper_id.as_str()),
        ("class", class.as_str()),
        ("data-highlight-id", descriptor.id.as_str()),
        ("data-explanation", descriptor.explanation.as_str()),
        ("data-relevance", relevance.as_str()),
        ("style", style.as_str()),
    ];
    let page = descriptor.page.map(|page| page.to_string());
    if let Some(page) = &page {
        attrs.push(("data-page", page.as_str()));
    }
    dom::create_element("span", &attrs)
}

struct PartialSelection;

/// Wraps a range whose boundaries share a parent. Fails without touching the
/// DOM when they do not.
fn surround_contents(range: &TextRange, wrapper: &Handle) -> Result<(), PartialSelection> {
    let parent = dom::parent(&range.start_node).ok_or(PartialSelection)?;
    let end_parent = dom::parent(&range.end_node).ok_or(PartialSelection)?;
    if !Rc::ptr_eq(&parent, &end_parent) {
        return Err(PartialSelection);
    }

    let start_text = dom::text_of(&range.start_node).unwrap_or_default();
    if range.is_collapsed_node() {
        let (head, rest) = start_text.split_at(range.start_offset);
        let (middle, tail) = rest.split_at(range.end_offset - range.start_offset);
        dom::set_text(&range.start_node, head);
        dom::append_child(wrapper, &dom::create_text(middle));
        dom::insert_after(&range.start_node, wrapper);
        if !tail.is_empty() {
            dom::insert_after(wrapper, &dom::create_text(tail));
        }
        return Ok(());
    }

    let first = split_text(&range.start_node, range.start_offset, &start_text);
    let end_text = dom::text_of(&range.end_node).unwrap_or_default();
    split_text(&range.end_node, range.end_offset, &end_text);

    let (Some(from), Some(to)) = (
        dom::index_in_parent(&first),
        dom::index_in_parent(&range.end_node),
    ) else {
        return Err(PartialSelection);
    };
    let moved: Vec<Handle> = parent.children.borrow()[from..=to].to_vec();
    dom::insert_at(&parent, from, wrapper);
    for node in &moved {
        dom::append_child(wrapper, node);
    }
    Ok(())
}

/// Keeps `text[..offset]` in `node` and inserts the remainder as a new text node
/// right after it, returning the new node.
fn split_text(node: &Handle, offset: usize, text: &str) -> Handle {
    let (head, tail) = text.split_at(offset);
    dom::set_text(node, head);
    let tail = dom::create_text(tail);
    dom::insert_after(node, &tail);
    tail
}

/// Moves the range contents into `wrapper`, cloning partially selected
/// ancestors, and inserts the wrapper where the range began.
fn extract_and_insert(range: &TextRange, wrapper: &Handle) -> Result<(), AnnotateError> {
    let start_text = dom::text_of(&range.start_node).ok_or(AnnotateError::NotText)?;
    let end_text = dom::text_of(&range.end_node).ok_or(AnnotateError::NotText)?;
    let ancestor = dom::common_ancestor(&range.start_node, &range.end_node)
        .ok_or(AnnotateError::Detached)?;

    let start_tail = split_text(&range.start_node, range.start_offset, &start_text);
    let end_rest = split_text(&range.end_node, range.end_offset, &end_text);
    if dom::text_of(&end_rest).is_some_and(|text| text.is_empty()) {
        dom::detach(&end_rest);
    }

    let (start_part, start_anchor) =
        carve_start(&start_tail, &ancestor).ok_or(AnnotateError::Detached)?;
    let (end_part, end_anchor) =
        carve_end(&range.end_node, &ancestor).ok_or(AnnotateError::Detached)?;

    let (Some(start_idx), Some(end_idx)) = (
        dom::index_in_parent(&start_anchor),
        dom::index_in_parent(&end_anchor),
    ) else {
        return Err(AnnotateError::Detached);
    };
    let middle: Vec<Handle> = ancestor.children.borrow()[start_idx + 1..end_idx].to_vec();

    dom::insert_at(&ancestor, start_idx + 1, wrapper);
    dom::append_child(wrapper, &start_part);
    for node in &middle {
        dom::append_child(wrapper, node);
    }
    dom::append_child(wrapper, &end_part);
    Ok(())
}

/// Splits the ancestors of `node` below `ancestor` so that everything from
/// `node` onwards ends up in clones. Returns the detached (or, at the top level,
/// still attached) part to extract, and the node left under `ancestor`.
fn carve_start(node: &Handle, ancestor: &Handle) -> Option<(Handle, Handle)> {
    let mut carried = node.clone();
    let mut current = node.clone();
    loop {
        let parent = dom::parent(&current)?;
        if Rc::ptr_eq(&parent, ancestor) {
            return Some((carried, current));
        }
        let clone = dom::shallow_clone(&parent)?;
        let idx = dom::index_in_parent(&current)?;
        let following: Vec<Handle> = parent.children.borrow()[idx + 1..].to_vec();
        dom::append_child(&clone, &carried);
        for sibling in &following {
            dom::append_child(&clone, sibling);
        }
        carried = clone;
        current = parent;
    }
}

/// Mirror of [`carve_start`] for the end boundary: everything up to and
/// including `node` ends up in clones.
fn carve_end(node: &Handle, ancestor: &Handle) -> Option<(Handle, Handle)> {
    let mut carried = node.clone();
    let mut current = node.clone();
    loop {
        let parent = dom::parent(&current)?;
        if Rc::ptr_eq(&parent, ancestor) {
            return Some((carried, current));
        }
        let clone = dom::shallow_clone(&parent)?;
        let idx = dom::index_in_parent(&current)?;
        let preceding: Vec<Handle> = parent.children.borrow()[..idx].to_vec();
        for sibling in &preceding {
            dom::append_child(&clone, sibling);
        }
        dom::append_child(&clone, &carried);
        carried = clone;
        current = parent;
    }
}

/// Replaces an annotation element with a text node holding its text and merges
/// that with the neighbouring text nodes.
fn unwrap_annotation(element: &Handle) -> Option<MergedRun> {
    let parent = dom::parent(element)?;
    let idx = dom::index_in_parent(element)?;
    let siblings: Vec<Handle> = parent.children.borrow().clone();

    let mut run_start = idx;
    while run_start > 0 && dom::is_text(&siblings[run_start - 1]) {
        run_start -= 1;
    }
    let mut run_end = idx;
    while run_end + 1 < siblings.len() && dom::is_text(&siblings[run_end + 1]) {
        run_end += 1;
    }

    let replacement = dom::create_text(&dom::text_content(element));
    let mut offsets = Vec::new();
    let mut position = 0;
    for (i, sibling) in siblings.iter().enumerate().take(run_end + 1).skip(run_start) {
        if i == idx {
            for text_node in dom::find_all(element, &dom::is_text) {
                offsets.push((text_node.clone(), position));
                position += dom::text_of(&text_node).map(|t| t.len()).unwrap_or(0);
            }
        } else {
            offsets.push((sibling.clone(), position));
            position += dom::text_of(sibling).map(|t| t.len()).unwrap_or(0);
        }
    }

    let head = if run_start < idx {
        siblings[run_start].clone()
    } else {
        replacement.clone()
    };

    dom::detach(element);
    dom::insert_at(&parent, idx, &replacement);
    dom::merge_adjacent_text(&parent);

    Some(MergedRun { head, offsets })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::highlight::HighlightColor;
    use crate::matcher::find_best_matches;
    use crate::text_index::build_index;
    use crate::tooltip::TOOLTIP_ELEMENT_ID;
    use markup5ever_rcdom::RcDom;
    use std::time::Duration;

    const COAST: &str = "<p>the mediterranean coastline stretches for miles</p>";

    fn descriptor(id: &str) -> HighlightDescriptor {
        HighlightDescriptor::new(id, "Mediterranean Coastline")
            .with_color(HighlightColor::Blue)
            .with_explanation("Sets the scene", 0.874)
    }

    fn body(dom: &RcDom) -> Handle {
        dom::find_element(&dom.document, "body").unwrap()
    }

    fn count_highlights(dom: &RcDom, id: &str) -> usize {
        let wanted = element_id(id);
        dom::find_all(&dom.document, &|n| {
            dom::attr(n, "id").as_deref() == Some(wanted.as_str())
        })
        .len()
    }

    fn first_text(root: &Handle, needle: &str) -> Handle {
        dom::find_first(root, &|n| {
            dom::text_of(n).is_some_and(|text| text.contains(needle))
        })
        .unwrap()
    }

    #[test]
    fn test_apply_wraps_exact_match() {
        let dom = dom::parse_html(COAST);
        let index = build_index(&dom.document);
        let matches = find_best_matches("Mediterranean Coastline", &index, None);
        let mut annotator = HighlightAnnotator::new();

        let applied = annotator.apply(&matches[0], &descriptor("h1")).unwrap();

        assert_eq!(applied.strategy, WrapStrategy::Surround);
        assert_eq!(applied.text(), "mediterranean coastline");
        assert_eq!(applied.element_id(), "highlight-h1");
        assert_eq!(count_highlights(&dom, "h1"), 1);
        assert!(dom::has_class(&applied.element, "highlight-blue"));
        assert_eq!(dom::attr(&applied.element, "data-relevance").as_deref(), Some("87"));
        assert_eq!(annotator.state("h1"), HighlightState::Applied);
        assert_eq!(
            dom::text_content(&body(&dom)),
            "the mediterranean coastline stretches for miles"
        );
    }

    #[test]
    fn test_apply_maps_normalized_offsets_to_raw_text() {
        let dom = dom::parse_html("<p>Look:  the  MEDITERRANEAN, coastline!</p>");
        let index = build_index(&dom.document);
        let matches = find_best_matches("mediterranean coastline", &index, None);
        let mut annotator = HighlightAnnotator::new();

        let applied = annotator.apply(&matches[0], &descriptor("raw")).unwrap();
        assert_eq!(applied.text(), "MEDITERRANEAN, coastline");
    }

    #[test]
    fn test_apply_twice_same_match_leaves_one_element() {
        let dom = dom::parse_html(COAST);
        let index = build_index(&dom.document);
        let matches = find_best_matches("Mediterranean Coastline", &index, None);
        let mut annotator = HighlightAnnotator::new();

        annotator.apply(&matches[0], &descriptor("h1")).unwrap();
        let second = annotator.apply(&matches[0], &descriptor("h1")).unwrap();

        assert_eq!(count_highlights(&dom, "h1"), 1);
        assert_eq!(second.text(), "mediterranean coastline");
        assert_eq!(annotator.active_count(), 1);
    }

    #[test]
    fn test_reapply_after_reindex_leaves_one_element() {
        let dom = dom::parse_html(COAST);
        let mut annotator = HighlightAnnotator::new();

        let index = build_index(&dom.document);
        let matches = find_best_matches("Mediterranean Coastline", &index, None);
        annotator.apply(&matches[0], &descriptor("h1")).unwrap();

        // The fresh index sees the text inside the existing wrapper.
        let index = build_index(&dom.document);
        let matches = find_best_matches("Mediterranean Coastline", &index, None);
        let second = annotator.apply(&matches[0], &descriptor("h1")).unwrap();

        assert_eq!(count_highlights(&dom, "h1"), 1);
        assert_eq!(second.text(), "mediterranean coastline");
        assert_eq!(
            dom::text_content(&body(&dom)),
            "the mediterranean coastline stretches for miles"
        );
    }

    #[test]
    fn test_reapply_with_shifted_range_replaces_first() {
        let dom = dom::parse_html(COAST);
        let mut annotator = HighlightAnnotator::new();
        let text = first_text(&dom.document, "mediterranean");

        annotator
            .apply_range(TextRange::within(&text, 4, 17), &descriptor("h1"))
            .unwrap();
        let shifted = annotator
            .apply_range(TextRange::within(&text, 18, 27), &descriptor("h1"))
            .unwrap();

        assert_eq!(count_highlights(&dom, "h1"), 1);
        assert_eq!(shifted.text(), "coastline");
        assert_eq!(
            dom::text_content(&body(&dom)),
            "the mediterranean coastline stretches for miles"
        );
    }

    #[test]
    fn test_remove_restores_text_and_merges_nodes() {
        let dom = dom::parse_html(COAST);
        let paragraph = dom::find_element(&dom.document, "p").unwrap();
        let before = dom::text_content(&paragraph);
        let index = build_index(&dom.document);
        let matches = find_best_matches("Mediterranean Coastline", &index, None);
        let mut annotator = HighlightAnnotator::new();
        annotator.apply(&matches[0], &descriptor("h1")).unwrap();
        assert_eq!(paragraph.children.borrow().len(), 3);

        assert!(annotator.remove("h1"));

        assert_eq!(dom::text_content(&paragraph), before);
        assert_eq!(paragraph.children.borrow().len(), 1);
        assert_eq!(count_highlights(&dom, "h1"), 0);
        assert_eq!(annotator.state("h1"), HighlightState::Removed);
        assert_eq!(annotator.active_count(), 0);
    }

    #[test]
    fn test_remove_unapplied_is_noop() {
        let mut annotator = HighlightAnnotator::new();
        assert!(!annotator.remove("never"));
        assert_eq!(annotator.state("never"), HighlightState::Unapplied);
    }

    #[test]
    fn test_apply_on_detached_node_fails() {
        let dom = dom::parse_html(COAST);
        let index = build_index(&dom.document);
        let matches = find_best_matches("Mediterranean Coastline", &index, None);
        let paragraph = dom::find_element(&dom.document, "p").unwrap();
        dom::detach(&paragraph);

        let mut annotator = HighlightAnnotator::new();
        let result = annotator.apply(&matches[0], &descriptor("h1"));
        assert_eq!(result.unwrap_err(), AnnotateError::Detached);
        assert_eq!(annotator.state("h1"), HighlightState::Unapplied);
    }

    #[test]
    fn test_apply_on_changed_text_fails_without_mutation() {
        let dom = dom::parse_html(COAST);
        let index = build_index(&dom.document);
        let matches = find_best_matches("Mediterranean Coastline", &index, None);
        let text = first_text(&dom.document, "mediterranean");
        dom::set_text(&text, "short");

        let mut annotator = HighlightAnnotator::new();
        let result = annotator.apply(&matches[0], &descriptor("h1"));
        assert!(matches!(result, Err(AnnotateError::OutOfBounds { .. })));
        assert_eq!(dom::text_content(&body(&dom)), "short");
    }

    #[test]
    fn test_apply_range_rejects_bad_ranges() {
        let dom = dom::parse_html("<p>héllo world</p><p>second</p>");
        let text = first_text(&dom.document, "world");
        let second = first_text(&dom.document, "second");
        let paragraph = dom::find_element(&dom.document, "p").unwrap();
        let mut annotator = HighlightAnnotator::new();
        let d = descriptor("bad");

        let cases = [
            (TextRange::within(&text, 2, 5), AnnotateError::NotCharBoundary(2)),
            (TextRange::within(&text, 3, 3), AnnotateError::EmptyRange),
            (TextRange::new(second.clone(), 1, text.clone(), 1), AnnotateError::Unordered),
            (TextRange::within(&paragraph, 0, 1), AnnotateError::NotText),
        ];
        for (range, expected) in cases {
            assert_eq!(annotator.apply_range(range, &d).unwrap_err(), expected);
        }
        assert_eq!(count_highlights(&dom, "bad"), 0);
    }

    #[test]
    fn test_range_across_siblings_uses_surround() {
        let dom = dom::parse_html("<p>alpha <b>beta</b> gamma</p>");
        let paragraph = dom::find_element(&dom.document, "p").unwrap();
        let start = first_text(&paragraph, "alpha");
        let end = first_text(&paragraph, "gamma");
        let mut annotator = HighlightAnnotator::new();

        let applied = annotator
            .apply_range(TextRange::new(start, 2, end, 3), &descriptor("sel"))
            .unwrap();

        assert_eq!(applied.strategy, WrapStrategy::Surround);
        assert_eq!(applied.text(), "pha beta ga");
        assert!(dom::find_element(&applied.element, "b").is_some());
        assert_eq!(dom::text_content(&paragraph), "alpha beta gamma");
    }

    #[test]
    fn test_range_across_element_boundary_extracts() {
        let dom = dom::parse_html("<p>one <b>two three</b> four <i>five six</i> seven</p>");
        let paragraph = dom::find_element(&dom.document, "p").unwrap();
        let before = dom::text_content(&paragraph);
        let start = first_text(&paragraph, "two");
        let end = first_text(&paragraph, "five");
        let mut annotator = HighlightAnnotator::new();

        let applied = annotator
            .apply_range(TextRange::new(start, 4, end, 4), &descriptor("sel"))
            .unwrap();

        assert_eq!(applied.strategy, WrapStrategy::ExtractAndInsert);
        assert_eq!(applied.text(), "three four five");
        assert_eq!(dom::text_content(&paragraph), before);
        // Partially selected elements are cloned into the wrapper.
        assert!(dom::find_element(&applied.element, "b").is_some());
        assert!(dom::find_element(&applied.element, "i").is_some());

        assert!(annotator.remove("sel"));
        assert_eq!(dom::text_content(&paragraph), before);
        assert_eq!(count_highlights(&dom, "sel"), 0);
    }

    #[test]
    fn test_click_shows_single_tooltip_and_outside_click_dismisses() {
        let dom = dom::parse_html("<p>olive grove</p><p>vineyard rows</p>");
        let mut annotator = HighlightAnnotator::new();
        let olive = first_text(&dom.document, "olive");
        let vine = first_text(&dom.document, "vineyard");
        let first = annotator
            .apply_range(
                TextRange::within(&olive, 0, 5),
                &HighlightDescriptor::new("a", "olive").with_explanation("Trees", 0.5),
            )
            .unwrap();
        let second = annotator
            .apply_range(
                TextRange::within(&vine, 0, 8),
                &HighlightDescriptor::new("b", "vineyard").with_explanation("Vines", 0.25),
            )
            .unwrap();

        let inner = first.element.children.borrow()[0].clone();
        assert!(annotator.dispatch(&PointerEvent::Click(inner)));
        assert!(annotator.dispatch(&PointerEvent::Click(second.element.clone())));

        let tooltips = dom::find_all(&dom.document, &|n| {
            dom::attr(n, "id").as_deref() == Some(TOOLTIP_ELEMENT_ID)
        });
        assert_eq!(tooltips.len(), 1);
        assert_eq!(dom::text_content(&tooltips[0]), "VinesRelevance: 25%");

        let elsewhere = dom::find_all(&dom.document, &|n| {
            dom::element_name(n).as_deref() == Some("p")
        })[0]
            .clone();
        assert!(annotator.dispatch(&PointerEvent::Click(elsewhere)));
        assert!(annotator.tooltips().current().is_none());
    }

    #[test]
    fn test_tooltip_auto_dismisses() {
        let dom = dom::parse_html("<p>olive grove</p>");
        let mut annotator =
            HighlightAnnotator::with_tooltips(TooltipManager::with_timeout(Duration::from_millis(30)));
        let olive = first_text(&dom.document, "olive");
        let applied = annotator
            .apply_range(TextRange::within(&olive, 0, 5), &descriptor("a"))
            .unwrap();

        annotator.dispatch(&PointerEvent::Click(applied.element.clone()));
        assert!(annotator.tooltips().is_showing_for("a"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(annotator.tick());
        assert!(dom::find_by_id(&dom.document, TOOLTIP_ELEMENT_ID).is_none());
    }

    #[test]
    fn test_hover_toggles_class() {
        let dom = dom::parse_html("<p>olive grove</p>");
        let mut annotator = HighlightAnnotator::new();
        let olive = first_text(&dom.document, "olive");
        let applied = annotator
            .apply_range(TextRange::within(&olive, 0, 5), &descriptor("a"))
            .unwrap();

        annotator.dispatch(&PointerEvent::Enter(applied.element.clone()));
        assert!(dom::has_class(&applied.element, HOVER_CLASS));
        annotator.dispatch(&PointerEvent::Leave(applied.element.clone()));
        assert!(!dom::has_class(&applied.element, HOVER_CLASS));
    }

    #[test]
    fn test_remove_dismisses_its_tooltip() {
        let dom = dom::parse_html("<p>olive grove</p>");
        let mut annotator = HighlightAnnotator::new();
        let olive = first_text(&dom.document, "olive");
        let applied = annotator
            .apply_range(TextRange::within(&olive, 0, 5), &descriptor("a"))
            .unwrap();
        annotator.dispatch(&PointerEvent::Click(applied.element.clone()));

        annotator.remove("a");
        assert!(annotator.tooltips().current().is_none());
        assert_eq!(dom::text_content(&body(&dom)), "olive grove");
    }

    #[test]
    fn test_repeated_cycles_do_not_accumulate_state() {
        let dom = dom::parse_html(COAST);
        let mut annotator = HighlightAnnotator::new();
        for _ in 0..50 {
            let index = build_index(&dom.document);
            let matches = find_best_matches("Mediterranean Coastline", &index, None);
            annotator.apply(&matches[0], &descriptor("h1")).unwrap();
            assert!(annotator.remove("h1"));
        }
        assert_eq!(annotator.active_count(), 0);
        let paragraph = dom::find_element(&dom.document, "p").unwrap();
        assert_eq!(paragraph.children.borrow().len(), 1);
    }

    #[test]
    fn test_remove_in_handles_foreign_annotations() {
        let dom = dom::parse_html(
            r#"<p>keep <span id="highlight-old" class="textmark-highlight" data-highlight-id="old">this</span> text</p>"#,
        );
        let mut annotator = HighlightAnnotator::new();
        assert!(annotator.remove_in(&dom.document, "old"));
        let paragraph = dom::find_element(&dom.document, "p").unwrap();
        assert_eq!(paragraph.children.borrow().len(), 1);
        assert_eq!(dom::text_content(&paragraph), "keep this text");
    }

    #[test]
    fn test_flash_toggles_class() {
        let dom = dom::parse_html("<p>olive grove</p>");
        let mut annotator = HighlightAnnotator::new();
        let olive = first_text(&dom.document, "olive");
        let applied = annotator
            .apply_range(TextRange::within(&olive, 0, 5), &descriptor("a"))
            .unwrap();
        applied.flash();
        assert!(dom::has_class(&applied.element, FLASH_CLASS));
        applied.clear_flash();
        assert!(!dom::has_class(&applied.element, FLASH_CLASS));
        assert!(applied.is_attached());
    }

    #[test]
    fn test_reapply_in_another_document_moves_the_highlight() {
        let first_doc = dom::parse_html("<p>olive grove</p>");
        let second_doc = dom::parse_html("<p>olive grove in a frame</p>");
        let mut annotator = HighlightAnnotator::new();
        let first = first_text(&first_doc.document, "olive");
        let second = first_text(&second_doc.document, "olive");

        annotator
            .apply_range(TextRange::within(&first, 0, 5), &descriptor("x"))
            .unwrap();
        annotator
            .apply_range(TextRange::within(&second, 0, 5), &descriptor("x"))
            .unwrap();

        assert_eq!(count_highlights(&first_doc, "x"), 0);
        assert_eq!(count_highlights(&second_doc, "x"), 1);
        assert_eq!(dom::text_content(&body(&first_doc)), "olive grove");

        assert!(annotator.remove("x"));
        assert_eq!(count_highlights(&second_doc, "x"), 0);
        assert_eq!(dom::text_content(&body(&second_doc)), "olive grove in a frame");
        assert_eq!(annotator.active_count(), 0);
    }

    #[test]
    fn test_only_annotations_are_replaced_by_id() {
        let dom = dom::parse_html(
            r#"<p>olive grove</p><p>vineyard rows</p><div id="highlight-note">author note</div>"#,
        );
        let before = dom::text_content(&body(&dom));
        let mut annotator = HighlightAnnotator::new();
        let olive = first_text(&dom.document, "olive");
        let vine = first_text(&dom.document, "vineyard");

        let first = annotator
            .apply_range(
                TextRange::within(&olive, 0, 5),
                &HighlightDescriptor::new("a", "olive").with_explanation("Trees", 0.5),
            )
            .unwrap();
        annotator.dispatch(&PointerEvent::Click(first.element.clone()));
        assert!(annotator.tooltips().is_showing_for("a"));

        annotator
            .apply_range(TextRange::within(&vine, 0, 8), &descriptor("tooltip"))
            .unwrap();
        assert!(annotator.tooltips().is_showing_for("a"));

        let note_text = first_text(&dom.document, "author");
        annotator
            .apply_range(TextRange::within(&note_text, 0, 6), &descriptor("note"))
            .unwrap();
        let note = dom::find_element(&dom.document, "div").unwrap();
        assert_eq!(dom::attr(&note, "id").as_deref(), Some("highlight-note"));

        assert!(annotator.dispatch(&PointerEvent::Click(body(&dom))));
        for id in ["a", "tooltip", "note"] {
            assert!(annotator.remove(id));
        }
        assert_eq!(dom::text_content(&body(&dom)), before);
        assert!(dom::find_by_id(&dom.document, TOOLTIP_ELEMENT_ID).is_none());
    }
}
