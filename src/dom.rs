//! Thin DOM layer over `markup5ever_rcdom`.
//!
//! The viewer content the engine searches is an html5ever-parsed tree. Nodes are
//! reference counted and owned by whoever parsed the document; everything here
//! only reads, splits or re-parents nodes, it never keeps them alive on its own.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use anyhow::{Context, Result};
use html5ever::serialize::{SerializeOpts, serialize};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{Attribute, LocalName, Namespace, QualName, parse_document};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom, SerializableHandle};

/// An externally owned node of rendered content.
pub type ContentNode = Handle;

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

pub fn parse_html(html: &str) -> RcDom {
    parse_document(RcDom::default(), Default::default()).one(html)
}

pub fn serialize_document(dom: &RcDom) -> Result<String> {
    serialize_node(&dom.document)
}

/// Serializes the children of `node` back to HTML.
pub fn serialize_node(node: &Handle) -> Result<String> {
    let mut bytes = Vec::new();
    let handle: SerializableHandle = node.clone().into();
    serialize(&mut bytes, &handle, SerializeOpts::default()).context("Failed to serialize DOM")?;
    String::from_utf8(bytes).context("Serialized DOM is not valid UTF-8")
}

pub fn parent(node: &Handle) -> Option<Handle> {
    let weak = node.parent.take();
    let parent = weak.as_ref().and_then(Weak::upgrade);
    node.parent.set(weak);
    parent
}

/// Iterates `node` and then each of its ancestors up to the document.
pub fn ancestors_inclusive(node: &Handle) -> impl Iterator<Item = Handle> {
    std::iter::successors(Some(node.clone()), parent)
}

/// Top-most ancestor, normally the document node.
pub fn root_of(node: &Handle) -> Handle {
    ancestors_inclusive(node)
        .last()
        .unwrap_or_else(|| node.clone())
}

/// True while `node` is still reachable from a document node.
pub fn is_attached(node: &Handle) -> bool {
    matches!(root_of(node).data, NodeData::Document)
}

pub fn is_text(node: &Handle) -> bool {
    matches!(node.data, NodeData::Text { .. })
}

pub fn text_of(node: &Handle) -> Option<String> {
    match node.data {
        NodeData::Text { ref contents } => Some(contents.borrow().to_string()),
        _ => None,
    }
}

pub fn set_text(node: &Handle, text: &str) {
    if let NodeData::Text { ref contents } = node.data {
        *contents.borrow_mut() = StrTendril::from_slice(text);
    }
}

/// Concatenated text of every descendant text node, like DOM `textContent`.
pub fn text_content(node: &Handle) -> String {
    let mut out = String::new();
    collect_text(node, &mut out);
    out
}

fn collect_text(node: &Handle, out: &mut String) {
    if let NodeData::Text { ref contents } = node.data {
        out.push_str(&contents.borrow());
        return;
    }
    for child in node.children.borrow().iter() {
        collect_text(child, out);
    }
}

pub fn element_name(node: &Handle) -> Option<String> {
    match node.data {
        NodeData::Element { ref name, .. } => Some(name.local.to_string()),
        _ => None,
    }
}

pub fn attr(node: &Handle, name: &str) -> Option<String> {
    match node.data {
        NodeData::Element { ref attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|attr| attr.name.local.as_ref() == name)
            .map(|attr| attr.value.to_string()),
        _ => None,
    }
}

pub fn set_attr(node: &Handle, name: &str, value: &str) {
    if let NodeData::Element { ref attrs, .. } = node.data {
        let mut attrs = attrs.borrow_mut();
        match attrs.iter_mut().find(|attr| attr.name.local.as_ref() == name) {
            Some(existing) => existing.value = StrTendril::from_slice(value),
            None => attrs.push(attribute(name, value)),
        }
    }
}

pub fn classes(node: &Handle) -> Vec<String> {
    attr(node, "class")
        .map(|class| class.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

pub fn has_class(node: &Handle, class: &str) -> bool {
    classes(node).iter().any(|c| c == class)
}

pub fn add_class(node: &Handle, class: &str) {
    let mut current = classes(node);
    if !current.iter().any(|c| c == class) {
        current.push(class.to_string());
        set_attr(node, "class", &current.join(" "));
    }
}

pub fn remove_class(node: &Handle, class: &str) {
    let current = classes(node);
    if current.iter().any(|c| c == class) {
        let kept: Vec<String> = current.into_iter().filter(|c| c != class).collect();
        set_attr(node, "class", &kept.join(" "));
    }
}

fn attribute(name: &str, value: &str) -> Attribute {
    Attribute {
        name: QualName::new(None, Namespace::from(""), LocalName::from(name)),
        value: StrTendril::from_slice(value),
    }
}

pub fn create_element(tag: &str, attrs: &[(&str, &str)]) -> Handle {
    Node::new(NodeData::Element {
        name: QualName::new(None, Namespace::from(HTML_NAMESPACE), LocalName::from(tag)),
        attrs: RefCell::new(attrs.iter().map(|(k, v)| attribute(k, v)).collect()),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    })
}

pub fn create_text(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from_slice(text)),
    })
}

/// Copies an element without its children.
pub fn shallow_clone(node: &Handle) -> Option<Handle> {
    match node.data {
        NodeData::Element {
            ref name,
            ref attrs,
            mathml_annotation_xml_integration_point,
            ..
        } => Some(Node::new(NodeData::Element {
            name: name.clone(),
            attrs: RefCell::new(attrs.borrow().clone()),
            template_contents: RefCell::new(None),
            mathml_annotation_xml_integration_point,
        })),
        NodeData::Text { ref contents } => Some(create_text(&contents.borrow())),
        _ => None,
    }
}

pub fn index_in_parent(node: &Handle) -> Option<usize> {
    let parent = parent(node)?;
    let children = parent.children.borrow();
    children.iter().position(|child| Rc::ptr_eq(child, node))
}

pub fn detach(node: &Handle) {
    if let Some(parent) = parent(node) {
        parent
            .children
            .borrow_mut()
            .retain(|child| !Rc::ptr_eq(child, node));
    }
    node.parent.set(None);
}

pub fn insert_at(parent: &Handle, index: usize, child: &Handle) {
    detach(child);
    child.parent.set(Some(Rc::downgrade(parent)));
    let mut children = parent.children.borrow_mut();
    let index = index.min(children.len());
    children.insert(index, child.clone());
}

pub fn append_child(parent: &Handle, child: &Handle) {
    let len = parent.children.borrow().len();
    insert_at(parent, len, child);
}

pub fn insert_after(reference: &Handle, child: &Handle) -> bool {
    match (parent(reference), index_in_parent(reference)) {
        (Some(parent), Some(index)) => {
            insert_at(&parent, index + 1, child);
            true
        }
        _ => false,
    }
}

/// Merges runs of adjacent text nodes throughout the subtree, like DOM
/// `normalize()`.
pub fn normalize(node: &Handle) {
    merge_adjacent_text(node);
    let children: Vec<Handle> = node.children.borrow().clone();
    for child in children.iter().filter(|child| !is_text(child)) {
        normalize(child);
    }
}

/// Merges each run of adjacent text children of `node` into the first node of
/// the run and drops runs whose merged text is empty.
pub fn merge_adjacent_text(node: &Handle) {
    let children: Vec<Handle> = node.children.borrow().clone();
    let mut run_head: Option<Handle> = None;
    let mut merged = String::new();

    for child in children {
        if is_text(&child) {
            merged.push_str(&text_of(&child).unwrap_or_default());
            match run_head {
                Some(_) => detach(&child),
                None => run_head = Some(child),
            }
        } else {
            finish_run(run_head.take(), &mut merged);
        }
    }
    finish_run(run_head, &mut merged);
}

fn finish_run(head: Option<Handle>, merged: &mut String) {
    if let Some(head) = head {
        if merged.is_empty() {
            detach(&head);
        } else {
            set_text(&head, merged);
        }
    }
    merged.clear();
}

/// Pre-order search for the first node matching `predicate`.
pub fn find_first(root: &Handle, predicate: &dyn Fn(&Handle) -> bool) -> Option<Handle> {
    if predicate(root) {
        return Some(root.clone());
    }
    root.children
        .borrow()
        .iter()
        .find_map(|child| find_first(child, predicate))
}

pub fn find_all(root: &Handle, predicate: &dyn Fn(&Handle) -> bool) -> Vec<Handle> {
    let mut found = Vec::new();
    collect_matching(root, predicate, &mut found);
    found
}

fn collect_matching(node: &Handle, predicate: &dyn Fn(&Handle) -> bool, found: &mut Vec<Handle>) {
    if predicate(node) {
        found.push(node.clone());
    }
    for child in node.children.borrow().iter() {
        collect_matching(child, predicate, found);
    }
}

pub fn find_by_id(root: &Handle, id: &str) -> Option<Handle> {
    find_first(root, &|node| attr(node, "id").as_deref() == Some(id))
}

pub fn find_element(root: &Handle, tag: &str) -> Option<Handle> {
    find_first(root, &|node| element_name(node).as_deref() == Some(tag))
}

/// The `<body>` of the document `node` lives in, or its root when there is none.
pub fn body_of(node: &Handle) -> Handle {
    let root = root_of(node);
    find_element(&root, "body").unwrap_or(root)
}

pub fn contains(ancestor: &Handle, node: &Handle) -> bool {
    ancestors_inclusive(node).any(|candidate| Rc::ptr_eq(&candidate, ancestor))
}

/// Deepest node that contains both `a` and `b`.
pub fn common_ancestor(a: &Handle, b: &Handle) -> Option<Handle> {
    let chain: Vec<Handle> = ancestors_inclusive(a).collect();
    ancestors_inclusive(b).find(|candidate| chain.iter().any(|n| Rc::ptr_eq(n, candidate)))
}

/// Child indices from the root down to `node`; comparing two paths compares
/// document order.
pub fn tree_path(node: &Handle) -> Vec<usize> {
    let mut path: Vec<usize> = ancestors_inclusive(node)
        .map_while(|n| index_in_parent(&n))
        .collect();
    path.reverse();
    path
}
