//! Content roots and embedded frame documents.
//!
//! Viewers render text either straight into the host page or into an embedded
//! frame. A frame's document is only searched when the host may access it:
//! same origin, or an `about:` document such as `srcdoc`.

use std::rc::{Rc, Weak};

use anyhow::Result;
use log::debug;
use markup5ever_rcdom::{Handle, Node};
use url::{Origin, Url};

use crate::dom;

const FRAME_TAGS: &[&str] = &["iframe", "frame"];
const SRCDOC_URL: &str = "about:srcdoc";

/// A frame element found in the content, with its document when one is loaded.
#[derive(Debug, Clone)]
pub struct FrameDocument {
    pub src: Url,
    document: Option<Handle>,
    element: Weak<Node>,
}

impl FrameDocument {
    /// Lists the frames under `root`. `srcdoc` frames are parsed right away;
    /// `src` frames are resolved against `base` and carry no document until the
    /// caller supplies one with [`FrameDocument::with_document`].
    pub fn discover(root: &Handle, base: &Url) -> Vec<FrameDocument> {
        let frames = dom::find_all(root, &|node| {
            dom::element_name(node).is_some_and(|name| FRAME_TAGS.contains(&name.as_str()))
        });

        frames
            .iter()
            .filter_map(|element| {
                if let Some(srcdoc) = dom::attr(element, "srcdoc") {
                    let src = Url::parse(SRCDOC_URL).ok()?;
                    let parsed = dom::parse_html(&srcdoc);
                    return Some(FrameDocument {
                        src,
                        document: Some(parsed.document.clone()),
                        element: Rc::downgrade(element),
                    });
                }
                let raw = dom::attr(element, "src")?;
                match base.join(raw.trim()) {
                    Ok(src) => Some(FrameDocument {
                        src,
                        document: None,
                        element: Rc::downgrade(element),
                    }),
                    Err(e) => {
                        debug!("Skipping frame with unusable src {raw:?}: {e}");
                        None
                    }
                }
            })
            .collect()
    }

    pub fn with_document(mut self, document: Handle) -> Self {
        self.document = Some(document);
        self
    }

    pub fn is_srcdoc(&self) -> bool {
        self.src.as_str() == SRCDOC_URL
    }

    pub fn element(&self) -> Option<Handle> {
        self.element.upgrade()
    }

    /// Writes an annotated `srcdoc` document back into its frame element.
    /// Returns false for frames whose content lives elsewhere.
    pub fn write_back(&self) -> Result<bool> {
        let (Some(document), Some(element)) = (&self.document, self.element()) else {
            return Ok(false);
        };
        if !self.is_srcdoc() {
            return Ok(false);
        }
        let html = dom::serialize_node(document)?;
        dom::set_attr(&element, "srcdoc", &html);
        Ok(true)
    }
}

/// Returns the frame's document when the host may read it, `None` otherwise.
pub fn try_access_foreign_document(host: &Origin, frame: &FrameDocument) -> Option<Handle> {
    let document = frame.document.as_ref()?;
    if frame.src.scheme() == "about" || frame.src.origin() == *host {
        return Some(document.clone());
    }
    debug!(
        "Frame {} is cross-origin to {}, not searching it",
        frame.src,
        host.ascii_serialization()
    );
    None
}

/// A place highlight text may be found in.
#[derive(Debug, Clone)]
pub enum ContentRoot {
    Element(Handle),
    Frame(FrameDocument),
}

impl ContentRoot {
    /// The node to index, or `None` when the root is not accessible.
    pub fn accessible_node(&self, host: &Origin) -> Option<Handle> {
        match self {
            ContentRoot::Element(node) => Some(node.clone()),
            ContentRoot::Frame(frame) => try_access_foreign_document(host, frame),
        }
    }
}

/// The primary root followed by every frame discovered under it.
pub fn content_roots(primary: &Handle, base: &Url) -> Vec<ContentRoot> {
    std::iter::once(ContentRoot::Element(primary.clone()))
        .chain(
            FrameDocument::discover(primary, base)
                .into_iter()
                .map(ContentRoot::Frame),
        )
        .collect()
}
