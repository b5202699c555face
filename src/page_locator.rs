use std::sync::LazyLock;

use log::debug;
use markup5ever_rcdom::Handle;
use regex::Regex;

use crate::dom;

static PAGE_CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)page-(\d+)(?:\s|$)").expect("Failed to compile page class regex")
});
static STYLE_TOP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|;)\s*top\s*:\s*(-?\d+(?:\.\d+)?)px")
        .expect("Failed to compile style top regex")
});

/// Attributes that carry a page number, checked in order on every ancestor.
const PAGE_ATTRIBUTES: &[&str] = &["data-page", "data-page-number", "page"];

/// Geometry of the rendered content, as far as the host can tell.
pub trait LayoutMetrics {
    /// Distance from the top of the scrollable content to `element`.
    fn top_offset(&self, element: &Handle) -> Option<f64>;

    fn viewport_height(&self) -> f64;
}

/// Reads absolute positions from inline `top: Npx` styles, the way text layers
/// of PDF viewers position their spans.
#[derive(Debug, Clone, Copy)]
pub struct InlineStyleLayout {
    viewport_height: f64,
}

impl InlineStyleLayout {
    pub fn new(viewport_height: f64) -> Self {
        Self { viewport_height }
    }
}

impl LayoutMetrics for InlineStyleLayout {
    fn top_offset(&self, element: &Handle) -> Option<f64> {
        let tops: Vec<f64> = dom::ancestors_inclusive(element)
            .filter_map(|node| dom::attr(&node, "style"))
            .filter_map(|style| {
                STYLE_TOP_RE
                    .captures(&style)
                    .and_then(|caps| caps[1].parse::<f64>().ok())
            })
            .collect();
        if tops.is_empty() {
            None
        } else {
            Some(tops.iter().sum())
        }
    }

    fn viewport_height(&self) -> f64 {
        self.viewport_height
    }
}

pub struct PageLocator<L: LayoutMetrics> {
    layout: L,
}

impl<L: LayoutMetrics> PageLocator<L> {
    pub fn new(layout: L) -> Self {
        Self { layout }
    }

    /// Best-effort page number for `element`. A caller-supplied hint always wins;
    /// the geometric fallback is an estimate.
    pub fn resolve_page(&self, element: &Handle, hint: Option<u32>) -> u32 {
        if let Some(page) = hint {
            return page;
        }

        let start = if dom::is_text(element) {
            dom::parent(element).unwrap_or_else(|| element.clone())
        } else {
            element.clone()
        };

        if let Some(page) = dom::ancestors_inclusive(&start).find_map(|node| structural_page(&node))
        {
            return page;
        }

        let page = self.geometric_page(&start);
        debug!("No page markup found, estimated page {page} from layout");
        page
    }

    fn geometric_page(&self, element: &Handle) -> u32 {
        let height = self.layout.viewport_height();
        let top = self.layout.top_offset(element).unwrap_or(0.0);
        if height <= 0.0 || !top.is_finite() {
            return 1;
        }
        let page = (top / height).floor() + 1.0;
        if page < 1.0 { 1 } else { page as u32 }
    }
}

fn structural_page(node: &Handle) -> Option<u32> {
    PAGE_ATTRIBUTES
        .iter()
        .filter_map(|name| dom::attr(node, name))
        .find_map(|value| parse_page(&value))
        .or_else(|| {
            let class = dom::attr(node, "class")?;
            let caps = PAGE_CLASS_RE.captures(&class)?;
            parse_page(&caps[1])
        })
}

fn parse_page(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok().filter(|page| *page >= 1)
}
