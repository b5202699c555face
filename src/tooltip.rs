use std::time::{Duration, Instant};

use log::debug;
use markup5ever_rcdom::Handle;

use crate::dom;

pub const TOOLTIP_TIMEOUT: Duration = Duration::from_secs(5);
pub const TOOLTIP_ELEMENT_ID: &str = "textmark-tooltip";
/// Marks the tooltip subtree so the text index never searches it.
pub const TOOLTIP_MARKER_ATTR: &str = "data-textmark-tooltip";

#[derive(Debug, Clone)]
pub struct Tooltip {
    pub highlight_id: String,
    pub element: Handle,
    pub created_at: Instant,
    pub expires_at: Instant,
}

impl Tooltip {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub fn time_remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn text(&self) -> String {
        dom::text_content(&self.element)
    }
}

/// Owns the single transient tooltip shown for a clicked highlight.
#[derive(Debug)]
pub struct TooltipManager {
    current: Option<Tooltip>,
    timeout: Duration,
}

impl Default for TooltipManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TooltipManager {
    pub fn new() -> Self {
        Self::with_timeout(TOOLTIP_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            current: None,
            timeout,
        }
    }

    /// Shows a tooltip for `highlight_id` inside `container`, replacing any
    /// tooltip that is already visible.
    pub fn show(
        &mut self,
        container: &Handle,
        highlight_id: &str,
        explanation: &str,
        relevance_percent: u32,
    ) -> Handle {
        self.dismiss();

        let element = dom::create_element(
            "div",
            &[
                ("id", TOOLTIP_ELEMENT_ID),
                ("class", "highlight-tooltip"),
                ("role", "tooltip"),
                ("data-highlight-id", highlight_id),
                (TOOLTIP_MARKER_ATTR, ""),
            ],
        );
        let body = dom::create_element("div", &[("class", "highlight-tooltip-explanation")]);
        dom::append_child(&body, &dom::create_text(explanation));
        let score = dom::create_element("div", &[("class", "highlight-tooltip-score")]);
        dom::append_child(
            &score,
            &dom::create_text(&format!("Relevance: {relevance_percent}%")),
        );
        dom::append_child(&element, &body);
        dom::append_child(&element, &score);
        dom::append_child(container, &element);

        let now = Instant::now();
        self.current = Some(Tooltip {
            highlight_id: highlight_id.to_string(),
            element: element.clone(),
            created_at: now,
            expires_at: now + self.timeout,
        });
        debug!("Showing tooltip for highlight {highlight_id}");
        element
    }

    /// Removes the visible tooltip, returns true if there was one.
    pub fn dismiss(&mut self) -> bool {
        match self.current.take() {
            Some(tooltip) => {
                dom::detach(&tooltip.element);
                true
            }
            None => false,
        }
    }

    /// Dismisses the tooltip if it belongs to `highlight_id`.
    pub fn dismiss_for(&mut self, highlight_id: &str) -> bool {
        if self.is_showing_for(highlight_id) {
            self.dismiss()
        } else {
            false
        }
    }

    /// Dismisses on a click that landed outside the tooltip.
    pub fn handle_outside_click(&mut self, target: &Handle) -> bool {
        let inside = self
            .current
            .as_ref()
            .is_some_and(|tooltip| dom::contains(&tooltip.element, target));
        if inside { false } else { self.dismiss() }
    }

    /// Drops an expired tooltip, returns true if one was removed.
    pub fn update(&mut self) -> bool {
        if self.current.as_ref().is_some_and(Tooltip::is_expired) {
            self.dismiss()
        } else {
            false
        }
    }

    pub fn current(&self) -> Option<&Tooltip> {
        self.current.as_ref()
    }

    pub fn is_showing_for(&self, highlight_id: &str) -> bool {
        self.current
            .as_ref()
            .is_some_and(|tooltip| tooltip.highlight_id == highlight_id)
    }
}
