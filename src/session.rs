//! Caller-side orchestration: search every accessible root, apply the best
//! candidate found in any of them, resolve its page, and retry once when the DOM
//! moved under the match.

use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use url::{Origin, Url};

use crate::annotator::{AnnotateError, AppliedHighlight, HighlightAnnotator, PointerEvent};
use crate::frame::ContentRoot;
use crate::highlight::HighlightDescriptor;
use crate::matcher::{MatchCandidate, MatcherOptions, find_best_matches_with};
use crate::page_locator::{InlineStyleLayout, LayoutMetrics, PageLocator};
use crate::ready::{ReadyError, ReadySignal};
use crate::settings::Settings;
use crate::text_index::{NormalizedTextSpan, build_index};
use crate::tooltip::TooltipManager;

#[derive(Debug)]
pub enum HighlightOutcome {
    Applied(AppliedHighlight),
    NotFound,
    Failed(AnnotateError),
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub applied: Vec<AppliedHighlight>,
    pub not_found: Vec<String>,
    pub failed: Vec<(String, AnnotateError)>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.applied.len() + self.not_found.len() + self.failed.len()
    }
}

pub struct Highlighter<L: LayoutMetrics = InlineStyleLayout> {
    annotator: HighlightAnnotator,
    locator: PageLocator<L>,
    host: Origin,
    matcher: MatcherOptions,
    retries: u32,
    batch_delay: Duration,
    ready_timeout: Duration,
}

impl Highlighter<InlineStyleLayout> {
    pub fn new(settings: &Settings, host: &Url) -> Self {
        Self::with_layout(
            settings,
            host,
            InlineStyleLayout::new(settings.viewport_height),
        )
    }
}

impl<L: LayoutMetrics> Highlighter<L> {
    pub fn with_layout(settings: &Settings, host: &Url, layout: L) -> Self {
        Self {
            annotator: HighlightAnnotator::with_tooltips(TooltipManager::with_timeout(
                settings.tooltip_timeout(),
            )),
            locator: PageLocator::new(layout),
            host: host.origin(),
            matcher: settings.matcher,
            retries: settings.range_failure_retries,
            batch_delay: settings.batch_delay(),
            ready_timeout: settings.ready_timeout(),
        }
    }

    /// Finds and highlights `descriptor.text` in whichever root holds the best
    /// match. Inaccessible roots are skipped.
    pub fn highlight(
        &mut self,
        descriptor: &HighlightDescriptor,
        roots: &[ContentRoot],
    ) -> HighlightOutcome {
        let mut last_error = None;
        for attempt in 0..=self.retries {
            match self.try_roots(descriptor, roots) {
                Ok(Some(applied)) => return HighlightOutcome::Applied(applied),
                Ok(None) => {
                    debug!("No match for highlight {}", descriptor.id);
                    return HighlightOutcome::NotFound;
                }
                Err(e) => {
                    warn!(
                        "Highlight {} failed on attempt {}: {e}",
                        descriptor.id,
                        attempt + 1
                    );
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => HighlightOutcome::Failed(e),
            None => HighlightOutcome::NotFound,
        }
    }

    fn try_roots(
        &mut self,
        descriptor: &HighlightDescriptor,
        roots: &[ContentRoot],
    ) -> Result<Option<AppliedHighlight>, AnnotateError> {
        let indexes: Vec<Vec<NormalizedTextSpan>> = roots
            .iter()
            .filter_map(|root| root.accessible_node(&self.host))
            .map(|node| build_index(&node))
            .collect();

        // Best candidate over all roots; earlier roots win ties.
        let mut best: Option<MatchCandidate<'_>> = None;
        for index in &indexes {
            let Some(candidate) =
                find_best_matches_with(&descriptor.text, index, descriptor.page, &self.matcher)
                    .into_iter()
                    .next()
            else {
                continue;
            };
            if best
                .as_ref()
                .is_none_or(|current| candidate.confidence > current.confidence)
            {
                best = Some(candidate);
            }
            if best.as_ref().is_some_and(MatchCandidate::is_exact) {
                break;
            }
        }
        let Some(best) = best else {
            return Ok(None);
        };

        let page = match best.span.owning_element() {
            Some(element) => self.locator.resolve_page(&element, best.page_hint),
            None => best.page_hint.unwrap_or(1),
        };
        let resolved = HighlightDescriptor {
            page: Some(page),
            ..descriptor.clone()
        };
        debug!(
            "Applying highlight {} on page {page} with confidence {:.2}",
            descriptor.id, best.confidence
        );
        self.annotator.apply(&best, &resolved).map(Some)
    }

    /// Applies every descriptor in order, pausing between them.
    pub fn highlight_all(
        &mut self,
        descriptors: &[HighlightDescriptor],
        roots: &[ContentRoot],
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for (i, descriptor) in descriptors.iter().enumerate() {
            if i > 0 && !self.batch_delay.is_zero() {
                thread::sleep(self.batch_delay);
            }
            match self.highlight(descriptor, roots) {
                HighlightOutcome::Applied(applied) => report.applied.push(applied),
                HighlightOutcome::NotFound => report.not_found.push(descriptor.id.clone()),
                HighlightOutcome::Failed(e) => report.failed.push((descriptor.id.clone(), e)),
            }
        }
        info!(
            "Applied {} of {} highlights ({} not found, {} failed)",
            report.applied.len(),
            report.total(),
            report.not_found.len(),
            report.failed.len()
        );
        report
    }

    /// Waits for the viewer before applying the batch.
    pub fn highlight_all_when_ready(
        &mut self,
        ready: &ReadySignal,
        descriptors: &[HighlightDescriptor],
        roots: &[ContentRoot],
    ) -> Result<BatchReport, ReadyError> {
        ready.wait(self.ready_timeout)?;
        Ok(self.highlight_all(descriptors, roots))
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.annotator.remove(id)
    }

    pub fn dispatch(&mut self, event: &PointerEvent) -> bool {
        self.annotator.dispatch(event)
    }

    pub fn tick(&mut self) -> bool {
        self.annotator.tick()
    }

    pub fn annotator(&self) -> &HighlightAnnotator {
        &self.annotator
    }
}
