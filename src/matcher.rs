use log::debug;
use serde::{Deserialize, Serialize};

use crate::text_index::{NormalizedTextSpan, normalize_text};

/// Tunables for the exact-then-partial search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherOptions {
    /// Targets shorter than this (after trimming) are never searched
    pub min_target_len: usize,
    /// Largest number of consecutive target words tried in the partial phase
    pub window_words: usize,
    /// Words shorter than this are not used as partial-match anchors
    pub min_word_len: usize,
}

impl Default for MatcherOptions {
    fn default() -> Self {
        Self {
            min_target_len: 3,
            window_words: 3,
            min_word_len: 3,
        }
    }
}

/// A located range inside one indexed span. Offsets are byte offsets into the
/// span's normalized text.
#[derive(Debug, Clone)]
pub struct MatchCandidate<'a> {
    pub span: &'a NormalizedTextSpan,
    pub start_offset: usize,
    pub end_offset: usize,
    pub confidence: f64,
    pub page_hint: Option<u32>,
}

impl MatchCandidate<'_> {
    pub fn matched_text(&self) -> &str {
        &self.span.normalized_text()[self.start_offset..self.end_offset]
    }

    pub fn is_exact(&self) -> bool {
        self.confidence >= 1.0
    }
}

pub fn find_best_matches<'a>(
    target: &str,
    index: &'a [NormalizedTextSpan],
    page_hint: Option<u32>,
) -> Vec<MatchCandidate<'a>> {
    find_best_matches_with(target, index, page_hint, &MatcherOptions::default())
}

/// Finds every span containing the target, exactly or partially, best first.
/// Equal confidences keep document order.
pub fn find_best_matches_with<'a>(
    target: &str,
    index: &'a [NormalizedTextSpan],
    page_hint: Option<u32>,
    options: &MatcherOptions,
) -> Vec<MatchCandidate<'a>> {
    if target.trim().chars().count() < options.min_target_len {
        debug!("Target {target:?} too short to search");
        return Vec::new();
    }
    let normalized_target = normalize_text(target);
    if normalized_target.is_empty() {
        return Vec::new();
    }
    let anchors: Vec<&str> = normalized_target
        .split_whitespace()
        .filter(|word| word.chars().count() >= options.min_word_len)
        .collect();

    let mut candidates = Vec::new();
    for span in index {
        let text = span.normalized_text();
        if let Some(start) = text.find(&normalized_target) {
            candidates.push(MatchCandidate {
                span,
                start_offset: start,
                end_offset: start + normalized_target.len(),
                confidence: 1.0,
                page_hint,
            });
            continue;
        }

        if let Some((start, len)) = longest_window(text, &anchors, options.window_words) {
            candidates.push(MatchCandidate {
                span,
                start_offset: start,
                end_offset: start + len,
                confidence: len as f64 / normalized_target.len() as f64,
                page_hint,
            });
        }
    }

    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    debug!(
        "Search for {:?} over {} spans found {} candidates (best {:.2})",
        normalized_target,
        index.len(),
        candidates.len(),
        candidates.first().map(|c| c.confidence).unwrap_or(0.0)
    );
    candidates
}

/// Longest run of up to `max_words` consecutive anchors present in `text` on
/// word boundaries. Equal lengths resolve to the leftmost offset in `text`.
fn longest_window(text: &str, anchors: &[&str], max_words: usize) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;

    for start in 0..anchors.len() {
        let widest = max_words.min(anchors.len() - start);
        for width in (1..=widest).rev() {
            let phrase = anchors[start..start + width].join(" ");
            let Some(offset) = find_word_bounded(text, &phrase) else {
                continue;
            };
            let better = match best {
                None => true,
                Some((best_offset, best_len)) => {
                    phrase.len() > best_len || (phrase.len() == best_len && offset < best_offset)
                }
            };
            if better {
                best = Some((offset, phrase.len()));
            }
            // Narrower windows from the same start can only be shorter.
            break;
        }
    }

    best
}

fn find_word_bounded(text: &str, needle: &str) -> Option<usize> {
    text.match_indices(needle).map(|(offset, _)| offset).find(|&offset| {
        let before = text[..offset].chars().next_back();
        let after = text[offset + needle.len()..].chars().next();
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}
