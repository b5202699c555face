pub mod annotator;
pub mod dom;
pub mod frame;
pub mod highlight;
pub mod logging;
pub mod matcher;
pub mod page_locator;
pub mod panic_handler;
pub mod ready;
pub mod session;
pub mod settings;
pub mod text_index;
pub mod tooltip;

pub use annotator::{AnnotateError, AppliedHighlight, HighlightAnnotator, PointerEvent, TextRange};
pub use highlight::{HighlightColor, HighlightDescriptor, parse_highlights};
pub use matcher::{MatchCandidate, find_best_matches};
pub use page_locator::PageLocator;
pub use session::{HighlightOutcome, Highlighter};
pub use text_index::{NormalizedTextSpan, build_index};
