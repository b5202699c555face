use textmark::annotator::{HighlightState, PointerEvent, WrapStrategy};
use textmark::dom;
use textmark::frame::content_roots;
use textmark::page_locator::InlineStyleLayout;
use textmark::settings::Settings;
use textmark::{
    HighlightAnnotator, HighlightColor, HighlightDescriptor, HighlightOutcome, Highlighter,
    PageLocator, build_index, find_best_matches, parse_highlights,
};
use url::Url;

const TEXT_LAYER: &str = r#"<html><body>
<div class="page" data-page-number="1">
  <div class="textLayer">
    <span style="left: 10px; top: 40px">Chapter one introduces the region.</span>
    <span style="left: 10px; top: 60px">The Mediterranean coastline stretches for miles.</span>
  </div>
</div>
<div class="page" data-page-number="2">
  <div class="textLayer">
    <span style="left: 10px; top: 40px">Olive groves line the ancient roads.</span>
  </div>
</div>
</body></html>"#;

fn host() -> Url {
    Url::parse("https://reader.example.com/doc/42").unwrap()
}

fn quiet_settings() -> Settings {
    Settings {
        batch_delay_ms: 0,
        ..Settings::default()
    }
}

fn body_text(document: &markup5ever_rcdom::RcDom) -> String {
    let body = dom::find_element(&document.document, "body").unwrap();
    dom::text_content(&body)
}

#[test]
fn test_backend_list_is_applied_with_pages() {
    let document = dom::parse_html(TEXT_LAYER);
    let before = body_text(&document);
    let json = r#"{"highlights": [
        {"id": 1, "text": "Mediterranean Coastline", "color": "green",
         "explanation": "Geographic setting", "relevanceScore": 0.92},
        {"id": "2", "text": "olive groves", "color": "pink", "relevance_score": 0.4},
        {"id": "3", "text": "no such passage anywhere"}
    ]}"#;
    let descriptors = parse_highlights(json).unwrap();
    let roots = content_roots(&document.document, &host());
    let mut highlighter = Highlighter::new(&quiet_settings(), &host());

    let report = highlighter.highlight_all(&descriptors, &roots);

    assert_eq!(report.applied.len(), 2);
    assert_eq!(report.not_found, vec!["3".to_string()]);
    assert_eq!(report.applied[0].page, Some(1));
    assert_eq!(report.applied[0].text(), "Mediterranean coastline");
    assert_eq!(report.applied[1].page, Some(2));
    assert!(dom::has_class(&report.applied[1].element, "highlight-pink"));
    assert_eq!(body_text(&document), before);

    let html = dom::serialize_document(&document).unwrap();
    assert!(html.contains(r#"id="highlight-1""#));
    assert!(html.contains(r#"id="highlight-2""#));
}

#[test]
fn test_exact_match_offset_in_mediterranean_span() {
    let document = dom::parse_html("<p>the mediterranean coastline stretches for miles</p>");
    let index = build_index(&document.document);
    let matches = find_best_matches("Mediterranean Coastline", &index, None);

    assert_eq!(matches[0].start_offset, 4);
    assert_eq!(matches[0].confidence, 1.0);
    assert_eq!(matches[0].matched_text(), "mediterranean coastline");
}

#[test]
fn test_fragmented_span_is_not_found() {
    let document = dom::parse_html("<p><span>the mediter</span><span>ranean coast</span></p>");
    let index = build_index(&document.document);
    assert!(find_best_matches("mediterranean coastline", &index, None).is_empty());

    let roots = content_roots(&document.document, &host());
    let mut highlighter = Highlighter::new(&quiet_settings(), &host());
    let outcome = highlighter.highlight(
        &HighlightDescriptor::new("frag", "mediterranean coastline"),
        &roots,
    );
    assert!(matches!(outcome, HighlightOutcome::NotFound));
}

#[test]
fn test_shifted_reapply_leaves_single_element() {
    let document = dom::parse_html(
        "<p>the mediterranean coastline stretches for miles along the mediterranean sea</p>",
    );
    let mut annotator = HighlightAnnotator::new();
    let descriptor = HighlightDescriptor::new("m", "mediterranean").with_color(HighlightColor::Yellow);

    let index = build_index(&document.document);
    let first = find_best_matches("mediterranean coastline", &index, None);
    annotator.apply(&first[0], &descriptor).unwrap();

    let index = build_index(&document.document);
    let shifted = find_best_matches("mediterranean sea", &index, None);
    let applied = annotator.apply(&shifted[0], &descriptor).unwrap();

    let wrappers = dom::find_all(&document.document, &|node| {
        dom::attr(node, "id").as_deref() == Some("highlight-m")
    });
    assert_eq!(wrappers.len(), 1);
    assert_eq!(applied.text(), "mediterranean sea");
    assert_eq!(
        body_text(&document),
        "the mediterranean coastline stretches for miles along the mediterranean sea"
    );
}

#[test]
fn test_round_trip_remove_restores_text() {
    let document = dom::parse_html(TEXT_LAYER);
    let roots = content_roots(&document.document, &host());
    let paragraph = dom::find_first(&document.document, &|node| {
        dom::text_content(node) == "The Mediterranean coastline stretches for miles."
            && dom::element_name(node).as_deref() == Some("span")
    })
    .unwrap();
    let before = dom::text_content(&paragraph);
    let mut highlighter = Highlighter::new(&quiet_settings(), &host());

    let outcome = highlighter.highlight(
        &HighlightDescriptor::new("r", "coastline stretches"),
        &roots,
    );
    assert!(matches!(outcome, HighlightOutcome::Applied(_)));
    assert!(highlighter.remove("r"));

    assert_eq!(dom::text_content(&paragraph), before);
    assert_eq!(paragraph.children.borrow().len(), 1);
    assert_eq!(highlighter.annotator().state("r"), HighlightState::Removed);
}

#[test]
fn test_click_tooltip_shows_rounded_relevance() {
    let document = dom::parse_html(TEXT_LAYER);
    let roots = content_roots(&document.document, &host());
    let mut highlighter = Highlighter::new(&quiet_settings(), &host());
    let descriptor = HighlightDescriptor::new("t", "ancient roads").with_explanation("Old routes", 0.876);

    let HighlightOutcome::Applied(applied) = highlighter.highlight(&descriptor, &roots) else {
        panic!("highlight should apply");
    };
    assert_eq!(applied.strategy, WrapStrategy::Surround);
    assert!(highlighter.dispatch(&PointerEvent::Click(applied.element.clone())));

    let tooltip = dom::find_by_id(&document.document, "textmark-tooltip").unwrap();
    assert_eq!(dom::text_content(&tooltip), "Old routesRelevance: 88%");

    // The tooltip is not itself searchable text.
    let index = build_index(&document.document);
    assert!(find_best_matches("old routes", &index, None).is_empty());
}

#[test]
fn test_page_hint_precedence() {
    let document = dom::parse_html(TEXT_LAYER);
    let span = dom::find_element(&document.document, "span").unwrap();
    let locator = PageLocator::new(InlineStyleLayout::new(800.0));
    assert_eq!(locator.resolve_page(&span, Some(5)), 5);
    assert_eq!(locator.resolve_page(&span, None), 1);
}

#[test]
fn test_cross_origin_frame_contributes_nothing() {
    let document = dom::parse_html(
        r#"<p>host text</p><iframe src="https://elsewhere.example.org/viewer"></iframe>"#,
    );
    let loaded = dom::parse_html("<p>olive groves abroad</p>");
    let roots: Vec<_> = content_roots(&document.document, &host())
        .into_iter()
        .map(|root| match root {
            textmark::frame::ContentRoot::Frame(frame) => {
                textmark::frame::ContentRoot::Frame(frame.with_document(loaded.document.clone()))
            }
            other => other,
        })
        .collect();
    let mut highlighter = Highlighter::new(&quiet_settings(), &host());

    let outcome = highlighter.highlight(&HighlightDescriptor::new("x", "olive groves"), &roots);
    assert!(matches!(outcome, HighlightOutcome::NotFound));
}
