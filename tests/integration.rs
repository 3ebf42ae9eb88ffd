//! Integration tests for the full layout pipeline.
//!
//! These exercise the path from a built FO tree to the finished area tree:
//! pagination, keeps and breaks, table header repetition, footnote
//! reservation, markers in static content, citations, and idempotence.

use folio::area::{Area, AreaTree, RegionKind};
use folio::fo::{FoKind, FoTreeBuilder};
use folio::{layout, layout_with_diagnostics, LayoutOptions};

// ─── Helpers ────────────────────────────────────────────────────

/// Open root + an A4 master (72pt margins) named "page", leaving the
/// builder ready for page-sequence content.
fn open_document(b: &mut FoTreeBuilder) {
    b.open(FoKind::Root);
    b.open(FoKind::LayoutMasterSet);
    b.open(FoKind::SimplePageMaster);
    b.attribute("master-name", "page");
    b.attribute("page-width", "595pt");
    b.attribute("page-height", "842pt");
    b.attribute("margin", "72pt");
    b.open(FoKind::RegionBody);
    b.close();
    b.close();
    b.close();
}

fn open_sequence(b: &mut FoTreeBuilder) {
    b.open(FoKind::PageSequence);
    b.attribute("master-reference", "page");
    b.open(FoKind::Flow);
    b.attribute("flow-name", "xsl-region-body");
}

fn close_document(b: &mut FoTreeBuilder) {
    b.close(); // flow
    b.close(); // page-sequence
    b.close(); // root
}

fn block(b: &mut FoTreeBuilder, text: &str, attrs: &[(&str, &str)]) {
    b.open(FoKind::Block);
    for (k, v) in attrs {
        b.attribute(k, v);
    }
    b.text(text);
    b.close();
}

/// A fixed-height filler that consumes vertical space deterministically.
fn filler(b: &mut FoTreeBuilder, height: &str) {
    b.open(FoKind::BlockContainer);
    b.attribute("height", height);
    b.open(FoKind::Block);
    b.text("filler");
    b.close();
    b.close();
}

fn words(n: usize, prefix: &str) -> String {
    (1..=n)
        .map(|i| format!("{prefix}{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn page_text(tree: &AreaTree, page: usize) -> String {
    tree.pages[page].text()
}

/// Base-14 metrics only: system font discovery would make page-count
/// expectations depend on the host machine.
fn options() -> LayoutOptions {
    LayoutOptions {
        enable_font_fallback: false,
        ..Default::default()
    }
}

// ─── Scenario: hello world ──────────────────────────────────────

#[test]
fn hello_world_centered() {
    let mut b = FoTreeBuilder::new();
    open_document(&mut b);
    open_sequence(&mut b);
    b.open(FoKind::Block);
    b.attribute("font-family", "Helvetica");
    b.attribute("font-size", "24pt");
    b.attribute("text-align", "center");
    b.text("Hello");
    b.close();
    close_document(&mut b);
    let tree = b.finish().unwrap();

    let result = layout(&tree, &options()).unwrap();
    assert_eq!(result.pages.len(), 1);

    let runs = result.pages[0].glyph_runs();
    assert_eq!(runs.len(), 1);
    let run = runs[0];
    assert_eq!(run.text, "Hello");

    // Helvetica "Hello" is 2278/1000 em = 54.672pt at 24pt.
    assert!((run.width - 54.672).abs() < 0.1, "width {}", run.width);

    // Horizontally centered in the 451pt content width.
    let expected_x = 72.0 + (451.0 - 54.672) / 2.0;
    assert!((run.x - expected_x).abs() < 0.5, "x {}", run.x);

    // Baseline lands near 72 + 24*0.8 (ascent + half-leading).
    assert!(
        (85.0..97.0).contains(&run.y),
        "baseline {} out of range",
        run.y
    );
}

// ─── Scenario: multi-page flow ──────────────────────────────────

#[test]
fn multi_page_flow_chapter_order() {
    let mut b = FoTreeBuilder::new();
    open_document(&mut b);
    open_sequence(&mut b);
    for chapter in 1..=5 {
        block(
            &mut b,
            &format!("Chapter {chapter}"),
            &[("font-size", "12pt"), ("font-weight", "bold")],
        );
        block(
            &mut b,
            &words(120, &format!("c{chapter}w")),
            &[("font-size", "12pt")],
        );
    }
    close_document(&mut b);
    let tree = b.finish().unwrap();

    let result = layout(&tree, &options()).unwrap();
    assert_eq!(result.pages.len(), 2, "expected exactly two pages");

    let first = page_text(&result, 0);
    assert!(first.contains("Chapter 1"));
    assert!(first.contains("Chapter 2"));

    // Chapter 5 finishes on page 2.
    let last = page_text(&result, 1);
    assert!(last.contains("c5w120"));

    // Pages number contiguously from 1.
    for (i, page) in result.pages.iter().enumerate() {
        assert_eq!(page.number, i as u32 + 1);
    }
}

// ─── Scenario: multi-page table ─────────────────────────────────

#[test]
fn multi_page_table_repeats_header() {
    let mut b = FoTreeBuilder::new();
    open_document(&mut b);
    open_sequence(&mut b);
    b.open(FoKind::Table);
    b.open(FoKind::TableHeader);
    b.open(FoKind::TableRow);
    b.attribute("height", "20pt");
    b.open(FoKind::TableCell);
    block(&mut b, "Head", &[]);
    b.close();
    b.close();
    b.close();
    b.open(FoKind::TableBody);
    for i in 1..=100 {
        b.open(FoKind::TableRow);
        b.attribute("height", "20pt");
        b.open(FoKind::TableCell);
        block(&mut b, &format!("r{i}"), &[]);
        b.close();
        b.close();
    }
    b.close();
    b.close();
    close_document(&mut b);
    let tree = b.finish().unwrap();

    let result = layout(&tree, &options()).unwrap();
    // 698pt region, 20pt rows: 33 body rows beside a header per page.
    assert_eq!(result.pages.len(), 4, "got {} pages", result.pages.len());

    let mut seen_rows = 0;
    for (i, page) in result.pages.iter().enumerate() {
        let text = page.text();
        assert!(text.contains("Head"), "page {} lost the header", i + 1);

        // The header sits at the top of the table content on every page.
        let runs = page.glyph_runs();
        let head_y = runs.iter().find(|r| r.text == "Head").unwrap().y;
        let min_row_y = runs
            .iter()
            .filter(|r| r.text.starts_with('r'))
            .map(|r| r.y)
            .fold(f64::INFINITY, f64::min);
        assert!(head_y <= min_row_y, "header below first row on page {}", i + 1);

        seen_rows += runs.iter().filter(|r| r.text.starts_with('r')).count();
    }
    // No row was lost or split.
    assert_eq!(seen_rows, 100);
}

// ─── Scenario: keep-with-next heading ───────────────────────────

#[test]
fn keep_with_next_migrates_heading() {
    let mut b = FoTreeBuilder::new();
    open_document(&mut b);
    open_sequence(&mut b);
    // Leave room for the heading plus a single line only.
    filler(&mut b, "669pt");
    block(
        &mut b,
        "Heading",
        &[("keep-with-next", "always"), ("font-size", "12pt")],
    );
    block(&mut b, &words(100, "body"), &[("font-size", "12pt")]);
    close_document(&mut b);
    let tree = b.finish().unwrap();

    let result = layout(&tree, &options()).unwrap();
    assert!(result.pages.len() >= 2);
    assert!(
        !page_text(&result, 0).contains("Heading"),
        "heading was orphaned on page 1"
    );
    let second = page_text(&result, 1);
    assert!(second.contains("Heading"));
    assert!(second.contains("body1"));
}

// ─── Scenario: footnotes ────────────────────────────────────────

fn footnote(b: &mut FoTreeBuilder, mark: &str, note: &str) {
    b.open(FoKind::Footnote);
    b.open(FoKind::Inline);
    b.text(mark);
    b.close();
    b.open(FoKind::FootnoteBody);
    block(b, note, &[("font-size", "10pt")]);
    b.close();
    b.close();
}

#[test]
fn footnotes_share_their_page() {
    let mut b = FoTreeBuilder::new();
    open_document(&mut b);
    open_sequence(&mut b);
    b.open(FoKind::Block);
    b.text("Cited text");
    for i in 1..=6 {
        footnote(&mut b, &format!("[{i}]"), &format!("note {i}"));
    }
    b.close();
    close_document(&mut b);
    let tree = b.finish().unwrap();

    let result = layout(&tree, &options()).unwrap();
    assert_eq!(result.pages.len(), 1);
    let text = page_text(&result, 0);
    for i in 1..=6 {
        assert!(text.contains(&format!("note {i}")), "note {i} missing");
    }

    // Footnote bodies sit at the bottom of the body region.
    let body = result.pages[0].region(RegionKind::Body).unwrap();
    let runs = result.pages[0].glyph_runs();
    let note_y = runs
        .iter()
        .find(|r| r.text.contains("note 1"))
        .map(|r| r.y)
        .unwrap();
    assert!(note_y > body.rect.y + body.rect.height / 2.0);
}

#[test]
fn oversized_footnote_moves_with_anchor() {
    let mut b = FoTreeBuilder::new();
    open_document(&mut b);
    open_sequence(&mut b);
    filler(&mut b, "620pt");
    b.open(FoKind::Block);
    b.text("Anchor line");
    footnote(&mut b, "[7]", &words(60, "bignote"));
    b.close();
    close_document(&mut b);
    let tree = b.finish().unwrap();

    let result = layout(&tree, &options()).unwrap();
    assert_eq!(result.pages.len(), 2);
    // Anchor and body moved together: neither is on page 1.
    let first = page_text(&result, 0);
    assert!(!first.contains("Anchor"));
    assert!(!first.contains("bignote1"));
    let second = page_text(&result, 1);
    assert!(second.contains("Anchor"));
    assert!(second.contains("bignote1"));
}

// ─── Scenario: hyphenation in a narrow column ───────────────────

#[test]
fn optimal_breaking_with_hyphenation_fits_column() {
    let mut b = FoTreeBuilder::new();
    open_document(&mut b);
    open_sequence(&mut b);
    b.open(FoKind::BlockContainer);
    b.attribute("width", "70pt");
    b.open(FoKind::Block);
    b.attribute("text-align", "justify");
    b.attribute("language", "en");
    b.text(
        "extraordinary achievements demonstrate considerable determination \
         throughout challenging international circumstances",
    );
    b.close();
    b.close();
    close_document(&mut b);
    let tree = b.finish().unwrap();

    let options = LayoutOptions {
        line_breaking: folio::LineBreaking::Optimal,
        enable_hyphenation: true,
        hyphenation_language: "en".to_string(),
        hyphenation_min_word_length: 5,
        hyphenation_min_left_chars: 2,
        hyphenation_min_right_chars: 3,
        ..options()
    };
    let (result, diags) = layout_with_diagnostics(&tree, &options).unwrap();
    assert_eq!(result.pages.len(), 1);

    // Long words only fit a 70pt measure hyphenated; no overflow warnings
    // means every line came in under the column width.
    let overflow = diags.count_of(folio::WarningKind::LayoutOverflow);
    assert_eq!(overflow, 0, "warnings: {:?}", diags.warnings());

    // At least one line ends with the hyphenation character.
    let hyphens = result.pages[0]
        .glyph_runs()
        .iter()
        .filter(|r| r.text == "-")
        .count();
    assert!(hyphens > 0, "no hyphen was taken");
}

// ─── Boundary behaviors ─────────────────────────────────────────

#[test]
fn forced_break_on_first_block_leaves_blank_page() {
    let mut b = FoTreeBuilder::new();
    open_document(&mut b);
    open_sequence(&mut b);
    block(&mut b, "After the break", &[("break-before", "page")]);
    close_document(&mut b);
    let tree = b.finish().unwrap();

    let result = layout(&tree, &options()).unwrap();
    assert_eq!(result.pages.len(), 2);
    assert_eq!(page_text(&result, 0), "");
    assert!(page_text(&result, 1).contains("After the break"));
}

#[test]
fn force_page_count_even_pads() {
    let mut b = FoTreeBuilder::new();
    open_document(&mut b);
    b.open(FoKind::PageSequence);
    b.attribute("master-reference", "page");
    b.attribute("force-page-count", "even");
    b.open(FoKind::Flow);
    b.attribute("flow-name", "xsl-region-body");
    block(&mut b, "only content", &[]);
    close_document(&mut b);
    let tree = b.finish().unwrap();

    let result = layout(&tree, &options()).unwrap();
    assert_eq!(result.pages.len(), 2);
    assert_eq!(page_text(&result, 1), "");
    // The trailing blank page still has a valid body region frame.
    let body = result.pages[1].region(RegionKind::Body).unwrap();
    assert!(body.rect.width > 0.0);
}

#[test]
fn single_block_taller_than_page_overflows_with_warning() {
    let mut b = FoTreeBuilder::new();
    open_document(&mut b);
    open_sequence(&mut b);
    b.open(FoKind::BlockContainer);
    b.attribute("height", "2000pt");
    b.attribute("keep-together", "always");
    b.open(FoKind::Block);
    b.text("tall");
    b.close();
    b.close();
    close_document(&mut b);
    let tree = b.finish().unwrap();

    let (result, diags) = layout_with_diagnostics(&tree, &options()).unwrap();
    assert_eq!(result.pages.len(), 1);
    assert!(diags.count_of(folio::WarningKind::LayoutOverflow) > 0);
}

// ─── Markers & static content ───────────────────────────────────

#[test]
fn running_header_retrieves_markers() {
    let mut b = FoTreeBuilder::new();
    b.open(FoKind::Root);
    b.open(FoKind::LayoutMasterSet);
    b.open(FoKind::SimplePageMaster);
    b.attribute("master-name", "page");
    b.attribute("page-width", "595pt");
    b.attribute("page-height", "842pt");
    b.attribute("margin", "72pt");
    b.open(FoKind::RegionBody);
    b.attribute("margin-top", "30pt");
    b.close();
    b.open(FoKind::RegionBefore);
    b.attribute("extent", "24pt");
    b.close();
    b.close();
    b.close();
    b.open(FoKind::PageSequence);
    b.attribute("master-reference", "page");

    b.open(FoKind::StaticContent);
    b.attribute("flow-name", "xsl-region-before");
    b.open(FoKind::Block);
    b.text("Chapter: ");
    b.open(FoKind::RetrieveMarker);
    b.attribute("retrieve-class-name", "chapter");
    b.attribute("retrieve-position", "first-including-carryover");
    b.close();
    b.close();
    b.close();

    b.open(FoKind::Flow);
    b.attribute("flow-name", "xsl-region-body");
    // Chapter One: marker + filler pushing Chapter Two onto page 2.
    b.open(FoKind::Block);
    b.open(FoKind::Marker);
    b.attribute("marker-class-name", "chapter");
    b.text("One");
    b.close();
    b.text("first chapter");
    b.close();
    filler(&mut b, "650pt");
    b.open(FoKind::Block);
    b.open(FoKind::Marker);
    b.attribute("marker-class-name", "chapter");
    b.text("Two");
    b.close();
    b.text("second chapter");
    b.close();
    close_document(&mut b);
    let tree = b.finish().unwrap();

    let result = layout(&tree, &options()).unwrap();
    assert!(result.pages.len() >= 2);

    let before = |page: usize| {
        result.pages[page]
            .region(RegionKind::Before)
            .map(|r| {
                let mut text = String::new();
                collect_region_text(&r.areas, &mut text);
                text
            })
            .unwrap_or_default()
    };
    assert!(before(0).contains("One"), "page 1 header: {:?}", before(0));
    assert!(before(1).contains("Two"), "page 2 header: {:?}", before(1));
}

fn collect_region_text(areas: &[Area], out: &mut String) {
    for area in areas {
        if let Area::Glyphs(g) = area {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&g.text);
        }
        collect_region_text(area.children(), out);
    }
}

// ─── Page-number citations ──────────────────────────────────────

#[test]
fn citation_resolves_to_target_page() {
    let mut b = FoTreeBuilder::new();
    open_document(&mut b);
    open_sequence(&mut b);
    b.open(FoKind::Block);
    b.text("see page ");
    b.open(FoKind::PageNumberCitation);
    b.attribute("ref-id", "target");
    b.close();
    b.close();
    filler(&mut b, "675pt");
    block(&mut b, "the target", &[("id", "target")]);
    close_document(&mut b);
    let tree = b.finish().unwrap();

    let result = layout(&tree, &options()).unwrap();
    assert_eq!(result.pages.len(), 2);
    let first = page_text(&result, 0);
    assert!(first.contains("see page 2"), "got {first:?}");
}

#[test]
fn unknown_citation_renders_question_marks() {
    let mut b = FoTreeBuilder::new();
    open_document(&mut b);
    open_sequence(&mut b);
    b.open(FoKind::Block);
    b.text("see ");
    b.open(FoKind::PageNumberCitation);
    b.attribute("ref-id", "nowhere");
    b.close();
    b.close();
    close_document(&mut b);
    let tree = b.finish().unwrap();

    let (result, diags) = layout_with_diagnostics(&tree, &options()).unwrap();
    assert!(page_text(&result, 0).contains("??"));
    assert!(diags.count_of(folio::WarningKind::UnknownReference) > 0);
}

// ─── Multi-column ───────────────────────────────────────────────

#[test]
fn two_column_region_uses_both_columns() {
    let mut b = FoTreeBuilder::new();
    b.open(FoKind::Root);
    b.open(FoKind::LayoutMasterSet);
    b.open(FoKind::SimplePageMaster);
    b.attribute("master-name", "page");
    b.attribute("page-width", "595pt");
    b.attribute("page-height", "842pt");
    b.attribute("margin", "72pt");
    b.open(FoKind::RegionBody);
    b.attribute("column-count", "2");
    b.attribute("column-gap", "20pt");
    b.close();
    b.close();
    b.close();
    b.open(FoKind::PageSequence);
    b.attribute("master-reference", "page");
    b.open(FoKind::Flow);
    b.attribute("flow-name", "xsl-region-body");
    for i in 1..=80 {
        block(&mut b, &format!("para {i} {}", words(6, "x")), &[]);
    }
    close_document(&mut b);
    let tree = b.finish().unwrap();

    let result = layout(&tree, &options()).unwrap();
    let column_width = (451.0 - 20.0) / 2.0;
    let in_second_column = result.pages[0]
        .glyph_runs()
        .iter()
        .any(|r| r.x > 72.0 + column_width);
    assert!(in_second_column, "second column never used");
}

// ─── Round-trip & idempotence ───────────────────────────────────

#[test]
fn text_round_trips_modulo_whitespace() {
    let mut b = FoTreeBuilder::new();
    open_document(&mut b);
    open_sequence(&mut b);
    block(&mut b, "The   quick\n brown  fox", &[]);
    close_document(&mut b);
    let tree = b.finish().unwrap();

    let result = layout(&tree, &options()).unwrap();
    assert_eq!(page_text(&result, 0), "The quick brown fox");
}

#[test]
fn layout_is_idempotent_over_a_mixed_document() {
    let build = || {
        let mut b = FoTreeBuilder::new();
        open_document(&mut b);
        open_sequence(&mut b);
        block(&mut b, &words(200, "w"), &[("text-align", "justify")]);
        b.open(FoKind::Table);
        b.open(FoKind::TableBody);
        for i in 0..10 {
            b.open(FoKind::TableRow);
            b.open(FoKind::TableCell);
            block(&mut b, &format!("cell {i}"), &[]);
            b.close();
            b.close();
        }
        b.close();
        b.close();
        b.open(FoKind::ListBlock);
        b.open(FoKind::ListItem);
        b.open(FoKind::ListItemLabel);
        block(&mut b, "•", &[]);
        b.close();
        b.open(FoKind::ListItemBody);
        block(&mut b, "item body", &[]);
        b.close();
        b.close();
        b.close();
        close_document(&mut b);
        b.finish().unwrap()
    };

    let options = options();
    let a = layout(&build(), &options).unwrap();
    let b = layout(&build(), &options).unwrap();
    assert_eq!(a.to_canonical_json(), b.to_canonical_json());
}

// ─── Containment invariant ──────────────────────────────────────

#[test]
fn areas_stay_inside_their_page() {
    let mut b = FoTreeBuilder::new();
    open_document(&mut b);
    open_sequence(&mut b);
    for i in 0..30 {
        block(&mut b, &format!("paragraph {i} {}", words(12, "t")), &[]);
    }
    close_document(&mut b);
    let tree = b.finish().unwrap();

    let result = layout(&tree, &options()).unwrap();
    for page in &result.pages {
        let page_rect = folio::area::Rect::new(0.0, 0.0, page.width, page.height);
        for area in page.all_areas() {
            let rect = area.rect();
            assert!(
                page_rect.contains_rect(&rect),
                "area {rect:?} escapes page {}",
                page.number
            );
        }
    }
}

// ─── Bookmarks ──────────────────────────────────────────────────

#[test]
fn bookmarks_resolve_to_pages() {
    let mut b = FoTreeBuilder::new();
    b.open(FoKind::Root);
    b.open(FoKind::LayoutMasterSet);
    b.open(FoKind::SimplePageMaster);
    b.attribute("master-name", "page");
    b.attribute("page-width", "595pt");
    b.attribute("page-height", "842pt");
    b.attribute("margin", "72pt");
    b.open(FoKind::RegionBody);
    b.close();
    b.close();
    b.close();
    b.open(FoKind::BookmarkTree);
    b.open(FoKind::Bookmark);
    b.attribute("internal-destination", "ch2");
    b.open(FoKind::BookmarkTitle);
    b.text("Chapter Two");
    b.close();
    b.close();
    b.close();
    b.open(FoKind::PageSequence);
    b.attribute("master-reference", "page");
    b.open(FoKind::Flow);
    b.attribute("flow-name", "xsl-region-body");
    filler(&mut b, "690pt");
    block(&mut b, "Chapter 2", &[("id", "ch2")]);
    close_document(&mut b);
    let tree = b.finish().unwrap();

    let result = layout(&tree, &options()).unwrap();
    assert_eq!(result.outline.len(), 1);
    assert_eq!(result.outline[0].title, "Chapter Two");
    assert_eq!(result.outline[0].page, 2);
}
