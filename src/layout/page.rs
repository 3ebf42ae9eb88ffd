//! # Page Builder
//!
//! Drives the flattened piece list of each page sequence into pages:
//! conditional master selection, region geometry, multi-column filling,
//! keep/break enforcement, footnote reservation, marker capture, static
//! content, and the two-pass page-number citation patch.
//!
//! Ordering within a page follows the spec: the body region fills first,
//! static regions after it, so `retrieve-marker` sees the markers of the
//! finished page. Layout checks the cancellation flag at every page
//! boundary and returns `Cancelled` with partial output discarded.

use super::{offset_area, Engine, FlattenCtx, MarkerDecl, Piece, PieceKind, CITATION_CURRENT_PAGE};
use crate::area::{
    Area, AreaTree, BlockArea, FontResource, GlyphRun, OutlineEntry, PageArea, Paint, Rect,
    RegionArea, RegionKind, RuleArea,
};
use crate::error::{FolioError, WarningKind};
use crate::fo::properties::{BreakKind, DisplayAlign};
use crate::fo::{FoKind, NodeId};
use crate::font::subset;
use crate::font::ResolvedFont;
use std::collections::{BTreeSet, HashMap};

/// Space kept between flow content and the first footnote body.
const FOOTNOTE_SEPARATOR_GAP: f64 = 6.0;
const FOOTNOTE_SEPARATOR_RULE: f64 = 0.5;

// ─── Page masters ───────────────────────────────────────────────

#[derive(Debug, Clone)]
struct RegionSpec {
    /// Margins of the region-body within the page content rect.
    margins: [f64; 4], // top right bottom left
    column_count: u32,
    column_gap: f64,
    display_align: DisplayAlign,
    background: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct SideRegionSpec {
    extent: f64,
}

#[derive(Debug, Clone)]
struct SimpleMaster {
    name: String,
    width: f64,
    height: f64,
    margins: [f64; 4],
    body: RegionSpec,
    before: Option<SideRegionSpec>,
    after: Option<SideRegionSpec>,
    start: Option<SideRegionSpec>,
    end: Option<SideRegionSpec>,
}

impl SimpleMaster {
    fn content_rect(&self) -> Rect {
        Rect::new(
            self.margins[3],
            self.margins[0],
            self.width - self.margins[1] - self.margins[3],
            self.height - self.margins[0] - self.margins[2],
        )
    }

    fn body_rect(&self) -> Rect {
        let c = self.content_rect();
        Rect::new(
            c.x + self.body.margins[3],
            c.y + self.body.margins[0],
            c.width - self.body.margins[1] - self.body.margins[3],
            c.height - self.body.margins[0] - self.body.margins[2],
        )
    }

    fn region_rect(&self, kind: RegionKind) -> Option<Rect> {
        let c = self.content_rect();
        match kind {
            RegionKind::Body => Some(self.body_rect()),
            RegionKind::Before => self
                .before
                .map(|r| Rect::new(c.x, c.y, c.width, r.extent)),
            RegionKind::After => self
                .after
                .map(|r| Rect::new(c.x, c.bottom() - r.extent, c.width, r.extent)),
            RegionKind::Start => self
                .start
                .map(|r| Rect::new(c.x, c.y, r.extent, c.height)),
            RegionKind::End => self
                .end
                .map(|r| Rect::new(c.right() - r.extent, c.y, r.extent, c.height)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PagePosition {
    First,
    Last,
    Rest,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OddOrEven {
    Odd,
    Even,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlankOrNot {
    Blank,
    NotBlank,
    Any,
}

#[derive(Debug, Clone)]
struct ConditionalRef {
    master: usize,
    position: PagePosition,
    odd_even: OddOrEven,
    blank: BlankOrNot,
}

#[derive(Debug, Clone)]
enum SubSequence {
    Single(usize),
    Repeatable {
        master: usize,
        max_repeats: Option<u32>,
    },
    Alternatives {
        max_repeats: Option<u32>,
        conditions: Vec<ConditionalRef>,
    },
}

#[derive(Debug, Clone)]
enum MasterRef {
    Simple(usize),
    Sequence(Vec<SubSequence>),
}

/// All masters declared by the layout-master-set.
#[derive(Debug)]
pub(crate) struct MasterSet {
    masters: Vec<SimpleMaster>,
    by_name: HashMap<String, MasterRef>,
}

/// Per-sequence master selection state machine.
struct MasterSelector<'m> {
    set: &'m MasterSet,
    reference: &'m MasterRef,
    sub_index: usize,
    used_in_sub: u32,
}

impl<'m> MasterSelector<'m> {
    fn new(set: &'m MasterSet, reference: &'m MasterRef) -> Self {
        Self {
            set,
            reference,
            sub_index: 0,
            used_in_sub: 0,
        }
    }

    /// Master for the page at `seq_index` (0-based within the sequence).
    fn select(
        &mut self,
        seq_index: u32,
        page_number: u32,
        is_blank: bool,
        is_last: bool,
    ) -> usize {
        match self.reference {
            MasterRef::Simple(idx) => *idx,
            MasterRef::Sequence(subs) => {
                loop {
                    match subs.get(self.sub_index) {
                        None => {
                            // Past the last sub-sequence the final one
                            // repeats; an exhausted specification keeps
                            // producing pages rather than failing.
                            return self.last_resort(subs);
                        }
                        Some(SubSequence::Single(m)) => {
                            if self.used_in_sub > 0 {
                                self.sub_index += 1;
                                self.used_in_sub = 0;
                                continue;
                            }
                            self.used_in_sub = 1;
                            return *m;
                        }
                        Some(SubSequence::Repeatable {
                            master,
                            max_repeats,
                        }) => {
                            if let Some(max) = max_repeats {
                                if self.used_in_sub >= *max {
                                    self.sub_index += 1;
                                    self.used_in_sub = 0;
                                    continue;
                                }
                            }
                            self.used_in_sub += 1;
                            return *master;
                        }
                        Some(SubSequence::Alternatives {
                            max_repeats,
                            conditions,
                        }) => {
                            if let Some(max) = max_repeats {
                                if self.used_in_sub >= *max {
                                    self.sub_index += 1;
                                    self.used_in_sub = 0;
                                    continue;
                                }
                            }
                            self.used_in_sub += 1;
                            for cond in conditions {
                                if condition_matches(cond, seq_index, page_number, is_blank, is_last)
                                {
                                    return cond.master;
                                }
                            }
                            // No clause matched: fall through to any master
                            // declared, preferring the first condition's.
                            return conditions.first().map(|c| c.master).unwrap_or(0);
                        }
                    }
                }
            }
        }
    }

    fn last_resort(&self, subs: &[SubSequence]) -> usize {
        match subs.last() {
            Some(SubSequence::Single(m)) => *m,
            Some(SubSequence::Repeatable { master, .. }) => *master,
            Some(SubSequence::Alternatives { conditions, .. }) => {
                conditions.first().map(|c| c.master).unwrap_or(0)
            }
            None => 0,
        }
    }
}

fn has_last_condition(reference: &MasterRef) -> bool {
    match reference {
        MasterRef::Simple(_) => false,
        MasterRef::Sequence(subs) => subs.iter().any(|s| {
            matches!(s, SubSequence::Alternatives { conditions, .. }
                if conditions.iter().any(|c| c.position == PagePosition::Last))
        }),
    }
}

fn condition_matches(
    cond: &ConditionalRef,
    seq_index: u32,
    page_number: u32,
    is_blank: bool,
    is_last: bool,
) -> bool {
    let position_ok = match cond.position {
        PagePosition::First => seq_index == 0,
        PagePosition::Last => is_last,
        PagePosition::Rest => seq_index > 0 && !is_last,
        PagePosition::Any => true,
    };
    let parity_ok = match cond.odd_even {
        OddOrEven::Odd => page_number % 2 == 1,
        OddOrEven::Even => page_number % 2 == 0,
        OddOrEven::Any => true,
    };
    let blank_ok = match cond.blank {
        BlankOrNot::Blank => is_blank,
        BlankOrNot::NotBlank => !is_blank,
        BlankOrNot::Any => true,
    };
    position_ok && parity_ok && blank_ok
}

/// Parse the layout-master-set. Geometry errors here are fatal.
pub(crate) fn parse_masters(engine: &Engine<'_>) -> Result<MasterSet, FolioError> {
    let tree = engine.tree;
    let res = &engine.res;
    let master_set = tree
        .first_child_of_kind(tree.root(), FoKind::LayoutMasterSet)
        .expect("validated by the tree builder");

    let mut masters = Vec::new();
    let mut by_name = HashMap::new();

    for node in tree.children_of_kind(master_set, FoKind::SimplePageMaster) {
        let name = res
            .specified(node, "master-name")
            .ok_or_else(|| FolioError::InvalidDocument {
                node,
                reason: "simple-page-master requires master-name".to_string(),
            })?
            .to_string();
        let width = res
            .length_strict(node, "page-width", None)?
            .unwrap_or(595.0);
        let height = res
            .length_strict(node, "page-height", None)?
            .unwrap_or(842.0);
        let margins = [
            res.length_strict(node, "margin-top", Some(height))?.unwrap_or(0.0),
            res.length_strict(node, "margin-right", Some(width))?.unwrap_or(0.0),
            res.length_strict(node, "margin-bottom", Some(height))?.unwrap_or(0.0),
            res.length_strict(node, "margin-left", Some(width))?.unwrap_or(0.0),
        ];

        let body_node = tree.first_child_of_kind(node, FoKind::RegionBody);
        let body = match body_node {
            Some(b) => {
                // Unlike leaf style properties, a bad column-count cannot be
                // papered over with a default.
                let column_count = match res.specified(b, "column-count") {
                    Some(v) => v.trim().parse::<u32>().ok().filter(|&n| n >= 1).ok_or(
                        FolioError::InvalidValue {
                            node: b,
                            property: "column-count".to_string(),
                            value: v.to_string(),
                        },
                    )?,
                    None => 1,
                };
                RegionSpec {
                    margins: [
                        res.length_strict(b, "margin-top", Some(height))?.unwrap_or(0.0),
                        res.length_strict(b, "margin-right", Some(width))?.unwrap_or(0.0),
                        res.length_strict(b, "margin-bottom", Some(height))?.unwrap_or(0.0),
                        res.length_strict(b, "margin-left", Some(width))?.unwrap_or(0.0),
                    ],
                    column_count,
                    column_gap: res.length(b, "column-gap", Some(width), 12.0),
                    display_align: res.display_align(b),
                    background: res
                        .specified(b, "background-color")
                        .filter(|c| *c != "transparent")
                        .map(|c| c.to_string()),
                }
            }
            None => RegionSpec {
                margins: [0.0; 4],
                column_count: 1,
                column_gap: 12.0,
                display_align: DisplayAlign::Auto,
                background: None,
            },
        };

        let side = |kind: FoKind| -> Result<Option<SideRegionSpec>, FolioError> {
            match tree.first_child_of_kind(node, kind) {
                Some(r) => Ok(Some(SideRegionSpec {
                    extent: res.length_strict(r, "extent", None)?.unwrap_or(24.0),
                })),
                None => Ok(None),
            }
        };

        let idx = masters.len();
        masters.push(SimpleMaster {
            name: name.clone(),
            width,
            height,
            margins,
            body,
            before: side(FoKind::RegionBefore)?,
            after: side(FoKind::RegionAfter)?,
            start: side(FoKind::RegionStart)?,
            end: side(FoKind::RegionEnd)?,
        });
        by_name.insert(name, MasterRef::Simple(idx));
    }

    let master_index = |set: &HashMap<String, MasterRef>,
                        node: NodeId,
                        name: &str|
     -> Result<usize, FolioError> {
        match set.get(name) {
            Some(MasterRef::Simple(i)) => Ok(*i),
            _ => Err(FolioError::UnknownReference {
                node,
                reference: name.to_string(),
            }),
        }
    };

    for node in tree.children_of_kind(master_set, FoKind::PageSequenceMaster) {
        let name = res
            .specified(node, "master-name")
            .ok_or_else(|| FolioError::InvalidDocument {
                node,
                reason: "page-sequence-master requires master-name".to_string(),
            })?
            .to_string();
        let mut subs = Vec::new();
        for child in tree.children(node).iter().copied() {
            match tree.kind(child) {
                FoKind::SinglePageMasterReference => {
                    let reference = res.specified(child, "master-reference").unwrap_or("");
                    subs.push(SubSequence::Single(master_index(&by_name, child, reference)?));
                }
                FoKind::RepeatablePageMasterReference => {
                    let reference = res.specified(child, "master-reference").unwrap_or("");
                    let max = res
                        .specified(child, "maximum-repeats")
                        .and_then(|v| v.parse::<u32>().ok());
                    subs.push(SubSequence::Repeatable {
                        master: master_index(&by_name, child, reference)?,
                        max_repeats: max,
                    });
                }
                FoKind::RepeatablePageMasterAlternatives => {
                    let max = res
                        .specified(child, "maximum-repeats")
                        .and_then(|v| v.parse::<u32>().ok());
                    let mut conditions = Vec::new();
                    for cond in
                        tree.children_of_kind(child, FoKind::ConditionalPageMasterReference)
                    {
                        let reference = res.specified(cond, "master-reference").unwrap_or("");
                        conditions.push(ConditionalRef {
                            master: master_index(&by_name, cond, reference)?,
                            position: match res.specified(cond, "page-position") {
                                Some("first") => PagePosition::First,
                                Some("last") => PagePosition::Last,
                                Some("rest") => PagePosition::Rest,
                                _ => PagePosition::Any,
                            },
                            odd_even: match res.specified(cond, "odd-or-even") {
                                Some("odd") => OddOrEven::Odd,
                                Some("even") => OddOrEven::Even,
                                _ => OddOrEven::Any,
                            },
                            blank: match res.specified(cond, "blank-or-not-blank") {
                                Some("blank") => BlankOrNot::Blank,
                                Some("not-blank") => BlankOrNot::NotBlank,
                                _ => BlankOrNot::Any,
                            },
                        });
                    }
                    subs.push(SubSequence::Alternatives {
                        max_repeats: max,
                        conditions,
                    });
                }
                _ => {}
            }
        }
        by_name.insert(name, MasterRef::Sequence(subs));
    }

    Ok(MasterSet { masters, by_name })
}

// ─── Footnotes ──────────────────────────────────────────────────

/// Bottom-up reservation of body-region space for footnote bodies.
struct FootnoteCollector {
    reserved: f64,
    areas: Vec<(Area, f64)>,
}

impl FootnoteCollector {
    fn new() -> Self {
        Self {
            reserved: 0.0,
            areas: Vec::new(),
        }
    }

    /// Height the separator adds when the first body arrives.
    fn separator_height(&self) -> f64 {
        if self.areas.is_empty() {
            FOOTNOTE_SEPARATOR_GAP + FOOTNOTE_SEPARATOR_RULE
        } else {
            0.0
        }
    }

    fn commit(&mut self, area: Area, height: f64) {
        self.reserved += self.separator_height() + height;
        self.areas.push((area, height));
    }

    /// Assemble the committed bodies at the region bottom.
    fn into_areas(self, region: Rect) -> Vec<Area> {
        if self.areas.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        let mut y = region.bottom() - self.reserved;
        out.push(Area::Rule(RuleArea {
            rect: Rect::new(region.x, y + FOOTNOTE_SEPARATOR_GAP / 2.0, region.width / 3.0, FOOTNOTE_SEPARATOR_RULE),
            style: "solid".to_string(),
            color: "black".to_string(),
        }));
        y += FOOTNOTE_SEPARATOR_GAP + FOOTNOTE_SEPARATOR_RULE;
        for (mut area, height) in self.areas {
            offset_area(&mut area, region.x, y);
            y += height;
            out.push(area);
        }
        out
    }
}

// ─── Markers ────────────────────────────────────────────────────

/// Marker bookkeeping across the document.
#[derive(Debug, Clone, Default)]
pub(crate) struct MarkerState {
    /// Markers started on the current page, in placement order.
    page: Vec<MarkerDecl>,
    /// Last marker of each class from earlier pages of this sequence.
    sequence_carryover: HashMap<String, NodeId>,
    /// Last marker of each class from anywhere earlier in the document.
    document_carryover: HashMap<String, NodeId>,
}

impl MarkerState {
    fn start_page(&mut self) {
        for decl in self.page.drain(..) {
            self.sequence_carryover
                .insert(decl.class.clone(), decl.node);
            self.document_carryover.insert(decl.class, decl.node);
        }
    }

    fn start_sequence(&mut self) {
        self.start_page();
        self.sequence_carryover.clear();
    }

    fn record(&mut self, decl: &MarkerDecl) {
        self.page.push(decl.clone());
    }

    /// Resolve one retrieve-marker request.
    pub(crate) fn resolve(&self, class: &str, position: &str, boundary: &str) -> Option<NodeId> {
        let on_page: Vec<NodeId> = self
            .page
            .iter()
            .filter(|d| d.class == class)
            .map(|d| d.node)
            .collect();
        let carryover = match boundary {
            "document" => self
                .sequence_carryover
                .get(class)
                .or_else(|| self.document_carryover.get(class)),
            "page" => None,
            _ => self.sequence_carryover.get(class),
        }
        .copied();

        match position {
            "first-starting-within-page" => on_page.first().copied(),
            "first-including-carryover" => on_page.first().copied().or(carryover),
            "last-starting-within-page" => on_page.last().copied(),
            "last-ending-within-page" => on_page.last().copied().or(carryover),
            _ => on_page.first().copied(),
        }
    }
}

// ─── Pagination ─────────────────────────────────────────────────

struct PlacedPiece {
    piece_index: usize,
    column: usize,
    y: f64,
}

/// One filled page of body content, before static regions attach.
struct FilledPage {
    /// Areas per column, already in page coordinates.
    areas: Vec<Area>,
    footnote_areas: Vec<Area>,
    markers: Vec<MarkerDecl>,
    /// Index one past the last consumed piece.
    next_piece: usize,
    /// Forced break kind that closed the page, if any.
    closing_break: BreakKind,
    /// The piece whose break-before closed this page; the next fill must
    /// not honor it again.
    break_at: Option<usize>,
}

/// Fill one page's body region from `pieces[start..]`.
#[allow(clippy::too_many_arguments)]
fn fill_page(
    engine: &mut Engine<'_>,
    pieces: &[Piece],
    start: usize,
    master: &SimpleMaster,
    page_number: u32,
    column_height_cap: Option<f64>,
    skip_break_for: Option<usize>,
    tables_started: &mut BTreeSet<u32>,
) -> Result<FilledPage, FolioError> {
    let body = master.body_rect();
    let ncols = master.body.column_count.max(1) as usize;
    let gap = master.body.column_gap;
    let col_width = (body.width - gap * (ncols as f64 - 1.0)) / ncols as f64;
    let col_height = column_height_cap
        .unwrap_or(body.height)
        .min(body.height);

    let mut footnotes = FootnoteCollector::new();
    let mut markers: Vec<MarkerDecl> = Vec::new();
    let mut placed: Vec<PlacedPiece> = Vec::new();
    let mut absolute_areas: Vec<Area> = Vec::new();

    let mut col = 0usize;
    let mut y = 0.0f64;
    let mut idx = start;
    let mut closing_break = BreakKind::Auto;
    let mut break_at = None;
    // Tables begun on earlier pages; pieces pulled back off this page must
    // not count, so this-page starts are tracked per closed column.
    let started_prior = tables_started.clone();
    let mut started_page: BTreeSet<u32> = BTreeSet::new();
    // Tables given a (repeated or original) header in the current column.
    let mut tables_headed: BTreeSet<u32> = BTreeSet::new();
    // Repeated header/footer areas inserted outside the piece list.
    let mut repeat_areas: Vec<Area> = Vec::new();

    'pages: while idx < pieces.len() {
        let piece = &pieces[idx];

        if let Some(rect) = piece.absolute {
            if let PieceKind::Area(area) = &piece.kind {
                let mut area = area.clone();
                offset_area(&mut area, rect.x, rect.y);
                absolute_areas.push(area);
            }
            idx += 1;
            continue;
        }

        if skip_break_for != Some(idx) {
            match piece.break_before {
                BreakKind::Page | BreakKind::EvenPage | BreakKind::OddPage => {
                    // A page break closes this page even when nothing was
                    // placed: a forced break on the first block leaves the
                    // first page intentionally blank.
                    closing_break = piece.break_before;
                    break_at = Some(idx);
                    break 'pages;
                }
                BreakKind::Column => {
                    if placed.iter().any(|p| p.column == col) {
                        if col + 1 < ncols {
                            for p in &placed {
                                if let Some(t) = &pieces[p.piece_index].table {
                                    started_page.insert(t.id);
                                }
                            }
                            col += 1;
                            y = 0.0;
                            tables_headed.clear();
                        } else {
                            break_at = Some(idx);
                            break 'pages;
                        }
                    }
                }
                BreakKind::Auto => {}
            }
        }

        // Spacers at a column start are discarded when conditional.
        let at_column_start = !placed.iter().any(|p| p.column == col);
        if let PieceKind::Spacer { discard } = piece.kind {
            if at_column_start && discard {
                idx += 1;
                continue;
            }
        }

        // Repeated table header when a table resumes in a fresh column.
        let mut header_height = 0.0;
        let mut header_areas: Vec<Area> = Vec::new();
        if let Some(table) = &piece.table {
            let resumed = started_prior.contains(&table.id) || started_page.contains(&table.id);
            if resumed && !tables_headed.contains(&table.id) {
                for rp in table.header.iter() {
                    let mut area = rp.area.clone();
                    offset_area(
                        &mut area,
                        body.x + col as f64 * (col_width + gap),
                        body.y + y + header_height,
                    );
                    header_areas.push(area);
                    header_height += rp.height;
                }
            }
        }

        // Footer space must stay reservable while the table continues.
        let footer_reserve = match &piece.table {
            Some(t) if !t.omit_footer_at_break && !t.footer.is_empty() => {
                let continues = pieces
                    .get(idx + 1)
                    .and_then(|p| p.table.as_ref())
                    .map(|n| n.id == t.id)
                    .unwrap_or(false);
                if continues {
                    t.footer.iter().map(|f| f.height).sum()
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        // Footnotes riding this piece need bottom space on the same page.
        let mut footnote_bodies: Vec<(Area, f64)> = Vec::new();
        let mut footnote_height = 0.0;
        if !piece.footnotes.is_empty() {
            footnote_height = footnotes.separator_height();
            for &body_node in &piece.footnotes {
                let (area, h) = engine.layout_footnote_body(body_node, body.width, body)?;
                footnote_height += h;
                footnote_bodies.push((area, h));
            }
        }

        let available = col_height - y - footnotes.reserved - footnote_height;
        let needed = header_height + piece.height + footer_reserve;

        if needed <= available || (at_column_start && needed > col_height) {
            if at_column_start && needed > col_height {
                engine.diags.warn(
                    None,
                    WarningKind::LayoutOverflow,
                    format!(
                        "content {needed:.1}pt exceeds region height {col_height:.1}pt on page {page_number}; overflowing"
                    ),
                );
            }
            // Place.
            repeat_areas.extend(header_areas);
            y += header_height;
            if let Some(table) = &piece.table {
                tables_headed.insert(table.id);
            }
            placed.push(PlacedPiece {
                piece_index: idx,
                column: col,
                y,
            });
            for (area, h) in footnote_bodies {
                footnotes.commit(area, h);
            }
            for decl in &piece.markers {
                markers.push(decl.clone());
            }
            for id in &piece.id_refs {
                engine
                    .id_positions
                    .entry(id.clone())
                    .or_insert((page_number, body.y + y));
            }
            y += piece.height;
            idx += 1;
            continue;
        }

        // Does not fit: identify the chain of placed pieces the keeps bind
        // to this one, so they move to the next column together.
        let mut chain_start = placed.len();
        loop {
            let link = if chain_start == placed.len() {
                piece.keep_with_prev
            } else {
                pieces[placed[chain_start].piece_index].keep_with_prev
            };
            if link == 0 || chain_start == 0 || placed[chain_start - 1].column != col {
                break;
            }
            chain_start -= 1;
        }

        if chain_start < placed.len() {
            let chain_height: f64 = placed[chain_start..]
                .iter()
                .map(|p| pieces[p.piece_index].height)
                .sum::<f64>()
                + piece.height;
            if chain_height > col_height {
                // The chain can never fit one column. The weakest link in
                // it is violated first.
                let mut weakest_pos = placed.len();
                let mut weakest = piece.keep_with_prev;
                for pos in chain_start + 1..placed.len() {
                    let link = pieces[placed[pos].piece_index].keep_with_prev;
                    if link < weakest {
                        weakest = link;
                        weakest_pos = pos;
                    }
                }
                engine.diags.warn(
                    None,
                    WarningKind::KeepViolated,
                    format!(
                        "keep chain of {chain_height:.1}pt exceeds a column; breaking weakest link (strength {weakest})"
                    ),
                );
                if weakest_pos < placed.len() {
                    let resume = placed[weakest_pos].piece_index;
                    placed.truncate(weakest_pos);
                    idx = resume;
                }
            } else {
                let resume = placed[chain_start].piece_index;
                // Pulling the chain back must not empty the page outright,
                // or pagination would stop making progress.
                if resume > start || col + 1 < ncols {
                    placed.truncate(chain_start);
                    idx = resume;
                } else {
                    engine.diags.warn(
                        None,
                        WarningKind::KeepViolated,
                        "keep chain fills the whole page; splitting at the overflow point",
                    );
                }
            }
        }

        if col + 1 < ncols {
            for p in &placed {
                if let Some(t) = &pieces[p.piece_index].table {
                    started_page.insert(t.id);
                }
            }
            col += 1;
            y = 0.0;
            tables_headed.clear();
        } else {
            break 'pages;
        }
    }

    // Whatever stayed placed marks its table as begun for later pages.
    for p in &placed {
        if let Some(t) = &pieces[p.piece_index].table {
            tables_started.insert(t.id);
        }
    }

    // Emit footers for tables interrupted by the page break.
    if idx < pieces.len() {
        if let (Some(last), Some(next)) = (placed.last(), pieces.get(idx)) {
            let last_table = pieces[last.piece_index].table.as_ref();
            let next_table = next.table.as_ref();
            if let (Some(lt), Some(nt)) = (last_table, next_table) {
                if lt.id == nt.id && !lt.omit_footer_at_break {
                    let mut fy = last.y + pieces[last.piece_index].height;
                    let fcol = last.column;
                    for rp in lt.footer.iter() {
                        let mut area = rp.area.clone();
                        offset_area(
                            &mut area,
                            body.x + fcol as f64 * (col_width + gap),
                            body.y + fy,
                        );
                        repeat_areas.push(area);
                        fy += rp.height;
                    }
                }
            }
        }
    }

    // Realize placements into page-coordinate areas, wrapper paint first.
    let mut areas: Vec<Area> = Vec::new();
    let mut wrapper_extents: HashMap<(usize, u32), (f64, f64)> = HashMap::new();
    for p in &placed {
        let piece = &pieces[p.piece_index];
        for &w in &piece.wrappers {
            let entry = wrapper_extents
                .entry((p.column, w))
                .or_insert((p.y, p.y + piece.height));
            entry.0 = entry.0.min(p.y);
            entry.1 = entry.1.max(p.y + piece.height);
        }
    }
    let mut wrapper_keys: Vec<(usize, u32)> = wrapper_extents.keys().copied().collect();
    wrapper_keys.sort();
    for key in wrapper_keys {
        let (top, bottom) = wrapper_extents[&key];
        let info = &engine.wrappers[key.1 as usize];
        let col_x = body.x + key.0 as f64 * (col_width + gap);
        let mut block = BlockArea::new(Rect::new(
            col_x + info.x,
            body.y + top,
            info.width,
            bottom - top,
        ));
        block.paint = info.paint.clone();
        areas.push(Area::Block(block));
    }

    for p in &placed {
        let piece = &pieces[p.piece_index];
        if let PieceKind::Area(area) = &piece.kind {
            let mut area = area.clone();
            offset_area(
                &mut area,
                body.x + p.column as f64 * (col_width + gap),
                body.y + p.y,
            );
            areas.push(area);
        }
    }
    areas.extend(repeat_areas);
    areas.extend(absolute_areas);

    let footnote_areas = footnotes.into_areas(body);

    Ok(FilledPage {
        areas,
        footnote_areas,
        markers,
        next_piece: idx,
        closing_break,
        break_at,
    })
}

// ─── The document run ───────────────────────────────────────────

/// Lay the whole document out into an area tree.
pub(crate) fn run_document(engine: &mut Engine<'_>) -> Result<AreaTree, FolioError> {
    let masters = parse_masters(engine)?;
    let mut pages: Vec<PageArea> = Vec::new();
    let mut marker_state = MarkerState::default();
    let mut next_page_number = 1u32;

    let sequences: Vec<NodeId> = engine
        .tree
        .children_of_kind(engine.tree.root(), FoKind::PageSequence)
        .collect();

    for seq in sequences {
        marker_state.start_sequence();
        next_page_number = paginate_sequence(
            engine,
            seq,
            &masters,
            next_page_number,
            &mut pages,
            &mut marker_state,
        )?;
    }

    patch_citations(engine, &mut pages);

    let outline = collect_outline(engine);
    let fonts = finish_fonts(engine, &mut pages)?;

    Ok(AreaTree {
        pages,
        fonts,
        outline,
    })
}

/// Paginate one page sequence; returns the next page number.
fn paginate_sequence(
    engine: &mut Engine<'_>,
    seq: NodeId,
    masters: &MasterSet,
    start_number: u32,
    pages: &mut Vec<PageArea>,
    marker_state: &mut MarkerState,
) -> Result<u32, FolioError> {
    let reference = engine
        .res
        .specified(seq, "master-reference")
        .unwrap_or("")
        .to_string();
    let master_ref =
        masters
            .by_name
            .get(&reference)
            .ok_or_else(|| FolioError::UnknownReference {
                node: seq,
                reference: reference.clone(),
            })?;

    let first_number = match engine.res.specified(seq, "initial-page-number") {
        None | Some("auto") => start_number,
        Some("auto-odd") => start_number + (start_number % 2 == 0) as u32,
        Some("auto-even") => start_number + (start_number % 2 == 1) as u32,
        Some(v) => v.parse().unwrap_or(start_number),
    };

    // Flatten the flow against the first master's body geometry.
    let mut selector = MasterSelector::new(masters, master_ref);
    let first_master = &masters.masters[selector.select(0, first_number, false, false)];
    let body = first_master.body_rect();
    let ncols = first_master.body.column_count.max(1) as usize;
    let col_width =
        (body.width - first_master.body.column_gap * (ncols as f64 - 1.0)) / ncols as f64;

    let flow = engine
        .tree
        .children_of_kind(seq, FoKind::Flow)
        .next();
    let pieces = match flow {
        Some(f) => {
            let ctx = FlattenCtx {
                x: 0.0,
                width: col_width,
                page: body,
                wrappers: Vec::new(),
            };
            engine.flatten_flow(f, &ctx)?
        }
        None => Vec::new(),
    };

    let statics: Vec<(String, NodeId)> = engine
        .tree
        .children_of_kind(seq, FoKind::StaticContent)
        .map(|s| {
            (
                engine
                    .res
                    .specified(s, "flow-name")
                    .unwrap_or("")
                    .to_string(),
                s,
            )
        })
        .collect();

    let mut selector = MasterSelector::new(masters, master_ref);
    let mut page_number = first_number;
    let mut seq_index = 0u32;
    let mut piece_idx = 0usize;
    let mut skip_break: Option<usize> = None;
    let seq_pages_start = pages.len();
    // (pages index, piece start, master, number, skip) per body page, for
    // the refinement passes below.
    let mut body_pages: Vec<(usize, usize, usize, u32, Option<usize>)> = Vec::new();
    let mut saw_blank = false;
    let mut tables_started: BTreeSet<u32> = BTreeSet::new();
    // Snapshot of the table state entering the final page, for the
    // refinement passes.
    let mut last_page_tables: BTreeSet<u32> = BTreeSet::new();

    loop {
        if engine.options.is_cancelled() {
            return Err(FolioError::Cancelled);
        }

        let master_idx = selector.select(seq_index, page_number, false, false);
        let master = masters.masters[master_idx].clone();

        last_page_tables = tables_started.clone();
        let filled = fill_page(
            engine,
            &pieces,
            piece_idx,
            &master,
            page_number,
            None,
            skip_break,
            &mut tables_started,
        )?;
        let stalled =
            filled.next_piece == piece_idx && filled.break_at.is_none() && piece_idx < pieces.len();
        if stalled {
            // Nothing fit and nothing moved: force progress rather than
            // spin (the oversized piece was already warned about).
            engine.diags.warn(
                None,
                WarningKind::LayoutOverflow,
                format!("piece skipped on page {page_number}: taller than any region"),
            );
            piece_idx += 1;
            skip_break = None;
            continue;
        }

        marker_state.start_page();
        for decl in &filled.markers {
            marker_state.record(decl);
        }

        let page = assemble_page(
            engine,
            &master,
            page_number,
            filled.areas,
            filled.footnote_areas,
            &statics,
            marker_state,
        )?;
        body_pages.push((pages.len(), piece_idx, master_idx, page_number, skip_break));
        pages.push(page);

        piece_idx = filled.next_piece;
        skip_break = filled.break_at;
        seq_index += 1;
        page_number += 1;

        match filled.closing_break {
            BreakKind::EvenPage if page_number % 2 == 1 => {
                let page = blank_page(engine, masters, &mut selector, seq_index, page_number, &statics, marker_state)?;
                pages.push(page);
                saw_blank = true;
                seq_index += 1;
                page_number += 1;
            }
            BreakKind::OddPage if page_number % 2 == 0 => {
                let page = blank_page(engine, masters, &mut selector, seq_index, page_number, &statics, marker_state)?;
                pages.push(page);
                saw_blank = true;
                seq_index += 1;
                page_number += 1;
            }
            _ => {}
        }

        if piece_idx >= pieces.len() {
            break;
        }
    }

    // Refinement: a `page-position="last"` alternative can only be honored
    // once the page count is known, so re-select and re-fill the final
    // page when the conditions would now pick a different master.
    if has_last_condition(master_ref) && !saw_blank && !body_pages.is_empty() {
        let mut replay = MasterSelector::new(masters, master_ref);
        let last = body_pages.len() - 1;
        let mut final_master = 0usize;
        for (i, &(_, _, _, number, _)) in body_pages.iter().enumerate() {
            final_master = replay.select(i as u32, number, false, i == last);
        }
        let (page_pos, start, recorded, number, skip) = body_pages[last];
        if final_master != recorded {
            let master = masters.masters[final_master].clone();
            let mut tables = last_page_tables.clone();
            let filled = fill_page(engine, &pieces, start, &master, number, None, skip, &mut tables)?;
            pages[page_pos] = assemble_page(
                engine,
                &master,
                number,
                filled.areas,
                filled.footnote_areas,
                &statics,
                marker_state,
            )?;
            body_pages[last] = (page_pos, start, final_master, number, skip);
        }
    }

    // Column balancing: on the sequence's final page, a multi-column body
    // is refilled at progressively lower column heights until the columns
    // even out.
    if let Some(&(page_pos, start, master_idx, number, skip)) = body_pages.last() {
        let master = masters.masters[master_idx].clone();
        let ncols_last = master.body.column_count.max(1) as usize;
        if ncols_last > 1 && start < pieces.len() {
            let total: f64 = pieces[start..].iter().map(|p| p.height).sum();
            let body_height = master.body_rect().height;
            let mut cap = (total / ncols_last as f64).min(body_height);
            let mut balanced = None;
            for _ in 0..12 {
                let mut tables = last_page_tables.clone();
                let filled = fill_page(
                    engine,
                    &pieces,
                    start,
                    &master,
                    number,
                    Some(cap),
                    skip,
                    &mut tables,
                )?;
                if filled.next_piece >= pieces.len() {
                    balanced = Some(filled);
                    break;
                }
                cap = (cap * 1.15 + 6.0).min(body_height);
            }
            if let Some(filled) = balanced {
                pages[page_pos] = assemble_page(
                    engine,
                    &master,
                    number,
                    filled.areas,
                    filled.footnote_areas,
                    &statics,
                    marker_state,
                )?;
            }
        }
    }

    // force-page-count may demand a trailing blank page.
    let force = engine
        .res
        .specified(seq, "force-page-count")
        .unwrap_or("auto");
    let count_in_seq = (pages.len() - seq_pages_start) as u32;
    let last_number = page_number - 1;
    let needs_pad = match force {
        "even" => count_in_seq % 2 == 1,
        "odd" => count_in_seq % 2 == 0,
        "end-on-even" => last_number % 2 == 1,
        "end-on-odd" => last_number % 2 == 0,
        _ => false,
    };
    if needs_pad {
        let page = blank_page(engine, masters, &mut selector, seq_index, page_number, &statics, marker_state)?;
        pages.push(page);
        page_number += 1;
    }

    Ok(page_number)
}

#[allow(clippy::too_many_arguments)]
fn blank_page(
    engine: &mut Engine<'_>,
    masters: &MasterSet,
    selector: &mut MasterSelector<'_>,
    seq_index: u32,
    page_number: u32,
    statics: &[(String, NodeId)],
    marker_state: &mut MarkerState,
) -> Result<PageArea, FolioError> {
    let master_idx = selector.select(seq_index, page_number, true, false);
    let master = masters.masters[master_idx].clone();
    marker_state.start_page();
    assemble_page(
        engine,
        &master,
        page_number,
        Vec::new(),
        Vec::new(),
        statics,
        marker_state,
    )
}

/// Attach static regions to a filled body and produce the final page.
fn assemble_page(
    engine: &mut Engine<'_>,
    master: &SimpleMaster,
    page_number: u32,
    body_areas: Vec<Area>,
    footnote_areas: Vec<Area>,
    statics: &[(String, NodeId)],
    marker_state: &MarkerState,
) -> Result<PageArea, FolioError> {
    let mut regions = Vec::new();

    let body_rect = master.body_rect();
    let mut body_paint = Paint::default();
    if let Some(bg) = &master.body.background {
        body_paint.background = Some(bg.clone());
    }
    let mut areas = body_areas;
    // display-align on the body shifts short content down as one stack.
    if matches!(
        master.body.display_align,
        DisplayAlign::Center | DisplayAlign::After
    ) && !areas.is_empty()
    {
        let bottom = areas
            .iter()
            .map(|a| a.rect().bottom())
            .fold(f64::NEG_INFINITY, f64::max);
        let slack = (body_rect.bottom() - bottom).max(0.0);
        let dy = match master.body.display_align {
            DisplayAlign::Center => slack / 2.0,
            _ => slack,
        };
        if dy > 0.0 {
            for area in &mut areas {
                offset_area(area, 0.0, dy);
            }
        }
    }
    areas.extend(footnote_areas);
    regions.push(RegionArea {
        kind: RegionKind::Body,
        rect: body_rect,
        paint: body_paint,
        areas,
    });

    // Static regions lay out after the body so markers resolve against the
    // finished page.
    let flows: [(RegionKind, &str); 4] = [
        (RegionKind::Before, "xsl-region-before"),
        (RegionKind::After, "xsl-region-after"),
        (RegionKind::Start, "xsl-region-start"),
        (RegionKind::End, "xsl-region-end"),
    ];
    for (kind, flow_name) in flows {
        let rect = match master.region_rect(kind) {
            Some(r) => r,
            None => continue,
        };
        let content = statics.iter().find(|(name, _)| name == flow_name);
        let mut areas = Vec::new();
        if let Some((_, static_node)) = content {
            areas = layout_static(engine, *static_node, rect, marker_state, page_number)?;
        }
        regions.push(RegionArea {
            kind,
            rect,
            paint: Paint::default(),
            areas,
        });
    }

    Ok(PageArea {
        number: page_number,
        width: master.width,
        height: master.height,
        regions,
    })
}

/// Lay out one static-content flow into its region rect, substituting
/// retrieve-markers from the page's marker state.
fn layout_static(
    engine: &mut Engine<'_>,
    static_node: NodeId,
    rect: Rect,
    marker_state: &MarkerState,
    page_number: u32,
) -> Result<Vec<Area>, FolioError> {
    // Expand block-level retrieve-markers into a child list the flattener
    // can digest directly; inline-level ones resolve through the marker
    // view set on the engine for the duration of this region.
    let children = expand_retrieves(engine, static_node, marker_state);

    let ctx = FlattenCtx {
        x: 0.0,
        width: rect.width,
        page: rect,
        wrappers: Vec::new(),
    };
    engine.current_markers = Some(marker_state.clone());
    let mut pieces = Vec::new();
    let flattened = engine.flatten_children(&children, &ctx, &mut pieces);
    engine.current_markers = None;
    flattened?;

    let mut y = 0.0;
    let mut areas = Vec::new();
    let mut total = 0.0;
    for piece in &pieces {
        total += piece.height;
    }
    let display_align = engine.res.display_align(static_node);
    if total > rect.height + 0.01 {
        engine.diags.warn(
            Some(static_node),
            WarningKind::LayoutOverflow,
            format!(
                "static content {total:.1}pt exceeds region {:.1}pt on page {page_number}; clipped",
                rect.height
            ),
        );
    } else {
        y += match display_align {
            DisplayAlign::Center => (rect.height - total) / 2.0,
            DisplayAlign::After => rect.height - total,
            _ => 0.0,
        };
    }

    for piece in pieces {
        match piece.kind {
            PieceKind::Spacer { .. } => y += piece.height,
            PieceKind::Area(mut area) => {
                offset_area(&mut area, rect.x, rect.y + y);
                y += piece.height;
                areas.push(area);
            }
        }
    }
    Ok(areas)
}

/// Replace retrieve-marker children with the captured marker's children.
fn expand_retrieves(
    engine: &mut Engine<'_>,
    node: NodeId,
    marker_state: &MarkerState,
) -> Vec<NodeId> {
    let mut out = Vec::new();
    for &child in engine.tree.children(node) {
        if engine.tree.kind(child) == FoKind::RetrieveMarker {
            let class = engine
                .res
                .specified(child, "retrieve-class-name")
                .unwrap_or("");
            let position = engine
                .res
                .computed(child, "retrieve-position")
                .unwrap_or("first-starting-within-page");
            let boundary = engine
                .res
                .computed(child, "retrieve-boundary")
                .unwrap_or("page-sequence");
            if let Some(marker) = marker_state.resolve(class, position, boundary) {
                out.extend(engine.tree.children(marker).iter().copied());
            }
        } else {
            out.push(child);
        }
    }
    out
}

// ─── Citations ──────────────────────────────────────────────────

/// Second pass: resolve page-number placeholders and unresolved citations,
/// re-shaping the affected glyph runs.
fn patch_citations(engine: &mut Engine<'_>, pages: &mut [PageArea]) {
    let positions = engine.id_positions.clone();
    for page in pages.iter_mut() {
        let number = page.number;
        for region in &mut page.regions {
            for area in &mut region.areas {
                patch_area(engine, area, number, &positions);
            }
        }
    }
}

fn patch_area(
    engine: &mut Engine<'_>,
    area: &mut Area,
    page_number: u32,
    positions: &HashMap<String, (u32, f64)>,
) {
    match area {
        Area::Block(b) => {
            for child in &mut b.children {
                patch_area(engine, child, page_number, positions);
            }
        }
        Area::Line(l) => {
            for child in &mut l.children {
                patch_area(engine, child, page_number, positions);
            }
        }
        Area::Glyphs(run) => {
            let citation = match run.citation.take() {
                Some(c) => c,
                None => return,
            };
            let text = if citation == CITATION_CURRENT_PAGE {
                page_number.to_string()
            } else {
                match positions.get(&citation) {
                    Some((n, _)) => n.to_string(),
                    None => {
                        engine.diags.warn(
                            None,
                            WarningKind::UnknownReference,
                            format!("page-number-citation ref-id {citation:?} is undefined"),
                        );
                        "??".to_string()
                    }
                }
            };
            reshape_run(engine, run, &text);
        }
        _ => {}
    }
}

/// Re-shape a run's text in place, keeping its position and styling.
fn reshape_run(engine: &mut Engine<'_>, run: &mut GlyphRun, text: &str) {
    let resolved = engine.slot(run.font).resolved.clone();
    run.glyphs.clear();
    run.advances.clear();
    run.adjustments.clear();
    match &resolved {
        ResolvedFont::Base(base) => {
            let m = base.metrics();
            for ch in text.chars() {
                let cp = ch as u32;
                run.glyphs
                    .push(if cp <= 0xFF { cp as u16 } else { b'?' as u16 });
                run.advances.push(m.char_width(ch, run.size));
                run.adjustments.push(0);
            }
        }
        ResolvedFont::Embedded(font) => {
            let shaped = font.shape(text, &crate::font::Features::default());
            let upem = font.units_per_em as f64;
            for g in &shaped.glyphs {
                run.glyphs.push(g.glyph_id);
                run.advances.push(g.x_advance as f64 / upem * run.size);
                run.adjustments
                    .push((g.kern as f64 * 1000.0 / upem).round() as i16);
            }
        }
    }
    run.text = text.to_string();
    run.width = run.advances.iter().sum();
}

// ─── Outline ────────────────────────────────────────────────────

fn collect_outline(engine: &mut Engine<'_>) -> Vec<OutlineEntry> {
    let tree = engine.tree;
    let bookmark_tree = match tree.first_child_of_kind(tree.root(), FoKind::BookmarkTree) {
        Some(t) => t,
        None => return Vec::new(),
    };
    fn walk(engine: &Engine<'_>, node: NodeId) -> Vec<OutlineEntry> {
        let tree = engine.tree;
        let mut out = Vec::new();
        for bookmark in tree.children_of_kind(node, FoKind::Bookmark) {
            let title = tree
                .first_child_of_kind(bookmark, FoKind::BookmarkTitle)
                .and_then(|t| tree.children(t).first().copied())
                .and_then(|t| tree.text(t))
                .unwrap_or("")
                .to_string();
            let dest = engine
                .res
                .specified(bookmark, "internal-destination")
                .unwrap_or("");
            let (page, y) = engine
                .id_positions
                .get(dest)
                .copied()
                .unwrap_or((1, 0.0));
            out.push(OutlineEntry {
                title,
                page,
                y,
                children: walk(engine, bookmark),
            });
        }
        out
    }
    walk(engine, bookmark_tree)
}

// ─── Fonts ──────────────────────────────────────────────────────

/// Build the area-tree font table: subset embedded fonts to the glyphs the
/// document used (remapping every run), or embed whole with a ToUnicode
/// built over the used set.
fn finish_fonts(
    engine: &mut Engine<'_>,
    pages: &mut [PageArea],
) -> Result<Vec<FontResource>, FolioError> {
    // Used glyphs per font slot.
    let mut used: Vec<BTreeSet<u16>> = vec![BTreeSet::new(); engine.font_slots.len()];
    for page in pages.iter() {
        for run in page.glyph_runs() {
            if let Some(set) = used.get_mut(run.font as usize) {
                set.extend(run.glyphs.iter().copied());
            }
        }
    }

    let mut resources = Vec::with_capacity(engine.font_slots.len());
    let mut remaps: Vec<Option<HashMap<u16, u16>>> = Vec::with_capacity(engine.font_slots.len());

    for (i, slot) in engine.font_slots.iter().enumerate() {
        match &slot.resolved {
            ResolvedFont::Base(base) => {
                resources.push(FontResource::Base {
                    name: base.pdf_name().to_string(),
                });
                remaps.push(None);
            }
            ResolvedFont::Embedded(font) => {
                if engine.options.subset_fonts {
                    match subset::subset(font, &used[i]) {
                        Ok(sub) => {
                            resources.push(FontResource::Embedded {
                                family: slot.family.clone(),
                                weight: slot.weight,
                                italic: slot.italic,
                                data: sub.data,
                                to_unicode: sub.to_unicode,
                            });
                            remaps.push(Some(sub.gid_remap));
                            continue;
                        }
                        Err(e) => {
                            log::warn!(
                                "subsetting {:?} failed ({e}); embedding whole font",
                                slot.family
                            );
                        }
                    }
                }
                resources.push(FontResource::Embedded {
                    family: slot.family.clone(),
                    weight: slot.weight,
                    italic: slot.italic,
                    data: font.data().to_vec(),
                    to_unicode: subset::to_unicode_for(font, used[i].iter().copied()),
                });
                remaps.push(None);
            }
        }
    }

    // Rewrite run glyph ids into subset space.
    for page in pages.iter_mut() {
        for region in &mut page.regions {
            for area in &mut region.areas {
                remap_area(area, &remaps);
            }
        }
    }

    Ok(resources)
}

fn remap_area(area: &mut Area, remaps: &[Option<HashMap<u16, u16>>]) {
    match area {
        Area::Block(b) => {
            for child in &mut b.children {
                remap_area(child, remaps);
            }
        }
        Area::Line(l) => {
            for child in &mut l.children {
                remap_area(child, remaps);
            }
        }
        Area::Glyphs(run) => {
            if let Some(Some(remap)) = remaps.get(run.font as usize) {
                for gid in &mut run.glyphs {
                    *gid = remap.get(gid).copied().unwrap_or(0);
                }
            }
        }
        _ => {}
    }
}
