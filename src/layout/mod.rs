//! # Layout Engine
//!
//! Transforms the formatting-object tree into the area tree, one page
//! sequence at a time. The heart of the design is the *piece list*: every
//! flow is flattened into a linear sequence of [`Piece`]s — lines, atomic
//! blocks, table rows, spacers — each with its height, keep strength, break
//! requests, footnotes and markers attached. The page builder then walks
//! that list, asking only "does the next piece fit", which keeps every
//! keep/break/footnote decision in one place.
//!
//! Pieces are assembled with x positions baked in relative to their column
//! and y relative to the piece's own top; placement shifts them into page
//! coordinates.

pub mod page;
pub mod table;

use crate::area::{
    Area, BlockArea, BorderSegment, GlyphRun, ImageArea, LineArea, Paint, Rect, RuleArea,
};
use crate::error::{Diagnostics, FolioError, WarningKind};
use crate::fo::properties::{
    AbsEdge, BreakKind, Keep, Resolver, TextStyle, TextTransform, WrapOption,
};
use crate::fo::{FoKind, FoTree, NodeId};
use crate::font::{FontContext, Features, ResolvedFont};
use crate::options::{LayoutOptions, LineBreaking};
use crate::text::hyphenate::{Hyphenator, HypherHyphenator};
use crate::text::knuth_plass::OptimalBreaker;
use crate::text::{
    BoxContent, BreakParams, BreakResult, Glue, GreedyBreaker, InlineBox, InlineItem, Leader,
    LeaderPattern, LineBreaker, Penalty,
};
use std::collections::HashMap;

/// Where a glyph run's page reference comes from, for the patch pass.
pub(crate) const CITATION_CURRENT_PAGE: &str = "\u{1}current-page";

/// A font used by the document, tracked for the area-tree font table.
pub(crate) struct FontSlot {
    pub family: String,
    pub weight: u16,
    pub italic: bool,
    pub resolved: ResolvedFont,
}

/// Paint wrapper for blocks that split across columns: the builder draws
/// one rect per column behind the pieces that carry the wrapper.
#[derive(Debug, Clone)]
pub(crate) struct WrapperInfo {
    /// x and width of the painted rect, relative to the column.
    pub x: f64,
    pub width: f64,
    pub paint: Paint,
}

/// Marker declaration captured from flow content.
#[derive(Debug, Clone)]
pub(crate) struct MarkerDecl {
    pub class: String,
    pub node: NodeId,
}

/// Table repetition context shared by all pieces of one table.
#[derive(Debug, Clone)]
pub(crate) struct TableCtx {
    pub id: u32,
    pub header: std::sync::Arc<Vec<RepeatPiece>>,
    pub footer: std::sync::Arc<Vec<RepeatPiece>>,
    pub omit_footer_at_break: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct RepeatPiece {
    pub height: f64,
    pub area: Area,
}

/// What a piece contributes when placed.
#[derive(Debug, Clone)]
pub(crate) enum PieceKind {
    Area(Area),
    /// Vertical space; `discard` drops it at a region/column start.
    Spacer { discard: bool },
}

/// One placeable unit of flow content.
#[derive(Debug, Clone)]
pub(crate) struct Piece {
    pub height: f64,
    pub kind: PieceKind,
    /// Keep strength binding this piece to its predecessor; 0 = none,
    /// 1000 = always.
    pub keep_with_prev: u32,
    pub break_before: BreakKind,
    /// Footnote bodies anchored on this piece.
    pub footnotes: Vec<NodeId>,
    /// Paint wrappers enclosing this piece, outermost first.
    pub wrappers: Vec<u32>,
    pub table: Option<TableCtx>,
    /// `id` properties to register against the page this piece lands on.
    pub id_refs: Vec<String>,
    pub markers: Vec<MarkerDecl>,
    /// Absolutely positioned content: placed at this page-relative rect,
    /// consuming no flow space.
    pub absolute: Option<Rect>,
}

impl Piece {
    pub(crate) fn area(height: f64, area: Area) -> Piece {
        Piece {
            height,
            kind: PieceKind::Area(area),
            keep_with_prev: 0,
            break_before: BreakKind::Auto,
            footnotes: Vec::new(),
            wrappers: Vec::new(),
            table: None,
            id_refs: Vec::new(),
            markers: Vec::new(),
            absolute: None,
        }
    }

    pub(crate) fn spacer(height: f64, discard: bool) -> Piece {
        Piece {
            height,
            kind: PieceKind::Spacer { discard },
            keep_with_prev: 0,
            break_before: BreakKind::Auto,
            footnotes: Vec::new(),
            wrappers: Vec::new(),
            table: None,
            id_refs: Vec::new(),
            markers: Vec::new(),
            absolute: None,
        }
    }
}

/// Flattening context threaded down the block tree.
#[derive(Debug, Clone)]
pub(crate) struct FlattenCtx {
    /// x of the content edge relative to the column.
    pub x: f64,
    /// Available inline-progression width.
    pub width: f64,
    /// The page content rect absolute positioning resolves against.
    pub page: Rect,
    /// Enclosing paint wrappers.
    pub wrappers: Vec<u32>,
}

/// Shift an area (and its subtree) by (dx, dy).
pub(crate) fn offset_area(area: &mut Area, dx: f64, dy: f64) {
    match area {
        Area::Block(b) => {
            b.rect.x += dx;
            b.rect.y += dy;
            for child in &mut b.children {
                offset_area(child, dx, dy);
            }
        }
        Area::Line(l) => {
            l.rect.x += dx;
            l.rect.y += dy;
            l.baseline += dy;
            for child in &mut l.children {
                offset_area(child, dx, dy);
            }
        }
        Area::Glyphs(g) => {
            g.x += dx;
            g.y += dy;
        }
        Area::Rule(r) => {
            r.rect.x += dx;
            r.rect.y += dy;
        }
        Area::Image(i) => {
            i.rect.x += dx;
            i.rect.y += dy;
        }
    }
}

/// The per-run layout engine. Owns diagnostics and the font slot table;
/// borrows the tree, fonts and options.
pub(crate) struct Engine<'a> {
    pub tree: &'a FoTree,
    pub res: Resolver<'a>,
    pub fonts: &'a FontContext,
    pub options: &'a LayoutOptions,
    pub diags: Diagnostics,
    pub hyphenator: Option<HypherHyphenator>,
    pub font_slots: Vec<FontSlot>,
    font_ids: HashMap<(String, u16, bool), u32>,
    pub wrappers: Vec<WrapperInfo>,
    /// id -> (page number, y) registered as content is placed.
    pub id_positions: HashMap<String, (u32, f64)>,
    /// Marker view for the static-content region currently laying out;
    /// `None` while body content flattens.
    pub current_markers: Option<page::MarkerState>,
    next_table_id: u32,
}

impl<'a> Engine<'a> {
    pub fn new(
        tree: &'a FoTree,
        fonts: &'a FontContext,
        options: &'a LayoutOptions,
    ) -> Engine<'a> {
        let hyphenator = if options.enable_hyphenation {
            let h = HypherHyphenator::from_options(options);
            if h.is_none() {
                log::warn!(
                    "no hyphenation dictionary for {:?}; hyphenation disabled",
                    options.hyphenation_language
                );
            }
            h
        } else {
            None
        };
        Engine {
            tree,
            res: Resolver::new(tree),
            fonts,
            options,
            diags: Diagnostics::new(),
            hyphenator,
            font_slots: Vec::new(),
            font_ids: HashMap::new(),
            wrappers: Vec::new(),
            id_positions: HashMap::new(),
            current_markers: None,
            next_table_id: 0,
        }
    }

    fn breaker(&self) -> Box<dyn LineBreaker> {
        match self.options.line_breaking {
            LineBreaking::Greedy => Box::new(GreedyBreaker),
            LineBreaking::Optimal => Box::new(OptimalBreaker),
        }
    }

    pub(crate) fn next_table_id(&mut self) -> u32 {
        self.next_table_id += 1;
        self.next_table_id
    }

    /// Resolve a font and intern it in the slot table.
    pub(crate) fn font_id(
        &mut self,
        family: &str,
        weight: u16,
        italic: bool,
    ) -> Result<u32, FolioError> {
        let key = (family.trim().to_ascii_lowercase(), weight, italic);
        if let Some(&id) = self.font_ids.get(&key) {
            return Ok(id);
        }
        let resolved = self.fonts.resolve(family, weight, italic)?;
        let id = self.font_slots.len() as u32;
        self.font_slots.push(FontSlot {
            family: family.to_string(),
            weight,
            italic,
            resolved,
        });
        self.font_ids.insert(key, id);
        Ok(id)
    }

    pub(crate) fn slot(&self, id: u32) -> &FontSlot {
        &self.font_slots[id as usize]
    }

    // ─── Text shaping ───────────────────────────────────────────

    /// Shape a piece of text into a glyph run with point-space advances.
    pub(crate) fn shape_text(
        &mut self,
        text: &str,
        style: &TextStyle,
        node: NodeId,
    ) -> Result<GlyphRun, FolioError> {
        let font_id = self.font_id(&style.family, style.weight, style.italic)?;
        let resolved = self.slot(font_id).resolved.clone();
        Ok(self.shape_with(font_id, &resolved, text, style.size, &style.color, style, node))
    }

    pub(crate) fn shape_with(
        &mut self,
        font_id: u32,
        resolved: &ResolvedFont,
        text: &str,
        size: f64,
        color: &str,
        style: &TextStyle,
        node: NodeId,
    ) -> GlyphRun {
        let mut glyphs = Vec::new();
        let mut advances = Vec::new();
        let mut adjustments: Vec<i16> = Vec::new();
        match resolved {
            ResolvedFont::Base(base) => {
                let m = base.metrics();
                for ch in text.chars() {
                    let cp = ch as u32;
                    // Base fonts carry WinAnsi-compatible glyph codes; the
                    // serializer encodes runs in these directly.
                    let code = if cp <= 0xFF { cp as u16 } else { b'?' as u16 };
                    glyphs.push(code);
                    advances.push(m.char_width(ch, size) + style.letter_spacing);
                    adjustments.push(0);
                }
            }
            ResolvedFont::Embedded(font) => {
                let shaped = font.shape(text, &Features::default());
                for ch in &shaped.missing {
                    self.diags.warn(
                        Some(node),
                        WarningKind::MissingGlyph,
                        format!("no glyph for U+{:04X} in {:?}", *ch as u32, style.family),
                    );
                }
                let upem = font.units_per_em as f64;
                for g in &shaped.glyphs {
                    glyphs.push(g.glyph_id);
                    advances.push(g.x_advance as f64 / upem * size + style.letter_spacing);
                    adjustments.push((g.kern as f64 * 1000.0 / upem).round() as i16);
                }
            }
        }
        let width: f64 = advances.iter().sum();
        GlyphRun {
            font: font_id,
            size,
            color: color.to_string(),
            x: 0.0,
            y: 0.0,
            glyphs,
            advances,
            adjustments,
            text: text.to_string(),
            width,
            ascent: resolved.ascent(size),
            descent: resolved.descent(size),
            underline: style.underline,
            line_through: style.line_through,
            link: None,
            citation: None,
        }
    }

    // ─── Inline sequence construction ───────────────────────────

    /// Build the inline item sequence of a paragraph: descend through
    /// inline-level children, splicing text, links, leaders, characters,
    /// page numbers, graphics and footnote citations into one sequence.
    pub(crate) fn build_inline_items(
        &mut self,
        children: &[NodeId],
        style: &TextStyle,
    ) -> Result<Vec<InlineItem>, FolioError> {
        let mut builder = InlineBuilder {
            items: Vec::new(),
            pending_space: false,
            at_start: true,
        };
        for &child in children {
            self.inline_node(child, style, &mut builder, None)?;
        }
        Ok(builder.items)
    }

    fn inline_node(
        &mut self,
        node: NodeId,
        parent_style: &TextStyle,
        builder: &mut InlineBuilder,
        link: Option<&str>,
    ) -> Result<(), FolioError> {
        match self.tree.kind(node) {
            FoKind::Text => {
                let raw = self.tree.text(node).unwrap_or("").to_string();
                self.inline_text(&raw, node, parent_style, builder, link)?;
            }
            FoKind::Inline | FoKind::Wrapper | FoKind::InlineContainer => {
                let style = self.res.text_style(node);
                for &child in self.tree.children(node) {
                    self.inline_node(child, &style, builder, link)?;
                }
            }
            FoKind::BasicLink => {
                let style = self.res.text_style(node);
                let target = self
                    .res
                    .specified(node, "external-destination")
                    .map(|s| s.to_string())
                    .or_else(|| {
                        self.res
                            .specified(node, "internal-destination")
                            .map(|s| format!("#{s}"))
                    });
                for &child in self.tree.children(node) {
                    self.inline_node(child, &style, builder, target.as_deref())?;
                }
            }
            FoKind::BidiOverride => {
                let style = self.res.text_style(node);
                let mark = builder.items.len();
                for &child in self.tree.children(node) {
                    self.inline_node(child, &style, builder, link)?;
                }
                if self.res.computed(node, "direction") == Some("rtl") {
                    // Simplified direction flip: visual order reverses, no
                    // UAX#9 resolution.
                    builder.items[mark..].reverse();
                    let complex = builder.items[mark..].iter().any(|item| {
                        matches!(item, InlineItem::Box(b)
                            if matches!(&b.content, BoxContent::Glyphs(g)
                                if g.text.chars().any(is_strong_rtl)))
                    });
                    if complex {
                        self.diags.warn(
                            Some(node),
                            WarningKind::BidiSimplified,
                            "bidi-override applied as a simple flip; complex scripts unsupported",
                        );
                    }
                }
            }
            FoKind::Character => {
                if let Some(ch) = self.res.specified(node, "character").map(|s| s.to_string()) {
                    let style = self.res.text_style(node);
                    builder.flush_space(self, &style, node)?;
                    let run = self.shape_text(&ch, &style, node)?;
                    builder.push_run(run, link);
                }
            }
            FoKind::PageNumber => {
                let style = self.res.text_style(node);
                builder.flush_space(self, &style, node)?;
                let mut run = self.shape_text("00", &style, node)?;
                run.citation = Some(CITATION_CURRENT_PAGE.to_string());
                builder.push_run(run, link);
            }
            FoKind::PageNumberCitation => {
                let style = self.res.text_style(node);
                builder.flush_space(self, &style, node)?;
                let ref_id = self.res.specified(node, "ref-id").unwrap_or("").to_string();
                let mut run = self.shape_text("00", &style, node)?;
                run.citation = Some(ref_id);
                builder.push_run(run, link);
            }
            FoKind::ExternalGraphic | FoKind::InstreamForeignObject => {
                let style = self.res.text_style(node);
                builder.flush_space(self, &style, node)?;
                let (src, w, h) = self.graphic_geometry(node)?;
                builder.items.push(InlineItem::Box(InlineBox {
                    width: w,
                    content: BoxContent::Graphic {
                        src,
                        width: w,
                        height: h,
                    },
                }));
                builder.at_start = false;
            }
            FoKind::Leader => {
                let style = self.res.text_style(node);
                builder.flush_space(self, &style, node)?;
                builder.items.push(self.leader_item(node, &style));
                builder.at_start = false;
            }
            FoKind::Footnote => {
                // First child inline is the citation; the footnote-body is
                // anchored to whichever line the citation lands on.
                let children: Vec<NodeId> = self.tree.children(node).to_vec();
                for &child in &children {
                    if self.tree.kind(child) != FoKind::FootnoteBody {
                        self.inline_node(child, parent_style, builder, link)?;
                    }
                }
                if let Some(body) = self
                    .tree
                    .first_child_of_kind(node, FoKind::FootnoteBody)
                {
                    builder.items.push(InlineItem::Box(InlineBox {
                        width: 0.0,
                        content: BoxContent::FootnoteAnchor { body },
                    }));
                }
            }
            FoKind::Marker => {
                // Captured at the block level, invisible in the flow.
            }
            FoKind::RetrieveMarker => {
                // Only resolvable while a static region lays out; in a flow
                // it contributes nothing.
                let class = self.res.specified(node, "retrieve-class-name").unwrap_or("");
                let position = self
                    .res
                    .computed(node, "retrieve-position")
                    .unwrap_or("first-starting-within-page");
                let boundary = self
                    .res
                    .computed(node, "retrieve-boundary")
                    .unwrap_or("page-sequence");
                let marker = self
                    .current_markers
                    .as_ref()
                    .and_then(|m| m.resolve(class, position, boundary));
                if let Some(marker) = marker {
                    let children: Vec<NodeId> = self.tree.children(marker).to_vec();
                    for &child in &children {
                        self.inline_node(child, parent_style, builder, link)?;
                    }
                }
            }
            other => {
                log::debug!("fo:{} ignored in inline context", other.name());
            }
        }
        Ok(())
    }

    fn inline_text(
        &mut self,
        raw: &str,
        node: NodeId,
        style: &TextStyle,
        builder: &mut InlineBuilder,
        link: Option<&str>,
    ) -> Result<(), FolioError> {
        let collapse = self.res.boolean(node_or_parent(self.tree, node), "white-space-collapse", true);
        let treat_linefeed = self
            .res
            .computed(node_or_parent(self.tree, node), "linefeed-treatment")
            .unwrap_or("treat-as-space")
            .to_string();

        let text = apply_transform(raw, style.transform);
        let mut word = String::new();
        for ch in text.chars() {
            let is_linefeed = ch == '\n' || ch == '\r';
            if is_linefeed && treat_linefeed == "preserve" {
                self.flush_word(&mut word, node, style, builder, link)?;
                builder.items.push(InlineItem::forced_break());
                builder.pending_space = false;
                continue;
            }
            let is_space = ch == ' ' || ch == '\t' || is_linefeed;
            if is_space {
                self.flush_word(&mut word, node, style, builder, link)?;
                builder.pending_space = true;
                if !collapse {
                    // Preserved whitespace emits one glue per character.
                    builder.flush_space(self, style, node)?;
                }
            } else {
                word.push(ch);
            }
        }
        self.flush_word(&mut word, node, style, builder, link)?;
        Ok(())
    }

    /// Emit one whitespace-delimited word. Soft hyphens become flagged
    /// break points, UAX#14 opportunities inside the word (after dashes,
    /// between CJK characters) become unflagged ones, and each resulting
    /// segment is offered to the hyphenator.
    fn flush_word(
        &mut self,
        word: &mut String,
        node: NodeId,
        style: &TextStyle,
        builder: &mut InlineBuilder,
        link: Option<&str>,
    ) -> Result<(), FolioError> {
        if word.is_empty() {
            return Ok(());
        }
        let w = std::mem::take(word);
        builder.flush_space(self, style, node)?;

        let breaks = word_break_points(&w);
        if breaks.is_empty() {
            return self.emit_word_segment(&w, node, style, builder, link);
        }

        let hyphen_char = self
            .res
            .computed(node_or_parent(self.tree, node), "hyphenation-character")
            .unwrap_or("-")
            .to_string();
        let chars: Vec<char> = w.chars().collect();
        let mut prev = 0;
        let mut bounds = breaks;
        bounds.push(WordBreak {
            index: chars.len(),
            soft_hyphen: false,
        });
        for (i, bound) in bounds.iter().enumerate() {
            let end = bound.index.min(chars.len());
            let segment: String = chars[prev..end]
                .iter()
                .filter(|&&c| c != '\u{00AD}')
                .collect();
            if !segment.is_empty() {
                self.emit_word_segment(&segment, node, style, builder, link)?;
            }
            if i + 1 < bounds.len() {
                if bound.soft_hyphen {
                    let hyphen_run = self.shape_text(&hyphen_char, style, node)?;
                    builder.items.push(InlineItem::Penalty(Penalty {
                        width: hyphen_run.width,
                        cost: 50.0,
                        flagged: true,
                        hyphen: Some(hyphen_run),
                    }));
                } else {
                    builder.items.push(InlineItem::Penalty(Penalty {
                        width: 0.0,
                        cost: 0.0,
                        flagged: false,
                        hyphen: None,
                    }));
                }
            }
            prev = end;
        }
        Ok(())
    }

    /// Shape one unbreakable word segment, hyphenating when enabled.
    fn emit_word_segment(
        &mut self,
        w: &str,
        node: NodeId,
        style: &TextStyle,
        builder: &mut InlineBuilder,
        link: Option<&str>,
    ) -> Result<(), FolioError> {
        let hyphenate = self.res.boolean(node_or_parent(self.tree, node), "hyphenate", false)
            || self.options.enable_hyphenation;
        let points = if hyphenate {
            self.hyphen_points(w, style)
        } else {
            Vec::new()
        };

        if points.is_empty() {
            let run = self.shape_text(w, style, node)?;
            builder.push_run(run, link);
        } else {
            // Shape each fragment separately so ligatures never straddle a
            // potential hyphen.
            let chars: Vec<char> = w.chars().collect();
            let hyphen_char = self
                .res
                .computed(node_or_parent(self.tree, node), "hyphenation-character")
                .unwrap_or("-")
                .to_string();
            let hyphen_run = self.shape_text(&hyphen_char, style, node)?;
            let mut prev = 0;
            let mut bounds: Vec<usize> = points.clone();
            bounds.push(chars.len());
            for (i, &end) in bounds.iter().enumerate() {
                let fragment: String = chars[prev..end].iter().collect();
                let run = self.shape_text(&fragment, style, node)?;
                builder.push_run(run, link);
                if i + 1 < bounds.len() {
                    builder.items.push(InlineItem::Penalty(Penalty {
                        width: hyphen_run.width,
                        cost: 50.0,
                        flagged: true,
                        hyphen: Some(hyphen_run.clone()),
                    }));
                }
                prev = end;
            }
        }
        Ok(())
    }

    fn hyphen_points(&self, word: &str, style: &TextStyle) -> Vec<usize> {
        let base = match &self.hyphenator {
            Some(h) => h,
            None => return Vec::new(),
        };
        match style.language.as_deref() {
            Some(tag) => match base.for_language(tag) {
                Some(h) => h.break_points(word),
                None => base.break_points(word),
            },
            None => base.break_points(word),
        }
    }

    fn leader_item(&mut self, node: NodeId, style: &TextStyle) -> InlineItem {
        let fs = style.size;
        let optimum = self
            .res
            .length_opt(node, "leader-length.optimum", None)
            .or_else(|| self.res.length_opt(node, "leader-length", None))
            .unwrap_or(fs);
        let minimum = self
            .res
            .length_opt(node, "leader-length.minimum", None)
            .unwrap_or(0.0);
        let maximum = self
            .res
            .length_opt(node, "leader-length.maximum", None)
            .unwrap_or(f64::MAX / 4.0);
        let pattern = match self.res.computed(node, "leader-pattern").unwrap_or("space") {
            "rule" => LeaderPattern::Rule,
            "dots" => LeaderPattern::Dots,
            _ => LeaderPattern::Space,
        };
        let thickness = self.res.length(node, "rule-thickness", None, 1.0);
        InlineItem::Glue(Glue {
            width: optimum,
            stretch: (maximum - optimum).max(0.0),
            shrink: (optimum - minimum).max(0.0),
            leader: match pattern {
                LeaderPattern::Space => None,
                p => Some(Leader {
                    pattern: p,
                    thickness,
                    color: style.color.clone(),
                }),
            },
        })
    }

    fn graphic_geometry(&mut self, node: NodeId) -> Result<(String, f64, f64), FolioError> {
        let src = self
            .res
            .specified(node, "src")
            .map(|s| s.trim_start_matches("url(").trim_end_matches(')').trim_matches('\'').to_string())
            .unwrap_or_else(|| format!("instream-foreign-object#{node}"));

        let declared_w = self
            .res
            .length_opt(node, "content-width", None)
            .or_else(|| self.res.length_opt(node, "width", None));
        let declared_h = self
            .res
            .length_opt(node, "content-height", None)
            .or_else(|| self.res.length_opt(node, "height", None));

        let intrinsic = self.intrinsic_size(&src);
        let (iw, ih) = intrinsic.unwrap_or((0.0, 0.0));

        let (w, h) = match (declared_w, declared_h) {
            (Some(w), Some(h)) => (w, h),
            (Some(w), None) => (w, if iw > 0.0 { w * ih / iw } else { w }),
            (None, Some(h)) => (if ih > 0.0 { h * iw / ih } else { h }, h),
            (None, None) => {
                if iw > 0.0 {
                    (iw, ih)
                } else {
                    self.diags.warn(
                        Some(node),
                        WarningKind::InvalidValue,
                        format!("no dimensions for graphic {src:?}; using 0"),
                    );
                    (0.0, 0.0)
                }
            }
        };
        Ok((src, w, h))
    }

    /// Intrinsic size in points: the embedder-supplied table first, then a
    /// dimension probe of data-URI payloads.
    fn intrinsic_size(&self, src: &str) -> Option<(f64, f64)> {
        if let Some(info) = self.options.images.get(src) {
            return Some(info.size_pt());
        }
        if let Some(comma) = src.strip_prefix("data:").and_then(|rest| rest.find(',').map(|i| (rest, i))) {
            use base64::Engine as _;
            let (rest, i) = comma;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(rest[i + 1..].as_bytes())
                .ok()?;
            let (w, h) = probe_dimensions(&bytes)?;
            let scale = 72.0 / 96.0;
            return Some((w as f64 * scale, h as f64 * scale));
        }
        None
    }

    // ─── Paragraph layout ───────────────────────────────────────

    /// Lay out a paragraph (a run of inline content) into line pieces.
    pub(crate) fn layout_paragraph(
        &mut self,
        node: NodeId,
        inline_children: &[NodeId],
        ctx: &FlattenCtx,
    ) -> Result<Vec<Piece>, FolioError> {
        let style = self.res.text_style(node);
        let items = self.build_inline_items(inline_children, &style)?;
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let params = BreakParams {
            line_width: ctx.width,
            first_line_indent: self.res.length(node, "text-indent", Some(ctx.width), 0.0),
            align: self.res.text_align(node),
            tolerance: 2.0,
            wrap: self.res.wrap_option(node) == WrapOption::Wrap,
        };
        let result = self.breaker().break_lines(items, &params);

        if params.wrap {
            for line in &result.lines {
                // Overfull means the line cannot reach the target even at
                // full shrink.
                let shrink = crate::text::stretch_shrink(&result.items, line.start, line.end).1;
                if line.natural_width - shrink > params.line_width + 0.5 {
                    self.diags.warn(
                        Some(node),
                        WarningKind::LayoutOverflow,
                        format!(
                            "line width {:.1}pt exceeds available {:.1}pt",
                            line.natural_width, params.line_width
                        ),
                    );
                }
            }
        }

        let orphans = self.res.integer(node, "orphans", 2).max(1) as usize;
        let widows = self.res.integer(node, "widows", 2).max(1) as usize;
        let keep = self.res.keep(node, "keep-together");

        let line_count = result.lines.len();
        let mut pieces = Vec::with_capacity(line_count);
        for (i, line) in result.lines.iter().enumerate() {
            let (area, height, footnotes) = self.assemble_line(&result, line, &style, ctx);
            let mut piece = Piece::area(height, area);
            piece.footnotes = footnotes;
            if i > 0 {
                piece.keep_with_prev = if !keep.is_auto() {
                    keep.strength()
                } else if i < orphans || line_count - i < widows {
                    1000
                } else {
                    0
                };
            }
            pieces.push(piece);
        }
        Ok(pieces)
    }

    /// Position one broken line's items into a LineArea at (ctx.x, 0).
    fn assemble_line(
        &mut self,
        result: &BreakResult,
        line: &crate::text::Line,
        style: &TextStyle,
        ctx: &FlattenCtx,
    ) -> (Area, f64, Vec<NodeId>) {
        let items = &result.items[line.start..=line.end];
        let mut ascent: f64 = 0.0;
        let mut descent: f64 = 0.0;
        for item in items {
            if let InlineItem::Box(b) = item {
                match &b.content {
                    BoxContent::Glyphs(g) => {
                        ascent = ascent.max(g.ascent);
                        descent = descent.max(g.descent);
                    }
                    BoxContent::Graphic { height, .. } => ascent = ascent.max(*height),
                    BoxContent::FootnoteAnchor { .. } => {}
                }
            }
        }
        if ascent == 0.0 && descent == 0.0 {
            // A line with no boxes (leader-only) still needs metrics.
            ascent = style.size * 0.8;
            descent = style.size * 0.2;
        }
        let line_height = style.line_height.max(ascent + descent);
        let half_leading = (line_height - ascent - descent) / 2.0;
        let baseline = half_leading + ascent;

        let mut children = Vec::new();
        let mut footnotes = Vec::new();
        let mut x = ctx.x + line.start_offset;

        for (offset, item) in items.iter().enumerate() {
            let idx = line.start + offset;
            match item {
                InlineItem::Box(b) => match &b.content {
                    BoxContent::Glyphs(g) => {
                        let mut run = g.clone();
                        run.x = x;
                        run.y = baseline;
                        x += run.width;
                        push_run_with_decorations(&mut children, run);
                    }
                    BoxContent::Graphic { src, width, height } => {
                        children.push(Area::Image(ImageArea {
                            rect: Rect::new(x, baseline - height, *width, *height),
                            src: src.clone(),
                            clip: None,
                        }));
                        x += width;
                    }
                    BoxContent::FootnoteAnchor { body } => {
                        footnotes.push(*body);
                    }
                },
                InlineItem::Glue(g) => {
                    if idx == line.end {
                        continue; // break glue is consumed
                    }
                    let adjusted = if line.ratio >= 0.0 {
                        g.width + line.ratio * g.stretch
                    } else {
                        g.width + line.ratio * g.shrink
                    };
                    if let Some(leader) = &g.leader {
                        let thickness = leader.thickness;
                        children.push(Area::Rule(RuleArea {
                            rect: Rect::new(x, baseline - thickness, adjusted, thickness),
                            style: match leader.pattern {
                                LeaderPattern::Dots => "dotted".to_string(),
                                _ => "solid".to_string(),
                            },
                            color: leader.color.clone(),
                        }));
                    }
                    x += adjusted;
                }
                InlineItem::Penalty(p) => {
                    if idx == line.end && p.flagged {
                        if let Some(hyphen) = &p.hyphen {
                            let mut run = hyphen.clone();
                            run.x = x;
                            run.y = baseline;
                            x += run.width;
                            children.push(Area::Glyphs(run));
                        }
                    }
                }
            }
        }

        let area = Area::Line(LineArea {
            rect: Rect::new(ctx.x, 0.0, ctx.width, line_height),
            baseline,
            children,
        });
        (area, line_height, footnotes)
    }

    // ─── Block flattening ───────────────────────────────────────

    /// Flatten a flow's children into the linear piece list.
    pub(crate) fn flatten_flow(
        &mut self,
        parent: NodeId,
        ctx: &FlattenCtx,
    ) -> Result<Vec<Piece>, FolioError> {
        let mut out = Vec::new();
        let children: Vec<NodeId> = self.tree.children(parent).to_vec();
        self.flatten_children(&children, ctx, &mut out)?;
        Ok(out)
    }

    fn flatten_children(
        &mut self,
        children: &[NodeId],
        ctx: &FlattenCtx,
        out: &mut Vec<Piece>,
    ) -> Result<(), FolioError> {
        // Adjacent vertical spaces resolve to their maximum; space at a
        // region edge is discarded by the builder when conditional.
        let mut pending_space: Option<(f64, bool)> = None;
        let mut pending_break = BreakKind::Auto;
        let mut pending_keep: u32 = 0;

        let mut i = 0;
        while i < children.len() {
            let node = children[i];
            let kind = self.tree.kind(node);
            if !is_block_level(kind) {
                // Runs of inline content form anonymous paragraphs under
                // their parent block; handled by flatten_block.
                i += 1;
                continue;
            }

            let before = self.res.space(node, "space-before");
            let margin_top = self.res.margin(node, AbsEdge::Top, None);
            let space_amount = before.optimum.max(margin_top);
            match &mut pending_space {
                Some((h, discard)) => {
                    *h = h.max(space_amount);
                    *discard = *discard && before.discard_at_edge;
                }
                None => pending_space = Some((space_amount, before.discard_at_edge)),
            }

            let break_before = self.res.break_kind(node, "break-before");
            if break_before != BreakKind::Auto {
                pending_break = break_before;
            }

            let piece_start = out.len();
            if let Some((h, discard)) = pending_space.take() {
                if h > 0.0 {
                    out.push(Piece::spacer(h, discard));
                }
            }

            self.flatten_block(node, ctx, out)?;

            if out.len() > piece_start {
                out[piece_start].break_before = pending_break;
                pending_break = BreakKind::Auto;
                if pending_keep > 0 {
                    let target = &mut out[piece_start];
                    target.keep_with_prev = target.keep_with_prev.max(pending_keep);
                }
                // A spacer between kept blocks must not become a split
                // point.
                if pending_keep > 0 && matches!(out[piece_start].kind, PieceKind::Spacer { .. })
                {
                    if let Some(next) = out.get_mut(piece_start + 1) {
                        next.keep_with_prev = next.keep_with_prev.max(pending_keep);
                    }
                }
                pending_keep = 0;
            }

            // Keeps binding this block to the next.
            let keep_next = self.res.keep(node, "keep-with-next");
            let break_after = self.res.break_kind(node, "break-after");
            if break_after != BreakKind::Auto {
                pending_break = break_after;
            }

            let after = self.res.space(node, "space-after");
            let margin_bottom = self.res.margin(node, AbsEdge::Bottom, None);
            pending_space = Some((after.optimum.max(margin_bottom), after.discard_at_edge));

            // keep-with-previous of the following block also binds.
            let keep_prev_of_next = children
                .get(i + 1)
                .map(|&n| self.res.keep(n, "keep-with-previous"))
                .unwrap_or(Keep::Auto);
            pending_keep = keep_next.strength().max(keep_prev_of_next.strength());

            i += 1;
        }

        if let Some((h, discard)) = pending_space {
            if h > 0.0 {
                out.push(Piece::spacer(h, discard));
            }
        }
        Ok(())
    }

    fn flatten_block(
        &mut self,
        node: NodeId,
        ctx: &FlattenCtx,
        out: &mut Vec<Piece>,
    ) -> Result<(), FolioError> {
        match self.tree.kind(node) {
            FoKind::Block => self.flatten_simple_block(node, ctx, out),
            FoKind::BlockContainer => self.flatten_block_container(node, ctx, out),
            FoKind::Table => table::flatten_table(self, node, ctx, out),
            FoKind::ListBlock => self.flatten_list_block(node, ctx, out),
            FoKind::Wrapper => {
                let children: Vec<NodeId> = self.tree.children(node).to_vec();
                self.flatten_children(&children, ctx, out)
            }
            other => {
                log::debug!("fo:{} ignored in block context", other.name());
                Ok(())
            }
        }
    }

    /// Paint attributes of a block-level node (colors stay opaque strings).
    pub(crate) fn block_paint(&self, node: NodeId) -> Paint {
        let mut paint = Paint::default();
        match self.res.computed(node, "background-color") {
            Some("transparent") | None => {}
            Some(color) => paint.background = Some(color.to_string()),
        }
        for edge in AbsEdge::ALL.iter() {
            let slot = match edge {
                AbsEdge::Top => 0,
                AbsEdge::Right => 1,
                AbsEdge::Bottom => 2,
                AbsEdge::Left => 3,
            };
            let width = self.res.border_width(node, *edge);
            if width > 0.0 {
                paint.borders[slot] = Some(BorderSegment {
                    width,
                    style: self.res.border_style(node, *edge).to_string(),
                    color: self.res.border_color(node, *edge).to_string(),
                });
            }
        }
        for (i, corner) in ["border-top-left-radius", "border-top-right-radius",
            "border-bottom-right-radius", "border-bottom-left-radius"]
            .iter()
            .enumerate()
        {
            paint.radius[i] = self.res.length(node, corner, None, 0.0);
        }
        paint
    }

    fn flatten_simple_block(
        &mut self,
        node: NodeId,
        ctx: &FlattenCtx,
        out: &mut Vec<Piece>,
    ) -> Result<(), FolioError> {
        let margin_left = self.res.margin(node, AbsEdge::Left, Some(ctx.width));
        let margin_right = self.res.margin(node, AbsEdge::Right, Some(ctx.width));
        let pad_top = self.res.padding(node, AbsEdge::Top, Some(ctx.width));
        let pad_bottom = self.res.padding(node, AbsEdge::Bottom, Some(ctx.width));
        let pad_left = self.res.padding(node, AbsEdge::Left, Some(ctx.width));
        let pad_right = self.res.padding(node, AbsEdge::Right, Some(ctx.width));
        let bw_top = self.res.border_width(node, AbsEdge::Top);
        let bw_bottom = self.res.border_width(node, AbsEdge::Bottom);
        let bw_left = self.res.border_width(node, AbsEdge::Left);
        let bw_right = self.res.border_width(node, AbsEdge::Right);

        let outer_x = ctx.x + margin_left;
        let outer_width = (ctx.width - margin_left - margin_right).max(1.0);
        let inner_ctx = FlattenCtx {
            x: outer_x + bw_left + pad_left,
            width: (outer_width - pad_left - pad_right - bw_left - bw_right).max(1.0),
            page: ctx.page,
            wrappers: ctx.wrappers.clone(),
        };

        let paint = self.block_paint(node);
        let mut inner_wrappers = inner_ctx.wrappers.clone();
        if paint.is_visible() {
            let wrapper_id = self.wrappers.len() as u32;
            self.wrappers.push(WrapperInfo {
                x: outer_x,
                width: outer_width,
                paint,
            });
            inner_wrappers.push(wrapper_id);
        }
        let inner_ctx = FlattenCtx {
            wrappers: inner_wrappers,
            ..inner_ctx
        };

        let start = out.len();
        if pad_top + bw_top > 0.0 {
            out.push(Piece::spacer(pad_top + bw_top, false));
        }

        // Partition children into inline runs (anonymous paragraphs) and
        // runs of nested block-level content. Consecutive blocks flatten
        // together so their vertical spaces resolve against each other.
        let children: Vec<NodeId> = self.tree.children(node).to_vec();
        let mut inline_run: Vec<NodeId> = Vec::new();
        let mut block_run: Vec<NodeId> = Vec::new();
        for &child in &children {
            let kind = self.tree.kind(child);
            if kind == FoKind::Marker {
                continue;
            }
            if is_block_level(kind) {
                if !inline_run.is_empty() {
                    let pieces = self.layout_paragraph(node, &inline_run, &inner_ctx)?;
                    out.extend(pieces);
                    inline_run.clear();
                }
                block_run.push(child);
            } else {
                if !block_run.is_empty() {
                    self.flatten_children(&block_run, &inner_ctx, out)?;
                    block_run.clear();
                }
                inline_run.push(child);
            }
        }
        if !block_run.is_empty() {
            self.flatten_children(&block_run, &inner_ctx, out)?;
        }
        if !inline_run.is_empty() {
            let pieces = self.layout_paragraph(node, &inline_run, &inner_ctx)?;
            out.extend(pieces);
        }

        if pad_bottom + bw_bottom > 0.0 {
            let mut spacer = Piece::spacer(pad_bottom + bw_bottom, false);
            spacer.keep_with_prev = 1000;
            out.push(spacer);
        }

        self.decorate_block_pieces(node, &inner_ctx, out, start);
        Ok(())
    }

    /// Attach wrappers, keeps, markers and ids to the pieces a block
    /// produced.
    fn decorate_block_pieces(
        &mut self,
        node: NodeId,
        ctx: &FlattenCtx,
        out: &mut Vec<Piece>,
        start: usize,
    ) {
        if start >= out.len() {
            return;
        }
        let keep = self.res.keep(node, "keep-together");
        for (i, piece) in out.iter_mut().enumerate().skip(start) {
            // Nested blocks decorated themselves with a deeper chain; only
            // fill in pieces that have none yet.
            if piece.wrappers.is_empty() {
                piece.wrappers = ctx.wrappers.clone();
            }
            if i > start && !keep.is_auto() {
                piece.keep_with_prev = piece.keep_with_prev.max(keep.strength());
            }
        }
        // Padding spacers must never separate from the content they frame.
        if start + 1 < out.len() {
            if let PieceKind::Spacer { .. } = out[start].kind {
                out[start + 1].keep_with_prev = out[start + 1].keep_with_prev.max(1000);
            }
        }
        if let Some(id) = self.res.specified(node, "id") {
            out[start].id_refs.push(id.to_string());
        }
        let markers: Vec<MarkerDecl> = self
            .tree
            .children_of_kind(node, FoKind::Marker)
            .map(|m| MarkerDecl {
                class: self
                    .res
                    .specified(m, "marker-class-name")
                    .unwrap_or("")
                    .to_string(),
                node: m,
            })
            .collect();
        out[start].markers.extend(markers);
    }

    fn flatten_block_container(
        &mut self,
        node: NodeId,
        ctx: &FlattenCtx,
        out: &mut Vec<Piece>,
    ) -> Result<(), FolioError> {
        let absolute = self.res.computed(node, "absolute-position") == Some("absolute");
        let width = self
            .res
            .length_opt(node, "width", Some(ctx.width))
            .or_else(|| self.res.length_opt(node, "inline-progression-dimension", Some(ctx.width)));
        let height = self
            .res
            .length_opt(node, "height", None)
            .or_else(|| self.res.length_opt(node, "block-progression-dimension", None));

        if absolute {
            let page = ctx.page;
            let left = self.res.length_opt(node, "left", Some(page.width));
            let right = self.res.length_opt(node, "right", Some(page.width));
            let top = self.res.length_opt(node, "top", Some(page.height));
            let bottom = self.res.length_opt(node, "bottom", Some(page.height));

            let w = width
                .or_else(|| match (left, right) {
                    (Some(l), Some(r)) => Some(page.width - l - r),
                    _ => None,
                })
                .unwrap_or(page.width);
            let inner = FlattenCtx {
                x: 0.0,
                width: w,
                page,
                wrappers: Vec::new(),
            };
            let children: Vec<NodeId> = self.tree.children(node).to_vec();
            let mut pieces = Vec::new();
            self.flatten_children(&children, &inner, &mut pieces)?;
            let mut footnotes = Vec::new();
            let paint = self.block_paint(node);
            let (area, natural_h) = self.collapse_pieces(pieces, paint, 0.0, w, &mut footnotes);
            let h = height.unwrap_or(natural_h);

            let x = match (left, right) {
                (Some(l), _) => page.x + l,
                (None, Some(r)) => page.x + page.width - r - w,
                (None, None) => page.x,
            };
            let y = match (top, bottom) {
                (Some(t), _) => page.y + t,
                (None, Some(b)) => page.y + page.height - b - h,
                (None, None) => page.y,
            };

            let mut piece = Piece::area(0.0, area);
            piece.absolute = Some(Rect::new(x, y, w, h));
            piece.footnotes = footnotes;
            out.push(piece);
            return Ok(());
        }

        // In-flow container: a new reference area of fixed width, atomic
        // when a height is declared, otherwise splittable like a block.
        let w = width.unwrap_or(ctx.width);
        let inner = FlattenCtx {
            x: ctx.x,
            width: w,
            page: ctx.page,
            wrappers: ctx.wrappers.clone(),
        };
        let children: Vec<NodeId> = self.tree.children(node).to_vec();
        if let Some(h) = height {
            let mut pieces = Vec::new();
            self.flatten_children(&children, &FlattenCtx { x: 0.0, ..inner.clone() }, &mut pieces)?;
            let mut footnotes = Vec::new();
            let paint = self.block_paint(node);
            let (mut area, natural) = self.collapse_pieces(pieces, paint, 0.0, w, &mut footnotes);
            if natural > h + 0.01 {
                self.diags.warn(
                    Some(node),
                    WarningKind::LayoutOverflow,
                    format!("block-container content {natural:.1}pt exceeds height {h:.1}pt; clipped"),
                );
                if let Area::Block(b) = &mut area {
                    b.paint.clip = Some(Rect::new(0.0, 0.0, w, h));
                    b.rect.height = h;
                }
            }
            offset_area(&mut area, inner.x, 0.0);
            let start = out.len();
            let mut piece = Piece::area(h, area);
            piece.footnotes = footnotes;
            out.push(piece);
            self.decorate_block_pieces(node, &inner, out, start);
            Ok(())
        } else {
            let start = out.len();
            self.flatten_children(&children, &inner, out)?;
            self.decorate_block_pieces(node, &inner, out, start);
            Ok(())
        }
    }

    fn flatten_list_block(
        &mut self,
        node: NodeId,
        ctx: &FlattenCtx,
        out: &mut Vec<Piece>,
    ) -> Result<(), FolioError> {
        let label_width = self
            .res
            .length(node, "provisional-distance-between-starts", Some(ctx.width), 24.0);
        let separation = self
            .res
            .length(node, "provisional-label-separation", Some(ctx.width), 6.0);
        let start = out.len();

        let items: Vec<NodeId> = self
            .tree
            .children_of_kind(node, FoKind::ListItem)
            .collect();
        for item in items {
            let label = self.tree.first_child_of_kind(item, FoKind::ListItemLabel);
            let body = self.tree.first_child_of_kind(item, FoKind::ListItemBody);

            let label_ctx = FlattenCtx {
                x: 0.0,
                width: (label_width - separation).max(1.0),
                page: ctx.page,
                wrappers: Vec::new(),
            };
            let body_ctx = FlattenCtx {
                x: 0.0,
                width: (ctx.width - label_width).max(1.0),
                page: ctx.page,
                wrappers: Vec::new(),
            };

            let mut item_footnotes = Vec::new();
            let mut label_area = None;
            let mut label_h = 0.0;
            if let Some(l) = label {
                let children: Vec<NodeId> = self.tree.children(l).to_vec();
                let mut pieces = Vec::new();
                self.flatten_children(&children, &label_ctx, &mut pieces)?;
                let (area, h) = self.collapse_pieces(
                    pieces,
                    Paint::default(),
                    0.0,
                    label_ctx.width,
                    &mut item_footnotes,
                );
                label_area = Some(area);
                label_h = h;
            }
            let mut body_area = None;
            let mut body_h = 0.0;
            if let Some(b) = body {
                let children: Vec<NodeId> = self.tree.children(b).to_vec();
                let mut pieces = Vec::new();
                self.flatten_children(&children, &body_ctx, &mut pieces)?;
                let (area, h) = self.collapse_pieces(
                    pieces,
                    Paint::default(),
                    0.0,
                    body_ctx.width,
                    &mut item_footnotes,
                );
                body_area = Some(area);
                body_h = h;
            }

            let height = label_h.max(body_h);
            let mut children = Vec::new();
            if let Some(mut a) = label_area {
                offset_area(&mut a, ctx.x, 0.0);
                children.push(a);
            }
            if let Some(mut a) = body_area {
                offset_area(&mut a, ctx.x + label_width, 0.0);
                children.push(a);
            }
            let mut block = BlockArea::new(Rect::new(ctx.x, 0.0, ctx.width, height));
            block.children = children;
            let piece_start = out.len();
            let mut piece = Piece::area(height, Area::Block(block));
            piece.footnotes = item_footnotes;
            out.push(piece);
            self.decorate_block_pieces(item, ctx, out, piece_start);

            let gap = self.res.space(item, "space-after").optimum;
            if gap > 0.0 {
                out.push(Piece::spacer(gap, true));
            }
        }
        self.decorate_block_pieces(node, ctx, out, start);
        Ok(())
    }

    /// Stack a piece list into a single block area; used for atomic
    /// content (cells, list items, footnote bodies, fixed containers).
    /// Footnote anchors inside the collapsed content surface through
    /// `footnotes_out` so the enclosing piece can still reserve for them.
    pub(crate) fn collapse_pieces(
        &mut self,
        pieces: Vec<Piece>,
        paint: Paint,
        x: f64,
        width: f64,
        footnotes_out: &mut Vec<NodeId>,
    ) -> (Area, f64) {
        let mut children = Vec::new();
        let mut y = 0.0;
        for piece in pieces {
            footnotes_out.extend(piece.footnotes.iter().copied());
            match piece.kind {
                PieceKind::Spacer { .. } => y += piece.height,
                PieceKind::Area(mut area) => {
                    if piece.absolute.is_some() {
                        // Absolute content inside atomic context degrades to
                        // in-flow placement.
                        log::debug!("absolutely positioned container inside atomic content");
                    }
                    offset_area(&mut area, 0.0, y);
                    y += piece.height;
                    children.push(area);
                }
            }
        }
        let mut block = BlockArea::new(Rect::new(x, 0.0, width, y));
        block.paint = paint;
        block.children = children;
        (Area::Block(block), y)
    }

    /// Lay out a footnote body at the given width (bodies attach to the
    /// page bottom, outside the column flow).
    pub(crate) fn layout_footnote_body(
        &mut self,
        body: NodeId,
        width: f64,
        page: Rect,
    ) -> Result<(Area, f64), FolioError> {
        let ctx = FlattenCtx {
            x: 0.0,
            width,
            page,
            wrappers: Vec::new(),
        };
        let children: Vec<NodeId> = self.tree.children(body).to_vec();
        let mut pieces = Vec::new();
        self.flatten_children(&children, &ctx, &mut pieces)?;
        // Footnotes nested inside footnote bodies are not re-collected.
        let mut nested = Vec::new();
        let (area, h) = self.collapse_pieces(pieces, Paint::default(), 0.0, width, &mut nested);
        Ok((area, h))
    }
}

/// Split underline / line-through decorations out of a run as rule areas.
fn push_run_with_decorations(children: &mut Vec<Area>, run: GlyphRun) {
    let underline = run.underline;
    let line_through = run.line_through;
    let (x, y, width, size, color) = (run.x, run.y, run.width, run.size, run.color.clone());
    children.push(Area::Glyphs(run));
    if underline {
        children.push(Area::Rule(RuleArea {
            rect: Rect::new(x, y + size * 0.08, width, (size * 0.05).max(0.5)),
            style: "solid".to_string(),
            color: color.clone(),
        }));
    }
    if line_through {
        children.push(Area::Rule(RuleArea {
            rect: Rect::new(x, y - size * 0.28, width, (size * 0.05).max(0.5)),
            style: "solid".to_string(),
            color,
        }));
    }
}

/// Inline construction state: pending collapsed space and the
/// paragraph-start flag that swallows leading whitespace.
struct InlineBuilder {
    items: Vec<InlineItem>,
    pending_space: bool,
    at_start: bool,
}

impl InlineBuilder {
    fn flush_space(
        &mut self,
        engine: &mut Engine<'_>,
        style: &TextStyle,
        node: NodeId,
    ) -> Result<(), FolioError> {
        if !self.pending_space {
            return Ok(());
        }
        self.pending_space = false;
        if self.at_start {
            return Ok(()); // leading space collapses away
        }
        let font_id = engine.font_id(&style.family, style.weight, style.italic)?;
        let space_width = engine.slot(font_id).resolved.char_width(' ', style.size)
            + style.word_spacing
            + style.letter_spacing;
        self.items.push(InlineItem::glue(
            space_width,
            space_width / 2.0,
            space_width / 3.0,
        ));
        Ok(())
    }

    fn push_run(&mut self, mut run: GlyphRun, link: Option<&str>) {
        if run.glyphs.is_empty() && run.citation.is_none() {
            return;
        }
        run.link = link.map(|s| s.to_string());
        self.items.push(InlineItem::Box(InlineBox {
            width: run.width,
            content: BoxContent::Glyphs(run),
        }));
        self.at_start = false;
    }
}

fn node_or_parent(tree: &FoTree, node: NodeId) -> NodeId {
    match tree.kind(node) {
        FoKind::Text => tree.parent(node).unwrap_or(node),
        _ => node,
    }
}

fn is_block_level(kind: FoKind) -> bool {
    matches!(
        kind,
        FoKind::Block
            | FoKind::BlockContainer
            | FoKind::Table
            | FoKind::ListBlock
            | FoKind::Wrapper
    )
}

/// An internal break point of a word.
struct WordBreak {
    /// Char index the next segment starts at.
    index: usize,
    /// A soft hyphen break renders the hyphenation character.
    soft_hyphen: bool,
}

/// UAX#14 break opportunities inside a whitespace-delimited word: after
/// explicit dashes, between CJK characters, and at soft hyphens.
fn word_break_points(word: &str) -> Vec<WordBreak> {
    use unicode_linebreak::{linebreaks, BreakOpportunity};

    let mut byte_to_char = std::collections::HashMap::new();
    for (char_idx, (byte_idx, _)) in word.char_indices().enumerate() {
        byte_to_char.insert(byte_idx, char_idx);
    }
    let chars: Vec<char> = word.chars().collect();

    let mut points = Vec::new();
    for (byte_idx, opportunity) in linebreaks(word) {
        if byte_idx == 0 || byte_idx >= word.len() {
            continue;
        }
        if opportunity == BreakOpportunity::Allowed {
            if let Some(&char_idx) = byte_to_char.get(&byte_idx) {
                let soft_hyphen = char_idx > 0 && chars[char_idx - 1] == '\u{00AD}';
                points.push(WordBreak {
                    index: char_idx,
                    soft_hyphen,
                });
            }
        }
    }
    points.sort_by_key(|p| p.index);
    points
}

fn is_strong_rtl(ch: char) -> bool {
    let cp = ch as u32;
    (0x0590..=0x08FF).contains(&cp)
        || (0xFB1D..=0xFDFF).contains(&cp)
        || (0xFE70..=0xFEFF).contains(&cp)
}

fn apply_transform(text: &str, transform: TextTransform) -> String {
    match transform {
        TextTransform::None => text.to_string(),
        TextTransform::Uppercase => text.to_uppercase(),
        TextTransform::Lowercase => text.to_lowercase(),
        TextTransform::Capitalize => {
            let mut out = String::with_capacity(text.len());
            let mut at_word_start = true;
            for ch in text.chars() {
                if ch.is_whitespace() {
                    at_word_start = true;
                    out.push(ch);
                } else if at_word_start {
                    out.extend(ch.to_uppercase());
                    at_word_start = false;
                } else {
                    out.push(ch);
                }
            }
            out
        }
    }
}

/// Probe PNG/JPEG bytes for pixel dimensions.
fn probe_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let reader = image::io::Reader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .ok()?;
    reader.into_dimensions().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fo::FoTreeBuilder;

    fn build_tree(body: impl FnOnce(&mut FoTreeBuilder)) -> FoTree {
        let mut b = FoTreeBuilder::new();
        b.open(FoKind::Root);
        b.open(FoKind::LayoutMasterSet);
        b.open(FoKind::SimplePageMaster);
        b.attribute("master-name", "m");
        b.attribute("page-width", "595pt");
        b.attribute("page-height", "842pt");
        b.open(FoKind::RegionBody);
        b.close();
        b.close();
        b.close();
        b.open(FoKind::PageSequence);
        b.attribute("master-reference", "m");
        b.open(FoKind::Flow);
        b.attribute("flow-name", "xsl-region-body");
        body(&mut b);
        b.close();
        b.close();
        b.close();
        b.finish().unwrap()
    }

    fn flow_of(tree: &FoTree) -> NodeId {
        let seq = tree
            .first_child_of_kind(tree.root(), FoKind::PageSequence)
            .unwrap();
        tree.first_child_of_kind(seq, FoKind::Flow).unwrap()
    }

    fn default_ctx() -> FlattenCtx {
        FlattenCtx {
            x: 0.0,
            width: 451.0,
            page: Rect::new(72.0, 72.0, 451.0, 698.0),
            wrappers: Vec::new(),
        }
    }

    #[test]
    fn test_simple_block_produces_line_pieces() {
        let tree = build_tree(|b| {
            b.open(FoKind::Block);
            b.attribute("font-family", "Helvetica");
            b.attribute("font-size", "12pt");
            b.text("Hello world");
            b.close();
        });
        let fonts = FontContext::new();
        let options = LayoutOptions::default();
        let mut engine = Engine::new(&tree, &fonts, &options);
        let pieces = engine.flatten_flow(flow_of(&tree), &default_ctx()).unwrap();
        let areas: Vec<_> = pieces
            .iter()
            .filter(|p| matches!(p.kind, PieceKind::Area(_)))
            .collect();
        assert_eq!(areas.len(), 1, "one line expected");
        assert!(areas[0].height > 12.0);
    }

    #[test]
    fn test_whitespace_collapses() {
        let tree = build_tree(|b| {
            b.open(FoKind::Block);
            b.text("Hello   \n  world");
            b.close();
        });
        let fonts = FontContext::new();
        let options = LayoutOptions::default();
        let mut engine = Engine::new(&tree, &fonts, &options);
        let flow = flow_of(&tree);
        let block = tree.children(flow)[0];
        let style = engine.res.text_style(block);
        let children: Vec<NodeId> = tree.children(block).to_vec();
        let items = engine.build_inline_items(&children, &style).unwrap();
        let glue_count = items.iter().filter(|i| i.is_glue()).count();
        let box_count = items.iter().filter(|i| i.is_box()).count();
        assert_eq!(glue_count, 1, "runs of whitespace collapse to one glue");
        assert_eq!(box_count, 2);
    }

    #[test]
    fn test_text_indent_becomes_first_line_offset() {
        let tree = build_tree(|b| {
            b.open(FoKind::Block);
            b.attribute("text-indent", "18pt");
            b.text("word word word");
            b.close();
        });
        let fonts = FontContext::new();
        let options = LayoutOptions::default();
        let mut engine = Engine::new(&tree, &fonts, &options);
        let pieces = engine.flatten_flow(flow_of(&tree), &default_ctx()).unwrap();
        let first_line = pieces
            .iter()
            .find_map(|p| match &p.kind {
                PieceKind::Area(Area::Line(l)) => Some(l),
                _ => None,
            })
            .unwrap();
        let first_run = first_line
            .children
            .iter()
            .find_map(|a| match a {
                Area::Glyphs(g) => Some(g),
                _ => None,
            })
            .unwrap();
        assert!((first_run.x - 18.0).abs() < 1e-6);
    }

    #[test]
    fn test_space_before_merges_with_space_after() {
        let tree = build_tree(|b| {
            b.open(FoKind::Block);
            b.attribute("space-after", "10pt");
            b.text("a");
            b.close();
            b.open(FoKind::Block);
            b.attribute("space-before", "6pt");
            b.text("b");
            b.close();
        });
        let fonts = FontContext::new();
        let options = LayoutOptions::default();
        let mut engine = Engine::new(&tree, &fonts, &options);
        let pieces = engine.flatten_flow(flow_of(&tree), &default_ctx()).unwrap();
        let spacers: Vec<f64> = pieces
            .iter()
            .filter(|p| matches!(p.kind, PieceKind::Spacer { .. }))
            .map(|p| p.height)
            .collect();
        // Leading space (0), merged middle space max(10, 6) = 10, trailing.
        assert!(spacers.contains(&10.0));
        assert!(!spacers.contains(&16.0));
    }

    #[test]
    fn test_keep_with_next_binds_pieces() {
        let tree = build_tree(|b| {
            b.open(FoKind::Block);
            b.attribute("keep-with-next", "always");
            b.text("heading");
            b.close();
            b.open(FoKind::Block);
            b.text("body");
            b.close();
        });
        let fonts = FontContext::new();
        let options = LayoutOptions::default();
        let mut engine = Engine::new(&tree, &fonts, &options);
        let pieces = engine.flatten_flow(flow_of(&tree), &default_ctx()).unwrap();
        // Some piece after the first content piece must carry the binding.
        assert!(
            pieces.iter().skip(1).any(|p| p.keep_with_prev >= 1000),
            "keep-with-next must bind the following piece"
        );
    }

    #[test]
    fn test_block_with_border_gets_wrapper() {
        let tree = build_tree(|b| {
            b.open(FoKind::Block);
            b.attribute("border", "1pt solid black");
            b.attribute("padding", "4pt");
            b.text("framed");
            b.close();
        });
        let fonts = FontContext::new();
        let options = LayoutOptions::default();
        let mut engine = Engine::new(&tree, &fonts, &options);
        let pieces = engine.flatten_flow(flow_of(&tree), &default_ctx()).unwrap();
        assert!(!engine.wrappers.is_empty());
        assert!(pieces.iter().any(|p| !p.wrappers.is_empty()));
        // Padding spacers frame the content.
        let spacer_heights: Vec<f64> = pieces
            .iter()
            .filter(|p| matches!(p.kind, PieceKind::Spacer { discard: false }))
            .map(|p| p.height)
            .collect();
        assert!(spacer_heights.iter().any(|&h| (h - 5.0).abs() < 1e-9));
    }

    #[test]
    fn test_footnote_anchor_rides_line() {
        let tree = build_tree(|b| {
            b.open(FoKind::Block);
            b.text("cited");
            b.open(FoKind::Footnote);
            b.open(FoKind::Inline);
            b.text("1");
            b.close();
            b.open(FoKind::FootnoteBody);
            b.open(FoKind::Block);
            b.text("the note");
            b.close();
            b.close();
            b.close();
            b.close();
        });
        let fonts = FontContext::new();
        let options = LayoutOptions::default();
        let mut engine = Engine::new(&tree, &fonts, &options);
        let pieces = engine.flatten_flow(flow_of(&tree), &default_ctx()).unwrap();
        let with_footnotes: Vec<_> = pieces.iter().filter(|p| !p.footnotes.is_empty()).collect();
        assert_eq!(with_footnotes.len(), 1);
    }

    #[test]
    fn test_bidi_override_flips_items() {
        let tree = build_tree(|b| {
            b.open(FoKind::Block);
            b.open(FoKind::BidiOverride);
            b.attribute("direction", "rtl");
            b.text("one two");
            b.close();
            b.close();
        });
        let fonts = FontContext::new();
        let options = LayoutOptions::default();
        let mut engine = Engine::new(&tree, &fonts, &options);
        let flow = flow_of(&tree);
        let block = tree.children(flow)[0];
        let style = engine.res.text_style(block);
        let children: Vec<NodeId> = tree.children(block).to_vec();
        let items = engine.build_inline_items(&children, &style).unwrap();
        // First box should now be "two".
        let first_box = items
            .iter()
            .find_map(|i| match i {
                InlineItem::Box(b) => match &b.content {
                    BoxContent::Glyphs(g) => Some(g.text.clone()),
                    _ => None,
                },
                _ => None,
            })
            .unwrap();
        assert_eq!(first_box, "two");
    }

    #[test]
    fn test_explicit_hyphen_is_break_opportunity() {
        let tree = build_tree(|b| {
            b.open(FoKind::Block);
            b.text("state-of-the-art");
            b.close();
        });
        let fonts = FontContext::new();
        let options = LayoutOptions::default();
        let mut engine = Engine::new(&tree, &fonts, &options);
        let flow = flow_of(&tree);
        let block = tree.children(flow)[0];
        let style = engine.res.text_style(block);
        let children: Vec<NodeId> = tree.children(block).to_vec();
        let items = engine.build_inline_items(&children, &style).unwrap();
        let unflagged_breaks = items
            .iter()
            .filter(|i| matches!(i, InlineItem::Penalty(p) if !p.flagged && p.cost == 0.0))
            .count();
        assert_eq!(unflagged_breaks, 3, "one break after each dash");
    }

    #[test]
    fn test_soft_hyphen_becomes_flagged_penalty() {
        let tree = build_tree(|b| {
            b.open(FoKind::Block);
            b.text("hy\u{00AD}phen");
            b.close();
        });
        let fonts = FontContext::new();
        let options = LayoutOptions::default();
        let mut engine = Engine::new(&tree, &fonts, &options);
        let flow = flow_of(&tree);
        let block = tree.children(flow)[0];
        let style = engine.res.text_style(block);
        let children: Vec<NodeId> = tree.children(block).to_vec();
        let items = engine.build_inline_items(&children, &style).unwrap();
        let flagged: Vec<_> = items
            .iter()
            .filter_map(|i| match i {
                InlineItem::Penalty(p) if p.flagged => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(flagged.len(), 1);
        assert!(flagged[0].hyphen.is_some());
        // The soft hyphen itself never reaches the shaped text.
        let texts: Vec<String> = items
            .iter()
            .filter_map(|i| match i {
                InlineItem::Box(b) => match &b.content {
                    BoxContent::Glyphs(g) => Some(g.text.clone()),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["hy".to_string(), "phen".to_string()]);
    }

    #[test]
    fn test_transform_capitalize() {
        assert_eq!(apply_transform("hello world", TextTransform::Capitalize), "Hello World");
        assert_eq!(apply_transform("a b", TextTransform::Uppercase), "A B");
    }

    #[test]
    fn test_page_number_emits_citation_marker() {
        let tree = build_tree(|b| {
            b.open(FoKind::Block);
            b.text("Page ");
            b.open(FoKind::PageNumber);
            b.close();
            b.close();
        });
        let fonts = FontContext::new();
        let options = LayoutOptions::default();
        let mut engine = Engine::new(&tree, &fonts, &options);
        let flow = flow_of(&tree);
        let block = tree.children(flow)[0];
        let style = engine.res.text_style(block);
        let children: Vec<NodeId> = tree.children(block).to_vec();
        let items = engine.build_inline_items(&children, &style).unwrap();
        let has_citation = items.iter().any(|i| match i {
            InlineItem::Box(b) => match &b.content {
                BoxContent::Glyphs(g) => g.citation.as_deref() == Some(CITATION_CURRENT_PAGE),
                _ => false,
            },
            _ => false,
        });
        assert!(has_citation);
    }
}
