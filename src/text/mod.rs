//! # Line Breaking
//!
//! Turns an inline item sequence into positioned lines.
//!
//! The item model is the classic box/glue/penalty trio: boxes are rigid
//! content (glyph runs, graphics, anchors), glue is stretchable space, and
//! penalties are potential breakpoints with a cost (a forced break is a
//! penalty of negative infinity). Both breaking algorithms speak this model
//! through the [`LineBreaker`] trait so embedders can substitute their own.
//!
//! Output lines carry the chosen break index, the adjustment ratio applied
//! to interior glue, and the starting justification offset. For a given
//! item sequence and parameters the output is byte-identical across runs.

pub mod hyphenate;
pub mod knuth_plass;

use crate::area::GlyphRun;
use crate::fo::properties::TextAlign;
use crate::fo::NodeId;

/// A rigid inline box.
#[derive(Debug, Clone)]
pub struct InlineBox {
    pub width: f64,
    pub content: BoxContent,
}

#[derive(Debug, Clone)]
pub enum BoxContent {
    /// Shaped text. The run's origin is assigned at line assembly.
    Glyphs(GlyphRun),
    /// An external graphic or instream foreign object.
    Graphic {
        src: String,
        width: f64,
        height: f64,
    },
    /// Zero-width anchor tying a footnote body to the line that cites it.
    FootnoteAnchor { body: NodeId },
}

/// Stretchable space. A leader rides on glue so justification can grow it;
/// non-space leader patterns paint the spanned gap.
#[derive(Debug, Clone)]
pub struct Glue {
    pub width: f64,
    pub stretch: f64,
    pub shrink: f64,
    pub leader: Option<Leader>,
}

#[derive(Debug, Clone)]
pub struct Leader {
    pub pattern: LeaderPattern,
    pub thickness: f64,
    pub color: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderPattern {
    Space,
    Rule,
    Dots,
}

/// A potential breakpoint. `width` is added to the line only when the
/// break is taken; a flagged penalty renders its hyphen glyphs then.
#[derive(Debug, Clone)]
pub struct Penalty {
    pub width: f64,
    pub cost: f64,
    pub flagged: bool,
    pub hyphen: Option<GlyphRun>,
}

#[derive(Debug, Clone)]
pub enum InlineItem {
    Box(InlineBox),
    Glue(Glue),
    Penalty(Penalty),
}

impl InlineItem {
    /// A mandatory break.
    pub fn forced_break() -> InlineItem {
        InlineItem::Penalty(Penalty {
            width: 0.0,
            cost: f64::NEG_INFINITY,
            flagged: false,
            hyphen: None,
        })
    }

    pub fn glue(width: f64, stretch: f64, shrink: f64) -> InlineItem {
        InlineItem::Glue(Glue {
            width,
            stretch,
            shrink,
            leader: None,
        })
    }

    pub fn is_box(&self) -> bool {
        matches!(self, InlineItem::Box(_))
    }

    pub fn is_glue(&self) -> bool {
        matches!(self, InlineItem::Glue(_))
    }

    pub fn is_forced_break(&self) -> bool {
        matches!(self, InlineItem::Penalty(p) if p.cost == f64::NEG_INFINITY)
    }

    /// Natural width contributed when the item sits inside a line.
    pub fn width(&self) -> f64 {
        match self {
            InlineItem::Box(b) => b.width,
            InlineItem::Glue(g) => g.width,
            InlineItem::Penalty(_) => 0.0,
        }
    }
}

/// Parameters for one paragraph's breaking run.
#[derive(Debug, Clone)]
pub struct BreakParams {
    /// Target width of every line.
    pub line_width: f64,
    /// Extra indent applied to (and subtracted from) the first line.
    pub first_line_indent: f64,
    pub align: TextAlign,
    /// Maximum feasible adjustment ratio for the optimal breaker.
    pub tolerance: f64,
    /// `wrap-option`: when false the whole sequence lands on one line.
    pub wrap: bool,
}

impl Default for BreakParams {
    fn default() -> Self {
        Self {
            line_width: 0.0,
            first_line_indent: 0.0,
            align: TextAlign::Start,
            tolerance: 2.0,
            wrap: true,
        }
    }
}

/// One broken line: items `start..=end` (the break item is `end`), the glue
/// adjustment ratio, and the x offset where content starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub start: usize,
    pub end: usize,
    pub ratio: f64,
    pub start_offset: f64,
    pub natural_width: f64,
    pub ends_hyphenated: bool,
}

/// Breaking output: the (possibly emergency-exploded) item sequence the
/// line indices refer to, plus the lines.
#[derive(Debug, Clone)]
pub struct BreakResult {
    pub items: Vec<InlineItem>,
    pub lines: Vec<Line>,
}

/// Strategy interface over the abstract item sequence.
pub trait LineBreaker {
    fn break_lines(&self, items: Vec<InlineItem>, params: &BreakParams) -> BreakResult;
}

/// Target width of line `index` (the first line loses the indent).
pub fn line_target(params: &BreakParams, index: usize) -> f64 {
    if index == 0 {
        (params.line_width - params.first_line_indent).max(1.0)
    } else {
        params.line_width
    }
}

/// Natural width of `items[start..=end]` when broken at `end`: boxes plus
/// interior glue, plus the break penalty's width.
pub fn natural_width(items: &[InlineItem], start: usize, end: usize) -> f64 {
    let mut width = 0.0;
    for (i, item) in items.iter().enumerate().take(end + 1).skip(start) {
        match item {
            InlineItem::Box(b) => width += b.width,
            InlineItem::Glue(g) => {
                if i != end {
                    width += g.width;
                }
            }
            InlineItem::Penalty(p) => {
                if i == end {
                    width += p.width;
                }
            }
        }
    }
    width
}

/// Total stretch and shrink of interior glue in `items[start..end)`.
pub fn stretch_shrink(items: &[InlineItem], start: usize, end: usize) -> (f64, f64) {
    let mut stretch = 0.0;
    let mut shrink = 0.0;
    for item in items.iter().take(end).skip(start) {
        if let InlineItem::Glue(g) = item {
            stretch += g.stretch;
            shrink += g.shrink;
        }
    }
    (stretch, shrink)
}

/// Adjustment ratio for a line of `natural` width against `target`.
pub fn adjustment_ratio(natural: f64, target: f64, stretch: f64, shrink: f64) -> f64 {
    if natural < target {
        if stretch > 0.0 {
            (target - natural) / stretch
        } else {
            f64::INFINITY
        }
    } else if natural > target {
        if shrink > 0.0 {
            (target - natural) / shrink
        } else {
            f64::NEG_INFINITY
        }
    } else {
        0.0
    }
}

/// Starting x offset for a line under the given alignment. Justified lines
/// start at 0; their glue absorbs the slack (the last line is start-aligned
/// and also begins at 0).
pub fn start_offset(align: TextAlign, target: f64, natural: f64) -> f64 {
    let slack = (target - natural).max(0.0);
    match align {
        TextAlign::Start | TextAlign::Justify => 0.0,
        TextAlign::Center => slack / 2.0,
        TextAlign::End => slack,
    }
}

/// Build a [`Line`], computing ratio and offset. `is_last` exempts the
/// final (or forced-broken) line from justification stretching.
pub fn make_line(
    items: &[InlineItem],
    start: usize,
    end: usize,
    params: &BreakParams,
    line_index: usize,
    is_last: bool,
) -> Line {
    let target = line_target(params, line_index);
    let natural = natural_width(items, start, end);
    let (stretch, shrink) = stretch_shrink(items, start, end);
    let justify = params.align == TextAlign::Justify && !is_last;
    let ratio = if justify {
        let r = adjustment_ratio(natural, target, stretch, shrink);
        if r.is_finite() {
            r.max(-1.0)
        } else {
            0.0
        }
    } else if natural > target && shrink > 0.0 {
        // Non-justified overfull lines may still shrink up to the limit.
        adjustment_ratio(natural, target, stretch, shrink).max(-1.0)
    } else {
        0.0
    };
    let first_indent = if line_index == 0 {
        params.first_line_indent
    } else {
        0.0
    };
    let ends_hyphenated = matches!(&items[end], InlineItem::Penalty(p) if p.flagged);
    Line {
        start,
        end,
        ratio,
        start_offset: first_indent + start_offset(params.align, target, natural),
        natural_width: natural,
        ends_hyphenated,
    }
}

/// Index of the first item of the next line after a break at `end`:
/// the break item itself plus any following glue is consumed.
pub fn next_line_start(items: &[InlineItem], end: usize) -> usize {
    let mut i = end + 1;
    while i < items.len() && items[i].is_glue() {
        i += 1;
    }
    i
}

/// Emergency breaking: explode any glyph box wider than `max_width` into
/// per-glyph boxes joined by zero-cost penalties, so a break can land
/// inside the word as a last resort. Non-text boxes stay whole.
pub fn explode_wide_boxes(items: Vec<InlineItem>, max_width: f64) -> Vec<InlineItem> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            InlineItem::Box(b) if b.width > max_width => match b.content {
                BoxContent::Glyphs(run) => {
                    let pieces = split_glyph_run(&run);
                    let count = pieces.len();
                    for (i, piece) in pieces.into_iter().enumerate() {
                        out.push(InlineItem::Box(InlineBox {
                            width: piece.width,
                            content: BoxContent::Glyphs(piece),
                        }));
                        if i + 1 < count {
                            out.push(InlineItem::Penalty(Penalty {
                                width: 0.0,
                                cost: 0.0,
                                flagged: false,
                                hyphen: None,
                            }));
                        }
                    }
                }
                content => out.push(InlineItem::Box(InlineBox {
                    width: b.width,
                    content,
                })),
            },
            other => out.push(other),
        }
    }
    out
}

/// Split a run into per-glyph runs. Characters distribute one-to-one when
/// the glyph and char counts agree (the common case); otherwise the first
/// glyph carries the whole text so extraction stays lossless.
fn split_glyph_run(run: &GlyphRun) -> Vec<GlyphRun> {
    if run.glyphs.is_empty() {
        return vec![run.clone()];
    }
    let chars: Vec<char> = run.text.chars().collect();
    let one_to_one = chars.len() == run.glyphs.len();
    run.glyphs
        .iter()
        .enumerate()
        .map(|(i, &gid)| {
            let text = if one_to_one {
                chars[i].to_string()
            } else if i == 0 {
                run.text.clone()
            } else {
                String::new()
            };
            GlyphRun {
                glyphs: vec![gid],
                advances: vec![run.advances[i]],
                adjustments: vec![run.adjustments[i]],
                width: run.advances[i],
                text,
                ..run.clone()
            }
        })
        .collect()
}

/// Greedy breaking: scan left to right, commit at the last feasible
/// breakpoint before the target width is exceeded. Linear time.
pub struct GreedyBreaker;

impl LineBreaker for GreedyBreaker {
    fn break_lines(&self, items: Vec<InlineItem>, params: &BreakParams) -> BreakResult {
        if items.is_empty() {
            return BreakResult {
                items,
                lines: Vec::new(),
            };
        }
        if !params.wrap {
            // no-wrap: everything on one (possibly overflowing) line.
            let end = items.len() - 1;
            let line = make_line(&items, 0, end, params, 0, true);
            return BreakResult {
                items,
                lines: vec![line],
            };
        }

        let mut items = items;
        let mut lines: Vec<Line> = Vec::new();
        let mut start = 0usize;
        let mut width = 0.0;
        let mut last_feasible: Option<usize> = None;
        let mut i = 0usize;

        enum Step {
            Forced,
            Breakpoint { width: f64 },
            NotABreak,
            GlueItem { width: f64, after_box: bool },
            BoxItem { width: f64, splittable: bool },
        }

        while i < items.len() {
            let target = line_target(params, lines.len());
            let step = match &items[i] {
                InlineItem::Penalty(p) if p.cost == f64::NEG_INFINITY => Step::Forced,
                InlineItem::Penalty(p) if p.cost < f64::INFINITY => {
                    Step::Breakpoint { width: p.width }
                }
                InlineItem::Penalty(_) => Step::NotABreak,
                InlineItem::Glue(g) => Step::GlueItem {
                    width: g.width,
                    after_box: i > start && items[i - 1].is_box(),
                },
                InlineItem::Box(b) => Step::BoxItem {
                    width: b.width,
                    splittable: matches!(
                        &b.content,
                        BoxContent::Glyphs(run) if run.glyphs.len() > 1
                    ),
                },
            };

            match step {
                Step::Forced => {
                    lines.push(make_line(&items, start, i, params, lines.len(), true));
                    start = next_line_start(&items, i);
                    width = 0.0;
                    last_feasible = None;
                    i = start;
                    continue;
                }
                Step::Breakpoint { width: pw } => {
                    if i > start {
                        // Feasible only while the line (plus the penalty's
                        // own width) still fits.
                        if width + pw <= target || last_feasible.is_none() {
                            last_feasible = Some(i);
                        }
                    }
                }
                Step::NotABreak => {}
                Step::GlueItem {
                    width: gw,
                    after_box,
                } => {
                    if after_box {
                        last_feasible = Some(i);
                    }
                    if i > start {
                        width += gw;
                    }
                }
                Step::BoxItem {
                    width: bw,
                    splittable,
                } => {
                    if width + bw > target && i == start && bw > target && splittable {
                        // A word wider than the line opens it: explode
                        // immediately, nothing precedes it to break at.
                        let tail = items.split_off(i);
                        let exploded = explode_wide_boxes(tail, target);
                        items.extend(exploded);
                        continue;
                    }
                    if width + bw > target && i > start {
                        match last_feasible {
                            Some(bp) if bp >= start => {
                                lines.push(make_line(&items, start, bp, params, lines.len(), false));
                                start = next_line_start(&items, bp);
                                width = natural_width_open(&items, start, i);
                                last_feasible = None;
                                // The current box may still overflow the fresh
                                // line; re-check it from the new line state.
                                if width + bw <= target || start > i {
                                    width += bw;
                                } else {
                                    continue;
                                }
                            }
                            _ => {
                                if bw > target && splittable {
                                    // Emergency: no feasible break and the word
                                    // alone exceeds the line. Explode it into
                                    // per-glyph pieces and rescan in place.
                                    let tail = items.split_off(i);
                                    let exploded = explode_wide_boxes(tail, target);
                                    items.extend(exploded);
                                    continue;
                                }
                                // Overflowing box with nothing to break at:
                                // keep it on this line and break right after.
                                width += bw;
                            }
                        }
                    } else {
                        width += bw;
                    }
                }
            }
            i += 1;
        }

        if start < items.len() {
            lines.push(make_line(
                &items,
                start,
                items.len() - 1,
                params,
                lines.len(),
                true,
            ));
        }

        BreakResult { items, lines }
    }
}

/// Width of a line still being filled: boxes plus interior glue in
/// `items[start..end)` (no break item yet).
fn natural_width_open(items: &[InlineItem], start: usize, end: usize) -> f64 {
    let mut width = 0.0;
    for item in items.iter().take(end).skip(start) {
        match item {
            InlineItem::Box(b) => width += b.width,
            InlineItem::Glue(g) => width += g.width,
            InlineItem::Penalty(_) => {}
        }
    }
    width
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_single_line_when_everything_fits() {
        let items = words("aa bb cc", 10.0);
        let result = GreedyBreaker.break_lines(
            items,
            &BreakParams {
                line_width: 500.0,
                ..Default::default()
            },
        );
        assert_eq!(result.lines.len(), 1);
        assert_eq!(result.lines[0].ratio, 0.0);
    }

    #[test]
    fn test_greedy_breaks_at_spaces() {
        // "aa bb" is 50pt; "aa bb cc dd" needs two lines at 55pt.
        let items = words("aa bb cc dd", 10.0);
        let result = GreedyBreaker.break_lines(
            items,
            &BreakParams {
                line_width: 55.0,
                ..Default::default()
            },
        );
        assert_eq!(result.lines.len(), 2);
        assert!((result.lines[0].natural_width - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_forced_break() {
        let mut items = words("aa", 10.0);
        items.push(InlineItem::forced_break());
        items.extend(words("bb", 10.0));
        let result = GreedyBreaker.break_lines(
            items,
            &BreakParams {
                line_width: 500.0,
                ..Default::default()
            },
        );
        assert_eq!(result.lines.len(), 2);
    }

    #[test]
    fn test_no_wrap_emits_one_overflowing_line() {
        let items = words("aaaa bbbb cccc dddd", 10.0);
        let result = GreedyBreaker.break_lines(
            items,
            &BreakParams {
                line_width: 30.0,
                wrap: false,
                ..Default::default()
            },
        );
        assert_eq!(result.lines.len(), 1);
        assert!(result.lines[0].natural_width > 30.0);
    }

    #[test]
    fn test_emergency_explodes_long_word() {
        // One 200pt word against a 50pt line: per-character pieces must
        // produce multiple lines instead of an infinite loop or a single
        // overflow.
        let items = vec![word("aaaaaaaaaaaaaaaaaaaa", 10.0)];
        let result = GreedyBreaker.break_lines(
            items,
            &BreakParams {
                line_width: 50.0,
                ..Default::default()
            },
        );
        assert!(result.lines.len() >= 4, "got {} lines", result.lines.len());
        for line in &result.lines {
            assert!(line.natural_width <= 50.0 + 1e-9);
        }
    }

    #[test]
    fn test_center_alignment_offsets() {
        let items = words("aa", 10.0);
        let result = GreedyBreaker.break_lines(
            items,
            &BreakParams {
                line_width: 100.0,
                align: TextAlign::Center,
                ..Default::default()
            },
        );
        assert!((result.lines[0].start_offset - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_end_alignment_offset() {
        let items = words("aa", 10.0);
        let result = GreedyBreaker.break_lines(
            items,
            &BreakParams {
                line_width: 100.0,
                align: TextAlign::End,
                ..Default::default()
            },
        );
        assert!((result.lines[0].start_offset - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_first_line_indent() {
        let items = words("aa bb cc dd ee ff", 10.0);
        let result = GreedyBreaker.break_lines(
            items,
            &BreakParams {
                line_width: 60.0,
                first_line_indent: 20.0,
                ..Default::default()
            },
        );
        // First line target shrinks to 40pt: only "aa bb" fits.
        assert!((result.lines[0].natural_width - 50.0).abs() > 1e-9 || result.lines.len() > 1);
        assert!((result.lines[0].start_offset - 20.0).abs() < 1e-9);
        assert_eq!(result.lines[1].start_offset, 0.0);
    }

    #[test]
    fn test_determinism() {
        let params = BreakParams {
            line_width: 55.0,
            ..Default::default()
        };
        let a = GreedyBreaker.break_lines(words("aa bb cc dd ee", 10.0), &params);
        let b = GreedyBreaker.break_lines(words("aa bb cc dd ee", 10.0), &params);
        assert_eq!(a.lines, b.lines);
    }

    #[test]
    fn test_natural_width_excludes_break_glue() {
        let items = words("aa bb", 10.0);
        // Break at the glue (index 1): natural width is just "aa".
        assert!((natural_width(&items, 0, 1) - 20.0).abs() < 1e-9);
        // Whole sequence: boxes plus interior glue.
        assert!((natural_width(&items, 0, 2) - 50.0).abs() < 1e-9);
    }
}
