//! Property resolution: computed values, inheritance, lengths, writing
//! modes, and shorthand expansion.
//!
//! The resolver answers "what is the computed value of property P on node N"
//! by checking the node's own bag, then walking parent links for inheritable
//! properties, then falling back to the defined default. Length values
//! resolve to points; `em` against the node's computed font size, `%`
//! against a caller-supplied reference dimension.
//!
//! Shorthands (`margin`, `padding`, `border`, `border-width/style/color` and
//! the per-edge `border-top` forms) expand eagerly while the tree is built,
//! never at resolve time. Explicit per-edge values always win over expanded
//! shorthand residue.

use crate::error::FolioError;
use crate::fo::{FoTree, NodeId, PropertyBag};

/// Writing modes supported by the directional mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritingMode {
    #[default]
    LrTb,
    RlTb,
    TbRl,
    TbLr,
}

/// Absolute edges of a rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsEdge {
    Top,
    Bottom,
    Left,
    Right,
}

/// Writing-mode-relative edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelEdge {
    Before,
    After,
    Start,
    End,
}

impl WritingMode {
    pub fn parse(s: &str) -> Option<WritingMode> {
        match s {
            "lr-tb" | "lr" => Some(WritingMode::LrTb),
            "rl-tb" | "rl" => Some(WritingMode::RlTb),
            "tb-rl" | "tb" => Some(WritingMode::TbRl),
            "tb-lr" => Some(WritingMode::TbLr),
            _ => None,
        }
    }

    /// Map a relative edge to the absolute edge it denotes under this mode.
    pub fn absolute(self, rel: RelEdge) -> AbsEdge {
        match (self, rel) {
            (WritingMode::LrTb, RelEdge::Before) => AbsEdge::Top,
            (WritingMode::LrTb, RelEdge::After) => AbsEdge::Bottom,
            (WritingMode::LrTb, RelEdge::Start) => AbsEdge::Left,
            (WritingMode::LrTb, RelEdge::End) => AbsEdge::Right,

            (WritingMode::RlTb, RelEdge::Before) => AbsEdge::Top,
            (WritingMode::RlTb, RelEdge::After) => AbsEdge::Bottom,
            (WritingMode::RlTb, RelEdge::Start) => AbsEdge::Right,
            (WritingMode::RlTb, RelEdge::End) => AbsEdge::Left,

            (WritingMode::TbRl, RelEdge::Before) => AbsEdge::Right,
            (WritingMode::TbRl, RelEdge::After) => AbsEdge::Left,
            (WritingMode::TbRl, RelEdge::Start) => AbsEdge::Top,
            (WritingMode::TbRl, RelEdge::End) => AbsEdge::Bottom,

            (WritingMode::TbLr, RelEdge::Before) => AbsEdge::Left,
            (WritingMode::TbLr, RelEdge::After) => AbsEdge::Right,
            (WritingMode::TbLr, RelEdge::Start) => AbsEdge::Top,
            (WritingMode::TbLr, RelEdge::End) => AbsEdge::Bottom,
        }
    }

    /// Inverse of [`absolute`](Self::absolute): which relative edge denotes
    /// the given absolute edge under this mode.
    pub fn relative(self, abs: AbsEdge) -> RelEdge {
        for rel in [RelEdge::Before, RelEdge::After, RelEdge::Start, RelEdge::End] {
            if self.absolute(rel) == abs {
                return rel;
            }
        }
        unreachable!("edge mapping is a bijection")
    }
}

impl RelEdge {
    pub fn name(self) -> &'static str {
        match self {
            RelEdge::Before => "before",
            RelEdge::After => "after",
            RelEdge::Start => "start",
            RelEdge::End => "end",
        }
    }
}

impl AbsEdge {
    pub fn name(self) -> &'static str {
        match self {
            AbsEdge::Top => "top",
            AbsEdge::Bottom => "bottom",
            AbsEdge::Left => "left",
            AbsEdge::Right => "right",
        }
    }

    pub const ALL: [AbsEdge; 4] = [AbsEdge::Top, AbsEdge::Bottom, AbsEdge::Left, AbsEdge::Right];
}

// ─── Length parsing ─────────────────────────────────────────────

/// Parse a length value to points.
///
/// `em` resolves against `em_size`; `%` against `percent_base` when one is
/// available, else the parse fails so the caller can apply its documented
/// per-property fallback. Bare numbers are treated as points.
pub fn parse_length(value: &str, em_size: f64, percent_base: Option<f64>) -> Result<f64, String> {
    let v = value.trim();
    if v.is_empty() {
        return Err("empty length".to_string());
    }
    if let Some(num) = v.strip_suffix('%') {
        let n: f64 = num
            .trim()
            .parse()
            .map_err(|_| format!("bad percentage {v:?}"))?;
        return match percent_base {
            Some(base) => Ok(base * n / 100.0),
            None => Err(format!("percentage {v:?} has no reference dimension")),
        };
    }
    let (num_part, factor) = if let Some(n) = v.strip_suffix("pt") {
        (n, 1.0)
    } else if let Some(n) = v.strip_suffix("in") {
        (n, 72.0)
    } else if let Some(n) = v.strip_suffix("cm") {
        (n, 72.0 / 2.54)
    } else if let Some(n) = v.strip_suffix("mm") {
        (n, 72.0 / 25.4)
    } else if let Some(n) = v.strip_suffix("pc") {
        (n, 12.0)
    } else if let Some(n) = v.strip_suffix("px") {
        (n, 72.0 / 96.0)
    } else if let Some(n) = v.strip_suffix("em") {
        (n, em_size)
    } else {
        (v, 1.0)
    };
    num_part
        .trim()
        .parse::<f64>()
        .map(|n| n * factor)
        .map_err(|_| format!("bad length {v:?}"))
}

/// Does a token look like a length (or border-width keyword)? Used for
/// border shorthand token classification, which sorts tokens by shape.
fn looks_like_length(token: &str) -> bool {
    if matches!(token, "thin" | "medium" | "thick") {
        return true;
    }
    token
        .chars()
        .next()
        .map(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == '+')
        .unwrap_or(false)
}

const BORDER_STYLES: &[&str] = &[
    "none", "hidden", "dotted", "dashed", "solid", "double", "groove", "ridge", "inset", "outset",
];

/// Resolve border-width keywords to points.
pub fn parse_border_width(value: &str, em_size: f64) -> Result<f64, String> {
    match value.trim() {
        "thin" => Ok(0.5),
        "medium" => Ok(1.0),
        "thick" => Ok(2.0),
        other => parse_length(other, em_size, None),
    }
}

// ─── Shorthand expansion ────────────────────────────────────────

/// Set `name=value` on the bag, expanding shorthands into their longhand
/// components. Called for every attribute while the tree is built.
pub fn expand_into(bag: &mut PropertyBag, name: &str, value: &str) {
    match name {
        "margin" | "padding" => {
            bag.set(name, value);
            expand_box(bag, name, value);
        }
        "border-width" | "border-style" | "border-color" => {
            bag.set(name, value);
            let (base, kind) = name.split_once('-').unwrap();
            expand_box_infixed(bag, base, kind, value);
        }
        "border" => {
            bag.set(name, value);
            let (width, style, color) = classify_border_tokens(value);
            for edge in ["top", "bottom", "left", "right"] {
                if let Some(w) = width {
                    bag.set_if_absent(&format!("border-{edge}-width"), w);
                }
                if let Some(s) = style {
                    bag.set_if_absent(&format!("border-{edge}-style"), s);
                }
                if let Some(c) = color {
                    bag.set_if_absent(&format!("border-{edge}-color"), c);
                }
            }
        }
        "border-top" | "border-bottom" | "border-left" | "border-right" | "border-before"
        | "border-after" | "border-start" | "border-end" => {
            bag.set(name, value);
            let edge = name.strip_prefix("border-").unwrap();
            let (width, style, color) = classify_border_tokens(value);
            if let Some(w) = width {
                bag.set_if_absent(&format!("border-{edge}-width"), w);
            }
            if let Some(s) = style {
                bag.set_if_absent(&format!("border-{edge}-style"), s);
            }
            if let Some(c) = color {
                bag.set_if_absent(&format!("border-{edge}-color"), c);
            }
        }
        _ => bag.set(name, value),
    }
}

/// CSS box expansion: 1 value for all edges, 2 for vertical/horizontal,
/// 3 for top/horizontal/bottom, 4 for top/right/bottom/left.
fn box_edges(value: &str) -> Option<[&str; 4]> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    match parts.len() {
        1 => Some([parts[0], parts[0], parts[0], parts[0]]),
        2 => Some([parts[0], parts[1], parts[0], parts[1]]),
        3 => Some([parts[0], parts[1], parts[2], parts[1]]),
        4 => Some([parts[0], parts[1], parts[2], parts[3]]),
        _ => None,
    }
}

fn expand_box(bag: &mut PropertyBag, base: &str, value: &str) {
    if let Some([t, r, b, l]) = box_edges(value) {
        bag.set_if_absent(&format!("{base}-top"), t);
        bag.set_if_absent(&format!("{base}-right"), r);
        bag.set_if_absent(&format!("{base}-bottom"), b);
        bag.set_if_absent(&format!("{base}-left"), l);
    }
}

fn expand_box_infixed(bag: &mut PropertyBag, base: &str, kind: &str, value: &str) {
    if let Some([t, r, b, l]) = box_edges(value) {
        bag.set_if_absent(&format!("{base}-top-{kind}"), t);
        bag.set_if_absent(&format!("{base}-right-{kind}"), r);
        bag.set_if_absent(&format!("{base}-bottom-{kind}"), b);
        bag.set_if_absent(&format!("{base}-left-{kind}"), l);
    }
}

/// Sort `border: 1pt solid red` tokens into (width, style, color) by shape:
/// length-like tokens are widths, style keywords are styles, anything else
/// is a color (colors themselves stay opaque strings here).
fn classify_border_tokens(value: &str) -> (Option<&str>, Option<&str>, Option<&str>) {
    let mut width = None;
    let mut style = None;
    let mut color = None;
    for token in value.split_whitespace() {
        if BORDER_STYLES.contains(&token) {
            style.get_or_insert(token);
        } else if looks_like_length(token) {
            width.get_or_insert(token);
        } else {
            color.get_or_insert(token);
        }
    }
    (width, style, color)
}

// ─── Inheritance & defaults ─────────────────────────────────────

/// The fixed set of inheritable properties.
const INHERITED: &[&str] = &[
    "font-family",
    "font-size",
    "font-style",
    "font-weight",
    "font-variant",
    "color",
    "text-align",
    "text-align-last",
    "text-indent",
    "text-transform",
    "line-height",
    "letter-spacing",
    "word-spacing",
    "writing-mode",
    "direction",
    "language",
    "country",
    "hyphenate",
    "hyphenation-character",
    "hyphenation-push-character-count",
    "hyphenation-remain-character-count",
    "white-space-collapse",
    "linefeed-treatment",
    "wrap-option",
    "leader-pattern",
    "leader-length",
    "leader-pattern-width",
    "rule-style",
    "rule-thickness",
    "provisional-distance-between-starts",
    "provisional-label-separation",
    "border-collapse",
    "border-spacing",
    "orphans",
    "widows",
    "reference-orientation",
    "role",
    "keep-together",
];

pub fn is_inherited(name: &str) -> bool {
    INHERITED.contains(&name)
}

/// Defined defaults for the properties the engine reads. Absent entries
/// default per-accessor.
fn default_of(name: &str) -> Option<&'static str> {
    Some(match name {
        "font-family" => "sans-serif",
        "font-size" => "12pt",
        "font-weight" => "400",
        "font-style" => "normal",
        "color" => "black",
        "background-color" => "transparent",
        "text-align" => "start",
        "text-indent" => "0pt",
        "text-transform" => "none",
        "line-height" => "normal",
        "writing-mode" => "lr-tb",
        "direction" => "ltr",
        "white-space-collapse" => "true",
        "linefeed-treatment" => "treat-as-space",
        "wrap-option" => "wrap",
        "hyphenate" => "false",
        "hyphenation-character" => "-",
        "hyphenation-push-character-count" => "2",
        "hyphenation-remain-character-count" => "2",
        "orphans" => "2",
        "widows" => "2",
        "column-count" => "1",
        "column-gap" => "12pt",
        "keep-together" => "auto",
        "keep-with-next" => "auto",
        "keep-with-previous" => "auto",
        "break-before" => "auto",
        "break-after" => "auto",
        "display-align" => "auto",
        "reference-orientation" => "0",
        "leader-pattern" => "space",
        "leader-length" => "12pt",
        "rule-thickness" => "1pt",
        "border-collapse" => "separate",
        "border-spacing" => "0pt",
        "table-layout" => "auto",
        "table-omit-header-at-break" => "false",
        "table-omit-footer-at-break" => "false",
        "initial-page-number" => "auto",
        "force-page-count" => "auto",
        "retrieve-position" => "first-starting-within-page",
        "retrieve-boundary" => "page-sequence",
        "provisional-distance-between-starts" => "24pt",
        "provisional-label-separation" => "6pt",
        "absolute-position" => "auto",
        "overflow" => "auto",
        _ => return None,
    })
}

// ─── Typed values ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextAlign {
    #[default]
    Start,
    Center,
    End,
    Justify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayAlign {
    #[default]
    Auto,
    Before,
    Center,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BreakKind {
    #[default]
    Auto,
    Column,
    Page,
    EvenPage,
    OddPage,
}

/// Strength of a keep constraint. `always` never yields; integer strengths
/// yield to stronger competing constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Keep {
    #[default]
    Auto,
    Strength(u32),
    Always,
}

impl Keep {
    pub fn is_auto(self) -> bool {
        matches!(self, Keep::Auto)
    }

    /// Numeric strength for comparisons; `always` outranks every integer.
    pub fn strength(self) -> u32 {
        match self {
            Keep::Auto => 0,
            Keep::Strength(n) => n.min(999),
            Keep::Always => 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapOption {
    #[default]
    Wrap,
    NoWrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextTransform {
    #[default]
    None,
    Uppercase,
    Lowercase,
    Capitalize,
}

/// A resolved space specifier (space-before / space-after).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SpaceSpec {
    pub optimum: f64,
    pub minimum: f64,
    pub maximum: f64,
    pub discard_at_edge: bool,
}

/// The per-node typed side-table for the properties text layout touches on
/// every run. Computed once per formatting object, then threaded through
/// inline construction.
#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub family: String,
    pub size: f64,
    pub weight: u16,
    pub italic: bool,
    pub color: String,
    pub letter_spacing: f64,
    pub word_spacing: f64,
    pub line_height: f64,
    pub language: Option<String>,
    pub transform: TextTransform,
    pub underline: bool,
    pub line_through: bool,
}

// ─── The resolver ───────────────────────────────────────────────

/// Computed-value resolution over a read-only [`FoTree`].
pub struct Resolver<'a> {
    tree: &'a FoTree,
}

impl<'a> Resolver<'a> {
    pub fn new(tree: &'a FoTree) -> Self {
        Self { tree }
    }

    pub fn tree(&self) -> &'a FoTree {
        self.tree
    }

    /// The value specified directly on the node, if any.
    pub fn specified(&self, node: NodeId, name: &str) -> Option<&'a str> {
        self.tree.props(node).get(name)
    }

    /// Computed value: own bag, then the parent chain for inheritable
    /// properties, then the defined default.
    pub fn computed(&self, node: NodeId, name: &str) -> Option<&'a str> {
        if let Some(v) = self.specified(node, name) {
            return Some(v);
        }
        if is_inherited(name) {
            let mut cur = self.tree.parent(node);
            while let Some(n) = cur {
                if let Some(v) = self.specified(n, name) {
                    return Some(v);
                }
                cur = self.tree.parent(n);
            }
        }
        default_of(name)
    }

    /// The computed font size in points. `em` and `%` in a specified
    /// font-size resolve against the parent's computed size.
    pub fn font_size(&self, node: NodeId) -> f64 {
        let parent_size = self
            .tree
            .parent(node)
            .map(|p| self.font_size(p))
            .unwrap_or(12.0);
        match self.specified(node, "font-size") {
            Some(v) => match v {
                "larger" => parent_size * 1.2,
                "smaller" => parent_size / 1.2,
                _ => parse_length(v, parent_size, Some(parent_size)).unwrap_or_else(|e| {
                    log::warn!("font-size: {e}; keeping inherited size");
                    parent_size
                }),
            },
            None => parent_size,
        }
    }

    /// Lenient length accessor: substitute `default` (and warn) on junk.
    pub fn length(&self, node: NodeId, name: &str, percent_base: Option<f64>, default: f64) -> f64 {
        match self.computed(node, name) {
            Some(v) => {
                parse_length(v, self.font_size(node), percent_base).unwrap_or_else(|e| {
                    log::warn!("'{name}': {e}; substituting {default}pt (node #{node})");
                    default
                })
            }
            None => default,
        }
    }

    /// Length accessor that distinguishes "absent" from "present".
    pub fn length_opt(&self, node: NodeId, name: &str, percent_base: Option<f64>) -> Option<f64> {
        let v = self.computed(node, name)?;
        parse_length(v, self.font_size(node), percent_base).ok()
    }

    /// Strict length accessor for non-recoverable positions (page geometry).
    pub fn length_strict(
        &self,
        node: NodeId,
        name: &str,
        percent_base: Option<f64>,
    ) -> Result<Option<f64>, FolioError> {
        match self.computed(node, name) {
            None => Ok(None),
            Some(v) => parse_length(v, self.font_size(node), percent_base)
                .map(Some)
                .map_err(|_| FolioError::InvalidValue {
                    node,
                    property: name.to_string(),
                    value: v.to_string(),
                }),
        }
    }

    pub fn integer(&self, node: NodeId, name: &str, default: i64) -> i64 {
        match self.computed(node, name) {
            Some(v) => v.trim().parse().unwrap_or_else(|_| {
                log::warn!("'{name}': bad integer {v:?}; substituting {default} (node #{node})");
                default
            }),
            None => default,
        }
    }

    pub fn boolean(&self, node: NodeId, name: &str, default: bool) -> bool {
        match self.computed(node, name) {
            Some("true") => true,
            Some("false") => false,
            Some(v) => {
                log::warn!("'{name}': bad boolean {v:?}; substituting {default} (node #{node})");
                default
            }
            None => default,
        }
    }

    pub fn writing_mode(&self, node: NodeId) -> WritingMode {
        self.computed(node, "writing-mode")
            .and_then(WritingMode::parse)
            .unwrap_or_default()
    }

    /// Directional lookup for margin/padding/border edge properties.
    ///
    /// Order: absolute key, the relative key that maps to `edge` under the
    /// current writing mode, alternate relative spellings for the same edge
    /// (`space-before`/`start-indent` for margins), shorthand residue, then
    /// the default.
    fn edge_value(&self, node: NodeId, base: EdgeProp, edge: AbsEdge) -> Option<&'a str> {
        let props = self.tree.props(node);
        if let Some(v) = props.get(&base.abs_key(edge)) {
            return Some(v);
        }
        let wm = self.writing_mode(node);
        let rel = wm.relative(edge);
        if let Some(v) = props.get(&base.rel_key(rel)) {
            return Some(v);
        }
        for alt in base.alternate_keys(rel) {
            if let Some(v) = props.get(alt) {
                return Some(v);
            }
        }
        if let Some(residue) = props.get(base.shorthand_key()) {
            if let Some(edges) = box_edges(residue) {
                let idx = match edge {
                    AbsEdge::Top => 0,
                    AbsEdge::Right => 1,
                    AbsEdge::Bottom => 2,
                    AbsEdge::Left => 3,
                };
                return Some(edges[idx]);
            }
        }
        None
    }

    /// Resolved padding width for one absolute edge, in points.
    pub fn padding(&self, node: NodeId, edge: AbsEdge, percent_base: Option<f64>) -> f64 {
        self.edge_value(node, EdgeProp::Padding, edge)
            .and_then(|v| parse_length(v, self.font_size(node), percent_base).ok())
            .unwrap_or(0.0)
    }

    /// Resolved margin width for one absolute edge, in points.
    pub fn margin(&self, node: NodeId, edge: AbsEdge, percent_base: Option<f64>) -> f64 {
        self.edge_value(node, EdgeProp::Margin, edge)
            .and_then(|v| parse_length(v, self.font_size(node), percent_base).ok())
            .unwrap_or(0.0)
    }

    /// Resolved border width for one absolute edge, zero when the style is
    /// `none`.
    pub fn border_width(&self, node: NodeId, edge: AbsEdge) -> f64 {
        let style = self.border_style(node, edge);
        if style == "none" || style == "hidden" {
            return 0.0;
        }
        self.edge_value(node, EdgeProp::BorderWidth, edge)
            .and_then(|v| parse_border_width(v, self.font_size(node)).ok())
            .unwrap_or(0.0)
    }

    pub fn border_style(&self, node: NodeId, edge: AbsEdge) -> &'a str {
        self.edge_value(node, EdgeProp::BorderStyle, edge)
            .unwrap_or("none")
    }

    /// Border color as an opaque string; color parsing happens downstream.
    pub fn border_color(&self, node: NodeId, edge: AbsEdge) -> &'a str {
        self.edge_value(node, EdgeProp::BorderColor, edge)
            .unwrap_or("black")
    }

    /// Space specifier for `space-before`/`space-after` (components
    /// `.optimum`, `.minimum`, `.maximum`, `.conditionality` are separate
    /// attributes).
    pub fn space(&self, node: NodeId, name: &str) -> SpaceSpec {
        let fs = self.font_size(node);
        let base = self
            .specified(node, name)
            .and_then(|v| parse_length(v, fs, None).ok());
        let optimum = self
            .specified(node, &format!("{name}.optimum"))
            .and_then(|v| parse_length(v, fs, None).ok())
            .or(base)
            .unwrap_or(0.0);
        let minimum = self
            .specified(node, &format!("{name}.minimum"))
            .and_then(|v| parse_length(v, fs, None).ok())
            .unwrap_or(optimum);
        let maximum = self
            .specified(node, &format!("{name}.maximum"))
            .and_then(|v| parse_length(v, fs, None).ok())
            .unwrap_or(optimum);
        let discard_at_edge = self
            .specified(node, &format!("{name}.conditionality"))
            .map(|v| v != "retain")
            .unwrap_or(true);
        SpaceSpec {
            optimum,
            minimum,
            maximum,
            discard_at_edge,
        }
    }

    pub fn text_align(&self, node: NodeId) -> TextAlign {
        let wm = self.writing_mode(node);
        match self.computed(node, "text-align").unwrap_or("start") {
            "center" => TextAlign::Center,
            "justify" => TextAlign::Justify,
            "end" => TextAlign::End,
            "left" => match wm.absolute(RelEdge::Start) {
                AbsEdge::Left => TextAlign::Start,
                _ => TextAlign::End,
            },
            "right" => match wm.absolute(RelEdge::End) {
                AbsEdge::Right => TextAlign::End,
                _ => TextAlign::Start,
            },
            _ => TextAlign::Start,
        }
    }

    pub fn display_align(&self, node: NodeId) -> DisplayAlign {
        match self.computed(node, "display-align").unwrap_or("auto") {
            "before" => DisplayAlign::Before,
            "center" => DisplayAlign::Center,
            "after" => DisplayAlign::After,
            _ => DisplayAlign::Auto,
        }
    }

    pub fn break_kind(&self, node: NodeId, name: &str) -> BreakKind {
        match self.computed(node, name).unwrap_or("auto") {
            "column" => BreakKind::Column,
            "page" => BreakKind::Page,
            "even-page" => BreakKind::EvenPage,
            "odd-page" => BreakKind::OddPage,
            _ => BreakKind::Auto,
        }
    }

    /// Keep constraint; `.within-page` / `.within-column` components take
    /// the strongest of the specified values.
    pub fn keep(&self, node: NodeId, name: &str) -> Keep {
        let mut keep = Keep::Auto;
        for key in [
            name.to_string(),
            format!("{name}.within-page"),
            format!("{name}.within-column"),
        ] {
            let v = match self.computed(node, &key) {
                Some(v) => v,
                None => continue,
            };
            let parsed = match v {
                "always" => Keep::Always,
                "auto" => Keep::Auto,
                n => n.parse::<u32>().map(Keep::Strength).unwrap_or(Keep::Auto),
            };
            if parsed.strength() > keep.strength() {
                keep = parsed;
            }
        }
        keep
    }

    pub fn wrap_option(&self, node: NodeId) -> WrapOption {
        match self.computed(node, "wrap-option").unwrap_or("wrap") {
            "no-wrap" => WrapOption::NoWrap,
            _ => WrapOption::Wrap,
        }
    }

    pub fn text_transform(&self, node: NodeId) -> TextTransform {
        match self.computed(node, "text-transform").unwrap_or("none") {
            "uppercase" => TextTransform::Uppercase,
            "lowercase" => TextTransform::Lowercase,
            "capitalize" => TextTransform::Capitalize,
            _ => TextTransform::None,
        }
    }

    /// Line height in points. `normal` is 1.2 times the font size.
    pub fn line_height(&self, node: NodeId) -> f64 {
        let fs = self.font_size(node);
        match self.computed(node, "line-height") {
            None | Some("normal") => fs * 1.2,
            Some(v) => {
                // A bare number is a multiplier; anything with a unit is a length.
                if let Ok(n) = v.trim().parse::<f64>() {
                    n * fs
                } else {
                    parse_length(v, fs, Some(fs)).unwrap_or(fs * 1.2)
                }
            }
        }
    }

    /// Font weight as a numeric class (bold → 700).
    pub fn font_weight(&self, node: NodeId) -> u16 {
        match self.computed(node, "font-weight").unwrap_or("400") {
            "normal" => 400,
            "bold" => 700,
            "bolder" => 700,
            "lighter" => 300,
            v => v.parse().unwrap_or(400),
        }
    }

    pub fn is_italic(&self, node: NodeId) -> bool {
        matches!(
            self.computed(node, "font-style"),
            Some("italic") | Some("oblique")
        )
    }

    /// The typed side-table for text-bearing nodes.
    pub fn text_style(&self, node: NodeId) -> TextStyle {
        let size = self.font_size(node);
        let spacing = |name: &str| match self.computed(node, name) {
            None | Some("normal") => 0.0,
            Some(v) => parse_length(v, size, None).unwrap_or(0.0),
        };
        let decoration = self.computed(node, "text-decoration").unwrap_or("none");
        TextStyle {
            family: self
                .computed(node, "font-family")
                .unwrap_or("sans-serif")
                .to_string(),
            size,
            weight: self.font_weight(node),
            italic: self.is_italic(node),
            color: self.computed(node, "color").unwrap_or("black").to_string(),
            letter_spacing: spacing("letter-spacing"),
            word_spacing: spacing("word-spacing"),
            line_height: self.line_height(node),
            language: self.computed(node, "language").map(|s| s.to_string()),
            transform: self.text_transform(node),
            underline: decoration.split_whitespace().any(|d| d == "underline"),
            line_through: decoration.split_whitespace().any(|d| d == "line-through"),
        }
    }
}

/// The edge property families with directional key spellings.
#[derive(Debug, Clone, Copy)]
enum EdgeProp {
    Margin,
    Padding,
    BorderWidth,
    BorderStyle,
    BorderColor,
}

impl EdgeProp {
    fn abs_key(self, edge: AbsEdge) -> String {
        match self {
            EdgeProp::Margin => format!("margin-{}", edge.name()),
            EdgeProp::Padding => format!("padding-{}", edge.name()),
            EdgeProp::BorderWidth => format!("border-{}-width", edge.name()),
            EdgeProp::BorderStyle => format!("border-{}-style", edge.name()),
            EdgeProp::BorderColor => format!("border-{}-color", edge.name()),
        }
    }

    fn rel_key(self, rel: RelEdge) -> String {
        match self {
            EdgeProp::Margin => format!("margin-{}", rel.name()),
            EdgeProp::Padding => format!("padding-{}", rel.name()),
            EdgeProp::BorderWidth => format!("border-{}-width", rel.name()),
            EdgeProp::BorderStyle => format!("border-{}-style", rel.name()),
            EdgeProp::BorderColor => format!("border-{}-color", rel.name()),
        }
    }

    /// Alternate spellings that denote the same edge: the XSL-native space
    /// and indent properties for margins.
    fn alternate_keys(self, rel: RelEdge) -> &'static [&'static str] {
        match (self, rel) {
            (EdgeProp::Margin, RelEdge::Before) => &["space-before", "space-before.optimum"],
            (EdgeProp::Margin, RelEdge::After) => &["space-after", "space-after.optimum"],
            (EdgeProp::Margin, RelEdge::Start) => &["start-indent"],
            (EdgeProp::Margin, RelEdge::End) => &["end-indent"],
            _ => &[],
        }
    }

    fn shorthand_key(self) -> &'static str {
        match self {
            EdgeProp::Margin => "margin",
            EdgeProp::Padding => "padding",
            EdgeProp::BorderWidth => "border-width",
            EdgeProp::BorderStyle => "border-style",
            EdgeProp::BorderColor => "border-color",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fo::{FoKind, FoTreeBuilder};

    fn tree_with_block(attrs: &[(&str, &str)]) -> (FoTree, NodeId) {
        let mut b = FoTreeBuilder::new();
        b.open(FoKind::Root);
        b.open(FoKind::LayoutMasterSet);
        b.open(FoKind::SimplePageMaster);
        b.attribute("master-name", "m");
        b.open(FoKind::RegionBody);
        b.close();
        b.close();
        b.close();
        b.open(FoKind::PageSequence);
        b.attribute("master-reference", "m");
        b.attribute("font-size", "10pt");
        b.attribute("font-family", "Times");
        b.open(FoKind::Flow);
        b.attribute("flow-name", "xsl-region-body");
        let block = b.open(FoKind::Block);
        for (k, v) in attrs {
            b.attribute(k, v);
        }
        b.close();
        b.close();
        b.close();
        b.close();
        (b.finish().unwrap(), block)
    }

    #[test]
    fn test_parse_length_units() {
        assert_eq!(parse_length("10pt", 12.0, None).unwrap(), 10.0);
        assert_eq!(parse_length("1in", 12.0, None).unwrap(), 72.0);
        assert!((parse_length("25mm", 12.0, None).unwrap() - 70.866).abs() < 0.01);
        assert!((parse_length("2.54cm", 12.0, None).unwrap() - 72.0).abs() < 1e-9);
        assert_eq!(parse_length("1.5em", 12.0, None).unwrap(), 18.0);
        assert_eq!(parse_length("2pc", 12.0, None).unwrap(), 24.0);
        assert_eq!(parse_length("96px", 12.0, None).unwrap(), 72.0);
        assert_eq!(parse_length("50%", 12.0, Some(200.0)).unwrap(), 100.0);
        assert!(parse_length("50%", 12.0, None).is_err());
        assert!(parse_length("ten points", 12.0, None).is_err());
    }

    #[test]
    fn test_inheritance_walks_to_page_sequence() {
        let (tree, block) = tree_with_block(&[]);
        let r = Resolver::new(&tree);
        assert_eq!(r.computed(block, "font-family"), Some("Times"));
        assert_eq!(r.font_size(block), 10.0);
    }

    #[test]
    fn test_non_inherited_falls_to_default() {
        let (tree, block) = tree_with_block(&[]);
        let r = Resolver::new(&tree);
        // break-before is not inheritable; the sequence can't leak one in.
        assert_eq!(r.break_kind(block, "break-before"), BreakKind::Auto);
        assert_eq!(r.computed(block, "display-align"), Some("auto"));
    }

    #[test]
    fn test_em_resolves_against_computed_font_size() {
        let (tree, block) = tree_with_block(&[("margin-top", "2em")]);
        let r = Resolver::new(&tree);
        assert_eq!(r.margin(block, AbsEdge::Top, None), 20.0);
    }

    #[test]
    fn test_directional_mapping_lr_tb() {
        let (tree, block) = tree_with_block(&[("padding-before", "5pt"), ("padding-start", "7pt")]);
        let r = Resolver::new(&tree);
        assert_eq!(r.padding(block, AbsEdge::Top, None), 5.0);
        assert_eq!(r.padding(block, AbsEdge::Left, None), 7.0);
        assert_eq!(r.padding(block, AbsEdge::Right, None), 0.0);
    }

    #[test]
    fn test_directional_mapping_rl_tb() {
        let (tree, block) =
            tree_with_block(&[("writing-mode", "rl-tb"), ("padding-start", "7pt")]);
        let r = Resolver::new(&tree);
        assert_eq!(r.padding(block, AbsEdge::Right, None), 7.0);
        assert_eq!(r.padding(block, AbsEdge::Left, None), 0.0);
    }

    #[test]
    fn test_directional_mapping_tb_rl() {
        let (tree, block) =
            tree_with_block(&[("writing-mode", "tb-rl"), ("padding-before", "5pt")]);
        let r = Resolver::new(&tree);
        assert_eq!(r.padding(block, AbsEdge::Right, None), 5.0);
    }

    #[test]
    fn test_absolute_key_wins_over_relative() {
        let (tree, block) =
            tree_with_block(&[("padding-top", "9pt"), ("padding-before", "5pt")]);
        let r = Resolver::new(&tree);
        assert_eq!(r.padding(block, AbsEdge::Top, None), 9.0);
    }

    #[test]
    fn test_space_before_as_margin_alternate() {
        let (tree, block) = tree_with_block(&[("space-before", "6pt")]);
        let r = Resolver::new(&tree);
        assert_eq!(r.margin(block, AbsEdge::Top, None), 6.0);
    }

    #[test]
    fn test_margin_shorthand_expansion() {
        let (tree, block) = tree_with_block(&[("margin", "1pt 2pt 3pt 4pt")]);
        let r = Resolver::new(&tree);
        assert_eq!(r.margin(block, AbsEdge::Top, None), 1.0);
        assert_eq!(r.margin(block, AbsEdge::Right, None), 2.0);
        assert_eq!(r.margin(block, AbsEdge::Bottom, None), 3.0);
        assert_eq!(r.margin(block, AbsEdge::Left, None), 4.0);
    }

    #[test]
    fn test_margin_shorthand_two_values() {
        let (tree, block) = tree_with_block(&[("margin", "10pt 20pt")]);
        let r = Resolver::new(&tree);
        assert_eq!(r.margin(block, AbsEdge::Top, None), 10.0);
        assert_eq!(r.margin(block, AbsEdge::Bottom, None), 10.0);
        assert_eq!(r.margin(block, AbsEdge::Left, None), 20.0);
        assert_eq!(r.margin(block, AbsEdge::Right, None), 20.0);
    }

    #[test]
    fn test_border_shorthand_classification() {
        let (tree, block) = tree_with_block(&[("border", "solid 2pt red")]);
        let r = Resolver::new(&tree);
        assert_eq!(r.border_width(block, AbsEdge::Top), 2.0);
        assert_eq!(r.border_style(block, AbsEdge::Left), "solid");
        assert_eq!(r.border_color(block, AbsEdge::Bottom), "red");
    }

    #[test]
    fn test_border_none_has_zero_width() {
        let (tree, block) = tree_with_block(&[("border", "2pt none red")]);
        let r = Resolver::new(&tree);
        assert_eq!(r.border_width(block, AbsEdge::Top), 0.0);
    }

    #[test]
    fn test_explicit_edge_not_clobbered_by_shorthand() {
        let (tree, block) =
            tree_with_block(&[("border-top-width", "5pt"), ("border", "solid 1pt black")]);
        let r = Resolver::new(&tree);
        assert_eq!(r.border_width(block, AbsEdge::Top), 5.0);
        assert_eq!(r.border_width(block, AbsEdge::Bottom), 1.0);
    }

    #[test]
    fn test_keep_parsing() {
        let (tree, block) = tree_with_block(&[("keep-together", "always")]);
        let r = Resolver::new(&tree);
        assert_eq!(r.keep(block, "keep-together"), Keep::Always);

        let (tree, block) = tree_with_block(&[("keep-with-next", "42")]);
        let r = Resolver::new(&tree);
        assert_eq!(r.keep(block, "keep-with-next"), Keep::Strength(42));
        assert!(Keep::Always.strength() > Keep::Strength(999).strength());
    }

    #[test]
    fn test_space_spec_components() {
        let (tree, block) = tree_with_block(&[
            ("space-before", "6pt"),
            ("space-before.maximum", "10pt"),
            ("space-before.conditionality", "retain"),
        ]);
        let r = Resolver::new(&tree);
        let space = r.space(block, "space-before");
        assert_eq!(space.optimum, 6.0);
        assert_eq!(space.maximum, 10.0);
        assert!(!space.discard_at_edge);
    }

    #[test]
    fn test_text_align_left_maps_by_writing_mode() {
        let (tree, block) = tree_with_block(&[("text-align", "left")]);
        let r = Resolver::new(&tree);
        assert_eq!(r.text_align(block), TextAlign::Start);

        let (tree, block) =
            tree_with_block(&[("text-align", "left"), ("writing-mode", "rl-tb")]);
        let r = Resolver::new(&tree);
        assert_eq!(r.text_align(block), TextAlign::End);
    }

    #[test]
    fn test_line_height_forms() {
        let (tree, block) = tree_with_block(&[]);
        let r = Resolver::new(&tree);
        assert!((r.line_height(block) - 12.0).abs() < 1e-9); // 10pt * 1.2

        let (tree, block) = tree_with_block(&[("line-height", "1.5")]);
        let r = Resolver::new(&tree);
        assert!((r.line_height(block) - 15.0).abs() < 1e-9);

        let (tree, block) = tree_with_block(&[("line-height", "14pt")]);
        let r = Resolver::new(&tree);
        assert!((r.line_height(block) - 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_text_style_side_table() {
        let (tree, block) = tree_with_block(&[
            ("font-weight", "bold"),
            ("font-style", "italic"),
            ("text-decoration", "underline"),
            ("letter-spacing", "0.5pt"),
        ]);
        let r = Resolver::new(&tree);
        let style = r.text_style(block);
        assert_eq!(style.weight, 700);
        assert!(style.italic);
        assert!(style.underline);
        assert_eq!(style.letter_spacing, 0.5);
        assert_eq!(style.family, "Times");
    }
}
