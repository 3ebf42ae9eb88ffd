//! # Area Tree
//!
//! The positioned output of layout and the sole handoff to the PDF
//! serializer. Nodes carry geometry, paint attributes, glyph runs, image
//! and rule references; no layout decision is left downstream.
//!
//! Coordinates are points from the page's top-left corner, x growing right
//! and y growing down. Colors are carried as the raw property strings;
//! parsing them belongs to the serializer.
//!
//! The whole tree serializes with serde; its canonical JSON form is what
//! the idempotence guarantee is stated over.

use serde::{Deserialize, Serialize};

/// An axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Containment with a small tolerance for accumulated float error.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        const EPS: f64 = 0.01;
        other.x >= self.x - EPS
            && other.y >= self.y - EPS
            && other.right() <= self.right() + EPS
            && other.bottom() <= self.bottom() + EPS
    }
}

/// One painted border edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorderSegment {
    pub width: f64,
    pub style: String,
    pub color: String,
}

/// Paint attributes attached to an area. Edges are in top, right, bottom,
/// left order; corner radii in top-left, top-right, bottom-right,
/// bottom-left order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Paint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    pub borders: [Option<BorderSegment>; 4],
    pub radius: [f64; 4],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip: Option<Rect>,
}

impl Paint {
    pub fn is_visible(&self) -> bool {
        self.background.is_some() || self.borders.iter().any(|b| b.is_some())
    }
}

/// A run of glyphs in one font at one size.
///
/// `origin` is the baseline start. `advances` are per-glyph advances in
/// points with kerning already applied; `adjustments` repeat the kerning
/// deltas in 1/1000 em, which is what the serializer's `TJ` emission wants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlyphRun {
    /// Index into [`AreaTree::fonts`].
    pub font: u32,
    pub size: f64,
    pub color: String,
    pub x: f64,
    pub y: f64,
    pub glyphs: Vec<u16>,
    pub advances: Vec<f64>,
    pub adjustments: Vec<i16>,
    /// The source characters, for ToUnicode-backed extraction.
    pub text: String,
    pub width: f64,
    pub ascent: f64,
    pub descent: f64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub underline: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub line_through: bool,
    /// External link target for `fo:basic-link`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Unresolved `page-number-citation` ref-id; patched before handoff.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
}

impl GlyphRun {
    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }
}

/// A filled rule: leaders, underlines, footnote separators, table rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleArea {
    pub rect: Rect,
    pub style: String,
    pub color: String,
}

/// A placed image reference; decoding stays with the serializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageArea {
    pub rect: Rect,
    pub src: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clip: Option<Rect>,
}

/// A line of inline content with a shared baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineArea {
    pub rect: Rect,
    /// Absolute y of the baseline.
    pub baseline: f64,
    pub children: Vec<Area>,
}

/// A block-level area: stacked content with optional paint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockArea {
    pub rect: Rect,
    pub paint: Paint,
    pub children: Vec<Area>,
    /// The source `id` property, registered for citations and links.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl BlockArea {
    pub fn new(rect: Rect) -> Self {
        Self {
            rect,
            paint: Paint::default(),
            children: Vec::new(),
            id: None,
        }
    }
}

/// Any positioned area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Area {
    Block(BlockArea),
    Line(LineArea),
    Glyphs(GlyphRun),
    Rule(RuleArea),
    Image(ImageArea),
}

impl Area {
    /// The area's outer rectangle.
    pub fn rect(&self) -> Rect {
        match self {
            Area::Block(b) => b.rect,
            Area::Line(l) => l.rect,
            Area::Glyphs(g) => Rect::new(g.x, g.y - g.ascent, g.width, g.ascent + g.descent),
            Area::Rule(r) => r.rect,
            Area::Image(i) => i.rect,
        }
    }

    pub fn children(&self) -> &[Area] {
        match self {
            Area::Block(b) => &b.children,
            Area::Line(l) => &l.children,
            _ => &[],
        }
    }
}

/// Which page region an area belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RegionKind {
    Body,
    Before,
    After,
    Start,
    End,
}

/// One populated region of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionArea {
    pub kind: RegionKind,
    pub rect: Rect,
    pub paint: Paint,
    pub areas: Vec<Area>,
}

/// One finished page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageArea {
    /// 1-based page number within the document.
    pub number: u32,
    pub width: f64,
    pub height: f64,
    pub regions: Vec<RegionArea>,
}

impl PageArea {
    pub fn region(&self, kind: RegionKind) -> Option<&RegionArea> {
        self.regions.iter().find(|r| r.kind == kind)
    }

    /// Every area on the page, depth-first.
    pub fn all_areas(&self) -> Vec<&Area> {
        fn walk<'a>(area: &'a Area, out: &mut Vec<&'a Area>) {
            out.push(area);
            for child in area.children() {
                walk(child, out);
            }
        }
        let mut out = Vec::new();
        for region in &self.regions {
            for area in &region.areas {
                walk(area, &mut out);
            }
        }
        out
    }

    /// Every glyph run on the page, depth-first.
    pub fn glyph_runs(&self) -> Vec<&GlyphRun> {
        self.all_areas()
            .into_iter()
            .filter_map(|a| match a {
                Area::Glyphs(g) => Some(g),
                _ => None,
            })
            .collect()
    }

    /// Concatenated text content of the page, in area order.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for run in self.glyph_runs() {
            if !out.is_empty() && !out.ends_with(' ') {
                out.push(' ');
            }
            out.push_str(&run.text);
        }
        out
    }
}

/// A font the area tree references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum FontResource {
    /// One of the 14 built-in base fonts; no embedding required.
    Base { name: String },
    /// An embedded font program (subset or full) plus its ToUnicode CMap.
    Embedded {
        family: String,
        weight: u16,
        italic: bool,
        data: Vec<u8>,
        to_unicode: Vec<u8>,
    },
}

/// A PDF outline (bookmark) entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineEntry {
    pub title: String,
    pub page: u32,
    pub y: f64,
    pub children: Vec<OutlineEntry>,
}

/// The complete layout result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AreaTree {
    pub pages: Vec<PageArea>,
    pub fonts: Vec<FontResource>,
    pub outline: Vec<OutlineEntry>,
}

impl AreaTree {
    /// Canonical JSON bytes; two runs over the same inputs produce
    /// identical bytes.
    pub fn to_canonical_json(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("area tree serialization cannot fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_containment_tolerance() {
        let outer = Rect::new(0.0, 0.0, 100.0, 100.0);
        let inner = Rect::new(10.0, 10.0, 90.005, 50.0);
        assert!(outer.contains_rect(&inner));
        let outside = Rect::new(10.0, 10.0, 95.0, 50.0);
        assert!(!outer.contains_rect(&outside));
    }

    #[test]
    fn test_glyph_run_rect_spans_ascent_descent() {
        let run = GlyphRun {
            font: 0,
            size: 12.0,
            color: "black".to_string(),
            x: 10.0,
            y: 100.0,
            glyphs: vec![1],
            advances: vec![6.0],
            adjustments: vec![0],
            text: "a".to_string(),
            width: 6.0,
            ascent: 8.6,
            descent: 2.5,
            underline: false,
            line_through: false,
            link: None,
            citation: None,
        };
        let rect = Area::Glyphs(run).rect();
        assert!((rect.y - 91.4).abs() < 1e-9);
        assert!((rect.height - 11.1).abs() < 1e-9);
    }

    #[test]
    fn test_canonical_json_stable() {
        let tree = AreaTree {
            pages: vec![PageArea {
                number: 1,
                width: 595.0,
                height: 842.0,
                regions: vec![],
            }],
            fonts: vec![FontResource::Base {
                name: "Helvetica".to_string(),
            }],
            outline: vec![],
        };
        assert_eq!(tree.to_canonical_json(), tree.to_canonical_json());
    }

    #[test]
    fn test_page_text_concatenation() {
        let mut page = PageArea {
            number: 1,
            width: 100.0,
            height: 100.0,
            regions: vec![RegionArea {
                kind: RegionKind::Body,
                rect: Rect::new(0.0, 0.0, 100.0, 100.0),
                paint: Paint::default(),
                areas: vec![],
            }],
        };
        let mk = |text: &str| {
            Area::Glyphs(GlyphRun {
                font: 0,
                size: 12.0,
                color: "black".into(),
                x: 0.0,
                y: 0.0,
                glyphs: vec![],
                advances: vec![],
                adjustments: vec![],
                text: text.to_string(),
                width: 0.0,
                ascent: 0.0,
                descent: 0.0,
                underline: false,
                line_through: false,
                link: None,
                citation: None,
            })
        };
        page.regions[0].areas.push(mk("Hello"));
        page.regions[0].areas.push(mk("world"));
        assert_eq!(page.text(), "Hello world");
    }
}
