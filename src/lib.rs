//! # Folio
//!
//! An XSL-FO layout and pagination engine: formatting objects in,
//! positioned area tree out.
//!
//! Folio owns the hard middle of an XSL-FO processor — property
//! resolution, text measurement and line breaking, block and table layout,
//! and pagination with keeps, breaks, footnotes and markers. The XML
//! parser that produces the formatting-object tree and the PDF serializer
//! that consumes the area tree are external collaborators: the parser
//! drives [`fo::FoTreeBuilder`], the serializer walks [`area::AreaTree`].
//!
//! ## Architecture
//!
//! ```text
//! FO tree (built by your parser)
//!       ↓
//!   [fo]      — property resolution: inheritance, lengths, writing modes
//!       ↓
//!   [font]    — cmap/hmtx/kern/GSUB parsing, shaping, subsetting
//!       ↓
//!   [text]    — box/glue/penalty model, greedy and Knuth-Plass breakers
//!       ↓
//!   [layout]  — blocks, tables, lists; page builder with keeps/footnotes
//!       ↓
//!   [area]    — positioned area tree for the PDF serializer
//! ```
//!
//! Layout is a pure function of (tree, fonts, options): re-running it over
//! the same inputs produces a byte-identical area tree.

pub mod area;
pub mod error;
pub mod fo;
pub mod font;
pub mod layout;
pub mod options;
pub mod text;

pub use area::AreaTree;
pub use error::{Diagnostics, FolioError, Warning, WarningKind};
pub use fo::{FoKind, FoTree, FoTreeBuilder, NodeId};
pub use font::FontContext;
pub use options::{FontBinding, ImageInfo, LayoutOptions, LineBreaking};

use base64::Engine as _;

/// Lay a document out into an area tree.
///
/// This is the primary entry point. Fonts named in
/// [`LayoutOptions::truetype_fonts`] are registered before layout begins;
/// everything else resolves through the fallback chain.
pub fn layout(tree: &FoTree, options: &LayoutOptions) -> Result<AreaTree, FolioError> {
    layout_with_diagnostics(tree, options).map(|(tree, _)| tree)
}

/// Same as [`layout`] but also returns the warnings the run produced.
pub fn layout_with_diagnostics(
    tree: &FoTree,
    options: &LayoutOptions,
) -> Result<(AreaTree, Diagnostics), FolioError> {
    let mut fonts = FontContext::new();
    fonts.set_fallback_enabled(options.enable_font_fallback);
    register_font_bindings(&mut fonts, &options.truetype_fonts)?;
    layout_with_fonts(tree, &fonts, options)
}

/// Lay out against a caller-managed font environment. Font files are
/// shared read-only, so one [`FontContext`] can serve many runs.
pub fn layout_with_fonts(
    tree: &FoTree,
    fonts: &FontContext,
    options: &LayoutOptions,
) -> Result<(AreaTree, Diagnostics), FolioError> {
    let mut engine = layout::Engine::new(tree, fonts, options);
    let area_tree = layout::page::run_document(&mut engine)?;
    Ok((area_tree, engine.diags))
}

/// Register explicit font bindings. Each source is a raw base64 string or
/// a data URI (`data:font/ttf;base64,...`).
fn register_font_bindings(
    fonts: &mut FontContext,
    bindings: &[FontBinding],
) -> Result<(), FolioError> {
    let b64 = base64::engine::general_purpose::STANDARD;
    for entry in bindings {
        let payload = match entry.src.find(',') {
            Some(comma) if entry.src.starts_with("data:") => &entry.src[comma + 1..],
            _ => entry.src.as_str(),
        };
        let data = b64
            .decode(payload.as_bytes())
            .map_err(|e| FolioError::FontMalformed {
                reason: format!("font binding for {:?} is not valid base64: {e}", entry.family),
            })?;
        fonts.register(&entry.family, entry.weight, entry.italic, data)?;
    }
    Ok(())
}
