//! Layout options.
//!
//! Everything the embedder can vary between runs without touching the FO
//! tree: breaker selection, hyphenation knobs, font bindings, subsetting,
//! and intrinsic image dimensions for `fo:external-graphic` sources.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Which line-breaking algorithm drives paragraph layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineBreaking {
    /// Commit a break at the last feasible breakpoint. Linear time.
    #[default]
    Greedy,
    /// Knuth-Plass dynamic program minimizing total demerits.
    Optimal,
}

/// A font to bind to a family name before layout.
///
/// `src` is either a raw base64 string or a data URI
/// (`data:font/ttf;base64,...`), matching what document toolchains emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FontBinding {
    pub family: String,
    pub src: String,
    #[serde(default = "default_weight")]
    pub weight: u16,
    #[serde(default)]
    pub italic: bool,
}

fn default_weight() -> u16 {
    400
}

/// Intrinsic dimensions for an image, keyed by its `src` value.
///
/// The layout engine treats raster content as a black box: pixels are
/// converted to points through the declared DPI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ImageInfo {
    pub width_px: u32,
    pub height_px: u32,
    #[serde(default = "default_dpi")]
    pub dpi: f64,
}

fn default_dpi() -> f64 {
    96.0
}

impl ImageInfo {
    /// Intrinsic size in points.
    pub fn size_pt(&self) -> (f64, f64) {
        let scale = 72.0 / self.dpi;
        (self.width_px as f64 * scale, self.height_px as f64 * scale)
    }
}

/// All knobs accepted by [`crate::layout`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LayoutOptions {
    /// Selects the line-breaking algorithm.
    pub line_breaking: LineBreaking,

    /// Inject hyphen penalties at syllable boundaries.
    pub enable_hyphenation: bool,
    /// BCP 47 tag selecting the hyphenation dictionary.
    pub hyphenation_language: String,
    /// Words shorter than this are never hyphenated. Minimum 2.
    pub hyphenation_min_word_length: u32,
    /// Minimum characters before the first hyphen. Minimum 1.
    pub hyphenation_min_left_chars: u32,
    /// Minimum characters after the last hyphen. Minimum 1.
    pub hyphenation_min_right_chars: u32,

    /// Emit subset font programs in the area tree instead of full fonts.
    pub subset_fonts: bool,
    /// Consult system font directories for unresolved families.
    pub enable_font_fallback: bool,
    /// Explicit font bindings, applied before any fallback.
    pub truetype_fonts: Vec<FontBinding>,

    /// Intrinsic dimensions for `external-graphic` sources, keyed by `src`.
    pub images: HashMap<String, ImageInfo>,

    /// Cooperative cancellation flag, checked at each page boundary.
    #[serde(skip)]
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            line_breaking: LineBreaking::Greedy,
            enable_hyphenation: false,
            hyphenation_language: "en".to_string(),
            hyphenation_min_word_length: 5,
            hyphenation_min_left_chars: 2,
            hyphenation_min_right_chars: 3,
            subset_fonts: true,
            enable_font_fallback: true,
            truetype_fonts: Vec::new(),
            images: HashMap::new(),
            cancel: None,
        }
    }
}

impl LayoutOptions {
    /// True once the embedder has signalled cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(std::sync::atomic::Ordering::Relaxed))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = LayoutOptions::default();
        assert_eq!(opts.line_breaking, LineBreaking::Greedy);
        assert!(!opts.enable_hyphenation);
        assert_eq!(opts.hyphenation_min_left_chars, 2);
        assert!(opts.subset_fonts);
        assert!(!opts.is_cancelled());
    }

    #[test]
    fn test_options_deserialize_kebab_case() {
        let json = r#"{
            "line-breaking": "optimal",
            "enable-hyphenation": true,
            "hyphenation-language": "de"
        }"#;
        let opts: LayoutOptions = serde_json::from_str(json).unwrap();
        assert_eq!(opts.line_breaking, LineBreaking::Optimal);
        assert!(opts.enable_hyphenation);
        assert_eq!(opts.hyphenation_language, "de");
    }

    #[test]
    fn test_image_info_points() {
        let info = ImageInfo {
            width_px: 192,
            height_px: 96,
            dpi: 96.0,
        };
        let (w, h) = info.size_pt();
        assert!((w - 144.0).abs() < 1e-9);
        assert!((h - 72.0).abs() < 1e-9);
    }

    #[test]
    fn test_cancel_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let opts = LayoutOptions {
            cancel: Some(flag.clone()),
            ..Default::default()
        };
        assert!(!opts.is_cancelled());
        flag.store(true, std::sync::atomic::Ordering::Relaxed);
        assert!(opts.is_cancelled());
    }
}
