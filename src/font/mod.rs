//! # Font Engine
//!
//! Loading, measuring, shaping, and subsetting fonts.
//!
//! A [`FontFile`] is a decoded snapshot of a TrueType/OpenType font: header
//! metadata via `ttf-parser`, plus the engine's own parses of `cmap`,
//! `hmtx`, `kern` and `GSUB` (the raw bytes are retained verbatim for
//! subsetting). The engine traffics in font units throughout; callers
//! convert to points via `units_per_em` and the font size.
//!
//! The [`FontContext`] resolves family/weight/style requests through four
//! stages: explicit bindings, a lazily discovered system catalog, generic
//! family mappings, and finally the 14 built-in PDF base fonts, which need
//! no embedding.

pub mod metrics;
pub mod subset;
pub(crate) mod tables;

pub use metrics::BaseFont;

use crate::error::FolioError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tables::{Cmap, Gsub, GsubLookup};

/// A decoded font ready for measurement, shaping and subsetting.
#[derive(Debug)]
pub struct FontFile {
    data: Vec<u8>,
    pub units_per_em: u16,
    pub ascender: i16,
    pub descender: i16,
    pub cap_height: i16,
    pub x_height: i16,
    pub italic_angle: f32,
    pub weight_class: u16,
    pub bbox: [i16; 4],
    pub num_glyphs: u16,
    cmap: Cmap,
    advances: Vec<u16>,
    lsbs: Vec<i16>,
    kern: Option<HashMap<(u16, u16), i16>>,
    gsub: Option<Gsub>,
}

/// Feature switches for [`FontFile::shape`]. `liga` and `kern` default on.
#[derive(Debug, Clone)]
pub struct Features {
    pub liga: bool,
    pub kern: bool,
    /// Additional GSUB feature tags to enable (e.g. `smcp`).
    pub extra: Vec<[u8; 4]>,
}

impl Default for Features {
    fn default() -> Self {
        Self {
            liga: true,
            kern: true,
            extra: Vec::new(),
        }
    }
}

/// One glyph out of shaping. Advances are font units; `x_advance` already
/// includes the kerning adjustment recorded separately in `kern`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapedGlyph {
    pub glyph_id: u16,
    /// Index of the first character this glyph covers in the input.
    pub cluster: u32,
    pub x_advance: i32,
    pub kern: i16,
}

/// Shaping output: glyphs plus the codepoints the cmap could not map
/// (reported per glyph so the caller can re-shape with a fallback family).
#[derive(Debug, Clone, Default)]
pub struct ShapedRun {
    pub glyphs: Vec<ShapedGlyph>,
    pub missing: Vec<char>,
}

impl FontFile {
    /// Decode a font. Missing or corrupt *required* tables fail the load;
    /// malformed optional tables degrade with a warning.
    pub fn parse(data: Vec<u8>) -> Result<FontFile, FolioError> {
        let face = ttf_parser::Face::parse(&data, 0).map_err(|e| FolioError::FontMalformed {
            reason: format!("unparsable font: {e}"),
        })?;
        let units_per_em = face.units_per_em();
        let ascender = face.ascender();
        let descender = face.descender();
        let cap_height = face.capital_height().unwrap_or(ascender);
        let x_height = face.x_height().unwrap_or((ascender as i32 / 2) as i16);
        let italic_angle = face.italic_angle();
        let weight_class = face.weight().to_number();
        let gb = face.global_bounding_box();
        let num_glyphs = face.number_of_glyphs();

        let required = |tag: &[u8; 4]| -> Result<&[u8], FolioError> {
            tables::find_table(&data, tag).ok_or_else(|| FolioError::FontMalformed {
                reason: format!("missing required table {}", String::from_utf8_lossy(tag)),
            })
        };

        let cmap = Cmap::parse(required(b"cmap")?).map_err(|e| FolioError::FontMalformed {
            reason: format!("cmap: {e}"),
        })?;

        let hhea = required(b"hhea")?;
        let number_of_h_metrics =
            tables::read_u16(hhea, 34).ok_or_else(|| FolioError::FontMalformed {
                reason: "hhea truncated".to_string(),
            })?;
        let (advances, lsbs) = tables::parse_hmtx(required(b"hmtx")?, number_of_h_metrics, num_glyphs)
            .map_err(|e| FolioError::FontMalformed {
                reason: format!("hmtx: {e}"),
            })?;

        // Every mapped glyph must have an advance entry.
        for (cp, gid) in cmap.mappings() {
            if gid >= num_glyphs {
                return Err(FolioError::FontMalformed {
                    reason: format!("cmap maps U+{cp:04X} to glyph {gid} past numGlyphs {num_glyphs}"),
                });
            }
        }

        let kern = match tables::find_table(&data, b"kern") {
            Some(bytes) => match tables::parse_kern(bytes) {
                Ok(pairs) if pairs.is_empty() => None,
                Ok(pairs) => Some(pairs),
                Err(e) => {
                    log::warn!("kern table malformed, kerning disabled: {e}");
                    None
                }
            },
            None => None,
        };

        let gsub = match tables::find_table(&data, b"GSUB") {
            Some(bytes) => match Gsub::parse(bytes) {
                Ok(g) => Some(g),
                Err(e) => {
                    log::warn!("GSUB table malformed, substitutions disabled: {e}");
                    None
                }
            },
            None => None,
        };

        Ok(FontFile {
            data,
            units_per_em,
            ascender,
            descender,
            cap_height,
            x_height,
            italic_angle,
            weight_class,
            bbox: [gb.x_min, gb.y_min, gb.x_max, gb.y_max],
            num_glyphs,
            cmap,
            advances,
            lsbs,
            kern,
            gsub,
        })
    }

    /// The raw font bytes, retained verbatim for subsetting.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn cmap(&self) -> &Cmap {
        &self.cmap
    }

    /// Unicode-to-glyph lookup.
    pub fn glyph_id(&self, code_point: char) -> Option<u16> {
        self.cmap.glyph_id(code_point as u32)
    }

    /// Advance width in font units. Glyphs past the table get the last
    /// advance per the hmtx run-length rule, which `parse_hmtx` expanded.
    pub fn advance(&self, glyph_id: u16) -> i32 {
        self.advances
            .get(glyph_id as usize)
            .copied()
            .unwrap_or(0) as i32
    }

    pub fn left_side_bearing(&self, glyph_id: u16) -> i16 {
        self.lsbs.get(glyph_id as usize).copied().unwrap_or(0)
    }

    /// Kerning adjustment between a glyph pair in font units, zero when the
    /// font has no kern data or the pair is unkerned.
    pub fn kerning(&self, left: u16, right: u16) -> i16 {
        self.kern
            .as_ref()
            .and_then(|pairs| pairs.get(&(left, right)).copied())
            .unwrap_or(0)
    }

    pub fn has_kerning(&self) -> bool {
        self.kern.is_some()
    }

    /// Map and substitute text into positioned glyphs.
    ///
    /// GSUB lookups activated by the enabled features apply in lookup-list
    /// order (ligatures and single substitutions; unsupported lookup types
    /// are skipped). Kerning from the `kern` table lands in each left
    /// glyph's `x_advance`.
    pub fn shape(&self, text: &str, features: &Features) -> ShapedRun {
        let mut run = ShapedRun::default();
        let mut glyphs: Vec<(u16, u32)> = Vec::new();
        for (i, ch) in text.chars().enumerate() {
            match self.glyph_id(ch) {
                Some(gid) => glyphs.push((gid, i as u32)),
                None => {
                    run.missing.push(ch);
                    glyphs.push((0, i as u32));
                }
            }
        }

        if let Some(gsub) = &self.gsub {
            let mut tags: Vec<[u8; 4]> = Vec::new();
            if features.liga {
                tags.push(*b"liga");
                tags.push(*b"ccmp");
            }
            tags.extend(features.extra.iter().copied());
            for index in gsub.active_lookups(&tags) {
                apply_lookup(&gsub.lookups[index as usize], &mut glyphs);
            }
        }

        for i in 0..glyphs.len() {
            let (gid, cluster) = glyphs[i];
            let kern = if features.kern && i + 1 < glyphs.len() {
                self.kerning(gid, glyphs[i + 1].0)
            } else {
                0
            };
            run.glyphs.push(ShapedGlyph {
                glyph_id: gid,
                cluster,
                x_advance: self.advance(gid) + kern as i32,
                kern,
            });
        }
        run
    }
}

fn apply_lookup(lookup: &GsubLookup, glyphs: &mut Vec<(u16, u32)>) {
    match lookup {
        GsubLookup::Single(map) => {
            for (gid, _) in glyphs.iter_mut() {
                if let Some(&sub) = map.get(gid) {
                    *gid = sub;
                }
            }
        }
        GsubLookup::Multiple(map) => {
            let mut out = Vec::with_capacity(glyphs.len());
            for &(gid, cluster) in glyphs.iter() {
                match map.get(&gid) {
                    Some(seq) if !seq.is_empty() => {
                        out.extend(seq.iter().map(|&g| (g, cluster)));
                    }
                    _ => out.push((gid, cluster)),
                }
            }
            *glyphs = out;
        }
        GsubLookup::Alternate(map) => {
            for (gid, _) in glyphs.iter_mut() {
                if let Some(alts) = map.get(gid) {
                    if let Some(&first) = alts.first() {
                        *gid = first;
                    }
                }
            }
        }
        GsubLookup::Ligature(map) => {
            let mut out: Vec<(u16, u32)> = Vec::with_capacity(glyphs.len());
            let mut i = 0;
            while i < glyphs.len() {
                let (gid, cluster) = glyphs[i];
                let mut matched = false;
                if let Some(candidates) = map.get(&gid) {
                    for (rest, lig) in candidates {
                        let end = i + 1 + rest.len();
                        if end <= glyphs.len()
                            && glyphs[i + 1..end].iter().map(|&(g, _)| g).eq(rest.iter().copied())
                        {
                            out.push((*lig, cluster));
                            i = end;
                            matched = true;
                            break;
                        }
                    }
                }
                if !matched {
                    out.push((gid, cluster));
                    i += 1;
                }
            }
            *glyphs = out;
        }
        GsubLookup::Unsupported(_) => {}
    }
}

// ─── Registry & fallback ────────────────────────────────────────

/// Lookup key for a registered font.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct FontKey {
    pub family: String,
    pub weight: u16,
    pub italic: bool,
}

impl FontKey {
    pub fn new(family: &str, weight: u16, italic: bool) -> Self {
        Self {
            family: family.trim().to_ascii_lowercase(),
            weight,
            italic,
        }
    }
}

/// A font resolved for use: either a built-in base font or an embedded
/// [`FontFile`] shared across every run that references it.
#[derive(Debug, Clone)]
pub enum ResolvedFont {
    Base(BaseFont),
    Embedded(Arc<FontFile>),
}

impl ResolvedFont {
    pub fn units_per_em(&self) -> u16 {
        match self {
            ResolvedFont::Base(_) => 1000,
            ResolvedFont::Embedded(f) => f.units_per_em,
        }
    }

    /// Ascent above the baseline in points at the given size.
    pub fn ascent(&self, font_size: f64) -> f64 {
        match self {
            ResolvedFont::Base(b) => b.metrics().ascender as f64 / 1000.0 * font_size,
            ResolvedFont::Embedded(f) => {
                f.ascender as f64 / f.units_per_em as f64 * font_size
            }
        }
    }

    /// Descent below the baseline in points (positive).
    pub fn descent(&self, font_size: f64) -> f64 {
        match self {
            ResolvedFont::Base(b) => -(b.metrics().descender as f64) / 1000.0 * font_size,
            ResolvedFont::Embedded(f) => {
                -(f.descender as f64) / f.units_per_em as f64 * font_size
            }
        }
    }

    /// Advance width of one character in points.
    pub fn char_width(&self, ch: char, font_size: f64) -> f64 {
        match self {
            ResolvedFont::Base(b) => b.metrics().char_width(ch, font_size),
            ResolvedFont::Embedded(f) => {
                let gid = f.glyph_id(ch).unwrap_or(0);
                f.advance(gid) as f64 / f.units_per_em as f64 * font_size
            }
        }
    }

    /// Width of a string in points, without shaping (no ligatures, no
    /// kerning). Good enough for intrinsic-width estimation.
    pub fn measure(&self, text: &str, font_size: f64, letter_spacing: f64) -> f64 {
        text.chars()
            .map(|c| self.char_width(c, font_size) + letter_spacing)
            .sum()
    }
}

/// Directories scanned when system fallback is enabled.
const SYSTEM_FONT_DIRS: &[&str] = &[
    "/usr/share/fonts",
    "/usr/local/share/fonts",
    "/System/Library/Fonts",
    "/Library/Fonts",
    "C:\\Windows\\Fonts",
];

/// Generic family names mapped to commonly-installed concrete families,
/// tried in order before the base-font stage.
const GENERIC_FAMILIES: &[(&str, &[&str])] = &[
    ("sans-serif", &["DejaVu Sans", "Liberation Sans", "Arial", "Helvetica"]),
    ("serif", &["DejaVu Serif", "Liberation Serif", "Times New Roman", "Times"]),
    ("monospace", &["DejaVu Sans Mono", "Liberation Mono", "Courier New", "Courier"]),
];

/// Shared font environment for one layout run.
pub struct FontContext {
    embedded: HashMap<FontKey, Arc<FontFile>>,
    fallback_enabled: bool,
    /// Lazily discovered catalog of system font files, plus fonts loaded
    /// from it. Interior mutability keeps `resolve` shared like the rest of
    /// the layout-facing API.
    catalog: RefCell<Option<HashMap<String, PathBuf>>>,
    system_loaded: RefCell<HashMap<FontKey, Arc<FontFile>>>,
}

impl Default for FontContext {
    fn default() -> Self {
        Self::new()
    }
}

impl FontContext {
    pub fn new() -> Self {
        Self {
            embedded: HashMap::new(),
            fallback_enabled: true,
            catalog: RefCell::new(None),
            system_loaded: RefCell::new(HashMap::new()),
        }
    }

    pub fn set_fallback_enabled(&mut self, enabled: bool) {
        self.fallback_enabled = enabled;
    }

    /// Register an explicit font binding.
    pub fn register(
        &mut self,
        family: &str,
        weight: u16,
        italic: bool,
        data: Vec<u8>,
    ) -> Result<(), FolioError> {
        let font = FontFile::parse(data)?;
        self.embedded
            .insert(FontKey::new(family, weight, italic), Arc::new(font));
        Ok(())
    }

    /// Iterate explicitly registered fonts.
    pub fn embedded_fonts(&self) -> impl Iterator<Item = (&FontKey, &Arc<FontFile>)> {
        self.embedded.iter()
    }

    /// Resolve a family to a usable font through the fallback chain:
    /// explicit bindings, system catalog, generic families, base fonts.
    pub fn resolve(
        &self,
        family: &str,
        weight: u16,
        italic: bool,
    ) -> Result<ResolvedFont, FolioError> {
        for fam in family.split(',') {
            if let Some(found) = self.resolve_single(fam.trim().trim_matches('"'), weight, italic) {
                return Ok(found);
            }
        }
        if self.fallback_enabled {
            log::warn!("no font for family {family:?}; substituting Helvetica");
            let base = BaseFont::from_family("Helvetica", weight, italic).unwrap();
            return Ok(ResolvedFont::Base(base));
        }
        Err(FolioError::FontUnavailable {
            family: family.to_string(),
            weight,
            italic,
        })
    }

    fn resolve_single(&self, family: &str, weight: u16, italic: bool) -> Option<ResolvedFont> {
        // Stage 1: explicit bindings, exact then weight-snapped then nearest.
        if let Some(f) = self.lookup_embedded(family, weight, italic) {
            return Some(ResolvedFont::Embedded(f));
        }

        // Stage 2: system catalog, discovered on first need.
        if self.fallback_enabled {
            if let Some(f) = self.lookup_system(family, weight, italic) {
                return Some(ResolvedFont::Embedded(f));
            }
        }

        // Stage 3: generic family indirection.
        for (generic, candidates) in GENERIC_FAMILIES {
            if family.eq_ignore_ascii_case(generic) {
                for candidate in *candidates {
                    if let Some(found) = self.resolve_single(candidate, weight, italic) {
                        return Some(found);
                    }
                }
            }
        }

        // Stage 4: the 14 base fonts.
        BaseFont::from_family(family, weight, italic).map(ResolvedFont::Base)
    }

    fn lookup_embedded(&self, family: &str, weight: u16, italic: bool) -> Option<Arc<FontFile>> {
        let exact = FontKey::new(family, weight, italic);
        if let Some(f) = self.embedded.get(&exact) {
            return Some(f.clone());
        }
        let snapped = if weight >= 600 { 700 } else { 400 };
        if let Some(f) = self.embedded.get(&FontKey::new(family, snapped, italic)) {
            return Some(f.clone());
        }
        // Nearest weight registered for the family and style.
        let fam = exact.family;
        self.embedded
            .iter()
            .filter(|(k, _)| k.family == fam && k.italic == italic)
            .min_by_key(|(k, _)| (k.weight as i32 - weight as i32).unsigned_abs())
            .map(|(_, f)| f.clone())
    }

    fn lookup_system(&self, family: &str, weight: u16, italic: bool) -> Option<Arc<FontFile>> {
        let key = FontKey::new(family, weight, italic);
        if let Some(f) = self.system_loaded.borrow().get(&key) {
            return Some(f.clone());
        }

        if self.catalog.borrow().is_none() {
            *self.catalog.borrow_mut() = Some(scan_system_fonts());
        }

        let normalized = normalize_family(family);
        let bold = weight >= 600;
        let mut stems = Vec::new();
        match (bold, italic) {
            (true, true) => stems.extend([
                format!("{normalized}bolditalic"),
                format!("{normalized}boldoblique"),
            ]),
            (true, false) => stems.push(format!("{normalized}bold")),
            (false, true) => stems.extend([
                format!("{normalized}italic"),
                format!("{normalized}oblique"),
            ]),
            (false, false) => {}
        }
        stems.push(format!("{normalized}regular"));
        stems.push(normalized);

        let path = {
            let catalog = self.catalog.borrow();
            let catalog = catalog.as_ref().unwrap();
            stems.iter().find_map(|s| catalog.get(s).cloned())?
        };

        let data = std::fs::read(&path).ok()?;
        match FontFile::parse(data) {
            Ok(font) => {
                let font = Arc::new(font);
                self.system_loaded.borrow_mut().insert(key, font.clone());
                Some(font)
            }
            Err(e) => {
                log::warn!("system font {} unusable: {e}", path.display());
                None
            }
        }
    }
}

fn normalize_family(family: &str) -> String {
    family
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Walk the system font directories once, indexing TrueType files by
/// normalized file stem.
fn scan_system_fonts() -> HashMap<String, PathBuf> {
    let mut catalog = HashMap::new();
    for dir in SYSTEM_FONT_DIRS {
        scan_dir(PathBuf::from(dir), &mut catalog, 0);
    }
    if let Some(home) = std::env::var_os("HOME") {
        let mut fonts = PathBuf::from(home);
        fonts.push(".fonts");
        scan_dir(fonts, &mut catalog, 0);
    }
    catalog
}

fn scan_dir(dir: PathBuf, catalog: &mut HashMap<String, PathBuf>, depth: usize) {
    if depth > 4 {
        return;
    }
    let entries = match std::fs::read_dir(&dir) {
        Ok(e) => e,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            scan_dir(path, catalog, depth + 1);
        } else if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("ttf") | Some("otf")
        ) {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                catalog.entry(normalize_family(stem)).or_insert(path);
            }
        }
    }
}
