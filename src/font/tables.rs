//! Raw TrueType/OpenType table parsing.
//!
//! Everything here operates on plain byte slices with checked big-endian
//! readers. Required tables (`head`, `hhea`, `hmtx`, `maxp`, `cmap`) fail
//! the font load on corruption; optional tables (`kern`, `GSUB`) are parsed
//! leniently and a failure degrades the capability instead.
//!
//! Supported subtable formats: cmap 0, 4, 6 and 12; kern format 0; GSUB
//! lookup types 1-4 (5-8 are recognized and skipped).

use std::collections::{BTreeSet, HashMap};

// ─── Checked big-endian readers ─────────────────────────────────

pub(crate) fn read_u8(data: &[u8], pos: usize) -> Option<u8> {
    data.get(pos).copied()
}

pub(crate) fn read_u16(data: &[u8], pos: usize) -> Option<u16> {
    let b = data.get(pos..pos + 2)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

pub(crate) fn read_i16(data: &[u8], pos: usize) -> Option<i16> {
    read_u16(data, pos).map(|v| v as i16)
}

pub(crate) fn read_u32(data: &[u8], pos: usize) -> Option<u32> {
    let b = data.get(pos..pos + 4)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Locate a top-level table by tag in a TrueType file.
pub(crate) fn find_table<'a>(data: &'a [u8], tag: &[u8; 4]) -> Option<&'a [u8]> {
    let num_tables = read_u16(data, 4)? as usize;
    for i in 0..num_tables {
        let entry = 12 + i * 16;
        if data.get(entry..entry + 4)? == tag {
            let offset = read_u32(data, entry + 8)? as usize;
            let length = read_u32(data, entry + 12)? as usize;
            return data.get(offset..offset.checked_add(length)?);
        }
    }
    None
}

pub(crate) fn tag_u32(tag: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*tag)
}

// ─── cmap ───────────────────────────────────────────────────────

/// A parsed Unicode character map.
#[derive(Debug, Clone)]
pub enum Cmap {
    /// Byte encoding table; codes 0..=255 map directly.
    Format0(Vec<u8>),
    /// Segment mapping to delta values (the BMP workhorse).
    Format4 {
        end_codes: Vec<u16>,
        start_codes: Vec<u16>,
        id_deltas: Vec<u16>,
        id_range_offsets: Vec<u16>,
        glyph_array: Vec<u16>,
    },
    /// Trimmed table mapping a contiguous code range.
    Format6 { first_code: u16, glyphs: Vec<u16> },
    /// Segmented coverage with 32-bit codes.
    Format12 { groups: Vec<(u32, u32, u32)> },
}

impl Cmap {
    /// Select and parse the best Unicode subtable.
    ///
    /// Preference order: (3,10) or (0,x) format 12, then (3,1)/(0,x)
    /// format 4, then format 6, then (1,0) format 0.
    pub fn parse(cmap: &[u8]) -> Result<Cmap, String> {
        let num_records = read_u16(cmap, 2).ok_or("cmap header truncated")? as usize;
        let mut best: Option<(u8, usize)> = None;
        for i in 0..num_records {
            let rec = 4 + i * 8;
            let platform = read_u16(cmap, rec).ok_or("cmap record truncated")?;
            let encoding = read_u16(cmap, rec + 2).ok_or("cmap record truncated")?;
            let offset = read_u32(cmap, rec + 4).ok_or("cmap record truncated")? as usize;
            let format = match read_u16(cmap, offset) {
                Some(f) => f,
                None => continue,
            };
            let score = match (platform, encoding, format) {
                (3, 10, 12) | (0, _, 12) => 5,
                (3, 1, 4) | (0, _, 4) => 4,
                (3, 0, 4) => 3,
                (_, _, 6) => 2,
                (1, 0, 0) | (_, _, 0) => 1,
                _ => 0,
            };
            if score > 0 && best.map(|(s, _)| score > s).unwrap_or(true) {
                best = Some((score, offset));
            }
        }
        let (_, offset) = best.ok_or("no supported cmap subtable")?;
        Self::parse_subtable(&cmap[offset..])
    }

    fn parse_subtable(sub: &[u8]) -> Result<Cmap, String> {
        match read_u16(sub, 0).ok_or("cmap subtable truncated")? {
            0 => {
                let glyphs = sub
                    .get(6..6 + 256)
                    .ok_or("cmap format 0 truncated")?
                    .to_vec();
                Ok(Cmap::Format0(glyphs))
            }
            4 => {
                let seg_count_x2 = read_u16(sub, 6).ok_or("cmap format 4 truncated")? as usize;
                let seg_count = seg_count_x2 / 2;
                let mut read_array = |base: usize| -> Result<Vec<u16>, String> {
                    (0..seg_count)
                        .map(|i| read_u16(sub, base + i * 2).ok_or_else(|| "cmap format 4 truncated".to_string()))
                        .collect()
                };
                let end_codes = read_array(14)?;
                let start_codes = read_array(14 + seg_count_x2 + 2)?;
                let id_deltas = read_array(14 + 2 * seg_count_x2 + 2)?;
                let range_base = 14 + 3 * seg_count_x2 + 2;
                let id_range_offsets = read_array(range_base)?;
                // The glyph id array runs from the end of idRangeOffsets to the
                // end of the subtable; range offsets index into it relative to
                // their own position.
                let glyph_array: Vec<u16> = sub
                    .get(range_base + seg_count_x2..)
                    .unwrap_or(&[])
                    .chunks_exact(2)
                    .map(|b| u16::from_be_bytes([b[0], b[1]]))
                    .collect();
                Ok(Cmap::Format4 {
                    end_codes,
                    start_codes,
                    id_deltas,
                    id_range_offsets,
                    glyph_array,
                })
            }
            6 => {
                let first_code = read_u16(sub, 6).ok_or("cmap format 6 truncated")?;
                let count = read_u16(sub, 8).ok_or("cmap format 6 truncated")? as usize;
                let glyphs = (0..count)
                    .map(|i| read_u16(sub, 10 + i * 2).ok_or_else(|| "cmap format 6 truncated".to_string()))
                    .collect::<Result<Vec<u16>, String>>()?;
                Ok(Cmap::Format6 { first_code, glyphs })
            }
            12 => {
                let num_groups = read_u32(sub, 12).ok_or("cmap format 12 truncated")? as usize;
                let mut groups = Vec::with_capacity(num_groups);
                for i in 0..num_groups {
                    let g = 16 + i * 12;
                    groups.push((
                        read_u32(sub, g).ok_or("cmap format 12 truncated")?,
                        read_u32(sub, g + 4).ok_or("cmap format 12 truncated")?,
                        read_u32(sub, g + 8).ok_or("cmap format 12 truncated")?,
                    ));
                }
                Ok(Cmap::Format12 { groups })
            }
            f => Err(format!("unsupported cmap format {f}")),
        }
    }

    /// Look up the glyph id for a Unicode codepoint. `None` when unmapped
    /// (glyph 0 is reported as unmapped).
    pub fn glyph_id(&self, code_point: u32) -> Option<u16> {
        let gid = match self {
            Cmap::Format0(glyphs) => {
                if code_point > 0xFF {
                    return None;
                }
                glyphs[code_point as usize] as u16
            }
            Cmap::Format4 {
                end_codes,
                start_codes,
                id_deltas,
                id_range_offsets,
                glyph_array,
            } => {
                if code_point > 0xFFFF {
                    return None;
                }
                let cp = code_point as u16;
                let seg = end_codes.partition_point(|&end| end < cp);
                if seg >= end_codes.len() || start_codes[seg] > cp {
                    return None;
                }
                if id_range_offsets[seg] == 0 {
                    cp.wrapping_add(id_deltas[seg])
                } else {
                    // idRangeOffset is in bytes from its own location in the
                    // file; translate to an index into the glyph array.
                    let words_past_end = (id_range_offsets[seg] / 2) as usize;
                    let remaining_segs = end_codes.len() - seg;
                    let idx = words_past_end + (cp - start_codes[seg]) as usize;
                    let idx = idx.checked_sub(remaining_segs)?;
                    let raw = *glyph_array.get(idx)?;
                    if raw == 0 {
                        0
                    } else {
                        raw.wrapping_add(id_deltas[seg])
                    }
                }
            }
            Cmap::Format6 { first_code, glyphs } => {
                let idx = code_point.checked_sub(*first_code as u32)? as usize;
                *glyphs.get(idx)?
            }
            Cmap::Format12 { groups } => {
                let idx = groups.partition_point(|&(_, end, _)| end < code_point);
                let &(start, end, start_gid) = groups.get(idx)?;
                if code_point < start || code_point > end {
                    return None;
                }
                let gid32 = start_gid + (code_point - start);
                if gid32 > 0xFFFF {
                    return None;
                }
                gid32 as u16
            }
        };
        if gid == 0 {
            None
        } else {
            Some(gid)
        }
    }

    /// Every (codepoint, glyph id) mapping, in ascending codepoint order.
    /// Drives subsetting and ToUnicode synthesis.
    pub fn mappings(&self) -> Vec<(u32, u16)> {
        let mut out = Vec::new();
        match self {
            Cmap::Format0(glyphs) => {
                for (cp, &gid) in glyphs.iter().enumerate() {
                    if gid != 0 {
                        out.push((cp as u32, gid as u16));
                    }
                }
            }
            Cmap::Format4 {
                end_codes,
                start_codes,
                ..
            } => {
                for seg in 0..end_codes.len() {
                    let (start, end) = (start_codes[seg], end_codes[seg]);
                    if start == 0xFFFF {
                        continue;
                    }
                    for cp in start..=end.min(0xFFFE) {
                        if let Some(gid) = self.glyph_id(cp as u32) {
                            out.push((cp as u32, gid));
                        }
                    }
                }
            }
            Cmap::Format6 { first_code, glyphs } => {
                for (i, &gid) in glyphs.iter().enumerate() {
                    if gid != 0 {
                        out.push((*first_code as u32 + i as u32, gid));
                    }
                }
            }
            Cmap::Format12 { groups } => {
                for &(start, end, start_gid) in groups {
                    for cp in start..=end {
                        let gid32 = start_gid + (cp - start);
                        if gid32 != 0 && gid32 <= 0xFFFF {
                            out.push((cp, gid32 as u16));
                        }
                    }
                }
            }
        }
        out
    }
}

// ─── hmtx ───────────────────────────────────────────────────────

/// Parse horizontal metrics. The advance of the last longHorMetric record
/// repeats for all remaining glyphs, so the returned vectors always have
/// one entry per glyph.
pub fn parse_hmtx(
    hmtx: &[u8],
    number_of_h_metrics: u16,
    num_glyphs: u16,
) -> Result<(Vec<u16>, Vec<i16>), String> {
    let n = number_of_h_metrics as usize;
    let total = num_glyphs as usize;
    if n == 0 || n > total {
        return Err(format!(
            "hmtx: numberOfHMetrics {n} out of range for {total} glyphs"
        ));
    }
    let mut advances = Vec::with_capacity(total);
    let mut lsbs = Vec::with_capacity(total);
    for i in 0..n {
        let advance = read_u16(hmtx, i * 4).ok_or("hmtx truncated")?;
        let lsb = read_i16(hmtx, i * 4 + 2).ok_or("hmtx truncated")?;
        advances.push(advance);
        lsbs.push(lsb);
    }
    let last_advance = advances[n - 1];
    for i in n..total {
        let lsb = read_i16(hmtx, n * 4 + (i - n) * 2).unwrap_or(0);
        advances.push(last_advance);
        lsbs.push(lsb);
    }
    Ok((advances, lsbs))
}

// ─── kern ───────────────────────────────────────────────────────

/// Coverage bits of a kern subtable header.
const KERN_HORIZONTAL: u16 = 0x0001;
const KERN_CROSS_STREAM: u16 = 0x0004;
const KERN_OVERRIDE: u16 = 0x0008;

/// Parse the `kern` table, merging all format-0 horizontal subtables.
/// With the override flag set a later subtable replaces earlier pairs;
/// otherwise values sum.
pub fn parse_kern(kern: &[u8]) -> Result<HashMap<(u16, u16), i16>, String> {
    let n_tables = read_u16(kern, 2).ok_or("kern header truncated")? as usize;
    let mut pairs: HashMap<(u16, u16), i16> = HashMap::new();
    let mut pos = 4;
    for _ in 0..n_tables {
        let length = read_u16(kern, pos + 2).ok_or("kern subtable truncated")? as usize;
        let coverage = read_u16(kern, pos + 4).ok_or("kern subtable truncated")?;
        let format = (coverage >> 8) as u8;
        let horizontal = coverage & KERN_HORIZONTAL != 0;
        let cross_stream = coverage & KERN_CROSS_STREAM != 0;
        let override_ = coverage & KERN_OVERRIDE != 0;
        if format == 0 && horizontal && !cross_stream {
            let n_pairs = read_u16(kern, pos + 6).ok_or("kern subtable truncated")? as usize;
            let base = pos + 14;
            for i in 0..n_pairs {
                let p = base + i * 6;
                let left = read_u16(kern, p).ok_or("kern pairs truncated")?;
                let right = read_u16(kern, p + 2).ok_or("kern pairs truncated")?;
                let value = read_i16(kern, p + 4).ok_or("kern pairs truncated")?;
                if override_ {
                    pairs.insert((left, right), value);
                } else {
                    *pairs.entry((left, right)).or_insert(0) += value;
                }
            }
        }
        if length == 0 {
            break;
        }
        pos += length;
    }
    Ok(pairs)
}

// ─── GSUB ───────────────────────────────────────────────────────

/// A parsed GSUB lookup. Only substitution types the engine applies are
/// materialized; everything else is carried as `Unsupported` so shaping can
/// skip it knowingly.
#[derive(Debug, Clone)]
pub enum GsubLookup {
    /// Type 1: one glyph to one glyph.
    Single(HashMap<u16, u16>),
    /// Type 2: one glyph to a sequence.
    Multiple(HashMap<u16, Vec<u16>>),
    /// Type 3: one glyph to a set of alternates (the first is used).
    Alternate(HashMap<u16, Vec<u16>>),
    /// Type 4: component sequence to a ligature glyph. Keyed by first
    /// glyph; candidates sorted longest-first for greedy matching.
    Ligature(HashMap<u16, Vec<(Vec<u16>, u16)>>),
    /// Types 5-8 (contextual, chaining, extension, reverse chaining).
    Unsupported(u16),
}

/// One feature record: tag plus the lookups it activates, in lookup-list
/// order.
#[derive(Debug, Clone)]
pub struct GsubFeature {
    pub tag: [u8; 4],
    pub lookup_indices: Vec<u16>,
}

#[derive(Debug, Clone, Default)]
pub struct Gsub {
    pub features: Vec<GsubFeature>,
    pub lookups: Vec<GsubLookup>,
}

impl Gsub {
    pub fn parse(gsub: &[u8]) -> Result<Gsub, String> {
        let feature_list = read_u16(gsub, 6).ok_or("GSUB header truncated")? as usize;
        let lookup_list = read_u16(gsub, 8).ok_or("GSUB header truncated")? as usize;

        let mut features = Vec::new();
        let feature_count = read_u16(gsub, feature_list).ok_or("GSUB feature list truncated")? as usize;
        for i in 0..feature_count {
            let rec = feature_list + 2 + i * 6;
            let tag: [u8; 4] = gsub
                .get(rec..rec + 4)
                .ok_or("GSUB feature record truncated")?
                .try_into()
                .unwrap();
            let offset = read_u16(gsub, rec + 4).ok_or("GSUB feature record truncated")? as usize;
            let table = feature_list + offset;
            let lookup_count = read_u16(gsub, table + 2).ok_or("GSUB feature table truncated")? as usize;
            let mut lookup_indices = Vec::with_capacity(lookup_count);
            for j in 0..lookup_count {
                lookup_indices
                    .push(read_u16(gsub, table + 4 + j * 2).ok_or("GSUB feature table truncated")?);
            }
            features.push(GsubFeature {
                tag,
                lookup_indices,
            });
        }

        let mut lookups = Vec::new();
        let lookup_count = read_u16(gsub, lookup_list).ok_or("GSUB lookup list truncated")? as usize;
        for i in 0..lookup_count {
            let offset =
                read_u16(gsub, lookup_list + 2 + i * 2).ok_or("GSUB lookup list truncated")? as usize;
            lookups.push(parse_lookup(gsub, lookup_list + offset)?);
        }

        Ok(Gsub { features, lookups })
    }

    /// Lookup indices activated by the given enabled feature tags, deduped,
    /// in lookup-list order (the order OpenType mandates for application).
    pub fn active_lookups(&self, enabled: &[[u8; 4]]) -> Vec<u16> {
        let mut indices = BTreeSet::new();
        for feature in &self.features {
            if enabled.contains(&feature.tag) {
                indices.extend(feature.lookup_indices.iter().copied());
            }
        }
        indices.into_iter().collect()
    }
}

fn parse_lookup(gsub: &[u8], table: usize) -> Result<GsubLookup, String> {
    let lookup_type = read_u16(gsub, table).ok_or("GSUB lookup truncated")?;
    let subtable_count = read_u16(gsub, table + 4).ok_or("GSUB lookup truncated")? as usize;
    let mut subtable_offsets = Vec::with_capacity(subtable_count);
    for i in 0..subtable_count {
        subtable_offsets
            .push(read_u16(gsub, table + 6 + i * 2).ok_or("GSUB lookup truncated")? as usize);
    }

    match lookup_type {
        1 => {
            let mut map = HashMap::new();
            for off in subtable_offsets {
                parse_single_subst(gsub, table + off, &mut map)?;
            }
            Ok(GsubLookup::Single(map))
        }
        2 => {
            let mut map = HashMap::new();
            for off in subtable_offsets {
                parse_sequence_subst(gsub, table + off, &mut map)?;
            }
            Ok(GsubLookup::Multiple(map))
        }
        3 => {
            let mut map = HashMap::new();
            for off in subtable_offsets {
                parse_sequence_subst(gsub, table + off, &mut map)?;
            }
            Ok(GsubLookup::Alternate(map))
        }
        4 => {
            let mut map: HashMap<u16, Vec<(Vec<u16>, u16)>> = HashMap::new();
            for off in subtable_offsets {
                parse_ligature_subst(gsub, table + off, &mut map)?;
            }
            for candidates in map.values_mut() {
                // Longest components first; ties by ligature glyph for
                // deterministic application.
                candidates.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.1.cmp(&b.1)));
            }
            Ok(GsubLookup::Ligature(map))
        }
        t @ 5..=8 => {
            log::debug!("GSUB lookup type {t} not applied (recognized, skipped)");
            Ok(GsubLookup::Unsupported(t))
        }
        t => Err(format!("GSUB lookup type {t} out of range")),
    }
}

/// Read a coverage table into the glyph list it covers, in coverage order.
fn parse_coverage(gsub: &[u8], table: usize) -> Result<Vec<u16>, String> {
    match read_u16(gsub, table).ok_or("coverage truncated")? {
        1 => {
            let count = read_u16(gsub, table + 2).ok_or("coverage truncated")? as usize;
            (0..count)
                .map(|i| read_u16(gsub, table + 4 + i * 2).ok_or_else(|| "coverage truncated".to_string()))
                .collect()
        }
        2 => {
            let count = read_u16(gsub, table + 2).ok_or("coverage truncated")? as usize;
            let mut glyphs = Vec::new();
            for i in 0..count {
                let rec = table + 4 + i * 6;
                let start = read_u16(gsub, rec).ok_or("coverage truncated")?;
                let end = read_u16(gsub, rec + 2).ok_or("coverage truncated")?;
                for g in start..=end {
                    glyphs.push(g);
                }
            }
            Ok(glyphs)
        }
        f => Err(format!("coverage format {f} unsupported")),
    }
}

fn parse_single_subst(
    gsub: &[u8],
    table: usize,
    map: &mut HashMap<u16, u16>,
) -> Result<(), String> {
    let format = read_u16(gsub, table).ok_or("single subst truncated")?;
    let coverage_off = read_u16(gsub, table + 2).ok_or("single subst truncated")? as usize;
    let coverage = parse_coverage(gsub, table + coverage_off)?;
    match format {
        1 => {
            let delta = read_i16(gsub, table + 4).ok_or("single subst truncated")?;
            for g in coverage {
                map.entry(g)
                    .or_insert((g as i32 + delta as i32) as u16);
            }
        }
        2 => {
            let count = read_u16(gsub, table + 4).ok_or("single subst truncated")? as usize;
            for (i, g) in coverage.into_iter().enumerate().take(count) {
                let sub = read_u16(gsub, table + 6 + i * 2).ok_or("single subst truncated")?;
                map.entry(g).or_insert(sub);
            }
        }
        f => return Err(format!("single subst format {f} unsupported")),
    }
    Ok(())
}

/// Shared shape of Multiple (sequence) and Alternate (alternate set)
/// subtables: coverage plus per-glyph u16 arrays behind offsets.
fn parse_sequence_subst(
    gsub: &[u8],
    table: usize,
    map: &mut HashMap<u16, Vec<u16>>,
) -> Result<(), String> {
    let coverage_off = read_u16(gsub, table + 2).ok_or("sequence subst truncated")? as usize;
    let coverage = parse_coverage(gsub, table + coverage_off)?;
    let count = read_u16(gsub, table + 4).ok_or("sequence subst truncated")? as usize;
    for (i, g) in coverage.into_iter().enumerate().take(count) {
        let seq_off = read_u16(gsub, table + 6 + i * 2).ok_or("sequence subst truncated")? as usize;
        let seq = table + seq_off;
        let glyph_count = read_u16(gsub, seq).ok_or("sequence subst truncated")? as usize;
        let glyphs = (0..glyph_count)
            .map(|j| read_u16(gsub, seq + 2 + j * 2).ok_or_else(|| "sequence subst truncated".to_string()))
            .collect::<Result<Vec<u16>, String>>()?;
        map.entry(g).or_insert(glyphs);
    }
    Ok(())
}

fn parse_ligature_subst(
    gsub: &[u8],
    table: usize,
    map: &mut HashMap<u16, Vec<(Vec<u16>, u16)>>,
) -> Result<(), String> {
    let coverage_off = read_u16(gsub, table + 2).ok_or("ligature subst truncated")? as usize;
    let coverage = parse_coverage(gsub, table + coverage_off)?;
    let set_count = read_u16(gsub, table + 4).ok_or("ligature subst truncated")? as usize;
    for (i, first) in coverage.into_iter().enumerate().take(set_count) {
        let set_off = read_u16(gsub, table + 6 + i * 2).ok_or("ligature subst truncated")? as usize;
        let set = table + set_off;
        let lig_count = read_u16(gsub, set).ok_or("ligature set truncated")? as usize;
        for j in 0..lig_count {
            let lig_off = read_u16(gsub, set + 2 + j * 2).ok_or("ligature set truncated")? as usize;
            let lig = set + lig_off;
            let lig_glyph = read_u16(gsub, lig).ok_or("ligature truncated")?;
            let comp_count = read_u16(gsub, lig + 2).ok_or("ligature truncated")? as usize;
            if comp_count == 0 {
                continue;
            }
            let rest = (0..comp_count - 1)
                .map(|k| read_u16(gsub, lig + 4 + k * 2).ok_or_else(|| "ligature truncated".to_string()))
                .collect::<Result<Vec<u16>, String>>()?;
            map.entry(first).or_default().push((rest, lig_glyph));
        }
    }
    Ok(())
}

// ─── loca / glyf ────────────────────────────────────────────────

/// Parse the `loca` table into per-glyph byte offsets (numGlyphs + 1
/// entries).
pub fn parse_loca(loca: &[u8], long_format: bool, num_glyphs: u16) -> Result<Vec<u32>, String> {
    let count = num_glyphs as usize + 1;
    let mut offsets = Vec::with_capacity(count);
    for i in 0..count {
        let off = if long_format {
            read_u32(loca, i * 4).ok_or("loca truncated")?
        } else {
            read_u16(loca, i * 2).ok_or("loca truncated")? as u32 * 2
        };
        offsets.push(off);
    }
    Ok(offsets)
}

/// Recursively collect the component glyphs a composite glyph depends on.
pub fn collect_composite_deps(
    glyf: &[u8],
    loca_offsets: &[u32],
    gid: u16,
    needed: &mut BTreeSet<u16>,
) {
    let idx = gid as usize;
    if idx + 1 >= loca_offsets.len() {
        return;
    }
    let start = loca_offsets[idx] as usize;
    let end = loca_offsets[idx + 1] as usize;
    if start >= end || start + 10 > glyf.len() {
        return;
    }
    let num_contours = match read_i16(glyf, start) {
        Some(n) => n,
        None => return,
    };
    if num_contours >= 0 {
        return; // simple glyph
    }

    const ARG_1_AND_2_ARE_WORDS: u16 = 0x0001;
    const WE_HAVE_A_SCALE: u16 = 0x0008;
    const MORE_COMPONENTS: u16 = 0x0020;
    const WE_HAVE_AN_X_AND_Y_SCALE: u16 = 0x0040;
    const WE_HAVE_A_TWO_BY_TWO: u16 = 0x0080;

    let mut pos = start + 10;
    loop {
        let flags = match read_u16(glyf, pos) {
            Some(f) => f,
            None => return,
        };
        let component = match read_u16(glyf, pos + 2) {
            Some(c) => c,
            None => return,
        };
        pos += 4;

        if needed.insert(component) {
            collect_composite_deps(glyf, loca_offsets, component, needed);
        }

        pos += if flags & ARG_1_AND_2_ARE_WORDS != 0 { 4 } else { 2 };
        if flags & WE_HAVE_A_SCALE != 0 {
            pos += 2;
        } else if flags & WE_HAVE_AN_X_AND_Y_SCALE != 0 {
            pos += 4;
        } else if flags & WE_HAVE_A_TWO_BY_TWO != 0 {
            pos += 8;
        }

        if flags & MORE_COMPONENTS == 0 {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_u16(v: &mut Vec<u8>, n: u16) {
        v.extend_from_slice(&n.to_be_bytes());
    }

    fn push_u32(v: &mut Vec<u8>, n: u32) {
        v.extend_from_slice(&n.to_be_bytes());
    }

    /// Build a format-4 subtable mapping 'A'..='Z' to gid 1..=26 using a
    /// delta segment, wrapped in a one-record cmap table.
    fn sample_cmap_format4() -> Vec<u8> {
        let mut sub = Vec::new();
        push_u16(&mut sub, 4); // format
        push_u16(&mut sub, 0); // length (unchecked)
        push_u16(&mut sub, 0); // language
        push_u16(&mut sub, 4); // segCountX2 (2 segments)
        push_u16(&mut sub, 4); // searchRange
        push_u16(&mut sub, 1); // entrySelector
        push_u16(&mut sub, 0); // rangeShift
        push_u16(&mut sub, 0x5A); // endCode[0] = 'Z'
        push_u16(&mut sub, 0xFFFF); // endCode[1]
        push_u16(&mut sub, 0); // reservedPad
        push_u16(&mut sub, 0x41); // startCode[0] = 'A'
        push_u16(&mut sub, 0xFFFF); // startCode[1]
        push_u16(&mut sub, (1u32.wrapping_sub(0x41) & 0xFFFF) as u16); // idDelta[0]
        push_u16(&mut sub, 1); // idDelta[1]
        push_u16(&mut sub, 0); // idRangeOffset[0]
        push_u16(&mut sub, 0); // idRangeOffset[1]

        let mut cmap = Vec::new();
        push_u16(&mut cmap, 0); // version
        push_u16(&mut cmap, 1); // numTables
        push_u16(&mut cmap, 3); // platform
        push_u16(&mut cmap, 1); // encoding
        push_u32(&mut cmap, 12); // offset
        cmap.extend_from_slice(&sub);
        cmap
    }

    #[test]
    fn test_cmap_format4_delta_segment() {
        let cmap = Cmap::parse(&sample_cmap_format4()).unwrap();
        assert_eq!(cmap.glyph_id('A' as u32), Some(1));
        assert_eq!(cmap.glyph_id('Z' as u32), Some(26));
        assert_eq!(cmap.glyph_id('a' as u32), None);
    }

    #[test]
    fn test_cmap_format4_mappings_enumeration() {
        let cmap = Cmap::parse(&sample_cmap_format4()).unwrap();
        let mappings = cmap.mappings();
        assert_eq!(mappings.len(), 26);
        assert_eq!(mappings[0], ('A' as u32, 1));
        assert_eq!(mappings[25], ('Z' as u32, 26));
    }

    #[test]
    fn test_cmap_format12() {
        let mut sub = Vec::new();
        push_u16(&mut sub, 12);
        push_u16(&mut sub, 0);
        push_u32(&mut sub, 0); // length
        push_u32(&mut sub, 0); // language
        push_u32(&mut sub, 1); // numGroups
        push_u32(&mut sub, 0x1F600); // start
        push_u32(&mut sub, 0x1F602); // end
        push_u32(&mut sub, 100); // startGlyphId

        let mut cmap = Vec::new();
        push_u16(&mut cmap, 0);
        push_u16(&mut cmap, 1);
        push_u16(&mut cmap, 3);
        push_u16(&mut cmap, 10);
        push_u32(&mut cmap, 12);
        cmap.extend_from_slice(&sub);

        let cmap = Cmap::parse(&cmap).unwrap();
        assert_eq!(cmap.glyph_id(0x1F601), Some(101));
        assert_eq!(cmap.glyph_id(0x1F603), None);
    }

    #[test]
    fn test_cmap_format6() {
        let mut sub = Vec::new();
        push_u16(&mut sub, 6);
        push_u16(&mut sub, 0);
        push_u16(&mut sub, 0);
        push_u16(&mut sub, 0x30); // firstCode = '0'
        push_u16(&mut sub, 3); // entryCount
        push_u16(&mut sub, 7);
        push_u16(&mut sub, 8);
        push_u16(&mut sub, 9);

        let mut cmap = Vec::new();
        push_u16(&mut cmap, 0);
        push_u16(&mut cmap, 1);
        push_u16(&mut cmap, 1);
        push_u16(&mut cmap, 0);
        push_u32(&mut cmap, 12);
        cmap.extend_from_slice(&sub);

        let cmap = Cmap::parse(&cmap).unwrap();
        assert_eq!(cmap.glyph_id('1' as u32), Some(8));
        assert_eq!(cmap.glyph_id('4' as u32), None);
    }

    #[test]
    fn test_hmtx_trailing_run() {
        let mut hmtx = Vec::new();
        // 2 longHorMetric records, 4 glyphs
        push_u16(&mut hmtx, 500);
        push_u16(&mut hmtx, 10);
        push_u16(&mut hmtx, 600);
        push_u16(&mut hmtx, 20);
        // trailing lsb-only entries
        push_u16(&mut hmtx, 30);
        push_u16(&mut hmtx, 40);
        let (advances, lsbs) = parse_hmtx(&hmtx, 2, 4).unwrap();
        assert_eq!(advances, vec![500, 600, 600, 600]);
        assert_eq!(lsbs[0], 10);
        assert_eq!(lsbs[2], 30);
    }

    #[test]
    fn test_hmtx_rejects_bad_counts() {
        assert!(parse_hmtx(&[], 0, 4).is_err());
        assert!(parse_hmtx(&[0, 0], 5, 4).is_err());
    }

    fn kern_subtable(pairs: &[(u16, u16, i16)], coverage: u16) -> Vec<u8> {
        let mut sub = Vec::new();
        push_u16(&mut sub, 0); // version
        push_u16(&mut sub, (14 + pairs.len() * 6) as u16); // length
        push_u16(&mut sub, coverage);
        push_u16(&mut sub, pairs.len() as u16);
        push_u16(&mut sub, 0); // searchRange
        push_u16(&mut sub, 0); // entrySelector
        push_u16(&mut sub, 0); // rangeShift
        for &(l, r, v) in pairs {
            push_u16(&mut sub, l);
            push_u16(&mut sub, r);
            push_u16(&mut sub, v as u16);
        }
        sub
    }

    #[test]
    fn test_kern_sum_merge() {
        let mut kern = Vec::new();
        push_u16(&mut kern, 0);
        push_u16(&mut kern, 2);
        kern.extend(kern_subtable(&[(1, 2, -50)], KERN_HORIZONTAL));
        kern.extend(kern_subtable(&[(1, 2, -10), (3, 4, 5)], KERN_HORIZONTAL));
        let pairs = parse_kern(&kern).unwrap();
        assert_eq!(pairs.get(&(1, 2)), Some(&-60));
        assert_eq!(pairs.get(&(3, 4)), Some(&5));
    }

    #[test]
    fn test_kern_override_merge() {
        let mut kern = Vec::new();
        push_u16(&mut kern, 0);
        push_u16(&mut kern, 2);
        kern.extend(kern_subtable(&[(1, 2, -50)], KERN_HORIZONTAL));
        kern.extend(kern_subtable(&[(1, 2, -10)], KERN_HORIZONTAL | KERN_OVERRIDE));
        let pairs = parse_kern(&kern).unwrap();
        assert_eq!(pairs.get(&(1, 2)), Some(&-10));
    }

    /// A minimal GSUB with one `liga` feature pointing at one type-4 lookup
    /// substituting (1, 2) -> 100.
    fn sample_gsub() -> Vec<u8> {
        let mut g = Vec::new();
        push_u32(&mut g, 0x00010000); // version
        push_u16(&mut g, 10); // scriptList (empty stub below)
        push_u16(&mut g, 12); // featureList
        push_u16(&mut g, 26); // lookupList
        push_u16(&mut g, 0); // script list: count 0

        // feature list @12: one feature "liga" -> offset 8 within list
        push_u16(&mut g, 1);
        g.extend_from_slice(b"liga");
        push_u16(&mut g, 8);
        // feature table @20: params 0, count 1, index 0
        push_u16(&mut g, 0);
        push_u16(&mut g, 1);
        push_u16(&mut g, 0);

        // lookup list @26: count 1, offset 4
        push_u16(&mut g, 1);
        push_u16(&mut g, 4);
        // lookup table @30: type 4, flag 0, subtableCount 1, offset 8
        push_u16(&mut g, 4);
        push_u16(&mut g, 0);
        push_u16(&mut g, 1);
        push_u16(&mut g, 8);
        // ligature subst subtable @38: fmt 1, coverage off 8, setCount 1, set off 14
        push_u16(&mut g, 1);
        push_u16(&mut g, 8);
        push_u16(&mut g, 1);
        push_u16(&mut g, 14);
        // coverage @46: fmt 1, count 1, glyph 1
        push_u16(&mut g, 1);
        push_u16(&mut g, 1);
        push_u16(&mut g, 1);
        // ligature set @52: count 1, lig offset 4
        push_u16(&mut g, 1);
        push_u16(&mut g, 4);
        // ligature @56: ligGlyph 100, compCount 2, component[1] = 2
        push_u16(&mut g, 100);
        push_u16(&mut g, 2);
        push_u16(&mut g, 2);
        g
    }

    #[test]
    fn test_gsub_ligature_parse() {
        let gsub = Gsub::parse(&sample_gsub()).unwrap();
        assert_eq!(gsub.features.len(), 1);
        assert_eq!(&gsub.features[0].tag, b"liga");
        let active = gsub.active_lookups(&[*b"liga"]);
        assert_eq!(active, vec![0]);
        match &gsub.lookups[0] {
            GsubLookup::Ligature(map) => {
                let candidates = map.get(&1).unwrap();
                assert_eq!(candidates[0], (vec![2], 100));
            }
            other => panic!("expected ligature lookup, got {other:?}"),
        }
    }

    #[test]
    fn test_gsub_inactive_feature_selects_nothing() {
        let gsub = Gsub::parse(&sample_gsub()).unwrap();
        assert!(gsub.active_lookups(&[*b"smcp"]).is_empty());
    }

    #[test]
    fn test_loca_short_format() {
        let mut loca = Vec::new();
        for off in [0u16, 10, 10, 25] {
            push_u16(&mut loca, off);
        }
        let offsets = parse_loca(&loca, false, 3).unwrap();
        assert_eq!(offsets, vec![0, 20, 20, 50]);
    }

    #[test]
    fn test_composite_deps() {
        // glyf with glyph 0 simple (empty), glyph 1 composite referencing 2
        let mut glyf = vec![0u8; 0];
        // glyph 1 at offset 0: numContours = -1, bbox, one component (gid 2)
        push_u16(&mut glyf, 0xFFFF); // -1
        for _ in 0..4 {
            push_u16(&mut glyf, 0);
        }
        push_u16(&mut glyf, 0); // flags: no more components, byte args
        push_u16(&mut glyf, 2); // component gid
        push_u16(&mut glyf, 0); // args (2 bytes... padded as u16)

        let loca = vec![0u32, 0, glyf.len() as u32, glyf.len() as u32];
        // gid 1 spans [0, len)
        let loca = {
            let mut l = loca;
            l[1] = 0;
            l
        };
        let mut needed = BTreeSet::new();
        needed.insert(1u16);
        collect_composite_deps(&glyf, &loca, 1, &mut needed);
        assert!(needed.contains(&2));
    }
}
