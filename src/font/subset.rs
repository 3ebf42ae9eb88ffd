//! # TrueType Subsetter
//!
//! Strips a font to the glyphs a document actually uses and rebuilds a
//! valid TrueType file around them. Glyph ids are remapped to a contiguous
//! range starting at 0, so PDF width arrays and content-stream glyph
//! references must go through [`SubsetFont::gid_remap`].
//!
//! Along with the font program the subsetter synthesizes a `ToUnicode`
//! CMap stream mapping the new glyph ids back to their source codepoints,
//! which is what makes text extraction round-trip.
//!
//! Approach:
//! 1. Close the used-glyph set over composite glyph components
//! 2. Remap old gids to new contiguous gids
//! 3. Rebuild `glyf`/`loca`/`hmtx`/`cmap`, patch `head`/`hhea`/`maxp`
//! 4. Write the file with correct checksums and alignment

use crate::error::FolioError;
use crate::font::tables::{
    self, collect_composite_deps, find_table, parse_loca, read_i16, read_u16, tag_u32,
};
use crate::font::FontFile;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Result of subsetting a font.
pub struct SubsetFont {
    /// The subset TrueType file.
    pub data: Vec<u8>,
    /// Maps original glyph ids to new contiguous glyph ids.
    pub gid_remap: HashMap<u16, u16>,
    /// A `ToUnicode` CMap stream for the PDF serializer.
    pub to_unicode: Vec<u8>,
}

/// Subset `font` to the given glyph ids (glyph 0 is always included).
pub fn subset(font: &FontFile, used_gids: &BTreeSet<u16>) -> Result<SubsetFont, FolioError> {
    let data = font.data();
    let malformed = |reason: &str| FolioError::FontMalformed {
        reason: reason.to_string(),
    };

    let raw_glyf = find_table(data, b"glyf").ok_or_else(|| malformed("no glyf table to subset"))?;
    let raw_loca = find_table(data, b"loca").ok_or_else(|| malformed("no loca table to subset"))?;
    let head = find_table(data, b"head").ok_or_else(|| malformed("missing head table"))?;
    let raw_hhea = find_table(data, b"hhea").ok_or_else(|| malformed("missing hhea table"))?;
    let raw_hmtx = find_table(data, b"hmtx").ok_or_else(|| malformed("missing hmtx table"))?;
    let raw_maxp = find_table(data, b"maxp").ok_or_else(|| malformed("missing maxp table"))?;

    let long_loca = read_i16(head, 50).ok_or_else(|| malformed("head truncated"))? != 0;
    let loca_offsets = parse_loca(raw_loca, long_loca, font.num_glyphs)
        .map_err(|e| malformed(&format!("loca: {e}")))?;

    // Closure over composite components, glyph 0 always present.
    let mut needed: BTreeSet<u16> = BTreeSet::new();
    needed.insert(0);
    needed.extend(used_gids.iter().copied().filter(|&g| g < font.num_glyphs));
    for gid in needed.clone() {
        collect_composite_deps(raw_glyf, &loca_offsets, gid, &mut needed);
    }

    let mut gid_remap: HashMap<u16, u16> = HashMap::new();
    for (new_gid, &old_gid) in needed.iter().enumerate() {
        gid_remap.insert(old_gid, new_gid as u16);
    }
    let new_num_glyphs = needed.len() as u16;

    let (new_glyf, new_loca_offsets) = rebuild_glyf(raw_glyf, &loca_offsets, &needed, &gid_remap);
    let new_long_loca = *new_loca_offsets.last().unwrap_or(&0) > 0x1FFFE;
    let new_loca = build_loca(&new_loca_offsets, new_long_loca);

    let number_of_h_metrics =
        read_u16(raw_hhea, 34).ok_or_else(|| malformed("hhea truncated"))? as usize;
    let new_hmtx = rebuild_hmtx(raw_hmtx, &needed, number_of_h_metrics);

    // Invert the cmap for the glyphs we keep: smallest codepoint wins so
    // the mapping is deterministic.
    let mut old_gid_to_char: BTreeMap<u16, u32> = BTreeMap::new();
    for (cp, gid) in font.cmap().mappings() {
        if needed.contains(&gid) {
            old_gid_to_char.entry(gid).or_insert(cp);
        }
    }
    let mut char_to_new_gid: Vec<(u16, u16)> = old_gid_to_char
        .iter()
        .filter(|(_, &cp)| cp <= 0xFFFF)
        .map(|(&old, &cp)| (cp as u16, gid_remap[&old]))
        .collect();
    char_to_new_gid.sort_unstable();
    let new_cmap = build_cmap_format4(&char_to_new_gid);

    let new_head = rebuild_head(head, new_long_loca);
    let new_hhea = rebuild_hhea(raw_hhea, new_num_glyphs);
    let new_maxp = rebuild_maxp(raw_maxp, new_num_glyphs);
    let new_post = build_post_format3();

    let mut out_tables: Vec<(u32, Vec<u8>)> = vec![
        (tag_u32(b"cmap"), new_cmap),
        (tag_u32(b"glyf"), new_glyf),
        (tag_u32(b"head"), new_head),
        (tag_u32(b"hhea"), new_hhea),
        (tag_u32(b"hmtx"), new_hmtx),
        (tag_u32(b"loca"), new_loca),
        (tag_u32(b"maxp"), new_maxp),
        (tag_u32(b"post"), new_post),
    ];
    // Tables carried over verbatim when present.
    for tag in [b"name", b"OS/2", b"cvt ", b"fpgm", b"prep"] {
        if let Some(t) = find_table(data, tag) {
            out_tables.push((tag_u32(tag), t.to_vec()));
        }
    }
    // The directory must be sorted by tag for binary search.
    out_tables.sort_by_key(|(tag, _)| *tag);

    let ttf = write_ttf_file(&out_tables);

    let to_unicode = build_to_unicode(
        old_gid_to_char
            .iter()
            .map(|(&old, &cp)| (gid_remap[&old], cp)),
    );

    Ok(SubsetFont {
        data: ttf,
        gid_remap,
        to_unicode,
    })
}

/// ToUnicode CMap over a font's *original* glyph ids, for whole-font
/// embedding when subsetting is off or impossible.
pub fn to_unicode_for(font: &FontFile, gids: impl Iterator<Item = u16>) -> Vec<u8> {
    let wanted: BTreeSet<u16> = gids.collect();
    let mut gid_to_char: BTreeMap<u16, u32> = BTreeMap::new();
    for (cp, gid) in font.cmap().mappings() {
        if wanted.contains(&gid) {
            gid_to_char.entry(gid).or_insert(cp);
        }
    }
    build_to_unicode(gid_to_char.into_iter())
}

// ─── Table rebuilding ───────────────────────────────────────────

/// Copy kept glyph records, remapping component references inside
/// composites, and return the new glyf bytes plus per-glyph offsets.
fn rebuild_glyf(
    glyf: &[u8],
    loca_offsets: &[u32],
    needed: &BTreeSet<u16>,
    gid_remap: &HashMap<u16, u16>,
) -> (Vec<u8>, Vec<u32>) {
    let mut out = Vec::new();
    let mut offsets = Vec::with_capacity(needed.len() + 1);

    for &gid in needed {
        offsets.push(out.len() as u32);
        let idx = gid as usize;
        if idx + 1 >= loca_offsets.len() {
            continue;
        }
        let start = loca_offsets[idx] as usize;
        let end = loca_offsets[idx + 1] as usize;
        if start >= end || end > glyf.len() {
            continue; // empty glyph
        }
        let record_start = out.len();
        out.extend_from_slice(&glyf[start..end]);

        // Remap composite component gids in place.
        if read_i16(&out, record_start).unwrap_or(0) < 0 {
            remap_components(&mut out[record_start..], gid_remap);
        }

        // Glyph records must stay u16-aligned.
        if out.len() % 2 != 0 {
            out.push(0);
        }
    }
    offsets.push(out.len() as u32);
    (out, offsets)
}

fn remap_components(record: &mut [u8], gid_remap: &HashMap<u16, u16>) {
    const ARG_1_AND_2_ARE_WORDS: u16 = 0x0001;
    const WE_HAVE_A_SCALE: u16 = 0x0008;
    const MORE_COMPONENTS: u16 = 0x0020;
    const WE_HAVE_AN_X_AND_Y_SCALE: u16 = 0x0040;
    const WE_HAVE_A_TWO_BY_TWO: u16 = 0x0080;

    let mut pos = 10;
    loop {
        let flags = match read_u16(record, pos) {
            Some(f) => f,
            None => return,
        };
        let component = match read_u16(record, pos + 2) {
            Some(c) => c,
            None => return,
        };
        if let Some(&new) = gid_remap.get(&component) {
            record[pos + 2..pos + 4].copy_from_slice(&new.to_be_bytes());
        }
        pos += 4;
        pos += if flags & ARG_1_AND_2_ARE_WORDS != 0 { 4 } else { 2 };
        if flags & WE_HAVE_A_SCALE != 0 {
            pos += 2;
        } else if flags & WE_HAVE_AN_X_AND_Y_SCALE != 0 {
            pos += 4;
        } else if flags & WE_HAVE_A_TWO_BY_TWO != 0 {
            pos += 8;
        }
        if flags & MORE_COMPONENTS == 0 {
            return;
        }
    }
}

fn build_loca(offsets: &[u32], long_format: bool) -> Vec<u8> {
    let mut out = Vec::new();
    for &off in offsets {
        if long_format {
            out.extend_from_slice(&off.to_be_bytes());
        } else {
            out.extend_from_slice(&((off / 2) as u16).to_be_bytes());
        }
    }
    out
}

/// Every kept glyph gets a full longHorMetric record; no trailing
/// run-length compression in the subset.
fn rebuild_hmtx(hmtx: &[u8], needed: &BTreeSet<u16>, number_of_h_metrics: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let last = number_of_h_metrics.saturating_sub(1);
    for &gid in needed {
        let idx = gid as usize;
        let (advance, lsb) = if idx < number_of_h_metrics {
            (
                read_u16(hmtx, idx * 4).unwrap_or(0),
                read_i16(hmtx, idx * 4 + 2).unwrap_or(0),
            )
        } else {
            let lsb_pos = number_of_h_metrics * 4 + (idx - number_of_h_metrics) * 2;
            (
                read_u16(hmtx, last * 4).unwrap_or(0),
                read_i16(hmtx, lsb_pos).unwrap_or(0),
            )
        };
        out.extend_from_slice(&advance.to_be_bytes());
        out.extend_from_slice(&(lsb as u16).to_be_bytes());
    }
    out
}

/// Build a format-4 cmap from sorted (codepoint, gid) pairs, merging
/// runs with a constant code-to-gid delta into single segments.
fn build_cmap_format4(pairs: &[(u16, u16)]) -> Vec<u8> {
    // Segments as (start, end, delta).
    let mut segments: Vec<(u16, u16, u16)> = Vec::new();
    for &(code, gid) in pairs {
        let delta = gid.wrapping_sub(code);
        match segments.last_mut() {
            Some((_, end, seg_delta)) if *end + 1 == code && *seg_delta == delta => {
                *end = code;
            }
            _ => segments.push((code, code, delta)),
        }
    }
    segments.push((0xFFFF, 0xFFFF, 1)); // required terminator

    let seg_count = segments.len() as u16;
    let seg_count_x2 = seg_count * 2;
    let search_range = {
        let mut sr = 2u16;
        while sr * 2 <= seg_count_x2 {
            sr *= 2;
        }
        sr
    };
    let entry_selector = (search_range / 2).ilog2() as u16;
    let range_shift = seg_count_x2.saturating_sub(search_range);

    let sub_len = 16 + 8 * seg_count as usize;
    let mut sub = Vec::with_capacity(sub_len);
    sub.extend_from_slice(&4u16.to_be_bytes());
    sub.extend_from_slice(&(sub_len as u16).to_be_bytes());
    sub.extend_from_slice(&0u16.to_be_bytes()); // language
    sub.extend_from_slice(&seg_count_x2.to_be_bytes());
    sub.extend_from_slice(&search_range.to_be_bytes());
    sub.extend_from_slice(&entry_selector.to_be_bytes());
    sub.extend_from_slice(&range_shift.to_be_bytes());
    for &(_, end, _) in &segments {
        sub.extend_from_slice(&end.to_be_bytes());
    }
    sub.extend_from_slice(&0u16.to_be_bytes()); // reservedPad
    for &(start, _, _) in &segments {
        sub.extend_from_slice(&start.to_be_bytes());
    }
    for &(_, _, delta) in &segments {
        sub.extend_from_slice(&delta.to_be_bytes());
    }
    for _ in &segments {
        sub.extend_from_slice(&0u16.to_be_bytes()); // idRangeOffset
    }

    let mut cmap = Vec::new();
    cmap.extend_from_slice(&0u16.to_be_bytes()); // version
    cmap.extend_from_slice(&1u16.to_be_bytes()); // numTables
    cmap.extend_from_slice(&3u16.to_be_bytes()); // platform: Windows
    cmap.extend_from_slice(&1u16.to_be_bytes()); // encoding: Unicode BMP
    cmap.extend_from_slice(&12u32.to_be_bytes()); // offset
    cmap.extend_from_slice(&sub);
    cmap
}

fn rebuild_head(head: &[u8], long_loca: bool) -> Vec<u8> {
    let mut out = head.to_vec();
    out.resize(54, 0);
    // checkSumAdjustment is recomputed when the file is written.
    out[8..12].copy_from_slice(&0u32.to_be_bytes());
    let fmt: i16 = if long_loca { 1 } else { 0 };
    out[50..52].copy_from_slice(&fmt.to_be_bytes());
    out
}

fn rebuild_hhea(hhea: &[u8], new_num_glyphs: u16) -> Vec<u8> {
    let mut out = hhea.to_vec();
    out.resize(36, 0);
    out[34..36].copy_from_slice(&new_num_glyphs.to_be_bytes());
    out
}

fn rebuild_maxp(maxp: &[u8], new_num_glyphs: u16) -> Vec<u8> {
    let mut out = maxp.to_vec();
    if out.len() >= 6 {
        out[4..6].copy_from_slice(&new_num_glyphs.to_be_bytes());
    }
    out
}

/// Format-3 post: no glyph names, which a subset does not need.
fn build_post_format3() -> Vec<u8> {
    let mut out = vec![0u8; 32];
    out[0..4].copy_from_slice(&0x0003_0000u32.to_be_bytes());
    out
}

// ─── File assembly ──────────────────────────────────────────────

fn table_checksum(data: &[u8]) -> u32 {
    let mut sum = 0u32;
    for chunk in data.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        sum = sum.wrapping_add(u32::from_be_bytes(word));
    }
    sum
}

/// Assemble the table directory and contents, then patch
/// `head.checkSumAdjustment` so the whole file sums to the magic constant.
fn write_ttf_file(tables: &[(u32, Vec<u8>)]) -> Vec<u8> {
    let num_tables = tables.len() as u16;
    let mut search_range = 16u16;
    let mut entry_selector = 0u16;
    while search_range * 2 <= num_tables * 16 {
        search_range *= 2;
        entry_selector += 1;
    }
    let range_shift = num_tables * 16 - search_range;

    let mut out = Vec::new();
    out.extend_from_slice(&0x0001_0000u32.to_be_bytes()); // sfnt version
    out.extend_from_slice(&num_tables.to_be_bytes());
    out.extend_from_slice(&search_range.to_be_bytes());
    out.extend_from_slice(&entry_selector.to_be_bytes());
    out.extend_from_slice(&range_shift.to_be_bytes());

    let mut offset = 12 + tables.len() * 16;
    let mut head_offset = None;
    for (tag, data) in tables {
        out.extend_from_slice(&tag.to_be_bytes());
        out.extend_from_slice(&table_checksum(data).to_be_bytes());
        out.extend_from_slice(&(offset as u32).to_be_bytes());
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        if *tag == tag_u32(b"head") {
            head_offset = Some(offset);
        }
        offset += (data.len() + 3) & !3;
    }
    for (_, data) in tables {
        out.extend_from_slice(data);
        while out.len() % 4 != 0 {
            out.push(0);
        }
    }

    if let Some(head) = head_offset {
        let adjustment = 0xB1B0_AFBAu32.wrapping_sub(table_checksum(&out));
        out[head + 8..head + 12].copy_from_slice(&adjustment.to_be_bytes());
    }
    out
}

// ─── ToUnicode ──────────────────────────────────────────────────

/// Synthesize a ToUnicode CMap stream mapping new glyph ids to UTF-16BE
/// codepoints. bfchar blocks are capped at 100 entries per the CMap spec.
fn build_to_unicode(mappings: impl Iterator<Item = (u16, u32)>) -> Vec<u8> {
    let mut entries: Vec<(u16, u32)> = mappings.collect();
    entries.sort_unstable();

    let mut s = String::new();
    s.push_str("/CIDInit /ProcSet findresource begin\n");
    s.push_str("12 dict begin\n");
    s.push_str("begincmap\n");
    s.push_str("/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n");
    s.push_str("/CMapName /Adobe-Identity-UCS def\n");
    s.push_str("/CMapType 2 def\n");
    s.push_str("1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n");

    for chunk in entries.chunks(100) {
        s.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for &(gid, cp) in chunk {
            let ch = char::from_u32(cp).unwrap_or('\u{FFFD}');
            let mut units = [0u16; 2];
            let encoded = ch.encode_utf16(&mut units);
            s.push_str(&format!("<{gid:04X}> <"));
            for unit in encoded {
                s.push_str(&format!("{unit:04X}"));
            }
            s.push_str(">\n");
        }
        s.push_str("endbfchar\n");
    }

    s.push_str("endcmap\n");
    s.push_str("CMapName currentdict /CMap defineresource pop\n");
    s.push_str("end\nend\n");
    s.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::tables::Cmap;

    #[test]
    fn test_build_cmap_format4_roundtrip() {
        // 'A'..'C' -> 1..3 (one merged segment), 'x' -> 9.
        let pairs = vec![(0x41u16, 1u16), (0x42, 2), (0x43, 3), (0x78, 9)];
        let bytes = build_cmap_format4(&pairs);
        let cmap = Cmap::parse(&bytes).unwrap();
        assert_eq!(cmap.glyph_id(0x41), Some(1));
        assert_eq!(cmap.glyph_id(0x42), Some(2));
        assert_eq!(cmap.glyph_id(0x43), Some(3));
        assert_eq!(cmap.glyph_id(0x78), Some(9));
        assert_eq!(cmap.glyph_id(0x44), None);
    }

    #[test]
    fn test_loca_roundtrip_short() {
        let offsets = vec![0u32, 20, 20, 50];
        let bytes = build_loca(&offsets, false);
        let parsed = tables::parse_loca(&bytes, false, 3).unwrap();
        assert_eq!(parsed, offsets);
    }

    #[test]
    fn test_checksum_padding() {
        // Checksums pad with zero bytes; [1] and [1,0,0,0] must agree.
        assert_eq!(table_checksum(&[1]), table_checksum(&[1, 0, 0, 0]));
    }

    #[test]
    fn test_write_ttf_file_structure() {
        let tables = vec![
            (tag_u32(b"glyf"), vec![1u8, 2, 3]),
            (tag_u32(b"head"), {
                let mut head = vec![0u8; 54];
                head[12..16].copy_from_slice(&0x5F0F_3CF5u32.to_be_bytes());
                head
            }),
        ];
        let file = write_ttf_file(&tables);
        assert_eq!(read_u16(&file, 4), Some(2)); // numTables
        // Whole file checksums to the magic constant once adjusted.
        assert_eq!(table_checksum(&file), 0xB1B0_AFBA);
        // glyf table is findable and intact.
        assert_eq!(find_table(&file, b"glyf"), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_to_unicode_content() {
        let cmap = build_to_unicode(vec![(1u16, 'H' as u32), (2, 'é' as u32)].into_iter());
        let text = String::from_utf8(cmap).unwrap();
        assert!(text.contains("begincmap"));
        assert!(text.contains("<0001> <0048>"));
        assert!(text.contains("<0002> <00E9>"));
        assert!(text.contains("endbfchar"));
    }

    #[test]
    fn test_to_unicode_chunks_at_100() {
        let cmap = build_to_unicode((0..250u16).map(|g| (g, 'a' as u32 + (g as u32 % 26))));
        let text = String::from_utf8(cmap).unwrap();
        assert_eq!(text.matches("beginbfchar").count(), 3);
        assert!(text.contains("100 beginbfchar"));
        assert!(text.contains("50 beginbfchar"));
    }
}
