//! # Table Layout
//!
//! Column width resolution (fixed, proportional, auto), cell placement on
//! an occupancy grid honoring row and column spans, and row-by-row piece
//! emission so the page builder can paginate long tables with repeated
//! headers.
//!
//! Rows are atomic: a row never splits across pages. Header rows are
//! re-emitted after every break inside the table; footer rows close each
//! broken segment unless `table-omit-footer-at-break` says otherwise.

use super::{Engine, FlattenCtx, Piece, RepeatPiece, TableCtx};
use crate::area::{Area, BlockArea, Paint, Rect};
use crate::error::FolioError;
use crate::fo::properties::{AbsEdge, DisplayAlign};
use crate::fo::{FoKind, NodeId};
use std::sync::Arc;

/// Declared width of one `fo:table-column`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnWidth {
    Fixed(f64),
    /// `proportional-column-width(N)`.
    Proportional(f64),
    Auto,
}

/// One cell placed on the grid.
#[derive(Debug, Clone)]
pub struct PlacedCell {
    pub node: NodeId,
    pub row: usize,
    pub col: usize,
    pub colspan: usize,
    pub rowspan: usize,
}

/// Place the cells of `rows` on an occupancy grid. Every cell lands at its
/// row's lowest free column; spans mark further slots occupied. Returns the
/// placements and the column count.
pub fn place_cells(
    engine: &Engine<'_>,
    rows: &[NodeId],
) -> Result<(Vec<PlacedCell>, usize), FolioError> {
    let mut occupied: Vec<Vec<bool>> = vec![Vec::new(); rows.len()];
    let mut placed = Vec::new();
    let mut ncols = 0usize;

    for (r, &row) in rows.iter().enumerate() {
        let mut col = 0usize;
        for cell in engine.tree.children_of_kind(row, FoKind::TableCell) {
            let colspan = engine.res.integer(cell, "number-columns-spanned", 1).max(1) as usize;
            let rowspan = engine.res.integer(cell, "number-rows-spanned", 1).max(1) as usize;

            // Skip slots claimed by spanning cells above.
            while occupied[r].get(col).copied().unwrap_or(false) {
                col += 1;
            }

            for rr in r..(r + rowspan).min(rows.len()) {
                for cc in col..col + colspan {
                    if occupied[rr].len() <= cc {
                        occupied[rr].resize(cc + 1, false);
                    }
                    if occupied[rr][cc] {
                        return Err(FolioError::InvalidDocument {
                            node: cell,
                            reason: format!("two cells claim table slot ({rr}, {cc})"),
                        });
                    }
                    occupied[rr][cc] = true;
                }
            }

            placed.push(PlacedCell {
                node: cell,
                row: r,
                col,
                colspan,
                rowspan,
            });
            ncols = ncols.max(col + colspan);
            col += colspan;
        }
    }
    Ok((placed, ncols))
}

/// Parse the declared column widths off `fo:table-column` children,
/// honoring `number-columns-repeated`.
fn declared_columns(engine: &Engine<'_>, table: NodeId) -> Vec<ColumnWidth> {
    let mut out = Vec::new();
    for col in engine.tree.children_of_kind(table, FoKind::TableColumn) {
        let repeat = engine
            .res
            .integer(col, "number-columns-repeated", 1)
            .max(1) as usize;
        let width = match engine.res.specified(col, "column-width") {
            Some(spec) => {
                let spec = spec.trim();
                if let Some(inner) = spec
                    .strip_prefix("proportional-column-width(")
                    .and_then(|s| s.strip_suffix(')'))
                {
                    inner
                        .trim()
                        .parse::<f64>()
                        .map(ColumnWidth::Proportional)
                        .unwrap_or(ColumnWidth::Auto)
                } else if spec == "auto" {
                    ColumnWidth::Auto
                } else {
                    crate::fo::properties::parse_length(spec, engine.res.font_size(col), None)
                        .map(ColumnWidth::Fixed)
                        .unwrap_or(ColumnWidth::Auto)
                }
            }
            None => ColumnWidth::Auto,
        };
        for _ in 0..repeat {
            out.push(width);
        }
    }
    out
}

/// Resolve final column widths against the available table width.
///
/// 1. Fixed columns take their lengths.
/// 2. Proportional columns split the remainder by factor.
/// 3. Auto columns split what is left by their minimum (longest
///    unbreakable) content width.
///
/// When the total exceeds the available width, every column shrinks
/// proportionally.
pub fn resolve_column_widths(
    engine: &mut Engine<'_>,
    declared: &[ColumnWidth],
    ncols: usize,
    available: f64,
    cells: &[PlacedCell],
) -> Vec<f64> {
    let mut spec: Vec<ColumnWidth> = declared.to_vec();
    spec.resize(ncols.max(declared.len()), ColumnWidth::Auto);
    let ncols = spec.len().max(1);
    let mut widths = vec![0.0f64; ncols];

    let fixed_total: f64 = spec
        .iter()
        .filter_map(|c| match c {
            ColumnWidth::Fixed(w) => Some(*w),
            _ => None,
        })
        .sum();
    let mut remaining = (available - fixed_total).max(0.0);

    for (i, c) in spec.iter().enumerate() {
        if let ColumnWidth::Fixed(w) = c {
            widths[i] = *w;
        }
    }

    let proportional_total: f64 = spec
        .iter()
        .filter_map(|c| match c {
            ColumnWidth::Proportional(f) => Some(*f),
            _ => None,
        })
        .sum();
    let auto_count = spec
        .iter()
        .filter(|c| matches!(c, ColumnWidth::Auto))
        .count();

    if proportional_total > 0.0 {
        // With auto columns also present, proportional columns share only
        // the space auto columns do not claim; measure auto first.
        let auto_reserve = if auto_count > 0 {
            let mins = auto_min_contents(engine, &spec, cells, ncols);
            mins.iter().sum::<f64>().min(remaining / 2.0)
        } else {
            0.0
        };
        let share = (remaining - auto_reserve).max(0.0);
        for (i, c) in spec.iter().enumerate() {
            if let ColumnWidth::Proportional(f) = c {
                widths[i] = share * f / proportional_total;
            }
        }
        remaining = (remaining - share).max(0.0);
    }

    if auto_count > 0 {
        let mins = auto_min_contents(engine, &spec, cells, ncols);
        let min_total: f64 = mins.iter().sum();
        for (i, c) in spec.iter().enumerate() {
            if matches!(c, ColumnWidth::Auto) {
                widths[i] = if min_total > 0.0 {
                    remaining * mins[i] / min_total
                } else {
                    remaining / auto_count as f64
                };
            }
        }
    }

    let total: f64 = widths.iter().sum();
    if total > available && total > 0.0 {
        let scale = available / total;
        for w in &mut widths {
            *w *= scale;
        }
    }
    widths
}

/// Minimum content width per auto column: the widest unbreakable word of
/// any cell starting in that column (spanning cells are skipped; their
/// width constraint is weaker than a measurement pass is worth).
fn auto_min_contents(
    engine: &mut Engine<'_>,
    spec: &[ColumnWidth],
    cells: &[PlacedCell],
    ncols: usize,
) -> Vec<f64> {
    let mut mins = vec![0.0f64; ncols];
    for cell in cells {
        if cell.colspan != 1 || !matches!(spec.get(cell.col), Some(ColumnWidth::Auto)) {
            continue;
        }
        let w = longest_word_width(engine, cell.node);
        mins[cell.col] = mins[cell.col].max(w);
    }
    mins
}

fn longest_word_width(engine: &mut Engine<'_>, node: NodeId) -> f64 {
    let mut widest = 0.0f64;
    for desc in engine.tree.descendants(node) {
        if engine.tree.kind(desc) != FoKind::Text {
            continue;
        }
        let text = engine.tree.text(desc).unwrap_or("").to_string();
        let style_node = engine.tree.parent(desc).unwrap_or(desc);
        let style = engine.res.text_style(style_node);
        if let Ok(font_id) = engine.font_id(&style.family, style.weight, style.italic) {
            let resolved = engine.slot(font_id).resolved.clone();
            for word in text.split_whitespace() {
                widest = widest.max(resolved.measure(word, style.size, style.letter_spacing));
            }
        }
    }
    widest
}

/// A laid-out cell before row heights are final.
struct LaidCell {
    placed: PlacedCell,
    area: Area,
    content_height: f64,
    footnotes: Vec<NodeId>,
}

/// Flatten an `fo:table` into row pieces.
pub(crate) fn flatten_table(
    engine: &mut Engine<'_>,
    node: NodeId,
    ctx: &FlattenCtx,
    out: &mut Vec<Piece>,
) -> Result<(), FolioError> {
    let margin_left = engine.res.margin(node, AbsEdge::Left, Some(ctx.width));
    let margin_right = engine.res.margin(node, AbsEdge::Right, Some(ctx.width));
    let table_width = engine
        .res
        .length_opt(node, "width", Some(ctx.width))
        .unwrap_or(ctx.width - margin_left - margin_right)
        .max(1.0);
    let table_x = ctx.x + margin_left;

    let header = engine.tree.first_child_of_kind(node, FoKind::TableHeader);
    let footer = engine.tree.first_child_of_kind(node, FoKind::TableFooter);
    let bodies: Vec<NodeId> = engine
        .tree
        .children_of_kind(node, FoKind::TableBody)
        .collect();

    let mut all_rows: Vec<NodeId> = Vec::new();
    let mut header_range = 0usize..0;
    let mut footer_range = 0usize..0;
    if let Some(h) = header {
        let start = all_rows.len();
        all_rows.extend(engine.tree.children_of_kind(h, FoKind::TableRow));
        header_range = start..all_rows.len();
    }
    if let Some(f) = footer {
        let start = all_rows.len();
        all_rows.extend(engine.tree.children_of_kind(f, FoKind::TableRow));
        footer_range = start..all_rows.len();
    }
    let body_start = all_rows.len();
    for &body in &bodies {
        all_rows.extend(engine.tree.children_of_kind(body, FoKind::TableRow));
    }
    if all_rows.is_empty() {
        return Ok(());
    }

    let (cells, ncols) = place_cells(engine, &all_rows)?;
    let declared = declared_columns(engine, node);
    let widths = resolve_column_widths(engine, &declared, ncols, table_width, &cells);

    // x offset of each column relative to the table edge.
    let mut col_x = vec![0.0f64; widths.len() + 1];
    for i in 0..widths.len() {
        col_x[i + 1] = col_x[i] + widths[i];
    }

    // Lay out every cell at its spanned width.
    let mut laid: Vec<LaidCell> = Vec::new();
    for placed in &cells {
        let x = col_x[placed.col];
        let width = col_x[(placed.col + placed.colspan).min(widths.len())] - x;
        let (area, content_height, footnotes) =
            layout_cell(engine, placed.node, x, width, ctx.page)?;
        laid.push(LaidCell {
            placed: placed.clone(),
            area,
            content_height,
            footnotes,
        });
    }

    // Row heights: single-row cells first, then span deficits land on the
    // last spanned row.
    let nrows = all_rows.len();
    let mut row_heights = vec![0.0f64; nrows];
    for cell in laid.iter().filter(|c| c.placed.rowspan == 1) {
        row_heights[cell.placed.row] = row_heights[cell.placed.row].max(cell.content_height);
    }
    for cell in laid.iter().filter(|c| c.placed.rowspan > 1) {
        let end = (cell.placed.row + cell.placed.rowspan).min(nrows);
        let consumed: f64 = row_heights[cell.placed.row..end].iter().sum();
        if cell.content_height > consumed {
            row_heights[end - 1] += cell.content_height - consumed;
        }
    }
    for (r, &row) in all_rows.iter().enumerate() {
        if let Some(h) = engine.res.length_opt(row, "height", None) {
            row_heights[r] = row_heights[r].max(h);
        }
    }

    // Assemble one area per row; spanning cells belong to their start row
    // and reach down into the following rows.
    let mut row_areas: Vec<Area> = Vec::with_capacity(nrows);
    let mut row_footnotes: Vec<Vec<NodeId>> = vec![Vec::new(); nrows];
    for r in 0..nrows {
        let mut children = Vec::new();
        for cell in laid.iter().filter(|c| c.placed.row == r) {
            let end = (r + cell.placed.rowspan).min(nrows);
            let cell_height: f64 = row_heights[r..end].iter().sum();
            let mut area = cell.area.clone();
            if let Area::Block(b) = &mut area {
                let dy = match engine.res.display_align(cell.placed.node) {
                    DisplayAlign::Center => (cell_height - cell.content_height).max(0.0) / 2.0,
                    DisplayAlign::After => (cell_height - cell.content_height).max(0.0),
                    _ => 0.0,
                };
                if dy > 0.0 {
                    for child in &mut b.children {
                        super::offset_area(child, 0.0, dy);
                    }
                }
                b.rect.height = cell_height;
            }
            super::offset_area(&mut area, table_x, 0.0);
            children.push(area);
            row_footnotes[r].extend(cell.footnotes.iter().copied());
        }
        let mut row_block = BlockArea::new(Rect::new(table_x, 0.0, table_width, row_heights[r]));
        row_block.children = children;
        if let Some(id) = engine.res.specified(all_rows[r], "id") {
            row_block.id = Some(id.to_string());
        }
        row_areas.push(Area::Block(row_block));
    }

    // Header and footer rows become repeat groups.
    let header_pieces: Vec<RepeatPiece> = header_range
        .clone()
        .map(|r| RepeatPiece {
            height: row_heights[r],
            area: row_areas[r].clone(),
        })
        .collect();
    let footer_pieces: Vec<RepeatPiece> = footer_range
        .clone()
        .map(|r| RepeatPiece {
            height: row_heights[r],
            area: row_areas[r].clone(),
        })
        .collect();

    let table_ctx = TableCtx {
        id: engine.next_table_id(),
        header: Arc::new(header_pieces),
        footer: Arc::new(footer_pieces),
        omit_footer_at_break: engine
            .res
            .boolean(node, "table-omit-footer-at-break", false),
    };

    let start = out.len();

    // Leading header rows.
    for r in header_range {
        let mut piece = Piece::area(row_heights[r], row_areas[r].clone());
        piece.table = Some(table_ctx.clone());
        piece.footnotes = row_footnotes[r].clone();
        if r > 0 {
            piece.keep_with_prev = 1000;
        }
        out.push(piece);
    }

    // Body rows in source order.
    for (offset, r) in (body_start..nrows).enumerate() {
        let row = all_rows[r];
        let mut piece = Piece::area(row_heights[r], row_areas[r].clone());
        piece.table = Some(table_ctx.clone());
        piece.footnotes = row_footnotes[r].clone();
        let keep_prev = engine.res.keep(row, "keep-with-previous");
        if offset > 0 {
            let prev_row = all_rows[r - 1];
            let keep_next_prev = engine.res.keep(prev_row, "keep-with-next");
            piece.keep_with_prev = keep_prev.strength().max(keep_next_prev.strength());
        } else if !table_ctx.header.is_empty() {
            // First body row stays with the initial header block.
            piece.keep_with_prev = 1000;
        }
        out.push(piece);
    }

    // Trailing footer rows, bound to the last body row.
    for r in footer_range {
        let mut piece = Piece::area(row_heights[r], row_areas[r].clone());
        piece.table = Some(table_ctx.clone());
        piece.footnotes = row_footnotes[r].clone();
        piece.keep_with_prev = 1000;
        out.push(piece);
    }

    // Table-level paint wraps all rows.
    let paint = engine.block_paint(node);
    if paint.is_visible() {
        let wrapper_id = engine.wrappers.len() as u32;
        engine.wrappers.push(super::WrapperInfo {
            x: table_x,
            width: table_width,
            paint,
        });
        for piece in out.iter_mut().skip(start) {
            piece.wrappers.push(wrapper_id);
        }
    }
    if let Some(id) = engine.res.specified(node, "id") {
        if let Some(first) = out.get_mut(start) {
            first.id_refs.push(id.to_string());
        }
    }
    Ok(())
}

/// Lay out one cell's content at the given width. The returned area sits
/// at (x, 0) relative to the table edge.
fn layout_cell(
    engine: &mut Engine<'_>,
    cell: NodeId,
    x: f64,
    width: f64,
    page: Rect,
) -> Result<(Area, f64, Vec<NodeId>), FolioError> {
    let pad_top = engine.res.padding(cell, AbsEdge::Top, Some(width));
    let pad_bottom = engine.res.padding(cell, AbsEdge::Bottom, Some(width));
    let pad_left = engine.res.padding(cell, AbsEdge::Left, Some(width));
    let pad_right = engine.res.padding(cell, AbsEdge::Right, Some(width));
    let bw_top = engine.res.border_width(cell, AbsEdge::Top);
    let bw_bottom = engine.res.border_width(cell, AbsEdge::Bottom);
    let bw_left = engine.res.border_width(cell, AbsEdge::Left);
    let bw_right = engine.res.border_width(cell, AbsEdge::Right);

    let inner = FlattenCtx {
        x: 0.0,
        width: (width - pad_left - pad_right - bw_left - bw_right).max(1.0),
        page,
        wrappers: Vec::new(),
    };
    let children: Vec<NodeId> = engine.tree.children(cell).to_vec();
    let mut pieces = Vec::new();
    engine.flatten_children(&children, &inner, &mut pieces)?;
    let mut footnotes = Vec::new();
    let (mut content, content_h) =
        engine.collapse_pieces(pieces, Paint::default(), 0.0, inner.width, &mut footnotes);
    super::offset_area(&mut content, pad_left + bw_left, pad_top + bw_top);

    let total_h = content_h + pad_top + pad_bottom + bw_top + bw_bottom;
    let mut block = BlockArea::new(Rect::new(x, 0.0, width, total_h));
    block.paint = engine.block_paint(cell);
    block.children = vec![content];
    Ok((Area::Block(block), total_h, footnotes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fo::{FoTree, FoTreeBuilder};
    use crate::font::FontContext;
    use crate::options::LayoutOptions;

    fn table_tree(build: impl FnOnce(&mut FoTreeBuilder)) -> FoTree {
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
        b.open(FoKind::Flow);
        b.attribute("flow-name", "xsl-region-body");
        build(&mut b);
        b.close();
        b.close();
        b.close();
        b.finish().unwrap()
    }

    fn cell(b: &mut FoTreeBuilder, text: &str) {
        b.open(FoKind::TableCell);
        b.open(FoKind::Block);
        b.text(text);
        b.close();
        b.close();
    }

    fn find_table(tree: &FoTree) -> NodeId {
        tree.descendants(tree.root())
            .into_iter()
            .find(|&n| tree.kind(n) == FoKind::Table)
            .unwrap()
    }

    #[test]
    fn test_place_cells_simple_grid() {
        let tree = table_tree(|b| {
            b.open(FoKind::Table);
            b.open(FoKind::TableBody);
            for _ in 0..2 {
                b.open(FoKind::TableRow);
                cell(b, "a");
                cell(b, "b");
                b.close();
            }
            b.close();
            b.close();
        });
        let fonts = FontContext::new();
        let options = LayoutOptions::default();
        let engine = Engine::new(&tree, &fonts, &options);
        let table = find_table(&tree);
        let body = tree.first_child_of_kind(table, FoKind::TableBody).unwrap();
        let rows: Vec<NodeId> = tree.children_of_kind(body, FoKind::TableRow).collect();
        let (cells, ncols) = place_cells(&engine, &rows).unwrap();
        assert_eq!(ncols, 2);
        assert_eq!(cells.len(), 4);
        assert_eq!((cells[0].row, cells[0].col), (0, 0));
        assert_eq!((cells[3].row, cells[3].col), (1, 1));
    }

    #[test]
    fn test_place_cells_rowspan_pushes_neighbors() {
        let tree = table_tree(|b| {
            b.open(FoKind::Table);
            b.open(FoKind::TableBody);
            b.open(FoKind::TableRow);
            b.open(FoKind::TableCell);
            b.attribute("number-rows-spanned", "2");
            b.close();
            cell(b, "b");
            b.close();
            b.open(FoKind::TableRow);
            cell(b, "c");
            b.close();
            b.close();
            b.close();
        });
        let fonts = FontContext::new();
        let options = LayoutOptions::default();
        let engine = Engine::new(&tree, &fonts, &options);
        let table = find_table(&tree);
        let body = tree.first_child_of_kind(table, FoKind::TableBody).unwrap();
        let rows: Vec<NodeId> = tree.children_of_kind(body, FoKind::TableRow).collect();
        let (cells, ncols) = place_cells(&engine, &rows).unwrap();
        assert_eq!(ncols, 2);
        // The second-row cell must skip column 0, which the spanner holds.
        let c = cells.iter().find(|c| c.row == 1).unwrap();
        assert_eq!(c.col, 1);
    }

    #[test]
    fn test_column_width_fixed_and_proportional() {
        let tree = table_tree(|b| {
            b.open(FoKind::Table);
            b.open(FoKind::TableColumn);
            b.attribute("column-width", "100pt");
            b.close();
            b.open(FoKind::TableColumn);
            b.attribute("column-width", "proportional-column-width(1)");
            b.close();
            b.open(FoKind::TableColumn);
            b.attribute("column-width", "proportional-column-width(2)");
            b.close();
            b.open(FoKind::TableBody);
            b.open(FoKind::TableRow);
            cell(b, "a");
            cell(b, "b");
            cell(b, "c");
            b.close();
            b.close();
            b.close();
        });
        let fonts = FontContext::new();
        let options = LayoutOptions::default();
        let mut engine = Engine::new(&tree, &fonts, &options);
        let table = find_table(&tree);
        let declared = declared_columns(&engine, table);
        assert_eq!(declared[0], ColumnWidth::Fixed(100.0));
        let widths = resolve_column_widths(&mut engine, &declared, 3, 400.0, &[]);
        assert!((widths[0] - 100.0).abs() < 1e-9);
        assert!((widths[1] - 100.0).abs() < 1e-9);
        assert!((widths[2] - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_column_width_overflow_shrinks_proportionally() {
        let declared = vec![ColumnWidth::Fixed(300.0), ColumnWidth::Fixed(300.0)];
        let tree = table_tree(|b| {
            b.open(FoKind::Table);
            b.open(FoKind::TableBody);
            b.open(FoKind::TableRow);
            cell(b, "a");
            b.close();
            b.close();
            b.close();
        });
        let fonts = FontContext::new();
        let options = LayoutOptions::default();
        let mut engine = Engine::new(&tree, &fonts, &options);
        let widths = resolve_column_widths(&mut engine, &declared, 2, 400.0, &[]);
        assert!((widths[0] - 200.0).abs() < 1e-9);
        assert!((widths[1] - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_flatten_table_emits_row_pieces_with_ctx() {
        let tree = table_tree(|b| {
            b.open(FoKind::Table);
            b.open(FoKind::TableHeader);
            b.open(FoKind::TableRow);
            cell(b, "Head");
            b.close();
            b.close();
            b.open(FoKind::TableBody);
            for i in 0..3 {
                b.open(FoKind::TableRow);
                cell(b, &format!("row {i}"));
                b.close();
            }
            b.close();
            b.close();
        });
        let fonts = FontContext::new();
        let options = LayoutOptions::default();
        let mut engine = Engine::new(&tree, &fonts, &options);
        let table = find_table(&tree);
        let ctx = FlattenCtx {
            x: 0.0,
            width: 400.0,
            page: Rect::new(0.0, 0.0, 595.0, 842.0),
            wrappers: Vec::new(),
        };
        let mut out = Vec::new();
        flatten_table(&mut engine, table, &ctx, &mut out).unwrap();
        assert_eq!(out.len(), 4, "header + 3 body rows");
        let ctx0 = out[0].table.as_ref().unwrap();
        assert_eq!(ctx0.header.len(), 1, "header row registered for repeats");
        assert!(out.iter().all(|p| p.table.is_some()));
        assert!(out[1].keep_with_prev >= 1000, "first body row holds to header");
    }

    #[test]
    fn test_row_height_is_max_of_cells() {
        let tree = table_tree(|b| {
            b.open(FoKind::Table);
            b.open(FoKind::TableBody);
            b.open(FoKind::TableRow);
            cell(b, "short");
            b.open(FoKind::TableCell);
            b.open(FoKind::Block);
            b.text("a much longer text that should wrap over several lines in a narrow cell");
            b.close();
            b.close();
            b.close();
            b.close();
            b.close();
        });
        let fonts = FontContext::new();
        let options = LayoutOptions::default();
        let mut engine = Engine::new(&tree, &fonts, &options);
        let table = find_table(&tree);
        let ctx = FlattenCtx {
            x: 0.0,
            width: 200.0,
            page: Rect::new(0.0, 0.0, 595.0, 842.0),
            wrappers: Vec::new(),
        };
        let mut out = Vec::new();
        flatten_table(&mut engine, table, &ctx, &mut out).unwrap();
        assert_eq!(out.len(), 1);
        // Wrapped cell forces a row taller than a single line.
        assert!(out[0].height > 20.0, "row height {}", out[0].height);
    }
}
