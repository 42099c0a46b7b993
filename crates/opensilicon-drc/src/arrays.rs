//! Self-consistency of arrayed placements.
//!
//! Elements of an array may overlap or sit closer than the halo. Since all
//! elements are identical, it is enough to check the representative bands
//! where the first row meets the second and the first column meets the
//! second, plus the far edges of those bands.

use opensilicon_core::{CellId, CellInstance, ErrorCode, ErrorKind, Rect, RuleRef, Transform};

use crate::checker::{CheckContext, Finding};
use crate::error::DrcError;
use crate::flatten::Flattener;
use crate::overlap::validate_exact_overlaps;

/// Check every array of `cell_id` whose footprint reaches into `area`.
/// Returns the number of arrays examined.
pub fn check_arrays(
    ctx: &CheckContext<'_>,
    flattener: &mut Flattener,
    cell_id: &CellId,
    area: Rect,
    out: &mut Vec<Finding>,
) -> Result<usize, DrcError> {
    let cell = ctx.db.cell(cell_id)?;
    let mut examined = 0;
    for inst in &cell.instances {
        let Some(array) = inst.array else { continue };
        if array.columns() * array.rows() < 2 {
            continue;
        }
        let Some(child_bbox) = ctx.db.get_cell(&inst.cell_id).and_then(|c| c.bbox) else {
            continue;
        };
        if !inst.footprint(child_bbox).overlaps(&area) {
            continue;
        }
        examined += 1;

        for band in overlap_bands(inst, child_bbox, ctx.halo) {
            let Some(error_area) = band.intersection(&area) else {
                continue;
            };
            let yank = error_area.expand(ctx.halo);
            let sources = element_sources(inst, child_bbox, yank);
            let flat = flattener.flatten_sources(ctx.db, &sources, yank, ctx.max_depth)?;

            for hit in ctx.rules.evaluate(flat, yank, error_area) {
                out.push(Finding {
                    rect: hit.rect,
                    code: ErrorCode::new(ErrorKind::InteractionRuleViolation, hit.rule),
                });
            }
            let touching = element_sources(inst, child_bbox, error_area);
            for rect in validate_exact_overlaps(ctx, flat, &touching, error_area)? {
                out.push(Finding {
                    rect,
                    code: ErrorCode::new(ErrorKind::AbutmentMismatch, RuleRef::ARRAY_OVERLAP),
                });
            }
        }
    }
    Ok(examined)
}

fn element_sources(inst: &CellInstance, child_bbox: Rect, area: Rect) -> Vec<(CellId, Transform)> {
    inst.elements_in(child_bbox, area)
        .into_iter()
        .map(|(col, row)| (inst.cell_id, inst.element_transform(col, row)))
        .collect()
}

/// The bands (in parent coordinates) where neighbouring elements can
/// affect each other. A one-dimensional array gets no bands across its
/// single row or column.
pub fn overlap_bands(inst: &CellInstance, child_bbox: Rect, halo: i64) -> Vec<Rect> {
    let Some(array) = inst.array else {
        return Vec::new();
    };
    let first = inst.transform.apply_rect(&child_bbox);
    let (xsize, ysize) = (first.width(), first.height());
    let xsep = if array.columns() == 1 {
        halo + xsize
    } else {
        array.xsep.abs()
    };
    let ysep = if array.rows() == 1 {
        halo + ysize
    } else {
        array.ysep.abs()
    };
    let b = inst.footprint(child_bbox);

    let mut bands = Vec::new();
    if ysep < ysize + halo {
        let (y0, y1) = (b.ymin + ysep - halo, b.ymin + ysize + halo);
        bands.push(band(b.xmin, y0, b.xmin + xsize + halo, y1));
        bands.push(band(b.xmax - halo, y0, b.xmax, y1));
    }
    if xsep < xsize + halo {
        let (x0, x1) = (b.xmin + xsep - halo, b.xmin + xsize + halo);
        bands.push(band(x0, b.ymin, x1, b.ymin + ysep - halo));
        bands.push(band(x0, b.ymax - halo, x1, b.ymax));
    }
    bands.into_iter().flatten().collect()
}

fn band(xmin: i64, ymin: i64, xmax: i64, ymax: i64) -> Option<Rect> {
    let r = Rect {
        xmin,
        ymin,
        xmax,
        ymax,
    };
    (!r.is_empty()).then_some(r)
}
