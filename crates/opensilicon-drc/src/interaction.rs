//! Hierarchical interaction search.
//!
//! Finds where a cell's placements come close enough to each other, or to
//! the cell's own paint, that no single source can be checked in isolation.

use std::ops::ControlFlow;

use opensilicon_core::geometry::{self, Rect};
use opensilicon_core::{CellId, CellInstance};

use crate::checker::CheckContext;
use crate::error::DrcError;

/// Bounding box of all interactions of `cell` inside `area`, expanded by the
/// halo and clipped to `area`. `None` when nothing in `area` interacts.
///
/// A single expansion pass: interaction chains longer than one halo are
/// picked up when the cells involved are marked dirty themselves.
pub fn find_interactions(
    ctx: &CheckContext<'_>,
    cell_id: &CellId,
    area: Rect,
) -> Result<Option<Rect>, DrcError> {
    let cell = ctx.db.cell(cell_id)?;
    let look = area.expand(ctx.halo);

    let footprints: Vec<(usize, Rect)> = cell
        .instances
        .iter()
        .enumerate()
        .filter_map(|(i, inst)| ctx.db.instance_bbox(inst).map(|b| (i, b)))
        .collect();

    let mut candidate: Option<Rect> = None;
    for (i, bbox) in &footprints {
        let Some(halo_area) = bbox.expand(ctx.halo).intersection(&look) else {
            continue;
        };
        let mut near: Option<Rect> = None;
        for tile in cell.paint.search(halo_area) {
            geometry::include(&mut near, tile.rect);
        }
        for (j, other) in &footprints {
            if j != i && other.overlaps(&halo_area) {
                geometry::include(&mut near, *other);
            }
        }
        if let Some(r) = near.and_then(|r| r.expand(ctx.halo).intersection(&halo_area)) {
            geometry::include(&mut candidate, r);
        }
    }
    let Some(candidate) = candidate else {
        return Ok(None);
    };

    // Bounding boxes are optimistic; make sure two sources really have
    // material in the candidate area. The cell's own paint is one source.
    let mut sources = usize::from(cell.paint.any_in(candidate, |m| !m.is_empty()));
    for inst in &cell.instances {
        if sources >= 2 {
            break;
        }
        if has_material(ctx, inst, candidate)? {
            sources += 1;
        }
    }
    if sources < 2 {
        log::trace!("Candidate interaction {:?} in {} has one source", candidate, cell.name);
        return Ok(None);
    }

    Ok(candidate.intersection(&area))
}

/// True if any element of `inst` has paint somewhere below it in `area`.
fn has_material(ctx: &CheckContext<'_>, inst: &CellInstance, area: Rect) -> Result<bool, DrcError> {
    let Some(child_bbox) = ctx.db.get_cell(&inst.cell_id).and_then(|c| c.bbox) else {
        return Ok(false);
    };
    for (col, row) in inst.elements_in(child_bbox, area) {
        let xform = inst.element_transform(col, row);
        let found = ctx.db.search_subtree(&inst.cell_id, &xform, area, ctx.max_depth, &mut |_| {
            ControlFlow::Break(())
        })?;
        if found.is_break() {
            return Ok(true);
        }
    }
    Ok(false)
}
