//! Exact-overlap (abutment) validation.
//!
//! Some layers, typically shared contacts, may be drawn by several cells
//! only if every copy is identical: disjoint is fine, bit-identical is fine,
//! anything in between is an error. Flattening hides that distinction, so
//! this pass walks the unflattened tiles and compares each one against the
//! flattened copy of its surroundings.

use std::ops::ControlFlow;

use opensilicon_core::{CellId, LayerId, LayerMask, Rect, TilePlane, TileVisit, Transform};

use crate::checker::CheckContext;
use crate::error::DrcError;
use crate::flatten::FlatPaint;

/// Check every exact-overlap tile below `roots` inside `clip` against the
/// flattened plane `flat`. Returned rectangles lie inside `clip`.
pub fn validate_exact_overlaps(
    ctx: &CheckContext<'_>,
    flat: &TilePlane<FlatPaint>,
    roots: &[(CellId, Transform)],
    clip: Rect,
) -> Result<Vec<Rect>, DrcError> {
    let exact = ctx.rules.exact_overlap_layers();
    if exact.is_empty() || clip.is_empty() {
        return Ok(Vec::new());
    }

    let mut visits: Vec<TileVisit> = Vec::new();
    for (root, xform) in roots {
        let _ = ctx.db.search_subtree(root, xform, clip, ctx.max_depth, &mut |v| {
            if v.layers.intersects(exact) {
                visits.push(v);
            }
            ControlFlow::Continue(())
        })?;
    }

    let mut out = Vec::new();
    for visit in &visits {
        for layer in (visit.layers & exact).iter() {
            check_tile(ctx, flat, visit, layer, clip, &mut out)?;
        }
    }
    Ok(out)
}

fn check_tile(
    ctx: &CheckContext<'_>,
    flat: &TilePlane<FlatPaint>,
    visit: &TileVisit,
    layer: LayerId,
    clip: Rect,
    out: &mut Vec<Rect>,
) -> Result<(), DrcError> {
    let this = LayerMask::single(layer);
    let tile = visit.root_rect();
    // Include abutting material, but nothing outside the search area.
    let Some(rex) = tile.expand(1).intersection(&clip) else {
        return Ok(());
    };
    if !flat.any_in(rex, |p| p.layers.intersects(this)) {
        return Ok(());
    }

    // Something else drawn on top of this tile by another source.
    let conflicts = ctx.rules.conflicting_layers(layer);
    if !conflicts.is_empty() {
        for t in flat.search(tile).filter(|t| t.value.layers.intersects(conflicts)) {
            if let Some(r) = t.rect.intersection(&tile).and_then(|r| r.intersection(&clip)) {
                out.push(r);
            }
        }
    }

    // Neighbours of this tile in its own cell that do not carry the layer,
    // yet the flattened copy has it there: another source's copy spills
    // past this one.
    let owner = ctx.db.cell(&visit.cell)?;
    let local_rex = visit.transform.inverse().apply_rect(&rex);
    let mut ring = vec![local_rex];
    for same in owner.paint.search(local_rex).filter(|t| t.value.contains(layer)) {
        ring = ring.iter().flat_map(|r| r.subtract(&same.rect)).collect();
    }
    for piece in ring {
        let piece = visit.transform.apply_rect(&piece);
        for t in flat.search(piece).filter(|t| t.value.layers.intersects(this)) {
            if let Some(r) = t.rect.intersection(&piece).and_then(|r| r.intersection(&clip)) {
                out.push(r);
            }
        }
    }
    Ok(())
}
