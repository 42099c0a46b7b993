use std::ops::ControlFlow;

use opensilicon_core::{CellId, DbError, LayerMask, LayoutDatabase, Rect, TilePlane, Transform};
use serde::{Deserialize, Serialize};

/// Content of one tile of the flattened scratch plane.
///
/// `stacked` holds layers drawn by more than one source tile at this spot.
/// Adding sources is commutative, so the result does not depend on the
/// order tiles are copied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct FlatPaint {
    pub layers: LayerMask,
    pub stacked: LayerMask,
}

impl FlatPaint {
    pub fn add(self, layers: LayerMask) -> Self {
        Self {
            layers: self.layers | layers,
            stacked: self.stacked | (self.layers & layers),
        }
    }
}

/// What a flatten copies from the scope cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlattenMode {
    /// Only paint drawn directly in the cell.
    PaintOnly,
    /// Paint of the cell and everything placed below it.
    Subtree,
}

/// Owner of the shared scratch plane.
///
/// The plane is handed out by reference, so it cannot be flattened into
/// again while a caller is still reading it.
#[derive(Debug, Default)]
pub struct Flattener {
    scratch: TilePlane<FlatPaint>,
}

impl Flattener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the geometry of `scope` under `area` into the scratch plane,
    /// clipped to `area`, in `scope`'s coordinates.
    pub fn flatten(
        &mut self,
        db: &LayoutDatabase,
        scope: &CellId,
        area: Rect,
        mode: FlattenMode,
        max_depth: usize,
    ) -> Result<&TilePlane<FlatPaint>, DbError> {
        self.scratch.clear();
        match mode {
            FlattenMode::PaintOnly => {
                let cell = db.cell(scope)?;
                for tile in cell.paint.search(area) {
                    if let Some(r) = tile.rect.intersection(&area) {
                        add_paint(&mut self.scratch, r, tile.value);
                    }
                }
            }
            FlattenMode::Subtree => {
                self.copy_subtree(db, scope, &Transform::IDENTITY, area, max_depth)?;
            }
        }
        Ok(&self.scratch)
    }

    /// Flatten only the given sources (cells placed with a transform into the
    /// frame of `area`), ignoring whatever else is around them.
    pub fn flatten_sources(
        &mut self,
        db: &LayoutDatabase,
        sources: &[(CellId, Transform)],
        area: Rect,
        max_depth: usize,
    ) -> Result<&TilePlane<FlatPaint>, DbError> {
        self.scratch.clear();
        for (cell, xform) in sources {
            self.copy_subtree(db, cell, xform, area, max_depth)?;
        }
        Ok(&self.scratch)
    }

    pub fn scratch(&self) -> &TilePlane<FlatPaint> {
        &self.scratch
    }

    fn copy_subtree(
        &mut self,
        db: &LayoutDatabase,
        root: &CellId,
        xform: &Transform,
        area: Rect,
        max_depth: usize,
    ) -> Result<(), DbError> {
        let scratch = &mut self.scratch;
        let _ = db.search_subtree(root, xform, area, max_depth, &mut |visit| {
            if let Some(r) = visit.root_rect().intersection(&area) {
                add_paint(scratch, r, visit.layers);
            }
            ControlFlow::Continue(())
        })?;
        Ok(())
    }
}

/// Every placement of every cell at or below `root` whose footprint reaches
/// into `area`, with the transform into `root`'s coordinates. `root` itself
/// comes first with the identity transform; array elements are listed one
/// by one.
pub fn placements_under(
    db: &LayoutDatabase,
    root: &CellId,
    area: Rect,
    max_depth: usize,
) -> Result<Vec<(CellId, Transform)>, DbError> {
    let mut out = Vec::new();
    walk_placements(db, root, &Transform::IDENTITY, area, 0, max_depth, &mut out)?;
    Ok(out)
}

fn walk_placements(
    db: &LayoutDatabase,
    cell_id: &CellId,
    to_root: &Transform,
    area: Rect,
    depth: usize,
    max_depth: usize,
    out: &mut Vec<(CellId, Transform)>,
) -> Result<(), DbError> {
    if depth > max_depth {
        return Err(DbError::HierarchyTooDeep {
            cell: *cell_id,
            depth: max_depth,
        });
    }
    out.push((*cell_id, *to_root));
    let cell = db.cell(cell_id)?;
    let local = to_root.inverse().apply_rect(&area);
    for inst in &cell.instances {
        let Some(child_bbox) = db.get_cell(&inst.cell_id).and_then(|c| c.bbox) else {
            continue;
        };
        for (col, row) in inst.elements_in(child_bbox, local) {
            let xform = inst.element_transform(col, row).then(to_root);
            walk_placements(db, &inst.cell_id, &xform, area, depth + 1, max_depth, out)?;
        }
    }
    Ok(())
}

fn add_paint(plane: &mut TilePlane<FlatPaint>, rect: Rect, layers: LayerMask) {
    if layers.is_empty() {
        return;
    }
    plane.paint(rect, |old| Some(old.copied().unwrap_or_default().add(layers)));
}
