use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{self, Rect, Transform};
use crate::layer::{LayerId, LayerMask};
use crate::marks::{DirtyMask, ErrorSet};
use crate::spatial::TilePlane;

/// Unique cell identifier.
pub type CellId = Uuid;

/// Cells carrying any of these flags are never checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellFlags {
    /// Cell may not be edited.
    pub read_only: bool,
    /// Cell came from a vendor library (e.g. a GDS-only hard macro).
    pub vendor: bool,
    /// Scratch or bookkeeping cell owned by a tool.
    pub internal: bool,
}

impl CellFlags {
    pub fn excluded_from_checks(&self) -> bool {
        self.read_only || self.vendor || self.internal
    }
}

/// Replication bounds of an arrayed placement.
///
/// Element `(col, row)` counts from zero at `xlo`/`ylo` and sits at the
/// instance transform shifted by `col * xsep, row * ysep` in parent
/// coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArraySpec {
    pub xlo: i64,
    pub xhi: i64,
    pub ylo: i64,
    pub yhi: i64,
    pub xsep: i64,
    pub ysep: i64,
}

impl ArraySpec {
    /// A `columns` x `rows` array starting at index zero.
    pub fn grid(columns: i64, rows: i64, xsep: i64, ysep: i64) -> Self {
        Self {
            xlo: 0,
            xhi: columns.max(1) - 1,
            ylo: 0,
            yhi: rows.max(1) - 1,
            xsep,
            ysep,
        }
    }

    pub fn columns(&self) -> i64 {
        (self.xhi - self.xlo).abs() + 1
    }

    pub fn rows(&self) -> i64 {
        (self.yhi - self.ylo).abs() + 1
    }

    pub fn element_offset(&self, col: i64, row: i64) -> (i64, i64) {
        (col * self.xsep, row * self.ysep)
    }

    /// Footprint of the whole array given the footprint of element (0, 0).
    pub fn bbox(&self, first: Rect) -> Rect {
        let (dx, dy) = self.element_offset(self.columns() - 1, self.rows() - 1);
        first.union(&first.translate(dx, dy))
    }

    /// Inclusive column and row ranges of elements whose footprint overlaps
    /// `area`, given the footprint of element (0, 0).
    pub fn elements_overlapping(&self, first: Rect, area: Rect) -> Option<((i64, i64), (i64, i64))> {
        let cols = overlapping_steps(first.xmin, first.xmax, self.xsep, self.columns(), area.xmin, area.xmax)?;
        let rows = overlapping_steps(first.ymin, first.ymax, self.ysep, self.rows(), area.ymin, area.ymax)?;
        Some((cols, rows))
    }
}

/// Steps `k` in `0..n` for which `[lo, hi) + k * sep` overlaps `[a_lo, a_hi)`.
fn overlapping_steps(lo: i64, hi: i64, sep: i64, n: i64, a_lo: i64, a_hi: i64) -> Option<(i64, i64)> {
    if n <= 0 || lo >= hi || a_lo >= a_hi {
        return None;
    }
    let (first, last) = if sep == 0 {
        if lo < a_hi && hi > a_lo {
            (0, n - 1)
        } else {
            return None;
        }
    } else if sep > 0 {
        ((a_lo - hi).div_euclid(sep) + 1, ceil_div(a_hi - lo, sep) - 1)
    } else {
        let s = -sep;
        let (j0, j1) = ((a_lo - hi).div_euclid(s) + 1, ceil_div(a_hi - lo, s) - 1);
        (-j1, -j0)
    };
    let (first, last) = (first.max(0), last.min(n - 1));
    (first <= last).then_some((first, last))
}

fn ceil_div(a: i64, b: i64) -> i64 {
    -((-a).div_euclid(b))
}

/// A reference to a subcell placed within a parent cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellInstance {
    pub id: Uuid,
    pub cell_id: CellId,
    pub instance_name: String,
    pub transform: Transform,
    pub array: Option<ArraySpec>,
}

impl CellInstance {
    pub fn new(cell_id: CellId, instance_name: &str, transform: Transform) -> Self {
        Self {
            id: Uuid::new_v4(),
            cell_id,
            instance_name: instance_name.to_string(),
            transform,
            array: None,
        }
    }

    pub fn arrayed(mut self, array: ArraySpec) -> Self {
        self.array = Some(array);
        self
    }

    /// Child-to-parent transform of one array element.
    pub fn element_transform(&self, col: i64, row: i64) -> Transform {
        match &self.array {
            Some(a) => {
                let (dx, dy) = a.element_offset(col, row);
                self.transform.translated(dx, dy)
            }
            None => self.transform,
        }
    }

    /// Parent-coordinate footprint of the placement, given the child's bbox.
    pub fn footprint(&self, child_bbox: Rect) -> Rect {
        let first = self.transform.apply_rect(&child_bbox);
        match &self.array {
            Some(a) => a.bbox(first),
            None => first,
        }
    }

    /// Elements whose footprint overlaps `area`, as `(col, row)` pairs.
    pub fn elements_in(&self, child_bbox: Rect, area: Rect) -> Vec<(i64, i64)> {
        let first = self.transform.apply_rect(&child_bbox);
        match &self.array {
            None => {
                if first.overlaps(&area) {
                    vec![(0, 0)]
                } else {
                    Vec::new()
                }
            }
            Some(a) => match a.elements_overlapping(first, area) {
                Some(((c0, c1), (r0, r1))) => (r0..=r1)
                    .flat_map(|r| (c0..=c1).map(move |c| (c, r)))
                    .collect(),
                None => Vec::new(),
            },
        }
    }
}

/// Back-reference from a cell to one placement of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    pub parent: CellId,
    pub instance: Uuid,
}

/// A layout cell: painted geometry, subcell placements, and the check state
/// kept alongside them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub name: String,
    pub flags: CellFlags,
    /// Painted geometry, one layer mask per tile.
    pub paint: TilePlane<LayerMask>,
    pub instances: Vec<CellInstance>,
    /// Every placement of this cell, maintained by the database.
    pub parents: Vec<ParentRef>,
    /// Areas waiting to be rechecked.
    pub dirty: TilePlane<DirtyMask>,
    /// Current rule violations.
    pub errors: TilePlane<ErrorSet>,
    /// Bounding box of paint and placements; `None` while empty.
    pub bbox: Option<Rect>,
    pub modified: bool,
}

impl Cell {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            flags: CellFlags::default(),
            paint: TilePlane::new(),
            instances: Vec::new(),
            parents: Vec::new(),
            dirty: TilePlane::new(),
            errors: TilePlane::new(),
            bbox: None,
            modified: false,
        }
    }

    pub fn with_flags(mut self, flags: CellFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn paint_layer(&mut self, rect: Rect, layer: LayerId) {
        let add = LayerMask::single(layer);
        self.paint
            .paint(rect, |old| Some(old.copied().unwrap_or_default() | add));
        self.modified = true;
    }

    pub fn erase_layer(&mut self, rect: Rect, layer: LayerId) {
        self.paint.paint(rect, |old| {
            old.map(|m| m.without(layer)).filter(|m| !m.is_empty())
        });
        self.modified = true;
    }

    /// Pieces of `area` where `layer` is currently painted.
    pub fn layer_rects_in(&self, area: Rect, layer: LayerId) -> Vec<Rect> {
        self.paint
            .search(area)
            .filter(|t| t.value.contains(layer))
            .filter_map(|t| t.rect.intersection(&area))
            .collect()
    }

    pub fn paint_bbox(&self) -> Option<Rect> {
        self.paint.bbox()
    }

    pub fn instance(&self, id: &Uuid) -> Option<&CellInstance> {
        self.instances.iter().find(|i| i.id == *id)
    }

    pub fn instance_mut(&mut self, id: &Uuid) -> Option<&mut CellInstance> {
        self.instances.iter_mut().find(|i| i.id == *id)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn has_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }
}

/// Union of placement footprints and paint, used for bbox recomputation.
pub(crate) fn combined_bbox(paint: Option<Rect>, footprints: impl IntoIterator<Item = Rect>) -> Option<Rect> {
    let mut acc = paint;
    for r in footprints {
        geometry::include(&mut acc, r);
    }
    acc
}
