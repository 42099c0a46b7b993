//! Queries over committed error tiles.

use std::collections::HashSet;

use opensilicon_core::{CellId, ErrorSet, LayoutDatabase, Rect, Transform};

use crate::checker::Checker;
use crate::error::DrcError;
use crate::flatten::placements_under;
use crate::violation::DrcViolation;

/// One error tile located from the top of a hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLocation {
    /// Cell whose error plane holds the tile.
    pub cell: CellId,
    /// Tile area in the root's coordinates.
    pub rect: Rect,
    pub errors: ErrorSet,
}

impl Checker {
    /// Explain the errors under `area` of `root` and every cell placed below
    /// it. Areas are clipped to `area` and given in `root`'s coordinates.
    pub fn why(&self, db: &LayoutDatabase, root: &CellId, area: Rect) -> Result<Vec<DrcViolation>, DrcError> {
        let mut out = Vec::new();
        for (cell_id, to_root) in placements_under(db, root, area, self.config.max_depth)? {
            let cell = db.cell(&cell_id)?;
            let local = to_root.inverse().apply_rect(&area);
            for tile in cell.errors.canonical_tiles() {
                let Some(clipped) = tile.rect.intersection(&local) else {
                    continue;
                };
                let bbox = to_root.apply_rect(&clipped);
                for code in tile.value.iter() {
                    out.push(DrcViolation::new(cell_id, &cell.name, *code, bbox, self.rules()));
                }
            }
        }
        out.sort_by(|a, b| {
            (a.bbox.ymin, a.bbox.xmin, a.kind, a.rule).cmp(&(b.bbox.ymin, b.bbox.xmin, b.kind, b.rule))
        });
        Ok(out)
    }

    /// Number of error tiles in `root` and every cell used below it. A cell
    /// placed many times is counted once.
    pub fn count_errors(&self, db: &LayoutDatabase, root: &CellId) -> Result<usize, DrcError> {
        let mut seen = HashSet::new();
        let mut total = 0;
        for (cell_id, _) in self.everything_under(db, root)? {
            if seen.insert(cell_id) {
                total += db.cell(&cell_id)?.errors.canonical_tiles().len();
            }
        }
        Ok(total)
    }

    /// The `n`-th error tile (from zero) reachable from `root`, counting
    /// every placement separately, in the root's coordinates.
    pub fn find_error(&self, db: &LayoutDatabase, root: &CellId, n: usize) -> Result<Option<ErrorLocation>, DrcError> {
        let mut remaining = n;
        for (cell_id, to_root) in self.everything_under(db, root)? {
            let tiles = db.cell(&cell_id)?.errors.canonical_tiles();
            if remaining >= tiles.len() {
                remaining -= tiles.len();
                continue;
            }
            let tile = &tiles[remaining];
            return Ok(Some(ErrorLocation {
                cell: cell_id,
                rect: to_root.apply_rect(&tile.rect),
                errors: tile.value.clone(),
            }));
        }
        Ok(None)
    }

    fn everything_under(
        &self,
        db: &LayoutDatabase,
        root: &CellId,
    ) -> Result<Vec<(CellId, Transform)>, DrcError> {
        let Some(bbox) = db.cell(root)?.bbox else {
            return Ok(vec![(*root, Transform::IDENTITY)]);
        };
        Ok(placements_under(db, root, bbox, self.config.max_depth)?)
    }
}
