//! Dirty-region bookkeeping: marking areas for recheck, propagating them up
//! the hierarchy, and the pending-cell list the driver drains.

use std::collections::{BTreeMap, HashMap};

use opensilicon_core::{CellId, Damage, DbError, DirtyKind, DirtyMask, LayoutDatabase, Rect};

use crate::error::DrcError;
use crate::flatten::placements_under;

/// Cells with outstanding dirty area, most recently marked first. Each cell
/// appears at most once.
#[derive(Debug, Default)]
pub struct PendingSet {
    order: BTreeMap<u64, CellId>,
    index: HashMap<CellId, u64>,
    next_seq: u64,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `cell` or move it to the front.
    pub fn touch(&mut self, cell: CellId) {
        if let Some(seq) = self.index.remove(&cell) {
            self.order.remove(&seq);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, cell);
        self.index.insert(cell, seq);
    }

    pub fn remove(&mut self, cell: &CellId) -> bool {
        match self.index.remove(cell) {
            Some(seq) => {
                self.order.remove(&seq);
                true
            }
            None => false,
        }
    }

    pub fn front(&self) -> Option<CellId> {
        self.order.values().next_back().copied()
    }

    pub fn contains(&self, cell: &CellId) -> bool {
        self.index.contains_key(cell)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Pending cells, front first.
    pub fn iter(&self) -> impl Iterator<Item = CellId> + '_ {
        self.order.values().rev().copied()
    }
}

/// Marks dirty areas and keeps the pending set.
#[derive(Debug)]
pub struct Scheduler {
    pending: PendingSet,
    halo: i64,
    max_depth: usize,
}

impl Scheduler {
    pub fn new(halo: i64, max_depth: usize) -> Self {
        Self {
            pending: PendingSet::new(),
            halo,
            max_depth,
        }
    }

    pub fn pending(&self) -> &PendingSet {
        &self.pending
    }

    /// Mark `area` of `cell` for recheck and propagate the change to every
    /// cell that uses it, transformed into each parent's coordinates.
    ///
    /// Empty areas and cells excluded from checking are ignored.
    pub fn mark_dirty(
        &mut self,
        db: &mut LayoutDatabase,
        cell: &CellId,
        area: Rect,
        kind: DirtyKind,
    ) -> Result<(), DrcError> {
        let _quiet = db.undo_log().suspend();
        self.mark_at(db, cell, area, kind, 0)
    }

    /// Mark the area an edit reported.
    pub fn mark_damage(&mut self, db: &mut LayoutDatabase, damage: &Damage) -> Result<(), DrcError> {
        self.mark_dirty(db, &damage.cell, damage.area, damage.kind)
    }

    fn mark_at(
        &mut self,
        db: &mut LayoutDatabase,
        cell_id: &CellId,
        area: Rect,
        kind: DirtyKind,
        depth: usize,
    ) -> Result<(), DrcError> {
        if area.is_empty() {
            return Ok(());
        }
        if depth > self.max_depth {
            return Err(DbError::HierarchyTooDeep {
                cell: *cell_id,
                depth: self.max_depth,
            }
            .into());
        }
        let cell = db.cell_mut(cell_id)?;
        if cell.flags.excluded_from_checks() {
            return Ok(());
        }

        let mark = DirtyMask::of(kind);
        cell.dirty
            .paint(area.expand(self.halo), |old| Some(old.copied().unwrap_or_default().union(mark)));
        log::trace!("Marked {:?} dirty in {} ({:?})", area, cell.name, kind);

        self.mark_parents_at(db, cell_id, area, depth)?;
        // Touched last so that a cell is checked before the cells using it.
        self.pending.touch(*cell_id);
        Ok(())
    }

    /// Mark `area` of `cell` dirty in every cell that places it, leaving
    /// `cell` itself alone. Used when a commit changed errors the parents
    /// copy up.
    pub fn mark_users(&mut self, db: &mut LayoutDatabase, cell: &CellId, area: Rect) -> Result<(), DrcError> {
        if area.is_empty() {
            return Ok(());
        }
        let _quiet = db.undo_log().suspend();
        self.mark_parents_at(db, cell, area, 0)
    }

    fn mark_parents_at(
        &mut self,
        db: &mut LayoutDatabase,
        cell_id: &CellId,
        area: Rect,
        depth: usize,
    ) -> Result<(), DrcError> {
        let parents = db.cell(cell_id)?.parents.clone();
        for parent_ref in parents {
            let inst = db.instance(&parent_ref.parent, &parent_ref.instance)?;
            let parent_area = match &inst.array {
                None => inst.transform.apply_rect(&area),
                Some(array) => {
                    let first = inst.transform.apply_rect(&area);
                    let (dx, dy) = array.element_offset(array.columns() - 1, array.rows() - 1);
                    first.union(&first.translate(dx, dy))
                }
            };
            self.mark_at(db, &parent_ref.parent, parent_area, DirtyKind::SubtreeChanged, depth + 1)?;
        }
        Ok(())
    }

    /// Force a recheck of `area` (in `cell`'s coordinates) in `cell` and every
    /// cell placed under it, without propagating upward.
    pub fn recheck_area(&mut self, db: &mut LayoutDatabase, cell: &CellId, area: Rect) -> Result<(), DrcError> {
        let _quiet = db.undo_log().suspend();
        let targets = placements_under(db, cell, area, self.max_depth)?;

        let mark = DirtyMask::of(DirtyKind::PaintChanged);
        for (id, to_root) in targets {
            let local = to_root.inverse().apply_rect(&area);
            let c = db.cell_mut(&id)?;
            if c.flags.excluded_from_checks() {
                continue;
            }
            let Some(bbox) = c.bbox else { continue };
            let Some(dirty) = local.intersection(&bbox.expand(self.halo)) else {
                continue;
            };
            c.dirty
                .paint(dirty, |old| Some(old.copied().unwrap_or_default().union(mark)));
            self.pending.touch(id);
        }
        Ok(())
    }

    /// Remove a cell from pending once its dirty plane is empty.
    pub fn drop_pending(&mut self, cell: &CellId) -> bool {
        self.pending.remove(cell)
    }

    pub fn front(&self) -> Option<CellId> {
        self.pending.front()
    }
}
