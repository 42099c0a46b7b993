use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::cell::{CellId, CellInstance};
use crate::database::LayoutDatabase;
use crate::error::DbError;
use crate::geometry::{self, Rect};
use crate::layer::LayerId;
use crate::marks::{Damage, DirtyKind};

/// A reversible command for the undo/redo system.
///
/// Both directions report the area they invalidated so that a checker can
/// mark it dirty.
pub trait Command: std::fmt::Debug + Send {
    /// Execute the command (apply changes to the database).
    fn execute(&mut self, db: &mut LayoutDatabase) -> Result<Option<Damage>, DbError>;
    /// Reverse the command (undo changes).
    fn undo(&mut self, db: &mut LayoutDatabase) -> Result<Option<Damage>, DbError>;
    /// Human-readable description for the undo/redo history.
    fn description(&self) -> &str;
}

// ══════════════════════════════════════════════════════════════════════
// Concrete Commands
// ══════════════════════════════════════════════════════════════════════

/// Paint one layer over a rectangle of a cell.
#[derive(Debug)]
pub struct PaintCommand {
    pub cell_id: CellId,
    pub rect: Rect,
    pub layer: LayerId,
    /// Parts of `rect` that already carried the layer (set on execute).
    covered: Vec<Rect>,
}

impl PaintCommand {
    pub fn new(cell_id: CellId, rect: Rect, layer: LayerId) -> Self {
        Self {
            cell_id,
            rect,
            layer,
            covered: Vec::new(),
        }
    }
}

impl Command for PaintCommand {
    fn execute(&mut self, db: &mut LayoutDatabase) -> Result<Option<Damage>, DbError> {
        self.covered = db.cell(&self.cell_id)?.layer_rects_in(self.rect, self.layer);
        db.paint(&self.cell_id, self.rect, self.layer)?;
        Ok(Some(Damage::new(self.cell_id, self.rect, DirtyKind::PaintChanged)))
    }

    fn undo(&mut self, db: &mut LayoutDatabase) -> Result<Option<Damage>, DbError> {
        db.erase(&self.cell_id, self.rect, self.layer)?;
        for r in &self.covered {
            db.paint(&self.cell_id, *r, self.layer)?;
        }
        Ok(Some(Damage::new(self.cell_id, self.rect, DirtyKind::PaintChanged)))
    }

    fn description(&self) -> &str {
        "Paint"
    }
}

/// Erase one layer from a rectangle of a cell.
#[derive(Debug)]
pub struct EraseCommand {
    pub cell_id: CellId,
    pub rect: Rect,
    pub layer: LayerId,
    /// The erased pieces (saved for undo).
    removed: Vec<Rect>,
}

impl EraseCommand {
    pub fn new(cell_id: CellId, rect: Rect, layer: LayerId) -> Self {
        Self {
            cell_id,
            rect,
            layer,
            removed: Vec::new(),
        }
    }
}

impl Command for EraseCommand {
    fn execute(&mut self, db: &mut LayoutDatabase) -> Result<Option<Damage>, DbError> {
        self.removed = db.cell(&self.cell_id)?.layer_rects_in(self.rect, self.layer);
        db.erase(&self.cell_id, self.rect, self.layer)?;
        Ok(Some(Damage::new(self.cell_id, self.rect, DirtyKind::PaintChanged)))
    }

    fn undo(&mut self, db: &mut LayoutDatabase) -> Result<Option<Damage>, DbError> {
        for r in &self.removed {
            db.paint(&self.cell_id, *r, self.layer)?;
        }
        Ok(Some(Damage::new(self.cell_id, self.rect, DirtyKind::PaintChanged)))
    }

    fn description(&self) -> &str {
        "Erase"
    }
}

/// Place a subcell instance in a parent.
#[derive(Debug)]
pub struct PlaceInstanceCommand {
    pub parent: CellId,
    pub instance: CellInstance,
}

impl PlaceInstanceCommand {
    pub fn new(parent: CellId, instance: CellInstance) -> Self {
        Self { parent, instance }
    }

    fn damage(&self, db: &LayoutDatabase) -> Option<Damage> {
        db.instance_bbox(&self.instance)
            .map(|area| Damage::new(self.parent, area, DirtyKind::SubtreeChanged))
    }
}

impl Command for PlaceInstanceCommand {
    fn execute(&mut self, db: &mut LayoutDatabase) -> Result<Option<Damage>, DbError> {
        db.add_instance(&self.parent, self.instance.clone())?;
        Ok(self.damage(db))
    }

    fn undo(&mut self, db: &mut LayoutDatabase) -> Result<Option<Damage>, DbError> {
        let damage = self.damage(db);
        db.remove_instance(&self.parent, &self.instance.id)?;
        Ok(damage)
    }

    fn description(&self) -> &str {
        "Place instance"
    }
}

/// Move a placed instance by a delta offset.
#[derive(Debug)]
pub struct MoveInstanceCommand {
    pub parent: CellId,
    pub instance_id: Uuid,
    pub dx: i64,
    pub dy: i64,
}

impl MoveInstanceCommand {
    pub fn new(parent: CellId, instance_id: Uuid, dx: i64, dy: i64) -> Self {
        Self {
            parent,
            instance_id,
            dx,
            dy,
        }
    }

    fn shift(&self, db: &mut LayoutDatabase, dx: i64, dy: i64) -> Result<Option<Damage>, DbError> {
        let before = db.instance_bbox(db.instance(&self.parent, &self.instance_id)?);
        db.move_instance(&self.parent, &self.instance_id, dx, dy)?;
        let after = db.instance_bbox(db.instance(&self.parent, &self.instance_id)?);

        let mut area = before;
        if let Some(r) = after {
            geometry::include(&mut area, r);
        }
        Ok(area.map(|a| Damage::new(self.parent, a, DirtyKind::SubtreeChanged)))
    }
}

impl Command for MoveInstanceCommand {
    fn execute(&mut self, db: &mut LayoutDatabase) -> Result<Option<Damage>, DbError> {
        self.shift(db, self.dx, self.dy)
    }

    fn undo(&mut self, db: &mut LayoutDatabase) -> Result<Option<Damage>, DbError> {
        self.shift(db, -self.dx, -self.dy)
    }

    fn description(&self) -> &str {
        "Move instance"
    }
}

/// Manages the undo/redo history stack.
#[derive(Debug, Default)]
pub struct CommandHistory {
    undo_stack: Vec<Box<dyn Command>>,
    redo_stack: Vec<Box<dyn Command>>,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
        }
    }

    /// A command that fails is not recorded.
    pub fn execute(&mut self, mut command: Box<dyn Command>, db: &mut LayoutDatabase) -> Result<Option<Damage>, DbError> {
        let damage = command.execute(db)?;
        self.undo_stack.push(command);
        // Executing a new command clears the redo stack.
        self.redo_stack.clear();
        Ok(damage)
    }

    pub fn undo(&mut self, db: &mut LayoutDatabase) -> Result<Option<Damage>, DbError> {
        let Some(mut command) = self.undo_stack.pop() else {
            return Ok(None);
        };
        log::debug!("Undo: {}", command.description());
        match command.undo(db) {
            Ok(damage) => {
                self.redo_stack.push(command);
                Ok(damage)
            }
            Err(e) => {
                self.undo_stack.push(command);
                Err(e)
            }
        }
    }

    pub fn redo(&mut self, db: &mut LayoutDatabase) -> Result<Option<Damage>, DbError> {
        let Some(mut command) = self.redo_stack.pop() else {
            return Ok(None);
        };
        log::debug!("Redo: {}", command.description());
        match command.execute(db) {
            Ok(damage) => {
                self.undo_stack.push(command);
                Ok(damage)
            }
            Err(e) => {
                self.redo_stack.push(command);
                Err(e)
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

/// Switch for undo recording. While any [`UndoSuspension`] is alive,
/// commands run through the database are not recorded.
#[derive(Debug, Clone, Default)]
pub struct UndoLog {
    suspended: Arc<AtomicUsize>,
}

impl UndoLog {
    /// Disable recording until the returned guard is dropped. Guards nest.
    pub fn suspend(&self) -> UndoSuspension {
        self.suspended.fetch_add(1, Ordering::SeqCst);
        UndoSuspension {
            suspended: Arc::clone(&self.suspended),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst) > 0
    }
}

/// Re-enables undo recording when dropped.
#[derive(Debug)]
#[must_use = "recording resumes as soon as the guard is dropped"]
pub struct UndoSuspension {
    suspended: Arc<AtomicUsize>,
}

impl Drop for UndoSuspension {
    fn drop(&mut self) {
        self.suspended.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use crate::geometry::Transform;

    #[test]
    fn test_paint_undo_restores_prior_paint() {
        let mut db = LayoutDatabase::new("test");
        let top = db.add_cell(Cell::new("top"));
        db.paint(&top, Rect::new(0, 0, 10, 10), 1).unwrap();

        let damage = db
            .execute_command(Box::new(PaintCommand::new(top, Rect::new(5, 0, 20, 10), 1)))
            .unwrap()
            .unwrap();
        assert_eq!(damage.kind, DirtyKind::PaintChanged);
        assert_eq!(db.get_cell(&top).unwrap().paint_bbox(), Some(Rect::new(0, 0, 20, 10)));

        db.undo().unwrap();
        assert_eq!(db.get_cell(&top).unwrap().paint_bbox(), Some(Rect::new(0, 0, 10, 10)));
    }

    #[test]
    fn test_erase_undo() {
        let mut db = LayoutDatabase::new("test");
        let top = db.add_cell(Cell::new("top"));
        db.paint(&top, Rect::new(0, 0, 10, 10), 2).unwrap();
        db.execute_command(Box::new(EraseCommand::new(top, Rect::new(0, 0, 10, 5), 2)))
            .unwrap();
        assert_eq!(db.get_cell(&top).unwrap().paint_bbox(), Some(Rect::new(0, 5, 10, 10)));
        db.undo().unwrap();
        assert_eq!(db.get_cell(&top).unwrap().paint_bbox(), Some(Rect::new(0, 0, 10, 10)));
    }

    #[test]
    fn test_place_instance_damage_and_undo() {
        let mut db = LayoutDatabase::new("test");
        let top = db.add_cell(Cell::new("top"));
        let leaf = db.add_cell(Cell::new("leaf"));
        db.paint(&leaf, Rect::new(0, 0, 4, 4), 1).unwrap();

        let inst = CellInstance::new(leaf, "u1", Transform::translate(10, 10));
        let damage = db
            .execute_command(Box::new(PlaceInstanceCommand::new(top, inst)))
            .unwrap()
            .unwrap();
        assert_eq!(damage.area, Rect::new(10, 10, 14, 14));
        assert_eq!(damage.kind, DirtyKind::SubtreeChanged);

        let undone = db.undo().unwrap().unwrap();
        assert_eq!(undone.area, Rect::new(10, 10, 14, 14));
        assert_eq!(db.get_cell(&top).unwrap().instance_count(), 0);
        assert!(db.get_cell(&leaf).unwrap().parents.is_empty());
    }

    #[test]
    fn test_failed_command_is_not_recorded() {
        let mut db = LayoutDatabase::new("test");
        let missing = CellId::new_v4();
        let result = db.execute_command(Box::new(PaintCommand::new(missing, Rect::new(0, 0, 1, 1), 1)));
        assert!(result.is_err());
        assert!(!db.can_undo());
    }

    #[test]
    fn test_suspension_nests() {
        let log = UndoLog::default();
        let outer = log.suspend();
        {
            let _inner = log.suspend();
            assert!(log.is_suspended());
        }
        assert!(log.is_suspended());
        drop(outer);
        assert!(!log.is_suspended());
    }
}
