use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cell::{self, Cell, CellId, CellInstance, ParentRef};
use crate::commands::{Command, CommandHistory, UndoLog};
use crate::error::DbError;
use crate::geometry::{Rect, Transform};
use crate::layer::{LayerId, LayerMask};
use crate::marks::Damage;

/// One paint tile reached by a hierarchical search.
#[derive(Debug, Clone, Copy)]
pub struct TileVisit {
    /// Cell that owns the tile.
    pub cell: CellId,
    /// Maps the owning cell's coordinates to the search root's.
    pub transform: Transform,
    /// Tile rectangle in the owning cell's coordinates.
    pub rect: Rect,
    pub layers: LayerMask,
    /// Levels below the search root (0 for the root's own paint).
    pub depth: usize,
}

impl TileVisit {
    /// Tile rectangle in the search root's coordinates.
    pub fn root_rect(&self) -> Rect {
        self.transform.apply_rect(&self.rect)
    }
}

/// The central layout database that holds all cells.
#[derive(Debug, Serialize, Deserialize)]
pub struct LayoutDatabase {
    /// Database identifier.
    pub id: Uuid,
    /// Project name.
    pub name: String,
    /// All cells indexed by ID.
    cells: HashMap<CellId, Cell>,
    /// Top-level cell (entry point for hierarchy).
    pub top_cell: Option<CellId>,
    /// Command history for undo/redo.
    #[serde(skip)]
    command_history: CommandHistory,
    #[serde(skip)]
    undo_log: UndoLog,
}

impl LayoutDatabase {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            cells: HashMap::new(),
            top_cell: None,
            command_history: CommandHistory::new(),
            undo_log: UndoLog::default(),
        }
    }

    // ── Cell management ──────────────────────────────────────────────

    pub fn add_cell(&mut self, cell: Cell) -> CellId {
        let id = cell.id;
        self.cells.insert(id, cell);
        if self.top_cell.is_none() {
            self.top_cell = Some(id);
        }
        id
    }

    pub fn get_cell(&self, id: &CellId) -> Option<&Cell> {
        self.cells.get(id)
    }

    pub fn cell(&self, id: &CellId) -> Result<&Cell, DbError> {
        self.cells.get(id).ok_or(DbError::UnknownCell(*id))
    }

    pub fn cell_mut(&mut self, id: &CellId) -> Result<&mut Cell, DbError> {
        self.cells.get_mut(id).ok_or(DbError::UnknownCell(*id))
    }

    /// Remove a cell that is not placed anywhere. Its own placements are
    /// removed from their children's parent lists.
    pub fn remove_cell(&mut self, id: &CellId) -> Result<Cell, DbError> {
        let cell = self.cell(id)?;
        if !cell.parents.is_empty() {
            return Err(DbError::CellInUse(*id));
        }
        let cell = self.cells.remove(id).ok_or(DbError::UnknownCell(*id))?;
        for inst in &cell.instances {
            if let Some(child) = self.cells.get_mut(&inst.cell_id) {
                child.parents.retain(|p| p.instance != inst.id);
            }
        }
        if self.top_cell == Some(*id) {
            self.top_cell = None;
        }
        Ok(cell)
    }

    pub fn find_cell_by_name(&self, name: &str) -> Option<&Cell> {
        self.cells.values().find(|c| c.name == name)
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn all_cells(&self) -> impl Iterator<Item = &Cell> {
        self.cells.values()
    }

    // ── Paint ────────────────────────────────────────────────────────

    pub fn paint(&mut self, cell_id: &CellId, rect: Rect, layer: LayerId) -> Result<(), DbError> {
        check_layer(layer)?;
        self.cell_mut(cell_id)?.paint_layer(rect, layer);
        self.recompute_bbox(cell_id)
    }

    pub fn erase(&mut self, cell_id: &CellId, rect: Rect, layer: LayerId) -> Result<(), DbError> {
        check_layer(layer)?;
        self.cell_mut(cell_id)?.erase_layer(rect, layer);
        self.recompute_bbox(cell_id)
    }

    // ── Hierarchy ────────────────────────────────────────────────────

    /// Place `instance` inside `parent`. Fails if the placement would make
    /// the hierarchy cyclic.
    pub fn add_instance(&mut self, parent: &CellId, instance: CellInstance) -> Result<Uuid, DbError> {
        self.cell(parent)?;
        self.cell(&instance.cell_id)?;
        if instance.cell_id == *parent || self.is_descendant(&instance.cell_id, parent) {
            return Err(DbError::CycleDetected {
                parent: *parent,
                child: instance.cell_id,
            });
        }
        let id = instance.id;
        let child_id = instance.cell_id;
        self.cell_mut(&child_id)?.parents.push(ParentRef {
            parent: *parent,
            instance: id,
        });
        let p = self.cell_mut(parent)?;
        p.instances.push(instance);
        p.modified = true;
        self.recompute_bbox(parent)?;
        Ok(id)
    }

    pub fn remove_instance(&mut self, parent: &CellId, instance_id: &Uuid) -> Result<CellInstance, DbError> {
        let p = self.cell_mut(parent)?;
        let idx = p
            .instances
            .iter()
            .position(|i| i.id == *instance_id)
            .ok_or(DbError::UnknownInstance {
                cell: *parent,
                instance: *instance_id,
            })?;
        let inst = p.instances.remove(idx);
        p.modified = true;
        if let Some(child) = self.cells.get_mut(&inst.cell_id) {
            child.parents.retain(|r| r.instance != *instance_id);
        }
        self.recompute_bbox(parent)?;
        Ok(inst)
    }

    pub fn move_instance(&mut self, parent: &CellId, instance_id: &Uuid, dx: i64, dy: i64) -> Result<(), DbError> {
        let p = self.cell_mut(parent)?;
        let inst = p.instance_mut(instance_id).ok_or(DbError::UnknownInstance {
            cell: *parent,
            instance: *instance_id,
        })?;
        inst.transform = inst.transform.translated(dx, dy);
        p.modified = true;
        self.recompute_bbox(parent)
    }

    pub fn instance(&self, parent: &CellId, instance_id: &Uuid) -> Result<&CellInstance, DbError> {
        self.cell(parent)?
            .instance(instance_id)
            .ok_or(DbError::UnknownInstance {
                cell: *parent,
                instance: *instance_id,
            })
    }

    /// Parent-coordinate footprint of a placement; `None` if the child is empty.
    pub fn instance_bbox(&self, instance: &CellInstance) -> Option<Rect> {
        let child_bbox = self.cells.get(&instance.cell_id)?.bbox?;
        Some(instance.footprint(child_bbox))
    }

    pub fn parents_of(&self, cell_id: &CellId) -> Result<&[ParentRef], DbError> {
        Ok(&self.cell(cell_id)?.parents)
    }

    /// True if `target` appears anywhere below `root`.
    pub fn is_descendant(&self, root: &CellId, target: &CellId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![*root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(cell) = self.cells.get(&id) {
                for inst in &cell.instances {
                    if inst.cell_id == *target {
                        return true;
                    }
                    stack.push(inst.cell_id);
                }
            }
        }
        false
    }

    /// Recompute the bounding box of a cell and of every cell above it.
    pub fn recompute_bbox(&mut self, cell_id: &CellId) -> Result<(), DbError> {
        let mut work = vec![*cell_id];
        while let Some(id) = work.pop() {
            let cell = self.cell(&id)?;
            let footprints: Vec<Rect> = cell
                .instances
                .iter()
                .filter_map(|i| self.instance_bbox(i))
                .collect();
            let bbox = cell::combined_bbox(cell.paint_bbox(), footprints);
            let parents: Vec<CellId> = cell.parents.iter().map(|p| p.parent).collect();
            let cell = self.cell_mut(&id)?;
            if cell.bbox != bbox {
                cell.bbox = bbox;
                work.extend(parents);
            }
        }
        Ok(())
    }

    /// Visit paint tiles under `area` (root coordinates) in `root`'s own
    /// paint and every placement below it, up to `max_depth` levels down.
    ///
    /// `to_root` maps `root`'s coordinates into the frame `area` is given in.
    /// A hierarchy deeper than `max_depth` is an error rather than a silent
    /// truncation.
    pub fn search_subtree<F>(
        &self,
        root: &CellId,
        to_root: &Transform,
        area: Rect,
        max_depth: usize,
        f: &mut F,
    ) -> Result<ControlFlow<()>, DbError>
    where
        F: FnMut(TileVisit) -> ControlFlow<()>,
    {
        self.search_level(root, to_root, area, 0, max_depth, f)
    }

    fn search_level<F>(
        &self,
        cell_id: &CellId,
        to_root: &Transform,
        area: Rect,
        depth: usize,
        max_depth: usize,
        f: &mut F,
    ) -> Result<ControlFlow<()>, DbError>
    where
        F: FnMut(TileVisit) -> ControlFlow<()>,
    {
        let cell = self.cell(cell_id)?;
        let local = to_root.inverse().apply_rect(&area);
        for tile in cell.paint.search(local) {
            let visit = TileVisit {
                cell: *cell_id,
                transform: *to_root,
                rect: tile.rect,
                layers: tile.value,
                depth,
            };
            if f(visit).is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }
        for inst in &cell.instances {
            let Some(child_bbox) = self.cells.get(&inst.cell_id).and_then(|c| c.bbox) else {
                continue;
            };
            let elements = inst.elements_in(child_bbox, local);
            if elements.is_empty() {
                continue;
            }
            if depth + 1 > max_depth {
                return Err(DbError::HierarchyTooDeep {
                    cell: *cell_id,
                    depth: max_depth,
                });
            }
            for (col, row) in elements {
                let xform = inst.element_transform(col, row).then(to_root);
                if self
                    .search_level(&inst.cell_id, &xform, area, depth + 1, max_depth, f)?
                    .is_break()
                {
                    return Ok(ControlFlow::Break(()));
                }
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    // ── Undo / Redo ──────────────────────────────────────────────────

    /// Execute a command and record it for undo, unless recording is
    /// suspended. Returns the area the command invalidated.
    pub fn execute_command(&mut self, mut command: Box<dyn Command>) -> Result<Option<Damage>, DbError> {
        if self.undo_log.is_suspended() {
            return command.execute(self);
        }
        let mut history = std::mem::take(&mut self.command_history);
        let result = history.execute(command, self);
        self.command_history = history;
        result
    }

    pub fn undo(&mut self) -> Result<Option<Damage>, DbError> {
        let mut history = std::mem::take(&mut self.command_history);
        let result = history.undo(self);
        self.command_history = history;
        result
    }

    pub fn redo(&mut self) -> Result<Option<Damage>, DbError> {
        let mut history = std::mem::take(&mut self.command_history);
        let result = history.redo(self);
        self.command_history = history;
        result
    }

    pub fn can_undo(&self) -> bool {
        self.command_history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.command_history.can_redo()
    }

    pub fn undo_log(&self) -> &UndoLog {
        &self.undo_log
    }

    // ── Serialization ────────────────────────────────────────────────

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

fn check_layer(layer: LayerId) -> Result<(), DbError> {
    if layer < LayerMask::CAPACITY {
        Ok(())
    } else {
        Err(DbError::LayerOutOfRange(layer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::ArraySpec;
    use crate::commands::MoveInstanceCommand;

    #[test]
    fn test_database_create() {
        let db = LayoutDatabase::new("test_project");
        assert_eq!(db.name, "test_project");
        assert_eq!(db.cell_count(), 0);
        assert!(db.top_cell.is_none());
    }

    #[test]
    fn test_add_and_find_cell() {
        let mut db = LayoutDatabase::new("test");
        let id = db.add_cell(Cell::new("inverter"));
        assert_eq!(db.cell_count(), 1);
        assert!(db.get_cell(&id).is_some());
        assert_eq!(db.find_cell_by_name("inverter").unwrap().name, "inverter");
        assert_eq!(db.top_cell, Some(id));
    }

    #[test]
    fn test_bbox_follows_hierarchy() {
        let mut db = LayoutDatabase::new("test");
        let top = db.add_cell(Cell::new("top"));
        let leaf = db.add_cell(Cell::new("leaf"));
        db.paint(&leaf, Rect::new(0, 0, 10, 10), 1).unwrap();
        let inst = db
            .add_instance(&top, CellInstance::new(leaf, "u1", Transform::translate(100, 0)))
            .unwrap();
        assert_eq!(db.get_cell(&top).unwrap().bbox, Some(Rect::new(100, 0, 110, 10)));

        db.paint(&leaf, Rect::new(0, 0, 20, 10), 1).unwrap();
        assert_eq!(db.get_cell(&top).unwrap().bbox, Some(Rect::new(100, 0, 120, 10)));

        db.move_instance(&top, &inst, 0, 5).unwrap();
        assert_eq!(db.get_cell(&top).unwrap().bbox, Some(Rect::new(100, 5, 120, 15)));
        assert_eq!(db.parents_of(&leaf).unwrap().len(), 1);
    }

    #[test]
    fn test_cycle_rejected() {
        let mut db = LayoutDatabase::new("test");
        let a = db.add_cell(Cell::new("a"));
        let b = db.add_cell(Cell::new("b"));
        db.add_instance(&a, CellInstance::new(b, "b1", Transform::IDENTITY)).unwrap();
        let err = db.add_instance(&b, CellInstance::new(a, "a1", Transform::IDENTITY));
        assert!(matches!(err, Err(DbError::CycleDetected { .. })));
        let err = db.add_instance(&a, CellInstance::new(a, "self", Transform::IDENTITY));
        assert!(matches!(err, Err(DbError::CycleDetected { .. })));
    }

    #[test]
    fn test_remove_cell_in_use() {
        let mut db = LayoutDatabase::new("test");
        let a = db.add_cell(Cell::new("a"));
        let b = db.add_cell(Cell::new("b"));
        db.add_instance(&a, CellInstance::new(b, "b1", Transform::IDENTITY)).unwrap();
        assert!(matches!(db.remove_cell(&b), Err(DbError::CellInUse(_))));
        db.remove_cell(&a).unwrap();
        assert!(db.get_cell(&b).unwrap().parents.is_empty());
    }

    #[test]
    fn test_search_subtree_visits_array_elements() {
        let mut db = LayoutDatabase::new("test");
        let top = db.add_cell(Cell::new("top"));
        let leaf = db.add_cell(Cell::new("leaf"));
        db.paint(&leaf, Rect::new(0, 0, 5, 5), 2).unwrap();
        db.add_instance(
            &top,
            CellInstance::new(leaf, "arr", Transform::IDENTITY).arrayed(ArraySpec::grid(4, 1, 10, 0)),
        )
        .unwrap();

        let mut seen = Vec::new();
        db.search_subtree(&top, &Transform::IDENTITY, Rect::new(12, 0, 33, 5), 8, &mut |v| {
            seen.push(v.root_rect());
            ControlFlow::Continue(())
        })
        .unwrap();
        seen.sort();
        assert_eq!(seen, vec![Rect::new(10, 0, 15, 5), Rect::new(20, 0, 25, 5), Rect::new(30, 0, 35, 5)]);

        let too_deep = db.search_subtree(&top, &Transform::IDENTITY, Rect::new(0, 0, 5, 5), 0, &mut |_| {
            ControlFlow::Continue(())
        });
        assert!(matches!(too_deep, Err(DbError::HierarchyTooDeep { .. })));
    }

    #[test]
    fn test_execute_undo_redo() {
        let mut db = LayoutDatabase::new("test");
        let top = db.add_cell(Cell::new("top"));
        let leaf = db.add_cell(Cell::new("leaf"));
        db.paint(&leaf, Rect::new(0, 0, 10, 10), 1).unwrap();
        let inst = db
            .add_instance(&top, CellInstance::new(leaf, "u1", Transform::IDENTITY))
            .unwrap();

        let damage = db
            .execute_command(Box::new(MoveInstanceCommand::new(top, inst, 5, 0)))
            .unwrap()
            .unwrap();
        assert_eq!(damage.area, Rect::new(0, 0, 15, 10));
        assert!(db.can_undo());

        db.undo().unwrap();
        assert_eq!(db.get_cell(&top).unwrap().bbox, Some(Rect::new(0, 0, 10, 10)));
        assert!(db.can_redo());
        db.redo().unwrap();
        assert_eq!(db.get_cell(&top).unwrap().bbox, Some(Rect::new(5, 0, 15, 10)));
    }

    #[test]
    fn test_suspended_log_skips_history() {
        let mut db = LayoutDatabase::new("test");
        let top = db.add_cell(Cell::new("top"));
        let leaf = db.add_cell(Cell::new("leaf"));
        db.paint(&leaf, Rect::new(0, 0, 10, 10), 1).unwrap();
        let inst = db
            .add_instance(&top, CellInstance::new(leaf, "u1", Transform::IDENTITY))
            .unwrap();
        {
            let _guard = db.undo_log().suspend();
            db.execute_command(Box::new(MoveInstanceCommand::new(top, inst, 5, 0)))
                .unwrap();
        }
        assert!(!db.can_undo());
        assert!(!db.undo_log().is_suspended());
    }

    #[test]
    fn test_json_roundtrip_keeps_planes() {
        let mut db = LayoutDatabase::new("test");
        let top = db.add_cell(Cell::new("top"));
        db.paint(&top, Rect::new(0, 0, 10, 10), 4).unwrap();
        let json = db.to_json().unwrap();
        let back = LayoutDatabase::from_json(&json).unwrap();
        let cell = back.get_cell(&top).unwrap();
        assert_eq!(cell.paint_bbox(), Some(Rect::new(0, 0, 10, 10)));
        assert_eq!(cell.bbox, Some(Rect::new(0, 0, 10, 10)));
    }
}
