//! The checking session: rule evaluator, resolved settings, pending set and
//! scratch buffers, plus the per-square check and commit.

use opensilicon_core::{
    CellId, Command, Damage, DirtyKind, ErrorCode, ErrorKind, ErrorKindSet, ErrorSet, LayoutDatabase, Rect,
    RuleRef, Transform,
};
use serde::Serialize;

use crate::arrays::check_arrays;
use crate::config::{DrcConfig, ResolvedConfig};
use crate::diff::DiffStore;
use crate::driver::{DriverState, Redisplay};
use crate::error::DrcError;
use crate::flatten::{FlattenMode, Flattener};
use crate::interaction::find_interactions;
use crate::overlap::validate_exact_overlaps;
use crate::partition::{Checkerboard, SquareWork};
use crate::rules::RuleEvaluator;
use crate::scheduler::{PendingSet, Scheduler};

/// Read-only inputs shared by the passes of one square.
pub struct CheckContext<'a> {
    pub db: &'a LayoutDatabase,
    pub rules: &'a dyn RuleEvaluator,
    pub halo: i64,
    pub max_depth: usize,
}

/// A violation found while checking a square, not yet committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Finding {
    pub rect: Rect,
    pub code: ErrorCode,
}

/// Counters kept over the lifetime of a checker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrcStats {
    /// Squares committed.
    pub squares: u64,
    /// Squares that needed a flattened interaction check.
    pub interaction_areas: u64,
    /// Paint-only rule evaluations.
    pub intrinsic_checks: u64,
    /// Arrayed placements examined for self-consistency.
    pub array_checks: u64,
    /// Error tiles written.
    pub error_tiles: u64,
    /// Child errors copied up into non-interacting areas.
    pub copied_errors: u64,
    pub redisplays: u64,
}

/// An incremental design-rule checking session.
///
/// Owns everything that must not be shared between sessions: the pending
/// set and the flatten and diff scratch planes. The layout database is
/// passed into each call.
pub struct Checker {
    pub(crate) rules: Box<dyn RuleEvaluator>,
    pub(crate) config: ResolvedConfig,
    pub(crate) board: Checkerboard,
    pub(crate) scheduler: Scheduler,
    pub(crate) flattener: Flattener,
    pub(crate) diff: DiffStore,
    pub(crate) stats: DrcStats,
    pub(crate) state: DriverState,
}

impl Checker {
    pub fn new(rules: Box<dyn RuleEvaluator>, config: &DrcConfig) -> Result<Self, DrcError> {
        let config = config.resolve(rules.max_distance())?;
        log::debug!(
            "DRC session: step {}, halo {}, depth guard {}",
            config.step,
            config.halo,
            config.max_depth
        );
        Ok(Self {
            rules,
            board: Checkerboard::new(config.step),
            scheduler: Scheduler::new(config.halo, config.max_depth),
            flattener: Flattener::new(),
            diff: DiffStore::new(),
            stats: DrcStats::default(),
            state: DriverState::Idle,
            config,
        })
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn rules(&self) -> &dyn RuleEvaluator {
        self.rules.as_ref()
    }

    pub fn stats(&self) -> DrcStats {
        self.stats
    }

    pub fn pending(&self) -> &PendingSet {
        self.scheduler.pending()
    }

    pub fn is_pending(&self, cell: &CellId) -> bool {
        self.scheduler.pending().contains(cell)
    }

    /// Mark `area` of `cell` for recheck. See [`Scheduler::mark_dirty`].
    pub fn mark_dirty(
        &mut self,
        db: &mut LayoutDatabase,
        cell: &CellId,
        area: Rect,
        kind: DirtyKind,
    ) -> Result<(), DrcError> {
        self.scheduler.mark_dirty(db, cell, area, kind)
    }

    pub fn mark_damage(&mut self, db: &mut LayoutDatabase, damage: &Damage) -> Result<(), DrcError> {
        self.scheduler.mark_damage(db, damage)
    }

    /// Mark the whole of `cell` for recheck.
    pub fn mark_cell(&mut self, db: &mut LayoutDatabase, cell: &CellId) -> Result<(), DrcError> {
        match db.cell(cell)?.bbox {
            Some(bbox) => self.mark_dirty(db, cell, bbox, DirtyKind::PaintChanged),
            None => Ok(()),
        }
    }

    /// Force a recheck of `area` in `cell` and everything placed under it.
    pub fn recheck_area(&mut self, db: &mut LayoutDatabase, cell: &CellId, area: Rect) -> Result<(), DrcError> {
        self.scheduler.recheck_area(db, cell, area)
    }

    /// Run an edit through the database's undo history and mark what it
    /// changed.
    pub fn execute(&mut self, db: &mut LayoutDatabase, command: Box<dyn Command>) -> Result<(), DrcError> {
        if let Some(damage) = db.execute_command(command)? {
            self.mark_damage(db, &damage)?;
        }
        Ok(())
    }

    pub fn undo(&mut self, db: &mut LayoutDatabase) -> Result<(), DrcError> {
        if let Some(damage) = db.undo()? {
            self.mark_damage(db, &damage)?;
        }
        Ok(())
    }

    pub fn redo(&mut self, db: &mut LayoutDatabase) -> Result<(), DrcError> {
        if let Some(damage) = db.redo()? {
            self.mark_damage(db, &damage)?;
        }
        Ok(())
    }

    /// Check one square of `cell` and commit the result. Nothing is written
    /// if any part of the check fails.
    pub(crate) fn process_square(
        &mut self,
        db: &mut LayoutDatabase,
        cell: &CellId,
        work: SquareWork,
        redisplay: &mut dyn Redisplay,
    ) -> Result<(), DrcError> {
        let ctx = CheckContext {
            db,
            rules: self.rules.as_ref(),
            halo: self.config.halo,
            max_depth: self.config.max_depth,
        };
        let outcome = check_square(&ctx, &mut self.flattener, cell, work)?;

        self.stats.intrinsic_checks += outcome.intrinsic_checks;
        self.stats.copied_errors += outcome.copied;
        self.stats.array_checks += outcome.arrays as u64;
        if outcome.interaction.is_some() {
            self.stats.interaction_areas += 1;
        }
        self.commit(db, cell, work, &outcome.findings, redisplay)
    }

    /// Replace the error content of the erase-box with `findings`, clear its
    /// dirty coverage and report what changed.
    fn commit(
        &mut self,
        db: &mut LayoutDatabase,
        cell_id: &CellId,
        work: SquareWork,
        findings: &[Finding],
        redisplay: &mut dyn Redisplay,
    ) -> Result<(), DrcError> {
        let _quiet = db.undo_log().suspend();
        let cell = db.cell_mut(cell_id)?;

        self.diff.snapshot(&cell.errors, work.square);
        cell.errors.erase(work.erase_box);
        for finding in findings {
            let add = ErrorSet::single(finding.code);
            cell.errors
                .paint(finding.rect, |old| Some(old.cloned().unwrap_or_default().union(&add)));
        }
        self.diff.record(&cell.errors, work.square);
        cell.dirty.erase(work.erase_box);

        let changes = self.diff.changes(work.square);
        if changes.is_some() {
            cell.modified = true;
        }
        log::trace!(
            "Checked {:?} of {}: {} error tile(s)",
            work.erase_box,
            cell.name,
            findings.len()
        );

        self.stats.squares += 1;
        self.stats.error_tiles += findings.len() as u64;
        if self.config.display_check_tiles || self.config.force_full_redisplay {
            let kinds = changes.map_or(ErrorKindSet::ALL, |c| c.kinds);
            redisplay.notify_changed(cell_id, work.square, kinds);
            self.stats.redisplays += 1;
        } else if let Some(changes) = changes {
            redisplay.notify_changed(cell_id, changes.area, changes.kinds);
            self.stats.redisplays += 1;
        }

        // Parents hold copies of these errors wherever nothing interacts.
        if let Some(changes) = changes.filter(|c| c.kinds.contains(ErrorKind::PaintRuleViolation)) {
            self.scheduler.mark_users(db, cell_id, changes.area)?;
        }
        Ok(())
    }
}

/// Everything found in one square, before anything is written.
#[derive(Debug, Default)]
pub(crate) struct SquareOutcome {
    pub findings: Vec<Finding>,
    pub interaction: Option<Rect>,
    pub intrinsic_checks: u64,
    pub copied: u64,
    pub arrays: usize,
}

/// Check the erase-box of one square. Every finding lies inside the
/// erase-box.
///
/// Interactions are looked for over the whole square, so whether a spot
/// gets the flattened check depends only on the layout and the grid, never
/// on how much of the square happened to be dirty.
pub(crate) fn check_square(
    ctx: &CheckContext<'_>,
    flattener: &mut Flattener,
    cell: &CellId,
    work: SquareWork,
) -> Result<SquareOutcome, DrcError> {
    let erase = work.erase_box;
    let mut outcome = SquareOutcome {
        interaction: find_interactions(ctx, cell, work.square)?.and_then(|i| i.intersection(&erase)),
        ..Default::default()
    };

    let quiet: Vec<Rect> = match outcome.interaction {
        None => vec![erase],
        Some(area) => erase.subtract(&area),
    };
    for piece in quiet {
        check_paint(ctx, flattener, cell, piece, &mut outcome.findings)?;
        outcome.intrinsic_checks += 1;
        outcome.copied += copy_child_errors(ctx, cell, piece, &mut outcome.findings)?;
    }

    if let Some(area) = outcome.interaction {
        let flat = flattener.flatten(ctx.db, cell, area.expand(ctx.halo), FlattenMode::Subtree, ctx.max_depth)?;
        for hit in ctx.rules.evaluate(flat, area.expand(ctx.halo), area) {
            outcome.findings.push(Finding {
                rect: hit.rect,
                code: ErrorCode::new(ErrorKind::InteractionRuleViolation, hit.rule),
            });
        }
        for rect in validate_exact_overlaps(ctx, flat, &[(*cell, Transform::IDENTITY)], area)? {
            outcome.findings.push(Finding {
                rect,
                code: ErrorCode::new(ErrorKind::AbutmentMismatch, RuleRef::SUBCELL_OVERLAP),
            });
        }
    }

    outcome.arrays = check_arrays(ctx, flattener, cell, erase, &mut outcome.findings)?;
    outcome.findings.retain(|f| erase.surrounds(&f.rect));
    outcome.findings.sort();
    outcome.findings.dedup();
    Ok(outcome)
}

/// Copy the paint-rule errors of every placement under `area` into `out`,
/// in `cell`'s coordinates. Only one level down: each child already holds
/// the copies of its own children. Returns the number of tiles copied.
fn copy_child_errors(
    ctx: &CheckContext<'_>,
    cell_id: &CellId,
    area: Rect,
    out: &mut Vec<Finding>,
) -> Result<u64, DrcError> {
    let cell = ctx.db.cell(cell_id)?;
    let mut copied = 0;
    for inst in &cell.instances {
        let child = ctx.db.cell(&inst.cell_id)?;
        let Some(child_bbox) = child.bbox else { continue };
        for (col, row) in inst.elements_in(child_bbox, area) {
            let xform = inst.element_transform(col, row);
            let local = xform.inverse().apply_rect(&area);
            for tile in child.errors.search(local) {
                let Some(r) = tile.rect.intersection(&local) else {
                    continue;
                };
                let rect = xform.apply_rect(&r);
                for code in tile.value.iter().filter(|c| c.kind == ErrorKind::PaintRuleViolation) {
                    out.push(Finding { rect, code: *code });
                    copied += 1;
                }
            }
        }
    }
    Ok(copied)
}

/// Rule check of the cell's own paint, ignoring placements.
fn check_paint(
    ctx: &CheckContext<'_>,
    flattener: &mut Flattener,
    cell: &CellId,
    area: Rect,
    out: &mut Vec<Finding>,
) -> Result<(), DrcError> {
    let work = area.expand(ctx.halo);
    let flat = flattener.flatten(ctx.db, cell, work, FlattenMode::PaintOnly, ctx.max_depth)?;
    for hit in ctx.rules.evaluate(flat, work, area) {
        out.push(Finding {
            rect: hit.rect,
            code: ErrorCode::new(ErrorKind::PaintRuleViolation, hit.rule),
        });
    }
    Ok(())
}
