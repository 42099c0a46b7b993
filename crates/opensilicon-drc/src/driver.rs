//! The continuous driver: drains pending work one checkerboard square at a
//! time, between host idle callbacks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use opensilicon_core::{CellId, ErrorKindSet, LayoutDatabase, Rect};

use crate::checker::Checker;
use crate::error::DrcError;
use crate::partition::SquareWork;

/// Where the driver is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Nothing in progress.
    Idle,
    Running,
    /// Stopped between squares with work left.
    Yielded,
}

/// Host-side cancellation flag, sampled before each square.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// How a call to [`Checker::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing is pending any more.
    Completed { squares: usize },
    /// Stopped at a square boundary; call again to resume.
    Cancelled { squares: usize },
}

impl RunOutcome {
    pub fn squares(&self) -> usize {
        match self {
            RunOutcome::Completed { squares } | RunOutcome::Cancelled { squares } => *squares,
        }
    }
}

/// Receiver of redisplay requests: called at most once per checked square,
/// with the area whose error content changed and the kinds involved.
pub trait Redisplay {
    fn notify_changed(&mut self, cell: &CellId, area: Rect, kinds: ErrorKindSet);
}

/// Ignores every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRedisplay;

impl Redisplay for NullRedisplay {
    fn notify_changed(&mut self, _cell: &CellId, _area: Rect, _kinds: ErrorKindSet) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedisplayNotice {
    pub cell: CellId,
    pub area: Rect,
    pub kinds: ErrorKindSet,
}

/// Keeps every request, in order.
#[derive(Debug, Clone, Default)]
pub struct RecordingRedisplay {
    pub notices: Vec<RedisplayNotice>,
}

impl RecordingRedisplay {
    pub fn clear(&mut self) {
        self.notices.clear();
    }
}

impl Redisplay for RecordingRedisplay {
    fn notify_changed(&mut self, cell: &CellId, area: Rect, kinds: ErrorKindSet) {
        self.notices.push(RedisplayNotice {
            cell: *cell,
            area,
            kinds,
        });
    }
}

impl Checker {
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Check one square of the front pending cell. Returns `false` when
    /// nothing is left to do.
    ///
    /// If the square fails, nothing is committed and it stays dirty.
    pub fn step(&mut self, db: &mut LayoutDatabase, redisplay: &mut dyn Redisplay) -> Result<bool, DrcError> {
        let Some((cell_id, work)) = self.next_square(db)? else {
            self.state = DriverState::Idle;
            return Ok(false);
        };

        self.state = DriverState::Running;
        if let Err(e) = self.process_square(db, &cell_id, work, redisplay) {
            log::warn!("DRC of {:?} in cell {} failed: {}", work.square, cell_id, e);
            self.state = DriverState::Idle;
            return Err(e);
        }
        self.state = if self.scheduler.pending().is_empty() {
            DriverState::Idle
        } else {
            DriverState::Yielded
        };
        Ok(true)
    }

    /// The next square to check. Cells that were deleted or whose dirty
    /// plane is exhausted are dropped from pending on the way, and the
    /// bounding box of an exhausted cell is recomputed.
    fn next_square(&mut self, db: &mut LayoutDatabase) -> Result<Option<(CellId, SquareWork)>, DrcError> {
        loop {
            let Some(cell_id) = self.scheduler.front() else {
                return Ok(None);
            };
            let Some(cell) = db.get_cell(&cell_id) else {
                log::debug!("Dropping deleted cell {} from pending", cell_id);
                self.scheduler.drop_pending(&cell_id);
                continue;
            };
            if let Some(work) = self.board.next_work(&cell.dirty) {
                return Ok(Some((cell_id, work)));
            }
            log::debug!("Finished checking {}", cell.name);
            self.scheduler.drop_pending(&cell_id);
            let _quiet = db.undo_log().suspend();
            db.recompute_bbox(&cell_id)?;
        }
    }

    /// Check squares until nothing is pending or `cancel` is raised. The
    /// token is only looked at between squares; a square in progress is
    /// always committed.
    pub fn run(
        &mut self,
        db: &mut LayoutDatabase,
        redisplay: &mut dyn Redisplay,
        cancel: &CancelToken,
    ) -> Result<RunOutcome, DrcError> {
        let mut squares = 0;
        loop {
            // Settle finished cells first so that a cancel after the last
            // square still reports completion.
            if self.next_square(db)?.is_none() {
                break;
            }
            if cancel.is_cancelled() {
                self.state = DriverState::Yielded;
                log::debug!("DRC cancelled after {} square(s)", squares);
                return Ok(RunOutcome::Cancelled { squares });
            }
            if !self.step(db, redisplay)? {
                break;
            }
            squares += 1;
        }
        self.state = DriverState::Idle;
        if squares > 0 {
            log::info!("DRC pass complete: {} square(s) checked", squares);
        }
        Ok(RunOutcome::Completed { squares })
    }

    /// Run to completion, ignoring cancellation. Returns the number of
    /// squares checked.
    pub fn catch_up(&mut self, db: &mut LayoutDatabase, redisplay: &mut dyn Redisplay) -> Result<usize, DrcError> {
        let mut squares = 0;
        while self.step(db, redisplay)? {
            squares += 1;
        }
        Ok(squares)
    }
}
