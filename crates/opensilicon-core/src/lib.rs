//! # OpenSilicon Core
//!
//! Core layout database with hierarchical cell management, integer geometry,
//! R-tree backed tile planes, and undo/redo via command-pattern journal.
//!
//! Each cell carries, next to its paint, the dirty-region and error planes
//! that the incremental design-rule checker in `opensilicon-drc` maintains.

pub mod geometry;
pub mod cell;
pub mod database;
pub mod error;
pub mod layer;
pub mod marks;
pub mod commands;
pub mod spatial;

pub use database::{LayoutDatabase, TileVisit};
pub use cell::{ArraySpec, Cell, CellFlags, CellId, CellInstance, ParentRef};
pub use error::DbError;
pub use layer::{LayerId, LayerMask};
pub use geometry::{Point, Rect, Rotation, Transform};
pub use marks::{Damage, DirtyKind, DirtyMask, ErrorCode, ErrorKind, ErrorKindSet, ErrorSet, RuleRef};
pub use spatial::{PlaneTile, TilePlane};
pub use commands::{Command, UndoLog, UndoSuspension};
