//! # OpenSilicon DRC
//!
//! Incremental, hierarchical design-rule checking.
//!
//! Edits mark areas of a cell dirty; the marks travel up through every
//! placement of the cell. A [`Checker`] then drains the pending cells one
//! checkerboard square at a time: it finds where placements interact,
//! flattens just those areas, evaluates the rule deck and the exact-overlap
//! layers, and swaps the square's error tiles in one step. Only the area
//! whose errors actually changed is handed to the redisplay hook.

pub mod arrays;
pub mod checker;
pub mod config;
pub mod diff;
pub mod driver;
pub mod error;
pub mod flatten;
pub mod interaction;
pub mod overlap;
pub mod partition;
pub mod report;
pub mod rules;
pub mod scheduler;
pub mod violation;

pub use checker::{CheckContext, Checker, DrcStats, Finding};
pub use config::{DrcConfig, ResolvedConfig, FULL_REDISPLAY_ENV};
pub use diff::{DiffStore, ErrorDiff};
pub use driver::{CancelToken, DriverState, NullRedisplay, RecordingRedisplay, Redisplay, RedisplayNotice, RunOutcome};
pub use error::DrcError;
pub use flatten::{FlatPaint, FlattenMode, Flattener};
pub use partition::{Checkerboard, SquareWork};
pub use report::ErrorLocation;
pub use rules::{ExactOverlap, Rule, RuleDeck, RuleEvaluator, RuleHit};
pub use scheduler::{PendingSet, Scheduler};
pub use violation::DrcViolation;
