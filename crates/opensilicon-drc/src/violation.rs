use opensilicon_core::{CellId, ErrorCode, ErrorKind, Rect, RuleRef};
use serde::{Deserialize, Serialize};

use crate::rules::RuleEvaluator;

/// A single DRC violation with location and description, as reported to
/// the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrcViolation {
    /// Cell whose error plane holds the violation.
    pub cell: CellId,
    pub cell_name: String,
    pub kind: ErrorKind,
    pub rule: RuleRef,
    pub message: String,
    /// Violation area in the coordinates of the cell the query was made in.
    pub bbox: Rect,
}

impl DrcViolation {
    pub fn new(cell: CellId, cell_name: &str, code: ErrorCode, bbox: Rect, rules: &dyn RuleEvaluator) -> Self {
        Self {
            cell,
            cell_name: cell_name.to_string(),
            kind: code.kind,
            rule: code.rule,
            message: rules.describe(code.rule),
            bbox,
        }
    }

    /// True for violations that only exist because placements interact.
    pub fn is_hierarchical(&self) -> bool {
        self.kind != ErrorKind::PaintRuleViolation
    }
}
