use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cell::CellId;
use crate::geometry::Rect;

// ── Dirty marks ──────────────────────────────────────────────────────

/// Why an area needs rechecking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirtyKind {
    /// Geometry painted directly in the cell changed.
    PaintChanged,
    /// Something below the cell changed (instance placed, moved, or a
    /// child's content changed).
    SubtreeChanged,
}

impl DirtyKind {
    fn bit(self) -> u8 {
        match self {
            DirtyKind::PaintChanged => 0b01,
            DirtyKind::SubtreeChanged => 0b10,
        }
    }
}

/// Set of [`DirtyKind`]s stored on a dirty tile. Overlapping marks combine
/// by union, so the kind of a tile never loses information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct DirtyMask(u8);

impl DirtyMask {
    pub const EMPTY: DirtyMask = DirtyMask(0);

    pub fn of(kind: DirtyKind) -> Self {
        DirtyMask(kind.bit())
    }

    pub fn with(self, kind: DirtyKind) -> Self {
        DirtyMask(self.0 | kind.bit())
    }

    pub fn union(self, other: DirtyMask) -> Self {
        DirtyMask(self.0 | other.0)
    }

    pub fn contains(&self, kind: DirtyKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

// ── Error codes ──────────────────────────────────────────────────────

/// Classification of a stored error tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Found checking a cell's own paint.
    PaintRuleViolation,
    /// Found checking flattened geometry where subcells interact.
    InteractionRuleViolation,
    /// Found by the exact-overlap validator.
    AbutmentMismatch,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 3] = [
        ErrorKind::PaintRuleViolation,
        ErrorKind::InteractionRuleViolation,
        ErrorKind::AbutmentMismatch,
    ];

    fn bit(self) -> u8 {
        match self {
            ErrorKind::PaintRuleViolation => 0b001,
            ErrorKind::InteractionRuleViolation => 0b010,
            ErrorKind::AbutmentMismatch => 0b100,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::PaintRuleViolation => "paint",
            ErrorKind::InteractionRuleViolation => "interaction",
            ErrorKind::AbutmentMismatch => "abutment",
        };
        f.write_str(s)
    }
}

/// Identifies the rule that produced an error. Values below
/// [`RuleRef::FIRST_BUILTIN`] index into the rule deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleRef(pub u32);

impl RuleRef {
    pub const FIRST_BUILTIN: u32 = 0xFFFF_FF00;
    /// Subcell geometry disagrees across an exact overlap.
    pub const SUBCELL_OVERLAP: RuleRef = RuleRef(0xFFFF_FF00);
    /// Array elements disagree where they overlap.
    pub const ARRAY_OVERLAP: RuleRef = RuleRef(0xFFFF_FF01);

    pub fn is_builtin(&self) -> bool {
        self.0 >= Self::FIRST_BUILTIN
    }
}

/// One error class stored on an error tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ErrorCode {
    pub kind: ErrorKind,
    pub rule: RuleRef,
}

impl ErrorCode {
    pub fn new(kind: ErrorKind, rule: RuleRef) -> Self {
        Self { kind, rule }
    }
}

/// The set of codes on one error tile. Never empty while stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ErrorSet(BTreeSet<ErrorCode>);

impl ErrorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(code: ErrorCode) -> Self {
        let mut set = BTreeSet::new();
        set.insert(code);
        ErrorSet(set)
    }

    pub fn insert(&mut self, code: ErrorCode) {
        self.0.insert(code);
    }

    pub fn union(&self, other: &ErrorSet) -> ErrorSet {
        ErrorSet(self.0.union(&other.0).copied().collect())
    }

    pub fn contains(&self, code: &ErrorCode) -> bool {
        self.0.contains(code)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ErrorCode> {
        self.0.iter()
    }

    /// Kinds present in this set.
    pub fn kinds(&self) -> ErrorKindSet {
        self.0
            .iter()
            .fold(ErrorKindSet::EMPTY, |acc, c| acc.with(c.kind))
    }

    pub fn has_kind_in(&self, kinds: ErrorKindSet) -> bool {
        self.0.iter().any(|c| kinds.contains(c.kind))
    }
}

/// Set of [`ErrorKind`]s, used for redisplay notices and queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ErrorKindSet(u8);

impl ErrorKindSet {
    pub const EMPTY: ErrorKindSet = ErrorKindSet(0);
    pub const ALL: ErrorKindSet = ErrorKindSet(0b111);

    pub fn of(kind: ErrorKind) -> Self {
        ErrorKindSet(kind.bit())
    }

    pub fn with(self, kind: ErrorKind) -> Self {
        ErrorKindSet(self.0 | kind.bit())
    }

    pub fn union(self, other: ErrorKindSet) -> Self {
        ErrorKindSet(self.0 | other.0)
    }

    pub fn contains(&self, kind: ErrorKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

// ── Damage ───────────────────────────────────────────────────────────

/// An area of a cell invalidated by an edit, in that cell's coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Damage {
    pub cell: CellId,
    pub area: Rect,
    pub kind: DirtyKind,
}

impl Damage {
    pub fn new(cell: CellId, area: Rect, kind: DirtyKind) -> Self {
        Self { cell, area, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirty_mask_union_keeps_both_kinds() {
        let m = DirtyMask::of(DirtyKind::PaintChanged).union(DirtyMask::of(DirtyKind::SubtreeChanged));
        assert!(m.contains(DirtyKind::PaintChanged));
        assert!(m.contains(DirtyKind::SubtreeChanged));
        assert!(DirtyMask::EMPTY.is_empty());
    }

    #[test]
    fn test_error_set_union_and_kinds() {
        let a = ErrorSet::single(ErrorCode::new(ErrorKind::PaintRuleViolation, RuleRef(0)));
        let b = ErrorSet::single(ErrorCode::new(ErrorKind::AbutmentMismatch, RuleRef::SUBCELL_OVERLAP));
        let u = a.union(&b);
        assert_eq!(u.len(), 2);
        let kinds = u.kinds();
        assert!(kinds.contains(ErrorKind::PaintRuleViolation));
        assert!(!kinds.contains(ErrorKind::InteractionRuleViolation));
        assert!(u.has_kind_in(ErrorKindSet::of(ErrorKind::AbutmentMismatch)));
    }

    #[test]
    fn test_builtin_rule_refs() {
        assert!(RuleRef::SUBCELL_OVERLAP.is_builtin());
        assert!(RuleRef::ARRAY_OVERLAP.is_builtin());
        assert!(!RuleRef(3).is_builtin());
    }
}
