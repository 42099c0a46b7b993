use opensilicon_core::geometry;
use opensilicon_core::{ErrorKindSet, ErrorSet, Rect, TilePlane};

/// Error content of one spot before and after a recheck.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct DiffMark {
    before: ErrorSet,
    after: ErrorSet,
}

impl DiffMark {
    fn changed(&self) -> bool {
        self.before != self.after
    }
}

/// Scratch plane that finds the smallest area to redisplay after a square
/// has been rechecked.
#[derive(Debug, Default)]
pub struct DiffStore {
    plane: TilePlane<DiffMark>,
}

/// What changed in a square.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorDiff {
    /// Bounding box of the symmetric difference, clipped to the square.
    pub area: Rect,
    /// Kinds present on either side of a change.
    pub kinds: ErrorKindSet,
}

impl DiffStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new diff: remember the error content of `square`.
    pub fn snapshot(&mut self, errors: &TilePlane<ErrorSet>, square: Rect) {
        self.plane.clear();
        for tile in errors.search(square) {
            if let Some(r) = tile.rect.intersection(&square) {
                let before = tile.value.clone();
                self.plane.fill(
                    r,
                    DiffMark {
                        before,
                        after: ErrorSet::new(),
                    },
                );
            }
        }
    }

    /// Record the error content of `square` after the recheck.
    pub fn record(&mut self, errors: &TilePlane<ErrorSet>, square: Rect) {
        for tile in errors.search(square) {
            if let Some(r) = tile.rect.intersection(&square) {
                let after = tile.value.clone();
                self.plane.paint(r, |old| {
                    Some(DiffMark {
                        before: old.map(|m| m.before.clone()).unwrap_or_default(),
                        after: after.clone(),
                    })
                });
            }
        }
    }

    /// The changed area, or `None` if the square's content is unchanged.
    pub fn changes(&self, square: Rect) -> Option<ErrorDiff> {
        let mut area = None;
        let mut kinds = ErrorKindSet::EMPTY;
        for tile in self.plane.search(square).filter(|t| t.value.changed()) {
            if let Some(r) = tile.rect.intersection(&square) {
                geometry::include(&mut area, r);
                kinds = kinds.union(tile.value.before.kinds()).union(tile.value.after.kinds());
            }
        }
        area.map(|area| ErrorDiff { area, kinds })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opensilicon_core::{ErrorCode, ErrorKind, RuleRef};

    fn set(kind: ErrorKind, rule: u32) -> ErrorSet {
        ErrorSet::single(ErrorCode::new(kind, RuleRef(rule)))
    }

    #[test]
    fn test_unchanged_content_reports_nothing() {
        let mut errors: TilePlane<ErrorSet> = TilePlane::new();
        errors.fill(Rect::new(10, 10, 20, 20), set(ErrorKind::PaintRuleViolation, 0));
        let square = Rect::new(0, 0, 100, 100);

        let mut diff = DiffStore::new();
        diff.snapshot(&errors, square);
        // Rewrite the same content in two pieces.
        errors.erase(square);
        errors.fill(Rect::new(10, 10, 15, 20), set(ErrorKind::PaintRuleViolation, 0));
        errors.fill(Rect::new(15, 10, 20, 20), set(ErrorKind::PaintRuleViolation, 0));
        diff.record(&errors, square);
        assert_eq!(diff.changes(square), None);
    }

    #[test]
    fn test_symmetric_difference_bbox() {
        let mut errors: TilePlane<ErrorSet> = TilePlane::new();
        errors.fill(Rect::new(10, 10, 20, 20), set(ErrorKind::PaintRuleViolation, 0));
        errors.fill(Rect::new(50, 50, 60, 60), set(ErrorKind::PaintRuleViolation, 0));
        let square = Rect::new(0, 0, 100, 100);

        let mut diff = DiffStore::new();
        diff.snapshot(&errors, square);
        errors.erase(Rect::new(50, 50, 60, 60));
        errors.fill(Rect::new(70, 5, 80, 8), set(ErrorKind::AbutmentMismatch, 1));
        diff.record(&errors, square);

        let changes = diff.changes(square).unwrap();
        assert_eq!(changes.area, Rect::new(50, 5, 80, 60));
        assert!(changes.kinds.contains(ErrorKind::PaintRuleViolation));
        assert!(changes.kinds.contains(ErrorKind::AbutmentMismatch));
        assert!(!changes.kinds.contains(ErrorKind::InteractionRuleViolation));
    }

    #[test]
    fn test_changed_rule_on_same_area_counts() {
        let mut errors: TilePlane<ErrorSet> = TilePlane::new();
        errors.fill(Rect::new(10, 10, 20, 20), set(ErrorKind::PaintRuleViolation, 0));
        let square = Rect::new(0, 0, 100, 100);

        let mut diff = DiffStore::new();
        diff.snapshot(&errors, square);
        errors.fill(Rect::new(10, 10, 20, 20), set(ErrorKind::PaintRuleViolation, 1));
        diff.record(&errors, square);
        assert_eq!(diff.changes(square).map(|c| c.area), Some(Rect::new(10, 10, 20, 20)));
    }
}
