use opensilicon_core::{DirtyMask, Point, Rect, TilePlane};

/// Fixed, origin-aligned grid that every recheck is cut into.
///
/// The square for a point depends only on the point and the step, so the
/// same physical edit always produces the same units of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkerboard {
    step: i64,
}

/// A unit of work: a grid square and the part of it that is dirty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SquareWork {
    pub square: Rect,
    /// Bounding box of dirty area inside `square`, clipped to it.
    pub erase_box: Rect,
}

impl Checkerboard {
    pub fn new(step: i64) -> Self {
        Self { step: step.max(1) }
    }

    pub fn step(&self) -> i64 {
        self.step
    }

    /// The square whose half-open extent contains `p`. Rounds toward
    /// negative infinity, so points on a grid line belong to the square
    /// above and to the right of it.
    pub fn square_containing(&self, p: Point) -> Rect {
        let x = p.x.div_euclid(self.step) * self.step;
        let y = p.y.div_euclid(self.step) * self.step;
        Rect::new(x, y, x + self.step, y + self.step)
    }

    /// Every square sharing area with `area`, bottom row first.
    pub fn squares_covering(&self, area: Rect) -> Vec<Rect> {
        if area.is_empty() {
            return Vec::new();
        }
        let first = self.square_containing(area.lower_left());
        let mut out = Vec::new();
        let mut y = first.ymin;
        while y < area.ymax {
            let mut x = first.xmin;
            while x < area.xmax {
                out.push(Rect::new(x, y, x + self.step, y + self.step));
                x += self.step;
            }
            y += self.step;
        }
        out
    }

    /// The erase-box of `square`: all dirty area inside it, as one box.
    pub fn erase_box(&self, dirty: &TilePlane<DirtyMask>, square: Rect) -> Option<Rect> {
        dirty.bbox_in(square, |m| !m.is_empty())
    }

    /// Pick the next unit of work from a dirty plane: the square holding the
    /// lower-left corner of some dirty tile.
    pub fn next_work(&self, dirty: &TilePlane<DirtyMask>) -> Option<SquareWork> {
        let tile = dirty.tiles().find(|t| !t.value.is_empty())?;
        let square = self.square_containing(tile.rect.lower_left());
        let erase_box = self.erase_box(dirty, square)?;
        Some(SquareWork { square, erase_box })
    }
}
