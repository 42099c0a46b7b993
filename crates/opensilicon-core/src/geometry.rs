use serde::{Deserialize, Serialize};

/// A 2D point in layout coordinates (database units).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0, y: 0 };

    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    pub fn translate(&self, dx: i64, dy: i64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// An axis-aligned rectangle covering `[xmin, xmax) x [ymin, ymax)`.
///
/// A rectangle with `xmin >= xmax` or `ymin >= ymax` covers no area. Two
/// rectangles that only share an edge do not overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rect {
    pub xmin: i64,
    pub ymin: i64,
    pub xmax: i64,
    pub ymax: i64,
}

impl Rect {
    /// Build a rectangle from two opposite corners in any order.
    pub fn new(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self {
            xmin: x1.min(x2),
            ymin: y1.min(y2),
            xmax: x1.max(x2),
            ymax: y1.max(y2),
        }
    }

    pub fn from_points(a: Point, b: Point) -> Self {
        Self::new(a.x, a.y, b.x, b.y)
    }

    pub fn lower_left(&self) -> Point {
        Point::new(self.xmin, self.ymin)
    }

    pub fn upper_right(&self) -> Point {
        Point::new(self.xmax, self.ymax)
    }

    pub fn width(&self) -> i64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> i64 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width() * self.height()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.xmin >= self.xmax || self.ymin >= self.ymax
    }

    /// True if `other` lies entirely inside this rectangle.
    pub fn surrounds(&self, other: &Rect) -> bool {
        other.xmin >= self.xmin
            && other.xmax <= self.xmax
            && other.ymin >= self.ymin
            && other.ymax <= self.ymax
    }

    /// True if the two rectangles share a non-zero area.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.xmin < other.xmax
            && self.xmax > other.xmin
            && self.ymin < other.ymax
            && self.ymax > other.ymin
    }

    /// The common area of the two rectangles, if any.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let r = Rect {
            xmin: self.xmin.max(other.xmin),
            ymin: self.ymin.max(other.ymin),
            xmax: self.xmax.min(other.xmax),
            ymax: self.ymax.min(other.ymax),
        };
        (!r.is_empty()).then_some(r)
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            xmin: self.xmin.min(other.xmin),
            ymin: self.ymin.min(other.ymin),
            xmax: self.xmax.max(other.xmax),
            ymax: self.ymax.max(other.ymax),
        }
    }

    /// Grow (or shrink, for negative `d`) every side by `d`.
    pub fn expand(&self, d: i64) -> Rect {
        Rect {
            xmin: self.xmin - d,
            ymin: self.ymin - d,
            xmax: self.xmax + d,
            ymax: self.ymax + d,
        }
    }

    pub fn translate(&self, dx: i64, dy: i64) -> Rect {
        Rect {
            xmin: self.xmin + dx,
            ymin: self.ymin + dy,
            xmax: self.xmax + dx,
            ymax: self.ymax + dy,
        }
    }

    /// The parts of `self` not covered by `other`, as at most four
    /// non-overlapping rectangles (bottom, top, left, right).
    pub fn subtract(&self, other: &Rect) -> Vec<Rect> {
        let Some(cut) = self.intersection(other) else {
            return if self.is_empty() { Vec::new() } else { vec![*self] };
        };
        let mut out = Vec::with_capacity(4);
        if cut.ymin > self.ymin {
            out.push(Rect { ymax: cut.ymin, ..*self });
        }
        if cut.ymax < self.ymax {
            out.push(Rect { ymin: cut.ymax, ..*self });
        }
        if cut.xmin > self.xmin {
            out.push(Rect {
                xmin: self.xmin,
                ymin: cut.ymin,
                xmax: cut.xmin,
                ymax: cut.ymax,
            });
        }
        if cut.xmax < self.xmax {
            out.push(Rect {
                xmin: cut.xmax,
                ymin: cut.ymin,
                xmax: self.xmax,
                ymax: cut.ymax,
            });
        }
        out
    }

    /// Swap the x and y axes.
    pub fn transposed(&self) -> Rect {
        Rect {
            xmin: self.ymin,
            ymin: self.xmin,
            xmax: self.ymax,
            ymax: self.xmax,
        }
    }
}

/// Grow `acc` to include `r`; an empty accumulator becomes `r`.
pub fn include(acc: &mut Option<Rect>, r: Rect) {
    if r.is_empty() {
        return;
    }
    *acc = Some(match acc {
        Some(a) => a.union(&r),
        None => r,
    });
}

/// Decompose a set of non-overlapping rectangles into maximal horizontal
/// strips, merging vertically where strips share the same x extent.
///
/// The result depends only on the covered point set, never on how it was
/// cut into the input rectangles.
pub fn maximal_strips(rects: &[Rect]) -> Vec<Rect> {
    let mut ys: Vec<i64> = rects
        .iter()
        .filter(|r| !r.is_empty())
        .flat_map(|r| [r.ymin, r.ymax])
        .collect();
    ys.sort_unstable();
    ys.dedup();

    let mut out: Vec<Rect> = Vec::new();
    let mut open: Vec<((i64, i64), usize)> = Vec::new();
    for band in ys.windows(2) {
        let (y0, y1) = (band[0], band[1]);
        let mut spans: Vec<(i64, i64)> = rects
            .iter()
            .filter(|r| !r.is_empty() && r.ymin <= y0 && r.ymax >= y1)
            .map(|r| (r.xmin, r.xmax))
            .collect();
        spans.sort_unstable();

        let mut merged: Vec<(i64, i64)> = Vec::with_capacity(spans.len());
        for (x0, x1) in spans {
            match merged.last_mut() {
                Some(last) if x0 <= last.1 => last.1 = last.1.max(x1),
                _ => merged.push((x0, x1)),
            }
        }

        let mut next_open = Vec::with_capacity(merged.len());
        for span in merged {
            let continued = open
                .iter()
                .find(|(s, idx)| *s == span && out[*idx].ymax == y0)
                .map(|(_, idx)| *idx);
            match continued {
                Some(idx) => {
                    out[idx].ymax = y1;
                    next_open.push((span, idx));
                }
                None => {
                    out.push(Rect {
                        xmin: span.0,
                        ymin: y0,
                        xmax: span.1,
                        ymax: y1,
                    });
                    next_open.push((span, out.len() - 1));
                }
            }
        }
        open = next_open;
    }
    out.sort_unstable_by_key(|r| (r.ymin, r.xmin));
    out
}

/// Quarter-turn rotation applied by a [`Transform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

/// A Manhattan placement transform: mirror, then rotate, then translate.
///
/// Stored as an integer orthogonal matrix so transforms compose and invert
/// exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transform {
    /// Row-major 2x2 orientation matrix.
    matrix: [[i64; 2]; 2],
    /// Translation offset.
    pub offset: Point,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        matrix: [[1, 0], [0, 1]],
        offset: Point::ORIGIN,
    };

    pub fn translate(x: i64, y: i64) -> Self {
        Self {
            offset: Point::new(x, y),
            ..Self::IDENTITY
        }
    }

    /// Build a transform from its parts: optional mirror about the X axis,
    /// a rotation, and an offset.
    pub fn new(mirror_x: bool, rotation: Rotation, offset: Point) -> Self {
        let m = if mirror_x { [[1, 0], [0, -1]] } else { [[1, 0], [0, 1]] };
        let r = match rotation {
            Rotation::R0 => [[1, 0], [0, 1]],
            Rotation::R90 => [[0, -1], [1, 0]],
            Rotation::R180 => [[-1, 0], [0, -1]],
            Rotation::R270 => [[0, 1], [-1, 0]],
        };
        Self {
            matrix: mul(&r, &m),
            offset,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    pub fn apply(&self, point: &Point) -> Point {
        let [[a, b], [c, d]] = self.matrix;
        Point::new(
            a * point.x + b * point.y + self.offset.x,
            c * point.x + d * point.y + self.offset.y,
        )
    }

    pub fn apply_rect(&self, rect: &Rect) -> Rect {
        Rect::from_points(self.apply(&rect.lower_left()), self.apply(&rect.upper_right()))
    }

    /// The transform that undoes this one.
    pub fn inverse(&self) -> Transform {
        // Orthogonal matrix: the inverse is the transpose.
        let [[a, b], [c, d]] = self.matrix;
        let matrix = [[a, c], [b, d]];
        let ox = -(matrix[0][0] * self.offset.x + matrix[0][1] * self.offset.y);
        let oy = -(matrix[1][0] * self.offset.x + matrix[1][1] * self.offset.y);
        Transform {
            matrix,
            offset: Point::new(ox, oy),
        }
    }

    /// `self` followed by `outer`: maps a point through `self` first.
    pub fn then(&self, outer: &Transform) -> Transform {
        let matrix = mul(&outer.matrix, &self.matrix);
        Transform {
            matrix,
            offset: outer.apply(&self.offset),
        }
    }

    /// Shift the translation part by a parent-coordinate delta.
    pub fn translated(&self, dx: i64, dy: i64) -> Transform {
        Transform {
            matrix: self.matrix,
            offset: self.offset.translate(dx, dy),
        }
    }
}

fn mul(l: &[[i64; 2]; 2], r: &[[i64; 2]; 2]) -> [[i64; 2]; 2] {
    [
        [
            l[0][0] * r[0][0] + l[0][1] * r[1][0],
            l[0][0] * r[0][1] + l[0][1] * r[1][1],
        ],
        [
            l[1][0] * r[0][0] + l[1][1] * r[1][0],
            l[1][0] * r[0][1] + l[1][1] * r[1][1],
        ],
    ]
}
