use std::collections::BTreeMap;
use std::fmt;

use rstar::{RTree, RTreeObject, AABB};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::geometry::{self, Rect};

/// One rectangle of a [`TilePlane`], carrying the plane's value type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaneTile<T> {
    pub rect: Rect,
    pub value: T,
}

impl<T> RTreeObject for PlaneTile<T> {
    type Envelope = AABB<[i64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.rect.xmin, self.rect.ymin],
            [self.rect.xmax, self.rect.ymax],
        )
    }
}

/// A plane of non-overlapping typed rectangles over an R-tree.
///
/// Areas with no tile are background ("space"). Every write goes through
/// [`TilePlane::paint`], which behaves like a paint table: the new value
/// of each piece of the painted area is a function of its old value.
#[derive(Clone)]
pub struct TilePlane<T> {
    tree: RTree<PlaneTile<T>>,
}

impl<T> Default for TilePlane<T> {
    fn default() -> Self {
        Self { tree: RTree::new() }
    }
}

impl<T> fmt::Debug for TilePlane<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TilePlane")
            .field("tiles", &self.tree.size())
            .finish()
    }
}

impl<T: Clone + PartialEq> TilePlane<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a plane from tiles that are already known not to overlap.
    pub fn from_tiles(tiles: Vec<PlaneTile<T>>) -> Self {
        Self {
            tree: RTree::bulk_load(tiles.into_iter().filter(|t| !t.rect.is_empty()).collect()),
        }
    }

    pub fn clear(&mut self) {
        self.tree = RTree::new();
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Number of stored tiles (not canonical; depends on paint history).
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn tiles(&self) -> impl Iterator<Item = &PlaneTile<T>> {
        self.tree.iter()
    }

    /// Tiles sharing area with `area`, unclipped.
    pub fn search(&self, area: Rect) -> impl Iterator<Item = &PlaneTile<T>> {
        let envelope = AABB::from_corners([area.xmin, area.ymin], [area.xmax, area.ymax]);
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .filter(move |t| t.rect.overlaps(&area))
    }

    /// True if any tile in `area` satisfies `pred`.
    pub fn any_in<P>(&self, area: Rect, pred: P) -> bool
    where
        P: Fn(&T) -> bool,
    {
        self.search(area).any(|t| pred(&t.value))
    }

    /// Bounding box of the parts of matching tiles that lie inside `area`.
    pub fn bbox_in<P>(&self, area: Rect, pred: P) -> Option<Rect>
    where
        P: Fn(&T) -> bool,
    {
        let mut acc = None;
        for tile in self.search(area).filter(|t| pred(&t.value)) {
            if let Some(clipped) = tile.rect.intersection(&area) {
                geometry::include(&mut acc, clipped);
            }
        }
        acc
    }

    /// Bounding box of every tile in the plane.
    pub fn bbox(&self) -> Option<Rect> {
        let mut acc = None;
        for tile in self.tree.iter() {
            geometry::include(&mut acc, tile.rect);
        }
        acc
    }

    /// Repaint `area`. `op` receives the old value of each piece (`None` for
    /// background) and returns its new value (`None` erases).
    pub fn paint<F>(&mut self, area: Rect, op: F)
    where
        F: Fn(Option<&T>) -> Option<T>,
    {
        if area.is_empty() {
            return;
        }
        let hits: Vec<PlaneTile<T>> = self.search(area).cloned().collect();
        let mut uncovered = vec![area];
        for tile in hits {
            self.tree.remove(&tile);
            for outside in tile.rect.subtract(&area) {
                self.tree.insert(PlaneTile {
                    rect: outside,
                    value: tile.value.clone(),
                });
            }
            if let Some(inside) = tile.rect.intersection(&area) {
                if let Some(value) = op(Some(&tile.value)) {
                    self.tree.insert(PlaneTile { rect: inside, value });
                }
                uncovered = uncovered
                    .iter()
                    .flat_map(|r| r.subtract(&inside))
                    .collect();
            }
        }
        if let Some(value) = op(None) {
            for rect in uncovered {
                self.tree.insert(PlaneTile {
                    rect,
                    value: value.clone(),
                });
            }
        }
    }

    /// Overwrite `area` with `value`.
    pub fn fill(&mut self, area: Rect, value: T) {
        self.paint(area, |_| Some(value.clone()));
    }

    /// Reset `area` to background.
    pub fn erase(&mut self, area: Rect) {
        self.paint(area, |_| None);
    }
}

impl<T: Clone + Ord> TilePlane<T> {
    /// The plane's content as maximal horizontal strips per value, sorted.
    ///
    /// Two planes covering the same areas with the same values produce
    /// identical output regardless of how they were painted.
    pub fn canonical_tiles(&self) -> Vec<PlaneTile<T>> {
        let mut groups: BTreeMap<T, Vec<Rect>> = BTreeMap::new();
        for tile in self.tree.iter() {
            groups.entry(tile.value.clone()).or_default().push(tile.rect);
        }
        let mut out: Vec<PlaneTile<T>> = groups
            .into_iter()
            .flat_map(|(value, rects)| {
                geometry::maximal_strips(&rects)
                    .into_iter()
                    .map(move |rect| PlaneTile {
                        rect,
                        value: value.clone(),
                    })
            })
            .collect();
        out.sort_by(|a, b| {
            (a.rect.ymin, a.rect.xmin, &a.value).cmp(&(b.rect.ymin, b.rect.xmin, &b.value))
        });
        out
    }

    /// Replace the stored tiles by their canonical decomposition.
    pub fn compact(&mut self) {
        let tiles = self.canonical_tiles();
        self.tree = RTree::bulk_load(tiles);
    }
}

impl<T: Serialize> Serialize for TilePlane<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let tiles: Vec<&PlaneTile<T>> = self.tree.iter().collect();
        tiles.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for TilePlane<T>
where
    T: DeserializeOwned + Clone + PartialEq,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tiles = Vec::<PlaneTile<T>>::deserialize(deserializer)?;
        Ok(Self::from_tiles(tiles))
    }
}
