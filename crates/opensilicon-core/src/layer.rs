use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

use serde::{Deserialize, Serialize};

/// A unique layer identifier. Valid ids are below [`LayerMask::CAPACITY`].
pub type LayerId = u32;

/// A set of layers, one bit per [`LayerId`].
///
/// Paint tiles carry a mask rather than a single layer so that material from
/// several layers can share an area.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct LayerMask(u64);

impl LayerMask {
    pub const CAPACITY: LayerId = 64;
    pub const EMPTY: LayerMask = LayerMask(0);
    pub const ALL: LayerMask = LayerMask(u64::MAX);

    /// Mask holding only `layer`. Ids outside the capacity yield an empty mask.
    pub fn single(layer: LayerId) -> Self {
        if layer < Self::CAPACITY {
            LayerMask(1 << layer)
        } else {
            LayerMask::EMPTY
        }
    }

    pub fn from_layers<I: IntoIterator<Item = LayerId>>(layers: I) -> Self {
        layers
            .into_iter()
            .fold(LayerMask::EMPTY, |m, l| m | LayerMask::single(l))
    }

    pub fn contains(&self, layer: LayerId) -> bool {
        layer < Self::CAPACITY && self.0 & (1 << layer) != 0
    }

    pub fn intersects(&self, other: LayerMask) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn with(self, layer: LayerId) -> Self {
        self | LayerMask::single(layer)
    }

    pub fn without(self, layer: LayerId) -> Self {
        self & !LayerMask::single(layer)
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Layers in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = LayerId> + '_ {
        (0..Self::CAPACITY).filter(move |l| self.contains(*l))
    }
}

impl BitOr for LayerMask {
    type Output = LayerMask;
    fn bitor(self, rhs: LayerMask) -> LayerMask {
        LayerMask(self.0 | rhs.0)
    }
}

impl BitAnd for LayerMask {
    type Output = LayerMask;
    fn bitand(self, rhs: LayerMask) -> LayerMask {
        LayerMask(self.0 & rhs.0)
    }
}

impl Not for LayerMask {
    type Output = LayerMask;
    fn not(self) -> LayerMask {
        LayerMask(!self.0)
    }
}

impl fmt::Debug for LayerMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
