// extent.rs — Access extents, vertical intervals and loop orders
//
// An Extent is the compile-time bounding box of offsets an access may touch,
// one inclusive range per dimension (i, j horizontal; k vertical). Every
// range contains the center point 0.
//
// Preconditions: none (value types only).
// Postconditions: none.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Bounds ──────────────────────────────────────────────────────────────────

/// Inclusive offset range `[minus, plus]` along one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct Bounds {
    pub minus: i32,
    pub plus: i32,
}

impl Bounds {
    pub const ZERO: Bounds = Bounds { minus: 0, plus: 0 };

    /// Range spanning `minus..=plus`, widened to contain the center point.
    pub fn new(minus: i32, plus: i32) -> Self {
        Bounds {
            minus: minus.min(0),
            plus: plus.max(0),
        }
    }

    /// Range touched by a single access at `offset`.
    pub fn from_offset(offset: i32) -> Self {
        Bounds::new(offset, offset)
    }

    pub fn is_pointwise(&self) -> bool {
        self.minus == 0 && self.plus == 0
    }

    pub fn merge(&mut self, other: &Bounds) {
        self.minus = self.minus.min(other.minus);
        self.plus = self.plus.max(other.plus);
    }

    /// Composition: reaching `other` from every point of `self`.
    pub fn add(&self, other: &Bounds) -> Bounds {
        Bounds {
            minus: self.minus + other.minus,
            plus: self.plus + other.plus,
        }
    }

    /// Largest distance from the center in either direction.
    pub fn max_abs(&self) -> u32 {
        self.minus.unsigned_abs().max(self.plus.unsigned_abs())
    }
}

impl From<[i32; 2]> for Bounds {
    fn from(v: [i32; 2]) -> Self {
        Bounds::new(v[0], v[1])
    }
}

impl From<Bounds> for [i32; 2] {
    fn from(b: Bounds) -> Self {
        [b.minus, b.plus]
    }
}

// ── Extent ──────────────────────────────────────────────────────────────────

/// Three-dimensional access extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Extent {
    pub i: Bounds,
    pub j: Bounds,
    pub k: Bounds,
}

/// Classification of the vertical part of an extent relative to a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VerticalLoopOrderAccess {
    /// Reads levels the sweep has already computed.
    pub loop_order: bool,
    /// Reads levels the sweep has not reached yet (true sequential dependency).
    pub counter_loop_order: bool,
}

impl Extent {
    pub fn zero() -> Self {
        Extent::default()
    }

    pub fn new(i: (i32, i32), j: (i32, i32), k: (i32, i32)) -> Self {
        Extent {
            i: Bounds::new(i.0, i.1),
            j: Bounds::new(j.0, j.1),
            k: Bounds::new(k.0, k.1),
        }
    }

    /// Extent of a single access at offset `(i, j, k)`.
    pub fn from_offset(i: i32, j: i32, k: i32) -> Self {
        Extent {
            i: Bounds::from_offset(i),
            j: Bounds::from_offset(j),
            k: Bounds::from_offset(k),
        }
    }

    pub fn is_horizontal_pointwise(&self) -> bool {
        self.i.is_pointwise() && self.j.is_pointwise()
    }

    pub fn is_vertical_pointwise(&self) -> bool {
        self.k.is_pointwise()
    }

    pub fn is_pointwise(&self) -> bool {
        self.is_horizontal_pointwise() && self.is_vertical_pointwise()
    }

    /// Union: the widest footprint of both extents.
    pub fn merge(&mut self, other: &Extent) {
        self.i.merge(&other.i);
        self.j.merge(&other.j);
        self.k.merge(&other.k);
    }

    pub fn merged(mut self, other: &Extent) -> Extent {
        self.merge(other);
        self
    }

    /// Composition of two chained accesses.
    pub fn add(&self, other: &Extent) -> Extent {
        Extent {
            i: self.i.add(&other.i),
            j: self.j.add(&other.j),
            k: self.k.add(&other.k),
        }
    }

    /// Horizontal halo in grid points.
    pub fn horizontal_halo(&self) -> u32 {
        self.i.max_abs().max(self.j.max_abs())
    }

    pub fn vertical_loop_order_accesses(&self, loop_order: LoopOrder) -> VerticalLoopOrderAccess {
        let mut access = VerticalLoopOrderAccess::default();
        if self.is_vertical_pointwise() {
            return access;
        }
        match loop_order {
            // No level is computed before another: every vertical offset races.
            LoopOrder::Parallel => {
                access.loop_order = true;
                access.counter_loop_order = true;
            }
            LoopOrder::Forward => {
                access.counter_loop_order = self.k.plus > 0;
                access.loop_order = self.k.minus < 0;
            }
            LoopOrder::Backward => {
                access.counter_loop_order = self.k.minus < 0;
                access.loop_order = self.k.plus > 0;
            }
        }
        access
    }

    /// Non-pointwise horizontally, or vertically against `loop_order`.
    pub fn is_horizontal_stencil_or_counter_loop_order(&self, loop_order: LoopOrder) -> bool {
        !self.is_horizontal_pointwise()
            || self.vertical_loop_order_accesses(loop_order).counter_loop_order
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[({},{}),({},{}),({},{})]",
            self.i.minus, self.i.plus, self.j.minus, self.j.plus, self.k.minus, self.k.plus
        )
    }
}

// ── Loop order ──────────────────────────────────────────────────────────────

/// Vertical iteration order of a multi-stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopOrder {
    #[default]
    Parallel,
    Forward,
    Backward,
}

impl LoopOrder {
    /// Can a stage with loop order `self` join a multi-stage running `other`?
    ///
    /// Parallel adapts to anything; Forward and Backward never mix.
    pub fn is_compatible_with(self, other: LoopOrder) -> bool {
        !matches!(
            (self, other),
            (LoopOrder::Forward, LoopOrder::Backward) | (LoopOrder::Backward, LoopOrder::Forward)
        )
    }
}

impl fmt::Display for LoopOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopOrder::Parallel => "parallel",
            LoopOrder::Forward => "forward",
            LoopOrder::Backward => "backward",
        };
        write!(f, "{s}")
    }
}

// ── Interval ────────────────────────────────────────────────────────────────

/// Inclusive range of vertical levels a do-method runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub lower: i32,
    pub upper: i32,
}

impl Interval {
    pub fn new(lower: i32, upper: i32) -> Self {
        assert!(lower <= upper, "interval [{lower}, {upper}] is empty");
        Interval { lower, upper }
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.lower <= other.upper && other.lower <= self.upper
    }

    /// Widen by the vertical part of an access extent.
    pub fn extended_by(&self, k: &Bounds) -> Interval {
        Interval {
            lower: self.lower + k.minus,
            upper: self.upper + k.plus,
        }
    }
}

impl Default for Interval {
    fn default() -> Self {
        Interval { lower: 0, upper: 0 }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}
