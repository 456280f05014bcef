//! Extensions for `Range<T>` used by the region bookkeeping.
//!
//! [RangeExt] adds overlap checks, adjacency checks and range subtraction to the standard
//! `Range<T>` type.

use core::ops::Range;

pub trait RangeExt<T>
where
    Self: Sized,
    T: Copy + Ord,
{
    /// Check if this range overlaps with another range.
    ///
    /// Always return false if either range is empty.
    fn overlap(&self, another: &Self) -> bool;

    /// Check if the two ranges overlap or share an endpoint, so that their union is one range.
    fn touches(&self, another: &Self) -> bool;

    /// Union of two touching ranges. Returns [None] if they neither overlap nor share an endpoint.
    fn merge(&self, another: &Self) -> Option<Self>;

    /// Subtracts another range from this range, returning the remaining segments.
    /// - `[Some(left), Some(right)]`: self strictly contains rhs
    /// - `[Some(remaining), None]`: partial overlap, or no overlap (self is returned)
    /// - `[None, None]`: self is covered by rhs, or self is empty
    fn sub(&self, rhs: &Self) -> [Option<Self>; 2];
}

impl<T> RangeExt<T> for Range<T>
where
    T: Copy + Ord,
{
    #[inline(always)]
    fn overlap(&self, another: &Range<T>) -> bool {
        if self.is_empty() || another.is_empty() {
            return false;
        }
        self.start < another.end && another.start < self.end
    }

    #[inline(always)]
    fn touches(&self, another: &Range<T>) -> bool {
        self.start <= another.end && another.start <= self.end
    }

    fn merge(&self, another: &Range<T>) -> Option<Range<T>> {
        if !self.touches(another) {
            return None;
        }
        Some(self.start.min(another.start)..self.end.max(another.end))
    }

    fn sub(&self, rhs: &Range<T>) -> [Option<Range<T>>; 2] {
        if self.is_empty() {
            return [None, None];
        }
        if !self.overlap(rhs) {
            return [Some(self.clone()), None];
        }
        // [   self   )
        // [r1)[rhs)[r2)
        let left = self.start..rhs.start;
        let right = rhs.end..self.end;
        match (left.start < left.end, right.start < right.end) {
            (true, true) => [Some(left), Some(right)],
            (true, false) => [Some(left), None],
            (false, true) => [Some(right), None],
            (false, false) => [None, None],
        }
    }
}
