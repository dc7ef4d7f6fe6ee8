#![forbid(unsafe_code)]

//! Half-open index ranges.
//!
//! Every index computation in the hierarchy layer races client-reported
//! scroll positions against server-side tree mutations, so all arithmetic
//! here saturates and clamps instead of panicking.

use std::fmt;

/// A half-open range `[start, end)` over row or child indices.
///
/// The constructors normalise `end < start` to an empty range at `start`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Range {
    start: usize,
    end: usize,
}

impl Range {
    /// Create a range from `start` with `length` elements.
    #[inline]
    pub const fn with_length(start: usize, length: usize) -> Self {
        Self {
            start,
            end: start.saturating_add(length),
        }
    }

    /// Create a range between `start` (inclusive) and `end` (exclusive).
    #[inline]
    pub const fn between(start: usize, end: usize) -> Self {
        if end < start {
            Self { start, end: start }
        } else {
            Self { start, end }
        }
    }

    /// An empty range at `start`.
    #[inline]
    pub const fn empty(start: usize) -> Self {
        Self { start, end: start }
    }

    /// First index (inclusive).
    #[inline]
    pub const fn start(&self) -> usize {
        self.start
    }

    /// One past the last index.
    #[inline]
    pub const fn end(&self) -> usize {
        self.end
    }

    /// Number of indices covered.
    #[inline]
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the range covers nothing.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether `index` lies inside the range.
    #[inline]
    pub const fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }

    /// Whether the two ranges share at least one index.
    #[inline]
    pub const fn intersects(&self, other: &Range) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The overlapping part of two ranges, empty if they are disjoint.
    pub fn intersection(&self, other: &Range) -> Range {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        Range::between(start, end.max(start))
    }

    /// Clamp the range to `[0, len)`.
    pub fn clamp_to(&self, len: usize) -> Range {
        let start = self.start.min(len);
        Range::between(start, self.end.min(len))
    }

    /// Shift the range forward by `delta`.
    pub fn offset_by(&self, delta: usize) -> Range {
        Range::with_length(self.start.saturating_add(delta), self.len())
    }

    /// Shift the range backward by `delta`, saturating at zero.
    pub fn offset_back(&self, delta: usize) -> Range {
        let start = self.start.saturating_sub(delta);
        let end = self.end.saturating_sub(delta);
        Range::between(start, end)
    }

    /// The parts of `self` not covered by `other`, as `(before, after)`.
    ///
    /// Either part may be empty. If the ranges are disjoint, `self` is
    /// returned whole on the side it falls on.
    pub fn difference(&self, other: &Range) -> (Range, Range) {
        if !self.intersects(other) {
            return if self.end <= other.start {
                (*self, Range::empty(self.end))
            } else {
                (Range::empty(self.start), *self)
            };
        }
        let before = Range::between(self.start, other.start.max(self.start));
        let after = Range::between(other.end.min(self.end), self.end);
        (before, after)
    }

    /// Iterate the covered indices.
    pub fn iter(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }
}

impl fmt::Debug for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

impl From<std::ops::Range<usize>> for Range {
    fn from(r: std::ops::Range<usize>) -> Self {
        Range::between(r.start, r.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_length_and_between_agree() {
        assert_eq!(Range::with_length(3, 4), Range::between(3, 7));
        assert_eq!(Range::with_length(3, 4).len(), 4);
    }

    #[test]
    fn reversed_bounds_are_empty() {
        let r = Range::between(9, 2);
        assert!(r.is_empty());
        assert_eq!(r.start(), 9);
    }

    #[test]
    fn with_length_saturates() {
        let r = Range::with_length(usize::MAX - 1, 10);
        assert_eq!(r.end(), usize::MAX);
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn contains_is_half_open() {
        let r = Range::between(2, 5);
        assert!(!r.contains(1));
        assert!(r.contains(2));
        assert!(r.contains(4));
        assert!(!r.contains(5));
    }

    #[test]
    fn intersection_of_disjoint_is_empty() {
        let a = Range::between(0, 3);
        let b = Range::between(5, 8);
        assert!(!a.intersects(&b));
        assert!(a.intersection(&b).is_empty());
    }

    #[test]
    fn intersection_of_overlapping() {
        let a = Range::between(0, 6);
        let b = Range::between(4, 10);
        assert_eq!(a.intersection(&b), Range::between(4, 6));
    }

    #[test]
    fn clamp_to_length() {
        assert_eq!(Range::between(3, 20).clamp_to(10), Range::between(3, 10));
        assert!(Range::between(12, 20).clamp_to(10).is_empty());
    }

    #[test]
    fn offset_back_saturates_at_zero() {
        assert_eq!(Range::between(2, 6).offset_back(4), Range::between(0, 2));
        assert_eq!(Range::between(2, 6).offset_by(4), Range::between(6, 10));
    }

    #[test]
    fn difference_splits_around_other() {
        let old = Range::between(0, 50);
        let new = Range::between(20, 70);
        let (before, after) = old.difference(&new);
        assert_eq!(before, Range::between(0, 20));
        assert!(after.is_empty());

        let (before, after) = Range::between(0, 100).difference(&Range::between(40, 60));
        assert_eq!(before, Range::between(0, 40));
        assert_eq!(after, Range::between(60, 100));
    }

    #[test]
    fn difference_of_disjoint_keeps_self() {
        let (before, after) = Range::between(0, 10).difference(&Range::between(20, 30));
        assert_eq!(before, Range::between(0, 10));
        assert!(after.is_empty());

        let (before, after) = Range::between(40, 50).difference(&Range::between(20, 30));
        assert!(before.is_empty());
        assert_eq!(after, Range::between(40, 50));
    }
}
