//! Pixel regions as sets of disjoint rectangles
//!
//! A [`Region`] is the unit of currency of the coverage engine: visible,
//! opaque, covered and dirty areas are all regions. The representation is a
//! list of non-overlapping rectangles; adjacent rectangles that share a full
//! edge are merged after every mutation to keep the list short.
//!
//! Equality is semantic: two regions are equal when they cover the same
//! pixels, regardless of how the pixels are split into rectangles.
//!
//! # Example
//!
//! ```
//! use flinger::geometry::{Rect, Region};
//!
//! let mut screen = Region::from_rect(Rect::new(0, 0, 100, 100));
//! screen.subtract_rect(&Rect::new(0, 0, 100, 50));
//! assert_eq!(screen, Region::from_rect(Rect::new(0, 50, 100, 100)));
//! assert_eq!(screen.area(), 5000);
//! ```

use super::Rect;
use std::ops::{BitAnd, BitOr, Sub};

/// A set of pixels, stored as disjoint rectangles
#[derive(Debug, Clone, Default)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    /// Creates an empty region
    pub fn new() -> Self {
        Self { rects: Vec::new() }
    }

    /// Creates a region covering a single rectangle
    pub fn from_rect(rect: Rect) -> Self {
        let mut region = Self::new();
        region.set(rect);
        region
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// The disjoint rectangles making up this region
    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    /// Smallest rectangle containing the whole region
    pub fn bounds(&self) -> Rect {
        self.rects
            .iter()
            .fold(Rect::EMPTY, |acc, r| acc.bounding_union(r))
    }

    /// Number of pixels covered
    pub fn area(&self) -> u64 {
        self.rects.iter().map(Rect::area).sum()
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    /// Replaces the contents with a single rectangle
    pub fn set(&mut self, rect: Rect) {
        self.rects.clear();
        if !rect.is_empty() {
            self.rects.push(rect);
        }
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        self.rects.iter().any(|r| r.contains_point(x, y))
    }

    /// Adds a rectangle to this region
    pub fn or_rect(&mut self, rect: &Rect) {
        if rect.is_empty() {
            return;
        }

        let mut pieces = vec![*rect];
        for existing in &self.rects {
            pieces = pieces
                .iter()
                .flat_map(|p| p.subtract_rect(existing))
                .collect();
            if pieces.is_empty() {
                return;
            }
        }

        self.rects.extend(pieces);
        self.coalesce();
    }

    /// Removes a rectangle from this region
    pub fn subtract_rect(&mut self, rect: &Rect) {
        if rect.is_empty() || self.is_empty() {
            return;
        }

        self.rects = self
            .rects
            .iter()
            .flat_map(|r| r.subtract_rect(rect))
            .collect();
        self.coalesce();
    }

    /// Clips this region to a rectangle
    pub fn and_rect(&mut self, rect: &Rect) {
        self.rects = self
            .rects
            .iter()
            .filter_map(|r| r.intersection(rect))
            .collect();
        self.coalesce();
    }

    /// In-place union
    pub fn or_self(&mut self, other: &Region) {
        for rect in &other.rects {
            self.or_rect(rect);
        }
    }

    /// In-place intersection
    pub fn and_self(&mut self, other: &Region) {
        *self = self.intersect(other);
    }

    /// In-place difference
    pub fn subtract_self(&mut self, other: &Region) {
        for rect in &other.rects {
            if self.is_empty() {
                break;
            }
            self.subtract_rect(rect);
        }
    }

    pub fn union(&self, other: &Region) -> Region {
        let mut out = self.clone();
        out.or_self(other);
        out
    }

    pub fn intersect(&self, other: &Region) -> Region {
        let mut rects = Vec::new();
        for a in &self.rects {
            for b in &other.rects {
                if let Some(cut) = a.intersection(b) {
                    rects.push(cut);
                }
            }
        }

        let mut out = Region { rects };
        out.coalesce();
        out
    }

    pub fn intersect_rect(&self, rect: &Rect) -> Region {
        let mut out = self.clone();
        out.and_rect(rect);
        out
    }

    pub fn subtract(&self, other: &Region) -> Region {
        let mut out = self.clone();
        out.subtract_self(other);
        out
    }

    /// Shifts every rectangle by `(dx, dy)`
    pub fn translate(&self, dx: i32, dy: i32) -> Region {
        Region {
            rects: self.rects.iter().map(|r| r.offset(dx, dy)).collect(),
        }
    }

    /// Merges rectangles that share a full edge
    ///
    /// Alternates a sweep along each band with a sweep down each column until
    /// neither merges anything, then leaves the list sorted by scanline then x.
    fn coalesce(&mut self) {
        if self.rects.len() > 1 {
            loop {
                let joined = merge_sorted(
                    &mut self.rects,
                    |r| (r.top, r.bottom, r.left),
                    |a, b| a.top == b.top && a.bottom == b.bottom && a.right == b.left,
                );
                let stacked = merge_sorted(
                    &mut self.rects,
                    |r| (r.left, r.right, r.top),
                    |a, b| a.left == b.left && a.right == b.right && a.bottom == b.top,
                );
                if !joined && !stacked {
                    break;
                }
            }
        }
        self.rects.sort_unstable_by_key(|r| (r.top, r.left));
    }
}

/// Sorts by `key` and folds each rectangle into its predecessor when they
/// `touch`; returns whether anything merged
fn merge_sorted<K: Ord>(
    rects: &mut Vec<Rect>,
    key: impl FnMut(&Rect) -> K,
    touch: impl Fn(&Rect, &Rect) -> bool,
) -> bool {
    rects.sort_unstable_by_key(key);
    let before = rects.len();

    let mut merged: Vec<Rect> = Vec::with_capacity(before);
    for rect in rects.drain(..) {
        match merged.last_mut() {
            Some(last) if touch(last, &rect) => *last = last.bounding_union(&rect),
            _ => merged.push(rect),
        }
    }

    *rects = merged;
    rects.len() < before
}

impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        self.area() == other.area() && self.subtract(other).is_empty()
    }
}

impl Eq for Region {}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Region::from_rect(rect)
    }
}

impl<'a> IntoIterator for &'a Region {
    type Item = &'a Rect;
    type IntoIter = std::slice::Iter<'a, Rect>;

    fn into_iter(self) -> Self::IntoIter {
        self.rects.iter()
    }
}

impl BitOr for &Region {
    type Output = Region;

    fn bitor(self, rhs: &Region) -> Region {
        self.union(rhs)
    }
}

impl BitAnd for &Region {
    type Output = Region;

    fn bitand(self, rhs: &Region) -> Region {
        self.intersect(rhs)
    }
}

impl Sub for &Region {
    type Output = Region;

    fn sub(self, rhs: &Region) -> Region {
        self.subtract(rhs)
    }
}
