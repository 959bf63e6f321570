//! Geometry primitives for composition
//!
//! Rectangles, sizes and 2D transforms used throughout the output pipeline.
//! Coordinates are integer pixels in the space named by the caller (layer
//! stack space before a projection is applied, output space after).
//!
//! # Example
//!
//! ```
//! use flinger::geometry::{Orientation, Rect, Transform};
//!
//! let rot = Transform::from_orientation(Orientation::ROT_90, 100, 200);
//! let bounds = rot.transform_rect(&Rect::new(0, 0, 200, 100));
//! assert_eq!(bounds, Rect::new(0, 0, 100, 200));
//! ```

pub mod region;


pub use region::Region;

use bitflags::bitflags;
use cgmath::{Deg, InnerSpace, Matrix3, SquareMatrix, Vector3};
use serde::{Deserialize, Serialize};

/// Width/height pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}

/// Axis-aligned integer rectangle, right/bottom exclusive
///
/// A rectangle is empty when `right <= left` or `bottom <= top`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const EMPTY: Rect = Rect {
        left: 0,
        top: 0,
        right: 0,
        bottom: 0,
    };

    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rectangle anchored at the origin covering `size`
    pub const fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn width(&self) -> i32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width(), self.height())
    }

    pub fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    /// Area in pixels (zero for empty rectangles)
    pub fn area(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            let width = i64::from(self.right) - i64::from(self.left);
            let height = i64::from(self.bottom) - i64::from(self.top);
            width as u64 * height as u64
        }
    }

    /// Checks if this rectangle shares any pixel with another
    pub fn intersects(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.left < other.right
            && other.left < self.right
            && self.top < other.bottom
            && other.top < self.bottom
    }

    /// Computes the intersection of two rectangles
    ///
    /// Returns `None` if they don't overlap.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        if !self.intersects(other) {
            return None;
        }

        Some(Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        ))
    }

    /// Smallest rectangle containing both (empty inputs are ignored)
    pub fn bounding_union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }

        Rect::new(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }

    /// Checks if this rectangle completely contains another
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.left && x < self.right && y >= self.top && y < self.bottom
    }

    pub fn offset(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
    }

    /// Splits `self - other` into at most four disjoint rectangles
    pub(crate) fn subtract_rect(&self, other: &Rect) -> Vec<Rect> {
        let Some(cut) = self.intersection(other) else {
            return if self.is_empty() { Vec::new() } else { vec![*self] };
        };

        let mut pieces = Vec::with_capacity(4);
        // Full-width bands above and below the cut, then the two side pieces.
        if cut.top > self.top {
            pieces.push(Rect::new(self.left, self.top, self.right, cut.top));
        }
        if cut.bottom < self.bottom {
            pieces.push(Rect::new(self.left, cut.bottom, self.right, self.bottom));
        }
        if cut.left > self.left {
            pieces.push(Rect::new(self.left, cut.top, cut.left, cut.bottom));
        }
        if cut.right < self.right {
            pieces.push(Rect::new(cut.right, cut.top, self.right, cut.bottom));
        }
        pieces
    }

    pub fn to_float_rect(&self) -> FloatRect {
        FloatRect::new(
            self.left as f32,
            self.top as f32,
            self.right as f32,
            self.bottom as f32,
        )
    }
}

/// Floating point rectangle used for render engine geometry
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FloatRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl FloatRect {
    pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }
}

bitflags! {
    /// Right-angle rotation and flip flags of a transform
    ///
    /// Transforms that are not rect preserving report `ROT_INVALID`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Orientation: u32 {
        const ROT_0 = 0x0000_0000;
        const FLIP_H = 0x0000_0001;
        const FLIP_V = 0x0000_0002;
        const ROT_90 = 0x0000_0004;
        const ROT_180 = Self::FLIP_H.bits() | Self::FLIP_V.bits();
        const ROT_270 = Self::ROT_180.bits() | Self::ROT_90.bits();
        const ROT_INVALID = 0x0000_0080;
    }
}

/// 2D affine transform
///
/// Maps `(x, y)` to `(a*x + b*y + tx, c*x + d*y + ty)`, stored as a
/// homogeneous column-major [`Matrix3`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    matrix: Matrix3<f32>,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    pub fn from_matrix(a: f32, b: f32, c: f32, d: f32, tx: f32, ty: f32) -> Self {
        Self {
            matrix: Matrix3::new(a, c, 0.0, b, d, 0.0, tx, ty, 1.0),
        }
    }

    pub fn translate(tx: f32, ty: f32) -> Self {
        Self::from_matrix(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self::from_matrix(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    /// Builds an orientation transform for content of `width` x `height`
    /// (measured after the transform is applied) so that the result stays
    /// anchored at the origin.
    pub fn from_orientation(flags: Orientation, width: i32, height: i32) -> Self {
        if flags.contains(Orientation::ROT_INVALID) {
            return Self::identity();
        }

        let (w, h) = (width as f32, height as f32);
        let flip_h = flags.contains(Orientation::FLIP_H);
        let flip_v = flags.contains(Orientation::FLIP_V);

        if flags.contains(Orientation::ROT_90) {
            // x' = -y + w, y' = x; flips negate the output rows.
            let (b, tx) = if flip_h { (1.0, 0.0) } else { (-1.0, w) };
            let (c, ty) = if flip_v { (-1.0, h) } else { (1.0, 0.0) };
            Self::from_matrix(0.0, b, c, 0.0, tx, ty)
        } else {
            let (a, tx) = if flip_h { (-1.0, w) } else { (1.0, 0.0) };
            let (d, ty) = if flip_v { (-1.0, h) } else { (1.0, 0.0) };
            Self::from_matrix(a, 0.0, 0.0, d, tx, ty)
        }
    }

    /// Rotation by an arbitrary angle (degrees) about the origin
    pub fn rotation(degrees: f32) -> Self {
        Self {
            matrix: Matrix3::from_angle_z(Deg(degrees)),
        }
    }

    pub fn matrix(&self) -> &Matrix3<f32> {
        &self.matrix
    }

    /// `self` applied after `other`
    pub fn compose(&self, other: &Transform) -> Transform {
        Transform {
            matrix: self.matrix * other.matrix,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.matrix.is_identity()
    }

    /// True if axis-aligned rectangles stay axis-aligned rectangles
    pub fn preserve_rects(&self) -> bool {
        let m = &self.matrix;
        (m.y.x == 0.0 && m.x.y == 0.0) || (m.x.x == 0.0 && m.y.y == 0.0)
    }

    /// Orientation flags for this transform
    pub fn orientation(&self) -> Orientation {
        if !self.preserve_rects() {
            return Orientation::ROT_INVALID;
        }

        let m = &self.matrix;
        let mut flags = Orientation::ROT_0;
        if m.y.x == 0.0 && m.x.y == 0.0 {
            flags.set(Orientation::FLIP_H, m.x.x < 0.0);
            flags.set(Orientation::FLIP_V, m.y.y < 0.0);
        } else {
            flags |= Orientation::ROT_90;
            flags.set(Orientation::FLIP_H, m.y.x > 0.0);
            flags.set(Orientation::FLIP_V, m.x.y < 0.0);
        }
        flags
    }

    /// True if the transform scales content by anything other than one
    pub fn has_scale(&self) -> bool {
        let sx = self.matrix.x.truncate().magnitude();
        let sy = self.matrix.y.truncate().magnitude();
        (sx - 1.0).abs() > f32::EPSILON || (sy - 1.0).abs() > f32::EPSILON
    }

    pub fn map_point(&self, x: f32, y: f32) -> (f32, f32) {
        let p = self.matrix * Vector3::new(x, y, 1.0);
        (p.x, p.y)
    }

    /// Bounding box of the transformed rectangle
    pub fn transform_rect(&self, rect: &Rect) -> Rect {
        if rect.is_empty() {
            return Rect::EMPTY;
        }

        let corners = [
            self.map_point(rect.left as f32, rect.top as f32),
            self.map_point(rect.right as f32, rect.top as f32),
            self.map_point(rect.left as f32, rect.bottom as f32),
            self.map_point(rect.right as f32, rect.bottom as f32),
        ];

        let (mut l, mut t) = (f32::MAX, f32::MAX);
        let (mut r, mut b) = (f32::MIN, f32::MIN);
        for (x, y) in corners {
            l = l.min(x);
            t = t.min(y);
            r = r.max(x);
            b = b.max(y);
        }

        Rect::new(
            l.round() as i32,
            t.round() as i32,
            r.round() as i32,
            b.round() as i32,
        )
    }

    /// Transforms a region
    ///
    /// Rect preserving transforms map each rectangle; other transforms fall
    /// back to the bounding box of the whole region.
    pub fn transform_region(&self, region: &Region) -> Region {
        if self.preserve_rects() {
            let mut out = Region::new();
            for rect in region.rects() {
                out.or_rect(&self.transform_rect(rect));
            }
            out
        } else {
            Region::from_rect(self.transform_rect(&region.bounds()))
        }
    }
}
