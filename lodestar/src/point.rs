//! 2D pixel-space points with an explicit validity flag.
//!
//! A `Point` starts out invalid; assigning either coordinate marks it valid.
//! Points are plain value types, copied freely and never shared mutably.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

/// A 2D position in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    x: f64,
    y: f64,
    valid: bool,
}

impl Point {
    /// Create a valid point at the given coordinates.
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, valid: true }
    }

    /// Create an invalid point. Coordinates read as zero until assigned.
    pub fn invalid() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            valid: false,
        }
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    /// Assign the X coordinate. Marks the point valid.
    pub fn set_x(&mut self, x: f64) {
        self.x = x;
        self.valid = true;
    }

    /// Assign the Y coordinate. Marks the point valid.
    pub fn set_y(&mut self, y: f64) {
        self.y = y;
        self.valid = true;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Distance from the origin (vector magnitude).
    pub fn norm(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Angle of the vector from `other` to `self`, in radians.
    pub fn angle(&self, other: &Point) -> f64 {
        (self.y - other.y).atan2(self.x - other.x)
    }

    /// Angle of this point treated as a vector from the origin, in radians.
    pub fn theta(&self) -> f64 {
        self.y.atan2(self.x)
    }
}

impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            valid: self.valid && rhs.valid,
        }
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            valid: self.valid && rhs.valid,
        }
    }
}

impl Mul<f64> for Point {
    type Output = Point;

    fn mul(self, rhs: f64) -> Point {
        Point {
            x: self.x * rhs,
            y: self.y * rhs,
            valid: self.valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_three_four_five_distance() {
        let a = Point::new(3.0, 0.0);
        let b = Point::new(0.0, 4.0);
        assert_eq!(a.distance(&b), 5.0);
        assert_eq!(b.distance(&a), 5.0);
    }

    #[test]
    fn test_validity_lifecycle() {
        let mut p = Point::invalid();
        assert!(!p.is_valid());

        p.set_x(10.0);
        assert!(p.is_valid());

        p.invalidate();
        assert!(!p.is_valid());

        p.set_y(-2.5);
        assert!(p.is_valid());
    }

    #[test]
    fn test_arithmetic_preserves_validity() {
        let a = Point::new(1.0, 2.0);
        let b = Point::new(3.0, 5.0);

        let sum = a + b;
        assert!(sum.is_valid());
        assert_eq!(sum.x(), 4.0);
        assert_eq!(sum.y(), 7.0);

        let diff = b - a;
        assert_eq!(diff.x(), 2.0);
        assert_eq!(diff.y(), 3.0);

        let invalid = a + Point::invalid();
        assert!(!invalid.is_valid());
    }

    #[test]
    fn test_angle_quadrants() {
        let origin = Point::new(0.0, 0.0);
        assert_abs_diff_eq!(Point::new(1.0, 0.0).angle(&origin), 0.0);
        assert_abs_diff_eq!(
            Point::new(0.0, 1.0).angle(&origin),
            std::f64::consts::FRAC_PI_2
        );
        assert_abs_diff_eq!(
            Point::new(-1.0, 0.0).angle(&origin),
            std::f64::consts::PI
        );
    }

    #[test]
    fn test_norm_and_theta() {
        let p = Point::new(3.0, 4.0);
        assert_abs_diff_eq!(p.norm(), 5.0);
        assert_abs_diff_eq!(p.theta(), (4.0f64 / 3.0).atan());
    }

    #[test]
    fn test_scale() {
        let p = Point::new(1.5, -2.0) * 2.0;
        assert_eq!(p.x(), 3.0);
        assert_eq!(p.y(), -4.0);
    }
}
