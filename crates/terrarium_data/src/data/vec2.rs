use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// A 2D vector in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn length_squared(&self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    #[must_use]
    pub fn length(&self) -> f64 {
        self.length_squared().sqrt()
    }

    /// Normalizes the vector, returning zero for near-zero inputs.
    #[must_use]
    pub fn normalized_or_zero(&self) -> Vec2 {
        let magnitude_sq = self.length_squared();
        if magnitude_sq < 1e-10 {
            return Vec2::ZERO;
        }
        let inv = 1.0 / magnitude_sq.sqrt();
        Vec2::new(self.x * inv, self.y * inv)
    }

    /// Scales the vector down so its length does not exceed `max_length`.
    ///
    /// A non-positive `max_length` collapses the vector to zero.
    #[must_use]
    pub fn clamp_length(&self, max_length: f64) -> Vec2 {
        if max_length <= 0.0 {
            return Vec2::ZERO;
        }
        let magnitude_sq = self.length_squared();
        if magnitude_sq <= max_length * max_length {
            return *self;
        }
        if magnitude_sq <= 1e-18 {
            return Vec2::ZERO;
        }
        let inv = max_length / magnitude_sq.sqrt();
        Vec2::new(self.x * inv, self.y * inv)
    }

    /// Heading angle in radians, 0 for near-zero vectors.
    #[must_use]
    pub fn heading(&self) -> f64 {
        if self.length_squared() < 1e-12 {
            return 0.0;
        }
        self.y.atan2(self.x)
    }
}

impl Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Vec2) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Vec2 {
    fn sub_assign(&mut self, rhs: Vec2) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl Mul<f64> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f64) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vec2 {
    type Output = Vec2;
    fn neg(self) -> Vec2 {
        Vec2::new(-self.x, -self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_or_zero_handles_tiny_vectors() {
        assert_eq!(Vec2::new(1e-8, 0.0).normalized_or_zero(), Vec2::ZERO);
        let unit = Vec2::new(3.0, 4.0).normalized_or_zero();
        assert!((unit.length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_clamp_length_preserves_short_vectors() {
        let v = Vec2::new(1.0, 2.0);
        assert_eq!(v.clamp_length(10.0), v);
    }

    #[test]
    fn test_clamp_length_scales_long_vectors() {
        let clamped = Vec2::new(30.0, 40.0).clamp_length(5.0);
        assert!((clamped.length() - 5.0).abs() < 1e-12);
        assert!((clamped.x - 3.0).abs() < 1e-12);
        assert!((clamped.y - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_clamp_length_zero_max_collapses() {
        assert_eq!(Vec2::new(1.0, 1.0).clamp_length(0.0), Vec2::ZERO);
    }

    #[test]
    fn test_heading_matches_atan2() {
        assert_eq!(Vec2::ZERO.heading(), 0.0);
        let h = Vec2::new(0.0, 2.0).heading();
        assert!((h - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }
}
