use serde::{Deserialize, Serialize};

/// Tolerance used when comparing stored crop/rotation values.
pub const GEOMETRY_EPSILON: f64 = 1e-6;

/// Proportional crop rectangle, each field a fraction of the rotated
/// image's bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Default for CropBounds {
    fn default() -> Self {
        Self::FULL
    }
}

impl CropBounds {
    pub const FULL: CropBounds = CropBounds {
        min_x: 0.0,
        min_y: 0.0,
        max_x: 1.0,
        max_y: 1.0,
    };

    /// Build a crop rectangle, clamping to the unit square and reflecting
    /// degenerate axes (`max <= min`) to `max = 1 - min`.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        let (min_x, max_x) = normalize_axis(min_x, max_x);
        let (min_y, max_y) = normalize_axis(min_y, max_y);
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn is_full(&self) -> bool {
        self.approx_eq(&Self::FULL)
    }

    pub fn approx_eq(&self, other: &CropBounds) -> bool {
        (self.min_x - other.min_x).abs() < GEOMETRY_EPSILON
            && (self.min_y - other.min_y).abs() < GEOMETRY_EPSILON
            && (self.max_x - other.max_x).abs() < GEOMETRY_EPSILON
            && (self.max_y - other.max_y).abs() < GEOMETRY_EPSILON
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

fn normalize_axis(min: f64, max: f64) -> (f64, f64) {
    let min = clamp_unit(min);
    let max = clamp_unit(max);
    if max > min {
        return (min, max);
    }
    // Reflect around the centre of the axis.
    let reflected = 1.0 - min;
    if reflected > min {
        (min, reflected)
    } else if reflected < min {
        (reflected, min)
    } else {
        (0.0, 1.0)
    }
}

/// Rotation angles are compared modulo a full turn.
pub fn same_rotation(a: f64, b: f64) -> bool {
    let diff = (a - b).rem_euclid(360.0);
    diff < GEOMETRY_EPSILON || (360.0 - diff) < GEOMETRY_EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_bounds_are_kept() {
        let crop = CropBounds::new(0.1, 0.2, 0.8, 0.9);
        assert_eq!(crop.min_x, 0.1);
        assert_eq!(crop.max_y, 0.9);
        assert!((crop.width() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_inverted_axis_is_reflected() {
        let crop = CropBounds::new(0.2, 0.3, 0.1, 0.3);
        assert!((crop.max_x - 0.8).abs() < 1e-9);
        assert!((crop.max_y - 0.7).abs() < 1e-9);
        assert!(crop.width() > 0.0 && crop.height() > 0.0);
    }

    #[test]
    fn test_reflection_past_centre_mirrors_axis() {
        let crop = CropBounds::new(0.7, 0.5, 0.2, 0.5);
        assert!((crop.min_x - 0.3).abs() < 1e-9);
        assert!((crop.max_x - 0.7).abs() < 1e-9);
        assert_eq!((crop.min_y, crop.max_y), (0.0, 1.0));
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let crop = CropBounds::new(-0.5, -1.0, 1.5, 2.0);
        assert!(crop.is_full());
    }

    #[test]
    fn test_rotation_comparison_wraps() {
        assert!(same_rotation(0.0, 360.0));
        assert!(same_rotation(-90.0, 270.0));
        assert!(!same_rotation(90.0, 180.0));
    }
}
