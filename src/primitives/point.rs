// A point on the canvas. `moved` marks the point that opens a new sub-path
// (the SVG `M` command) — consecutive points whose later one has `moved set
// belong to different sub-paths and must not be connected by a line.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i64,
    pub y: i64,
    pub moved: bool,
}

impl Point {
    pub fn new(x: i64, y: i64, moved: bool) -> Self {
        Point { x, y, moved }
    }

    pub fn in_bounds(&self, x_max: u32, y_max: u32) -> bool {
        self.x >= 0 && self.y >= 0 && self.x <= x_max as i64 && self.y <= y_max as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_on_the_far_edge_is_in_bounds() {
        assert!(Point::new(100, 0, true).in_bounds(100, 100));
        assert!(Point::new(0, 100, true).in_bounds(100, 100));
    }

    #[test]
    fn test_point_one_past_the_edge_is_out_of_bounds() {
        assert!(!Point::new(101, 0, true).in_bounds(100, 100));
        assert!(!Point::new(0, 101, true).in_bounds(100, 100));
    }

    #[test]
    fn test_negative_coordinate_is_out_of_bounds() {
        assert!(!Point::new(-1, 0, true).in_bounds(100, 100));
    }
}
