use crate::error::{Result, SlsError};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(
    any(test, feature = "serde"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct GridPoint {
    pub x: usize,
    pub y: usize,
}

/// Regular sampling grid over an image of extent `width` x `height`.
///
/// Points start `pad` pixels inside the border and are `spacing` pixels apart. Point index
/// `p` lies at row `p / s1` and column `p % s1`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    any(test, feature = "serde"),
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Grid {
    /// Number of columns.
    pub s1: usize,
    /// Number of rows.
    pub s2: usize,
    pub spacing: usize,
    pub pad: usize,
}

impl Grid {
    pub fn new(width: usize, height: usize, spacing: usize, pad: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(SlsError::invalid(format!(
                "grid over empty extent {width}x{height}"
            )));
        }
        if spacing == 0 {
            return Err(SlsError::invalid("grid spacing must be at least 1"));
        }
        if width <= 2 * pad || height <= 2 * pad {
            return Err(SlsError::invalid(format!(
                "padding {pad} leaves no room inside {width}x{height}"
            )));
        }
        Ok(Grid {
            s1: (width - 2 * pad).div_ceil(spacing),
            s2: (height - 2 * pad).div_ceil(spacing),
            spacing,
            pad,
        })
    }

    pub fn num_points(&self) -> usize {
        self.s1 * self.s2
    }

    /// `(row, col)` of point `p`.
    pub fn cell(&self, p: usize) -> (usize, usize) {
        (p / self.s1, p % self.s1)
    }

    pub fn point(&self, p: usize) -> GridPoint {
        let (row, col) = self.cell(p);
        GridPoint {
            x: self.pad + col * self.spacing,
            y: self.pad + row * self.spacing,
        }
    }

    /// All points in row-major order.
    pub fn points(&self) -> Vec<GridPoint> {
        (0..self.num_points()).map(|p| self.point(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_count_matches_dimensions() {
        for (w, h, g, pad) in [(10, 7, 1, 0), (10, 7, 3, 0), (64, 48, 5, 4), (9, 9, 8, 2)] {
            let grid = Grid::new(w, h, g, pad).unwrap();
            let points = grid.points();
            assert_eq!(points.len(), grid.num_points());
            assert_eq!(grid.num_points(), grid.s1 * grid.s2);
            assert!(points.iter().all(|p| p.x < w - pad && p.y < h - pad));
        }
    }

    #[test]
    fn row_major_layout() {
        let grid = Grid::new(12, 9, 2, 1).unwrap();
        assert_eq!((grid.s1, grid.s2), (5, 4));
        assert_eq!(grid.point(0), GridPoint { x: 1, y: 1 });
        assert_eq!(grid.point(1), GridPoint { x: 3, y: 1 });
        assert_eq!(grid.point(5), GridPoint { x: 1, y: 3 });
        assert_eq!(grid.cell(7), (1, 2));
    }

    #[test]
    fn ceil_division() {
        let grid = Grid::new(11, 10, 4, 0).unwrap();
        assert_eq!((grid.s1, grid.s2), (3, 3));
    }

    #[test]
    fn rejects_degenerate_grids() {
        assert!(Grid::new(0, 10, 1, 0).is_err());
        assert!(Grid::new(10, 10, 0, 0).is_err());
        assert!(Grid::new(10, 10, 1, 5).is_err());
    }
}
