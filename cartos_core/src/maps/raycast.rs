// cartos_core/src/maps/raycast.rs

//! Grid traversal helpers shared by the occupancy maps.
//!
//! Cell indices are bounded to `±MAX_CELL_INDEX` and a single ray may cross
//! at most `MAX_RAY_CELLS` cells. Anything beyond that is reported as a
//! [`RayError`] instead of being walked.

use nalgebra::Point3;
use thiserror::Error;

pub type CellIndex2 = [i32; 2];
pub type CellIndex3 = [i32; 3];

/// Largest absolute cell index on any axis.
pub const MAX_CELL_INDEX: i64 = 1 << 30;

/// Longest ray, in cells crossed, that a traversal will walk.
pub const MAX_RAY_CELLS: u64 = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum RayError {
    #[error("coordinate {coordinate} lies outside the addressable grid")]
    OutOfBounds { coordinate: f64 },
    #[error("ray crosses {cells} cells, the limit is {limit}")]
    TooLong { cells: u64, limit: u64 },
}

fn axis_index(v: f64, resolution: f64) -> Result<i32, RayError> {
    let index = (v / resolution).floor();
    if !index.is_finite() || index.abs() > MAX_CELL_INDEX as f64 {
        return Err(RayError::OutOfBounds { coordinate: v });
    }
    Ok(index as i32)
}

pub fn cell_index_2d(x: f64, y: f64, resolution: f64) -> Result<CellIndex2, RayError> {
    Ok([axis_index(x, resolution)?, axis_index(y, resolution)?])
}

pub fn cell_index_3d(p: &Point3<f64>, resolution: f64) -> Result<CellIndex3, RayError> {
    Ok([
        axis_index(p.x, resolution)?,
        axis_index(p.y, resolution)?,
        axis_index(p.z, resolution)?,
    ])
}

/// Centre of a 3D cell in map coordinates.
pub fn cell_center_3d(index: &CellIndex3, resolution: f64) -> Point3<f64> {
    Point3::new(
        (index[0] as f64 + 0.5) * resolution,
        (index[1] as f64 + 0.5) * resolution,
        (index[2] as f64 + 0.5) * resolution,
    )
}

/// Manhattan distance between two cells, rejected past `MAX_RAY_CELLS`.
pub fn check_span(start: &[i32], end: &[i32]) -> Result<u64, RayError> {
    let cells = start
        .iter()
        .zip(end)
        .map(|(&a, &b)| (b as i64 - a as i64).unsigned_abs())
        .sum();
    if cells > MAX_RAY_CELLS {
        return Err(RayError::TooLong {
            cells,
            limit: MAX_RAY_CELLS,
        });
    }
    Ok(cells)
}

/// Bresenham line between two cells, both ends included.
pub fn bresenham_2d(start: CellIndex2, end: CellIndex2) -> Result<Vec<CellIndex2>, RayError> {
    check_span(&start, &end)?;
    // Bounded by the span check, so the i32 arithmetic below cannot overflow.
    let [mut x, mut y] = start;
    let dx = (end[0] - x).abs();
    let dy = -(end[1] - y).abs();
    let sx = if x < end[0] { 1 } else { -1 };
    let sy = if y < end[1] { 1 } else { -1 };
    let mut err = dx + dy;

    let mut cells = Vec::with_capacity((dx - dy) as usize + 1);
    loop {
        cells.push([x, y]);
        if x == end[0] && y == end[1] {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
    Ok(cells)
}

/// Voxel traversal (Amanatides & Woo) along the segment `origin -> end`.
/// Returns every cell the segment passes through, origin cell first and the
/// end cell last. Consecutive cells always share a face.
pub fn voxel_traversal(origin: &Point3<f64>, end: &Point3<f64>, resolution: f64) -> Result<Vec<CellIndex3>, RayError> {
    let start_cell = cell_index_3d(origin, resolution)?;
    let end_cell = cell_index_3d(end, resolution)?;
    let steps = check_span(&start_cell, &end_cell)?;
    let mut cells = Vec::with_capacity(steps as usize + 1);
    cells.push(start_cell);
    if start_cell == end_cell {
        return Ok(cells);
    }

    let direction = end - origin;
    let mut cell = start_cell;
    let mut step = [0i32; 3];
    let mut t_max = [f64::INFINITY; 3];
    let mut t_delta = [f64::INFINITY; 3];

    for axis in 0..3 {
        let d = direction[axis];
        if d > 0.0 {
            step[axis] = 1;
            t_delta[axis] = resolution / d;
            t_max[axis] = ((cell[axis] as f64 + 1.0) * resolution - origin[axis]) / d;
        } else if d < 0.0 {
            step[axis] = -1;
            t_delta[axis] = -resolution / d;
            t_max[axis] = (cell[axis] as f64 * resolution - origin[axis]) / d;
        }
    }

    for _ in 0..steps {
        let axis = if t_max[0] <= t_max[1] && t_max[0] <= t_max[2] {
            0
        } else if t_max[1] <= t_max[2] {
            1
        } else {
            2
        };
        if step[axis] == 0 {
            break;
        }
        cell[axis] += step[axis];
        t_max[axis] += t_delta[axis];
        cells.push(cell);
        if cell == end_cell {
            break;
        }
    }

    // Floating point error can leave the walk one cell short of the end.
    if cells.last() != Some(&end_cell) {
        cells.push(end_cell);
    }
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_adjacent(a: &CellIndex3, b: &CellIndex3) -> bool {
        (0..3).map(|i| (a[i] - b[i]).abs()).sum::<i32>() == 1
    }

    #[test]
    fn indices_floor_negative_coordinates() {
        assert_eq!(cell_index_2d(-0.01, 0.99, 1.0), Ok([-1, 0]));
        assert_eq!(cell_index_3d(&Point3::new(0.25, -0.25, 1.0), 0.5), Ok([0, -1, 2]));
    }

    #[test]
    fn far_and_non_finite_coordinates_have_no_index() {
        assert!(matches!(
            cell_index_3d(&Point3::new(-3.0e9, 0.0, 0.0), 0.5),
            Err(RayError::OutOfBounds { .. })
        ));
        assert!(cell_index_2d(f64::NAN, 0.0, 1.0).is_err());
        assert!(cell_index_2d(0.0, f64::INFINITY, 1.0).is_err());
        // The last addressable cell is still fine.
        assert_eq!(cell_index_2d(MAX_CELL_INDEX as f64, 0.0, 1.0), Ok([1 << 30, 0]));
    }

    #[test]
    fn bresenham_covers_diagonal_and_axis_lines() {
        assert_eq!(bresenham_2d([0, 0], [3, 3]).unwrap(), vec![[0, 0], [1, 1], [2, 2], [3, 3]]);
        assert_eq!(bresenham_2d([2, 0], [-1, 0]).unwrap(), vec![[2, 0], [1, 0], [0, 0], [-1, 0]]);
        assert_eq!(bresenham_2d([5, 5], [5, 5]).unwrap(), vec![[5, 5]]);
    }

    #[test]
    fn bresenham_shallow_line_has_one_cell_per_column() {
        let cells = bresenham_2d([0, 0], [6, 2]).unwrap();
        assert_eq!(cells.len(), 7);
        assert_eq!(cells.first(), Some(&[0, 0]));
        assert_eq!(cells.last(), Some(&[6, 2]));
    }

    #[test]
    fn bresenham_refuses_lines_across_the_whole_grid() {
        let far = -(1 << 30);
        assert_eq!(
            bresenham_2d([0, 0], [far, 0]),
            Err(RayError::TooLong {
                cells: 1 << 30,
                limit: MAX_RAY_CELLS
            })
        );
        // Opposite corners would overflow i32 differences.
        assert!(bresenham_2d([i32::MAX, 0], [i32::MIN, 0]).is_err());
    }

    #[test]
    fn traversal_along_axis_visits_each_cell() {
        let cells = voxel_traversal(&Point3::new(0.5, 0.5, 0.5), &Point3::new(3.5, 0.5, 0.5), 1.0).unwrap();
        assert_eq!(cells, vec![[0, 0, 0], [1, 0, 0], [2, 0, 0], [3, 0, 0]]);
    }

    #[test]
    fn traversal_is_face_connected_and_ends_in_end_cell() {
        let origin = Point3::new(0.1, 0.2, 0.3);
        let end = Point3::new(-2.7, 4.1, 1.9);
        let cells = voxel_traversal(&origin, &end, 0.5).unwrap();
        assert_eq!(cells.first(), Some(&cell_index_3d(&origin, 0.5).unwrap()));
        assert_eq!(cells.last(), Some(&cell_index_3d(&end, 0.5).unwrap()));
        for pair in cells.windows(2) {
            assert!(face_adjacent(&pair[0], &pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn degenerate_segment_is_single_cell() {
        let p = Point3::new(1.2, 1.2, 1.2);
        assert_eq!(voxel_traversal(&p, &p, 1.0).unwrap(), vec![[1, 1, 1]]);
    }

    #[test]
    fn traversal_to_a_far_point_is_rejected_without_walking() {
        let origin = Point3::new(0.0, 0.0, 0.0);
        let result = voxel_traversal(&origin, &Point3::new(-3.0e9, 0.0, 0.0), 0.5);
        assert!(matches!(result, Err(RayError::OutOfBounds { .. })));

        // Addressable but far too long to walk.
        let result = voxel_traversal(&origin, &Point3::new(-1.0e5, 0.0, 0.0), 0.5);
        assert_eq!(
            result,
            Err(RayError::TooLong {
                cells: 200_000,
                limit: MAX_RAY_CELLS
            })
        );

        // Just inside the limit still walks.
        let near_limit = Point3::new(MAX_RAY_CELLS as f64 - 0.5, 0.5, 0.5);
        let cells = voxel_traversal(&Point3::new(0.5, 0.5, 0.5), &near_limit, 1.0).unwrap();
        assert_eq!(cells.len() as u64, MAX_RAY_CELLS);
    }
}
