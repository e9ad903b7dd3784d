// cartos_core/src/maps/occupancy_3d.rs

use crate::error::ConfigError;
use crate::maps::inverse_model::CellCounts;
use crate::maps::raycast::{cell_center_3d, cell_index_3d, check_span, voxel_traversal, CellIndex3, RayError};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Aggregate view of a voxel grid, refreshed by `finalize`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSummary3D {
    pub min: CellIndex3,
    pub max: CellIndex3,
    pub cells: usize,
    pub hits: u64,
}

/// A sparse voxel occupancy grid built by ray casting point clouds.
#[derive(Debug, Clone)]
pub struct OccupancyGrid3D {
    frame: String,
    resolution: f64,
    cells: HashMap<CellIndex3, CellCounts>,
    summary: Option<GridSummary3D>,
    dirty: bool,
}

impl OccupancyGrid3D {
    pub fn new(frame: &str, resolution: f64) -> Result<Self, ConfigError> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(ConfigError::invalid(
                "resolution",
                format!("must be a positive voxel size in metres, got {}", resolution),
            ));
        }
        Ok(Self {
            frame: frame.to_string(),
            resolution,
            cells: HashMap::new(),
            summary: None,
            dirty: false,
        })
    }

    pub fn frame(&self) -> &str {
        &self.frame
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn counts(&self, index: &CellIndex3) -> Option<&CellCounts> {
        self.cells.get(index)
    }

    pub fn cells(&self) -> impl Iterator<Item = (&CellIndex3, &CellCounts)> {
        self.cells.iter()
    }

    pub fn cell_center(&self, index: &CellIndex3) -> Point3<f64> {
        cell_center_3d(index, self.resolution)
    }

    /// Checks that a beam can be integrated without touching the grid.
    /// Non-finite beams pass, `insert_ray` ignores them.
    pub fn check_ray(&self, origin: &Point3<f64>, end: &Point3<f64>, max_range: Option<f64>) -> Result<(), RayError> {
        if !is_finite_ray(origin, end) {
            return Ok(());
        }
        let (end, _) = clip_ray(origin, end, max_range);
        let start = cell_index_3d(origin, self.resolution)?;
        let stop = cell_index_3d(&end, self.resolution)?;
        check_span(&start, &stop).map(|_| ())
    }

    /// Integrates one beam from the sensor `origin` to the return `end`.
    /// Beams longer than `max_range` are cut at that range and only clear
    /// space; they do not mark a hit.
    pub fn insert_ray(&mut self, origin: &Point3<f64>, end: &Point3<f64>, max_range: Option<f64>) -> Result<(), RayError> {
        if !is_finite_ray(origin, end) {
            return Ok(());
        }
        let (end, is_hit) = clip_ray(origin, end, max_range);
        let cells = voxel_traversal(origin, &end, self.resolution)?;
        let (last, free) = match cells.split_last() {
            Some(split) => split,
            None => return Ok(()),
        };
        for index in free {
            self.cells.entry(*index).or_default().free += 1;
        }
        let last = self.cells.entry(*last).or_default();
        if is_hit {
            last.occupied += 1;
        } else {
            last.free += 1;
        }
        self.dirty = true;
        Ok(())
    }

    /// Consistency pass run before the grid is read: refreshes the bounds
    /// and aggregate counters. Cheap when nothing changed.
    pub fn finalize(&mut self) {
        if !self.dirty {
            return;
        }
        let mut cells = self.cells.iter();
        self.summary = cells.next().map(|(first, counts)| {
            let mut summary = GridSummary3D {
                min: *first,
                max: *first,
                cells: 1,
                hits: counts.occupied as u64,
            };
            for (index, counts) in cells {
                for axis in 0..3 {
                    summary.min[axis] = summary.min[axis].min(index[axis]);
                    summary.max[axis] = summary.max[axis].max(index[axis]);
                }
                summary.cells += 1;
                summary.hits += counts.occupied as u64;
            }
            summary
        });
        self.dirty = false;
    }

    /// The summary as of the last `finalize`.
    pub fn summary(&self) -> Option<&GridSummary3D> {
        self.summary.as_ref()
    }

    pub fn is_finalized(&self) -> bool {
        !self.dirty
    }

    pub fn to_artifact(&self) -> OccupancyGrid3DArtifact {
        let mut cells: Vec<CellRecord3D> = self
            .cells
            .iter()
            .map(|(index, counts)| CellRecord3D {
                index: *index,
                free: counts.free,
                occupied: counts.occupied,
            })
            .collect();
        cells.sort_by_key(|c| c.index);
        OccupancyGrid3DArtifact {
            frame: self.frame.clone(),
            resolution: self.resolution,
            cells,
        }
    }

    pub fn from_artifact(artifact: &OccupancyGrid3DArtifact) -> Result<Self, ConfigError> {
        let mut grid = Self::new(&artifact.frame, artifact.resolution)?;
        grid.cells = artifact
            .cells
            .iter()
            .map(|c| {
                (
                    c.index,
                    CellCounts {
                        free: c.free,
                        occupied: c.occupied,
                    },
                )
            })
            .collect();
        grid.dirty = true;
        grid.finalize();
        Ok(grid)
    }
}

// --- Persisted form ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord3D {
    pub index: CellIndex3,
    pub free: u32,
    pub occupied: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyGrid3DArtifact {
    pub frame: String,
    pub resolution: f64,
    pub cells: Vec<CellRecord3D>,
}

fn is_finite_ray(origin: &Point3<f64>, end: &Point3<f64>) -> bool {
    origin.coords.iter().chain(end.coords.iter()).all(|v| v.is_finite())
}

/// Cuts the beam at `max_range`. The flag is false when the beam was cut.
fn clip_ray(origin: &Point3<f64>, end: &Point3<f64>, max_range: Option<f64>) -> (Point3<f64>, bool) {
    let offset = end - origin;
    let length = offset.norm();
    match max_range {
        Some(range) if length > range => (origin + offset * (range / length), false),
        _ => (*end, true),
    }
}
