// cartos_core/src/maps/occupancy_2d.rs

use crate::error::ConfigError;
use crate::maps::inverse_model::CellCounts;
use crate::maps::raycast::{bresenham_2d, cell_index_2d, check_span, CellIndex2, RayError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A sparse planar occupancy grid. Each touched cell stores how often it was
/// seen free and how often it was seen occupied.
#[derive(Debug, Clone)]
pub struct OccupancyGrid2D {
    frame: String,
    resolution: f64,
    cells: HashMap<CellIndex2, CellCounts>,
    bounds: Option<(CellIndex2, CellIndex2)>,
}

impl OccupancyGrid2D {
    pub fn new(frame: &str, resolution: f64) -> Result<Self, ConfigError> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(ConfigError::invalid(
                "resolution",
                format!("must be a positive cell size in metres, got {}", resolution),
            ));
        }
        Ok(Self {
            frame: frame.to_string(),
            resolution,
            cells: HashMap::new(),
            bounds: None,
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

    pub fn cell_index(&self, x: f64, y: f64) -> Result<CellIndex2, RayError> {
        cell_index_2d(x, y, self.resolution)
    }

    pub fn counts(&self, index: &CellIndex2) -> Option<&CellCounts> {
        self.cells.get(index)
    }

    pub fn cells(&self) -> impl Iterator<Item = (&CellIndex2, &CellCounts)> {
        self.cells.iter()
    }

    /// Inclusive `(min, max)` cell indices of everything observed so far.
    pub fn bounds(&self) -> Option<(CellIndex2, CellIndex2)> {
        self.bounds
    }

    /// Checks that a beam can be integrated without touching the grid.
    /// Non-finite beams pass, `insert_ray` ignores them.
    pub fn check_ray(&self, origin: [f64; 2], end: [f64; 2]) -> Result<(), RayError> {
        if !is_finite_ray(origin, end) {
            return Ok(());
        }
        let start = self.cell_index(origin[0], origin[1])?;
        let stop = self.cell_index(end[0], end[1])?;
        check_span(&start, &stop).map(|_| ())
    }

    /// Integrates one beam: every cell between `origin` and `end` is seen
    /// free, the end cell is seen occupied. Beams outside the addressable
    /// grid leave it unchanged.
    pub fn insert_ray(&mut self, origin: [f64; 2], end: [f64; 2]) -> Result<(), RayError> {
        if !is_finite_ray(origin, end) {
            return Ok(());
        }
        let start = self.cell_index(origin[0], origin[1])?;
        let stop = self.cell_index(end[0], end[1])?;
        let cells = bresenham_2d(start, stop)?;
        let (hit, free) = match cells.split_last() {
            Some(split) => split,
            None => return Ok(()),
        };
        for index in free {
            self.touch(*index).free += 1;
        }
        self.touch(*hit).occupied += 1;
        Ok(())
    }

    fn touch(&mut self, index: CellIndex2) -> &mut CellCounts {
        self.bounds = Some(match self.bounds {
            None => (index, index),
            Some((min, max)) => (
                [min[0].min(index[0]), min[1].min(index[1])],
                [max[0].max(index[0]), max[1].max(index[1])],
            ),
        });
        self.cells.entry(index).or_default()
    }

    pub fn to_artifact(&self) -> OccupancyGrid2DArtifact {
        let mut cells: Vec<CellRecord2D> = self
            .cells
            .iter()
            .map(|(index, counts)| CellRecord2D {
                index: *index,
                free: counts.free,
                occupied: counts.occupied,
            })
            .collect();
        cells.sort_by_key(|c| c.index);
        OccupancyGrid2DArtifact {
            frame: self.frame.clone(),
            resolution: self.resolution,
            cells,
        }
    }

    pub fn from_artifact(artifact: &OccupancyGrid2DArtifact) -> Result<Self, ConfigError> {
        let mut grid = Self::new(&artifact.frame, artifact.resolution)?;
        for record in &artifact.cells {
            *grid.touch(record.index) = CellCounts {
                free: record.free,
                occupied: record.occupied,
            };
        }
        Ok(grid)
    }
}

// --- Persisted form ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellRecord2D {
    pub index: CellIndex2,
    pub free: u32,
    pub occupied: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyGrid2DArtifact {
    pub frame: String,
    pub resolution: f64,
    pub cells: Vec<CellRecord2D>,
}

fn is_finite_ray(origin: [f64; 2], end: [f64; 2]) -> bool {
    origin.iter().chain(end.iter()).all(|v| v.is_finite())
}
