// cartos_core/src/maps/ndt_3d.rs

use crate::error::ConfigError;
use crate::maps::raycast::{cell_index_3d, CellIndex3, RayError};
use nalgebra::{Matrix3, Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Running mean and scatter of the points that fell into one cell
/// (Welford's online update).
#[derive(Debug, Clone, PartialEq)]
pub struct Distribution3 {
    n: usize,
    mean: Vector3<f64>,
    scatter: Matrix3<f64>,
}

impl Default for Distribution3 {
    fn default() -> Self {
        Self {
            n: 0,
            mean: Vector3::zeros(),
            scatter: Matrix3::zeros(),
        }
    }
}

impl Distribution3 {
    pub fn add(&mut self, point: &Point3<f64>) {
        self.n += 1;
        let delta = point.coords - self.mean;
        self.mean += delta / self.n as f64;
        let delta_after = point.coords - self.mean;
        self.scatter += delta * delta_after.transpose();
    }

    pub fn count(&self) -> usize {
        self.n
    }

    pub fn mean(&self) -> Point3<f64> {
        Point3::from(self.mean)
    }

    /// Sample covariance; needs at least two points.
    pub fn covariance(&self) -> Option<Matrix3<f64>> {
        (self.n >= 2).then(|| self.scatter / (self.n - 1) as f64)
    }
}

/// A normal-distributions-transform grid: every cell summarizes its points
/// as a Gaussian.
#[derive(Debug, Clone)]
pub struct NdtGrid3D {
    frame: String,
    resolution: f64,
    min_points: usize,
    cells: HashMap<CellIndex3, Distribution3>,
    valid_cells: usize,
    dirty: bool,
}

impl NdtGrid3D {
    pub fn new(frame: &str, resolution: f64, min_points: usize) -> Result<Self, ConfigError> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(ConfigError::invalid(
                "resolution",
                format!("must be a positive cell size in metres, got {}", resolution),
            ));
        }
        Ok(Self {
            frame: frame.to_string(),
            resolution,
            min_points: min_points.max(1),
            cells: HashMap::new(),
            valid_cells: 0,
            dirty: false,
        })
    }

    pub fn frame(&self) -> &str {
        &self.frame
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Cells with fewer points than this are not considered valid.
    pub fn min_points(&self) -> usize {
        self.min_points
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Checks that `point` falls inside the addressable grid. Non-finite
    /// points pass, `insert` ignores them.
    pub fn check_point(&self, point: &Point3<f64>) -> Result<(), RayError> {
        if !point.coords.iter().all(|v| v.is_finite()) {
            return Ok(());
        }
        cell_index_3d(point, self.resolution).map(|_| ())
    }

    pub fn insert(&mut self, point: &Point3<f64>) -> Result<(), RayError> {
        if !point.coords.iter().all(|v| v.is_finite()) {
            return Ok(());
        }
        let index = cell_index_3d(point, self.resolution)?;
        self.cells.entry(index).or_default().add(point);
        self.dirty = true;
        Ok(())
    }

    pub fn distribution(&self, index: &CellIndex3) -> Option<&Distribution3> {
        self.cells.get(index)
    }

    /// Cells holding at least `min_points` points.
    pub fn valid_distributions(&self) -> impl Iterator<Item = (&CellIndex3, &Distribution3)> {
        let min_points = self.min_points;
        self.cells.iter().filter(move |(_, d)| d.count() >= min_points)
    }

    pub fn finalize(&mut self) {
        if self.dirty {
            self.valid_cells = self.valid_distributions().count();
            self.dirty = false;
        }
    }

    /// Number of valid cells as of the last `finalize`.
    pub fn valid_cells(&self) -> usize {
        self.valid_cells
    }

    pub fn to_artifact(&self) -> NdtGrid3DArtifact {
        let mut cells: Vec<DistributionRecord> = self
            .cells
            .iter()
            .map(|(index, d)| DistributionRecord {
                index: *index,
                count: d.n as u64,
                mean: [d.mean.x, d.mean.y, d.mean.z],
                covariance: d.covariance().map(|c| {
                    [
                        [c[(0, 0)], c[(0, 1)], c[(0, 2)]],
                        [c[(1, 0)], c[(1, 1)], c[(1, 2)]],
                        [c[(2, 0)], c[(2, 1)], c[(2, 2)]],
                    ]
                }),
            })
            .collect();
        cells.sort_by_key(|c| c.index);
        NdtGrid3DArtifact {
            frame: self.frame.clone(),
            resolution: self.resolution,
            min_points: self.min_points as u64,
            cells,
        }
    }
}

// --- Persisted form ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionRecord {
    pub index: CellIndex3,
    pub count: u64,
    pub mean: [f64; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covariance: Option<[[f64; 3]; 3]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdtGrid3DArtifact {
    pub frame: String,
    pub resolution: f64,
    pub min_points: u64,
    pub cells: Vec<DistributionRecord>,
}
