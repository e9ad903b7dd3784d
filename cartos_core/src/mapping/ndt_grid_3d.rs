// cartos_core/src/mapping/ndt_grid_3d.rs

use super::{write_artifact, MapBuilder, MapContext, ObservationFilter, ProcessContext, SaveOutcome};
use crate::error::{ConfigError, PersistError, ProcessError};
use crate::maps::{MapData, NdtGrid3D};
use crate::messages::{Observation, ObservationData, ObservationKind};
use nalgebra::Point3;
use serde::Deserialize;
use std::path::Path;

pub const ARTIFACT_FILE: &str = "ndt_grid_3d.toml";

fn default_resolution() -> f64 {
    1.0
}

fn default_min_points() -> usize {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct NdtGridParams {
    #[serde(default = "default_resolution")]
    pub resolution: f64,
    /// Points a cell needs before its distribution is published.
    #[serde(default = "default_min_points")]
    pub min_points: usize,
}

impl Default for NdtGridParams {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            min_points: default_min_points(),
        }
    }
}

/// Accumulates point clouds and laser scans into a 3D NDT grid.
#[derive(Debug)]
pub struct NdtGridMapper3D {
    params: NdtGridParams,
    map: Option<MapData>,
}

impl NdtGridMapper3D {
    pub fn new(params: NdtGridParams) -> Self {
        Self { params, map: None }
    }
}

impl MapBuilder for NdtGridMapper3D {
    fn filter(&self) -> ObservationFilter {
        ObservationFilter::kinds([ObservationKind::PointCloud3d, ObservationKind::LaserScan2d])
    }

    fn setup_map(&mut self, context: &MapContext) -> Result<(), ConfigError> {
        let grid = NdtGrid3D::new(context.map_frame, self.params.resolution, self.params.min_points)
            .map_err(|e| ConfigError::MapSetup {
                mapper: context.mapper.to_string(),
                reason: e.to_string(),
            })?;
        self.map = Some(MapData::NdtGrid3D(grid));
        Ok(())
    }

    fn process(&mut self, observation: &Observation, context: &ProcessContext) -> Result<(), ProcessError> {
        if matches!(observation.data, ObservationData::Custom(_)) {
            return Err(ProcessError::UnsupportedObservation(observation.kind()));
        }
        if !matches!(self.map, Some(MapData::NdtGrid3D(_))) {
            return Err(ProcessError::NoMap);
        }
        let sensor_pose = context.lookup_sensor_pose(observation)?;
        let Some(MapData::NdtGrid3D(grid)) = self.map.as_mut() else {
            return Err(ProcessError::NoMap);
        };

        let points: Vec<Point3<f64>> = match &observation.data {
            ObservationData::PointCloud3d(cloud) => cloud.points.iter().map(|point| sensor_pose * point).collect(),
            ObservationData::LaserScan2d(scan) => scan.points().map(|point| sensor_pose * point).collect(),
            ObservationData::Custom(_) => Vec::new(),
        };
        for point in &points {
            grid.check_point(point)?;
        }
        for point in &points {
            grid.insert(point)?;
        }
        Ok(())
    }

    fn snapshot(&mut self) -> Option<&MapData> {
        let map = self.map.as_mut()?;
        map.finalize();
        Some(map)
    }

    fn has_map(&self) -> bool {
        self.map.is_some()
    }

    fn persist(&self, directory: &Path) -> Result<SaveOutcome, PersistError> {
        match &self.map {
            Some(MapData::NdtGrid3D(grid)) => {
                let path = write_artifact(directory, ARTIFACT_FILE, &grid.to_artifact())?;
                Ok(SaveOutcome::Written(vec![path]))
            }
            _ => Ok(SaveOutcome::NoMap),
        }
    }
}
