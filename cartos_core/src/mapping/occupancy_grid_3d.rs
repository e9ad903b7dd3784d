// cartos_core/src/mapping/occupancy_grid_3d.rs

use super::{write_artifact, MapBuilder, MapContext, ObservationFilter, ProcessContext, SaveOutcome};
use crate::error::{ConfigError, PersistError, ProcessError};
use crate::maps::{MapData, OccupancyGrid3D};
use crate::messages::{Observation, ObservationKind};
use nalgebra::Point3;
use serde::Deserialize;
use std::path::Path;

pub const ARTIFACT_FILE: &str = "occupancy_grid_3d.toml";

fn default_resolution() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct OccupancyGrid3DParams {
    /// Voxel edge length in metres.
    #[serde(default = "default_resolution")]
    pub resolution: f64,
    /// Beams longer than this only clear space.
    #[serde(default)]
    pub max_range: Option<f64>,
}

impl Default for OccupancyGrid3DParams {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            max_range: None,
        }
    }
}

/// Builds a voxel occupancy grid by ray casting every point of a cloud from
/// the sensor origin.
#[derive(Debug)]
pub struct OccupancyGridMapper3D {
    params: OccupancyGrid3DParams,
    map: Option<MapData>,
}

impl OccupancyGridMapper3D {
    pub fn new(params: OccupancyGrid3DParams) -> Self {
        Self { params, map: None }
    }
}

impl MapBuilder for OccupancyGridMapper3D {
    fn filter(&self) -> ObservationFilter {
        ObservationFilter::kinds([ObservationKind::PointCloud3d])
    }

    fn setup_map(&mut self, context: &MapContext) -> Result<(), ConfigError> {
        if let Some(range) = self.params.max_range {
            if !(range.is_finite() && range > 0.0) {
                return Err(ConfigError::MapSetup {
                    mapper: context.mapper.to_string(),
                    reason: format!("max_range must be positive, got {}", range),
                });
            }
        }
        let grid = OccupancyGrid3D::new(context.map_frame, self.params.resolution).map_err(|e| {
            ConfigError::MapSetup {
                mapper: context.mapper.to_string(),
                reason: e.to_string(),
            }
        })?;
        self.map = Some(MapData::OccupancyGrid3D(grid));
        Ok(())
    }

    fn process(&mut self, observation: &Observation, context: &ProcessContext) -> Result<(), ProcessError> {
        let cloud = observation
            .as_point_cloud()
            .ok_or_else(|| ProcessError::UnsupportedObservation(observation.kind()))?;
        if !matches!(self.map, Some(MapData::OccupancyGrid3D(_))) {
            return Err(ProcessError::NoMap);
        }
        let sensor_pose = context.lookup_sensor_pose(observation)?;
        let Some(MapData::OccupancyGrid3D(grid)) = self.map.as_mut() else {
            return Err(ProcessError::NoMap);
        };

        let origin = Point3::from(sensor_pose.translation.vector);
        let ends: Vec<Point3<f64>> = cloud.points.iter().map(|point| sensor_pose * point).collect();
        // All or nothing: a single unreachable return drops the whole cloud.
        for end in &ends {
            grid.check_ray(&origin, end, self.params.max_range)?;
        }
        for end in &ends {
            grid.insert_ray(&origin, end, self.params.max_range)?;
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
            Some(MapData::OccupancyGrid3D(grid)) => {
                let path = write_artifact(directory, ARTIFACT_FILE, &grid.to_artifact())?;
                Ok(SaveOutcome::Written(vec![path]))
            }
            _ => Ok(SaveOutcome::NoMap),
        }
    }
}
