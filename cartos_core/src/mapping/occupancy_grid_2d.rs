// cartos_core/src/mapping/occupancy_grid_2d.rs

use super::{write_artifact, MapBuilder, MapContext, ObservationFilter, ProcessContext, SaveOutcome};
use crate::error::{ConfigError, PersistError, ProcessError};
use crate::maps::{MapData, OccupancyGrid2D};
use crate::messages::{Observation, ObservationKind};
use serde::Deserialize;
use std::path::Path;

pub const ARTIFACT_FILE: &str = "occupancy_grid_2d.toml";

fn default_resolution() -> f64 {
    0.05
}

#[derive(Debug, Clone, Deserialize)]
pub struct OccupancyGrid2DParams {
    /// Cell edge length in metres.
    #[serde(default = "default_resolution")]
    pub resolution: f64,
}

impl Default for OccupancyGrid2DParams {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
        }
    }
}

/// Builds a planar occupancy grid from 2D laser scans.
#[derive(Debug)]
pub struct OccupancyGridMapper2D {
    params: OccupancyGrid2DParams,
    map: Option<MapData>,
}

impl OccupancyGridMapper2D {
    pub fn new(params: OccupancyGrid2DParams) -> Self {
        Self { params, map: None }
    }

    fn grid_mut(&mut self) -> Option<&mut OccupancyGrid2D> {
        match self.map.as_mut() {
            Some(MapData::OccupancyGrid2D(grid)) => Some(grid),
            _ => None,
        }
    }
}

impl MapBuilder for OccupancyGridMapper2D {
    fn filter(&self) -> ObservationFilter {
        ObservationFilter::kinds([ObservationKind::LaserScan2d])
    }

    fn setup_map(&mut self, context: &MapContext) -> Result<(), ConfigError> {
        let grid = OccupancyGrid2D::new(context.map_frame, self.params.resolution).map_err(|e| {
            ConfigError::MapSetup {
                mapper: context.mapper.to_string(),
                reason: e.to_string(),
            }
        })?;
        self.map = Some(MapData::OccupancyGrid2D(grid));
        Ok(())
    }

    fn process(&mut self, observation: &Observation, context: &ProcessContext) -> Result<(), ProcessError> {
        let scan = observation
            .as_laser_scan()
            .ok_or_else(|| ProcessError::UnsupportedObservation(observation.kind()))?;
        // Check for the map before paying for a transform lookup.
        if self.grid_mut().is_none() {
            return Err(ProcessError::NoMap);
        }
        let sensor_pose = context.lookup_sensor_pose(observation)?;
        let grid = self.grid_mut().ok_or(ProcessError::NoMap)?;

        let origin = sensor_pose.translation.vector;
        let origin = [origin.x, origin.y];
        let ends: Vec<[f64; 2]> = scan
            .points()
            .map(|point| {
                let end = sensor_pose * point;
                [end.x, end.y]
            })
            .collect();
        // All or nothing: a single unreachable beam drops the whole scan.
        for end in &ends {
            grid.check_ray(origin, *end)?;
        }
        for end in ends {
            grid.insert_ray(origin, end)?;
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
            Some(MapData::OccupancyGrid2D(grid)) => {
                let path = write_artifact(directory, ARTIFACT_FILE, &grid.to_artifact())?;
                Ok(SaveOutcome::Written(vec![path]))
            }
            _ => Ok(SaveOutcome::NoMap),
        }
    }
}
