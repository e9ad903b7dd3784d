// cartos_core/src/publishing/pointcloud.rs

use super::{Header, PointCloudMessage, Publisher};
use crate::error::{ConfigError, PublishError};
use crate::maps::{InverseModel, MapData, NdtGrid3D, OccupancyGrid3D};
use crate::topics::SharedTopic;
use crate::types::Timestamp;
use nalgebra::Point3;
use serde::Deserialize;

fn default_occupancy_threshold() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct PointcloudPublisherParams {
    /// Required to render occupancy grids. Without it only NDT maps are
    /// published.
    #[serde(default)]
    pub inverse_model: Option<InverseModel>,
    /// Voxels whose occupancy probability exceeds this are published.
    #[serde(default = "default_occupancy_threshold")]
    pub occupancy_threshold: f64,
}

impl Default for PointcloudPublisherParams {
    fn default() -> Self {
        Self {
            inverse_model: None,
            occupancy_threshold: default_occupancy_threshold(),
        }
    }
}

/// Publishes 3D maps as point clouds: NDT cell means, or the centres of the
/// occupied voxels of an occupancy grid.
pub struct PointcloudPublisher {
    name: String,
    topic: SharedTopic<PointCloudMessage>,
    params: PointcloudPublisherParams,
}

impl PointcloudPublisher {
    pub fn new(
        name: &str,
        topic: SharedTopic<PointCloudMessage>,
        params: PointcloudPublisherParams,
    ) -> Result<Self, ConfigError> {
        if let Some(model) = &params.inverse_model {
            model.validate()?;
        }
        if !(params.occupancy_threshold > 0.0 && params.occupancy_threshold < 1.0) {
            return Err(ConfigError::invalid(
                "occupancy_threshold",
                format!("must lie strictly between 0 and 1, got {}", params.occupancy_threshold),
            ));
        }
        Ok(Self {
            name: name.to_string(),
            topic,
            params,
        })
    }

    fn render_ndt(grid: &NdtGrid3D) -> Vec<Point3<f64>> {
        let mut cells: Vec<_> = grid.valid_distributions().collect();
        cells.sort_by_key(|(index, _)| **index);
        cells.into_iter().map(|(_, d)| d.mean()).collect()
    }

    fn render_occupancy(&self, grid: &OccupancyGrid3D) -> Result<Vec<Point3<f64>>, PublishError> {
        let model = self.params.inverse_model.as_ref().ok_or_else(|| PublishError::Render {
            publisher: self.name.clone(),
            reason: "occupancy grids need an inverse sensor model".to_string(),
        })?;
        let mut occupied: Vec<_> = grid
            .cells()
            .filter(|(_, counts)| model.probability(counts) > self.params.occupancy_threshold)
            .map(|(index, _)| *index)
            .collect();
        occupied.sort();
        Ok(occupied.iter().map(|index| grid.cell_center(index)).collect())
    }
}

impl Publisher for PointcloudPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, map: &MapData) -> bool {
        match map {
            MapData::NdtGrid3D(_) => true,
            MapData::OccupancyGrid3D(_) => self.params.inverse_model.is_some(),
            MapData::OccupancyGrid2D(_) => false,
        }
    }

    fn publish(&self, map: &MapData, stamp: Timestamp) -> Result<(), PublishError> {
        let points = match map {
            MapData::NdtGrid3D(grid) => Self::render_ndt(grid),
            MapData::OccupancyGrid3D(grid) => self.render_occupancy(grid)?,
            other => {
                return Err(PublishError::UnsupportedMap {
                    publisher: self.name.clone(),
                    map_type: other.type_name(),
                })
            }
        };
        self.topic.lock().publish(PointCloudMessage {
            header: Header::new(stamp, map.frame()),
            points,
        });
        Ok(())
    }
}
