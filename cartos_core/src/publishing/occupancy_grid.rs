// cartos_core/src/publishing/occupancy_grid.rs

use super::{Header, OccupancyGridMessage, Publisher};
use crate::error::{ConfigError, PublishError};
use crate::maps::{InverseModel, MapData, OccupancyGrid2D};
use crate::topics::SharedTopic;
use crate::types::Timestamp;
use nalgebra::Isometry3;
use serde::Deserialize;

fn default_max_cells() -> usize {
    4_000_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct OccupancyGridPublisherParams {
    #[serde(default)]
    pub inverse_model: InverseModel,
    /// Upper bound on `width * height` of a rendered grid.
    #[serde(default = "default_max_cells")]
    pub max_cells: usize,
}

impl Default for OccupancyGridPublisherParams {
    fn default() -> Self {
        Self {
            inverse_model: InverseModel::default(),
            max_cells: default_max_cells(),
        }
    }
}

/// Publishes planar occupancy grids as dense `OccupancyGridMessage`s.
pub struct OccupancyGridPublisher {
    name: String,
    topic: SharedTopic<OccupancyGridMessage>,
    params: OccupancyGridPublisherParams,
}

impl OccupancyGridPublisher {
    pub fn new(
        name: &str,
        topic: SharedTopic<OccupancyGridMessage>,
        params: OccupancyGridPublisherParams,
    ) -> Result<Self, ConfigError> {
        params.inverse_model.validate()?;
        Ok(Self {
            name: name.to_string(),
            topic,
            params,
        })
    }

    fn render(&self, grid: &OccupancyGrid2D, stamp: Timestamp) -> Result<OccupancyGridMessage, PublishError> {
        let resolution = grid.resolution();
        let Some((min, max)) = grid.bounds() else {
            return Ok(OccupancyGridMessage {
                header: Header::new(stamp, grid.frame()),
                resolution,
                width: 0,
                height: 0,
                origin: Isometry3::identity(),
                data: Vec::new(),
            });
        };

        let width = (max[0] as i64 - min[0] as i64 + 1) as usize;
        let height = (max[1] as i64 - min[1] as i64 + 1) as usize;
        let size = width.saturating_mul(height);
        if size > self.params.max_cells {
            return Err(PublishError::Render {
                publisher: self.name.clone(),
                reason: format!("{}x{} cells exceed the limit of {}", width, height, self.params.max_cells),
            });
        }

        let mut data = vec![-1i8; size];
        for (index, counts) in grid.cells() {
            let column = (index[0] - min[0]) as usize;
            let row = (index[1] - min[1]) as usize;
            let p = self.params.inverse_model.probability(counts);
            data[row * width + column] = (p * 100.0).round().clamp(0.0, 100.0) as i8;
        }

        Ok(OccupancyGridMessage {
            header: Header::new(stamp, grid.frame()),
            resolution,
            width,
            height,
            origin: Isometry3::translation(min[0] as f64 * resolution, min[1] as f64 * resolution, 0.0),
            data,
        })
    }
}

impl Publisher for OccupancyGridPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, map: &MapData) -> bool {
        matches!(map, MapData::OccupancyGrid2D(_))
    }

    fn publish(&self, map: &MapData, stamp: Timestamp) -> Result<(), PublishError> {
        let MapData::OccupancyGrid2D(grid) = map else {
            return Err(PublishError::UnsupportedMap {
                publisher: self.name.clone(),
                map_type: map.type_name(),
            });
        };
        let message = self.render(grid, stamp)?;
        self.topic.lock().publish(message);
        Ok(())
    }
}
