// cartos_core/src/maps/mod.rs

pub mod inverse_model;
pub mod ndt_3d;
pub mod occupancy_2d;
pub mod occupancy_3d;
pub mod raycast;

pub use inverse_model::{CellCounts, InverseModel};
pub use ndt_3d::{Distribution3, NdtGrid3D};
pub use occupancy_2d::OccupancyGrid2D;
pub use occupancy_3d::OccupancyGrid3D;

/// The map representations a builder can own. Publishers match on the
/// variant and skip the ones they cannot render.
#[derive(Debug, Clone)]
pub enum MapData {
    OccupancyGrid2D(OccupancyGrid2D),
    OccupancyGrid3D(OccupancyGrid3D),
    NdtGrid3D(NdtGrid3D),
}

impl MapData {
    pub fn type_name(&self) -> &'static str {
        match self {
            MapData::OccupancyGrid2D(_) => "OccupancyGrid2D",
            MapData::OccupancyGrid3D(_) => "OccupancyGrid3D",
            MapData::NdtGrid3D(_) => "NdtGrid3D",
        }
    }

    /// The frame the map is expressed in.
    pub fn frame(&self) -> &str {
        match self {
            MapData::OccupancyGrid2D(map) => map.frame(),
            MapData::OccupancyGrid3D(map) => map.frame(),
            MapData::NdtGrid3D(map) => map.frame(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MapData::OccupancyGrid2D(map) => map.len(),
            MapData::OccupancyGrid3D(map) => map.len(),
            MapData::NdtGrid3D(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Brings derived state up to date before the map is read.
    pub fn finalize(&mut self) {
        match self {
            MapData::OccupancyGrid2D(_) => {}
            MapData::OccupancyGrid3D(map) => map.finalize(),
            MapData::NdtGrid3D(map) => map.finalize(),
        }
    }
}
