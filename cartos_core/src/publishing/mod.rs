// cartos_core/src/publishing/mod.rs

use crate::error::PublishError;
use crate::maps::MapData;
use crate::types::Timestamp;
use nalgebra::{Isometry3, Point3};

// --- Rendered Messages ---

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub stamp: Timestamp,
    pub frame_id: String,
}

impl Header {
    pub fn new(stamp: Timestamp, frame_id: &str) -> Self {
        Self {
            stamp,
            frame_id: frame_id.to_string(),
        }
    }
}

/// A rendered point set, e.g. NDT cell means or occupied voxel centres.
#[derive(Debug, Clone)]
pub struct PointCloudMessage {
    pub header: Header,
    pub points: Vec<Point3<f64>>,
}

/// A dense row-major occupancy grid. Cells hold `-1` for unknown and
/// `0..=100` for the occupancy probability in percent.
#[derive(Debug, Clone)]
pub struct OccupancyGridMessage {
    pub header: Header,
    pub resolution: f64,
    pub width: usize,
    pub height: usize,
    /// Pose of cell `(0, 0)`'s corner in the map frame.
    pub origin: Isometry3<f64>,
    pub data: Vec<i8>,
}

impl OccupancyGridMessage {
    pub fn cell(&self, column: usize, row: usize) -> Option<i8> {
        if column >= self.width || row >= self.height {
            return None;
        }
        self.data.get(row * self.width + column).copied()
    }
}

// =========================================================================
// == Publisher Contract ==
// =========================================================================

/// Turns a map snapshot into an external representation and emits it.
///
/// Publishers are shared between mappers and called from their worker
/// threads, so any sink they write into must be synchronized.
pub trait Publisher: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this publisher can render the given map variant.
    fn supports(&self, map: &MapData) -> bool;

    /// Renders `map` stamped with `stamp` and emits it.
    /// Returns `PublishError::UnsupportedMap` for variants it cannot render.
    fn publish(&self, map: &MapData, stamp: Timestamp) -> Result<(), PublishError>;
}

// --- Declare the implementation sub-modules ---
mod occupancy_grid;
mod pointcloud;

// --- Re-export the public structs for a clean API ---
pub use occupancy_grid::{OccupancyGridPublisher, OccupancyGridPublisherParams};
pub use pointcloud::{PointcloudPublisher, PointcloudPublisherParams};
