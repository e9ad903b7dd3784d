// cartos_core/src/mapping/mod.rs

use crate::error::{ConfigError, PersistError, ProcessError};
use crate::maps::MapData;
use crate::messages::{Observation, ObservationKind};
use crate::types::TfProvider;
use nalgebra::Isometry3;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

// --- Acceptance Filtering ---

/// Decides which observations a builder wants. Evaluated on the provider's
/// thread, before anything is queued.
#[derive(Clone)]
pub enum ObservationFilter {
    /// Accept everything.
    None,
    /// Accept only the listed kinds.
    Kinds(Vec<ObservationKind>),
    /// Accept whatever the predicate returns `true` for.
    Predicate(Arc<dyn Fn(&Observation) -> bool + Send + Sync>),
}

impl ObservationFilter {
    pub fn kinds(kinds: impl IntoIterator<Item = ObservationKind>) -> Self {
        ObservationFilter::Kinds(kinds.into_iter().collect())
    }

    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Observation) -> bool + Send + Sync + 'static,
    {
        ObservationFilter::Predicate(Arc::new(f))
    }

    pub fn accepts(&self, observation: &Observation) -> bool {
        match self {
            ObservationFilter::None => true,
            ObservationFilter::Kinds(kinds) => kinds.iter().any(|k| observation.is_kind(k)),
            ObservationFilter::Predicate(f) => f(observation),
        }
    }
}

impl fmt::Debug for ObservationFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservationFilter::None => write!(f, "None"),
            ObservationFilter::Kinds(kinds) => f.debug_tuple("Kinds").field(kinds).finish(),
            ObservationFilter::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

// --- Contexts handed to the builder ---

/// What a builder needs to create its map.
#[derive(Debug, Clone)]
pub struct MapContext<'a> {
    pub mapper: &'a str,
    pub map_frame: &'a str,
}

/// What a builder needs to integrate one observation.
pub struct ProcessContext<'a> {
    pub map_frame: &'a str,
    pub tf: &'a dyn TfProvider,
    pub tf_timeout: Duration,
}

impl ProcessContext<'_> {
    /// Pose of the observation's sensor frame in the map frame, looked up at
    /// the start of the observation's time frame.
    pub fn lookup_sensor_pose(&self, observation: &Observation) -> Result<Isometry3<f64>, ProcessError> {
        self.tf
            .lookup(
                self.map_frame,
                &observation.frame,
                observation.stamp.start,
                self.tf_timeout,
            )
            .ok_or_else(|| ProcessError::TransformUnavailable {
                target_frame: self.map_frame.to_string(),
                source_frame: observation.frame.clone(),
                stamp: observation.stamp.start,
            })
    }
}

/// Result of a successful save request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// There was no map yet; nothing was written.
    NoMap,
    /// The files that were written.
    Written(Vec<PathBuf>),
}

// =========================================================================
// == Map Builder Contract ==
// =========================================================================

/// The contract for any algorithm that builds a map from observations.
///
/// A builder is owned by exactly one mapper. After `configure` it is moved
/// onto the mapper's worker thread, so every method except `filter` runs on
/// that single thread and the map needs no locking.
pub trait MapBuilder: Send {
    /// The acceptance filter installed on every bound data provider.
    fn filter(&self) -> ObservationFilter;

    fn accepts(&self, observation: &Observation) -> bool {
        self.filter().accepts(observation)
    }

    /// Creates the empty map. Called once, from `configure`.
    fn setup_map(&mut self, context: &MapContext) -> Result<(), ConfigError>;

    /// Integrates one observation into the map.
    fn process(&mut self, observation: &Observation, context: &ProcessContext) -> Result<(), ProcessError>;

    /// Finalizes and returns a read-only view of the map, if one exists.
    fn snapshot(&mut self) -> Option<&MapData>;

    fn has_map(&self) -> bool;

    /// Writes the map's artifacts into `directory`, which already exists.
    fn persist(&self, directory: &Path) -> Result<SaveOutcome, PersistError>;
}

/// Serializes `artifact` as pretty TOML into `directory/file_name`.
pub fn write_artifact<T: Serialize>(directory: &Path, file_name: &str, artifact: &T) -> Result<PathBuf, PersistError> {
    let path = directory.join(file_name);
    let contents = toml::to_string_pretty(artifact)?;
    std::fs::write(&path, contents).map_err(|source| PersistError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

// --- Declare the implementation sub-modules ---
mod ndt_grid_3d;
mod occupancy_grid_2d;
mod occupancy_grid_3d;

// --- Re-export the public structs for a clean API ---
pub use ndt_grid_3d::{NdtGridMapper3D, NdtGridParams};
pub use occupancy_grid_2d::{OccupancyGridMapper2D, OccupancyGrid2DParams};
pub use occupancy_grid_3d::{OccupancyGridMapper3D, OccupancyGrid3DParams};
