// cartos_core/src/prelude.rs

// --- Core Abstractions (The main contracts of the library) ---
pub use crate::mapping::{MapBuilder, ObservationFilter, ProcessContext, SaveOutcome};
pub use crate::publishing::Publisher;
pub use crate::types::{TfProvider, TimeFrame, Timestamp};

// --- Engine ---
pub use crate::config::MapperConfig;
pub use crate::engine::{Mapper, MapperBindings, MapperState};
pub use crate::error::{ConfigError, LifecycleError, PersistError, ProcessError, PublishError};

// --- Core Data Structures ---
pub use crate::frames::TfTree;
pub use crate::maps::MapData;
pub use crate::messages::{LaserScan2d, Observation, ObservationHandle, ObservationKind, Payload, PointCloud3d};
pub use crate::provider::DataProvider;
pub use crate::topics::{SharedTopic, TopicBus};

// --- Concrete Implementations ---
pub use crate::mapping::{NdtGridMapper3D, OccupancyGridMapper2D, OccupancyGridMapper3D};
pub use crate::publishing::{OccupancyGridPublisher, PointcloudPublisher};
