// cartos_core/src/error.rs

use crate::engine::MapperState;
use crate::maps::raycast::RayError;
use crate::messages::ObservationKind;
use std::path::PathBuf;
use thiserror::Error;

/// Faults detected while wiring a mapper up. These are fatal: the mapper never
/// reaches `Running` after one of them.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("mapper '{mapper}': no data providers were configured")]
    NoDataProviders { mapper: String },

    #[error("mapper '{mapper}': cannot find data provider '{provider}'")]
    UnknownDataProvider { mapper: String, provider: String },

    #[error("mapper '{mapper}': cannot find publisher '{publisher}'")]
    UnknownPublisher { mapper: String, publisher: String },

    #[error("mapper '{mapper}': map could not be initialized: {reason}")]
    MapSetup { mapper: String, reason: String },

    #[error("mapper '{mapper}' is already configured")]
    AlreadyConfigured { mapper: String },

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("topic '{0}' already exists")]
    DuplicateTopic(String),
}

impl ConfigError {
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Misuse of the mapper lifecycle (e.g. starting twice).
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("mapper '{mapper}': cannot {operation} while {state:?}")]
    InvalidTransition {
        mapper: String,
        operation: &'static str,
        state: MapperState,
    },

    #[error("mapper '{mapper}': failed to spawn worker thread: {source}")]
    Spawn {
        mapper: String,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single observation was not integrated. Always recoverable.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("transform '{source_frame}' -> '{target_frame}' unavailable at t={stamp:.3}")]
    TransformUnavailable {
        target_frame: String,
        source_frame: String,
        stamp: f64,
    },

    #[error("observations of kind '{0}' are not supported")]
    UnsupportedObservation(ObservationKind),

    #[error("the map has not been set up")]
    NoMap,

    /// Some part of the observation lies outside what the map can address.
    /// Nothing of it was integrated.
    #[error("observation reaches outside the map: {0}")]
    OutOfRange(#[from] RayError),
}

/// Why a publisher skipped a cycle. Always recoverable.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publisher '{publisher}' does not support map type '{map_type}'")]
    UnsupportedMap {
        publisher: String,
        map_type: &'static str,
    },

    #[error("publisher '{publisher}' could not render the map: {reason}")]
    Render { publisher: String, reason: String },
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("'{}' is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("I/O error at '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize map: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("mapper worker is not available")]
    WorkerUnavailable,
}
