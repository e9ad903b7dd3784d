// cartos_core/src/types.rs

use nalgebra::Isometry3;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// --- Core Type Aliases ---
/// Wall-clock time in seconds since the UNIX epoch.
pub type Timestamp = f64;

/// The time interval an observation covers. Point-like sensors use
/// `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimeFrame {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeFrame {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// A zero-length interval at `stamp`.
    pub fn instant(stamp: Timestamp) -> Self {
        Self {
            start: stamp,
            end: stamp,
        }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Current wall-clock time as a `Timestamp`.
pub fn now_seconds() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// --- Core Trait for Transform Lookups ---
// Map builders only ever see this trait. The host decides what backs it.
pub trait TfProvider: Send + Sync {
    /// Returns the pose of `source_frame` expressed in `target_frame` at `time`,
    /// i.e. the transform that maps points from the source frame into the
    /// target frame. Waits at most `timeout` for the transform to become
    /// available and returns `None` if it does not.
    fn lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        time: Timestamp,
        timeout: Duration,
    ) -> Option<Isometry3<f64>>;
}
