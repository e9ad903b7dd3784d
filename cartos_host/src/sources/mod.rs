// cartos_host/src/sources/mod.rs

//! Simulated sensors. Each source runs on its own thread and publishes into
//! one `DataProvider` at a fixed rate.

mod cloud;
mod scan;

pub use cloud::CloudSource;
pub use scan::ScanSource;

use cartos_core::messages::Observation;
use cartos_core::provider::DataProvider;
use cartos_core::types::{now_seconds, Timestamp};
use nalgebra::{Point3, Vector3};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

// =========================================================================
// == Environment ==
// =========================================================================

/// An axis-aligned box room centred on the origin of the root frame.
#[derive(Debug, Clone, Copy)]
pub struct Room {
    pub half_extents: Vector3<f64>,
}

impl Room {
    pub fn new(half_extents: [f64; 3]) -> Self {
        Self {
            half_extents: Vector3::new(half_extents[0], half_extents[1], half_extents[2]),
        }
    }

    pub fn contains(&self, p: &Point3<f64>) -> bool {
        (0..3).all(|axis| p[axis].abs() < self.half_extents[axis])
    }

    /// Distance from `origin` along the unit vector `direction` to the wall
    /// it hits. `None` if the origin is outside the room.
    pub fn cast(&self, origin: &Point3<f64>, direction: &Vector3<f64>) -> Option<f64> {
        if !self.contains(origin) {
            return None;
        }
        (0..3)
            .filter_map(|axis| {
                let d = direction[axis];
                if d > 0.0 {
                    Some((self.half_extents[axis] - origin[axis]) / d)
                } else if d < 0.0 {
                    Some((-self.half_extents[axis] - origin[axis]) / d)
                } else {
                    None
                }
            })
            .fold(None, |best: Option<f64>, t| Some(best.map_or(t, |b| b.min(t))))
    }
}

// =========================================================================
// == Source Contract ==
// =========================================================================

/// The contract for a simulated sensor.
pub trait ObservationSource: Send {
    fn name(&self) -> &str;

    /// Publishing rate in Hz.
    fn rate_hz(&self) -> f64;

    /// Produces one observation stamped at `stamp`.
    fn sample(&mut self, stamp: Timestamp) -> Observation;
}

/// A running source thread. Dropping it stops the thread.
pub struct SourceHandle {
    name: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<u64>>,
}

impl SourceHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops the thread and returns how many observations it published.
    pub fn stop(&mut self) -> u64 {
        let Some(handle) = self.handle.take() else {
            return 0;
        };
        self.stop.store(true, Ordering::Release);
        handle.thread().unpark();
        let published = handle.join().unwrap_or(0);
        debug!(source = %self.name, published, "source stopped");
        published
    }
}

impl Drop for SourceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawns a thread that samples `source` at its rate and publishes every
/// observation through `provider`.
pub fn spawn_source(mut source: Box<dyn ObservationSource>, provider: Arc<DataProvider>) -> io::Result<SourceHandle> {
    let name = source.name().to_string();
    let period = Duration::try_from_secs_f64(1.0 / source.rate_hz()).unwrap_or(Duration::from_secs(1));
    let stop = Arc::new(AtomicBool::new(false));

    let handle = {
        let stop = Arc::clone(&stop);
        thread::Builder::new().name(format!("source-{}", name)).spawn(move || {
            let mut published = 0u64;
            let mut next_tick = Instant::now();
            while !stop.load(Ordering::Acquire) {
                provider.publish(source.sample(now_seconds()));
                published += 1;
                next_tick += period;
                // Unparked early by `SourceHandle::stop`.
                thread::park_timeout(next_tick.saturating_duration_since(Instant::now()));
            }
            published
        })?
    };

    info!(source = %name, period = ?period, "source started");
    Ok(SourceHandle {
        name,
        stop,
        handle: Some(handle),
    })
}
