// cartos_core/src/testing.rs

//! Instrumented builders and publishers for the engine tests.

use crate::error::{ConfigError, PersistError, ProcessError, PublishError};
use crate::mapping::{write_artifact, MapBuilder, MapContext, ObservationFilter, ProcessContext, SaveOutcome};
use crate::maps::{MapData, OccupancyGrid2D};
use crate::messages::{Observation, ObservationHandle, ObservationKind, Payload};
use crate::publishing::Publisher;
use crate::types::{TimeFrame, Timestamp};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A custom payload carrying a producer tag and a sequence number.
#[derive(Debug, Clone)]
pub struct Tagged {
    pub kind: String,
    pub seq: u64,
}

impl Payload for Tagged {
    fn kind(&self) -> &str {
        &self.kind
    }
}

pub fn tagged_observation(kind: &str, seq: u64) -> Observation {
    Observation::custom(
        "sensor",
        TimeFrame::instant(seq as f64),
        Tagged {
            kind: kind.to_string(),
            seq,
        },
    )
}

pub fn tagged(kind: &str, seq: u64) -> ObservationHandle {
    tagged_observation(kind, seq).into_handle()
}

pub fn seq_of(observation: &Observation) -> Option<u64> {
    observation.payload::<Tagged>().map(|t| t.seq)
}

/// Polls `condition` until it holds or `timeout` expires.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    condition()
}

pub type ProcessLog = Arc<Mutex<Vec<(String, u64)>>>;

// --- Recording builder ---

#[derive(Serialize)]
struct RecordingArtifact {
    processed: u64,
}

/// Records every processed observation as `(kind, seq)`.
pub struct RecordingBuilder {
    pub accept: Vec<String>,
    pub delay: Duration,
    pub fail_setup: bool,
    pub require_transform: bool,
    /// Panics once, on the observation with this sequence number.
    pub panic_on: Option<u64>,
    pub log: ProcessLog,
    map: Option<MapData>,
}

impl RecordingBuilder {
    pub fn new() -> Self {
        Self {
            accept: Vec::new(),
            delay: Duration::ZERO,
            fail_setup: false,
            require_transform: false,
            panic_on: None,
            log: Arc::new(Mutex::new(Vec::new())),
            map: None,
        }
    }

    pub fn accepting(mut self, kinds: &[&str]) -> Self {
        self.accept = kinds.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }

    pub fn requiring_transform(mut self) -> Self {
        self.require_transform = true;
        self
    }

    pub fn panicking_on(mut self, seq: u64) -> Self {
        self.panic_on = Some(seq);
        self
    }

    pub fn log(&self) -> ProcessLog {
        Arc::clone(&self.log)
    }
}

impl MapBuilder for RecordingBuilder {
    fn filter(&self) -> ObservationFilter {
        if self.accept.is_empty() {
            ObservationFilter::None
        } else {
            ObservationFilter::kinds(self.accept.iter().map(|k| ObservationKind::Custom(k.clone())))
        }
    }

    fn setup_map(&mut self, context: &MapContext) -> Result<(), ConfigError> {
        if self.fail_setup {
            return Err(ConfigError::MapSetup {
                mapper: context.mapper.to_string(),
                reason: "refusing to build a map".to_string(),
            });
        }
        self.map = Some(MapData::OccupancyGrid2D(OccupancyGrid2D::new(context.map_frame, 1.0)?));
        Ok(())
    }

    fn process(&mut self, observation: &Observation, context: &ProcessContext) -> Result<(), ProcessError> {
        if self.require_transform {
            context.lookup_sensor_pose(observation)?;
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let tag = observation
            .payload::<Tagged>()
            .ok_or_else(|| ProcessError::UnsupportedObservation(observation.kind()))?;
        if self.panic_on == Some(tag.seq) {
            self.panic_on = None;
            panic!("builder failed on observation {}", tag.seq);
        }
        self.log.lock().push((tag.kind.clone(), tag.seq));
        Ok(())
    }

    fn snapshot(&mut self) -> Option<&MapData> {
        self.map.as_ref()
    }

    fn has_map(&self) -> bool {
        self.map.is_some()
    }

    fn persist(&self, directory: &Path) -> Result<SaveOutcome, PersistError> {
        let artifact = RecordingArtifact {
            processed: self.log.lock().len() as u64,
        };
        let path = write_artifact(directory, "recording.toml", &artifact)?;
        Ok(SaveOutcome::Written(vec![path]))
    }
}

// --- Recording publisher ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behaviour {
    Record,
    Fail,
    Unsupported,
    Panic,
}

/// Records `(stamp, map size)` for every publish call.
pub struct RecordingPublisher {
    name: String,
    behaviour: Behaviour,
    pub calls: Mutex<Vec<(Timestamp, usize)>>,
}

impl RecordingPublisher {
    fn with_behaviour(name: &str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behaviour,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn new(name: &str) -> Arc<Self> {
        Self::with_behaviour(name, Behaviour::Record)
    }

    /// A publisher whose every publish call fails.
    pub fn failing(name: &str) -> Arc<Self> {
        Self::with_behaviour(name, Behaviour::Fail)
    }

    /// A publisher that supports no map type at all.
    pub fn unsupported(name: &str) -> Arc<Self> {
        Self::with_behaviour(name, Behaviour::Unsupported)
    }

    /// A publisher that panics after recording the call.
    pub fn panicking(name: &str) -> Arc<Self> {
        Self::with_behaviour(name, Behaviour::Panic)
    }

    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }
}

impl Publisher for RecordingPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports(&self, _map: &MapData) -> bool {
        self.behaviour != Behaviour::Unsupported
    }

    fn publish(&self, map: &MapData, stamp: Timestamp) -> Result<(), PublishError> {
        self.calls.lock().push((stamp, map.len()));
        match self.behaviour {
            Behaviour::Record => Ok(()),
            Behaviour::Fail => Err(PublishError::Render {
                publisher: self.name.clone(),
                reason: "sink closed".to_string(),
            }),
            Behaviour::Unsupported => Err(PublishError::UnsupportedMap {
                publisher: self.name.clone(),
                map_type: map.type_name(),
            }),
            Behaviour::Panic => panic!("publisher '{}' failed", self.name),
        }
    }
}
