// cartos_core/src/engine/mod.rs

//! The per-mapper engine: an observation queue drained by one worker thread
//! that owns the map builder and drives the publish cadence.

pub mod queue;
pub mod scheduler;
mod worker;

pub use queue::ObservationQueue;
pub use scheduler::PublishScheduler;

use crate::config::MapperConfig;
use crate::error::{ConfigError, LifecycleError, PersistError};
use crate::mapping::{MapBuilder, MapContext, ObservationFilter, SaveOutcome};
use crate::messages::ObservationHandle;
use crate::provider::{Connection, DataProvider};
use crate::publishing::Publisher;
use crate::types::TfProvider;
use crossbeam_channel::Sender;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use worker::{Worker, WorkerCommand};

// =========================================================================
// == Engine Types ==
// =========================================================================

/// Lifecycle of a mapper. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperState {
    Unconfigured,
    Configured,
    Running,
    Stopping,
    Stopped,
}

/// The engine options resolved from a `MapperConfig`.
#[derive(Debug, Clone)]
pub struct MapperSettings {
    pub map_frame: String,
    pub publish_period: Duration,
    pub tf_timeout: Duration,
}

impl From<&MapperConfig> for MapperSettings {
    fn from(config: &MapperConfig) -> Self {
        Self {
            map_frame: config.map_frame.clone(),
            publish_period: config.publish_period(),
            tf_timeout: config.tf_timeout(),
        }
    }
}

/// The named collaborators a mapper's configuration refers to.
pub struct MapperBindings<'a> {
    pub data_providers: &'a HashMap<String, Arc<DataProvider>>,
    pub publishers: &'a HashMap<String, Arc<dyn Publisher>>,
}

/// Counters shared between the engine and its worker.
#[derive(Debug, Default)]
pub struct MapperStats {
    pub(crate) processed: AtomicU64,
    pub(crate) skipped: AtomicU64,
    pub(crate) published: AtomicU64,
    pub(crate) discarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MapperStatsSnapshot {
    /// Observations integrated into the map.
    pub processed: u64,
    /// Observations the builder rejected (e.g. missing transform).
    pub skipped: u64,
    /// Publish cycles that handed a map to the publishers.
    pub published: u64,
    /// Observations dropped unprocessed at shutdown.
    pub discarded: u64,
}

impl MapperStats {
    pub fn snapshot(&self) -> MapperStatsSnapshot {
        MapperStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

// =========================================================================
// == Mapper Engine ==
// =========================================================================

/// One mapper: a map builder, the providers feeding it, the publishers it
/// feeds, and the worker thread that ties them together.
pub struct Mapper {
    name: String,
    state: MapperState,
    /// Held here except while the worker runs.
    builder: Option<Box<dyn MapBuilder>>,
    tf: Arc<dyn TfProvider>,
    settings: Option<MapperSettings>,
    filter: Option<ObservationFilter>,
    publishers: Vec<Arc<dyn Publisher>>,
    connections: Vec<Connection>,
    queue: Arc<ObservationQueue>,
    stop: Arc<AtomicBool>,
    stats: Arc<MapperStats>,
    commands: Option<Sender<WorkerCommand>>,
    handle: Option<JoinHandle<Box<dyn MapBuilder>>>,
}

impl Mapper {
    pub fn new(name: &str, builder: Box<dyn MapBuilder>, tf: Arc<dyn TfProvider>) -> Self {
        Self {
            name: name.to_string(),
            state: MapperState::Unconfigured,
            builder: Some(builder),
            tf,
            settings: None,
            filter: None,
            publishers: Vec::new(),
            connections: Vec::new(),
            queue: Arc::new(ObservationQueue::new()),
            stop: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(MapperStats::default()),
            commands: None,
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> MapperState {
        self.state
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> MapperStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn settings(&self) -> Option<&MapperSettings> {
        self.settings.as_ref()
    }

    /// Resolves providers and publishers, builds the empty map, and connects
    /// the acceptance-filtered callbacks. Spawns nothing.
    pub fn configure(&mut self, config: &MapperConfig, bindings: &MapperBindings) -> Result<(), ConfigError> {
        if self.state != MapperState::Unconfigured {
            return Err(ConfigError::AlreadyConfigured {
                mapper: self.name.clone(),
            });
        }
        config.validate()?;

        if config.data_providers.is_empty() {
            return Err(ConfigError::NoDataProviders {
                mapper: self.name.clone(),
            });
        }
        let providers = config
            .data_providers
            .iter()
            .map(|name| {
                bindings
                    .data_providers
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownDataProvider {
                        mapper: self.name.clone(),
                        provider: name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let publishers = config
            .map_publishers
            .iter()
            .map(|name| {
                bindings
                    .publishers
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownPublisher {
                        mapper: self.name.clone(),
                        publisher: name.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if publishers.is_empty() {
            warn!(mapper = %self.name, "using no publishers");
        }

        let builder = self.builder.as_mut().ok_or_else(|| ConfigError::MapSetup {
            mapper: self.name.clone(),
            reason: "map builder is not available".to_string(),
        })?;
        builder.setup_map(&MapContext {
            mapper: &self.name,
            map_frame: &config.map_frame,
        })?;
        let filter = builder.filter();

        self.connections = providers
            .iter()
            .map(|provider| {
                let queue = Arc::clone(&self.queue);
                let filter = filter.clone();
                provider.connect(move |observation: &ObservationHandle| {
                    if filter.accepts(observation) {
                        queue.push(Arc::clone(observation));
                    }
                })
            })
            .collect();

        info!(
            mapper = %self.name,
            map_frame = %config.map_frame,
            providers = ?config.data_providers,
            publishers = ?config.map_publishers,
            "mapper configured"
        );
        self.settings = Some(MapperSettings::from(config));
        self.filter = Some(filter);
        self.publishers = publishers;
        self.state = MapperState::Configured;
        Ok(())
    }

    /// Entry point for observations that do not come through a bound
    /// provider. Returns whether the observation was queued.
    pub fn on_observation(&self, observation: &ObservationHandle) -> bool {
        if !matches!(self.state, MapperState::Configured | MapperState::Running) {
            return false;
        }
        match &self.filter {
            Some(filter) if filter.accepts(observation) => {
                self.queue.push(Arc::clone(observation));
                true
            }
            _ => false,
        }
    }

    /// Spawns the worker thread. Only valid once, right after `configure`.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        let invalid = |state| LifecycleError::InvalidTransition {
            mapper: self.name.clone(),
            operation: "start",
            state,
        };
        if self.state != MapperState::Configured {
            return Err(invalid(self.state));
        }
        let (settings, builder) = match (self.settings.clone(), self.builder.take()) {
            (Some(settings), Some(builder)) => (settings, builder),
            (_, builder) => {
                self.builder = builder;
                return Err(invalid(self.state));
            }
        };

        self.stop.store(false, Ordering::Release);
        self.queue.resume();
        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
        let worker = Worker {
            name: self.name.clone(),
            settings,
            builder,
            publishers: self.publishers.clone(),
            queue: Arc::clone(&self.queue),
            stop: Arc::clone(&self.stop),
            commands: commands_rx,
            tf: Arc::clone(&self.tf),
            stats: Arc::clone(&self.stats),
        };

        let spawned = thread::Builder::new()
            .name(format!("mapper-{}", self.name))
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                self.commands = Some(commands_tx);
                self.state = MapperState::Running;
                info!(mapper = %self.name, "mapper started");
                Ok(())
            }
            Err(source) => {
                // The builder went down with the closure.
                self.connections.clear();
                self.state = MapperState::Stopped;
                Err(LifecycleError::Spawn {
                    mapper: self.name.clone(),
                    source,
                })
            }
        }
    }

    /// Disconnects the providers, stops the worker between two items,
    /// discards the backlog, and joins the thread. Safe to call repeatedly.
    pub fn stop(&mut self) {
        match self.state {
            MapperState::Stopping | MapperState::Stopped => return,
            MapperState::Unconfigured | MapperState::Configured => {
                self.connections.clear();
                let discarded = self.queue.drain_discard();
                self.stats.discarded.fetch_add(discarded as u64, Ordering::Relaxed);
                self.state = MapperState::Stopped;
                return;
            }
            MapperState::Running => {}
        }

        let started = Instant::now();
        self.state = MapperState::Stopping;
        self.connections.clear();
        self.stop.store(true, Ordering::Release);
        self.queue.interrupt();
        let mut discarded = self.queue.drain_discard();
        self.commands = None;

        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(builder) => self.builder = Some(builder),
                Err(_) => error!(mapper = %self.name, "worker thread panicked"),
            }
        }
        // Callbacks already running when we disconnected may have pushed late.
        discarded += self.queue.drain_discard();
        self.stats.discarded.fetch_add(discarded as u64, Ordering::Relaxed);

        self.state = MapperState::Stopped;
        info!(
            mapper = %self.name,
            discarded,
            elapsed = ?started.elapsed(),
            "mapper stopped"
        );
    }

    /// Persists the map into `path/<mapper name>/`, creating the directory
    /// if needed. While running, the save executes on the worker thread.
    pub fn save_map(&self, path: &Path) -> Result<SaveOutcome, PersistError> {
        let directory = path.join(&self.name);
        let result = match (&self.commands, self.state) {
            (Some(commands), MapperState::Running) => {
                let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
                commands
                    .send(WorkerCommand::SaveMap {
                        directory: directory.clone(),
                        reply: reply_tx,
                    })
                    .map_err(|_| PersistError::WorkerUnavailable)?;
                self.queue.wake();
                reply_rx.recv().map_err(|_| PersistError::WorkerUnavailable)?
            }
            _ => match &self.builder {
                Some(builder) => save_builder_map(&**builder, &directory),
                None => Ok(SaveOutcome::NoMap),
            },
        };

        match &result {
            Ok(SaveOutcome::Written(files)) => {
                info!(mapper = %self.name, directory = %directory.display(), files = files.len(), "map saved")
            }
            Ok(SaveOutcome::NoMap) => debug!(mapper = %self.name, "no map to save"),
            Err(error) => error!(mapper = %self.name, %error, "failed to save map"),
        }
        result
    }
}

impl Drop for Mapper {
    fn drop(&mut self) {
        self.stop();
    }
}

pub(crate) fn save_builder_map(builder: &dyn MapBuilder, directory: &Path) -> Result<SaveOutcome, PersistError> {
    if !builder.has_map() {
        return Ok(SaveOutcome::NoMap);
    }
    ensure_directory(directory)?;
    builder.persist(directory)
}

fn ensure_directory(directory: &Path) -> Result<(), PersistError> {
    if directory.exists() && !directory.is_dir() {
        return Err(PersistError::NotADirectory(directory.to_path_buf()));
    }
    std::fs::create_dir_all(directory).map_err(|source| PersistError::Io {
        path: directory.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::TfTree;
    use crate::testing::{tagged_observation, wait_for, RecordingBuilder, RecordingPublisher};
    use std::collections::HashSet;

    const WAIT: Duration = Duration::from_secs(5);

    struct Fixture {
        providers: HashMap<String, Arc<DataProvider>>,
        publishers: HashMap<String, Arc<dyn Publisher>>,
        recorder: Arc<RecordingPublisher>,
        unsupported: Arc<RecordingPublisher>,
        panicking: Arc<RecordingPublisher>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut providers = HashMap::new();
            for name in ["front", "rear"] {
                providers.insert(name.to_string(), Arc::new(DataProvider::new(name)));
            }
            let recorder = RecordingPublisher::new("recorder");
            let unsupported = RecordingPublisher::unsupported("unsupported");
            let panicking = RecordingPublisher::panicking("panicking");
            let mut publishers: HashMap<String, Arc<dyn Publisher>> = HashMap::new();
            publishers.insert("recorder".to_string(), recorder.clone());
            publishers.insert("failing".to_string(), RecordingPublisher::failing("failing"));
            publishers.insert("unsupported".to_string(), unsupported.clone());
            publishers.insert("panicking".to_string(), panicking.clone());
            Self {
                providers,
                publishers,
                recorder,
                unsupported,
                panicking,
            }
        }

        fn bindings(&self) -> MapperBindings<'_> {
            MapperBindings {
                data_providers: &self.providers,
                publishers: &self.publishers,
            }
        }

        fn provider(&self, name: &str) -> Arc<DataProvider> {
            Arc::clone(&self.providers[name])
        }
    }

    fn config(rate: f64, providers: &[&str], publishers: &[&str]) -> MapperConfig {
        MapperConfig {
            publish_rate: rate,
            data_providers: providers.iter().map(|s| s.to_string()).collect(),
            map_publishers: publishers.iter().map(|s| s.to_string()).collect(),
            ..MapperConfig::default()
        }
    }

    fn mapper(builder: RecordingBuilder) -> Mapper {
        Mapper::new("test_mapper", Box::new(builder), Arc::new(TfTree::new("/map")))
    }

    #[test]
    fn rapid_pushes_are_processed_in_order_then_published() {
        let fixture = Fixture::new();
        let builder = RecordingBuilder::new();
        let log = builder.log();
        let mut mapper = mapper(builder);
        mapper
            .configure(&config(10.0, &["front"], &["recorder"]), &fixture.bindings())
            .unwrap();
        mapper.start().unwrap();

        let front = fixture.provider("front");
        for seq in 0..5 {
            front.publish(tagged_observation("A", seq));
        }
        assert!(wait_for(WAIT, || log.lock().len() == 5));
        assert!(wait_for(WAIT, || fixture.recorder.count() >= 1));
        mapper.stop();

        let seqs: Vec<u64> = log.lock().iter().map(|(_, seq)| *seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert_eq!(mapper.stats().processed, 5);
        assert_eq!(mapper.state(), MapperState::Stopped);
    }

    #[test]
    fn publishes_on_cadence_under_silence() {
        let fixture = Fixture::new();
        let mut mapper = mapper(RecordingBuilder::new());
        mapper
            .configure(&config(10.0, &["front"], &["recorder"]), &fixture.bindings())
            .unwrap();
        mapper.start().unwrap();
        thread::sleep(Duration::from_millis(350));
        mapper.stop();

        let calls = fixture.recorder.calls.lock();
        assert!(
            (2..=5).contains(&calls.len()),
            "expected about 3 publishes, got {}",
            calls.len()
        );
        // Every cycle saw the same, empty map.
        assert!(calls.iter().all(|(_, cells)| *cells == 0));
        assert!(calls.windows(2).all(|w| w[1].0 >= w[0].0));
    }

    #[test]
    fn publishes_on_cadence_while_draining_a_backlog() {
        let fixture = Fixture::new();
        let builder = RecordingBuilder::new().with_delay(Duration::from_millis(1));
        let log = builder.log();
        let mut mapper = mapper(builder);
        mapper
            .configure(&config(50.0, &["front"], &["recorder"]), &fixture.bindings())
            .unwrap();
        mapper.start().unwrap();

        let front = fixture.provider("front");
        for seq in 0..500 {
            front.publish(tagged_observation("A", seq));
        }
        // 500 items take at least 500 ms; three 20 ms cycles fit well before that.
        assert!(wait_for(WAIT, || fixture.recorder.count() >= 3));
        let processed_at_third_cycle = log.lock().len();
        assert!(
            processed_at_third_cycle < 500,
            "backlog drained before the third publish"
        );

        assert!(wait_for(WAIT, || log.lock().len() == 500));
        let cycles_while_draining = fixture.recorder.count();
        mapper.stop();
        assert!(cycles_while_draining > 3);
        assert_eq!(mapper.stats().processed, 500);
    }

    #[test]
    fn zero_publish_rate_never_publishes() {
        let fixture = Fixture::new();
        let builder = RecordingBuilder::new();
        let log = builder.log();
        let mut mapper = mapper(builder);
        mapper
            .configure(&config(0.0, &["front"], &["recorder"]), &fixture.bindings())
            .unwrap();
        mapper.start().unwrap();

        let front = fixture.provider("front");
        for seq in 0..20 {
            front.publish(tagged_observation("A", seq));
        }
        assert!(wait_for(WAIT, || log.lock().len() == 20));
        thread::sleep(Duration::from_millis(300));
        mapper.stop();

        assert_eq!(fixture.recorder.count(), 0);
        assert_eq!(mapper.stats().published, 0);
        assert_eq!(mapper.stats().processed, 20);
    }

    #[test]
    fn stop_is_bounded_and_processing_ends_on_a_prefix() {
        let fixture = Fixture::new();
        let builder = RecordingBuilder::new().with_delay(Duration::from_millis(1));
        let log = builder.log();
        let mut mapper = mapper(builder);
        mapper
            .configure(&config(10.0, &["front"], &[]), &fixture.bindings())
            .unwrap();
        mapper.start().unwrap();

        let front = fixture.provider("front");
        for seq in 0..10_000 {
            front.publish(tagged_observation("A", seq));
        }
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        mapper.stop();
        assert!(started.elapsed() < Duration::from_secs(1));

        let processed = log.lock().len();
        assert!(processed < 10_000);
        let stats = mapper.stats();
        assert_eq!(stats.processed as usize, processed);
        assert_eq!(stats.processed + stats.discarded, 10_000);

        // Nothing runs after stop returns, and what ran is a prefix.
        thread::sleep(Duration::from_millis(30));
        let log = log.lock();
        assert_eq!(log.len(), processed);
        assert!(log.iter().enumerate().all(|(i, (_, seq))| *seq == i as u64));
        assert_eq!(mapper.queue_len(), 0);
    }

    #[test]
    fn rejected_kinds_never_reach_the_queue() {
        let fixture = Fixture::new();
        let builder = RecordingBuilder::new().accepting(&["A"]);
        let log = builder.log();
        let mut mapper = mapper(builder);
        mapper
            .configure(&config(10.0, &["front"], &[]), &fixture.bindings())
            .unwrap();

        let front = fixture.provider("front");
        for seq in 0..20 {
            let kind = if seq % 2 == 0 { "A" } else { "B" };
            front.publish(tagged_observation(kind, seq));
        }
        // Filtering happens on the callback, before the worker exists.
        assert_eq!(mapper.queue_len(), 10);

        mapper.start().unwrap();
        assert!(wait_for(WAIT, || log.lock().len() == 10));
        mapper.stop();

        let log = log.lock();
        assert!(log.iter().all(|(kind, _)| kind == "A"));
        let seqs: Vec<u64> = log.iter().map(|(_, seq)| *seq).collect();
        assert_eq!(seqs, (0..20).step_by(2).collect::<Vec<_>>());
    }

    #[test]
    fn concurrent_producers_keep_per_producer_order() {
        let fixture = Fixture::new();
        let builder = RecordingBuilder::new();
        let log = builder.log();
        let mut mapper = mapper(builder);
        mapper
            .configure(&config(50.0, &["front", "rear"], &["recorder"]), &fixture.bindings())
            .unwrap();
        mapper.start().unwrap();

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let provider = fixture.provider(if p % 2 == 0 { "front" } else { "rear" });
                thread::spawn(move || {
                    for seq in 0..250 {
                        provider.publish(tagged_observation(&format!("P{}", p), seq));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        assert!(wait_for(WAIT, || log.lock().len() == 1000));
        mapper.stop();

        let log = log.lock();
        let unique: HashSet<_> = log.iter().cloned().collect();
        assert_eq!(unique.len(), 1000, "no duplicates");
        for p in 0..4 {
            let tag = format!("P{}", p);
            let seqs: Vec<u64> = log.iter().filter(|(k, _)| *k == tag).map(|(_, s)| *s).collect();
            assert_eq!(seqs, (0..250).collect::<Vec<_>>());
        }
    }

    #[test]
    fn save_map_creates_missing_directory() {
        let fixture = Fixture::new();
        let mut mapper = mapper(RecordingBuilder::new());
        mapper
            .configure(&config(10.0, &["front"], &[]), &fixture.bindings())
            .unwrap();
        mapper.start().unwrap();
        fixture.provider("front").publish(tagged_observation("A", 0));

        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("nested").join("maps");
        let outcome = mapper.save_map(&target).unwrap();
        let expected = target.join("test_mapper").join("recording.toml");
        assert_eq!(outcome, SaveOutcome::Written(vec![expected.clone()]));
        assert!(expected.is_file());

        // Saving again after stop uses the returned builder.
        mapper.stop();
        assert!(matches!(mapper.save_map(&target), Ok(SaveOutcome::Written(_))));
    }

    #[test]
    fn save_map_without_map_is_a_no_op() {
        let mut mapper = mapper(RecordingBuilder::new());
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("never_created");
        assert_eq!(mapper.save_map(&target).unwrap(), SaveOutcome::NoMap);
        assert!(!target.exists());
        mapper.stop();
        assert_eq!(mapper.save_map(&target).unwrap(), SaveOutcome::NoMap);
    }

    #[test]
    fn save_map_onto_a_file_fails() {
        let fixture = Fixture::new();
        let mut mapper = mapper(RecordingBuilder::new());
        mapper
            .configure(&config(10.0, &["front"], &[]), &fixture.bindings())
            .unwrap();
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("test_mapper"), "occupied").unwrap();
        assert!(matches!(mapper.save_map(root.path()), Err(PersistError::NotADirectory(_))));
    }

    #[test]
    fn empty_provider_list_fails_without_spawning() {
        let fixture = Fixture::new();
        let mut mapper = mapper(RecordingBuilder::new());
        let err = mapper.configure(&config(10.0, &[], &[]), &fixture.bindings()).unwrap_err();
        assert!(matches!(err, ConfigError::NoDataProviders { .. }));
        assert_eq!(mapper.state(), MapperState::Unconfigured);
        assert!(mapper.handle.is_none());
        assert!(matches!(
            mapper.start(),
            Err(LifecycleError::InvalidTransition {
                state: MapperState::Unconfigured,
                ..
            })
        ));
    }

    #[test]
    fn unknown_names_and_setup_failures_are_config_errors() {
        let fixture = Fixture::new();

        let mut unknown_provider = mapper(RecordingBuilder::new());
        let err = unknown_provider
            .configure(&config(10.0, &["front", "side"], &[]), &fixture.bindings())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDataProvider { ref provider, .. } if provider == "side"));

        let mut unknown_publisher = mapper(RecordingBuilder::new());
        let err = unknown_publisher
            .configure(&config(10.0, &["front"], &["rviz"]), &fixture.bindings())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPublisher { ref publisher, .. } if publisher == "rviz"));

        let mut failing = mapper(RecordingBuilder::new().failing_setup());
        let err = failing
            .configure(&config(10.0, &["front"], &[]), &fixture.bindings())
            .unwrap_err();
        assert!(matches!(err, ConfigError::MapSetup { .. }));

        // Nothing got connected on the way.
        assert_eq!(fixture.provider("front").subscriber_count(), 0);
    }

    #[test]
    fn lifecycle_misuse_is_rejected() {
        let fixture = Fixture::new();
        let mut mapper = mapper(RecordingBuilder::new());
        mapper
            .configure(&config(10.0, &["front"], &[]), &fixture.bindings())
            .unwrap();
        assert!(matches!(
            mapper.configure(&config(10.0, &["front"], &[]), &fixture.bindings()),
            Err(ConfigError::AlreadyConfigured { .. })
        ));

        mapper.start().unwrap();
        assert!(matches!(
            mapper.start(),
            Err(LifecycleError::InvalidTransition {
                state: MapperState::Running,
                ..
            })
        ));
        mapper.stop();
        mapper.stop();
        assert!(mapper.start().is_err());
        assert_eq!(fixture.provider("front").subscriber_count(), 0);
    }

    #[test]
    fn dropping_a_running_mapper_joins_the_worker() {
        let fixture = Fixture::new();
        let builder = RecordingBuilder::new();
        let log = builder.log();
        {
            let mut mapper = mapper(builder);
            mapper
                .configure(&config(10.0, &["front"], &[]), &fixture.bindings())
                .unwrap();
            mapper.start().unwrap();
            fixture.provider("front").publish(tagged_observation("A", 1));
            assert!(wait_for(WAIT, || log.lock().len() == 1));
        }
        assert_eq!(fixture.provider("front").subscriber_count(), 0);
        // The builder (and its log handle) went away with the mapper.
        assert_eq!(Arc::strong_count(&log), 1);
    }

    #[test]
    fn transform_misses_are_skipped_not_fatal() {
        let fixture = Fixture::new();
        let builder = RecordingBuilder::new().requiring_transform();
        let log = builder.log();
        let tf = Arc::new(TfTree::new("/map"));
        let mut mapper = Mapper::new("tf_mapper", Box::new(builder), tf.clone());
        let mut cfg = config(10.0, &["front"], &[]);
        cfg.tf_timeout = 0.0;
        mapper.configure(&cfg, &fixture.bindings()).unwrap();
        mapper.start().unwrap();

        let front = fixture.provider("front");
        front.publish(tagged_observation("A", 0));
        assert!(wait_for(WAIT, || mapper.stats().skipped == 1));

        tf.set_transform("sensor", nalgebra::Isometry3::identity());
        front.publish(tagged_observation("A", 1));
        assert!(wait_for(WAIT, || log.lock().len() == 1));
        mapper.stop();
        assert_eq!(log.lock()[0].1, 1);
    }

    #[test]
    fn failing_publisher_does_not_block_the_others() {
        let fixture = Fixture::new();
        let mut mapper = mapper(RecordingBuilder::new());
        mapper
            .configure(&config(50.0, &["front"], &["failing", "recorder"]), &fixture.bindings())
            .unwrap();
        mapper.start().unwrap();
        assert!(wait_for(WAIT, || fixture.recorder.count() >= 2));
        mapper.stop();
        assert!(mapper.stats().published >= 2);
    }

    #[test]
    fn publishers_are_only_handed_maps_they_support() {
        let fixture = Fixture::new();
        let mut mapper = mapper(RecordingBuilder::new());
        mapper
            .configure(&config(50.0, &["front"], &["unsupported", "recorder"]), &fixture.bindings())
            .unwrap();
        mapper.start().unwrap();
        assert!(wait_for(WAIT, || fixture.recorder.count() >= 2));
        mapper.stop();
        assert_eq!(fixture.unsupported.count(), 0);
    }

    #[test]
    fn builder_panic_skips_one_item_and_the_worker_carries_on() {
        let fixture = Fixture::new();
        let builder = RecordingBuilder::new().panicking_on(2);
        let log = builder.log();
        let mut mapper = mapper(builder);
        mapper
            .configure(&config(10.0, &["front"], &[]), &fixture.bindings())
            .unwrap();
        mapper.start().unwrap();

        let front = fixture.provider("front");
        for seq in 0..5 {
            front.publish(tagged_observation("A", seq));
        }
        assert!(wait_for(WAIT, || log.lock().len() == 4));
        assert_eq!(mapper.state(), MapperState::Running);

        // The worker still answers commands after the panic.
        let root = tempfile::tempdir().unwrap();
        assert!(matches!(mapper.save_map(root.path()), Ok(SaveOutcome::Written(_))));
        mapper.stop();

        let seqs: Vec<u64> = log.lock().iter().map(|(_, seq)| *seq).collect();
        assert_eq!(seqs, vec![0, 1, 3, 4]);
        let stats = mapper.stats();
        assert_eq!((stats.processed, stats.skipped), (4, 1));
        // The builder came back from the worker.
        assert!(matches!(mapper.save_map(root.path()), Ok(SaveOutcome::Written(_))));
    }

    #[test]
    fn far_cloud_is_skipped_and_the_next_one_is_integrated() {
        use crate::mapping::{OccupancyGrid3DParams, OccupancyGridMapper3D};
        use crate::messages::{Observation, PointCloud3d};
        use crate::types::TimeFrame;
        use nalgebra::{Isometry3, Point3};

        let fixture = Fixture::new();
        let tf = Arc::new(TfTree::new("/map"));
        tf.set_transform("lidar", Isometry3::identity());
        let builder = OccupancyGridMapper3D::new(OccupancyGrid3DParams::default());
        let mut mapper = Mapper::new("voxels", Box::new(builder), tf);
        let mut cfg = config(10.0, &["front"], &[]);
        cfg.tf_timeout = 0.0;
        mapper.configure(&cfg, &fixture.bindings()).unwrap();
        mapper.start().unwrap();

        let cloud = |x: f64| {
            Observation::point_cloud(
                "lidar",
                TimeFrame::instant(0.0),
                PointCloud3d::new(vec![Point3::new(1.0, 0.0, 0.0), Point3::new(x, 0.0, 0.0)]),
            )
        };
        let front = fixture.provider("front");
        front.publish(cloud(-3.0e9));
        front.publish(cloud(2.0));
        assert!(wait_for(WAIT, || mapper.stats().processed == 1));
        assert_eq!(mapper.state(), MapperState::Running);
        mapper.stop();
        assert_eq!(mapper.stats().skipped, 1);
    }

    #[test]
    fn panicking_publisher_is_contained() {
        let fixture = Fixture::new();
        let mut mapper = mapper(RecordingBuilder::new());
        mapper
            .configure(&config(50.0, &["front"], &["panicking", "recorder"]), &fixture.bindings())
            .unwrap();
        mapper.start().unwrap();
        assert!(wait_for(WAIT, || fixture.recorder.count() >= 3));
        mapper.stop();
        assert!(fixture.panicking.count() >= 3);
        assert!(mapper.stats().published >= 3);
    }

    #[test]
    fn direct_observations_respect_filter_and_state() {
        let fixture = Fixture::new();
        let mut mapper = mapper(RecordingBuilder::new().accepting(&["A"]));
        let obs = tagged_observation("A", 0).into_handle();
        assert!(!mapper.on_observation(&obs));

        mapper
            .configure(&config(10.0, &["front"], &[]), &fixture.bindings())
            .unwrap();
        assert!(mapper.on_observation(&obs));
        assert!(!mapper.on_observation(&tagged_observation("B", 1).into_handle()));
        assert_eq!(mapper.queue_len(), 1);
        mapper.stop();
        assert_eq!(mapper.stats().discarded, 1);
        assert!(!mapper.on_observation(&obs));
    }
}
