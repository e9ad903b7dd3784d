// cartos_host/src/runtime.rs

//! Wires a scenario together: transform tree, simulated sensors, publishers
//! and mappers, then drives them through one run.

use crate::config::{ComponentEntry, HostConfig, HostSection, ProviderConfig};
use crate::registry::{MapperRegistry, PublisherRegistry};
use crate::sources::{spawn_source, CloudSource, ObservationSource, Room, ScanSource, SourceHandle};
use anyhow::{bail, Context};
use cartos_core::config::MapperConfig;
use cartos_core::engine::{Mapper, MapperBindings, MapperState};
use cartos_core::error::PersistError;
use cartos_core::frames::TfTree;
use cartos_core::mapping::SaveOutcome;
use cartos_core::provider::DataProvider;
use cartos_core::publishing::Publisher;
use cartos_core::topics::TopicBus;
use cartos_core::types::TfProvider;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use walkdir::WalkDir;

// =========================================================================
// == Run Report ==
// =========================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub name: String,
    pub published: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapperReport {
    pub name: String,
    pub processed: u64,
    pub skipped: u64,
    pub published: u64,
    pub discarded: u64,
    /// Files written by the final save. Empty when there was no map.
    pub saved: Vec<PathBuf>,
    /// Set when the final save failed.
    pub save_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TopicReport {
    pub name: String,
    pub published: u64,
    pub buffered: usize,
}

/// What one run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub elapsed_seconds: f64,
    pub sources: Vec<SourceReport>,
    pub mappers: Vec<MapperReport>,
    pub topics: Vec<TopicReport>,
}

// =========================================================================
// == Host ==
// =========================================================================

/// A fully wired scenario. Mappers are configured on `build`; nothing runs
/// until `start`.
pub struct Host {
    settings: HostSection,
    tf: Arc<TfTree>,
    bus: TopicBus,
    providers: HashMap<String, Arc<DataProvider>>,
    publishers: HashMap<String, Arc<dyn Publisher>>,
    /// Sources waiting for `start`.
    pending_sources: Vec<(Box<dyn ObservationSource>, Arc<DataProvider>)>,
    sources: Vec<SourceHandle>,
    source_reports: Vec<SourceReport>,
    /// In configuration order.
    mappers: Vec<Mapper>,
}

impl Host {
    pub fn build(config: HostConfig, mappers: &MapperRegistry, publishers: &PublisherRegistry) -> anyhow::Result<Self> {
        let HostConfig {
            host: settings,
            world,
            frames,
            providers: provider_configs,
            publishers: publisher_values,
            mappers: mapper_values,
        } = config;

        // --- 1. Transform Tree ---
        let tf = Arc::new(TfTree::new(&settings.root_frame));
        for frame in &frames {
            tf.set_transform(&frame.name, frame.pose());
        }

        // --- 2. Simulated Sensors ---
        let room = Room::new(world.room_half_extents);
        let seed = settings.seed.unwrap_or_else(rand::random);
        let mut providers = HashMap::new();
        let mut pending_sources = Vec::new();
        for (index, provider_config) in provider_configs.into_iter().enumerate() {
            let name = provider_config.name().to_string();
            if providers.contains_key(&name) {
                bail!("duplicate provider name '{}'", name);
            }
            let source_seed = seed.wrapping_add(index as u64);
            let source: Box<dyn ObservationSource> = match provider_config {
                ProviderConfig::Scan2d(scan) => {
                    let pose = sensor_pose(&tf, &scan.frame)?;
                    Box::new(ScanSource::new(scan, pose, room, source_seed)?)
                }
                ProviderConfig::Cloud3d(cloud) => {
                    let pose = sensor_pose(&tf, &cloud.frame)?;
                    Box::new(CloudSource::new(cloud, pose, room, source_seed)?)
                }
            };
            let provider = Arc::new(DataProvider::new(&name));
            pending_sources.push((source, Arc::clone(&provider)));
            providers.insert(name, provider);
        }

        // --- 3. Publishers ---
        let mut bus = TopicBus::new();
        let mut publisher_map = HashMap::new();
        for value in &publisher_values {
            let entry = ComponentEntry::from_value(value)?;
            if publisher_map.contains_key(&entry.name) {
                bail!("duplicate publisher name '{}'", entry.name);
            }
            let publisher = publishers
                .build(&entry, value, &mut bus)
                .with_context(|| format!("failed to build publisher '{}'", entry.name))?;
            publisher_map.insert(entry.name, publisher);
        }

        // --- 4. Mappers ---
        let bindings = MapperBindings {
            data_providers: &providers,
            publishers: &publisher_map,
        };
        let mut built: Vec<Mapper> = Vec::new();
        for value in &mapper_values {
            let entry = ComponentEntry::from_value(value)?;
            if built.iter().any(|m| m.name() == entry.name) {
                bail!("duplicate mapper name '{}'", entry.name);
            }
            let mapper_config: MapperConfig = value
                .deserialize()
                .with_context(|| format!("invalid engine options for mapper '{}'", entry.name))?;
            let builder = mappers
                .build(&entry.kind, value)
                .with_context(|| format!("failed to build mapper '{}'", entry.name))?;
            let mut mapper = Mapper::new(&entry.name, builder, Arc::clone(&tf) as Arc<dyn TfProvider>);
            mapper
                .configure(&mapper_config, &bindings)
                .with_context(|| format!("failed to configure mapper '{}'", entry.name))?;
            built.push(mapper);
        }

        info!(
            providers = providers.len(),
            publishers = publisher_map.len(),
            mappers = built.len(),
            "scenario built"
        );
        Ok(Self {
            settings,
            tf,
            bus,
            providers,
            publishers: publisher_map,
            pending_sources,
            sources: Vec::new(),
            source_reports: Vec::new(),
            mappers: built,
        })
    }

    pub fn settings(&self) -> &HostSection {
        &self.settings
    }

    pub fn tf(&self) -> &Arc<TfTree> {
        &self.tf
    }

    pub fn provider(&self, name: &str) -> Option<&Arc<DataProvider>> {
        self.providers.get(name)
    }

    pub fn publisher(&self, name: &str) -> Option<&Arc<dyn Publisher>> {
        self.publishers.get(name)
    }

    pub fn bus(&self) -> &TopicBus {
        &self.bus
    }

    pub fn mappers(&self) -> &[Mapper] {
        &self.mappers
    }

    pub fn mapper(&self, name: &str) -> Option<&Mapper> {
        self.mappers.iter().find(|m| m.name() == name)
    }

    /// Starts every mapper, then every source, so no observation is published
    /// before its consumers are running.
    pub fn start(&mut self) -> anyhow::Result<()> {
        for mapper in &mut self.mappers {
            mapper
                .start()
                .with_context(|| format!("failed to start mapper '{}'", mapper.name()))?;
        }
        for (source, provider) in self.pending_sources.drain(..) {
            let name = source.name().to_string();
            let handle =
                spawn_source(source, provider).with_context(|| format!("failed to start source '{}'", name))?;
            self.sources.push(handle);
        }
        Ok(())
    }

    /// Saves every mapper's map under `directory/<mapper name>/`. One failed
    /// save does not stop the rest.
    pub fn save_maps(&self, directory: &Path) -> Vec<(String, Result<SaveOutcome, PersistError>)> {
        self.mappers
            .iter()
            .map(|mapper| (mapper.name().to_string(), mapper.save_map(directory)))
            .collect()
    }

    fn stop_sources(&mut self) {
        for mut source in self.sources.drain(..) {
            let published = source.stop();
            self.source_reports.push(SourceReport {
                name: source.name().to_string(),
                published,
            });
        }
    }

    /// Stops the sources, then the mappers in reverse order. Idempotent.
    pub fn shutdown(&mut self) {
        self.stop_sources();
        for mapper in self.mappers.iter_mut().rev() {
            mapper.stop();
        }
    }

    /// Starts the scenario, lets it run for `duration`, then stops the
    /// sources, saves every map under the configured save path and shuts the
    /// mappers down.
    pub fn run(&mut self, duration: Duration) -> anyhow::Result<RunReport> {
        let started = Instant::now();
        self.start()?;
        info!(duration = ?duration, "running scenario");
        thread::sleep(duration);

        // Quiesce the inputs first so the saved maps and the report agree.
        self.stop_sources();
        let save_path = self.settings.save_path.clone();
        let saves: HashMap<String, Result<SaveOutcome, PersistError>> = self.save_maps(&save_path).into_iter().collect();
        self.shutdown();

        let mappers = self
            .mappers
            .iter()
            .map(|mapper| {
                let stats = mapper.stats();
                let (saved, save_error) = match saves.get(mapper.name()) {
                    Some(Ok(SaveOutcome::Written(files))) => (files.clone(), None),
                    Some(Ok(SaveOutcome::NoMap)) | None => (Vec::new(), None),
                    Some(Err(e)) => (Vec::new(), Some(e.to_string())),
                };
                if mapper.state() != MapperState::Stopped {
                    warn!(mapper = %mapper.name(), state = ?mapper.state(), "mapper did not stop");
                }
                MapperReport {
                    name: mapper.name().to_string(),
                    processed: stats.processed,
                    skipped: stats.skipped,
                    published: stats.published,
                    discarded: stats.discarded,
                    saved,
                    save_error,
                }
            })
            .collect();

        Ok(RunReport {
            elapsed_seconds: started.elapsed().as_secs_f64(),
            sources: self.source_reports.clone(),
            mappers,
            topics: self.topic_summary(),
        })
    }

    pub fn topic_summary(&self) -> Vec<TopicReport> {
        self.bus
            .summary()
            .into_iter()
            .map(|(name, published, buffered)| TopicReport {
                name,
                published,
                buffered,
            })
            .collect()
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sensor_pose(tf: &TfTree, frame: &str) -> anyhow::Result<nalgebra::Isometry3<f64>> {
    match tf.lookup(tf.root_frame(), frame, 0.0, Duration::ZERO) {
        Some(pose) => Ok(pose),
        None => bail!("sensor frame '{}' is not declared in [[frames]]", frame),
    }
}

/// Every file under `directory`, sorted. Missing directories list as empty.
pub fn list_artifacts(directory: &Path) -> Vec<PathBuf> {
    if !directory.exists() {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = WalkDir::new(directory)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}
