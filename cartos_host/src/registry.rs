// cartos_host/src/registry.rs

use crate::config::ComponentEntry;
use anyhow::{anyhow, Context};
use cartos_core::mapping::{
    MapBuilder, NdtGridMapper3D, NdtGridParams, OccupancyGrid2DParams, OccupancyGrid3DParams, OccupancyGridMapper2D,
    OccupancyGridMapper3D,
};
use cartos_core::publishing::{
    OccupancyGridMessage, OccupancyGridPublisher, OccupancyGridPublisherParams, PointCloudMessage, PointcloudPublisher,
    PointcloudPublisherParams, Publisher,
};
use cartos_core::topics::TopicBus;
use figment::value::Value;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

// --- Define the "Factory" Function Types ---
// A factory knows how to build one component type from the raw table the
// scenario file gave for it.

/// Builds a map builder from its `[[mappers]]` table.
pub type MapperFactory = Box<dyn Fn(&Value) -> anyhow::Result<Box<dyn MapBuilder>> + Send + Sync>;

/// Builds a publisher from its `[[publishers]]` table. Publishers CREATE
/// their output topics, so they get mutable access to the bus.
pub type PublisherFactory =
    Box<dyn Fn(&ComponentEntry, &Value, &mut TopicBus) -> anyhow::Result<Arc<dyn Publisher>> + Send + Sync>;

// --- Define the Registries ---
// These store the mapping from the `type` string in the TOML file to the
// factory function.

#[derive(Default)]
pub struct MapperRegistry(pub HashMap<String, MapperFactory>);

#[derive(Default)]
pub struct PublisherRegistry(pub HashMap<String, PublisherFactory>);

fn parse_params<T: for<'de> Deserialize<'de>>(value: &Value, kind: &str) -> anyhow::Result<T> {
    value
        .deserialize::<T>()
        .with_context(|| format!("invalid parameters for '{}'", kind))
}

impl MapperRegistry {
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&Value) -> anyhow::Result<Box<dyn MapBuilder>> + Send + Sync + 'static,
    {
        self.0.insert(kind.to_string(), Box::new(factory));
    }

    /// The map types that ship with the library.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register("occupancy_grid_2d", |value| {
            let params: OccupancyGrid2DParams = parse_params(value, "occupancy_grid_2d")?;
            Ok(Box::new(OccupancyGridMapper2D::new(params)) as Box<dyn MapBuilder>)
        });
        registry.register("occupancy_grid_3d", |value| {
            let params: OccupancyGrid3DParams = parse_params(value, "occupancy_grid_3d")?;
            Ok(Box::new(OccupancyGridMapper3D::new(params)) as Box<dyn MapBuilder>)
        });
        registry.register("ndt_grid_3d", |value| {
            let params: NdtGridParams = parse_params(value, "ndt_grid_3d")?;
            Ok(Box::new(NdtGridMapper3D::new(params)) as Box<dyn MapBuilder>)
        });
        registry
    }

    pub fn build(&self, kind: &str, value: &Value) -> anyhow::Result<Box<dyn MapBuilder>> {
        let factory = self
            .0
            .get(kind)
            .ok_or_else(|| anyhow!("unknown mapper type '{}'", kind))?;
        factory(value)
    }
}

fn default_topic_capacity() -> usize {
    8
}

/// Where a publisher writes. Defaults to a topic named after the publisher.
#[derive(Debug, Deserialize)]
struct TopicSettings {
    topic: Option<String>,
    #[serde(default = "default_topic_capacity")]
    capacity: usize,
}

impl TopicSettings {
    fn topic_name(&self, entry: &ComponentEntry) -> String {
        self.topic.clone().unwrap_or_else(|| format!("/{}", entry.name))
    }
}

impl PublisherRegistry {
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&ComponentEntry, &Value, &mut TopicBus) -> anyhow::Result<Arc<dyn Publisher>> + Send + Sync + 'static,
    {
        self.0.insert(kind.to_string(), Box::new(factory));
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register("pointcloud", |entry, value, bus| {
            let sink: TopicSettings = parse_params(value, "pointcloud")?;
            let params: PointcloudPublisherParams = parse_params(value, "pointcloud")?;
            let topic = bus.create_topic::<PointCloudMessage>(&sink.topic_name(entry), sink.capacity)?;
            Ok(Arc::new(PointcloudPublisher::new(&entry.name, topic, params)?) as Arc<dyn Publisher>)
        });
        registry.register("occupancy_grid", |entry, value, bus| {
            let sink: TopicSettings = parse_params(value, "occupancy_grid")?;
            let params: OccupancyGridPublisherParams = parse_params(value, "occupancy_grid")?;
            let topic = bus.create_topic::<OccupancyGridMessage>(&sink.topic_name(entry), sink.capacity)?;
            Ok(Arc::new(OccupancyGridPublisher::new(&entry.name, topic, params)?) as Arc<dyn Publisher>)
        });
        registry
    }

    pub fn build(&self, entry: &ComponentEntry, value: &Value, bus: &mut TopicBus) -> anyhow::Result<Arc<dyn Publisher>> {
        let factory = self
            .0
            .get(&entry.kind)
            .ok_or_else(|| anyhow!("unknown publisher type '{}'", entry.kind))?;
        factory(entry, value, bus)
    }
}
