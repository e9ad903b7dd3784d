// cartos_host/src/config/mod.rs

//! Scenario files: which frames exist, which simulated sensors feed which
//! providers, and which mappers and publishers to build from them.

pub mod serde_helpers;

use anyhow::{bail, Context};
use figment::{
    providers::{Format, Toml},
    value::Value,
    Figment,
};
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use serde::Deserialize;
use std::path::{Path, PathBuf};

// =========================================================================
// == Top-Level Scenario ==
// =========================================================================

/// The root of a scenario TOML file.
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    #[serde(default)]
    pub host: HostSection,

    #[serde(default)]
    pub world: WorldConfig,

    /// `[[frames]]`: static sensor poses in the root frame.
    #[serde(default)]
    pub frames: Vec<FrameConfig>,

    /// `[[providers]]`: simulated sensors, one data provider each.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// `[[publishers]]`: raw tables, resolved through the publisher registry.
    #[serde(default)]
    pub publishers: Vec<Value>,

    /// `[[mappers]]`: raw tables, resolved through the mapper registry.
    #[serde(default)]
    pub mappers: Vec<Value>,
}

impl HostConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.is_file() {
            bail!("scenario file {} does not exist", path.display());
        }
        Figment::new()
            .merge(Toml::file(path))
            .extract()
            .with_context(|| format!("failed to parse scenario {}", path.display()))
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Figment::new()
            .merge(Toml::string(contents))
            .extract()
            .context("failed to parse scenario")
    }
}

fn default_duration_seconds() -> f64 {
    5.0
}

fn default_save_path() -> PathBuf {
    PathBuf::from("maps")
}

fn default_root_frame() -> String {
    "map".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostSection {
    /// How long to run before saving and shutting down.
    #[serde(default = "default_duration_seconds")]
    pub duration_seconds: f64,
    /// Directory the maps are saved under, one sub-directory per mapper.
    #[serde(default = "default_save_path")]
    pub save_path: PathBuf,
    /// Seed for the sensor noise. Random when absent.
    pub seed: Option<u64>,
    #[serde(default = "default_root_frame")]
    pub root_frame: String,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            duration_seconds: default_duration_seconds(),
            save_path: default_save_path(),
            seed: None,
            root_frame: default_root_frame(),
        }
    }
}

fn default_room_half_extents() -> [f64; 3] {
    [5.0, 4.0, 1.5]
}

/// The simulated environment: an axis-aligned box room around the origin.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorldConfig {
    #[serde(default = "default_room_half_extents")]
    pub room_half_extents: [f64; 3],
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            room_half_extents: default_room_half_extents(),
        }
    }
}

// =========================================================================
// == Frames ==
// =========================================================================

fn zero_translation() -> Vector3<f64> {
    Vector3::zeros()
}

fn identity_rotation() -> UnitQuaternion<f64> {
    UnitQuaternion::identity()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct FrameConfig {
    pub name: String,
    #[serde(default = "zero_translation", with = "serde_helpers::vec3_from_array")]
    pub translation: Vector3<f64>,
    /// `[roll, pitch, yaw]` in degrees.
    #[serde(default = "identity_rotation", with = "serde_helpers::quat_from_euler_deg")]
    pub rotation: UnitQuaternion<f64>,
}

impl FrameConfig {
    /// The frame's pose in the root frame.
    pub fn pose(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.translation), self.rotation)
    }
}

// =========================================================================
// == Simulated Sensors ==
// =========================================================================

fn default_rate_hz() -> f64 {
    10.0
}

fn default_range_noise_stddev() -> f64 {
    0.01
}

fn default_scan_beams() -> u32 {
    360
}

fn default_scan_fov_deg() -> f64 {
    360.0
}

fn default_scan_range_max() -> f64 {
    8.0
}

fn default_cloud_horizontal_beams() -> u32 {
    64
}

fn default_cloud_vertical_beams() -> u32 {
    8
}

fn default_cloud_vertical_fov_deg() -> f64 {
    30.0
}

fn default_cloud_range_max() -> f64 {
    20.0
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// A planar laser scanner publishing `LaserScan2d`.
    Scan2d(ScanSourceConfig),
    /// A multi-beam LiDAR publishing `PointCloud3d`.
    Cloud3d(CloudSourceConfig),
}

impl ProviderConfig {
    pub fn name(&self) -> &str {
        match self {
            ProviderConfig::Scan2d(c) => &c.name,
            ProviderConfig::Cloud3d(c) => &c.name,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ScanSourceConfig {
    pub name: String,
    /// The frame the scanner is mounted in.
    pub frame: String,
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f64,
    #[serde(default = "default_scan_beams")]
    pub beams: u32,
    #[serde(default = "default_scan_fov_deg")]
    pub fov_deg: f64,
    #[serde(default = "default_scan_range_max")]
    pub range_max: f64,
    #[serde(default = "default_range_noise_stddev")]
    pub range_noise_stddev: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct CloudSourceConfig {
    pub name: String,
    pub frame: String,
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f64,
    #[serde(default = "default_cloud_horizontal_beams")]
    pub horizontal_beams: u32,
    #[serde(default = "default_cloud_vertical_beams")]
    pub vertical_beams: u32,
    #[serde(default = "default_cloud_vertical_fov_deg")]
    pub vertical_fov_deg: f64,
    #[serde(default = "default_cloud_range_max")]
    pub range_max: f64,
    #[serde(default = "default_range_noise_stddev")]
    pub range_noise_stddev: f64,
}

// =========================================================================
// == Registry Entries ==
// =========================================================================

/// The keys every `[[mappers]]` / `[[publishers]]` table must carry. The
/// rest of the table belongs to the factory selected by `kind`.
#[derive(Debug, Deserialize, Clone)]
pub struct ComponentEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl ComponentEntry {
    pub fn from_value(value: &Value) -> anyhow::Result<Self> {
        value
            .deserialize::<ComponentEntry>()
            .context("every mapper and publisher needs a `name` and a `type`")
    }
}
