// cartos_host/src/sources/scan.rs

use super::{ObservationSource, Room};
use crate::config::ScanSourceConfig;
use anyhow::{ensure, Context};
use cartos_core::messages::{LaserScan2d, Observation};
use cartos_core::types::{TimeFrame, Timestamp};
use nalgebra::{Isometry3, Point3, Vector3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// A single-plane scanner mounted at a fixed pose inside the room.
pub struct ScanSource {
    config: ScanSourceConfig,
    pose: Isometry3<f64>,
    room: Room,
    angle_min: f64,
    angle_increment: f64,
    noise: Normal<f64>,
    rng: ChaCha8Rng,
}

impl ScanSource {
    pub fn new(config: ScanSourceConfig, pose: Isometry3<f64>, room: Room, seed: u64) -> anyhow::Result<Self> {
        ensure!(config.beams > 0, "scanner '{}' needs at least one beam", config.name);
        ensure!(
            config.rate_hz > 0.0 && config.range_max > 0.0,
            "scanner '{}' needs a positive rate and range",
            config.name
        );

        let fov = config.fov_deg.clamp(0.0, 360.0).to_radians();
        // A full circle would repeat its first beam at the end.
        let angle_increment = match config.beams {
            1 => 0.0,
            n if config.fov_deg >= 360.0 => fov / n as f64,
            n => fov / (n - 1) as f64,
        };
        let noise = Normal::new(0.0, config.range_noise_stddev)
            .with_context(|| format!("invalid range noise for scanner '{}'", config.name))?;

        Ok(Self {
            angle_min: -fov / 2.0,
            angle_increment,
            noise,
            rng: ChaCha8Rng::seed_from_u64(seed),
            config,
            pose,
            room,
        })
    }

    fn measure(&mut self, angle: f64) -> f32 {
        let direction = self.pose.rotation * Vector3::new(angle.cos(), angle.sin(), 0.0);
        let origin = Point3::from(self.pose.translation.vector);
        match self.room.cast(&origin, &direction) {
            Some(distance) if distance <= self.config.range_max => {
                let noisy = distance + self.noise.sample(&mut self.rng);
                noisy.clamp(0.0, self.config.range_max) as f32
            }
            // No return within range.
            _ => f32::INFINITY,
        }
    }
}

impl ObservationSource for ScanSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn rate_hz(&self) -> f64 {
        self.config.rate_hz
    }

    fn sample(&mut self, stamp: Timestamp) -> Observation {
        let (angle_min, angle_increment) = (self.angle_min, self.angle_increment);
        let ranges = (0..self.config.beams)
            .map(|i| self.measure(angle_min + i as f64 * angle_increment))
            .collect();
        let scan = LaserScan2d {
            angle_min,
            angle_increment,
            range_min: 0.0,
            range_max: self.config.range_max,
            ranges,
        };
        Observation::laser_scan(&self.config.frame, TimeFrame::instant(stamp), scan)
    }
}
