// cartos_host/src/sources/cloud.rs

use super::{ObservationSource, Room};
use crate::config::CloudSourceConfig;
use anyhow::{ensure, Context};
use cartos_core::messages::{Observation, PointCloud3d};
use cartos_core::types::{TimeFrame, Timestamp};
use nalgebra::{Isometry3, Point3, Vector3};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// A multi-beam spinning LiDAR. Every sample is one full revolution,
/// returned as points in the sensor frame.
pub struct CloudSource {
    config: CloudSourceConfig,
    pose: Isometry3<f64>,
    room: Room,
    /// Unit beam directions in the sensor frame.
    rays: Vec<Vector3<f64>>,
    noise: Normal<f64>,
    rng: ChaCha8Rng,
}

fn generate_rays(config: &CloudSourceConfig) -> Vec<Vector3<f64>> {
    let horizontal_step = std::f64::consts::TAU / config.horizontal_beams as f64;
    let vertical_fov = config.vertical_fov_deg.to_radians();
    let (elevation_min, vertical_step) = match config.vertical_beams {
        1 => (0.0, 0.0),
        n => (-vertical_fov / 2.0, vertical_fov / (n - 1) as f64),
    };

    let mut rays = Vec::with_capacity((config.horizontal_beams * config.vertical_beams) as usize);
    for v in 0..config.vertical_beams {
        let elevation = elevation_min + v as f64 * vertical_step;
        for h in 0..config.horizontal_beams {
            let azimuth = h as f64 * horizontal_step;
            rays.push(Vector3::new(
                elevation.cos() * azimuth.cos(),
                elevation.cos() * azimuth.sin(),
                elevation.sin(),
            ));
        }
    }
    rays
}

impl CloudSource {
    pub fn new(config: CloudSourceConfig, pose: Isometry3<f64>, room: Room, seed: u64) -> anyhow::Result<Self> {
        ensure!(
            config.horizontal_beams > 0 && config.vertical_beams > 0,
            "lidar '{}' needs at least one beam in each direction",
            config.name
        );
        ensure!(
            config.rate_hz > 0.0 && config.range_max > 0.0,
            "lidar '{}' needs a positive rate and range",
            config.name
        );
        let noise = Normal::new(0.0, config.range_noise_stddev)
            .with_context(|| format!("invalid range noise for lidar '{}'", config.name))?;

        Ok(Self {
            rays: generate_rays(&config),
            noise,
            rng: ChaCha8Rng::seed_from_u64(seed),
            config,
            pose,
            room,
        })
    }

    pub fn beam_count(&self) -> usize {
        self.rays.len()
    }
}

impl ObservationSource for CloudSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn rate_hz(&self) -> f64 {
        self.config.rate_hz
    }

    fn sample(&mut self, stamp: Timestamp) -> Observation {
        let origin = Point3::from(self.pose.translation.vector);
        let mut points = Vec::with_capacity(self.rays.len());
        for ray in &self.rays {
            let direction = self.pose.rotation * *ray;
            let Some(distance) = self.room.cast(&origin, &direction) else {
                continue;
            };
            if distance > self.config.range_max {
                continue;
            }
            let noisy = (distance + self.noise.sample(&mut self.rng)).max(0.0);
            points.push(Point3::from(*ray * noisy));
        }
        Observation::point_cloud(&self.config.frame, TimeFrame::instant(stamp), PointCloud3d::new(points))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::{Translation3, UnitQuaternion};

    fn config(horizontal_beams: u32, vertical_beams: u32, range_max: f64) -> CloudSourceConfig {
        CloudSourceConfig {
            name: "roof_lidar".to_string(),
            frame: "lidar".to_string(),
            rate_hz: 5.0,
            horizontal_beams,
            vertical_beams,
            vertical_fov_deg: 30.0,
            range_max,
            range_noise_stddev: 0.0,
        }
    }

    #[test]
    fn every_beam_hits_a_wall_inside_the_room() {
        let room = Room::new([5.0, 4.0, 1.5]);
        let mut source = CloudSource::new(config(32, 4, 20.0), Isometry3::identity(), room, 3).unwrap();
        assert_eq!(source.beam_count(), 128);

        let observation = source.sample(1.0);
        let cloud = observation.as_point_cloud().unwrap();
        assert_eq!(cloud.len(), 128);
        for p in &cloud.points {
            // Every return lies on the boundary of the room.
            let on_wall = (p.x.abs() - 5.0).abs() < 1e-9 || (p.y.abs() - 4.0).abs() < 1e-9 || (p.z.abs() - 1.5).abs() < 1e-9;
            assert!(on_wall, "{:?} is not on a wall", p);
        }
    }

    #[test]
    fn points_are_expressed_in_the_sensor_frame() {
        let room = Room::new([5.0, 4.0, 1.5]);
        let pose = Isometry3::from_parts(Translation3::new(2.0, 0.0, 0.0), UnitQuaternion::identity());
        let mut source = CloudSource::new(config(4, 1, 20.0), pose, room, 3).unwrap();
        let observation = source.sample(0.0);
        let cloud = observation.as_point_cloud().unwrap();
        // The first beam looks along +X and hits the wall 3 m ahead of the sensor.
        assert_abs_diff_eq!(cloud.points[0].x, 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(cloud.points[0].y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn returns_beyond_range_max_are_dropped() {
        let room = Room::new([5.0, 4.0, 1.5]);
        let mut source = CloudSource::new(config(4, 1, 4.5), Isometry3::identity(), room, 3).unwrap();
        let observation = source.sample(0.0);
        // Only the two beams along Y (4 m) are inside 4.5 m.
        assert_eq!(observation.as_point_cloud().unwrap().len(), 2);
    }
}
