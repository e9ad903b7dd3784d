// cartos_core/src/messages.rs

use crate::types::TimeFrame;
use downcast_rs::{impl_downcast, Downcast};
use dyn_clone::DynClone;
use nalgebra::Point3;
use std::fmt::{self, Debug};
use std::sync::Arc;

// =========================================================================
// == Sensor Payloads ==
// =========================================================================

/// A set of 3D points in the SENSOR's local coordinate frame.
#[derive(Debug, Clone, Default)]
pub struct PointCloud3d {
    pub points: Vec<Point3<f64>>,
}

impl PointCloud3d {
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// A planar range scan. Beam `i` points along
/// `angle_min + i * angle_increment` in the sensor's XY plane (+X forward).
#[derive(Debug, Clone)]
pub struct LaserScan2d {
    pub angle_min: f64,
    pub angle_increment: f64,
    pub range_min: f64,
    pub range_max: f64,
    pub ranges: Vec<f32>,
}

impl LaserScan2d {
    /// Whether `range` is a usable return for this scanner.
    pub fn is_valid_range(&self, range: f32) -> bool {
        let r = range as f64;
        r.is_finite() && r >= self.range_min && r <= self.range_max
    }

    pub fn beam_angle(&self, index: usize) -> f64 {
        self.angle_min + index as f64 * self.angle_increment
    }

    /// The valid returns of the scan as sensor-frame points. Invalid ranges
    /// (NaN, infinite, outside the scanner's limits) are dropped.
    pub fn points(&self) -> impl Iterator<Item = Point3<f64>> + '_ {
        self.ranges
            .iter()
            .enumerate()
            .filter(|(_, r)| self.is_valid_range(**r))
            .map(|(i, r)| {
                let angle = self.beam_angle(i);
                let r = *r as f64;
                Point3::new(r * angle.cos(), r * angle.sin(), 0.0)
            })
    }
}

/// An application-defined payload. Hosts use this for sensor types the
/// library does not model; map builders downcast to the concrete type.
pub trait Payload: Downcast + DynClone + Debug + Send + Sync {
    /// The runtime type tag of this payload, e.g. `"imu"`.
    fn kind(&self) -> &str;
}
impl_downcast!(Payload);
dyn_clone::clone_trait_object!(Payload);

// =========================================================================
// == Observation ==
// =========================================================================

/// The runtime type tag of an observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObservationKind {
    PointCloud3d,
    LaserScan2d,
    Custom(String),
}

impl fmt::Display for ObservationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservationKind::PointCloud3d => write!(f, "PointCloud3d"),
            ObservationKind::LaserScan2d => write!(f, "LaserScan2d"),
            ObservationKind::Custom(kind) => write!(f, "{}", kind),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ObservationData {
    PointCloud3d(PointCloud3d),
    LaserScan2d(LaserScan2d),
    Custom(Box<dyn Payload>),
}

/// One unit of sensor data. Observations are immutable once created and are
/// passed around as `ObservationHandle`s.
#[derive(Debug, Clone)]
pub struct Observation {
    /// The frame the payload is expressed in.
    pub frame: String,
    pub stamp: TimeFrame,
    pub data: ObservationData,
}

/// Shared handle to an observation. The producing source and the queue hold
/// it until the worker pops it; the worker holds the last reference.
pub type ObservationHandle = Arc<Observation>;

impl Observation {
    pub fn new(frame: impl Into<String>, stamp: TimeFrame, data: ObservationData) -> Self {
        Self {
            frame: frame.into(),
            stamp,
            data,
        }
    }

    pub fn point_cloud(frame: impl Into<String>, stamp: TimeFrame, cloud: PointCloud3d) -> Self {
        Self::new(frame, stamp, ObservationData::PointCloud3d(cloud))
    }

    pub fn laser_scan(frame: impl Into<String>, stamp: TimeFrame, scan: LaserScan2d) -> Self {
        Self::new(frame, stamp, ObservationData::LaserScan2d(scan))
    }

    pub fn custom<P: Payload>(frame: impl Into<String>, stamp: TimeFrame, payload: P) -> Self {
        Self::new(frame, stamp, ObservationData::Custom(Box::new(payload)))
    }

    pub fn kind(&self) -> ObservationKind {
        match &self.data {
            ObservationData::PointCloud3d(_) => ObservationKind::PointCloud3d,
            ObservationData::LaserScan2d(_) => ObservationKind::LaserScan2d,
            ObservationData::Custom(payload) => ObservationKind::Custom(payload.kind().to_string()),
        }
    }

    /// Compares the type tag without allocating.
    pub fn is_kind(&self, kind: &ObservationKind) -> bool {
        match (&self.data, kind) {
            (ObservationData::PointCloud3d(_), ObservationKind::PointCloud3d) => true,
            (ObservationData::LaserScan2d(_), ObservationKind::LaserScan2d) => true,
            (ObservationData::Custom(payload), ObservationKind::Custom(name)) => {
                payload.kind() == name
            }
            _ => false,
        }
    }

    pub fn as_point_cloud(&self) -> Option<&PointCloud3d> {
        match &self.data {
            ObservationData::PointCloud3d(cloud) => Some(cloud),
            _ => None,
        }
    }

    pub fn as_laser_scan(&self) -> Option<&LaserScan2d> {
        match &self.data {
            ObservationData::LaserScan2d(scan) => Some(scan),
            _ => None,
        }
    }

    /// Downcasts a custom payload to its concrete type.
    pub fn payload<P: Payload>(&self) -> Option<&P> {
        match &self.data {
            ObservationData::Custom(payload) => payload.downcast_ref::<P>(),
            _ => None,
        }
    }

    pub fn into_handle(self) -> ObservationHandle {
        Arc::new(self)
    }
}
