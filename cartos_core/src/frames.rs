// cartos_core/src/frames.rs

use crate::types::{TfProvider, Timestamp};
use nalgebra::Isometry3;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Frame names are compared without their leading slash, so `/map` and `map`
/// refer to the same frame.
pub fn normalize_frame(name: &str) -> &str {
    name.trim_start_matches('/')
}

// =========================================================================
// == TF Tree ==
// =========================================================================

/// A thread-safe store of frame poses, each expressed relative to a single
/// root frame. Lookups compose two root-relative poses, so any pair of known
/// frames can be related without walking a parent chain.
///
/// Poses are not time-indexed: a lookup returns the latest pose regardless of
/// the requested stamp. A lookup for a frame that has not been published yet
/// blocks until it appears or the timeout expires.
#[derive(Debug)]
pub struct TfTree {
    root_frame: String,
    transforms_to_root: Mutex<HashMap<String, Isometry3<f64>>>,
    updated: Condvar,
}

impl TfTree {
    pub fn new(root_frame: &str) -> Self {
        let root = normalize_frame(root_frame).to_string();
        let mut transforms = HashMap::new();
        transforms.insert(root.clone(), Isometry3::identity());
        Self {
            root_frame: root,
            transforms_to_root: Mutex::new(transforms),
            updated: Condvar::new(),
        }
    }

    pub fn root_frame(&self) -> &str {
        &self.root_frame
    }

    /// Publishes (or replaces) the pose of `frame` in the root frame and wakes
    /// any lookup waiting for it.
    pub fn set_transform(&self, frame: &str, pose_in_root: Isometry3<f64>) {
        let frame = normalize_frame(frame);
        if frame == self.root_frame {
            tracing::warn!(frame, "ignoring attempt to move the root frame");
            return;
        }
        self.transforms_to_root
            .lock()
            .insert(frame.to_string(), pose_in_root);
        self.updated.notify_all();
    }

    pub fn remove(&self, frame: &str) -> Option<Isometry3<f64>> {
        let frame = normalize_frame(frame);
        if frame == self.root_frame {
            return None;
        }
        self.transforms_to_root.lock().remove(frame)
    }

    pub fn contains(&self, frame: &str) -> bool {
        self.transforms_to_root
            .lock()
            .contains_key(normalize_frame(frame))
    }

    pub fn frames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.transforms_to_root.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn compose(
        transforms: &HashMap<String, Isometry3<f64>>,
        target_frame: &str,
        source_frame: &str,
    ) -> Option<Isometry3<f64>> {
        let root_from_target = transforms.get(normalize_frame(target_frame))?;
        let root_from_source = transforms.get(normalize_frame(source_frame))?;
        // T_target_source = (T_root_target)^-1 * T_root_source
        Some(root_from_target.inverse() * root_from_source)
    }
}

impl TfProvider for TfTree {
    fn lookup(
        &self,
        target_frame: &str,
        source_frame: &str,
        _time: Timestamp,
        timeout: Duration,
    ) -> Option<Isometry3<f64>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut transforms = self.transforms_to_root.lock();
        loop {
            if let Some(transform) = Self::compose(&transforms, target_frame, source_frame) {
                return Some(transform);
            }
            let deadline = deadline?;
            if self.updated.wait_until(&mut transforms, deadline).timed_out() {
                return Self::compose(&transforms, target_frame, source_frame);
            }
        }
    }
}
