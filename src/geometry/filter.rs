//! Time-based exponential smoothing of poses.

use std::f64::consts::PI;

use super::Pose;
use crate::{
    error::{Error, Result},
    types::Timestamp,
};

/// Smooths raw detector poses with a first-order low-pass filter.
///
/// The smoothing factor depends on the time elapsed between samples, so irregular frame rates do
/// not change the effective cutoff. A sample repeated at the same timestamp has no effect.
#[derive(Clone, Debug)]
pub struct PoseFilter {
    cutoff_hz: f64,
    last: Option<(Pose, Timestamp)>,
}

impl PoseFilter {
    /// Fails with [`Error::InvalidConfig`] unless `cutoff_hz` is finite and strictly positive.
    pub fn new(cutoff_hz: f64) -> Result<Self> {
        if !(cutoff_hz.is_finite() && cutoff_hz > 0.0) {
            return Err(Error::InvalidConfig {
                field: "filter_cutoff_hz",
                reason: format!("must be a positive frequency, got {cutoff_hz}"),
            });
        }
        Ok(Self {
            cutoff_hz,
            last: None,
        })
    }

    pub fn cutoff_hz(&self) -> f64 {
        self.cutoff_hz
    }

    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn filter(&mut self, raw: &Pose, timestamp: Timestamp) -> Pose {
        let filtered = match self.last {
            None => *raw,
            Some((prev, prev_timestamp)) => {
                let elapsed = ((timestamp - prev_timestamp) / 1000.0).max(0.0);
                let a = smoothing_factor(elapsed, self.cutoff_hz);
                let position = prev.position.lerp(&raw.position, a);
                let orientation = prev
                    .orientation
                    .try_slerp(&raw.orientation, a, 1.0e-9)
                    .unwrap_or(raw.orientation);
                Pose::new(position, orientation)
            }
        };
        self.last = Some((filtered, timestamp));
        filtered
    }
}

fn smoothing_factor(elapsed_secs: f64, cutoff_hz: f64) -> f64 {
    let r = 2.0 * PI * cutoff_hz * elapsed_secs;
    r / (r + 1.0)
}
