use nalgebra::{Matrix4, Vector3};

use super::{Pose, PoseFilter};
use crate::{error::Result, types::Timestamp};

/// Raw and filtered pose of an entity, plus the time of its last update.
#[derive(Clone, Debug)]
pub struct PoseState {
    raw: Pose,
    filtered: Pose,
    previous_filtered: Option<(Pose, Timestamp)>,
    filter: PoseFilter,
    /// Time of the last measurement; `last_timestamp` may run ahead of it through propagation.
    measured_at: Timestamp,
    last_timestamp: Timestamp,
}

impl PoseState {
    pub fn new(raw: Pose, timestamp: Timestamp, cutoff_hz: f64) -> Result<Self> {
        let mut filter = PoseFilter::new(cutoff_hz)?;
        let filtered = filter.filter(&raw, timestamp);
        Ok(Self {
            raw,
            filtered,
            previous_filtered: None,
            filter,
            measured_at: timestamp,
            last_timestamp: timestamp,
        })
    }

    /// Overwrites the raw pose and recomputes the filtered pose.
    pub fn update(&mut self, raw: Pose, timestamp: Timestamp) {
        if timestamp > self.measured_at {
            self.previous_filtered = Some((self.filtered, self.measured_at));
        }
        self.raw = raw;
        self.filtered = self.filter.filter(&raw, timestamp);
        self.measured_at = timestamp;
        self.last_timestamp = self.last_timestamp.max(timestamp);
    }

    /// Advances the clock without a new measurement. The pose is held.
    pub fn propagate(&mut self, timestamp: Timestamp) {
        self.last_timestamp = self.last_timestamp.max(timestamp);
    }

    pub fn raw(&self) -> &Pose {
        &self.raw
    }

    pub fn filtered(&self) -> &Pose {
        &self.filtered
    }

    pub fn last_timestamp(&self) -> Timestamp {
        self.last_timestamp
    }

    /// Time of the last real measurement, ignoring propagation.
    pub fn last_measured(&self) -> Timestamp {
        self.measured_at
    }

    /// Filtered velocity in position units per millisecond, from the last two distinct updates.
    pub fn velocity(&self) -> Option<Vector3<f64>> {
        let (prev, prev_timestamp) = self.previous_filtered?;
        let elapsed = self.measured_at - prev_timestamp;
        (elapsed > 0.0).then(|| (self.filtered.position - prev.position) / elapsed)
    }

    /// Homogeneous transform of the filtered pose.
    pub fn as_transform(&self) -> Matrix4<f64> {
        self.filtered.to_matrix()
    }

    /// `[timestamp, x, y, z, qx, qy, qz, qw]`, optionally followed by the filtered pose columns.
    pub fn as_row(&self, with_filtered: bool) -> Vec<f64> {
        let mut row = Vec::with_capacity(15);
        row.push(self.last_timestamp);
        row.extend_from_slice(&self.raw.as_row());
        if with_filtered {
            row.extend_from_slice(&self.filtered.as_row());
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::error::Error;

    #[test]
    fn velocity_needs_two_distinct_timestamps() {
        let mut state = PoseState::new(Pose::identity(), 0.0, 5.0).unwrap();
        assert!(state.velocity().is_none());

        state.update(Pose::from_position(10.0, 0.0, 0.0), 0.0);
        assert!(state.velocity().is_none());

        state.update(Pose::from_position(10.0, 0.0, 0.0), 20.0);
        let velocity = state.velocity().unwrap();
        assert!(velocity.x > 0.0);
        assert_relative_eq!(velocity.y, 0.0);
    }

    #[test]
    fn transform_follows_filtered_pose() {
        let state = PoseState::new(Pose::from_position(1.0, 2.0, 3.0), 0.0, 5.0).unwrap();
        let m = state.as_transform();
        assert_relative_eq!(m[(0, 3)], 1.0);
        assert_relative_eq!(m[(1, 3)], 2.0);
        assert_relative_eq!(m[(2, 3)], 3.0);
    }

    #[test]
    fn propagate_never_moves_clock_backwards() {
        let mut state = PoseState::new(Pose::identity(), 50.0, 5.0).unwrap();
        state.propagate(10.0);
        assert_eq!(state.last_timestamp(), 50.0);
        state.propagate(80.0);
        assert_eq!(state.last_timestamp(), 80.0);
        assert_eq!(state.last_measured(), 50.0);
        assert_eq!(state.raw(), &Pose::identity());
    }

    #[test]
    fn zero_cutoff_is_a_config_error() {
        let err = PoseState::new(Pose::identity(), 0.0, 0.0).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { field: "filter_cutoff_hz", .. }));
        assert!(err.is_fatal());
        assert!(PoseState::new(Pose::identity(), 0.0, f64::NAN).is_err());
    }
}
