//! Tracked entities: hands and rigid objects.

pub mod hand;
pub mod object;

pub use hand::Hand;
pub use object::{Dataset, ObjectGeometry, Proximity, RigidObject};

use crate::{
    config::TrackConfig,
    error::{Error, Result},
    geometry::{Ingestion, Pose, PoseState},
    trajectory::Trajectory,
    types::{BoundingBox, Color, TargetInfo, Timestamp},
};

/// What an entity is built from: a live detector result, or a recorded trajectory for replay.
#[derive(Clone, Debug)]
pub enum EntityInput<D> {
    FromDetection(D),
    FromTrajectory(Trajectory),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Detection,
    Trajectory,
}

/// Targeting relation seen from one side. The counterpart is referenced by label, never owned.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TargetLink {
    pub is_targeted: bool,
    pub counterpart: Option<String>,
    pub info: Option<TargetInfo>,
}

impl TargetLink {
    pub fn set(&mut self, is_targeted: bool, counterpart: Option<&str>, info: Option<TargetInfo>) {
        if is_targeted {
            self.is_targeted = true;
            self.counterpart = counterpart.map(str::to_owned);
            self.info = info;
        } else {
            self.clear();
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DisplayInfo {
    pub bbox: Option<BoundingBox>,
    pub color: Color,
    pub thickness: u32,
}

impl DisplayInfo {
    pub const DEFAULT_THICKNESS: u32 = 2;
    pub const TARGETED_THICKNESS: u32 = 4;

    fn new(bbox: Option<BoundingBox>, color: Color) -> Self {
        Self {
            bbox,
            color,
            thickness: Self::DEFAULT_THICKNESS,
        }
    }
}

/// Pose state, trajectory and update bookkeeping shared by hands and objects.
#[derive(Clone, Debug)]
pub(crate) struct Track {
    state: PoseState,
    trajectory: Trajectory,
    ingestion: Ingestion,
    age: u32,
}

impl Track {
    const INITIAL_AGE: u32 = 10;
    const AGE_STEP: u32 = 2;
    /// The counter only grows while at or below this, so it settles at 17.
    const AGE_GROWTH_LIMIT: u32 = 15;

    /// Starts a track from a raw detector pose, applying the ingestion convention.
    fn from_detection(raw: &Pose, timestamp: Timestamp, config: &TrackConfig) -> Result<Self> {
        let pose = config.ingestion.apply(raw);
        let mut trajectory = match config.trajectory_limit {
            Some(limit) => Trajectory::with_limit(limit),
            None => Trajectory::new(),
        };
        trajectory.append(timestamp, &pose, false)?;
        Ok(Self {
            state: PoseState::new(pose, timestamp, config.filter_cutoff_hz)?,
            trajectory,
            ingestion: config.ingestion,
            age: Self::INITIAL_AGE,
        })
    }

    /// Starts a track that replays a recorded trajectory. Recorded poses are already converted.
    fn from_trajectory(label: &str, trajectory: Trajectory, config: &TrackConfig) -> Result<Self> {
        let first = *trajectory.at(0).map_err(|_| Error::InvalidDetectionPayload {
            label: label.to_owned(),
            reason: "empty trajectory",
        })?;
        Ok(Self {
            state: PoseState::new(first.pose(), first.timestamp, config.filter_cutoff_hz)?,
            trajectory,
            ingestion: config.ingestion,
            age: Self::INITIAL_AGE,
        })
    }

    fn update(&mut self, raw: &Pose, timestamp: Timestamp) -> Result<()> {
        if let Some(last) = self.trajectory.last() {
            if timestamp < last.timestamp {
                return Err(Error::NonMonotonicTimestamp {
                    timestamp,
                    last: last.timestamp,
                });
            }
        }

        let pose = self.ingestion.apply(raw);
        self.trajectory.append(timestamp, &pose, false)?;
        self.state.update(pose, timestamp);
        if self.age <= Self::AGE_GROWTH_LIMIT {
            self.age += Self::AGE_STEP;
        }
        Ok(())
    }

    /// Advances the clock without a measurement and records the held pose as extrapolated.
    fn propagate(&mut self, timestamp: Timestamp) -> Result<()> {
        let pose = *self.state.raw();
        self.trajectory.append(timestamp, &pose, true)?;
        self.state.propagate(timestamp);
        Ok(())
    }

    fn replay(&mut self, index: Option<usize>) -> Result<()> {
        let sample = match index {
            Some(index) => *self.trajectory.at(index)?,
            None => self.trajectory.next_sample()?,
        };
        self.state.update(sample.pose(), sample.timestamp);
        self.state.propagate(sample.timestamp);
        Ok(())
    }

    fn state(&self) -> &PoseState {
        &self.state
    }

    fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    fn age(&self) -> u32 {
        self.age
    }
}

fn require_pose(label: &str, pose: Option<&Pose>) -> Result<Pose> {
    match pose {
        Some(pose) if pose.is_finite() => Ok(*pose),
        Some(_) => Err(Error::InvalidDetectionPayload {
            label: label.to_owned(),
            reason: "non-finite pose",
        }),
        None => Err(Error::InvalidDetectionPayload {
            label: label.to_owned(),
            reason: "missing pose",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clearing_target_link_drops_counterpart() {
        let mut link = TargetLink::default();
        let info = TargetInfo {
            grip: crate::types::Grip::Pinch,
            time_to_impact: 120.0,
        };
        link.set(true, Some("right"), Some(info));
        assert_eq!(link.counterpart.as_deref(), Some("right"));

        link.set(false, Some("right"), Some(info));
        assert_eq!(link, TargetLink::default());
    }

    #[test]
    fn age_counter_saturates() {
        let config = TrackConfig::default();
        let mut track = Track::from_detection(&Pose::identity(), 0.0, &config).unwrap();
        for i in 1..20 {
            track.update(&Pose::identity(), i as f64).unwrap();
        }
        assert_eq!(track.age(), 17);
    }

    #[test]
    fn propagation_is_recorded_as_extrapolated() {
        let config = TrackConfig::default();
        let mut track =
            Track::from_detection(&Pose::from_position(2.0, 0.0, 0.0), 0.0, &config).unwrap();
        track.update(&Pose::from_position(4.0, 0.0, 0.0), 10.0).unwrap();
        let velocity = track.state().velocity().unwrap();

        track.propagate(40.0).unwrap();
        let last = track.trajectory().last().unwrap();
        assert!(last.extrapolated);
        assert_eq!(last.x, 4.0);
        assert_eq!(track.state().last_timestamp(), 40.0);
        assert_eq!(track.state().velocity(), Some(velocity));
        assert!(track.propagate(20.0).is_err());
    }

    #[test]
    fn out_of_order_update_keeps_state() {
        let config = TrackConfig::default();
        let mut track =
            Track::from_detection(&Pose::from_position(1.0, 0.0, 0.0), 50.0, &config).unwrap();
        let err = track.update(&Pose::from_position(9.0, 0.0, 0.0), 10.0).unwrap_err();
        assert!(matches!(err, Error::NonMonotonicTimestamp { .. }));
        assert_eq!(track.trajectory().len(), 1);
        assert_eq!(track.state().raw().position.x, 1.0);
    }

    #[test]
    fn non_finite_timestamp_is_rejected() {
        let config = TrackConfig::default();
        let mut track =
            Track::from_detection(&Pose::from_position(1.0, 0.0, 0.0), 50.0, &config).unwrap();
        let err = track.update(&Pose::from_position(9.0, 0.0, 0.0), f64::NAN).unwrap_err();
        assert!(matches!(err, Error::NonFiniteTimestamp(_)));
        assert!(track.propagate(f64::INFINITY).is_err());
        assert_eq!(track.trajectory().len(), 1);
        assert_eq!(track.state().raw().position.x, 1.0);
        assert_eq!(track.state().last_timestamp(), 50.0);

        // Ordering still holds after the rejected sample.
        assert!(track.update(&Pose::identity(), 10.0).is_err());
        assert!(Track::from_detection(&Pose::identity(), f64::NAN, &config).is_err());
    }
}
