use nalgebra::Vector3;

use super::{DisplayInfo, EntityInput, Origin, TargetLink, Track, require_pose};
use crate::{
    config::TrackConfig,
    error::Result,
    geometry::{Pose, PoseState},
    trajectory::Trajectory,
    types::{Color, HandResult, TargetInfo, Timestamp},
};

const HAND_COLORS: [Color; 4] = [Color::RED, Color::BLUE, Color::CYAN, Color::ORANGE];

/// A tracked hand, keyed by the detector's hand label (e.g. `"left"`, `"right"`).
#[derive(Clone, Debug)]
pub struct Hand {
    label: String,
    track: Track,
    landmarks: Option<Vec<[f64; 3]>>,
    display: DisplayInfo,
    target: TargetLink,
    origin: Origin,
}

impl Hand {
    pub fn new(
        input: EntityInput<HandResult>,
        label: &str,
        timestamp: Timestamp,
        discovery_index: usize,
        config: &TrackConfig,
    ) -> Result<Self> {
        let color = HAND_COLORS[discovery_index % HAND_COLORS.len()];
        let (track, landmarks, bbox, origin) = match input {
            EntityInput::FromDetection(result) => {
                let raw = require_pose(label, result.pose.as_ref())?;
                let track = Track::from_detection(&raw, timestamp, config)?;
                (track, result.landmarks, result.bbox, Origin::Detection)
            }
            EntityInput::FromTrajectory(trajectory) => {
                let track = Track::from_trajectory(label, trajectory, config)?;
                (track, None, None, Origin::Trajectory)
            }
        };

        log::info!("hand {label} discovered");

        Ok(Self {
            label: label.to_owned(),
            track,
            landmarks,
            display: DisplayInfo::new(bbox, color),
            target: TargetLink::default(),
            origin,
        })
    }

    /// Applies a new detector result. Malformed or out-of-order results are logged and ignored,
    /// leaving the last known state in place. Returns whether the update was applied.
    pub fn update(&mut self, result: &HandResult, timestamp: Timestamp) -> bool {
        let applied = require_pose(&self.label, result.pose.as_ref())
            .and_then(|raw| self.track.update(&raw, timestamp));
        match applied {
            Ok(()) => {
                if result.landmarks.is_some() {
                    self.landmarks = result.landmarks.clone();
                }
                if result.bbox.is_some() {
                    self.display.bbox = result.bbox;
                }
                true
            }
            Err(err) => {
                log::warn!("ignoring update for hand {}: {err}", self.label);
                false
            }
        }
    }

    /// Carries the last pose forward to `timestamp` without a new measurement.
    pub fn propagate(&mut self, timestamp: Timestamp) -> Result<()> {
        self.track.propagate(timestamp)
    }

    /// Replays the next recorded sample, or the sample at `index`.
    pub fn update_from_trajectory(&mut self, index: Option<usize>) -> Result<()> {
        self.track.replay(index)
    }

    pub fn set_target_info(
        &mut self,
        is_targeting: bool,
        target: Option<&str>,
        info: Option<TargetInfo>,
    ) {
        self.target.set(is_targeting, target, info);
        self.display.thickness = if is_targeting {
            DisplayInfo::TARGETED_THICKNESS
        } else {
            DisplayInfo::DEFAULT_THICKNESS
        };
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> &PoseState {
        self.track.state()
    }

    pub fn position(&self) -> Vector3<f64> {
        self.track.state().filtered().position
    }

    pub fn pose(&self) -> &Pose {
        self.track.state().filtered()
    }

    pub fn velocity(&self) -> Option<Vector3<f64>> {
        self.track.state().velocity()
    }

    pub fn last_timestamp(&self) -> Timestamp {
        self.track.state().last_timestamp()
    }

    pub fn last_measured(&self) -> Timestamp {
        self.track.state().last_measured()
    }

    pub fn trajectory(&self) -> &Trajectory {
        self.track.trajectory()
    }

    pub fn landmarks(&self) -> Option<&[[f64; 3]]> {
        self.landmarks.as_deref()
    }

    pub fn display(&self) -> &DisplayInfo {
        &self.display
    }

    /// Color used to highlight objects this hand targets.
    pub fn text_color(&self) -> Color {
        self.display.color
    }

    pub fn target(&self) -> &TargetLink {
        &self.target
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn age(&self) -> u32 {
        self.track.age()
    }
}
