use std::{collections::BTreeMap, fmt, str::FromStr, sync::Arc};

use nalgebra::{Point3, Vector3};

use super::{DisplayInfo, EntityInput, Hand, Origin, TargetLink, Track, require_pose};
use crate::{
    config::TrackConfig,
    error::{Error, Result},
    geometry::{Pose, PoseState, TransformCache, TransformUpdate},
    trajectory::Trajectory,
    types::{BoundingBox, Color, ObjectPoseEstimation, TargetInfo, Timestamp},
};

/// Human-readable names of the objects used in grasping sessions.
const LABEL_NAMES: &[(&str, &str)] = &[
    ("obj_000002", "cheez'it"),
    ("obj_000004", "tomato"),
    ("obj_000005", "mustard"),
    ("obj_000012", "bleach"),
];

/// Mesh colors, assigned by discovery order.
const OBJECT_COLORS: [Color; 7] = [
    Color::GREEN,
    Color::ORANGE,
    Color::PURPLE,
    Color::PINK,
    Color::BROWN,
    Color::GREY,
    Color::BLACK,
];

const DEFAULT_COLOR: Color = Color::GREEN;

pub fn display_name(label: &str) -> &str {
    LABEL_NAMES
        .iter()
        .find(|(l, _)| *l == label)
        .map(|(_, name)| *name)
        .unwrap_or(label)
}

/// BOP dataset an object label belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dataset {
    Ycbv,
    Tless,
}

impl Dataset {
    pub fn name(&self) -> &'static str {
        match self {
            Dataset::Ycbv => "ycbv",
            Dataset::Tless => "tless",
        }
    }

    pub fn object_count(&self) -> u32 {
        match self {
            Dataset::Ycbv => 21,
            Dataset::Tless => 30,
        }
    }

    /// Checks that `label` has the form `obj_NNNNNN` and names an object of this dataset.
    pub fn validate_label(&self, label: &str) -> Result<()> {
        let id = label
            .strip_prefix("obj_")
            .filter(|digits| digits.len() == 6 && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse::<u32>().ok());
        match id {
            Some(id) if (1..=self.object_count()).contains(&id) => Ok(()),
            _ => Err(Error::UnknownLabel {
                label: label.to_owned(),
                dataset: self.name().to_owned(),
            }),
        }
    }
}

impl FromStr for Dataset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ycbv" => Ok(Dataset::Ycbv),
            "tless" => Ok(Dataset::Tless),
            other => Err(Error::UnknownDataset(other.to_owned())),
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Surface samples of an object mesh, in the object frame (millimetres).
#[derive(Clone, Debug)]
pub struct ObjectGeometry {
    points: Vec<Point3<f64>>,
    normals: Option<Vec<Vector3<f64>>>,
    extent: f64,
}

impl ObjectGeometry {
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        let extent = bounding_diagonal(&points);
        Self {
            points,
            normals: None,
            extent,
        }
    }

    /// Attaches per-point normals. Ignored if the counts do not match.
    pub fn with_normals(mut self, normals: Vec<Vector3<f64>>) -> Self {
        if normals.len() == self.points.len() {
            self.normals = Some(normals);
        } else {
            log::warn!(
                "ignoring {} normals for {} surface points",
                normals.len(),
                self.points.len()
            );
        }
        self
    }

    /// Axis-aligned box of the given size, sampled at its corners and face centers.
    pub fn cuboid(width: f64, height: f64, depth: f64) -> Self {
        let (hx, hy, hz) = (width / 2.0, height / 2.0, depth / 2.0);
        let mut points = Vec::with_capacity(14);
        for sx in [-1.0, 1.0] {
            for sy in [-1.0, 1.0] {
                for sz in [-1.0, 1.0] {
                    points.push(Point3::new(sx * hx, sy * hy, sz * hz));
                }
            }
        }
        for s in [-1.0, 1.0] {
            points.push(Point3::new(s * hx, 0.0, 0.0));
            points.push(Point3::new(0.0, s * hy, 0.0));
            points.push(Point3::new(0.0, 0.0, s * hz));
        }
        Self::new(points)
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn normals(&self) -> Option<&[Vector3<f64>]> {
        self.normals.as_deref()
    }

    /// Diagonal of the bounding box of the surface samples.
    pub fn extent(&self) -> f64 {
        self.extent
    }
}

fn bounding_diagonal(points: &[Point3<f64>]) -> f64 {
    let Some(first) = points.first() else {
        return 0.0;
    };
    let (min, max) = points.iter().fold((first.coords, first.coords), |(min, max), p| {
        (min.inf(&p.coords), max.sup(&p.coords))
    });
    (max - min).norm()
}

/// Geometry placed at the object's current filtered pose.
#[derive(Clone, Debug, Default)]
struct Placement {
    cache: TransformCache,
    points: Vec<Point3<f64>>,
    normals: Vec<Vector3<f64>>,
}

/// Result of a distance query between an object and a hand.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Proximity {
    pub distance: f64,
    /// Nearest surface sample, for objects with geometry.
    pub nearest: Option<Point3<f64>>,
}

/// A tracked rigid object, keyed by its dataset label (e.g. `obj_000002`).
#[derive(Clone, Debug)]
pub struct RigidObject {
    label: String,
    name: String,
    dataset: Dataset,
    track: Track,
    score: Option<f32>,
    display: DisplayInfo,
    mesh_color: Color,
    target: TargetLink,
    origin: Origin,
    geometry: Option<Arc<ObjectGeometry>>,
    placement: Placement,
    distances: BTreeMap<String, f64>,
}

impl RigidObject {
    /// Builds an object on first sight.
    ///
    /// Unknown datasets and labels are configuration errors; a result without pose or score is
    /// an [`Error::InvalidDetectionPayload`].
    pub fn new(
        input: EntityInput<ObjectPoseEstimation>,
        label: &str,
        dataset: &str,
        timestamp: Timestamp,
        discovery_index: usize,
        config: &TrackConfig,
    ) -> Result<Self> {
        let dataset: Dataset = dataset.parse()?;
        dataset.validate_label(label)?;

        let (track, score, bbox, origin) = match input {
            EntityInput::FromDetection(estimation) => {
                let raw = require_pose(label, estimation.pose.as_ref())?;
                let score = require_score(label, estimation.score)?;
                let track = Track::from_detection(&raw, timestamp, config)?;
                (track, Some(score), Some(estimation.render_box), Origin::Detection)
            }
            EntityInput::FromTrajectory(trajectory) => {
                let track = Track::from_trajectory(label, trajectory, config)?;
                (track, None, None, Origin::Trajectory)
            }
        };

        let name = display_name(label).to_owned();
        log::info!("object {name} ({label}, {dataset}) discovered");

        Ok(Self {
            label: label.to_owned(),
            name,
            dataset,
            track,
            score,
            display: DisplayInfo::new(bbox, DEFAULT_COLOR),
            mesh_color: OBJECT_COLORS[discovery_index % OBJECT_COLORS.len()],
            target: TargetLink::default(),
            origin,
            geometry: None,
            placement: Placement::default(),
            distances: BTreeMap::new(),
        })
    }

    pub fn with_geometry(mut self, geometry: Arc<ObjectGeometry>) -> Self {
        self.geometry = Some(geometry);
        self.placement = Placement::default();
        self.place_geometry(true);
        self
    }

    /// Applies a new estimation. Malformed or out-of-order results are logged and ignored,
    /// leaving the last known state in place. Returns whether the update was applied.
    pub fn update(&mut self, estimation: &ObjectPoseEstimation, timestamp: Timestamp) -> bool {
        let applied = require_pose(&self.label, estimation.pose.as_ref()).and_then(|raw| {
            let score = require_score(&self.label, estimation.score)?;
            self.track.update(&raw, timestamp)?;
            Ok(score)
        });
        match applied {
            Ok(score) => {
                self.score = Some(score);
                self.display.bbox = Some(estimation.render_box);
                self.place_geometry(false);
                true
            }
            Err(err) => {
                log::warn!("ignoring update for object {}: {err}", self.label);
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
        self.track.replay(index)?;
        self.place_geometry(false);
        Ok(())
    }

    fn place_geometry(&mut self, force: bool) {
        let Some(geometry) = &self.geometry else {
            return;
        };
        let update = self.placement.cache.apply(self.track.state().filtered());
        if update == TransformUpdate::Unchanged && !force {
            return;
        }

        let iso = self.track.state().filtered().isometry();
        self.placement.points = geometry.points().iter().map(|p| iso * p).collect();
        if update == TransformUpdate::Rotated || force {
            if let Some(normals) = geometry.normals() {
                self.placement.normals = normals.iter().map(|n| iso.rotation * n).collect();
            }
        }
        log::trace!("object {} geometry placed ({update:?})", self.label);
    }

    /// Distance from the hand's filtered position to this object: the nearest placed surface
    /// sample when geometry is known, the object's filtered position otherwise.
    pub fn distance_to(&self, hand: &Hand) -> Proximity {
        let hand_position = Point3::from(hand.position());
        let nearest = self
            .placement
            .points
            .iter()
            .map(|p| (p, nalgebra::distance(p, &hand_position)))
            .min_by(|a, b| a.1.total_cmp(&b.1));
        match nearest {
            Some((point, distance)) => Proximity {
                distance,
                nearest: Some(*point),
            },
            None => Proximity {
                distance: (self.position() - hand.position()).norm(),
                nearest: None,
            },
        }
    }

    pub fn record_distance(&mut self, hand_label: &str, distance: f64) {
        self.distances.insert(hand_label.to_owned(), distance);
    }

    pub fn forget_hand(&mut self, hand_label: &str) {
        self.distances.remove(hand_label);
        if self.target.counterpart.as_deref() == Some(hand_label) {
            self.set_target_info(false, None, None);
        }
    }

    pub fn set_target_info(
        &mut self,
        is_targeted: bool,
        targeter: Option<&str>,
        info: Option<TargetInfo>,
    ) {
        self.target.set(is_targeted, targeter, info);
    }

    /// Highlights the object with its targeter's color while targeted.
    pub fn refresh_display(&mut self, targeter_color: Option<Color>) {
        match (self.target.is_targeted, targeter_color) {
            (true, Some(color)) => {
                self.display.color = color;
                self.display.thickness = DisplayInfo::TARGETED_THICKNESS;
            }
            _ => {
                self.display.color = DEFAULT_COLOR;
                self.display.thickness = DisplayInfo::DEFAULT_THICKNESS;
            }
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dataset(&self) -> Dataset {
        self.dataset
    }

    pub fn score(&self) -> Option<f32> {
        self.score
    }

    pub fn state(&self) -> &PoseState {
        self.track.state()
    }

    pub fn pose(&self) -> &Pose {
        self.track.state().filtered()
    }

    pub fn position(&self) -> Vector3<f64> {
        self.track.state().filtered().position
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

    pub fn geometry(&self) -> Option<&ObjectGeometry> {
        self.geometry.as_deref()
    }

    pub fn placed_points(&self) -> &[Point3<f64>] {
        &self.placement.points
    }

    pub fn placed_normals(&self) -> &[Vector3<f64>] {
        &self.placement.normals
    }

    pub fn display(&self) -> &DisplayInfo {
        &self.display
    }

    pub fn mesh_color(&self) -> Color {
        self.mesh_color
    }

    pub fn render_box(&self) -> Option<BoundingBox> {
        self.display.bbox
    }

    pub fn target(&self) -> &TargetLink {
        &self.target
    }

    pub fn is_targeted(&self) -> bool {
        self.target.is_targeted
    }

    pub fn distances(&self) -> &BTreeMap<String, f64> {
        &self.distances
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn age(&self) -> u32 {
        self.track.age()
    }
}

fn require_score(label: &str, score: Option<f32>) -> Result<f32> {
    match score {
        Some(score) if score.is_finite() => Ok(score),
        _ => Err(Error::InvalidDetectionPayload {
            label: label.to_owned(),
            reason: "missing score",
        }),
    }
}
