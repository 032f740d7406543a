//! Scripted perception backends for running the pipeline without a camera or models.
//!
//! A right hand starts 300 mm left of a mustard bottle and moves towards it at 100 mm/s. A tomato
//! can sits further along the same line.

use anyhow::Result;
use grasp_monitor::{
    geometry::Pose,
    pipeline::{HandDetector, ObjectDetector, PoseEstimator, Stages},
    types::{BoundingBox, Detection, Frame, HandResult, ObjectPoseEstimation},
};

const HAND_START_MM: f64 = -300.0;
const HAND_SPEED_MM_PER_MS: f64 = 0.1;
const DEPTH_MM: f64 = 500.0;
/// Objects become visible to the detector after this.
const OBJECTS_APPEAR_MS: f64 = 200.0;

/// Object placements in the estimator's frame: metres, camera Y axis.
const OBJECTS: &[(&str, [f64; 3])] = &[
    ("obj_000005", [0.0, 0.0, 0.5]),
    ("obj_000004", [0.25, 0.0, 0.5]),
];

pub fn stages() -> Stages {
    Stages::new(ScriptedHand, ScriptedDetector, ScriptedEstimator)
}

struct ScriptedHand;

impl HandDetector for ScriptedHand {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<HandResult>> {
        let x = (HAND_START_MM + HAND_SPEED_MM_PER_MS * frame.timestamp).min(-40.0);
        Ok(vec![HandResult {
            label: "right".into(),
            pose: Some(Pose::from_position(x, 0.0, DEPTH_MM)),
            landmarks: None,
            bbox: Some(BoundingBox::new(200.0, 300.0, 320.0, 440.0)),
        }])
    }
}

struct ScriptedDetector;

impl ObjectDetector for ScriptedDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Option<Vec<Detection>>> {
        if frame.timestamp < OBJECTS_APPEAR_MS {
            return Ok(None);
        }
        Ok(Some(
            OBJECTS
                .iter()
                .enumerate()
                .map(|(i, (label, _))| Detection {
                    label: (*label).to_string(),
                    bbox: render_box(i),
                    score: 0.9,
                })
                .collect(),
        ))
    }
}

struct ScriptedEstimator;

impl PoseEstimator for ScriptedEstimator {
    fn estimate(
        &mut self,
        _frame: &Frame,
        detections: Option<&[Detection]>,
    ) -> Result<Vec<ObjectPoseEstimation>> {
        if let Some(detections) = detections {
            log::debug!("refining {} detection(s)", detections.len());
        }
        Ok(OBJECTS
            .iter()
            .enumerate()
            .map(|(i, (label, [x, y, z]))| ObjectPoseEstimation {
                label: (*label).to_string(),
                pose: Some(Pose::from_position(*x, *y, *z)),
                score: Some(0.8),
                render_box: render_box(i),
                dataset: "ycbv".into(),
            })
            .collect())
    }
}

fn render_box(index: usize) -> BoundingBox {
    let x = 560.0 + 180.0 * index as f32;
    BoundingBox::new(x, 280.0, x + 120.0, 480.0)
}
