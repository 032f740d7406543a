use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender};
use grasp_monitor::{
    Error, PipelineConfig, Scene, SceneConfig,
    geometry::Pose,
    pipeline::{
        ChannelSource, Coordinator, HandDetector, ObjectDetector, ObjectMode, PoseEstimator,
        Stages,
    },
    types::{BoundingBox, Detection, Frame, HandResult, ObjectPoseEstimation},
};
use parking_lot::Mutex;

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

fn config() -> PipelineConfig {
    PipelineConfig::default().with_wait_timeout(Duration::from_millis(10))
}

fn source() -> (Sender<Frame>, ChannelSource) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        tx,
        ChannelSource::new(rx).with_poll_interval(Duration::from_millis(5)),
    )
}

fn frame(timestamp: f64) -> Frame {
    Frame::empty(64, 48, timestamp)
}

struct NoHands;

impl HandDetector for NoHands {
    fn detect(&mut self, _frame: &Frame) -> anyhow::Result<Vec<HandResult>> {
        Ok(Vec::new())
    }
}

struct NoObjects;

impl ObjectDetector for NoObjects {
    fn detect(&mut self, _frame: &Frame) -> anyhow::Result<Option<Vec<Detection>>> {
        Ok(None)
    }
}

impl PoseEstimator for NoObjects {
    fn estimate(
        &mut self,
        _frame: &Frame,
        _detections: Option<&[Detection]>,
    ) -> anyhow::Result<Vec<ObjectPoseEstimation>> {
        Ok(Vec::new())
    }
}

/// Blocks inside its first call until the gate opens.
struct GatedHands {
    seen: Arc<Mutex<Vec<f64>>>,
    gate: Receiver<()>,
}

impl HandDetector for GatedHands {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<HandResult>> {
        let first = {
            let mut seen = self.seen.lock();
            seen.push(frame.timestamp);
            seen.len() == 1
        };
        if first {
            self.gate.recv()?;
        }
        Ok(vec![HandResult {
            label: "right".into(),
            pose: Some(Pose::from_position(frame.timestamp, 0.0, 0.0)),
            landmarks: None,
            bbox: None,
        }])
    }
}

/// Finds the mustard bottle from `visible_from` onwards.
struct MustardDetector {
    visible_from: f64,
    calls: Arc<AtomicUsize>,
}

impl ObjectDetector for MustardDetector {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Option<Vec<Detection>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if frame.timestamp < self.visible_from {
            return Ok(None);
        }
        Ok(Some(vec![Detection {
            label: "obj_000005".into(),
            bbox: BoundingBox::new(10.0, 10.0, 30.0, 40.0),
            score: 0.9,
        }]))
    }
}

/// Records whether each call was handed fresh detections.
struct RecordingEstimator {
    dataset: &'static str,
    with_detections: Arc<Mutex<Vec<bool>>>,
}

impl PoseEstimator for RecordingEstimator {
    fn estimate(
        &mut self,
        _frame: &Frame,
        detections: Option<&[Detection]>,
    ) -> anyhow::Result<Vec<ObjectPoseEstimation>> {
        self.with_detections.lock().push(detections.is_some());
        Ok(vec![ObjectPoseEstimation {
            label: "obj_000005".into(),
            pose: Some(Pose::from_position(0.1, 0.0, 0.5)),
            score: Some(0.8),
            render_box: BoundingBox::new(10.0, 10.0, 30.0, 40.0),
            dataset: self.dataset.into(),
        }])
    }
}

/// Stalls past the stage timeout on its first call, reporting the object at a marker pose.
struct StallingEstimator {
    stall: Duration,
    calls: Arc<AtomicUsize>,
}

impl PoseEstimator for StallingEstimator {
    fn estimate(
        &mut self,
        _frame: &Frame,
        _detections: Option<&[Detection]>,
    ) -> anyhow::Result<Vec<ObjectPoseEstimation>> {
        let x = if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            thread::sleep(self.stall);
            0.5
        } else {
            0.1
        };
        Ok(vec![ObjectPoseEstimation {
            label: "obj_000005".into(),
            pose: Some(Pose::from_position(x, 0.0, 0.5)),
            score: Some(0.8),
            render_box: BoundingBox::new(10.0, 10.0, 30.0, 40.0),
            dataset: "ycbv".into(),
        }])
    }
}

#[test]
fn slowed_stage_resumes_on_freshest_frame() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (gate_tx, gate_rx) = crossbeam_channel::bounded(1);
    let hands = GatedHands {
        seen: seen.clone(),
        gate: gate_rx,
    };
    let scene = Scene::new("freshness", SceneConfig::default()).into_shared();
    let (frame_tx, source) = source();
    let coordinator = Coordinator::start(
        source,
        Stages::new(hands, NoObjects, NoObjects),
        scene.clone(),
        config(),
    )
    .unwrap();

    frame_tx.send(frame(1.0)).unwrap();
    wait_for("first hand call", || seen.lock().len() == 1);

    for timestamp in [2.0, 3.0, 4.0] {
        frame_tx.send(frame(timestamp)).unwrap();
    }
    wait_for("all frames published", || coordinator.stats().published == 4);
    gate_tx.send(()).unwrap();

    wait_for("second hand call", || seen.lock().len() == 2);
    thread::sleep(Duration::from_millis(50));

    assert_eq!(*seen.lock(), vec![1.0, 4.0]);
    let stats = coordinator.stats();
    assert_eq!(stats.hand.processed, 2);
    assert_eq!(stats.hand.last_sequence, 4);
    wait_for("hand in scene", || {
        scene
            .lock()
            .hand("right")
            .is_some_and(|hand| hand.trajectory().len() == 2)
    });

    coordinator.stop().unwrap();
}

#[test]
fn detection_switches_to_tracking_until_redetect() {
    let detector_calls = Arc::new(AtomicUsize::new(0));
    let with_detections = Arc::new(Mutex::new(Vec::new()));
    let stages = Stages::new(
        NoHands,
        MustardDetector {
            visible_from: 3.0,
            calls: detector_calls.clone(),
        },
        RecordingEstimator {
            dataset: "ycbv",
            with_detections: with_detections.clone(),
        },
    );
    let scene = Scene::new("tracking", SceneConfig::default()).into_shared();
    let (frame_tx, source) = source();
    let coordinator = Coordinator::start(source, stages, scene.clone(), config()).unwrap();
    assert_eq!(coordinator.mode(), ObjectMode::Detect);

    for timestamp in [1.0, 2.0, 3.0] {
        frame_tx.send(frame(timestamp)).unwrap();
        wait_for("frame published", || {
            coordinator.stats().published == timestamp as u64
        });
    }
    wait_for("tracking", || coordinator.mode() == ObjectMode::Track);
    wait_for("object in scene", || scene.lock().object("obj_000005").is_some());
    assert_eq!(with_detections.lock().first(), Some(&true));

    let calls_when_tracking = detector_calls.load(Ordering::SeqCst);
    let estimates_before = coordinator.stats().estimate.processed;
    for timestamp in [4.0, 5.0] {
        frame_tx.send(frame(timestamp)).unwrap();
    }
    wait_for("tracking estimates", || {
        coordinator.stats().estimate.processed > estimates_before
    });
    assert_eq!(detector_calls.load(Ordering::SeqCst), calls_when_tracking);
    assert_eq!(with_detections.lock().last(), Some(&false));

    let fresh_before = with_detections.lock().iter().filter(|fresh| **fresh).count();
    coordinator.request_redetect();
    wait_for("re-detection", || {
        detector_calls.load(Ordering::SeqCst) > calls_when_tracking
    });
    wait_for("tracking again", || coordinator.mode() == ObjectMode::Track);
    frame_tx.send(frame(6.0)).unwrap();
    wait_for("fresh detections estimated", || {
        with_detections.lock().iter().filter(|fresh| **fresh).count() > fresh_before
    });

    let object_trajectory = scene.lock().object("obj_000005").unwrap().trajectory().len();
    assert!(object_trajectory >= 2);
    coordinator.stop().unwrap();
}

#[test]
fn misconfigured_dataset_stops_the_run() {
    let stages = Stages::new(
        NoHands,
        MustardDetector {
            visible_from: 0.0,
            calls: Arc::new(AtomicUsize::new(0)),
        },
        RecordingEstimator {
            dataset: "coco",
            with_detections: Arc::new(Mutex::new(Vec::new())),
        },
    );
    let scene = Scene::new("misconfigured", SceneConfig::default()).into_shared();
    let (frame_tx, source) = source();
    let coordinator = Coordinator::start(source, stages, scene.clone(), config()).unwrap();

    frame_tx.send(frame(1.0)).unwrap();
    assert!(coordinator.wait_until_started(Duration::from_secs(5)));
    wait_for("pipeline to stop", || !coordinator.is_running());

    let err = coordinator.stop().unwrap_err();
    assert!(matches!(err, Error::UnknownDataset(ref name) if name == "coco"));
    assert_eq!(scene.lock().objects().count(), 0);
}

#[test]
fn render_sink_receives_snapshots() {
    let scene = Scene::new("render", SceneConfig::default()).into_shared();
    let (frame_tx, source) = source();
    let coordinator = Coordinator::start(
        source,
        Stages::new(NoHands, NoObjects, NoObjects),
        scene,
        config(),
    )
    .unwrap();
    let snapshots = coordinator.snapshots();

    frame_tx.send(frame(1.0)).unwrap();
    let snapshot = snapshots.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(snapshot.hands.is_empty());
    assert!(snapshot.objects.is_empty());

    drop(frame_tx);
    wait_for("source to finish", || !coordinator.is_running());
    coordinator.stop().unwrap();
}

#[test]
fn lagging_render_sink_gets_the_newest_snapshot() {
    let scene = Scene::new("render-lag", SceneConfig::default()).into_shared();
    let (frame_tx, source) = source();
    let coordinator = Coordinator::start(
        source,
        Stages::new(NoHands, NoObjects, NoObjects),
        scene.clone(),
        config(),
    )
    .unwrap();
    let snapshots = coordinator.snapshots();

    // Nobody reads while these frames go through the scene.
    for sequence in 1..=5u64 {
        frame_tx.send(frame(sequence as f64)).unwrap();
        wait_for("frame published", || coordinator.stats().published == sequence);
        wait_for("scene clock", || scene.lock().clock() == sequence as f64);
    }
    frame_tx.send(frame(6.0)).unwrap();
    wait_for("last frame published", || coordinator.stats().published == 6);
    thread::sleep(Duration::from_millis(100));

    let snapshot = snapshots.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(
        snapshot.timestamp >= 5.0,
        "got snapshot at {}",
        snapshot.timestamp
    );
    assert!(snapshots.try_recv().is_err());

    coordinator.stop().unwrap();
}

#[test]
fn timed_out_estimate_never_reaches_the_scene() {
    let estimator_calls = Arc::new(AtomicUsize::new(0));
    let stages = Stages::new(
        NoHands,
        MustardDetector {
            visible_from: 0.0,
            calls: Arc::new(AtomicUsize::new(0)),
        },
        StallingEstimator {
            stall: Duration::from_millis(300),
            calls: estimator_calls.clone(),
        },
    );
    let scene = Scene::new("stalled", SceneConfig::default()).into_shared();
    let (frame_tx, source) = source();
    let config = config().with_stage_timeout(Duration::from_millis(100));
    let coordinator = Coordinator::start(source, stages, scene.clone(), config).unwrap();

    frame_tx.send(frame(1.0)).unwrap();
    wait_for("estimate timeout", || coordinator.stats().estimate.timeouts == 1);
    assert!(coordinator.is_running());

    frame_tx.send(frame(2.0)).unwrap();
    wait_for("object from the next frame", || {
        scene
            .lock()
            .object("obj_000005")
            .and_then(|object| object.trajectory().last().map(|s| s.timestamp))
            == Some(2.0)
    });

    {
        let scene = scene.lock();
        let object = scene.object("obj_000005").unwrap();
        // Ingestion scales metres to millimetres.
        for sample in object.trajectory().iter() {
            assert!((sample.x - 100.0).abs() < 1e-6, "stale pose x = {}", sample.x);
        }
    }
    let stats = coordinator.stats();
    assert_eq!(stats.estimate.timeouts, 1);
    assert!(stats.estimate.misses >= 1);
    assert!(estimator_calls.load(Ordering::SeqCst) >= 2);
    coordinator.stop().unwrap();
}
