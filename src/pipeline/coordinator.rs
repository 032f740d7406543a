//! Acquisition plus three perception stages, each on its own thread.
//!
//! Frames are never queued. The acquisition thread overwrites the [`FrameSlot`] and raises each
//! stage's [`ReadySignal`]; a stage that is still busy finds its signal already set when it comes
//! back and picks up whatever frame is current at that point.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use super::{
    signal::ReadySignal,
    slot::{FrameSlot, Published},
    source::FrameSource,
    stages::{HandDetector, ObjectDetector, PoseEstimator, Stages, timed},
};
use crate::{
    config::PipelineConfig,
    error::{Error, Result},
    scene::{SceneSnapshot, SharedScene},
    types::Detection,
};

/// Whether the object branch is looking for objects or following the ones it found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectMode {
    Detect,
    Track,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageStats {
    /// Frames taken by the stage, whatever the outcome.
    pub processed: u64,
    /// Calls that failed, found nothing or timed out.
    pub misses: u64,
    /// Calls whose result was discarded for exceeding the stage timeout.
    pub timeouts: u64,
    /// Sequence of the last frame taken, 0 before the first.
    pub last_sequence: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub published: u64,
    pub hand: StageStats,
    pub detect: StageStats,
    pub estimate: StageStats,
}

#[derive(Debug, Default)]
struct StageCounters {
    processed: AtomicU64,
    misses: AtomicU64,
    timeouts: AtomicU64,
    last_sequence: AtomicU64,
}

impl StageCounters {
    fn took(&self, sequence: u64) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.last_sequence.store(sequence, Ordering::Relaxed);
    }

    fn missed(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn timed_out(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        self.missed();
    }

    fn read(&self) -> StageStats {
        StageStats {
            processed: self.processed.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            last_sequence: self.last_sequence.load(Ordering::Relaxed),
        }
    }
}

struct Shared {
    config: PipelineConfig,
    slot: FrameSlot,
    started: ReadySignal,
    hand_ready: ReadySignal,
    detect_ready: ReadySignal,
    estimate_ready: ReadySignal,
    stop: AtomicBool,
    acquiring: AtomicBool,
    tracking: AtomicBool,
    /// Detections waiting for the estimate stage; consumed once.
    detections: Mutex<Option<Vec<Detection>>>,
    fatal: Mutex<Option<Error>>,
    published: AtomicU64,
    hand: StageCounters,
    detect: StageCounters,
    estimate: StageCounters,
}

impl Shared {
    fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            slot: FrameSlot::new(),
            started: ReadySignal::new(),
            hand_ready: ReadySignal::new(),
            detect_ready: ReadySignal::new(),
            estimate_ready: ReadySignal::new(),
            stop: AtomicBool::new(false),
            acquiring: AtomicBool::new(true),
            tracking: AtomicBool::new(false),
            detections: Mutex::new(None),
            fatal: Mutex::new(None),
            published: AtomicU64::new(0),
            hand: StageCounters::default(),
            detect: StageCounters::default(),
            estimate: StageCounters::default(),
        }
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn mode(&self) -> ObjectMode {
        if self.tracking.load(Ordering::SeqCst) {
            ObjectMode::Track
        } else {
            ObjectMode::Detect
        }
    }

    /// Blocks until the first frame is published. Returns `false` if stopped first.
    fn wait_started(&self) -> bool {
        while !self.stopping() {
            if self.started.wait_timeout(self.config.wait_timeout()) {
                return true;
            }
        }
        false
    }

    /// Records a run-ending error and stops every thread. Only the first error is kept.
    fn fail(&self, stage: &str, err: Error) {
        log::error!("{stage} stage failed, stopping pipeline: {err}");
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(err);
        }
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Waits on `signal` and hands each fresh frame to `step` until the pipeline stops.
fn run_worker(shared: &Shared, signal: &ReadySignal, mut step: impl FnMut(Published)) {
    if !shared.wait_started() {
        return;
    }
    while !shared.stopping() {
        if !signal.take_timeout(shared.config.wait_timeout()) {
            continue;
        }
        if shared.stopping() {
            break;
        }
        if let Some(published) = shared.slot.snapshot() {
            step(published);
        }
    }
}

fn run_acquisition<S: FrameSource>(
    shared: &Shared,
    mut source: S,
    scene: &SharedScene,
    snapshot_tx: Sender<SceneSnapshot>,
    stale: Receiver<SceneSnapshot>,
) {
    while !shared.stopping() {
        if !source.is_running() {
            log::info!("frame source finished");
            break;
        }
        let Some(frame) = source.next_frame().into_frame() else {
            continue;
        };

        let sequence = shared.slot.publish(frame);
        shared.published.store(sequence, Ordering::Relaxed);
        shared.hand_ready.set();
        shared.estimate_ready.set();
        if shared.mode() == ObjectMode::Detect {
            shared.detect_ready.set();
        }
        if sequence == 1 {
            log::info!("first frame published, pipeline started");
            shared.started.set();
        }

        let snapshot = {
            let mut scene = scene.lock();
            scene.refresh();
            scene.snapshot()
        };
        // The channel holds one snapshot; replace it if the render sink has not taken it yet.
        let _ = stale.try_recv();
        let _ = snapshot_tx.try_send(snapshot);
    }
    source.stop();
    shared.acquiring.store(false, Ordering::SeqCst);
}

fn hand_step(
    shared: &Shared,
    detector: &mut dyn HandDetector,
    scene: &SharedScene,
    published: Published,
) {
    shared.hand.took(published.sequence);
    let frame = &published.frame;
    match timed("hand", shared.config.stage_timeout(), || detector.detect(frame)) {
        Ok(Ok(results)) => {
            if results.is_empty() {
                shared.hand.missed();
            }
            if let Err(err) = scene.lock().update_hands(&results, frame.timestamp) {
                shared.fail("hand", err);
            }
        }
        Ok(Err(err)) => {
            log::warn!("hand detection failed: {err:?}");
            shared.hand.missed();
        }
        Err(err) => {
            log::warn!("{err}");
            shared.hand.timed_out();
        }
    }
}

fn detect_step(shared: &Shared, detector: &mut dyn ObjectDetector, published: Published) {
    // Signal raised before the switch to tracking.
    if shared.mode() == ObjectMode::Track {
        return;
    }
    shared.detect.took(published.sequence);
    let frame = &published.frame;
    match timed("detect", shared.config.stage_timeout(), || detector.detect(frame)) {
        Ok(Ok(Some(detections))) if !detections.is_empty() => {
            log::info!(
                "detected {} object(s) in frame {}, switching to tracking",
                detections.len(),
                published.sequence
            );
            *shared.detections.lock() = Some(detections);
            shared.tracking.store(true, Ordering::SeqCst);
            shared.estimate_ready.set();
        }
        Ok(Ok(_)) => {
            log::debug!("no objects in frame {}", published.sequence);
            shared.detect.missed();
        }
        Ok(Err(err)) => {
            log::warn!("object detection failed: {err:?}");
            shared.detect.missed();
        }
        Err(err) => {
            log::warn!("{err}");
            shared.detect.timed_out();
        }
    }
}

fn estimate_step(
    shared: &Shared,
    estimator: &mut dyn PoseEstimator,
    scene: &SharedScene,
    published: Published,
) {
    // Nothing to estimate until a detection succeeds. Detections are stored before the switch
    // to tracking, so they are visible once the mode reads `Track`.
    if shared.mode() == ObjectMode::Detect {
        return;
    }
    let detections = shared.detections.lock().take();
    shared.estimate.took(published.sequence);
    let frame = &published.frame;
    let estimated = timed("estimate", shared.config.stage_timeout(), || {
        estimator.estimate(frame, detections.as_deref())
    });
    match estimated {
        Ok(Ok(estimations)) => {
            if estimations.is_empty() {
                shared.estimate.missed();
            }
            if let Err(err) = scene.lock().update_objects(&estimations, frame.timestamp) {
                shared.fail("estimate", err);
            }
        }
        Ok(Err(err)) => {
            log::warn!("pose estimation failed: {err:?}");
            shared.estimate.missed();
        }
        Err(err) => {
            log::warn!("{err}");
            shared.estimate.timed_out();
        }
    }
}

/// Handle to a running pipeline. Dropping it stops and joins every thread.
pub struct Coordinator {
    shared: Arc<Shared>,
    handles: Vec<(&'static str, thread::JoinHandle<()>)>,
    snapshot_rx: Receiver<SceneSnapshot>,
}

impl Coordinator {
    /// Starts the source, then spawns the acquisition thread and one thread per stage.
    pub fn start<S: FrameSource>(
        mut source: S,
        stages: Stages,
        scene: SharedScene,
        config: PipelineConfig,
    ) -> Result<Self> {
        // Fail fast before spawning any thread.
        source.start()?;

        let (snapshot_tx, snapshot_rx) = crossbeam_channel::bounded(1);
        let mut coordinator = Coordinator {
            shared: Arc::new(Shared::new(config)),
            handles: Vec::with_capacity(4),
            snapshot_rx,
        };
        let Stages {
            mut hands,
            mut detector,
            mut estimator,
        } = stages;

        let shared = coordinator.shared.clone();
        let hand_scene = scene.clone();
        coordinator.spawn("hand-stage", move || {
            run_worker(&shared, &shared.hand_ready, |published| {
                hand_step(&shared, hands.as_mut(), &hand_scene, published)
            })
        })?;

        let shared = coordinator.shared.clone();
        coordinator.spawn("detect-stage", move || {
            run_worker(&shared, &shared.detect_ready, |published| {
                detect_step(&shared, detector.as_mut(), published)
            })
        })?;

        let shared = coordinator.shared.clone();
        let estimate_scene = scene.clone();
        coordinator.spawn("estimate-stage", move || {
            run_worker(&shared, &shared.estimate_ready, |published| {
                estimate_step(&shared, estimator.as_mut(), &estimate_scene, published)
            })
        })?;

        let shared = coordinator.shared.clone();
        let stale = coordinator.snapshot_rx.clone();
        coordinator.spawn("acquisition", move || {
            run_acquisition(&shared, source, &scene, snapshot_tx, stale)
        })?;

        log::info!("pipeline running");
        Ok(coordinator)
    }

    fn spawn(
        &mut self,
        name: &'static str,
        body: impl FnOnce() + Send + 'static,
    ) -> Result<()> {
        let handle = thread::Builder::new().name(name.to_string()).spawn(body)?;
        self.handles.push((name, handle));
        Ok(())
    }

    pub fn mode(&self) -> ObjectMode {
        self.shared.mode()
    }

    /// Drops the tracked detections and runs detection again on the next frame.
    pub fn request_redetect(&self) {
        if self.shared.tracking.swap(false, Ordering::SeqCst) {
            log::info!("re-detection requested");
        }
        *self.shared.detections.lock() = None;
        self.shared.detect_ready.set();
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            published: self.shared.published.load(Ordering::Relaxed),
            hand: self.shared.hand.read(),
            detect: self.shared.detect.read(),
            estimate: self.shared.estimate.read(),
        }
    }

    /// Scene snapshots taken after each published frame. Only the newest unread snapshot is
    /// kept; older ones are discarded while the receiver lags.
    pub fn snapshots(&self) -> Receiver<SceneSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Blocks until the first frame is published or `timeout` elapses.
    pub fn wait_until_started(&self, timeout: Duration) -> bool {
        self.shared.started.wait_timeout(timeout)
    }

    /// Whether frames are still being acquired.
    pub fn is_running(&self) -> bool {
        !self.shared.stopping() && self.shared.acquiring.load(Ordering::SeqCst)
    }

    /// Stops the pipeline and joins every thread. Returns the error that ended the run, if a
    /// stage hit one.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown();
        match self.shared.fatal.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn shutdown(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        for (name, handle) in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!("{name} thread panicked");
            }
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
