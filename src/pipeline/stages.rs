use std::time::{Duration, Instant};

use crate::{
    error::{Error, Result},
    types::{Detection, Frame, HandResult, ObjectPoseEstimation},
};

pub trait HandDetector: Send + 'static {
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Vec<HandResult>>;
}

pub trait ObjectDetector: Send + 'static {
    /// `Ok(None)` or an empty list means nothing was found in this frame.
    fn detect(&mut self, frame: &Frame) -> anyhow::Result<Option<Vec<Detection>>>;
}

pub trait PoseEstimator: Send + 'static {
    /// Estimates object poses. `detections` is set right after a successful detection, and
    /// `None` while tracking from previous estimates.
    fn estimate(
        &mut self,
        frame: &Frame,
        detections: Option<&[Detection]>,
    ) -> anyhow::Result<Vec<ObjectPoseEstimation>>;
}

/// The three perception backends driven by the coordinator, one thread each.
pub struct Stages {
    pub hands: Box<dyn HandDetector>,
    pub detector: Box<dyn ObjectDetector>,
    pub estimator: Box<dyn PoseEstimator>,
}

impl Stages {
    pub fn new(
        hands: impl HandDetector,
        detector: impl ObjectDetector,
        estimator: impl PoseEstimator,
    ) -> Self {
        Self {
            hands: Box::new(hands),
            detector: Box::new(detector),
            estimator: Box::new(estimator),
        }
    }
}

/// Runs one stage call and discards its output if it took longer than `limit`.
///
/// The call itself is never interrupted; a slow backend only costs the frames that arrive
/// while it runs.
pub(crate) fn timed<T>(stage: &'static str, limit: Duration, call: impl FnOnce() -> T) -> Result<T> {
    let started = Instant::now();
    let output = call();
    let elapsed = started.elapsed();
    if elapsed > limit {
        return Err(Error::StageTimeout {
            stage,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            limit_ms: limit.as_secs_f64() * 1000.0,
        });
    }
    log::trace!("{stage} stage took {elapsed:?}");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn slow_calls_are_discarded() {
        let fast = timed("hand", Duration::from_secs(1), || 42).unwrap();
        assert_eq!(fast, 42);

        let err = timed("estimate", Duration::from_millis(1), || {
            thread::sleep(Duration::from_millis(10));
            42
        })
        .unwrap_err();
        match err {
            Error::StageTimeout {
                stage, elapsed_ms, ..
            } => {
                assert_eq!(stage, "estimate");
                assert!(elapsed_ms >= 10.0);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
