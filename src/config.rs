use std::time::Duration;

use serde::Deserialize;

use crate::geometry::Ingestion;

/// Per-namespace tracking parameters.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    /// Cutoff frequency of the pose smoothing filter.
    pub filter_cutoff_hz: f64,
    /// Maximum number of samples kept per trajectory; `None` keeps everything.
    pub trajectory_limit: Option<usize>,
    pub ingestion: Ingestion,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            filter_cutoff_hz: 5.0,
            trajectory_limit: Some(4096),
            ingestion: Ingestion::IDENTITY,
        }
    }
}

impl TrackConfig {
    pub fn with_ingestion(self, ingestion: Ingestion) -> Self {
        Self { ingestion, ..self }
    }

    pub fn with_trajectory_limit(self, trajectory_limit: Option<usize>) -> Self {
        Self {
            trajectory_limit,
            ..self
        }
    }

    pub fn with_filter_cutoff(self, filter_cutoff_hz: f64) -> Self {
        Self {
            filter_cutoff_hz,
            ..self
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub hands: TrackConfig,
    pub objects: TrackConfig,
    /// Entities not updated for this long are evicted; `None` keeps them forever.
    pub grace_period_ms: Option<f64>,
    /// Only objects reachable sooner than this are considered targeted.
    pub target_threshold_ms: f64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            hands: TrackConfig::default(),
            objects: TrackConfig::default().with_ingestion(Ingestion::CAMERA_MILLIMETRES),
            grace_period_ms: Some(2000.0),
            target_threshold_ms: 1500.0,
        }
    }
}

impl SceneConfig {
    pub fn with_grace_period(self, grace_period_ms: Option<f64>) -> Self {
        Self {
            grace_period_ms,
            ..self
        }
    }

    pub fn with_target_threshold(self, target_threshold_ms: f64) -> Self {
        Self {
            target_threshold_ms,
            ..self
        }
    }

    pub fn with_objects(self, objects: TrackConfig) -> Self {
        Self { objects, ..self }
    }

    pub fn with_hands(self, hands: TrackConfig) -> Self {
        Self { hands, ..self }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on every wait, so workers notice a stop request without new frames.
    pub wait_timeout_ms: u64,
    /// Detector and estimator calls slower than this count as a miss.
    pub stage_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 100,
            stage_timeout_ms: 2000,
        }
    }
}

impl PipelineConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    pub fn with_wait_timeout(self, timeout: Duration) -> Self {
        Self {
            wait_timeout_ms: timeout.as_millis() as u64,
            ..self
        }
    }

    pub fn with_stage_timeout(self, timeout: Duration) -> Self {
        Self {
            stage_timeout_ms: timeout.as_millis() as u64,
            ..self
        }
    }
}

/// Process-level runtime settings, created by the entry point and handed to the frame source.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RuntimeContext {
    pub device: String,
    pub resolution: (u32, u32),
    pub fps: f64,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self {
            device: "synthetic".to_string(),
            resolution: (1280, 720),
            fps: 30.0,
        }
    }
}

impl RuntimeContext {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1.0))
    }
}
