//! Hand/object tracking and grasp-intent detection.
//!
//! [`pipeline::Coordinator`] drives a frame source and three perception stages on their own
//! threads and funnels their results into a [`scene::Scene`], which tracks every hand and object,
//! records their trajectories and works out which object each hand is reaching for.

pub mod config;
pub mod entity;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod scene;
pub mod targeting;
pub mod trajectory;
pub mod types;

pub use config::{PipelineConfig, RuntimeContext, SceneConfig, TrackConfig};
pub use error::{Error, Result};
pub use scene::{Scene, SceneSnapshot, SharedScene};
