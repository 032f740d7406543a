//! Pose and rigid-transform primitives.

mod filter;
mod pose;
mod state;
mod transform;

pub use filter::PoseFilter;
pub use pose::{Ingestion, Pose};
pub use state::PoseState;
pub use transform::{
    IDENTITY_TOLERANCE, ROTATION_TOLERANCE, TransformCache, TransformUpdate, has_rotation,
    is_identity,
};
