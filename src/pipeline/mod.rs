pub mod coordinator;
pub mod signal;
pub mod slot;
pub mod source;
pub mod stages;

// Re-exports for convenience
pub use coordinator::{Coordinator, ObjectMode, PipelineStats, StageStats};
pub use signal::ReadySignal;
pub use slot::{FrameSlot, Published};
pub use source::{ChannelSource, FrameRead, FrameSource, SyntheticSource};
pub use stages::{HandDetector, ObjectDetector, PoseEstimator, Stages};
