use std::{
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::{
    config::RuntimeContext,
    error::Result,
    types::{Frame, Timestamp},
};

/// Result of one read from a frame source. A failed read carries no usable image.
#[derive(Clone, Debug, Default)]
pub struct FrameRead {
    pub success: bool,
    pub color: Vec<u8>,
    pub depth: Option<Vec<u16>>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Timestamp,
}

impl FrameRead {
    pub fn failed() -> Self {
        Self::default()
    }

    pub fn into_frame(self) -> Option<Frame> {
        self.success.then(|| Frame {
            color: self.color,
            depth: self.depth,
            width: self.width,
            height: self.height,
            timestamp: self.timestamp,
        })
    }
}

impl From<Frame> for FrameRead {
    fn from(frame: Frame) -> Self {
        Self {
            success: true,
            color: frame.color,
            depth: frame.depth,
            width: frame.width,
            height: frame.height,
            timestamp: frame.timestamp,
        }
    }
}

/// Producer of timestamped color/depth frames, driven by the acquisition thread.
pub trait FrameSource: Send + 'static {
    fn start(&mut self) -> Result<()>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Reads the next frame. May block, but should return within a bounded time so the
    /// acquisition thread can observe stop requests.
    fn next_frame(&mut self) -> FrameRead;
}

/// Frames pushed by another thread over a channel. Stops once every sender is dropped.
pub struct ChannelSource {
    frame_rx: Receiver<Frame>,
    poll: Duration,
    running: bool,
}

impl ChannelSource {
    pub fn new(frame_rx: Receiver<Frame>) -> Self {
        Self {
            frame_rx,
            poll: Duration::from_millis(50),
            running: false,
        }
    }

    pub fn with_poll_interval(self, poll: Duration) -> Self {
        Self { poll, ..self }
    }
}

impl FrameSource for ChannelSource {
    fn start(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn next_frame(&mut self) -> FrameRead {
        match self.frame_rx.recv_timeout(self.poll) {
            Ok(frame) => frame.into(),
            Err(RecvTimeoutError::Timeout) => FrameRead::failed(),
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("frame channel closed");
                self.running = false;
                FrameRead::failed()
            }
        }
    }
}

/// Blank frames paced at the context's frame rate, for demos and dry runs without a camera.
pub struct SyntheticSource {
    context: RuntimeContext,
    limit: Option<u64>,
    produced: u64,
    started_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(context: RuntimeContext) -> Self {
        Self {
            context,
            limit: None,
            produced: 0,
            started_at: None,
        }
    }

    /// Stops after `limit` frames.
    pub fn with_limit(self, limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..self
        }
    }
}

impl FrameSource for SyntheticSource {
    fn start(&mut self) -> Result<()> {
        log::info!(
            "synthetic source on {} at {}x{}, {} fps",
            self.context.device,
            self.context.resolution.0,
            self.context.resolution.1,
            self.context.fps
        );
        self.produced = 0;
        self.started_at = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) {
        self.started_at = None;
    }

    fn is_running(&self) -> bool {
        self.started_at.is_some() && self.limit.is_none_or(|limit| self.produced < limit)
    }

    fn next_frame(&mut self) -> FrameRead {
        let Some(started_at) = self.started_at else {
            return FrameRead::failed();
        };

        // Pace frames on the nominal clock rather than sleeping a fixed interval.
        let interval = self.context.frame_interval();
        let due = interval * self.produced as u32;
        if let Some(wait) = due.checked_sub(started_at.elapsed()) {
            thread::sleep(wait);
        }

        let (width, height) = self.context.resolution;
        self.produced += 1;
        Frame::empty(width, height, started_at.elapsed().as_secs_f64() * 1000.0).into()
    }
}
