use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::Frame;

/// A frame as seen by the stages: shared, immutable, and tagged with its publish order.
#[derive(Clone, Debug)]
pub struct Published {
    /// 1 for the first published frame, strictly increasing afterwards.
    pub sequence: u64,
    pub frame: Arc<Frame>,
}

/// Holds the most recently published frame. Older frames are dropped as soon as no stage still
/// holds a snapshot of them.
#[derive(Debug, Default)]
pub struct FrameSlot {
    current: Mutex<Option<Published>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current frame and returns its sequence number.
    pub fn publish(&self, frame: Frame) -> u64 {
        let frame = Arc::new(frame);
        let mut current = self.current.lock();
        let sequence = current.as_ref().map_or(1, |p| p.sequence + 1);
        *current = Some(Published { sequence, frame });
        sequence
    }

    /// The current frame, if any has been published. Later publishes do not affect the snapshot.
    pub fn snapshot(&self) -> Option<Published> {
        self.current.lock().clone()
    }

    pub fn sequence(&self) -> u64 {
        self.current.lock().as_ref().map_or(0, |p| p.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_survives_publish() {
        let slot = FrameSlot::new();
        assert!(slot.snapshot().is_none());
        assert_eq!(slot.publish(Frame::empty(4, 4, 1.0)), 1);

        let held = slot.snapshot().unwrap();
        assert_eq!(slot.publish(Frame::empty(4, 4, 2.0)), 2);

        assert_eq!(held.sequence, 1);
        assert_eq!(held.frame.timestamp, 1.0);
        let latest = slot.snapshot().unwrap();
        assert_eq!(latest.sequence, 2);
        assert_eq!(latest.frame.timestamp, 2.0);
        assert_eq!(slot.sequence(), 2);
    }
}
