use crate::error::RingBufferError;
use crate::frame::FrameRecord;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// Bounded in-memory history of recent frames. A single producer (the
/// capture pipeline) appends; any number of readers (the control server, the
/// MJPEG server, auto-save) take chronological snapshots. Every operation
/// holds the internal lock for exactly as long as it takes to push one frame
/// or clone one slice — never across a capture or a disk write.
pub struct Ring {
    capacity: usize,
    frames: Mutex<VecDeque<FrameRecord>>,
}

impl Ring {
    /// Construct a ring with a fixed capacity. See [`crate::capacity`] for
    /// how that capacity is derived at startup.
    pub fn new(capacity: usize) -> Result<Self, RingBufferError> {
        if capacity == 0 {
            return Err(RingBufferError::ZeroCapacity);
        }
        Ok(Self {
            capacity,
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a frame, evicting the oldest when full. O(1).
    pub fn append(&self, record: FrameRecord) {
        let mut frames = self.frames.lock();
        if frames.len() == self.capacity {
            frames.pop_front();
        }
        trace!(frame_id = record.frame_id, "appended frame to ring");
        frames.push_back(record);
    }

    /// The most recently appended frame, if any.
    pub fn latest(&self) -> Option<FrameRecord> {
        self.frames.lock().back().cloned()
    }

    /// The most recent `n` frames, oldest first.
    pub fn last(&self, n: usize) -> Vec<FrameRecord> {
        let frames = self.frames.lock();
        let skip = frames.len().saturating_sub(n);
        frames.iter().skip(skip).cloned().collect()
    }

    /// The most recent `seconds * fps` frames (rounded down), oldest first.
    pub fn last_seconds(&self, seconds: f64, fps: f64) -> Vec<FrameRecord> {
        let n = (seconds * fps).floor().max(0.0) as usize;
        self.last(n)
    }

    /// Current number of frames held (≤ capacity).
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::RgbImage;

    fn frame(id: u64) -> FrameRecord {
        FrameRecord::new(id, id as f64, 0.0, false, RgbImage::black(1, 1))
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(Ring::new(0).is_err());
    }

    #[test]
    fn fifo_eviction_keeps_most_recent() {
        let ring = Ring::new(3).unwrap();
        for i in 0..5 {
            ring.append(frame(i));
        }
        let ids: Vec<u64> = ring.last(10).iter().map(|f| f.frame_id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn monotonic_frame_ids_preserved_in_order() {
        let ring = Ring::new(10).unwrap();
        for i in 0..10 {
            ring.append(frame(i));
        }
        let ids: Vec<u64> = ring.last(10).iter().map(|f| f.frame_id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn latest_reflects_most_recent_append() {
        let ring = Ring::new(5).unwrap();
        assert!(ring.latest().is_none());
        ring.append(frame(1));
        ring.append(frame(2));
        assert_eq!(ring.latest().unwrap().frame_id, 2);
    }

    #[test]
    fn last_seconds_uses_floor_of_seconds_times_fps() {
        let ring = Ring::new(100).unwrap();
        for i in 0..20 {
            ring.append(frame(i));
        }
        // 2.9s * 10fps = 29 -> floor 29, but only 20 present, so all 20.
        let frames = ring.last_seconds(2.9, 10.0);
        assert_eq!(frames.len(), 20);

        let frames = ring.last_seconds(1.0, 5.0);
        assert_eq!(frames.len(), 5);
        assert_eq!(frames.last().unwrap().frame_id, 19);
    }

    #[test]
    fn capacity_plus_k_appends_keeps_capacity_frames() {
        let ring = Ring::new(4).unwrap();
        for i in 0..(4 + 7) {
            ring.append(frame(i));
        }
        assert_eq!(ring.len(), 4);
        let ids: Vec<u64> = ring.last(4).iter().map(|f| f.frame_id).collect();
        assert_eq!(ids, vec![7, 8, 9, 10]);
    }
}
