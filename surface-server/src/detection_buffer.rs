//! Detection Buffer (spec §4.2): nearest-prior detection lookup between
//! 30 fps video and 5 fps inference results.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{CameraId, Detection, FrameId};

/// Thread-safe for concurrent readers + a single writer per camera (spec
/// §4.2).
#[derive(Clone)]
pub struct DetectionBuffer {
    window_ns: u64,
    by_camera: Arc<RwLock<HashMap<CameraId, BTreeMap<FrameId, Arc<Vec<Detection>>>>>>,
}

impl DetectionBuffer {
    #[must_use]
    pub fn new(window_ns: u64) -> Self {
        Self { window_ns, by_camera: Arc::new(RwLock::new(HashMap::new())) }
    }

    pub fn put(&self, camera_id: CameraId, frame_id: FrameId, detections: Vec<Detection>) {
        let mut by_camera = self.by_camera.write();
        let entries = by_camera.entry(camera_id).or_default();
        entries.insert(frame_id, Arc::new(detections));

        let cutoff = frame_id.saturating_sub(self.window_ns);
        let stale: Vec<FrameId> = entries.range(..cutoff).map(|(id, _)| *id).collect();
        for id in stale {
            entries.remove(&id);
        }
    }

    /// Exact match if present, else the largest frame-id strictly less
    /// than the query, provided it is within the window. Empty list when
    /// no prior exists.
    #[must_use]
    pub fn lookup(&self, camera_id: CameraId, frame_id: FrameId) -> Arc<Vec<Detection>> {
        let by_camera = self.by_camera.read();
        let Some(entries) = by_camera.get(&camera_id) else {
            return Arc::new(Vec::new());
        };

        if let Some(exact) = entries.get(&frame_id) {
            return exact.clone();
        }

        match entries.range(..frame_id).next_back() {
            Some((&prior_id, detections)) if frame_id - prior_id <= self.window_ns => {
                detections.clone()
            }
            _ => Arc::new(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BBox, ObjectClass};

    fn det(id: u64) -> Detection {
        Detection {
            object_id: id,
            class: ObjectClass::Fod,
            bbox: BBox { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0 },
            confidence: 0.9,
            pose: None,
            camera_id: 'A',
            frame_id: 0,
            normalized: (0.0, 0.0),
            map: (0.0, 0.0),
            area_id: None,
            event_type: None,
            rescue_level: None,
        }
    }

    #[test]
    fn exact_match_returned() {
        let buf = DetectionBuffer::new(200_000_000);
        buf.put('A', 1_000_000_000, vec![det(1)]);
        assert_eq!(buf.lookup('A', 1_000_000_000).len(), 1);
    }

    #[test]
    fn nearest_prior_within_window() {
        let buf = DetectionBuffer::new(200_000_000);
        buf.put('A', 1_000_000_000, vec![det(1)]);
        let got = buf.lookup('A', 1_000_000_000 + 150_000_000);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].object_id, 1);
    }

    #[test]
    fn empty_past_window_boundary() {
        let buf = DetectionBuffer::new(200_000_000);
        buf.put('A', 1_000_000_000, vec![det(1)]);

        assert_eq!(buf.lookup('A', 1_000_000_000 + 200_000_000).len(), 1);
        assert_eq!(buf.lookup('A', 1_000_000_000 + 200_000_001).len(), 0);
    }

    #[test]
    fn unknown_camera_returns_empty() {
        let buf = DetectionBuffer::new(200_000_000);
        assert_eq!(buf.lookup('Z', 1).len(), 0);
    }

    #[test]
    fn old_entries_trimmed_on_put() {
        let buf = DetectionBuffer::new(200_000_000);
        buf.put('A', 1_000_000_000, vec![det(1)]);
        buf.put('A', 1_000_000_000 + 300_000_000, vec![det(2)]);

        // The first entry is now more than the window behind the second
        // put and should have been trimmed.
        assert_eq!(buf.lookup('A', 1_000_000_000).len(), 0);
    }
}
