//! Event Fan-out (spec §4.6): per-client sessions for the controller and
//! pilot channels, ME_OD/ME_FD/ME_BR broadcast, and the at-most-once
//! `AlertedSet`.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::GenericImageView;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::frame_bus::FrameBus;
use crate::repository::{DetectionRecord, Repository};
use crate::types::{AreaId, Detection, EventType, ObjectId};
use crate::wire::controller_text;

/// Default outbound queue depth per session (spec §5: "bounded outbound
/// queue (default 256 messages)").
pub const SESSION_QUEUE_DEPTH: usize = 256;

/// Re-encode threshold: crops larger than this are dropped to quality 85
/// (spec §4.6).
const RE_ENCODE_THRESHOLD_BYTES: usize = 4 * 1024;

pub type SessionId = u64;

/// At-most-once guard for first-detection fan-out (spec §3 AlertedSet).
/// Single-writer (the pipeline worker); monotone non-decreasing within a
/// process.
#[derive(Clone, Default)]
pub struct AlertedSet {
    inner: Arc<Mutex<HashSet<ObjectId>>>,
}

impl AlertedSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds from persisted state at startup (SPEC_FULL §9 resolution of
    /// the restart open question).
    pub fn seed(&self, ids: impl IntoIterator<Item = ObjectId>) {
        self.inner.lock().extend(ids);
    }

    /// Returns `true` if `object_id` was not previously alerted (and is
    /// now recorded as alerted).
    pub fn insert_if_absent(&self, object_id: ObjectId) -> bool {
        self.inner.lock().insert(object_id)
    }

    #[must_use]
    pub fn contains(&self, object_id: ObjectId) -> bool {
        self.inner.lock().contains(&object_id)
    }
}

/// A registry of connected sessions on one TCP channel (controller or
/// pilot), each with its own bounded outbound queue and writer task.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    next_id: Arc<AtomicU64>,
    sessions: Arc<Mutex<HashMap<SessionId, mpsc::Sender<Bytes>>>>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn register(&self) -> (SessionId, mpsc::Receiver<Bytes>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
        self.sessions.lock().insert(id, tx);
        (id, rx)
    }

    pub fn remove(&self, id: SessionId) {
        self.sessions.lock().remove(&id);
    }

    /// Sends `bytes` to exactly one session (request/response replies, as
    /// opposed to `broadcast`'s fan-out). No-op if the session is gone.
    pub fn send_to(&self, id: SessionId, bytes: Bytes) {
        let tx = self.sessions.lock().get(&id).cloned();
        if let Some(tx) = tx {
            if let Err(err) = tx.try_send(bytes) {
                tracing::warn!(session_id = id, ?err, "failed to queue session reply");
            }
        }
    }

    /// Sends `bytes` to every registered session. A session whose queue is
    /// full has its writer considered blocked; per spec §7 ("Client write
    /// blocked ... close session if control") the sender is removed here
    /// rather than retried, and the writer task's own closed-channel
    /// detection finishes tearing the session down.
    pub fn broadcast(&self, bytes: Bytes) {
        let mut sessions = self.sessions.lock();
        sessions.retain(|_, tx| match tx.try_send(bytes.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("session outbound queue full; closing session");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cached first-detection detail, kept in memory so `MC_OD` (spec §4.8)
/// can answer without a round trip to the image directory or database.
#[derive(Clone)]
pub struct ObjectDetail {
    pub class: crate::types::ObjectClass,
    pub area_name: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub image: Vec<u8>,
}

pub struct FanOut {
    pub controller_sessions: SessionRegistry,
    pub pilot_sessions: SessionRegistry,
    pub alerted: AlertedSet,
    pub frame_bus: FrameBus,
    pub repository: Arc<dyn Repository>,
    pub area_names: HashMap<AreaId, String>,
    pub image_dir: std::path::PathBuf,
    pub object_details: Mutex<HashMap<ObjectId, ObjectDetail>>,
    /// Latest bird-risk level observed, for the pilot channel's `BR_INQ`
    /// query (spec §4.8 item 4); seeded at startup from the repository.
    pub bird_risk: Mutex<Option<u8>>,
}

impl FanOut {
    /// Runs one Access-Controller tick's worth of already-filtered
    /// detections through ME_OD (always) and ME_FD (first sighting only).
    /// Ordering per spec §5: ME_OD for the tick precedes ME_FD for any
    /// object-id newly added in that tick.
    pub async fn handle_tick(&self, detections: &[Detection]) {
        if detections.is_empty() {
            return;
        }

        let area_name = |id: AreaId| {
            self.area_names.get(&id).cloned().unwrap_or_else(|| "UNKNOWN".to_string())
        };
        let od_line = controller_text::object_detected_line(detections, area_name);
        self.controller_sessions.broadcast(Bytes::from(od_line));

        for detection in detections {
            if self.alerted.contains(detection.object_id) {
                continue;
            }
            self.emit_first_detection(detection).await;
        }
    }

    async fn emit_first_detection(&self, detection: &Detection) {
        let image_bytes = self.crop_and_encode(detection);

        let is_new = self.alerted.insert_if_absent(detection.object_id);
        if !is_new {
            return; // another tick beat us to it; at-most-once guard.
        }

        let now = chrono::Utc::now();
        let image_path = match &image_bytes {
            Some(bytes) => self.write_image(detection.object_id, now, bytes),
            None => None,
        };

        let event_type = detection.event_type.unwrap_or(EventType::Unauth);
        let record = DetectionRecord {
            object_id: detection.object_id,
            event_type: event_type.as_u8(),
            class: detection.class,
            area_id: detection.area_id,
            map_x: detection.map_xy_wire().0,
            map_y: detection.map_xy_wire().1,
            timestamp: now,
            image_path,
        };

        if let Err(err) = self.repository.save_first_detection(record).await {
            tracing::error!(?err, object_id = detection.object_id, "failed to persist first detection");
            // Still emit ME_FD per spec §7: "record lost, image still
            // written" is the DB-failure policy; the inverse (DB ok,
            // image missing) is handled in crop_and_encode/write_image.
        }

        let Some(image_bytes) = image_bytes else {
            tracing::warn!(object_id = detection.object_id, "skipping ME_FD: image crop/encode failed");
            return;
        };

        let area_name = detection
            .area_id
            .and_then(|id| self.area_names.get(&id).cloned())
            .unwrap_or_else(|| "UNKNOWN".to_string());

        let header = controller_text::first_detection_header(
            detection,
            event_type,
            &area_name,
            &now.to_rfc3339(),
            image_bytes.len(),
        );

        let mut frame = Vec::with_capacity(5 + header.len() + 1 + image_bytes.len());
        frame.extend_from_slice(b"ME_FD:");
        frame.extend_from_slice(header.as_bytes());
        frame.push(b',');
        frame.extend_from_slice(&image_bytes);

        self.controller_sessions.broadcast(Bytes::from(frame));

        self.object_details.lock().insert(
            detection.object_id,
            ObjectDetail {
                class: detection.class,
                area_name,
                timestamp: now,
                image: image_bytes,
            },
        );
    }

    /// Looks up the cached first-detection detail for `MC_OD` (spec §4.8).
    #[must_use]
    pub fn object_detail(&self, object_id: ObjectId) -> Option<ObjectDetail> {
        self.object_details.lock().get(&object_id).cloned()
    }

    /// Crops the detection's bbox out of its owning frame and re-encodes
    /// as JPEG. Returns `None` on any crop/decode/encode failure (spec §7:
    /// logged internally only, ME_FD is skipped, persistence continues
    /// with an empty path).
    fn crop_and_encode(&self, detection: &Detection) -> Option<Vec<u8>> {
        let frame = self.frame_bus.get(detection.camera_id, detection.frame_id)?;
        let decoded = image::load_from_memory(&frame.jpeg)
            .map_err(|err| tracing::warn!(?err, "failed to decode source frame for crop"))
            .ok()?;

        let (fw, fh) = decoded.dimensions();
        let x1 = detection.bbox.x1.clamp(0.0, f64::from(fw)) as u32;
        let y1 = detection.bbox.y1.clamp(0.0, f64::from(fh)) as u32;
        let x2 = detection.bbox.x2.clamp(0.0, f64::from(fw)) as u32;
        let y2 = detection.bbox.y2.clamp(0.0, f64::from(fh)) as u32;
        let (w, h) = (x2.saturating_sub(x1).max(1), y2.saturating_sub(y1).max(1));

        let cropped = decoded.crop_imm(x1, y1, w, h);

        let encode = |quality: u8| -> Option<Vec<u8>> {
            let mut buf = Vec::new();
            let mut cursor = Cursor::new(&mut buf);
            JpegEncoder::new_with_quality(&mut cursor, quality)
                .encode_image(&cropped)
                .ok()?;
            Some(buf)
        };

        let default = encode(95)?;
        if default.len() > RE_ENCODE_THRESHOLD_BYTES {
            encode(85).or(Some(default))
        } else {
            Some(default)
        }
    }

    /// Writes the crop to `{object_id}_{YYYYMMDDHHMMSS}.jpg` under
    /// `image_dir`. On I/O failure, logs and returns `None` so the caller
    /// still persists the DB record with an empty path (spec §4.7).
    fn write_image(
        &self,
        object_id: ObjectId,
        timestamp: chrono::DateTime<chrono::Utc>,
        bytes: &[u8],
    ) -> Option<String> {
        let filename = format!("img_{object_id}_{}.jpg", timestamp.format("%Y%m%d%H%M%S"));
        let path = self.image_dir.join(&filename);
        match std::fs::write(&path, bytes) {
            Ok(()) => Some(filename),
            Err(err) => {
                tracing::error!(?err, object_id, "failed to write first-detection image");
                None
            }
        }
    }

    pub fn broadcast_bird_risk(&self, level: u8) {
        *self.bird_risk.lock() = Some(level);
        let msg = Bytes::from(controller_text::bird_risk(level));
        self.controller_sessions.broadcast(msg.clone());
        self.pilot_sessions.broadcast(msg);
    }

    #[must_use]
    pub fn latest_bird_risk(&self) -> Option<u8> {
        *self.bird_risk.lock()
    }

    pub fn broadcast_zone_transition(&self, area_id: AreaId, hazard: bool) {
        let msg = Bytes::from(controller_text::zone_status(area_id, hazard));
        self.controller_sessions.broadcast(msg.clone());
        self.pilot_sessions.broadcast(msg);
    }

    pub fn broadcast_map_calibrated(&self) {
        self.controller_sessions.broadcast(Bytes::from(controller_text::map_calibrated()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::MemoryRepository;
    use crate::types::{BBox, ObjectClass};

    fn fanout() -> FanOut {
        FanOut {
            controller_sessions: SessionRegistry::new(),
            pilot_sessions: SessionRegistry::new(),
            alerted: AlertedSet::new(),
            frame_bus: FrameBus::new(60, std::time::Duration::from_secs(2)),
            repository: Arc::new(MemoryRepository::default()),
            area_names: HashMap::from([(1, "TWY_A".to_string())]),
            image_dir: std::env::temp_dir(),
            object_details: Mutex::new(HashMap::new()),
            bird_risk: Mutex::new(None),
        }
    }

    fn det(id: ObjectId) -> Detection {
        Detection {
            object_id: id,
            class: ObjectClass::Fod,
            bbox: BBox { x1: 0.0, y1: 0.0, x2: 10.0, y2: 10.0 },
            confidence: 0.9,
            pose: None,
            camera_id: 'A',
            frame_id: 1,
            normalized: (0.2, 0.4),
            map: (422.0, 345.0),
            area_id: Some(1),
            event_type: Some(EventType::Hazard),
            rescue_level: None,
        }
    }

    #[tokio::test]
    async fn second_sighting_does_not_re_alert() {
        let f = fanout();
        let (_id, mut rx) = f.controller_sessions.register();

        f.handle_tick(&[det(1001)]).await;
        let _od = rx.recv().await.unwrap(); // ME_OD

        // Without a frame in the bus, crop fails, so no ME_FD is sent,
        // but the AlertedSet is still marked (spec: persistence still
        // happens with an empty path even when the image is missing).
        assert!(f.alerted.contains(1001));

        f.handle_tick(&[det(1001)]).await;
        let second_od = rx.recv().await.unwrap();
        assert!(second_od.starts_with(b"ME_OD:"));
        // No further messages queued (no repeat ME_FD).
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn alerted_set_is_at_most_once() {
        let alerted = AlertedSet::new();
        assert!(alerted.insert_if_absent(1));
        assert!(!alerted.insert_if_absent(1));
    }

    #[test]
    fn alerted_set_seeds_from_iterator() {
        let alerted = AlertedSet::new();
        alerted.seed([1, 2, 3]);
        assert!(alerted.contains(2));
        assert!(!alerted.insert_if_absent(2));
    }

    #[test]
    fn broadcast_drops_full_sessions() {
        let registry = SessionRegistry::new();
        let (_id, mut rx) = registry.register();
        drop(rx.try_recv()); // no-op, queue empty

        for _ in 0..SESSION_QUEUE_DEPTH {
            registry.broadcast(Bytes::from_static(b"x"));
        }
        assert_eq!(registry.len(), 1);

        registry.broadcast(Bytes::from_static(b"overflow"));
        assert_eq!(registry.len(), 0);

        // Drain silences "unused" lints on rx in some configurations.
        while rx.try_recv().is_ok() {}
    }
}
