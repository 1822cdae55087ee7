//! Frame Bus (spec §4.1): per-camera ring buffer of JPEG frames, indexed
//! by frame-id, with a 2 s age cap.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::types::{CameraId, FrameId};

/// Per-session video-relay backlog (spec §4.9: "if the send queue for a
/// session exceeds 5 pending datagrams, drop the oldest before
/// enqueueing"). `broadcast`'s lagging-receiver semantics give exactly
/// this behaviour: a slow subscriber silently skips ahead to the newest
/// frame rather than blocking the publisher.
pub const VIDEO_RELAY_QUEUE_DEPTH: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed udp frame header")]
    MalformedHeader,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub camera_id: CameraId,
    pub frame_id: FrameId,
    pub jpeg: Bytes,
}

struct CameraRing {
    capacity: usize,
    frames: BTreeMap<FrameId, Bytes>,
}

impl CameraRing {
    fn new(capacity: usize) -> Self {
        Self { capacity, frames: BTreeMap::new() }
    }

    fn insert(&mut self, frame_id: FrameId, jpeg: Bytes) {
        self.frames.insert(frame_id, jpeg);
        while self.frames.len() > self.capacity {
            let oldest = *self.frames.keys().next().expect("non-empty");
            self.frames.remove(&oldest);
        }
    }

    fn age_out(&mut self, cutoff_frame_id: FrameId) {
        let stale: Vec<FrameId> = self
            .frames
            .range(..=cutoff_frame_id)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            self.frames.remove(&id);
        }
    }
}

/// Shared, thread-safe frame store. Single writer per camera (the UDP
/// reader task), multiple readers (video relay, pipeline cropping) per
/// spec §5's ownership table.
#[derive(Clone)]
pub struct FrameBus {
    capacity: usize,
    age_cap: Duration,
    rings: Arc<RwLock<HashMap<CameraId, CameraRing>>>,
    malformed_count: Arc<std::sync::atomic::AtomicU64>,
    relay: Arc<RwLock<HashMap<CameraId, broadcast::Sender<Frame>>>>,
}

impl FrameBus {
    #[must_use]
    pub fn new(capacity: usize, age_cap: Duration) -> Self {
        Self {
            capacity,
            age_cap,
            rings: Arc::new(RwLock::new(HashMap::new())),
            malformed_count: Arc::new(std::sync::atomic::AtomicU64::new(0)),
            relay: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subscribes to new frames arriving for `camera_id`, for the Video
    /// Relay (spec §4.9). Lazily creates the per-camera broadcast channel.
    pub fn subscribe(&self, camera_id: CameraId) -> broadcast::Receiver<Frame> {
        self.relay
            .write()
            .entry(camera_id)
            .or_insert_with(|| broadcast::channel(VIDEO_RELAY_QUEUE_DEPTH).0)
            .subscribe()
    }

    /// Parses `{camera_id}:{frame_id}:{jpeg_bytes}` and inserts it.
    /// Malformed datagrams are dropped with a counter bump; no error
    /// propagates (spec §4.1 Failure).
    pub fn ingest_datagram(&self, datagram: &[u8]) {
        match parse_frame_header(datagram) {
            Some((camera_id, frame_id, payload)) => {
                self.put(camera_id, frame_id, Bytes::copy_from_slice(payload));
            }
            None => {
                self.malformed_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                tracing::warn!("dropped malformed udp frame header");
            }
        }
    }

    pub fn put(&self, camera_id: CameraId, frame_id: FrameId, jpeg: Bytes) {
        {
            let mut rings = self.rings.write();
            rings
                .entry(camera_id)
                .or_insert_with(|| CameraRing::new(self.capacity))
                .insert(frame_id, jpeg.clone());
        }

        if let Some(tx) = self.relay.read().get(&camera_id) {
            // No receivers is a normal, frequent case (no subscribed
            // controller session); ignore the send error.
            let _ = tx.send(Frame { camera_id, frame_id, jpeg });
        }
    }

    #[must_use]
    pub fn latest(&self, camera_id: CameraId) -> Option<Frame> {
        let rings = self.rings.read();
        let ring = rings.get(&camera_id)?;
        let (&frame_id, jpeg) = ring.frames.iter().next_back()?;
        Some(Frame { camera_id, frame_id, jpeg: jpeg.clone() })
    }

    #[must_use]
    pub fn get(&self, camera_id: CameraId, frame_id: FrameId) -> Option<Frame> {
        let rings = self.rings.read();
        let ring = rings.get(&camera_id)?;
        let jpeg = ring.frames.get(&frame_id)?;
        Some(Frame { camera_id, frame_id, jpeg: jpeg.clone() })
    }

    /// Evicts frames at least `self.age_cap` old, relative to `now_ns`.
    /// `cutoff` is `now_ns - age_cap`; frame-ids at or below it are dropped
    /// (an exactly-2s-old frame is evicted, per spec).
    pub fn age_out(&self, now_ns: u64) {
        let cutoff = now_ns.saturating_sub(self.age_cap.as_nanos() as u64);
        let mut rings = self.rings.write();
        for ring in rings.values_mut() {
            ring.age_out(cutoff);
        }
    }
}

/// Current wall-clock time as a nanosecond frame-id, for `age_out` callers
/// that don't already have a frame-id in hand.
#[must_use]
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

fn parse_frame_header(datagram: &[u8]) -> Option<(CameraId, FrameId, &[u8])> {
    let first_colon = datagram.iter().position(|&b| b == b':')?;
    let rest = &datagram[first_colon + 1..];
    let second_colon = rest.iter().position(|&b| b == b':')?;

    let camera_id = datagram[..first_colon].first().copied()? as char;
    if first_colon != 1 {
        return None;
    }
    let frame_id_str = std::str::from_utf8(&rest[..second_colon]).ok()?;
    let frame_id = frame_id_str.parse::<FrameId>().ok()?;
    let payload = &rest[second_colon + 1..];

    Some((camera_id, frame_id, payload))
}
