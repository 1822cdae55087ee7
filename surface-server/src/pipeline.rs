//! Wires Coordinate Transformer -> Access Controller -> Zone State Engine
//! -> Event Fan-out into the single pipeline worker named in spec §5
//! ("one pipeline worker that drains a single detection-event channel").

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::access::{self, AccessCache};
use crate::coords::{CalibrationStore, Transformer};
use crate::detection_buffer::DetectionBuffer;
use crate::fanout::FanOut;
use crate::types::{CameraId, FrameId, RawDetection, ZoneStatus};
use crate::zones::{ZoneEngine, ZoneStatusBoard};

/// Bounded capacity 1024, per spec §5.
pub const PIPELINE_CHANNEL_CAPACITY: usize = 1024;

pub struct DetectionTick {
    pub camera_id: CameraId,
    pub frame_id: FrameId,
    pub frame_w: f64,
    pub frame_h: f64,
    pub detections: Vec<RawDetection>,
}

pub struct Pipeline {
    pub transformer: Transformer,
    pub calibrations: CalibrationStore,
    pub access_cache: AccessCache,
    pub zone_engine: ZoneEngine,
    pub detection_buffer: DetectionBuffer,
    pub fanout: Arc<FanOut>,
    pub zone_board: ZoneStatusBoard,
}

impl Pipeline {
    /// Spawns the pipeline worker task. Returns the sender inference
    /// handlers push ticks onto once the server is Operating (spec
    /// §4.8's state machine gate), plus a read-only zone-status board for
    /// the pilot channel's runway queries.
    pub fn spawn(
        transformer: Transformer,
        calibrations: CalibrationStore,
        access_cache: AccessCache,
        area_ids: &[crate::types::AreaId],
        hazard_clear: Duration,
        detection_buffer: DetectionBuffer,
        fanout: Arc<FanOut>,
    ) -> (mpsc::Sender<DetectionTick>, ZoneStatusBoard) {
        let (zone_engine, mut zone_transitions) = ZoneEngine::new(area_ids, hazard_clear);
        let zone_board = ZoneStatusBoard::new(area_ids);
        let mut pipeline = Self {
            transformer,
            calibrations,
            access_cache,
            zone_engine,
            detection_buffer,
            fanout,
            zone_board: zone_board.clone(),
        };

        let (tx, mut rx) = mpsc::channel(PIPELINE_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut next_deadline: Option<Instant> = None;
            loop {
                let sleep = async {
                    match next_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                };

                tokio::select! {
                    biased;

                    Some(tick) = rx.recv() => {
                        pipeline.process_tick(tick, &mut zone_transitions).await;
                        next_deadline = pipeline.zone_engine.advance(Instant::now());
                        Self::drain_transitions(&pipeline, &mut zone_transitions);
                    }

                    () = sleep => {
                        next_deadline = pipeline.zone_engine.advance(Instant::now());
                        Self::drain_transitions(&pipeline, &mut zone_transitions);
                    }

                    else => break,
                }
            }
        });

        (tx, zone_board)
    }

    fn drain_transitions(
        pipeline: &Pipeline,
        rx: &mut mpsc::UnboundedReceiver<crate::zones::ZoneTransition>,
    ) {
        while let Ok(t) = rx.try_recv() {
            pipeline.zone_board.set(t.area_id, t.status);
            pipeline.fanout.broadcast_zone_transition(t.area_id, t.status == ZoneStatus::Hazard);
        }
    }

    async fn process_tick(
        &mut self,
        tick: DetectionTick,
        zone_transitions: &mut mpsc::UnboundedReceiver<crate::zones::ZoneTransition>,
    ) {
        let calibration = self.calibrations.get(tick.camera_id);

        let mut detections: Vec<crate::types::Detection> = tick
            .detections
            .into_iter()
            .map(|raw| {
                let transformed =
                    self.transformer.transform(calibration.as_ref(), &raw.bbox, tick.frame_w, tick.frame_h);
                crate::types::Detection {
                    object_id: raw.object_id,
                    class: raw.class,
                    bbox: raw.bbox,
                    confidence: raw.confidence,
                    pose: raw.pose,
                    camera_id: tick.camera_id,
                    frame_id: tick.frame_id,
                    normalized: transformed.normalized,
                    map: transformed.map,
                    area_id: transformed.area_id,
                    event_type: None,
                    rescue_level: None,
                }
            })
            .collect();

        detections = access::filter(detections, &self.access_cache);

        self.detection_buffer.put(tick.camera_id, tick.frame_id, detections.clone());

        // Zone transitions must be flushed before this tick's ME_OD/ME_FD
        // (spec §5 ordering guarantee), so update the engine and drain its
        // channel before handing off to fan-out.
        let now = Instant::now();
        for detection in &detections {
            if let Some(area_id) = detection.area_id {
                self.zone_engine.on_qualifying_detection(area_id, now);
            }
        }
        Self::drain_transitions(self, zone_transitions);

        self.fanout.handle_tick(&detections).await;
    }
}
