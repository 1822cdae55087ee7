//! Inference channel handler (spec §4.8 item 1, lifecycle state machine).

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::coords::{Calibration, CalibrationStore};
use crate::fanout::FanOut;
use crate::frame_bus::FrameBus;
use crate::pipeline::DetectionTick;
use crate::types::{CameraId, RawDetection};
use crate::wire::json::{InferenceEvent, InferenceInbound, SetModeObjectCommand};

use super::InferenceState;

pub struct InferenceChannel {
    pub calibrations: CalibrationStore,
    pub expected_cameras: Vec<CameraId>,
    pub frame_bus: FrameBus,
    pub pipeline_tx: mpsc::Sender<DetectionTick>,
    pub fanout: Arc<FanOut>,
    pub default_frame_size: (f64, f64),
}

#[tracing::instrument(skip(stream, channel))]
pub async fn run(stream: TcpStream, channel: InferenceChannel) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let mut state = InferenceState::Connected;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let inbound: InferenceInbound = match serde_json::from_str(&line) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(?err, "malformed inference channel message");
                continue;
            }
        };

        match inbound {
            InferenceInbound::Event(InferenceEvent::MapCalibration { camera_id, matrix, scale }) => {
                handle_calibration(&channel, &mut state, camera_id, matrix, scale, &mut write_half).await;
            }
            InferenceInbound::Event(InferenceEvent::ObjectDetected { camera_id, img_id, detections }) => {
                if state == InferenceState::Operating {
                    handle_object_detected(&channel, camera_id, img_id, detections).await;
                } else {
                    tracing::debug!("ignoring object_detected: not yet Operating");
                }
            }
            InferenceInbound::Event(InferenceEvent::MarkerDetected { .. }) => {
                // Ignored at steady state (spec §4.8 item 1).
            }
            InferenceInbound::Response(resp) if resp.command == "set_mode_object" => {
                if resp.result == "ok" {
                    state = InferenceState::Operating;
                    channel.fanout.broadcast_map_calibrated();
                } else {
                    tracing::warn!("set_mode_object rejected by inference worker");
                }
            }
            InferenceInbound::Response(_) => {}
        }
    }

    // Disconnect drops the server back to Calibrating (spec §4.8, §4.10,
    // §7): no message to clients, pipeline stops accepting this worker's
    // events because the connection (and thus this task) is gone.
    tracing::info!("inference worker disconnected; state reset");
}

async fn handle_calibration(
    channel: &InferenceChannel,
    state: &mut InferenceState,
    camera_id: CameraId,
    matrix: [[f64; 3]; 3],
    scale: f64,
    write_half: &mut tokio::net::tcp::OwnedWriteHalf,
) {
    let homography = nalgebra::Matrix3::new(
        matrix[0][0], matrix[0][1], matrix[0][2],
        matrix[1][0], matrix[1][1], matrix[1][2],
        matrix[2][0], matrix[2][1], matrix[2][2],
    );

    match Calibration::try_new(homography, scale, crate::frame_bus::now_ns()) {
        Some(cal) => channel.calibrations.set(camera_id, Some(cal)),
        None => {
            tracing::warn!(camera_id = %camera_id, "singular calibration matrix; falling back to identity");
            channel.calibrations.set(camera_id, None);
        }
    }

    *state = match *state {
        InferenceState::Connected => InferenceState::CalibratingA,
        InferenceState::CalibratingA => InferenceState::CalibratingB,
        other => other,
    };

    if channel.calibrations.all_calibrated(&channel.expected_cameras) {
        let command = SetModeObjectCommand::default();
        if let Ok(json) = serde_json::to_string(&command) {
            let mut line = json;
            line.push('\n');
            if let Err(err) = write_half.write_all(line.as_bytes()).await {
                tracing::error!(?err, "failed to send set_mode_object");
            }
        }
        // State becomes Operating only once the worker acks (handled in
        // the main read loop), per spec §4.8.
    }
}

async fn handle_object_detected(
    channel: &InferenceChannel,
    camera_id: CameraId,
    img_id: u64,
    detections: Vec<crate::wire::json::RawDetectionWire>,
) {
    let (frame_w, frame_h) = channel
        .frame_bus
        .get(camera_id, img_id)
        .and_then(|frame| image::load_from_memory(&frame.jpeg).ok())
        .map(|img| {
            use image::GenericImageView;
            let (w, h) = img.dimensions();
            (f64::from(w), f64::from(h))
        })
        .unwrap_or(channel.default_frame_size);

    let raw: Vec<RawDetection> = detections
        .into_iter()
        .map(|d| RawDetection {
            object_id: d.object_id,
            class: d.class,
            bbox: d.bbox(),
            confidence: d.confidence,
            pose: d.pose,
        })
        .collect();

    let tick = DetectionTick { camera_id, frame_id: img_id, frame_w, frame_h, detections: raw };
    if channel.pipeline_tx.send(tick).await.is_err() {
        tracing::error!("pipeline channel closed; dropping detection tick");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_advances_through_calibration_states() {
        let mut state = InferenceState::Connected;
        state = match state {
            InferenceState::Connected => InferenceState::CalibratingA,
            other => other,
        };
        assert_eq!(state, InferenceState::CalibratingA);
        state = match state {
            InferenceState::CalibratingA => InferenceState::CalibratingB,
            other => other,
        };
        assert_eq!(state, InferenceState::CalibratingB);
    }
}
