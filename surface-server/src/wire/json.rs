//! JSON-line shapes for the inference, bird-risk, and pilot channels
//! (spec §6). Per spec §9's design note, inbound messages are modeled as
//! a single tagged sum type rather than dynamic dictionaries.

use serde::{Deserialize, Serialize};

use crate::types::{BBox, CameraId, ObjectClass, ObjectId, Pose};

#[derive(Debug, Clone, Deserialize)]
pub struct RawDetectionWire {
    pub object_id: ObjectId,
    pub class: ObjectClass,
    pub bbox: [f64; 4],
    pub confidence: f64,
    #[serde(default)]
    pub pose: Option<Pose>,
}

impl RawDetectionWire {
    #[must_use]
    pub fn bbox(&self) -> BBox {
        BBox { x1: self.bbox[0], y1: self.bbox[1], x2: self.bbox[2], y2: self.bbox[3] }
    }
}

/// Inbound messages on the inference channel (spec §4.8 item 1).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InferenceInbound {
    #[serde(rename = "event")]
    Event(InferenceEvent),
    #[serde(rename = "response")]
    Response(InferenceResponse),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event")]
pub enum InferenceEvent {
    #[serde(rename = "object_detected")]
    ObjectDetected {
        camera_id: CameraId,
        img_id: u64,
        detections: Vec<RawDetectionWire>,
    },
    #[serde(rename = "marker_detected")]
    MarkerDetected {
        camera_id: CameraId,
        #[serde(default)]
        markers: Vec<serde_json::Value>,
    },
    #[serde(rename = "map_calibration")]
    MapCalibration {
        camera_id: CameraId,
        matrix: [[f64; 3]; 3],
        scale: f64,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceResponse {
    pub command: String,
    pub result: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename = "command")]
pub struct SetModeObjectCommand {
    pub command: &'static str,
}

impl Default for SetModeObjectCommand {
    fn default() -> Self {
        Self { command: "set_mode_object" }
    }
}

/// Bird-risk channel inbound event (spec §4.8 item 2).
#[derive(Debug, Clone, Deserialize)]
pub struct BirdRiskChanged {
    #[serde(rename = "type")]
    pub kind: String,
    pub event: String,
    pub result: String,
}

/// Pilot channel command in (spec §6 TCP pilot protocol).
#[derive(Debug, Clone, Deserialize)]
pub struct PilotCommand {
    #[serde(rename = "type")]
    pub kind: String,
    pub command: String,
    pub request_code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PilotResponse {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub status: &'static str,
    pub request_code: String,
    pub response_code: String,
}

impl PilotResponse {
    #[must_use]
    pub fn success(request_code: String, response_code: String) -> Self {
        Self { kind: "response", status: "success", request_code, response_code }
    }

    /// Error form (spec §5/§7): a request that was malformed, unrecognized,
    /// or timed out in handling. `request_code` is best-effort — empty if
    /// the line never parsed far enough to recover one.
    #[must_use]
    pub fn error(request_code: String) -> Self {
        Self { kind: "response", status: "error", request_code, response_code: String::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_object_detected_event() {
        let json = r#"{
            "type": "event",
            "event": "object_detected",
            "camera_id": "A",
            "img_id": 1700000000000000000,
            "detections": [
                {"object_id": 1001, "class": "FOD", "bbox": [400,300,440,340], "confidence": 0.92}
            ]
        }"#;
        let parsed: InferenceInbound = serde_json::from_str(json).unwrap();
        match parsed {
            InferenceInbound::Event(InferenceEvent::ObjectDetected { camera_id, detections, .. }) => {
                assert_eq!(camera_id, 'A');
                assert_eq!(detections.len(), 1);
                assert_eq!(detections[0].class, ObjectClass::Fod);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn parses_map_calibration_event() {
        let json = r#"{
            "type": "event",
            "event": "map_calibration",
            "camera_id": "B",
            "matrix": [[1,0,0],[0,1,0],[0,0,1]],
            "scale": 1.0
        }"#;
        let parsed: InferenceInbound = serde_json::from_str(json).unwrap();
        assert!(matches!(
            parsed,
            InferenceInbound::Event(InferenceEvent::MapCalibration { camera_id: 'B', .. })
        ));
    }

    #[test]
    fn parses_response() {
        let json = r#"{"type":"response","command":"set_mode_object","result":"ok"}"#;
        let parsed: InferenceInbound = serde_json::from_str(json).unwrap();
        assert!(matches!(parsed, InferenceInbound::Response(r) if r.result == "ok"));
    }

    #[test]
    fn parses_pilot_query() {
        let json = r#"{"type":"command","command":"query_information","request_code":"BR_INQ"}"#;
        let parsed: PilotCommand = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.request_code, "BR_INQ");
    }

    #[test]
    fn serializes_pilot_response() {
        let resp = PilotResponse::success("BR_INQ".into(), "BR_MEDIUM".into());
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"status\":\"success\""));
        assert!(json.contains("\"response_code\":\"BR_MEDIUM\""));
    }
}
