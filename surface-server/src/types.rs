//! Shared data model types (spec §3).
//!
//! These are the plain value types that flow between components: detections,
//! areas, access levels, zone status. Nothing in this module does I/O.

use std::fmt;

/// Single-character camera identifier ('A', 'B', ...).
pub type CameraId = char;

/// Monotonic nanosecond frame timestamp, as sent by the edge workers.
pub type FrameId = u64;

/// Object id, unique across the server's lifetime per inference worker.
pub type ObjectId = u64;

/// One of the 8 fixed map zones.
pub type AreaId = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObjectClass {
    Bird,
    Fod,
    Animal,
    Person,
    Vehicle,
    WorkPerson,
    WorkVehicle,
    Airplane,
    Aircraft,
}

impl ObjectClass {
    #[must_use]
    pub fn is_hazard(self) -> bool {
        matches!(self, Self::Bird | Self::Fod | Self::Animal)
    }

    #[must_use]
    pub fn is_airborne(self) -> bool {
        matches!(self, Self::Airplane | Self::Aircraft)
    }

    #[must_use]
    pub fn is_authorized_worker(self) -> bool {
        matches!(self, Self::WorkPerson | Self::WorkVehicle)
    }

    #[must_use]
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Bird => "BIRD",
            Self::Fod => "FOD",
            Self::Animal => "ANIMAL",
            Self::Person => "PERSON",
            Self::Vehicle => "VEHICLE",
            Self::WorkPerson => "WORK_PERSON",
            Self::WorkVehicle => "WORK_VEHICLE",
            Self::Airplane => "AIRPLANE",
            Self::Aircraft => "AIRCRAFT",
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Pose {
    Stand,
    Fallen,
}

/// Authority level of a zone (spec §3 AccessCondition).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthorityLevel {
    Open = 1,
    AuthOnly = 2,
    NoEntry = 3,
}

impl AuthorityLevel {
    #[must_use]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Open),
            2 => Some(Self::AuthOnly),
            3 => Some(Self::NoEntry),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Event type attached to a detection before fan-out (spec §3, GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventType {
    Hazard = 1,
    Unauth = 2,
    Rescue = 3,
}

impl EventType {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Pixel-space bounding box, [x1, y1, x2, y2].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BBox {
    #[must_use]
    pub fn centroid(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// Raw detection as reported by the inference worker, before any
/// coordinate/access processing.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub object_id: ObjectId,
    pub class: ObjectClass,
    pub bbox: BBox,
    pub confidence: f64,
    pub pose: Option<Pose>,
}

/// Fields the pipeline fills in, in order: coords -> access -> zones.
#[derive(Debug, Clone)]
pub struct Detection {
    pub object_id: ObjectId,
    pub class: ObjectClass,
    pub bbox: BBox,
    pub confidence: f64,
    pub pose: Option<Pose>,
    pub camera_id: CameraId,
    pub frame_id: FrameId,
    /// Normalized coordinates in [0, 1]^2.
    pub normalized: (f64, f64),
    /// Logical map-plane coordinates (MAP_WIDTH x MAP_HEIGHT).
    pub map: (f64, f64),
    pub area_id: Option<AreaId>,
    pub event_type: Option<EventType>,
    /// Set for PERSON only: 1 if pose == fallen, else 0.
    pub rescue_level: Option<u8>,
}

impl Detection {
    /// Truncates `map` to integer coordinates for wire placement, per
    /// spec §4.3's "map_x/y are truncated to integer only when placed in
    /// wire messages" numeric-semantics note.
    #[must_use]
    pub fn map_xy_wire(&self) -> (i64, i64) {
        (self.map.0.trunc() as i64, self.map.1.trunc() as i64)
    }
}

/// Static, load-once map zone (spec §3 Area).
#[derive(Debug, Clone)]
pub struct Area {
    pub id: AreaId,
    pub name: String,
    pub rect: NormRect,
}

/// Normalized rectangle, x1,y1,x2,y2 each in [0, 1].
#[derive(Debug, Clone, Copy)]
pub struct NormRect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl NormRect {
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }
}

/// Zone run-state (spec §4.4). `Hazard` also carries no extra payload; the
/// clear-hysteresis deadline is owned by the timer wheel, not the state
/// itself, so a restart of the wheel can't desync from this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneStatus {
    Normal,
    Hazard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BirdRiskLevel {
    High,
    Medium,
    Low,
}

impl BirdRiskLevel {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    #[must_use]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::High),
            2 => Some(Self::Medium),
            3 => Some(Self::Low),
            _ => None,
        }
    }

    #[must_use]
    pub fn from_result_code(code: &str) -> Option<Self> {
        match code {
            "BR_HIGH" => Some(Self::High),
            "BR_MEDIUM" => Some(Self::Medium),
            "BR_LOW" => Some(Self::Low),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_response_code(self) -> &'static str {
        match self {
            Self::High => "BR_HIGH",
            Self::Medium => "BR_MEDIUM",
            Self::Low => "BR_LOW",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_centroid() {
        let b = BBox { x1: 400.0, y1: 300.0, x2: 440.0, y2: 340.0 };
        assert_eq!(b.centroid(), (420.0, 320.0));
    }

    #[test]
    fn authority_level_round_trips() {
        for v in 1..=3u8 {
            assert_eq!(AuthorityLevel::from_u8(v).unwrap().as_u8(), v);
        }
        assert!(AuthorityLevel::from_u8(0).is_none());
        assert!(AuthorityLevel::from_u8(4).is_none());
    }

    #[test]
    fn norm_rect_contains_boundary() {
        let r = NormRect { x1: 0.1, y1: 0.1, x2: 0.5, y2: 0.5 };
        assert!(r.contains(0.1, 0.1));
        assert!(r.contains(0.5, 0.5));
        assert!(!r.contains(0.09, 0.2));
    }
}
