//! Coordinate Transformer (spec §4.3): pixel bbox -> world (via homography)
//! -> normalized -> map/zone coordinates.

use std::collections::HashMap;
use std::sync::Arc;

use nalgebra::{Matrix3, Vector3};
use parking_lot::RwLock;

use crate::types::{Area, AreaId, BBox, CameraId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no calibration for camera {0}")]
    NoCalibration(CameraId),
}

/// Per-camera calibration record (spec §3 CalibrationRecord).
#[derive(Debug, Clone)]
pub struct Calibration {
    pub homography: Matrix3<f64>,
    pub scale: f64,
    pub received_at_ns: u64,
}

impl Calibration {
    /// `None` if the matrix is (numerically) singular; callers fall back
    /// to the identity pixel/frame_size transform for that camera
    /// (spec §7 "Calibration matrix singular").
    #[must_use]
    pub fn try_new(homography: Matrix3<f64>, scale: f64, received_at_ns: u64) -> Option<Self> {
        if homography.try_inverse().is_none() {
            return None;
        }
        Some(Self { homography, scale, received_at_ns })
    }
}

/// Writer = dispatcher (on `map_calibration`), readers = pipeline; rare
/// writes, so an `RwLock` suffices (spec §5).
///
/// A camera that sent a singular matrix is recorded as `None`: it still
/// counts towards `all_calibrated` (so the lifecycle can reach
/// `Operating`), but `get` reports no calibration, so `Transformer::transform`
/// keeps using its pixel/frame_size fallback for that camera (spec §7).
#[derive(Clone, Default)]
pub struct CalibrationStore {
    inner: Arc<RwLock<HashMap<CameraId, Option<Calibration>>>>,
}

impl CalibrationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, camera_id: CameraId, calibration: Option<Calibration>) {
        self.inner.write().insert(camera_id, calibration);
    }

    #[must_use]
    pub fn get(&self, camera_id: CameraId) -> Option<Calibration> {
        self.inner.read().get(&camera_id).cloned().flatten()
    }

    #[must_use]
    pub fn all_calibrated(&self, cameras: &[CameraId]) -> bool {
        let inner = self.inner.read();
        cameras.iter().all(|c| inner.contains_key(c))
    }
}

pub struct Transformer {
    pub map_width: f64,
    pub map_height: f64,
    pub real_map_width: f64,
    pub real_map_height: f64,
    pub areas: Vec<Area>,
}

/// Output of the transform step, before access control / zone updates.
#[derive(Debug, Clone, Copy)]
pub struct TransformedPoint {
    pub normalized: (f64, f64),
    pub map: (f64, f64),
    pub area_id: Option<AreaId>,
}

impl Transformer {
    #[must_use]
    pub fn new(
        map_width: f64,
        map_height: f64,
        real_map_width: f64,
        real_map_height: f64,
        areas: Vec<Area>,
    ) -> Self {
        Self { map_width, map_height, real_map_width, real_map_height, areas }
    }

    /// Transforms a detection's bbox centroid into normalized/map/area
    /// coordinates. `frame_w`/`frame_h` are the owning frame's pixel
    /// dimensions, used only by the calibration-free fallback path.
    #[must_use]
    pub fn transform(
        &self,
        calibration: Option<&Calibration>,
        bbox: &BBox,
        frame_w: f64,
        frame_h: f64,
    ) -> TransformedPoint {
        let (cx, cy) = bbox.centroid();

        let (nx, ny) = if let Some(cal) = calibration {
            let (wx, wy) = self.project(cal, cx, cy);
            (wx / self.real_map_width, wy / self.real_map_height)
        } else {
            (cx / frame_w, cy / frame_h)
        };

        let map_x = nx * self.map_width;
        let map_y = ny * self.map_height;

        let area_id = self.locate_area(nx, ny);

        TransformedPoint { normalized: (nx, ny), map: (map_x, map_y), area_id }
    }

    /// Applies the 3x3 homography with perspective divide, producing
    /// millimetre world coordinates on the `real_map_width x
    /// real_map_height` plane.
    fn project(&self, cal: &Calibration, cx: f64, cy: f64) -> (f64, f64) {
        let p = Vector3::new(cx, cy, 1.0);
        let projected = cal.homography * p;
        if projected.z.abs() < f64::EPSILON {
            return (cx, cy);
        }
        (projected.x / projected.z, projected.y / projected.z)
    }

    /// First area (in `self.areas`' stable order) whose rectangle
    /// contains (nx, ny). Logs a warning when more than one area matches
    /// (spec §4.3).
    fn locate_area(&self, nx: f64, ny: f64) -> Option<AreaId> {
        let mut matches = self.areas.iter().filter(|a| a.rect.contains(nx, ny));
        let first = matches.next()?;
        if matches.next().is_some() {
            tracing::warn!(nx, ny, "point falls inside multiple areas; using first in order");
        }
        Some(first.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NormRect;

    fn areas() -> Vec<Area> {
        vec![
            Area {
                id: 1,
                name: "TWY_A".into(),
                rect: NormRect { x1: 0.0, y1: 0.0, x2: 0.5, y2: 0.5 },
            },
            Area {
                id: 2,
                name: "TWY_B".into(),
                rect: NormRect { x1: 0.5, y1: 0.5, x2: 1.0, y2: 1.0 },
            },
        ]
    }

    #[test]
    fn fallback_without_calibration() {
        let t = Transformer::new(960.0, 720.0, 1800.0, 1350.0, areas());
        let bbox = BBox { x1: 400.0, y1: 300.0, x2: 440.0, y2: 340.0 };
        let out = t.transform(None, &bbox, 1920.0, 1440.0);

        // centroid (420, 320) / (1920, 1440) = (0.21875, 0.2222...)
        assert!((out.normalized.0 - 0.21875).abs() < 1e-9);
        assert!((out.normalized.1 - (320.0 / 1440.0)).abs() < 1e-9);
        assert_eq!(out.area_id, Some(1));
    }

    #[test]
    fn identity_homography_matches_fallback_scaled_to_real_map() {
        let t = Transformer::new(960.0, 720.0, 1800.0, 1350.0, areas());
        // An identity homography maps pixel (cx, cy) straight onto the
        // real map plane: normalize by real_map dimensions directly.
        let cal = Calibration::try_new(Matrix3::identity(), 1.0, 0).unwrap();
        let bbox = BBox { x1: 0.0, y1: 0.0, x2: 180.0, y2: 135.0 };
        let out = t.transform(Some(&cal), &bbox, 1920.0, 1440.0);

        assert!((out.normalized.0 - (90.0 / 1800.0)).abs() < 1e-9);
        assert!((out.normalized.1 - (67.5 / 1350.0)).abs() < 1e-9);
    }

    #[test]
    fn no_area_match_is_null() {
        let t = Transformer::new(960.0, 720.0, 1800.0, 1350.0, areas());
        let bbox = BBox { x1: 1800.0, y1: 1800.0, x2: 1800.0, y2: 1800.0 };
        let out = t.transform(None, &bbox, 10.0, 10.0);
        assert_eq!(out.area_id, None);
    }

    #[test]
    fn singular_matrix_rejected() {
        let singular = Matrix3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 1.0, 1.0, 1.0);
        assert!(Calibration::try_new(singular, 1.0, 0).is_none());
    }

    #[test]
    fn map_xy_truncated_only_on_wire() {
        use crate::types::{Detection, ObjectClass};
        let mut d = Detection {
            object_id: 1,
            class: ObjectClass::Fod,
            bbox: BBox { x1: 0.0, y1: 0.0, x2: 0.0, y2: 0.0 },
            confidence: 1.0,
            pose: None,
            camera_id: 'A',
            frame_id: 0,
            normalized: (0.0, 0.0),
            map: (421.999, 344.5),
            area_id: Some(1),
            event_type: None,
            rescue_level: None,
        };
        assert_eq!(d.map_xy_wire(), (421, 344));
        d.map = (0.0, 0.0);
        assert_eq!(d.map_xy_wire(), (0, 0));
    }
}
