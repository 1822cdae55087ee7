//! Access Controller (spec §4.5): classifies objects and evaluates
//! authority level per zone, filtering violators from the fan-out set.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::{AreaId, AuthorityLevel, Detection, EventType, ObjectClass, Pose};

/// Read-mostly, single-writer (the AC_UA handler); readers observe a
/// consistent snapshot (spec §5).
#[derive(Clone, Default)]
pub struct AccessCache {
    inner: Arc<RwLock<HashMap<AreaId, AuthorityLevel>>>,
}

impl AccessCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, levels: &HashMap<AreaId, AuthorityLevel>) {
        *self.inner.write() = levels.clone();
    }

    /// Default AUTH_ONLY on miss (spec §4.5 step 3).
    #[must_use]
    pub fn get(&self, area_id: AreaId) -> AuthorityLevel {
        self.inner.read().get(&area_id).copied().unwrap_or(AuthorityLevel::AuthOnly)
    }

    #[must_use]
    pub fn snapshot(&self) -> HashMap<AreaId, AuthorityLevel> {
        self.inner.read().clone()
    }
}

/// Runs the §4.5 algorithm over one detection, in place, mutating its
/// `event_type`/`rescue_level` fields. Returns whether the detection
/// should be included in the fan-out set.
#[must_use]
pub fn evaluate(detection: &mut Detection, cache: &AccessCache) -> bool {
    if detection.class.is_airborne() {
        return false;
    }

    if detection.class.is_hazard() {
        detection.event_type = Some(EventType::Hazard);
        return true;
    }

    let included = match detection.area_id {
        None => true, // unknown zone is always a violation.
        Some(area_id) => match cache.get(area_id) {
            AuthorityLevel::Open => false,
            AuthorityLevel::AuthOnly => !detection.class.is_authorized_worker(),
            AuthorityLevel::NoEntry => true,
        },
    };

    if included {
        detection.event_type = Some(EventType::Unauth);
    }

    if detection.class == ObjectClass::Person {
        detection.rescue_level = Some(u8::from(detection.pose == Some(Pose::Fallen)));
    }

    included
}

/// Filters a batch, keeping the transformed-coordinates fields intact and
/// the detections' original order.
pub fn filter(detections: Vec<Detection>, cache: &AccessCache) -> Vec<Detection> {
    detections
        .into_iter()
        .filter_map(|mut d| evaluate(&mut d, cache).then_some(d))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BBox;

    fn det(class: ObjectClass, area_id: Option<AreaId>, pose: Option<Pose>) -> Detection {
        Detection {
            object_id: 1,
            class,
            bbox: BBox { x1: 0.0, y1: 0.0, x2: 1.0, y2: 1.0 },
            confidence: 0.9,
            pose,
            camera_id: 'A',
            frame_id: 0,
            normalized: (0.1, 0.1),
            map: (1.0, 1.0),
            area_id,
            event_type: None,
            rescue_level: None,
        }
    }

    #[test]
    fn airplane_is_always_dropped() {
        let cache = AccessCache::new();
        let mut d = det(ObjectClass::Airplane, Some(1), None);
        assert!(!evaluate(&mut d, &cache));
    }

    #[test]
    fn hazard_classes_always_included() {
        let cache = AccessCache::new();
        for class in [ObjectClass::Bird, ObjectClass::Fod, ObjectClass::Animal] {
            let mut d = det(class, None, None);
            assert!(evaluate(&mut d, &cache));
            assert_eq!(d.event_type, Some(EventType::Hazard));
        }
    }

    #[test]
    fn null_area_is_unauth_violation() {
        let cache = AccessCache::new();
        let mut d = det(ObjectClass::Person, None, None);
        assert!(evaluate(&mut d, &cache));
        assert_eq!(d.event_type, Some(EventType::Unauth));
    }

    #[test]
    fn open_zone_drops_access_subject() {
        let mut levels = HashMap::new();
        levels.insert(1, AuthorityLevel::Open);
        let cache = AccessCache::new();
        cache.load(&levels);

        let mut d = det(ObjectClass::Person, Some(1), None);
        assert!(!evaluate(&mut d, &cache));
    }

    #[test]
    fn auth_only_excludes_work_classes_but_not_others() {
        let mut levels = HashMap::new();
        levels.insert(3, AuthorityLevel::AuthOnly);
        let cache = AccessCache::new();
        cache.load(&levels);

        let mut worker = det(ObjectClass::WorkVehicle, Some(3), None);
        assert!(!evaluate(&mut worker, &cache));

        let mut visitor = det(ObjectClass::Vehicle, Some(3), None);
        assert!(evaluate(&mut visitor, &cache));
        assert_eq!(visitor.event_type, Some(EventType::Unauth));
    }

    #[test]
    fn no_entry_includes_everyone() {
        let mut levels = HashMap::new();
        levels.insert(3, AuthorityLevel::NoEntry);
        let cache = AccessCache::new();
        cache.load(&levels);

        let mut worker = det(ObjectClass::WorkVehicle, Some(3), None);
        assert!(evaluate(&mut worker, &cache));
    }

    #[test]
    fn fallen_person_gets_rescue_level_one() {
        let mut levels = HashMap::new();
        levels.insert(5, AuthorityLevel::AuthOnly);
        let cache = AccessCache::new();
        cache.load(&levels);

        let mut d = det(ObjectClass::Person, Some(5), Some(Pose::Fallen));
        assert!(evaluate(&mut d, &cache));
        assert_eq!(d.rescue_level, Some(1));
    }

    #[test]
    fn standing_person_gets_rescue_level_zero() {
        let cache = AccessCache::new();
        let mut d = det(ObjectClass::Person, None, Some(Pose::Stand));
        assert!(evaluate(&mut d, &cache));
        assert_eq!(d.rescue_level, Some(0));
    }

    #[test]
    fn non_person_never_has_rescue_level() {
        let cache = AccessCache::new();
        let mut d = det(ObjectClass::Fod, None, None);
        evaluate(&mut d, &cache);
        assert_eq!(d.rescue_level, None);
    }

    #[test]
    fn defaults_to_auth_only_on_cache_miss() {
        let cache = AccessCache::new();
        assert_eq!(cache.get(42), AuthorityLevel::AuthOnly);
    }
}
