//! In-memory `Repository` used by tests and by the pure-logic examples in
//! this crate's doctests; mirrors the shape of `SqliteRepository` without
//! any I/O.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::types::{Area, AreaId, AuthorityLevel, ObjectId};

use super::{DetectionRecord, Error, Repository};

#[derive(Default)]
struct Inner {
    first_detections: HashMap<ObjectId, DetectionRecord>,
    access_conditions: HashMap<AreaId, AuthorityLevel>,
    areas: Vec<Area>,
    bird_risk_log: Vec<(Option<u8>, u8, chrono::DateTime<chrono::Utc>)>,
    interactions: Vec<(String, String, String, chrono::DateTime<chrono::Utc>)>,
}

#[derive(Default)]
pub struct MemoryRepository {
    inner: Mutex<Inner>,
}

impl MemoryRepository {
    #[must_use]
    pub fn new(areas: Vec<Area>, access_conditions: HashMap<AreaId, AuthorityLevel>) -> Self {
        Self {
            inner: Mutex::new(Inner { areas, access_conditions, ..Inner::default() }),
        }
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn save_first_detection(&self, record: DetectionRecord) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.first_detections.entry(record.object_id).or_insert(record);
        Ok(())
    }

    async fn load_access_conditions(&self) -> Result<HashMap<AreaId, AuthorityLevel>, Error> {
        Ok(self.inner.lock().access_conditions.clone())
    }

    async fn update_access_conditions(
        &self,
        levels: &HashMap<AreaId, AuthorityLevel>,
    ) -> Result<(), Error> {
        self.inner.lock().access_conditions = levels.clone();
        Ok(())
    }

    async fn get_area_list(&self) -> Result<Vec<Area>, Error> {
        Ok(self.inner.lock().areas.clone())
    }

    async fn query_history(
        &self,
        date_from: chrono::DateTime<chrono::Utc>,
        date_to: chrono::DateTime<chrono::Utc>,
        types: &[u8],
    ) -> Result<Vec<DetectionRecord>, Error> {
        let inner = self.inner.lock();
        Ok(inner
            .first_detections
            .values()
            .filter(|r| {
                r.timestamp >= date_from
                    && r.timestamp <= date_to
                    && (types.is_empty() || types.contains(&r.event_type))
            })
            .cloned()
            .collect())
    }

    async fn append_bird_risk(
        &self,
        prev: Option<u8>,
        curr: u8,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), Error> {
        self.inner.lock().bird_risk_log.push((prev, curr, timestamp));
        Ok(())
    }

    async fn get_latest_bird_risk(&self) -> Result<Option<u8>, Error> {
        Ok(self.inner.lock().bird_risk_log.last().map(|(_, curr, _)| *curr))
    }

    async fn log_interaction(
        &self,
        channel: &str,
        request: &str,
        response: &str,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), Error> {
        self.inner.lock().interactions.push((
            channel.to_string(),
            request.to_string(),
            response.to_string(),
            timestamp,
        ));
        Ok(())
    }

    async fn load_alerted_object_ids(&self) -> Result<Vec<ObjectId>, Error> {
        Ok(self.inner.lock().first_detections.keys().copied().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectClass;

    fn record(id: ObjectId) -> DetectionRecord {
        DetectionRecord {
            object_id: id,
            event_type: 1,
            class: ObjectClass::Fod,
            area_id: Some(1),
            map_x: 1,
            map_y: 1,
            timestamp: chrono::Utc::now(),
            image_path: Some("img_1.jpg".into()),
        }
    }

    #[tokio::test]
    async fn save_first_detection_is_idempotent() {
        let repo = MemoryRepository::default();
        repo.save_first_detection(record(1)).await.unwrap();
        let mut second = record(1);
        second.map_x = 999;
        repo.save_first_detection(second).await.unwrap();

        let ids = repo.load_alerted_object_ids().await.unwrap();
        assert_eq!(ids, vec![1]);
    }

    #[tokio::test]
    async fn access_conditions_round_trip() {
        let repo = MemoryRepository::default();
        let mut levels = HashMap::new();
        for i in 1..=8u8 {
            levels.insert(i, AuthorityLevel::AuthOnly);
        }
        repo.update_access_conditions(&levels).await.unwrap();

        let loaded = repo.load_access_conditions().await.unwrap();
        assert_eq!(loaded.len(), 8);
    }

    #[tokio::test]
    async fn bird_risk_tracks_latest() {
        let repo = MemoryRepository::default();
        repo.append_bird_risk(None, 3, chrono::Utc::now()).await.unwrap();
        repo.append_bird_risk(Some(3), 1, chrono::Utc::now()).await.unwrap();

        assert_eq!(repo.get_latest_bird_risk().await.unwrap(), Some(1));
    }
}
