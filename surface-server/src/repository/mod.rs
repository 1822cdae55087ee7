//! Repository Façade (spec §4.7, SPEC_FULL §4.7a/b): first-detection
//! persistence, access-condition read/write, history queries, bird-risk
//! log, and interaction logging — behind a narrow trait so the pipeline
//! stays testable without a database.

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::{Area, AreaId, AuthorityLevel, ObjectClass, ObjectId};

/// Database calls have a 2s timeout (spec §5); callers should wrap
/// `Repository` calls in `tokio::time::timeout(DB_TIMEOUT, ...)`.
pub const DB_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("database unavailable: {0}")]
    Unavailable(String),
    #[error("operation timed out")]
    Timeout,
    #[error("not found")]
    NotFound,
}

#[derive(Debug, Clone)]
pub struct DetectionRecord {
    pub object_id: ObjectId,
    pub event_type: u8,
    pub class: ObjectClass,
    pub area_id: Option<AreaId>,
    pub map_x: i64,
    pub map_y: i64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub image_path: Option<String>,
}

#[async_trait]
pub trait Repository: Send + Sync {
    /// Idempotent by `object_id`: a duplicate insert is a no-op success,
    /// guaranteeing at-most-once persistence (spec §4.7, invariant in §7).
    async fn save_first_detection(&self, record: DetectionRecord) -> Result<(), Error>;

    async fn load_access_conditions(&self) -> Result<HashMap<AreaId, AuthorityLevel>, Error>;

    /// Atomic upsert over all 8 zones; on failure the cache must not be
    /// touched by the caller (spec §3 invariant).
    async fn update_access_conditions(
        &self,
        levels: &HashMap<AreaId, AuthorityLevel>,
    ) -> Result<(), Error>;

    async fn get_area_list(&self) -> Result<Vec<Area>, Error>;

    async fn query_history(
        &self,
        date_from: chrono::DateTime<chrono::Utc>,
        date_to: chrono::DateTime<chrono::Utc>,
        types: &[u8],
    ) -> Result<Vec<DetectionRecord>, Error>;

    async fn append_bird_risk(
        &self,
        prev: Option<u8>,
        curr: u8,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), Error>;

    async fn get_latest_bird_risk(&self) -> Result<Option<u8>, Error>;

    /// SPEC_FULL §4.7b: audit trail for controller/pilot request/response
    /// pairs.
    async fn log_interaction(
        &self,
        channel: &str,
        request: &str,
        response: &str,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), Error>;

    /// SPEC_FULL §9 open-question resolution: seeds `AlertedSet` from
    /// already-persisted first detections, so a restart doesn't re-alert.
    async fn load_alerted_object_ids(&self) -> Result<Vec<ObjectId>, Error>;
}
