//! SQLite-backed `Repository` (SPEC_FULL §4.7a). The schema mirrors the
//! table names spec §6 lists under "Persisted state"; they are used only
//! as data labels, not as a prescribed engine.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::types::{Area, AreaId, AuthorityLevel, NormRect, ObjectClass, ObjectId};

use super::{DetectionRecord, Error, Repository};

pub struct SqliteRepository {
    pool: SqlitePool,
}

impl SqliteRepository {
    /// `database_url` is typically `sqlite://path/to/file.db` or
    /// `sqlite::memory:`. Runs embedded migrations before returning.
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        Ok(Self { pool })
    }
}

fn object_type_id(class: ObjectClass) -> i64 {
    match class {
        ObjectClass::Bird => 1,
        ObjectClass::Fod => 2,
        ObjectClass::Animal => 3,
        ObjectClass::Person => 4,
        ObjectClass::Vehicle => 5,
        ObjectClass::WorkPerson => 6,
        ObjectClass::WorkVehicle => 7,
        ObjectClass::Airplane => 8,
        ObjectClass::Aircraft => 9,
    }
}

fn class_from_object_type_id(id: i64) -> ObjectClass {
    match id {
        1 => ObjectClass::Bird,
        2 => ObjectClass::Fod,
        3 => ObjectClass::Animal,
        4 => ObjectClass::Person,
        5 => ObjectClass::Vehicle,
        6 => ObjectClass::WorkPerson,
        7 => ObjectClass::WorkVehicle,
        8 => ObjectClass::Airplane,
        _ => ObjectClass::Aircraft,
    }
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn save_first_detection(&self, record: DetectionRecord) -> Result<(), Error> {
        let mut tx = self.pool.begin().await.map_err(|e| Error::Unavailable(e.to_string()))?;

        let exists: Option<i64> = sqlx::query_scalar(
            "SELECT object_id FROM detected_object WHERE object_id = ?",
        )
        .bind(record.object_id as i64)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| Error::Unavailable(e.to_string()))?;

        if exists.is_some() {
            return Ok(()); // idempotent: first detection already persisted.
        }

        sqlx::query(
            "INSERT INTO detected_object (object_id, object_type_id, first_seen_at) VALUES (?, ?, ?)",
        )
        .bind(record.object_id as i64)
        .bind(object_type_id(record.class))
        .bind(record.timestamp.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Unavailable(e.to_string()))?;

        sqlx::query(
            "INSERT INTO detect_event (object_id, event_type_id, area_id, map_x, map_y, occurred_at, image_path) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.object_id as i64)
        .bind(i64::from(record.event_type))
        .bind(record.area_id.map(i64::from))
        .bind(record.map_x)
        .bind(record.map_y)
        .bind(record.timestamp.to_rfc3339())
        .bind(record.image_path)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Unavailable(e.to_string()))?;

        tx.commit().await.map_err(|e| Error::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn load_access_conditions(&self) -> Result<HashMap<AreaId, AuthorityLevel>, Error> {
        let rows = sqlx::query("SELECT area_id, authority_level_id FROM access_conditions")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        let mut out = HashMap::new();
        for row in rows {
            let area_id: i64 = row.try_get("area_id").map_err(|e| Error::Unavailable(e.to_string()))?;
            let level: i64 =
                row.try_get("authority_level_id").map_err(|e| Error::Unavailable(e.to_string()))?;
            if let Some(level) = AuthorityLevel::from_u8(level as u8) {
                out.insert(area_id as AreaId, level);
            }
        }
        Ok(out)
    }

    async fn update_access_conditions(
        &self,
        levels: &HashMap<AreaId, AuthorityLevel>,
    ) -> Result<(), Error> {
        let mut tx = self.pool.begin().await.map_err(|e| Error::Unavailable(e.to_string()))?;

        for (&area_id, &level) in levels {
            sqlx::query(
                "INSERT INTO access_conditions (area_id, authority_level_id) VALUES (?, ?) \
                 ON CONFLICT(area_id) DO UPDATE SET authority_level_id = excluded.authority_level_id",
            )
            .bind(i64::from(area_id))
            .bind(i64::from(level.as_u8()))
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;
        }

        tx.commit().await.map_err(|e| Error::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn get_area_list(&self) -> Result<Vec<Area>, Error> {
        let rows = sqlx::query("SELECT id, name, x1, y1, x2, y2 FROM area ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                Ok(Area {
                    id: row.try_get::<i64, _>("id").map_err(|e| Error::Unavailable(e.to_string()))? as AreaId,
                    name: row.try_get("name").map_err(|e| Error::Unavailable(e.to_string()))?,
                    rect: NormRect {
                        x1: row.try_get("x1").map_err(|e| Error::Unavailable(e.to_string()))?,
                        y1: row.try_get("y1").map_err(|e| Error::Unavailable(e.to_string()))?,
                        x2: row.try_get("x2").map_err(|e| Error::Unavailable(e.to_string()))?,
                        y2: row.try_get("y2").map_err(|e| Error::Unavailable(e.to_string()))?,
                    },
                })
            })
            .collect()
    }

    async fn query_history(
        &self,
        date_from: chrono::DateTime<chrono::Utc>,
        date_to: chrono::DateTime<chrono::Utc>,
        types: &[u8],
    ) -> Result<Vec<DetectionRecord>, Error> {
        let rows = sqlx::query(
            "SELECT de.object_id, de.event_type_id, do2.object_type_id, de.area_id, de.map_x, de.map_y, \
                    de.occurred_at, de.image_path \
             FROM detect_event de \
             JOIN detected_object do2 ON do2.object_id = de.object_id \
             WHERE de.occurred_at BETWEEN ? AND ?",
        )
        .bind(date_from.to_rfc3339())
        .bind(date_to.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Unavailable(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            let event_type: i64 =
                row.try_get("event_type_id").map_err(|e| Error::Unavailable(e.to_string()))?;
            if !types.is_empty() && !types.contains(&(event_type as u8)) {
                continue;
            }
            let occurred_at: String =
                row.try_get("occurred_at").map_err(|e| Error::Unavailable(e.to_string()))?;
            out.push(DetectionRecord {
                object_id: row.try_get::<i64, _>("object_id").map_err(|e| Error::Unavailable(e.to_string()))?
                    as ObjectId,
                event_type: event_type as u8,
                class: class_from_object_type_id(
                    row.try_get("object_type_id").map_err(|e| Error::Unavailable(e.to_string()))?,
                ),
                area_id: row
                    .try_get::<Option<i64>, _>("area_id")
                    .map_err(|e| Error::Unavailable(e.to_string()))?
                    .map(|v| v as AreaId),
                map_x: row.try_get("map_x").map_err(|e| Error::Unavailable(e.to_string()))?,
                map_y: row.try_get("map_y").map_err(|e| Error::Unavailable(e.to_string()))?,
                timestamp: chrono::DateTime::parse_from_rfc3339(&occurred_at)
                    .map_err(|e| Error::Unavailable(e.to_string()))?
                    .with_timezone(&chrono::Utc),
                image_path: row.try_get("image_path").map_err(|e| Error::Unavailable(e.to_string()))?,
            });
        }
        Ok(out)
    }

    async fn append_bird_risk(
        &self,
        prev: Option<u8>,
        curr: u8,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO bird_risk_log (prev_level, curr_level, occurred_at) VALUES (?, ?, ?)",
        )
        .bind(prev.map(i64::from))
        .bind(i64::from(curr))
        .bind(timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn get_latest_bird_risk(&self) -> Result<Option<u8>, Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT curr_level FROM bird_risk_log ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Unavailable(e.to_string()))?;
        Ok(row.map(|(v,)| v as u8))
    }

    async fn log_interaction(
        &self,
        channel: &str,
        request: &str,
        response: &str,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO interaction_log (channel, request, response, occurred_at) VALUES (?, ?, ?, ?)",
        )
        .bind(channel)
        .bind(request)
        .bind(response)
        .bind(timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn load_alerted_object_ids(&self) -> Result<Vec<ObjectId>, Error> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT object_id FROM detected_object")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;
        Ok(rows.into_iter().map(|(v,)| v as ObjectId).collect())
    }
}
