use anyhow::Result;
use bytes::Bytes;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::hall_of_fame::HallOfFameEntry;
use crate::infra::db::Db;
use crate::infra::storage::BlobStores;

fn entry_from_row(row: &PgRow) -> HallOfFameEntry {
    HallOfFameEntry {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        uploaded_on: row.get("uploaded_on"),
        lat: row.get("lat"),
        lon: row.get("lon"),
        score: row.get("score"),
        content_key: row.get("content_key"),
    }
}

#[derive(Clone)]
pub struct HallOfFameService {
    db: Db,
    blobs: BlobStores,
}

impl HallOfFameService {
    pub fn new(db: Db, blobs: BlobStores) -> Self {
        Self { db, blobs }
    }

    /// All entries, best first. Earlier inductees win ties.
    pub async fn list(&self) -> Result<Vec<HallOfFameEntry>> {
        let rows = sqlx::query(
            "SELECT id, owner_id, uploaded_on, lat, lon, score, content_key \
             FROM hall_of_fame ORDER BY score DESC, inducted_on ASC, id ASC",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows.iter().map(entry_from_row).collect())
    }

    pub async fn get(&self, entry_id: Uuid) -> Result<Option<HallOfFameEntry>> {
        let row = sqlx::query(
            "SELECT id, owner_id, uploaded_on, lat, lon, score, content_key \
             FROM hall_of_fame WHERE id = $1",
        )
        .bind(entry_id)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row.as_ref().map(entry_from_row))
    }

    pub async fn file(&self, entry_id: Uuid) -> Result<Option<Bytes>> {
        let Some(entry) = self.get(entry_id).await? else {
            return Ok(None);
        };
        self.blobs.hall_of_fame.retrieve(&entry.content_key).await
    }
}
