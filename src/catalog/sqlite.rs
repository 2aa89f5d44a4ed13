//! SQLite implementation of the AssetStore trait

use crate::catalog::{AssetRecord, AssetStore, CatalogError, ComplianceFlags};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Column list shared by every SELECT so row mapping stays in one place.
const ASSET_COLUMNS: &str = "content_hash, source_identifier, title, brand, category, price, \
     currency, source_image_url, merchant_url, rendered_image_urls, primary_rendered_url, \
     ai_disclosure_applied, synthetic_watermark_applied, disclosure_text, is_trending, \
     trend_keyword, trend_refreshed_at, search_tags, created_at, updated_at";

/// SQLite-backed implementation of AssetStore
///
/// The `content_hash` primary key is what enforces the dedup invariant: a
/// second ingestion of the same source image can only ever update the
/// existing row.
pub struct SqliteAssetStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAssetStore {
    /// Open (creating if needed) the asset table in the given database file.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, CatalogError> {
        let conn = Connection::open(db_path)?;
        // The job store opens its own connection to the same file.
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), CatalogError> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS assets (
                content_hash TEXT PRIMARY KEY,
                source_identifier TEXT,
                title TEXT,
                brand TEXT,
                category TEXT,
                price REAL,
                currency TEXT,
                source_image_url TEXT NOT NULL,
                merchant_url TEXT NOT NULL DEFAULT '',
                rendered_image_urls TEXT NOT NULL DEFAULT '[]',
                primary_rendered_url TEXT,
                ai_disclosure_applied INTEGER NOT NULL DEFAULT 0,
                synthetic_watermark_applied INTEGER NOT NULL DEFAULT 0,
                disclosure_text TEXT,
                is_trending INTEGER NOT NULL DEFAULT 0,
                trend_keyword TEXT,
                trend_refreshed_at TEXT,
                search_tags TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;

        // Index for the trending lookup
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_assets_trending ON assets(is_trending, trend_refreshed_at DESC)",
            [],
        )?;

        info!("Asset store schema initialized");
        Ok(())
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<AssetRecord> {
        let rendered_json: String = row.get(9)?;
        let rendered_image_urls: Vec<String> =
            serde_json::from_str(&rendered_json).unwrap_or_default();

        Ok(AssetRecord {
            content_hash: row.get(0)?,
            source_identifier: row.get(1)?,
            title: row.get(2)?,
            brand: row.get(3)?,
            category: row.get(4)?,
            price: row.get(5)?,
            currency: row.get(6)?,
            source_image_url: row.get(7)?,
            merchant_url: row.get(8)?,
            rendered_image_urls,
            primary_rendered_url: row.get(10)?,
            compliance: ComplianceFlags {
                ai_disclosure_applied: row.get::<_, i64>(11)? != 0,
                synthetic_watermark_applied: row.get::<_, i64>(12)? != 0,
            },
            disclosure_text: row.get(13)?,
            is_trending: row.get::<_, i64>(14)? != 0,
            trend_keyword: row.get(15)?,
            trend_refreshed_at: row
                .get::<_, Option<String>>(16)?
                .and_then(|s| parse_timestamp(&s)),
            search_tags: row.get(17)?,
            created_at: row
                .get::<_, String>(18)
                .map(|s| parse_timestamp(&s).unwrap_or_else(Utc::now))?,
            updated_at: row
                .get::<_, String>(19)
                .map(|s| parse_timestamp(&s).unwrap_or_else(Utc::now))?,
        })
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[async_trait::async_trait]
impl AssetStore for SqliteAssetStore {
    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<AssetRecord>, CatalogError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            "SELECT {ASSET_COLUMNS} FROM assets WHERE content_hash = ?1"
        ))?;
        let mut rows = stmt.query_map(params![content_hash], Self::row_to_record)?;

        match rows.next() {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(e)) => Err(CatalogError::Database(e.to_string())),
            None => Ok(None),
        }
    }

    async fn find_by_text(
        &self,
        query: &str,
        category: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AssetRecord>, CatalogError> {
        let conn = self.conn.lock().unwrap();

        // Substring match over title and derived tags, storage order.
        // Deliberately no relevance ranking.
        let pattern = format!("%{}%", query.trim().to_lowercase());
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {ASSET_COLUMNS} FROM assets
            WHERE (lower(title) LIKE ?1 OR search_tags LIKE ?1)
              AND (?2 IS NULL OR lower(category) = lower(?2))
            ORDER BY rowid
            LIMIT ?3
            "#
        ))?;

        let records: Vec<AssetRecord> = stmt
            .query_map(params![pattern, category, limit as i64], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "Text lookup for {:?} (category {:?}) matched {} cached assets",
            query,
            category,
            records.len()
        );
        Ok(records)
    }

    async fn find_trending(&self, limit: usize) -> Result<Vec<AssetRecord>, CatalogError> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {ASSET_COLUMNS} FROM assets
            WHERE is_trending = 1
            ORDER BY trend_refreshed_at DESC
            LIMIT ?1
            "#
        ))?;

        let records: Vec<AssetRecord> = stmt
            .query_map(params![limit as i64], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    async fn upsert(&self, record: &AssetRecord) -> Result<(), CatalogError> {
        let conn = self.conn.lock().unwrap();

        let rendered_json = serde_json::to_string(&record.rendered_image_urls)
            .map_err(|e| CatalogError::Database(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        // Last-write-wins on everything except the hash key and created_at.
        conn.execute(
            r#"
            INSERT INTO assets (
                content_hash, source_identifier, title, brand, category, price, currency,
                source_image_url, merchant_url, rendered_image_urls, primary_rendered_url,
                ai_disclosure_applied, synthetic_watermark_applied, disclosure_text,
                is_trending, trend_keyword, trend_refreshed_at, search_tags,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
            ON CONFLICT(content_hash) DO UPDATE SET
                source_identifier = excluded.source_identifier,
                title = excluded.title,
                brand = excluded.brand,
                category = excluded.category,
                price = excluded.price,
                currency = excluded.currency,
                source_image_url = excluded.source_image_url,
                merchant_url = excluded.merchant_url,
                rendered_image_urls = excluded.rendered_image_urls,
                primary_rendered_url = excluded.primary_rendered_url,
                ai_disclosure_applied = excluded.ai_disclosure_applied,
                synthetic_watermark_applied = excluded.synthetic_watermark_applied,
                disclosure_text = excluded.disclosure_text,
                is_trending = excluded.is_trending,
                trend_keyword = excluded.trend_keyword,
                trend_refreshed_at = excluded.trend_refreshed_at,
                search_tags = excluded.search_tags,
                updated_at = excluded.updated_at
            "#,
            params![
                record.content_hash,
                record.source_identifier,
                record.title,
                record.brand,
                record.category,
                record.price,
                record.currency,
                record.source_image_url,
                record.merchant_url,
                rendered_json,
                record.primary_rendered_url,
                record.compliance.ai_disclosure_applied as i64,
                record.compliance.synthetic_watermark_applied as i64,
                record.disclosure_text,
                record.is_trending as i64,
                record.trend_keyword,
                record.trend_refreshed_at.map(|t| t.to_rfc3339()),
                record.search_tags,
                record.created_at.to_rfc3339(),
                now,
            ],
        )?;

        debug!(
            "Upserted asset {} ({} renders)",
            &record.content_hash[..record.content_hash.len().min(16)],
            record.rendered_image_urls.len()
        );
        Ok(())
    }
}
